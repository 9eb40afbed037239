//! Upload orchestration.
//!
//! Coordinates the full flow for each upload shape: workbook bytes → grid →
//! normalization → storage. The grouped path runs the build-marker
//! normalizer; the bulk path is a naive header-row-0 insert; the preview
//! helpers back the column-selection wizard.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use chrono::Utc;
use uuid::Uuid;

use crate::config::Config;
use crate::models::{RecordMeta, StoredRecord};
use crate::normalize;
use crate::store::Store;
use crate::workbook;

/// Counts reported back from an upload.
#[derive(Debug)]
pub struct UploadOutcome {
    pub inserted: u64,
    pub build_markers: u64,
}

/// The build-grouped upload path (`POST /upload/data`, `import` command).
///
/// `start_row` is the zero-based header row the caller selected after
/// previewing; normalization walks the rows after it. Build history entries
/// recognized during the walk are persisted alongside the records.
pub async fn ingest_grouped(
    store: &Store,
    bytes: &[u8],
    file_name: &str,
    sheet_name: &str,
    start_row: usize,
    columns: &[String],
) -> Result<UploadOutcome> {
    let grid = workbook::read_grid(bytes, sheet_name, start_row)?;
    if !grid.iter().any(|row| row.iter().any(|c| !c.is_empty())) {
        bail!(
            "no rows found in sheet '{}' of {}",
            sheet_name,
            file_name
        );
    }

    let now = Utc::now().timestamp();
    let upload = normalize::normalize_grid(&grid, 0, columns, file_name, sheet_name, now)?;

    if upload.records.is_empty() {
        bail!(
            "no valid rows after normalization in sheet '{}' of {}",
            sheet_name,
            file_name
        );
    }

    let inserted = store.insert_records(&upload.records).await?;
    let build_markers = store.insert_build_history(&upload.build_history).await?;

    tracing::info!(
        file = file_name,
        sheet = sheet_name,
        inserted,
        build_markers,
        "grouped upload stored"
    );

    Ok(UploadOutcome {
        inserted,
        build_markers,
    })
}

/// The naive upload path (`POST /upload/bulk`, `bulk` command): row 0 is the
/// header, every following row becomes a record, no build grouping and no
/// validity filtering.
pub async fn ingest_bulk(
    store: &Store,
    bytes: &[u8],
    file_name: &str,
    sheet_name: &str,
) -> Result<UploadOutcome> {
    let names = workbook::sheet_names(bytes)?;
    if !names.iter().any(|n| n == sheet_name) {
        return Err(workbook::WorkbookError::SheetNotFound(sheet_name.to_string()).into());
    }

    let grid = workbook::read_grid(bytes, sheet_name, 0)?;
    let Some(header_cells) = grid.first() else {
        bail!("no rows found in sheet '{}' of {}", sheet_name, file_name);
    };
    let headers = normalize::resolve_headers(header_cells)?;

    let now = Utc::now().timestamp();
    let records: Vec<StoredRecord> = grid[1..]
        .iter()
        .map(|row| {
            let mut fields = BTreeMap::new();
            for (i, header) in headers.iter().enumerate() {
                let value = row.get(i).cloned().unwrap_or_default();
                fields.insert(header.clone(), value);
            }
            StoredRecord {
                id: Uuid::new_v4().to_string(),
                fields,
                meta: RecordMeta {
                    file_name: file_name.to_string(),
                    sheet_name: sheet_name.to_string(),
                    uploaded_at: now,
                },
            }
        })
        .collect();

    let inserted = store.insert_records(&records).await?;

    tracing::info!(file = file_name, sheet = sheet_name, inserted, "bulk upload stored");

    Ok(UploadOutcome {
        inserted,
        build_markers: 0,
    })
}

/// The legacy save path (`PUT /upload`): rows were already read client-side;
/// only the selected columns are kept, verbatim. Metadata is stamped here so
/// the batch invariant holds for this path too.
pub async fn store_selected(
    store: &Store,
    data: &[BTreeMap<String, String>],
    selected: &[String],
    file_name: &str,
    sheet_name: &str,
) -> Result<u64> {
    let now = Utc::now().timestamp();
    let records: Vec<StoredRecord> = data
        .iter()
        .map(|row| {
            let mut fields = BTreeMap::new();
            for column in selected {
                if let Some(value) = row.get(column) {
                    fields.insert(column.clone(), value.clone());
                }
            }
            StoredRecord {
                id: Uuid::new_v4().to_string(),
                fields,
                meta: RecordMeta {
                    file_name: file_name.to_string(),
                    sheet_name: sheet_name.to_string(),
                    uploaded_at: now,
                },
            }
        })
        .collect();

    store.insert_records(&records).await
}

/// Reads the first sheet as a column-named table (`POST /upload`): row 0 is
/// the header (empty names become `Column<n>`), every following row becomes
/// an ordered column→value map.
pub fn workbook_table(bytes: &[u8]) -> Result<(Vec<String>, Vec<BTreeMap<String, String>>)> {
    let names = workbook::sheet_names(bytes)?;
    let Some(first) = names.first() else {
        bail!("workbook has no sheets");
    };

    let grid = workbook::read_grid(bytes, first, 0)?;
    let headers = normalize::resolve_headers(grid.first().cloned().unwrap_or_default().as_slice())?;

    let rows = grid
        .get(1..)
        .unwrap_or_default()
        .iter()
        .map(|row| {
            let mut out = BTreeMap::new();
            for (i, header) in headers.iter().enumerate() {
                out.insert(header.clone(), row.get(i).cloned().unwrap_or_default());
            }
            out
        })
        .collect();

    Ok((headers, rows))
}

/// Preview for the column-selection wizard: the first `limit` non-blank rows
/// from `start_row` on, plus the non-blank total.
pub fn preview_rows(
    bytes: &[u8],
    sheet_name: &str,
    start_row: usize,
    limit: usize,
) -> Result<(Vec<Vec<String>>, usize)> {
    let grid = workbook::read_grid(bytes, sheet_name, start_row)?;
    let non_blank: Vec<Vec<String>> = grid
        .into_iter()
        .filter(|row| row.iter().any(|c| !c.is_empty()))
        .collect();
    let total = non_blank.len();
    Ok((non_blank.into_iter().take(limit).collect(), total))
}

// ============ CLI entry points ============

pub async fn run_import(
    config: &Config,
    path: &std::path::Path,
    sheet: &str,
    start_row: usize,
    columns: &[String],
) -> Result<()> {
    let bytes = std::fs::read(path)?;
    let store = Store::open(config).await?;
    let file_name = file_name_of(path);

    let outcome = ingest_grouped(&store, &bytes, &file_name, sheet, start_row, columns).await?;

    println!("import {}", file_name);
    println!("  sheet: {}", sheet);
    println!("  records inserted: {}", outcome.inserted);
    println!("  build markers: {}", outcome.build_markers);
    println!("ok");

    store.close().await;
    Ok(())
}

pub async fn run_bulk(config: &Config, path: &std::path::Path, sheet: &str) -> Result<()> {
    let bytes = std::fs::read(path)?;
    let store = Store::open(config).await?;
    let file_name = file_name_of(path);

    let outcome = ingest_bulk(&store, &bytes, &file_name, sheet).await?;

    println!("bulk {}", file_name);
    println!("  sheet: {}", sheet);
    println!("  records inserted: {}", outcome.inserted);
    println!("ok");

    store.close().await;
    Ok(())
}

pub fn run_sheets(path: &std::path::Path) -> Result<()> {
    let bytes = std::fs::read(path)?;
    let names = workbook::sheet_names(&bytes)?;
    for name in names {
        println!("{}", name);
    }
    Ok(())
}

pub fn run_preview(
    config: &Config,
    path: &std::path::Path,
    sheet: &str,
    start_row: usize,
) -> Result<()> {
    let bytes = std::fs::read(path)?;
    let (rows, total) = preview_rows(&bytes, sheet, start_row, config.upload.preview_rows)?;

    for row in &rows {
        println!("{}", row.join(" | "));
    }
    println!("({} non-blank rows total)", total);
    Ok(())
}

fn file_name_of(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

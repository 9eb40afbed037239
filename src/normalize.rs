//! Row normalization: build-marker detection, context carry-forward, and
//! selected-column projection.
//!
//! Uploaded sheets interleave synthetic build marker rows (a build number
//! and timestamp alone in column 1) with ordinary data rows. The normalizer
//! walks the grid once, carrying the last seen marker forward as context,
//! and projects the caller's selected columns into flat records tagged with
//! upload metadata.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use anyhow::{bail, Result};
use regex::Regex;
use uuid::Uuid;

use crate::models::{
    BuildContext, BuildHistoryEntry, RecordMeta, StoredRecord, BUILD_COLUMN, DATE_COLUMN,
    RESERVED_FIELDS,
};

/// Build number pattern inside a marker cell, e.g. `1.134.11.3395`.
static BUILD_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+\.\d+\.\d+\.\d+").unwrap());

/// Build timestamp pattern inside a marker cell, e.g. `2024-07-29 16:09:02`.
static BUILD_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}").unwrap());

/// Output of one upload's normalization pass.
#[derive(Debug)]
pub struct NormalizedUpload {
    pub records: Vec<StoredRecord>,
    pub build_history: Vec<BuildHistoryEntry>,
}

/// What one row contributed, as decided by [`step`].
#[derive(Debug, PartialEq)]
pub enum RowOutcome {
    /// Recognized build marker; context was replaced.
    Marker { raw_text: String },
    /// Data row under a known build context: the full column map.
    Candidate(BTreeMap<String, String>),
    /// Blank row, unrecognized sparse row, or data before the first marker.
    Skip,
}

/// Parses a marker cell's text. Both patterns must match for the row to
/// count as a marker; otherwise the row stays an ordinary (if sparse) data
/// row.
pub fn extract_build_context(text: &str) -> Option<BuildContext> {
    let build_number = BUILD_NUMBER_RE.find(text)?.as_str().to_string();
    let date = BUILD_DATE_RE.find(text)?.as_str().to_string();
    Some(BuildContext { build_number, date })
}

fn cell(row: &[String], index: usize) -> &str {
    row.get(index).map(String::as_str).unwrap_or("")
}

fn is_marker_candidate(row: &[String]) -> bool {
    !cell(row, 0).is_empty() && row.iter().skip(1).all(|c| c.is_empty())
}

fn has_any_value(row: &[String]) -> bool {
    row.iter().any(|c| !c.is_empty())
}

/// Pure transition function: previous build context and one row in, new
/// context and the row's contribution out. The walk itself is a fold over
/// this, so the grouping logic is testable without a grid or a store.
pub fn step(
    ctx: Option<BuildContext>,
    headers: &[String],
    row: &[String],
) -> (Option<BuildContext>, RowOutcome) {
    if is_marker_candidate(row) {
        if let Some(next) = extract_build_context(cell(row, 0)) {
            let raw_text = cell(row, 0).to_string();
            return (Some(next), RowOutcome::Marker { raw_text });
        }
    }

    // A marker candidate that fails the pattern check falls through here and
    // is treated as an ordinary, if sparse, data row.
    match ctx {
        Some(ctx) if has_any_value(row) => {
            let mut fields = BTreeMap::new();
            fields.insert(BUILD_COLUMN.to_string(), ctx.build_number.clone());
            fields.insert(DATE_COLUMN.to_string(), ctx.date.clone());
            for (i, header) in headers.iter().enumerate() {
                fields.insert(header.clone(), cell(row, i).to_string());
            }
            (Some(ctx), RowOutcome::Candidate(fields))
        }
        ctx => (ctx, RowOutcome::Skip),
    }
}

/// Replaces empty header names with `Column<1-based index>` so every column
/// is addressable, then rejects names the record model reserves.
pub fn resolve_headers(raw: &[String]) -> Result<Vec<String>> {
    let headers: Vec<String> = raw
        .iter()
        .enumerate()
        .map(|(i, h)| {
            if h.is_empty() {
                format!("Column{}", i + 1)
            } else {
                h.clone()
            }
        })
        .collect();

    for header in &headers {
        if RESERVED_FIELDS.contains(&header.as_str()) {
            bail!("column name '{}' is reserved", header);
        }
    }
    Ok(headers)
}

/// Normalizes one sheet's grid into stored records and build history.
///
/// `header_row` is a zero-based index into `grid`, chosen by the caller
/// after previewing. `selected` lists the user's column picks; the build
/// columns are always included ahead of them.
pub fn normalize_grid(
    grid: &[Vec<String>],
    header_row: usize,
    selected: &[String],
    file_name: &str,
    sheet_name: &str,
    now: i64,
) -> Result<NormalizedUpload> {
    // A sheet with no content at all yields empty outputs rather than an
    // error; the caller distinguishes "no rows" from "no valid rows".
    if !grid.iter().any(|row| has_any_value(row)) {
        return Ok(NormalizedUpload {
            records: Vec::new(),
            build_history: Vec::new(),
        });
    }

    let header_cells = grid.get(header_row).cloned().unwrap_or_default();
    let headers = resolve_headers(&header_cells)?;

    let mut selected_columns: Vec<&str> = vec![BUILD_COLUMN, DATE_COLUMN];
    for col in selected {
        if !selected_columns.contains(&col.as_str()) {
            selected_columns.push(col);
        }
    }

    let mut records = Vec::new();
    let mut build_history = Vec::new();
    let mut ctx: Option<BuildContext> = None;

    for row in grid.iter().skip(header_row + 1) {
        let (next_ctx, outcome) = step(ctx, &headers, row);
        ctx = next_ctx;
        match outcome {
            RowOutcome::Marker { raw_text } => {
                // The context was just replaced, so it is present here.
                if let Some(ctx) = &ctx {
                    build_history.push(BuildHistoryEntry {
                        id: Uuid::new_v4().to_string(),
                        build_number: ctx.build_number.clone(),
                        date: ctx.date.clone(),
                        raw_text,
                        file_name: file_name.to_string(),
                        sheet_name: sheet_name.to_string(),
                        extracted_at: now,
                    });
                }
            }
            RowOutcome::Candidate(fields) => {
                if let Some(record) = project(&fields, &selected_columns, file_name, sheet_name, now)
                {
                    records.push(record);
                }
            }
            RowOutcome::Skip => {}
        }
    }

    Ok(NormalizedUpload {
        records,
        build_history,
    })
}

/// Projects the selected columns out of a candidate row. Values are trimmed;
/// a record survives only if at least one selected field is non-empty after
/// trimming. Selected columns missing from the candidate are omitted rather
/// than defaulted, so repeated projection is idempotent.
fn project(
    fields: &BTreeMap<String, String>,
    selected: &[&str],
    file_name: &str,
    sheet_name: &str,
    now: i64,
) -> Option<StoredRecord> {
    let mut out = BTreeMap::new();
    let mut has_value = false;
    for &column in selected {
        if let Some(value) = fields.get(column) {
            let trimmed = value.trim();
            out.insert(column.to_string(), trimmed.to_string());
            if !trimmed.is_empty() {
                has_value = true;
            }
        }
    }

    if !has_value {
        return None;
    }

    Some(StoredRecord {
        id: Uuid::new_v4().to_string(),
        fields: out,
        meta: RecordMeta {
            file_name: file_name.to_string(),
            sheet_name: sheet_name.to_string(),
            uploaded_at: now,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKER: &str = "1.134.11.3395 2024-07-29 16:09:02 notes";

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    fn normalize(grid: Vec<Vec<String>>, selected: &[&str]) -> NormalizedUpload {
        let selected: Vec<String> = selected.iter().map(|s| s.to_string()).collect();
        normalize_grid(&grid, 0, &selected, "results.xlsx", "Sheet1", 1_722_268_800).unwrap()
    }

    #[test]
    fn empty_grid_yields_nothing() {
        let out = normalize(vec![], &["A"]);
        assert!(out.records.is_empty());
        assert!(out.build_history.is_empty());

        let out = normalize(vec![row(&["", ""]), row(&[""])], &["A"]);
        assert!(out.records.is_empty());
        assert!(out.build_history.is_empty());
    }

    #[test]
    fn marker_cell_parses_both_patterns() {
        let ctx = extract_build_context(MARKER).unwrap();
        assert_eq!(ctx.build_number, "1.134.11.3395");
        assert_eq!(ctx.date, "2024-07-29 16:09:02");

        // One pattern alone is not a marker.
        assert!(extract_build_context("1.134.11.3395 only").is_none());
        assert!(extract_build_context("2024-07-29 16:09:02 only").is_none());
    }

    #[test]
    fn marker_resets_context_and_records_history() {
        let grid = vec![
            row(&["A", "B"]),
            row(&[MARKER, ""]),
            row(&["x", "y"]),
            row(&["1.2.3.4 2024-08-01 09:00:00", ""]),
            row(&["z", "w"]),
        ];
        let out = normalize(grid, &["A"]);
        assert_eq!(out.build_history.len(), 2);
        assert_eq!(out.build_history[0].build_number, "1.134.11.3395");
        assert_eq!(out.build_history[0].raw_text, MARKER);
        assert_eq!(out.build_history[1].build_number, "1.2.3.4");

        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[0].fields[BUILD_COLUMN], "1.134.11.3395");
        assert_eq!(out.records[1].fields[BUILD_COLUMN], "1.2.3.4");
        assert_eq!(out.records[1].fields[DATE_COLUMN], "2024-08-01 09:00:00");
    }

    #[test]
    fn data_row_projects_selected_columns() {
        let grid = vec![row(&["A", "B"]), row(&[MARKER, ""]), row(&["x", "y"])];
        let out = normalize(grid, &["빌드명", "날짜", "A"]);
        assert_eq!(out.records.len(), 1);
        let rec = &out.records[0];
        assert_eq!(rec.fields[BUILD_COLUMN], "1.134.11.3395");
        assert_eq!(rec.fields[DATE_COLUMN], "2024-07-29 16:09:02");
        assert_eq!(rec.fields["A"], "x");
        assert!(!rec.fields.contains_key("B"));
        assert_eq!(rec.meta.file_name, "results.xlsx");
        assert_eq!(rec.meta.sheet_name, "Sheet1");
    }

    #[test]
    fn rows_before_first_marker_are_dropped() {
        let grid = vec![row(&["A"]), row(&["orphan"]), row(&[MARKER]), row(&["kept"])];
        let out = normalize(grid, &["A"]);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].fields["A"], "kept");
    }

    #[test]
    fn blank_rows_are_neither_markers_nor_records() {
        let grid = vec![row(&["A"]), row(&[MARKER]), row(&["", ""]), row(&["x"])];
        let out = normalize(grid, &["A"]);
        assert_eq!(out.build_history.len(), 1);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].fields["A"], "x");
    }

    #[test]
    fn sparse_non_marker_rows_stay_data_rows() {
        // First cell set, rest empty, but no build patterns: an ordinary row.
        let grid = vec![row(&["A", "B"]), row(&[MARKER, ""]), row(&["lonely", ""])];
        let out = normalize(grid, &["A", "B"]);
        assert_eq!(out.build_history.len(), 1);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].fields["A"], "lonely");
        assert_eq!(out.records[0].fields["B"], "");
    }

    #[test]
    fn build_columns_keep_blank_data_rows_alive() {
        let grid = vec![row(&["A", "B"]), row(&[MARKER, ""]), row(&["  ", "y"])];
        let out = normalize(grid, &["A"]);
        // The build columns are always selected and non-empty, so a record
        // with only whitespace in its data columns still survives.
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].fields["A"], "");
    }

    #[test]
    fn all_blank_selection_is_dropped() {
        let mut fields = BTreeMap::new();
        fields.insert("A".to_string(), "   ".to_string());
        fields.insert("B".to_string(), String::new());
        assert!(project(&fields, &["A", "B"], "f.xlsx", "S", 0).is_none());

        fields.insert("B".to_string(), "v".to_string());
        let rec = project(&fields, &["A", "B"], "f.xlsx", "S", 0).unwrap();
        assert_eq!(rec.fields["A"], "");
        assert_eq!(rec.fields["B"], "v");
    }

    #[test]
    fn projection_is_idempotent() {
        let mut fields = BTreeMap::new();
        fields.insert("A".to_string(), "  x  ".to_string());
        fields.insert("B".to_string(), " ".to_string());
        let once = project(&fields, &["A", "B"], "f.xlsx", "S", 0).unwrap();
        let twice = project(&once.fields, &["A", "B"], "f.xlsx", "S", 0).unwrap();
        assert_eq!(once.fields, twice.fields);
    }

    #[test]
    fn values_are_trimmed_at_projection() {
        let grid = vec![row(&["A"]), row(&[MARKER]), row(&["  padded  "])];
        let out = normalize(grid, &["A"]);
        assert_eq!(out.records[0].fields["A"], "padded");
    }

    #[test]
    fn empty_headers_get_synthetic_names() {
        let headers = resolve_headers(&row(&["A", "", "C"])).unwrap();
        assert_eq!(headers, vec!["A", "Column2", "C"]);
    }

    #[test]
    fn reserved_headers_are_rejected() {
        assert!(resolve_headers(&row(&["A", "빌드명"])).is_err());
        assert!(resolve_headers(&row(&["_meta"])).is_err());
    }

    #[test]
    fn step_is_a_pure_transition() {
        let headers = row(&["A"]);
        let (ctx, outcome) = step(None, &headers, &row(&[MARKER]));
        assert!(matches!(outcome, RowOutcome::Marker { .. }));
        let ctx = ctx.unwrap();
        assert_eq!(ctx.build_number, "1.134.11.3395");

        let (ctx2, outcome) = step(Some(ctx.clone()), &headers, &row(&["x"]));
        assert_eq!(ctx2, Some(ctx));
        match outcome {
            RowOutcome::Candidate(fields) => assert_eq!(fields["A"], "x"),
            other => panic!("expected candidate, got {:?}", other),
        }

        let (ctx3, outcome) = step(None, &headers, &row(&["x"]));
        assert_eq!(ctx3, None);
        assert_eq!(outcome, RowOutcome::Skip);
    }
}

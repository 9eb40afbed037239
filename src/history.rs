//! Upload and build history listings.

use anyhow::Result;

use crate::config::Config;
use crate::models::{to_iso, BuildHistoryEntry, FileSummary};
use crate::store::Store;

/// One summary per distinct file: the most recent batch's sheet and
/// timestamp, sorted newest first.
pub async fn file_summaries(store: &Store) -> Result<Vec<FileSummary>> {
    let mut summaries = Vec::new();
    for file_name in store.file_names().await? {
        if let Some(summary) = store.latest_batch(&file_name).await? {
            summaries.push(summary);
        }
    }

    summaries.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
    Ok(summaries)
}

/// Build markers recognized at upload time, newest first.
pub async fn build_entries(
    store: &Store,
    file_name: Option<&str>,
) -> Result<Vec<BuildHistoryEntry>> {
    store.build_history(file_name).await
}

pub async fn run_history(config: &Config) -> Result<()> {
    let store = Store::open(config).await?;
    let summaries = file_summaries(&store).await?;

    if summaries.is_empty() {
        println!("No uploads.");
        store.close().await;
        return Ok(());
    }

    println!("{:<40} {:<20} UPLOADED", "FILE", "SHEET");
    for s in &summaries {
        println!(
            "{:<40} {:<20} {}",
            s.file_name,
            s.sheet_name,
            to_iso(s.uploaded_at)
        );
    }

    store.close().await;
    Ok(())
}

pub async fn run_builds(config: &Config, file_name: Option<&str>) -> Result<()> {
    let store = Store::open(config).await?;
    let entries = build_entries(&store, file_name).await?;

    if entries.is_empty() {
        println!("No build markers.");
        store.close().await;
        return Ok(());
    }

    println!("{:<18} {:<20} FILE / SHEET", "BUILD", "DATE");
    for e in &entries {
        println!(
            "{:<18} {:<20} {} / {}",
            e.build_number, e.date, e.file_name, e.sheet_name
        );
    }

    store.close().await;
    Ok(())
}

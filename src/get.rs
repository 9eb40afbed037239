//! Record detail lookup.
//!
//! Fetches one record by id together with every record from the same
//! (file, sheet) pair, so the detail view can render the anchor row in the
//! context of its whole upload.

use anyhow::Result;

use crate::config::Config;
use crate::models::{to_iso, StoredRecord};
use crate::store::Store;

#[derive(Debug)]
pub struct RecordDetail {
    pub record: StoredRecord,
    /// Every record sharing the anchor's (file, sheet), anchor included.
    pub siblings: Vec<StoredRecord>,
}

/// Returns `None` when the id is unknown.
pub async fn record_detail(store: &Store, id: &str) -> Result<Option<RecordDetail>> {
    let Some(record) = store.get(id).await? else {
        return Ok(None);
    };

    let siblings = store
        .siblings(&record.meta.file_name, &record.meta.sheet_name)
        .await?;

    Ok(Some(RecordDetail { record, siblings }))
}

/// CLI entry point — prints the record and its upload batch.
pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let store = Store::open(config).await?;
    let detail = match record_detail(&store, id).await? {
        Some(d) => d,
        None => {
            store.close().await;
            eprintln!("Error: record not found: {}", id);
            std::process::exit(1);
        }
    };

    println!("--- Record ---");
    println!("id:          {}", detail.record.id);
    println!("file:        {}", detail.record.meta.file_name);
    println!("sheet:       {}", detail.record.meta.sheet_name);
    println!("uploaded_at: {}", to_iso(detail.record.meta.uploaded_at));
    for (field, value) in &detail.record.fields {
        println!("{}: {}", field, value);
    }
    println!();

    println!("--- Batch ({} records) ---", detail.siblings.len());
    for sibling in &detail.siblings {
        let marker = if sibling.id == detail.record.id { "*" } else { " " };
        let line: Vec<String> = sibling
            .fields
            .values()
            .filter(|v| !v.is_empty())
            .cloned()
            .collect();
        println!("{} {}", marker, line.join(" | "));
    }

    store.close().await;
    Ok(())
}

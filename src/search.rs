//! Record search: filter folding, free-text expansion, and execution.

use anyhow::Result;

use crate::config::Config;
use crate::models::{Filter, StoredRecord};
use crate::query;
use crate::store::Store;

/// Runs one search: expands the free-text term over the searchable fields
/// of a sample record, folds the filters, compiles, and scans.
pub async fn search_records(
    store: &Store,
    filters: &[Filter],
    term: Option<&str>,
) -> Result<Vec<StoredRecord>> {
    let term = term.filter(|t| !t.is_empty());

    let searchable = match term {
        Some(_) => store.sample_fields().await?,
        None => Vec::new(),
    };

    let condition = query::build_query(filters, term, &searchable);
    let compiled = query::compile(condition.as_ref())?;
    store.find(&compiled).await
}

/// CLI entry point: prints matches as `id`, batch, and fields.
pub async fn run_search(config: &Config, term: Option<&str>, filters: &[Filter]) -> Result<()> {
    let store = Store::open(config).await?;
    let results = search_records(&store, filters, term).await?;

    if results.is_empty() {
        println!("No results.");
        store.close().await;
        return Ok(());
    }

    for (i, record) in results.iter().enumerate() {
        println!(
            "{}. {} / {} ({})",
            i + 1,
            record.meta.file_name,
            record.meta.sheet_name,
            crate::models::to_iso(record.meta.uploaded_at)
        );
        for (field, value) in &record.fields {
            if !value.is_empty() {
                println!("    {}: {}", field, value);
            }
        }
        println!("    id: {}", record.id);
        println!();
    }

    store.close().await;
    Ok(())
}

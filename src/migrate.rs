use anyhow::Result;

use crate::store::Store;

pub async fn run_migrations(store: &Store) -> Result<()> {
    // Create records table. User columns are stored as a JSON object per
    // record; batch metadata is promoted to real columns so the history and
    // detail paths can query it directly.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            id TEXT PRIMARY KEY,
            file_name TEXT NOT NULL,
            sheet_name TEXT NOT NULL,
            uploaded_at INTEGER NOT NULL,
            fields_json TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(store.pool())
    .await?;

    // Create build history table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS build_history (
            id TEXT PRIMARY KEY,
            build_number TEXT NOT NULL,
            build_date TEXT NOT NULL,
            raw_text TEXT NOT NULL,
            file_name TEXT NOT NULL,
            sheet_name TEXT NOT NULL,
            extracted_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(store.pool())
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_records_file_sheet ON records(file_name, sheet_name)",
    )
    .execute(store.pool())
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_uploaded_at ON records(uploaded_at DESC)")
        .execute(store.pool())
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_build_history_file ON build_history(file_name, extracted_at DESC)",
    )
    .execute(store.pool())
    .await?;

    Ok(())
}

//! Document store client.
//!
//! A thin wrapper over SQLite: records are one row each, with the user
//! columns serialized as a JSON object and the batch metadata promoted to
//! real columns. Searches scan and evaluate the compiled condition in
//! process; result sets are unpaginated by design.

use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use crate::config::Config;
use crate::models::{BuildHistoryEntry, FileSummary, RecordMeta, StoredRecord};
use crate::query::Query;

pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn open(config: &Config) -> Result<Self> {
        let db_path = &config.db.path;

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Inserts records one at a time, deliberately outside a transaction: a
    /// failure part way through leaves earlier rows in place, and only the
    /// aggregate count is reported.
    pub async fn insert_records(&self, records: &[StoredRecord]) -> Result<u64> {
        let mut inserted = 0u64;
        for record in records {
            let fields_json = serde_json::to_string(&record.fields)?;
            sqlx::query(
                r#"
                INSERT INTO records (id, file_name, sheet_name, uploaded_at, fields_json)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.id)
            .bind(&record.meta.file_name)
            .bind(&record.meta.sheet_name)
            .bind(record.meta.uploaded_at)
            .bind(&fields_json)
            .execute(&self.pool)
            .await
            .with_context(|| format!("insert failed after {} records", inserted))?;
            inserted += 1;
        }
        Ok(inserted)
    }

    pub async fn insert_build_history(&self, entries: &[BuildHistoryEntry]) -> Result<u64> {
        let mut inserted = 0u64;
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO build_history (id, build_number, build_date, raw_text, file_name, sheet_name, extracted_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&entry.id)
            .bind(&entry.build_number)
            .bind(&entry.date)
            .bind(&entry.raw_text)
            .bind(&entry.file_name)
            .bind(&entry.sheet_name)
            .bind(entry.extracted_at)
            .execute(&self.pool)
            .await?;
            inserted += 1;
        }
        Ok(inserted)
    }

    /// Scans every record in insertion order and keeps the ones the compiled
    /// query matches.
    pub async fn find(&self, query: &Query) -> Result<Vec<StoredRecord>> {
        let rows = sqlx::query(
            "SELECT id, file_name, sheet_name, uploaded_at, fields_json FROM records ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut results = Vec::new();
        for row in &rows {
            let record = record_from_row(row)?;
            if query.matches(&record) {
                results.push(record);
            }
        }
        Ok(results)
    }

    pub async fn get(&self, id: &str) -> Result<Option<StoredRecord>> {
        let row = sqlx::query(
            "SELECT id, file_name, sheet_name, uploaded_at, fields_json FROM records WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    /// Every record sharing one (file, sheet) pair, in insertion order.
    pub async fn siblings(&self, file_name: &str, sheet_name: &str) -> Result<Vec<StoredRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, file_name, sheet_name, uploaded_at, fields_json
            FROM records WHERE file_name = ? AND sheet_name = ?
            ORDER BY rowid
            "#,
        )
        .bind(file_name)
        .bind(sheet_name)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    pub async fn file_names(&self) -> Result<Vec<String>> {
        let names: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT file_name FROM records ORDER BY file_name")
                .fetch_all(&self.pool)
                .await?;
        Ok(names)
    }

    /// The most recent upload batch for one file.
    pub async fn latest_batch(&self, file_name: &str) -> Result<Option<FileSummary>> {
        let row = sqlx::query(
            r#"
            SELECT file_name, sheet_name, uploaded_at FROM records
            WHERE file_name = ?
            ORDER BY uploaded_at DESC LIMIT 1
            "#,
        )
        .bind(file_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| FileSummary {
            file_name: row.get("file_name"),
            sheet_name: row.get("sheet_name"),
            uploaded_at: row.get("uploaded_at"),
        }))
    }

    /// Build history entries, newest first, optionally scoped to one file.
    pub async fn build_history(&self, file_name: Option<&str>) -> Result<Vec<BuildHistoryEntry>> {
        let rows = match file_name {
            Some(file_name) => {
                sqlx::query(
                    r#"
                    SELECT id, build_number, build_date, raw_text, file_name, sheet_name, extracted_at
                    FROM build_history WHERE file_name = ?
                    ORDER BY extracted_at DESC, rowid DESC
                    "#,
                )
                .bind(file_name)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id, build_number, build_date, raw_text, file_name, sheet_name, extracted_at
                    FROM build_history
                    ORDER BY extracted_at DESC, rowid DESC
                    "#,
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows
            .iter()
            .map(|row| BuildHistoryEntry {
                id: row.get("id"),
                build_number: row.get("build_number"),
                date: row.get("build_date"),
                raw_text: row.get("raw_text"),
                file_name: row.get("file_name"),
                sheet_name: row.get("sheet_name"),
                extracted_at: row.get("extracted_at"),
            })
            .collect())
    }

    /// Field names of an arbitrary sample record, for free-text expansion.
    /// Names with the reserved `_` prefix are excluded.
    pub async fn sample_fields(&self) -> Result<Vec<String>> {
        let row = sqlx::query("SELECT fields_json FROM records ORDER BY rowid LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(Vec::new());
        };
        let fields = decode_fields(&row.get::<String, _>("fields_json"))?;
        Ok(fields
            .into_keys()
            .filter(|k| !k.starts_with('_'))
            .collect())
    }
}

fn decode_fields(fields_json: &str) -> Result<BTreeMap<String, String>> {
    serde_json::from_str(fields_json).context("record has malformed fields")
}

fn record_from_row(row: &SqliteRow) -> Result<StoredRecord> {
    Ok(StoredRecord {
        id: row.get("id"),
        fields: decode_fields(&row.get::<String, _>("fields_json"))?,
        meta: RecordMeta {
            file_name: row.get("file_name"),
            sheet_name: row.get("sheet_name"),
            uploaded_at: row.get("uploaded_at"),
        },
    })
}

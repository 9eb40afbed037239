//! Core data models used throughout Sheetdock.
//!
//! These types represent the rows, build markers, and filters that flow
//! through the upload and search pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Field name carrying the build number on every grouped record.
pub const BUILD_COLUMN: &str = "빌드명";
/// Field name carrying the build date on every grouped record.
pub const DATE_COLUMN: &str = "날짜";

/// Reserved field names a sheet's header row may not use. The first two are
/// written by the normalizer itself; the `_`-prefixed names are claimed by
/// the JSON wire format.
pub const RESERVED_FIELDS: [&str; 4] = [BUILD_COLUMN, DATE_COLUMN, "_meta", "_id"];

/// Upload batch metadata attached to every stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMeta {
    pub file_name: String,
    pub sheet_name: String,
    /// Unix timestamp (seconds); one value per upload batch.
    pub uploaded_at: i64,
}

/// A flat, persisted row. User columns live in `fields`; batch metadata is a
/// typed struct rather than reserved keys mixed into the map, so user column
/// names can never collide with it.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub id: String,
    pub fields: BTreeMap<String, String>,
    pub meta: RecordMeta,
}

impl StoredRecord {
    /// Wire shape: fields at the top level plus the reserved `_id` and
    /// `_meta` keys, matching what table views and detail pages consume.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (k, v) in &self.fields {
            map.insert(k.clone(), serde_json::Value::String(v.clone()));
        }
        map.insert("_id".to_string(), serde_json::Value::String(self.id.clone()));
        map.insert(
            "_meta".to_string(),
            serde_json::json!({
                "fileName": self.meta.file_name,
                "sheetName": self.meta.sheet_name,
                "uploadedAt": to_iso(self.meta.uploaded_at),
            }),
        );
        serde_json::Value::Object(map)
    }
}

/// The most recently seen build marker's parsed fields, applied to
/// subsequent data rows until superseded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContext {
    pub build_number: String,
    pub date: String,
}

/// One entry per recognized build marker row.
#[derive(Debug, Clone)]
pub struct BuildHistoryEntry {
    pub id: String,
    pub build_number: String,
    pub date: String,
    /// The marker row's first cell, verbatim.
    pub raw_text: String,
    pub file_name: String,
    pub sheet_name: String,
    /// Unix timestamp (seconds) of extraction.
    pub extracted_at: i64,
}

impl BuildHistoryEntry {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "buildNumber": self.build_number,
            "date": self.date,
            "rawText": self.raw_text,
            "fileName": self.file_name,
            "sheetName": self.sheet_name,
            "extractedAt": to_iso(self.extracted_at),
        })
    }
}

/// How a filter combines with the condition accumulated from all preceding
/// filters. The first filter's operator is never consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "AND")]
    And,
    #[serde(rename = "OR")]
    Or,
}

/// A single field filter from a search request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub value: String,
    pub operator: FilterOp,
}

/// Per-file upload summary shown in the history view: the most recent
/// batch's sheet and timestamp.
#[derive(Debug, Clone)]
pub struct FileSummary {
    pub file_name: String,
    pub sheet_name: String,
    pub uploaded_at: i64,
}

impl FileSummary {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "fileName": self.file_name,
            "sheetName": self.sheet_name,
            "uploadedAt": to_iso(self.uploaded_at),
        })
    }
}

/// Formats a unix timestamp as ISO-8601 UTC for API responses.
pub fn to_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

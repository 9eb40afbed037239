//! HTTP server.
//!
//! Exposes the upload wizard and search endpoints as a JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/upload` | Read the first sheet as a full table |
//! | `PUT`  | `/upload` | Store already-read rows, selected columns only |
//! | `POST` | `/upload/tabs` | List a workbook's sheet names |
//! | `POST` | `/upload/preview` | First non-blank rows for column selection |
//! | `POST` | `/upload/data` | Build-grouped normalization and insert |
//! | `POST` | `/upload/bulk` | Naive header-row-0 insert |
//! | `POST` | `/search` | Filtered / free-text record search |
//! | `GET`  | `/search/detail` | One record plus its upload batch |
//! | `GET`  | `/history` | Latest upload batch per file |
//! | `GET`  | `/history/builds` | Build markers recognized at upload |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! All error responses share one body shape:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "no file provided" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted; the UI is served from a
//! separate origin on internal networks.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::get::record_detail;
use crate::history;
use crate::ingest;
use crate::migrate;
use crate::models::{to_iso, Filter};
use crate::search::search_records;
use crate::store::Store;
use crate::workbook::{self, WorkbookError};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    store: Arc<Store>,
}

/// Starts the HTTP server.
///
/// Opens the store, runs the (idempotent) migrations, binds to the address
/// configured in `[server].bind`, and serves until the process terminates.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store = Store::open(config).await?;
    migrate::run_migrations(&store).await?;

    let state = AppState {
        config: Arc::new(config.clone()),
        store: Arc::new(store),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/upload", post(handle_upload).put(handle_upload_save))
        .route("/upload/tabs", post(handle_upload_tabs))
        .route("/upload/preview", post(handle_upload_preview))
        .route("/upload/data", post(handle_upload_data))
        .route("/upload/bulk", post(handle_upload_bulk))
        .route("/search", post(handle_search))
        .route("/search/detail", get(handle_search_detail))
        .route("/history", get(handle_history))
        .route("/history/builds", get(handle_history_builds))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(state.config.upload.max_file_bytes))
        .layer(cors)
        .with_state(state);

    let bind_addr = config.server.bind.clone();
    println!("sheetdock listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

/// Inner error detail with a machine-readable code and human-readable message.
#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// Constructs a 400 Bad Request error.
fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

/// Constructs a 404 Not Found error.
fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

/// Constructs a 500 error for store or unexpected failures.
fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

/// Maps pipeline errors to HTTP statuses at the request boundary. Workbook
/// and normalization problems are the client's input (400); everything else
/// is a server fault (500).
fn classify_error(err: anyhow::Error) -> AppError {
    if err.downcast_ref::<WorkbookError>().is_some() {
        return bad_request(format!("{:#}", err));
    }

    let msg = format!("{:#}", err);
    if msg.contains("no rows found")
        || msg.contains("no valid rows")
        || msg.contains("is reserved")
        || msg.contains("has no sheets")
        || msg.contains("invalid pattern")
        || msg.contains("malformed fields")
    {
        bad_request(msg)
    } else {
        tracing::error!(error = %msg, "request failed");
        internal(msg)
    }
}

// ============ Multipart form ============

/// An uploaded workbook plus the request's text fields.
struct UploadForm {
    file_name: String,
    file_bytes: Vec<u8>,
    fields: BTreeMap<String, String>,
}

impl UploadForm {
    /// Reads every multipart part; the `file` part becomes the workbook
    /// bytes and every other part is kept as a text field.
    async fn read(multipart: &mut Multipart) -> Result<UploadForm, AppError> {
        let mut file_name: Option<String> = None;
        let mut file_bytes: Option<Vec<u8>> = None;
        let mut fields = BTreeMap::new();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| bad_request(format!("malformed multipart request: {}", e)))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                file_name = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("failed to read file part: {}", e)))?;
                file_bytes = Some(bytes.to_vec());
            } else {
                let text = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("failed to read field '{}': {}", name, e)))?;
                fields.insert(name, text);
            }
        }

        let file_bytes = file_bytes.ok_or_else(|| bad_request("no file provided"))?;
        Ok(UploadForm {
            file_name: file_name.unwrap_or_else(|| "upload.xlsx".to_string()),
            file_bytes,
            fields,
        })
    }

    fn require(&self, name: &str) -> Result<&str, AppError> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| bad_request(format!("{} is required", name)))
    }

    /// Zero-based start row; absent or unparsable values fall back to 0.
    fn start_row(&self) -> usize {
        self.fields
            .get("startRow")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }
}

// ============ POST /upload, PUT /upload ============

/// Handler for `POST /upload`: reads the first sheet as a full table for
/// the legacy single-sheet wizard.
async fn handle_upload(mut multipart: Multipart) -> Result<Json<serde_json::Value>, AppError> {
    let form = UploadForm::read(&mut multipart).await?;
    let (columns, rows) = ingest::workbook_table(&form.file_bytes).map_err(classify_error)?;

    Ok(Json(serde_json::json!({
        "preview": rows,
        "fullData": rows,
        "columns": columns,
        "totalRows": rows.len(),
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveRequest {
    data: Vec<BTreeMap<String, String>>,
    selected_columns: Vec<String>,
    #[serde(default)]
    file_name: String,
    #[serde(default)]
    sheet_name: String,
}

/// Handler for `PUT /upload`: stores rows the client already read, keeping
/// only the selected columns.
async fn handle_upload_save(
    State(state): State<AppState>,
    Json(req): Json<SaveRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let inserted = ingest::store_selected(
        &state.store,
        &req.data,
        &req.selected_columns,
        &req.file_name,
        &req.sheet_name,
    )
    .await
    .map_err(classify_error)?;

    Ok(Json(serde_json::json!({
        "message": "saved successfully",
        "insertedCount": inserted,
    })))
}

// ============ POST /upload/tabs ============

/// Handler for `POST /upload/tabs`: lists sheet names in workbook order.
async fn handle_upload_tabs(mut multipart: Multipart) -> Result<Json<serde_json::Value>, AppError> {
    let form = UploadForm::read(&mut multipart).await?;
    let sheets = workbook::sheet_names(&form.file_bytes)
        .map_err(|e| classify_error(e.into()))?;

    Ok(Json(serde_json::json!({ "sheets": sheets })))
}

// ============ POST /upload/preview ============

/// Handler for `POST /upload/preview`: the first non-blank rows from the
/// selected start row, for header and column selection.
async fn handle_upload_preview(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, AppError> {
    let form = UploadForm::read(&mut multipart).await?;
    let sheet_name = form.require("sheetName")?;

    let (preview_rows, total_rows) = ingest::preview_rows(
        &form.file_bytes,
        sheet_name,
        form.start_row(),
        state.config.upload.preview_rows,
    )
    .map_err(classify_error)?;

    Ok(Json(serde_json::json!({
        "previewRows": preview_rows,
        "totalRows": total_rows,
    })))
}

// ============ POST /upload/data ============

/// Handler for `POST /upload/data`: the build-grouped normalization path.
async fn handle_upload_data(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, AppError> {
    let form = UploadForm::read(&mut multipart).await?;
    let sheet_name = form.require("sheetName")?.to_string();
    let columns: Vec<String> = serde_json::from_str(form.require("columns")?)
        .map_err(|e| bad_request(format!("columns must be a JSON array: {}", e)))?;

    let outcome = ingest::ingest_grouped(
        &state.store,
        &form.file_bytes,
        &form.file_name,
        &sheet_name,
        form.start_row(),
        &columns,
    )
    .await
    .map_err(classify_error)?;

    Ok(Json(serde_json::json!({
        "message": "saved successfully",
        "insertedCount": outcome.inserted,
    })))
}

// ============ POST /upload/bulk ============

/// Handler for `POST /upload/bulk`: naive header-row-0 insert.
async fn handle_upload_bulk(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, AppError> {
    let form = UploadForm::read(&mut multipart).await?;
    let sheet_name = form.require("sheetName")?.to_string();

    let outcome = ingest::ingest_bulk(
        &state.store,
        &form.file_bytes,
        &form.file_name,
        &sheet_name,
    )
    .await
    .map_err(classify_error)?;

    Ok(Json(serde_json::json!({
        "message": "saved successfully",
        "insertedCount": outcome.inserted,
    })))
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    #[serde(default)]
    filters: Vec<Filter>,
    #[serde(default, rename = "dbSearch")]
    db_search: Option<String>,
}

/// Handler for `POST /search`: folds the filters, expands the free-text
/// term, and returns every matching record.
async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let results = search_records(&state.store, &req.filters, req.db_search.as_deref())
        .await
        .map_err(classify_error)?;

    let results: Vec<serde_json::Value> = results.iter().map(|r| r.to_json()).collect();
    Ok(Json(serde_json::json!({ "results": results })))
}

// ============ GET /search/detail ============

#[derive(Deserialize)]
struct DetailParams {
    id: Option<String>,
}

/// Handler for `GET /search/detail?id=…`: the record plus its upload batch.
async fn handle_search_detail(
    State(state): State<AppState>,
    Query(params): Query<DetailParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = params
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| bad_request("id is required"))?;

    let detail = record_detail(&state.store, &id)
        .await
        .map_err(classify_error)?
        .ok_or_else(|| not_found(format!("record not found: {}", id)))?;

    let rows: Vec<serde_json::Value> = detail.siblings.iter().map(|r| r.to_json()).collect();
    Ok(Json(serde_json::json!({
        "detail": detail.record.to_json(),
        "tableData": {
            "fileName": detail.record.meta.file_name,
            "sheetName": detail.record.meta.sheet_name,
            "uploadedAt": to_iso(detail.record.meta.uploaded_at),
            "rows": rows,
        },
    })))
}

// ============ GET /history ============

/// Handler for `GET /history`: latest upload batch per file, newest first.
async fn handle_history(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let summaries = history::file_summaries(&state.store)
        .await
        .map_err(classify_error)?;

    let files: Vec<serde_json::Value> = summaries.iter().map(|s| s.to_json()).collect();
    Ok(Json(serde_json::json!({ "files": files })))
}

// ============ GET /history/builds ============

#[derive(Deserialize)]
struct BuildParams {
    #[serde(rename = "fileName")]
    file_name: Option<String>,
}

/// Handler for `GET /history/builds`: build markers recognized at upload,
/// newest first, optionally scoped to one file.
async fn handle_history_builds(
    State(state): State<AppState>,
    Query(params): Query<BuildParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let entries = history::build_entries(&state.store, params.file_name.as_deref())
        .await
        .map_err(classify_error)?;

    let builds: Vec<serde_json::Value> = entries.iter().map(|e| e.to_json()).collect();
    Ok(Json(serde_json::json!({ "builds": builds })))
}

// ============ GET /health ============

/// JSON response body for `GET /health`.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Handler for `GET /health`.
async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

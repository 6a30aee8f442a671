//! HTTP routes of the record server.
//!
//! # Endpoints
//!
//! - `GET /health`: health check
//! - `GET /workspaces/{workspace}/tables/{table}/records`: list records
//! - `POST /workspaces/{workspace}/tables/{table}/records`: insert a record
//! - `PATCH /workspaces/{workspace}/tables/{table}/records/{id}`: merge fields into a record
//! - `DELETE /workspaces/{workspace}/tables/{table}/records/{id}`: delete a record

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;

use super::storage::{Record, RecordStore, RecordStoreError};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub records: RecordStore,
}

impl AppState {
    pub fn new(records: RecordStore) -> Self {
        Self { records }
    }
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/workspaces/{workspace}/tables/{table}/records",
            get(list_records).post(insert_record),
        )
        .route(
            "/workspaces/{workspace}/tables/{table}/records/{id}",
            patch(update_record).delete(delete_record),
        )
        .with_state(state)
}

/// Error response body
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

fn error_response(status: StatusCode, error: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error,
            message: message.into(),
        }),
    )
        .into_response()
}

impl IntoResponse for RecordStoreError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            RecordStoreError::InvalidWorkspace(_) => (StatusCode::BAD_REQUEST, "invalid_workspace"),
            RecordStoreError::InvalidTable(_) => (StatusCode::BAD_REQUEST, "invalid_table"),
            RecordStoreError::InvalidRecord(_) => (StatusCode::BAD_REQUEST, "invalid_record"),
            RecordStoreError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            RecordStoreError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            RecordStoreError::Corrupt(_) | RecordStoreError::Database(_) => {
                tracing::error!("Record storage failed: {}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_error")
            }
        };
        error_response(status, code, self.to_string())
    }
}

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn into_record(body: Value) -> Result<Record, RecordStoreError> {
    match body {
        Value::Object(map) => Ok(map),
        other => Err(RecordStoreError::InvalidRecord(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

async fn list_records(
    State(state): State<AppState>,
    Path((workspace, table)): Path<(String, String)>,
) -> Result<Json<Vec<Record>>, RecordStoreError> {
    let records = state.records.list(&workspace, &table).await?;
    Ok(Json(records))
}

async fn insert_record(
    State(state): State<AppState>,
    Path((workspace, table)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Record>), RecordStoreError> {
    let record = state
        .records
        .insert(&workspace, &table, into_record(body)?)
        .await?;
    tracing::debug!(
        "Inserted {}/{}/{}",
        workspace,
        table,
        record.get("id").unwrap_or(&serde_json::Value::Null)
    );
    Ok((StatusCode::CREATED, Json(record)))
}

async fn update_record(
    State(state): State<AppState>,
    Path((workspace, table, id)): Path<(String, String, String)>,
    Json(body): Json<Value>,
) -> Result<Json<Record>, RecordStoreError> {
    let record = state
        .records
        .update(&workspace, &table, &id, into_record(body)?)
        .await?;
    Ok(Json(record))
}

async fn delete_record(
    State(state): State<AppState>,
    Path((workspace, table, id)): Path<(String, String, String)>,
) -> Result<StatusCode, RecordStoreError> {
    state.records.delete(&workspace, &table, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

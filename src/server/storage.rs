//! Server-side record storage.
//!
//! Every table of every workspace lives in a single SQLite table:
//! ```text
//! records(workspace, table_name, id, data, created_at, updated_at)
//! ```
//! `data` is the record as a JSON object and always carries its `id`.

use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

/// A stored record.
pub type Record = Map<String, Value>;

/// Field holding the record identifier.
pub const ID_FIELD: &str = "id";

/// Client-generated identifiers with this prefix are replaced on insert.
pub const PROVISIONAL_PREFIX: &str = "temp-";

/// Errors that can occur during record storage operations.
#[derive(Debug)]
pub enum RecordStoreError {
    /// Invalid workspace (e.g., contains path separators).
    InvalidWorkspace(String),
    /// Invalid table name.
    InvalidTable(String),
    /// The request body is not a usable record.
    InvalidRecord(String),
    /// No record with this id.
    NotFound(String),
    /// A record with this id already exists.
    Conflict(String),
    /// Stored data could not be decoded.
    Corrupt(serde_json::Error),
    Database(sqlx::Error),
}

impl std::fmt::Display for RecordStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordStoreError::InvalidWorkspace(ws) => write!(f, "Invalid workspace: {}", ws),
            RecordStoreError::InvalidTable(t) => write!(f, "Invalid table name: {}", t),
            RecordStoreError::InvalidRecord(msg) => write!(f, "Invalid record: {}", msg),
            RecordStoreError::NotFound(id) => write!(f, "Record {} not found", id),
            RecordStoreError::Conflict(id) => write!(f, "Record {} already exists", id),
            RecordStoreError::Corrupt(e) => write!(f, "Stored record is corrupt: {}", e),
            RecordStoreError::Database(e) => write!(f, "Database error: {}", e),
        }
    }
}

impl std::error::Error for RecordStoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RecordStoreError::Corrupt(e) => Some(e),
            RecordStoreError::Database(e) => Some(e),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for RecordStoreError {
    fn from(e: sqlx::Error) -> Self {
        RecordStoreError::Database(e)
    }
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    data: String,
}

/// SQLite-backed record storage.
#[derive(Debug, Clone)]
pub struct RecordStore {
    pool: SqlitePool,
}

impl RecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (or creates) `records.db` in `data_dir` and runs migrations.
    pub async fn open(data_dir: &Path) -> Result<Self, RecordStoreError> {
        std::fs::create_dir_all(data_dir).map_err(sqlx::Error::Io)?;
        let db_url = format!("sqlite:{}?mode=rwc", data_dir.join("records.db").display());
        let options = SqliteConnectOptions::from_str(&db_url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| RecordStoreError::Database(e.into()))?;

        Ok(Self::new(pool))
    }

    /// Validates a workspace to keep it usable as a path segment.
    fn validate_workspace(workspace: &str) -> Result<(), RecordStoreError> {
        if workspace.is_empty()
            || workspace.contains('/')
            || workspace.contains('\\')
            || workspace.contains("..")
            || workspace.starts_with('.')
        {
            return Err(RecordStoreError::InvalidWorkspace(workspace.to_string()));
        }
        Ok(())
    }

    fn validate_table(table: &str) -> Result<(), RecordStoreError> {
        let valid = !table.is_empty()
            && table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(RecordStoreError::InvalidTable(table.to_string()));
        }
        Ok(())
    }

    fn validate_scope(workspace: &str, table: &str) -> Result<(), RecordStoreError> {
        Self::validate_workspace(workspace)?;
        Self::validate_table(table)
    }

    /// Lists the records of a table in insertion order.
    pub async fn list(&self, workspace: &str, table: &str) -> Result<Vec<Record>, RecordStoreError> {
        Self::validate_scope(workspace, table)?;

        let rows: Vec<RecordRow> = sqlx::query_as(
            "SELECT data FROM records WHERE workspace = ? AND table_name = ? ORDER BY created_at, rowid",
        )
        .bind(workspace)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| decode(&row.data)).collect()
    }

    /// Returns a record by id.
    pub async fn get(
        &self,
        workspace: &str,
        table: &str,
        id: &str,
    ) -> Result<Option<Record>, RecordStoreError> {
        Self::validate_scope(workspace, table)?;

        let row: Option<RecordRow> = sqlx::query_as(
            "SELECT data FROM records WHERE workspace = ? AND table_name = ? AND id = ?",
        )
        .bind(workspace)
        .bind(table)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| decode(&row.data)).transpose()
    }

    /// Stores a new record.
    ///
    /// A missing, blank or provisional id is replaced with a new UUID; any
    /// other id is kept.
    pub async fn insert(
        &self,
        workspace: &str,
        table: &str,
        record: Record,
    ) -> Result<Record, RecordStoreError> {
        Self::validate_scope(workspace, table)?;

        let id = match record.get(ID_FIELD) {
            None | Some(Value::Null) => Uuid::new_v4().to_string(),
            Some(Value::String(s)) if s.is_empty() || s.starts_with(PROVISIONAL_PREFIX) => {
                Uuid::new_v4().to_string()
            }
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => {
                return Err(RecordStoreError::InvalidRecord(format!(
                    "'{}' must be a string or number, got {}",
                    ID_FIELD, other
                )))
            }
        };

        let mut record = record;
        record.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        let data = encode(&record)?;
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            INSERT INTO records (workspace, table_name, id, data, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(workspace, table_name, id) DO NOTHING
            "#,
        )
        .bind(workspace)
        .bind(table)
        .bind(&id)
        .bind(&data)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RecordStoreError::Conflict(id));
        }
        Ok(record)
    }

    /// Merges `patch` into an existing record and returns the result.
    pub async fn update(
        &self,
        workspace: &str,
        table: &str,
        id: &str,
        patch: Record,
    ) -> Result<Record, RecordStoreError> {
        Self::validate_scope(workspace, table)?;
        if let Some(value) = patch.get(ID_FIELD) {
            if value.as_str() != Some(id) {
                return Err(RecordStoreError::InvalidRecord(format!(
                    "'{}' cannot be changed",
                    ID_FIELD
                )));
            }
        }

        let mut tx = self.pool.begin().await?;

        let row: Option<RecordRow> = sqlx::query_as(
            "SELECT data FROM records WHERE workspace = ? AND table_name = ? AND id = ?",
        )
        .bind(workspace)
        .bind(table)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let mut record = match row {
            Some(row) => decode(&row.data)?,
            None => return Err(RecordStoreError::NotFound(id.to_string())),
        };

        for (key, value) in patch {
            record.insert(key, value);
        }
        let data = encode(&record)?;

        sqlx::query(
            "UPDATE records SET data = ?, updated_at = ? WHERE workspace = ? AND table_name = ? AND id = ?",
        )
        .bind(&data)
        .bind(Utc::now().to_rfc3339())
        .bind(workspace)
        .bind(table)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(record)
    }

    /// Deletes a record.
    pub async fn delete(&self, workspace: &str, table: &str, id: &str) -> Result<(), RecordStoreError> {
        Self::validate_scope(workspace, table)?;

        let result = sqlx::query("DELETE FROM records WHERE workspace = ? AND table_name = ? AND id = ?")
            .bind(workspace)
            .bind(table)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RecordStoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

fn decode(data: &str) -> Result<Record, RecordStoreError> {
    serde_json::from_str(data).map_err(RecordStoreError::Corrupt)
}

fn encode(record: &Record) -> Result<String, RecordStoreError> {
    serde_json::to_string(record).map_err(RecordStoreError::Corrupt)
}

//! Records, identifiers and queued mutations.
//!
//! Business records are opaque JSON objects. The engine only looks at the
//! identifier field of a record; everything else is carried through untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::context::WorkspaceId;

/// Prefix of identifiers generated locally before the remote store assigns one.
pub const PROVISIONAL_PREFIX: &str = "temp-";

/// Field holding the identifier when a table does not register another one.
pub const DEFAULT_ID_FIELD: &str = "id";

/// A record as seen by screens: a JSON object of arbitrary shape.
pub type Record = Map<String, Value>;

/// Identifier of a record within a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh provisional identifier (`temp-<uuid>`).
    pub fn provisional() -> Self {
        Self(format!("{}{}", PROVISIONAL_PREFIX, Uuid::new_v4()))
    }

    pub fn is_provisional(&self) -> bool {
        self.0.starts_with(PROVISIONAL_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reads the identifier stored under `id_field`.
    ///
    /// Numeric identifiers are accepted and kept in their textual form.
    pub fn from_record(record: &Record, id_field: &str) -> Option<Self> {
        match record.get(id_field)? {
            Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }

    /// Writes this identifier into `record` under `id_field`.
    pub fn write_into(&self, record: &mut Record, id_field: &str) {
        record.insert(id_field.to_string(), Value::String(self.0.clone()));
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&RecordId> for RecordId {
    fn from(id: &RecordId) -> Self {
        id.clone()
    }
}

/// Kind of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Insert => write!(f, "INSERT"),
            Action::Update => write!(f, "UPDATE"),
            Action::Delete => write!(f, "DELETE"),
        }
    }
}

/// What a mutation does. The action is implied by the variant.
///
/// Stored as `{"action": "INSERT", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "UPPERCASE")]
pub enum MutationPayload {
    /// Create a record. `record` already carries `id` under the table's id field.
    Insert { id: RecordId, record: Record },
    /// Merge `patch` into an existing record.
    Update { id: RecordId, patch: Record },
    /// Remove a record.
    Delete { id: RecordId },
}

impl MutationPayload {
    pub fn action(&self) -> Action {
        match self {
            MutationPayload::Insert { .. } => Action::Insert,
            MutationPayload::Update { .. } => Action::Update,
            MutationPayload::Delete { .. } => Action::Delete,
        }
    }

    /// Identifier of the record this mutation targets.
    pub fn record_id(&self) -> &RecordId {
        match self {
            MutationPayload::Insert { id, .. }
            | MutationPayload::Update { id, .. }
            | MutationPayload::Delete { id } => id,
        }
    }

    /// Replaces every reference to `from` with `to`. Returns true if anything changed.
    pub(crate) fn rename_record(
        &mut self,
        id_field: &str,
        from: &RecordId,
        to: &RecordId,
    ) -> bool {
        match self {
            MutationPayload::Insert { id, record } if *id == *from => {
                *id = to.clone();
                to.write_into(record, id_field);
                true
            }
            MutationPayload::Update { id, .. } | MutationPayload::Delete { id }
                if *id == *from =>
            {
                *id = to.clone();
                true
            }
            _ => false,
        }
    }
}

/// One pending operation in the mutation queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRecord {
    /// Assigned at enqueue time; stable across restarts.
    pub id: Uuid,
    pub workspace: WorkspaceId,
    pub table: String,
    /// Field of the target record that holds its identifier.
    #[serde(default = "default_id_field")]
    pub id_field: String,
    #[serde(flatten)]
    pub payload: MutationPayload,
    /// Diagnostics only; never used for expiry.
    pub enqueued_at: DateTime<Utc>,
    /// Replay attempts already made.
    #[serde(default)]
    pub attempts: u32,
    /// Earliest time the next replay may happen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
}

fn default_id_field() -> String {
    DEFAULT_ID_FIELD.to_string()
}

impl MutationRecord {
    pub fn new(
        workspace: WorkspaceId,
        table: impl Into<String>,
        id_field: impl Into<String>,
        payload: MutationPayload,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace,
            table: table.into(),
            id_field: id_field.into(),
            payload,
            enqueued_at: Utc::now(),
            attempts: 0,
            not_before: None,
        }
    }

    pub fn action(&self) -> Action {
        self.payload.action()
    }

    pub fn record_id(&self) -> &RecordId {
        self.payload.record_id()
    }

    /// Returns true if this mutation targets `id` in `workspace`/`table`.
    pub fn targets(&self, workspace: &WorkspaceId, table: &str, id: &RecordId) -> bool {
        &self.workspace == workspace && self.table == table && self.record_id() == id
    }
}

impl fmt::Display for MutationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}/{}",
            self.action(),
            self.table,
            self.workspace,
            self.record_id()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_provisional_ids() {
        let id = RecordId::provisional();
        assert!(id.is_provisional());
        assert!(id.as_str().starts_with("temp-"));
        assert_ne!(id, RecordId::provisional());
        assert!(!RecordId::new("42").is_provisional());
    }

    #[test]
    fn test_id_from_record() {
        let r = record(json!({"id": "abc", "litros": 50}));
        assert_eq!(RecordId::from_record(&r, "id"), Some(RecordId::new("abc")));

        let r = record(json!({"codigo": 7}));
        assert_eq!(RecordId::from_record(&r, "codigo"), Some(RecordId::new("7")));

        let r = record(json!({"id": ""}));
        assert_eq!(RecordId::from_record(&r, "id"), None);

        let r = record(json!({"litros": 50}));
        assert_eq!(RecordId::from_record(&r, "id"), None);
    }

    #[test]
    fn test_mutation_persisted_layout() {
        let ws = WorkspaceId::new("fazenda-1");
        let insert = MutationRecord::new(
            ws,
            "abastecimentos",
            "id",
            MutationPayload::Insert {
                id: RecordId::new("temp-1"),
                record: record(json!({"id": "temp-1", "litros": 50})),
            },
        );

        let value = serde_json::to_value(&insert).unwrap();
        assert_eq!(value["action"], "INSERT");
        assert_eq!(value["table"], "abastecimentos");
        assert_eq!(value["workspace"], "fazenda-1");
        assert_eq!(value["payload"]["record"]["litros"], 50);
        assert!(value.get("not_before").is_none());

        let parsed: MutationRecord = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, insert);
        assert_eq!(parsed.action(), Action::Insert);
    }

    #[test]
    fn test_mutation_missing_optional_fields_defaults() {
        let value = json!({
            "id": "1b4e28ba-2fa1-11d2-883f-0016d3cca427",
            "workspace": "fazenda-1",
            "table": "talhoes",
            "action": "DELETE",
            "payload": {"id": "99"},
            "enqueued_at": "2026-01-10T12:00:00Z"
        });
        let parsed: MutationRecord = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.action(), Action::Delete);
        assert_eq!(parsed.id_field, "id");
        assert_eq!(parsed.attempts, 0);
        assert_eq!(parsed.record_id(), &RecordId::new("99"));
    }

    #[test]
    fn test_rename_record_rewrites_matching_payloads() {
        let from = RecordId::new("temp-1");
        let to = RecordId::new("500");

        let mut insert = MutationPayload::Insert {
            id: from.clone(),
            record: record(json!({"id": "temp-1", "litros": 50})),
        };
        assert!(insert.rename_record("id", &from, &to));
        match &insert {
            MutationPayload::Insert { id, record } => {
                assert_eq!(id, &to);
                assert_eq!(record["id"], "500");
            }
            other => panic!("unexpected payload {:?}", other),
        }

        let mut update = MutationPayload::Update {
            id: from.clone(),
            patch: Record::new(),
        };
        assert!(update.rename_record("id", &from, &to));
        assert_eq!(update.record_id(), &to);

        let mut unrelated = MutationPayload::Delete {
            id: RecordId::new("other"),
        };
        assert!(!unrelated.rename_record("id", &from, &to));
    }

    #[test]
    fn test_action_display() {
        assert_eq!(Action::Insert.to_string(), "INSERT");
        assert_eq!(Action::Update.to_string(), "UPDATE");
        assert_eq!(Action::Delete.to_string(), "DELETE");
    }
}

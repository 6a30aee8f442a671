//! Table registry.
//!
//! Maps table names to the little the engine needs to know about them: which
//! field holds the identifier and which fields a new record must carry.
//! Typed callers can describe a table with the [`Table`] trait instead.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;

use crate::error::EngineError;
use crate::record::{Record, RecordId, DEFAULT_ID_FIELD};

/// A table whose records have a fixed Rust type.
pub trait Table: Serialize + DeserializeOwned {
    /// Name of the table in the remote store.
    const NAME: &'static str;

    /// Field holding the record identifier.
    const ID_FIELD: &'static str = DEFAULT_ID_FIELD;

    /// Fields every inserted record must carry.
    fn required_fields() -> &'static [&'static str] {
        &[]
    }

    fn schema() -> TableSchema {
        let mut schema = TableSchema::new(Self::NAME).with_id_field(Self::ID_FIELD);
        for field in Self::required_fields() {
            schema = schema.require(*field);
        }
        schema
    }
}

/// Shape constraints for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub id_field: String,
    pub required_fields: Vec<String>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id_field: DEFAULT_ID_FIELD.to_string(),
            required_fields: Vec::new(),
        }
    }

    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    pub fn require(mut self, field: impl Into<String>) -> Self {
        self.required_fields.push(field.into());
        self
    }
}

/// Registry of known tables.
///
/// A permissive registry (the default) accepts any table name and treats
/// records as opaque. A strict registry rejects tables it does not know.
#[derive(Debug, Clone, Default)]
pub struct TableRegistry {
    tables: HashMap<String, TableSchema>,
    strict: bool,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict() -> Self {
        Self {
            tables: HashMap::new(),
            strict: true,
        }
    }

    pub fn register(mut self, schema: TableSchema) -> Self {
        self.tables.insert(schema.name.clone(), schema);
        self
    }

    pub fn register_table<T: Table>(self) -> Self {
        self.register(T::schema())
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Returns the schema for `table`.
    pub fn schema(&self, table: &str) -> Result<TableSchema, EngineError> {
        validate_table_name(table)?;
        match self.tables.get(table) {
            Some(schema) => Ok(schema.clone()),
            None if self.strict => Err(EngineError::UnknownTable(table.to_string())),
            None => Ok(TableSchema::new(table)),
        }
    }

    /// Checks a record about to be inserted.
    pub fn check_insert(&self, table: &str, record: &Record) -> Result<TableSchema, EngineError> {
        let schema = self.schema(table)?;
        if let Some(value) = record.get(&schema.id_field) {
            let blank = value.is_null() || value.as_str() == Some("");
            if RecordId::from_record(record, &schema.id_field).is_none() && !blank {
                return Err(EngineError::invalid_payload(
                    table,
                    format!("field '{}' must be a string or number", schema.id_field),
                ));
            }
        }
        let missing: Vec<&str> = schema
            .required_fields
            .iter()
            .filter(|field| record.get(field.as_str()).map_or(true, |v| v.is_null()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::invalid_payload(
                table,
                format!("missing required field(s): {}", missing.join(", ")),
            ));
        }
        Ok(schema)
    }

    /// Checks a patch about to be applied to the record `id`.
    pub fn check_patch(
        &self,
        table: &str,
        id: &RecordId,
        patch: &Record,
    ) -> Result<TableSchema, EngineError> {
        let schema = self.schema(table)?;
        if patch.contains_key(&schema.id_field)
            && RecordId::from_record(patch, &schema.id_field).as_ref() != Some(id)
        {
            return Err(EngineError::invalid_payload(
                table,
                format!("field '{}' cannot be changed by an update", schema.id_field),
            ));
        }
        for field in &schema.required_fields {
            if patch.get(field).is_some_and(|v| v.is_null()) {
                return Err(EngineError::invalid_payload(
                    table,
                    format!("required field '{}' cannot be cleared", field),
                ));
            }
        }
        Ok(schema)
    }
}

/// Table names end up in storage keys and URL paths.
fn validate_table_name(table: &str) -> Result<(), EngineError> {
    let valid = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(EngineError::UnknownTable(table.to_string()))
    }
}

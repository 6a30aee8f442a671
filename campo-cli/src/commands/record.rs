//! Record commands: save, update, delete and fetch.

use campo_core::record::DEFAULT_ID_FIELD;
use campo_core::{EngineError, Record, SyncRepository, WriteOutcome};
use clap::Args;
use serde_json::Value;

use super::OutputFormat;

/// Fields given on the command line, as `--json` and/or `--set` pairs.
#[derive(Debug, Args)]
pub struct FieldArgs {
    /// Record fields as a JSON object
    #[arg(long)]
    json: Option<String>,

    /// Set a field (key=value). Values are parsed as JSON when possible.
    #[arg(long = "set", short = 's', value_name = "KEY=VALUE")]
    set: Vec<String>,
}

impl FieldArgs {
    /// Builds the record: `--json` first, then each `--set` on top.
    pub fn to_record(&self) -> Result<Record, RecordCommandError> {
        let mut record = match &self.json {
            Some(text) => match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    return Err(RecordCommandError::InvalidInput(
                        "--json must be a JSON object".to_string(),
                    ))
                }
                Err(e) => {
                    return Err(RecordCommandError::InvalidInput(format!(
                        "--json is not valid JSON: {}",
                        e
                    )))
                }
            },
            None => Record::new(),
        };
        for pair in &self.set {
            let (key, value) = parse_assignment(pair)?;
            record.insert(key, value);
        }
        Ok(record)
    }
}

/// Parses `key=value`. The value is JSON if it parses as JSON, else a string.
pub fn parse_assignment(pair: &str) -> Result<(String, Value), RecordCommandError> {
    let (key, raw) = pair.split_once('=').ok_or_else(|| {
        RecordCommandError::InvalidInput(format!("expected KEY=VALUE, got '{}'", pair))
    })?;
    let key = key.trim();
    if key.is_empty() {
        return Err(RecordCommandError::InvalidInput(format!(
            "missing field name in '{}'",
            pair
        )));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

#[derive(Debug, Args)]
pub struct SaveCommand {
    /// Table name
    table: String,

    #[command(flatten)]
    fields: FieldArgs,
}

impl SaveCommand {
    pub async fn run(&self, repo: &SyncRepository) -> Result<(), RecordCommandError> {
        let record = self.fields.to_record()?;
        let outcome = repo.save(&self.table, record).await?;
        report("Saved", &self.table, &outcome, repo).await;
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct UpdateCommand {
    /// Table name
    table: String,

    /// Record identifier
    id: String,

    #[command(flatten)]
    fields: FieldArgs,
}

impl UpdateCommand {
    pub async fn run(&self, repo: &SyncRepository) -> Result<(), RecordCommandError> {
        let patch = self.fields.to_record()?;
        if patch.is_empty() {
            return Err(RecordCommandError::InvalidInput(
                "nothing to update; use --json or --set".to_string(),
            ));
        }
        let outcome = repo.update(&self.table, self.id.as_str(), patch).await?;
        report("Updated", &self.table, &outcome, repo).await;
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct DeleteCommand {
    /// Table name
    table: String,

    /// Record identifier
    id: String,
}

impl DeleteCommand {
    pub async fn run(&self, repo: &SyncRepository) -> Result<(), RecordCommandError> {
        let outcome = repo.delete(&self.table, self.id.as_str()).await?;
        report("Deleted", &self.table, &outcome, repo).await;
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct FetchCommand {
    /// Table name
    table: String,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl FetchCommand {
    pub async fn run(&self, repo: &SyncRepository) -> Result<(), RecordCommandError> {
        let outcome = repo.fetch(&self.table).await?;
        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&outcome.records)?);
            }
            OutputFormat::Text => {
                let source = if outcome.online { "remote" } else { "local cache" };
                println!(
                    "{} ({} record{}, from {})",
                    self.table,
                    outcome.records.len(),
                    if outcome.records.len() == 1 { "" } else { "s" },
                    source
                );
                for record in &outcome.records {
                    println!("  {}", Value::Object(record.clone()));
                }
            }
        }
        Ok(())
    }
}

/// The identifier of the written record, read from the table's id field.
fn record_label(outcome: &WriteOutcome, id_field: &str) -> Option<String> {
    outcome
        .record
        .as_ref()
        .and_then(|r| r.get(id_field))
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
}

async fn report(verb: &str, table: &str, outcome: &WriteOutcome, repo: &SyncRepository) {
    let id_field = repo
        .id_field(table)
        .unwrap_or_else(|_| DEFAULT_ID_FIELD.to_string());
    let id = record_label(outcome, &id_field);
    let target = match id {
        Some(id) => format!("{} {}", table, id),
        None => table.to_string(),
    };

    if outcome.confirmed {
        println!("{} {} (synced)", verb, target);
    } else {
        let pending = repo.pending_count().await;
        println!(
            "{} {} locally ({}, {} pending)",
            verb,
            target,
            if outcome.online {
                "remote write failed, queued"
            } else {
                "offline, queued"
            },
            pending
        );
    }
}

#[derive(Debug)]
pub enum RecordCommandError {
    InvalidInput(String),
    Engine(EngineError),
    Output(serde_json::Error),
}

impl std::fmt::Display for RecordCommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordCommandError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            RecordCommandError::Engine(e) => write!(f, "{}", e),
            RecordCommandError::Output(e) => write!(f, "Failed to format output: {}", e),
        }
    }
}

impl std::error::Error for RecordCommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RecordCommandError::Engine(e) => Some(e),
            RecordCommandError::Output(e) => Some(e),
            RecordCommandError::InvalidInput(_) => None,
        }
    }
}

impl From<EngineError> for RecordCommandError {
    fn from(e: EngineError) -> Self {
        RecordCommandError::Engine(e)
    }
}

impl From<serde_json::Error> for RecordCommandError {
    fn from(e: serde_json::Error) -> Self {
        RecordCommandError::Output(e)
    }
}

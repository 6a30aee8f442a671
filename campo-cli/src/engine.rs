//! Wiring of the sync engine for CLI commands.

use async_trait::async_trait;
use campo_core::{
    ConnectivityMonitor, EngineError, GatewayError, HttpGateway, Record, RecordId, RemoteGateway,
    SyncRepository, WorkspaceId,
};
use std::sync::Arc;

use crate::config::Config;
use crate::db::{init_db, SqliteStore};

/// Per-invocation options from global CLI flags.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Never contact the remote store.
    pub offline: bool,
    /// Overrides the configured workspace.
    pub workspace: Option<String>,
}

/// Gateway used when no remote store is configured. Always unreachable.
pub struct UnconfiguredGateway;

fn not_configured() -> GatewayError {
    GatewayError::Transient("No sync server configured".to_string())
}

#[async_trait]
impl RemoteGateway for UnconfiguredGateway {
    async fn fetch(&self, _: &WorkspaceId, _: &str) -> Result<Vec<Record>, GatewayError> {
        Err(not_configured())
    }

    async fn insert(&self, _: &WorkspaceId, _: &str, _: &Record) -> Result<Record, GatewayError> {
        Err(not_configured())
    }

    async fn update(
        &self,
        _: &WorkspaceId,
        _: &str,
        _: &RecordId,
        _: &Record,
    ) -> Result<Record, GatewayError> {
        Err(not_configured())
    }

    async fn delete(&self, _: &WorkspaceId, _: &str, _: &RecordId) -> Result<(), GatewayError> {
        Err(not_configured())
    }

    async fn health(&self) -> bool {
        false
    }
}

/// An opened repository plus the pieces commands need alongside it.
pub struct Session {
    pub repo: SyncRepository,
    pub gateway: Arc<dyn RemoteGateway>,
    pub offline: bool,
}

pub fn build_gateway(config: &Config) -> Result<Arc<dyn RemoteGateway>, EngineOpenError> {
    match config.sync.server_url.as_deref() {
        Some(url) if config.sync.is_configured() => {
            let timeout = config.sync.engine_config().request_timeout;
            let gateway = HttpGateway::new(url, timeout)
                .map_err(EngineOpenError::Gateway)?
                .with_api_key(config.sync.api_key.clone());
            Ok(Arc::new(gateway))
        }
        _ => Ok(Arc::new(UnconfiguredGateway)),
    }
}

/// Opens the local database and the sync repository.
///
/// The device counts as online if the remote store answers its health
/// check, unless `--offline` was given.
pub async fn open(config: &Config, options: &OpenOptions) -> Result<Session, EngineOpenError> {
    let pool = init_db(&config.database_path())
        .await
        .map_err(EngineOpenError::Database)?;
    let store = Arc::new(SqliteStore::new(pool));
    let gateway = build_gateway(config)?;

    let online = !options.offline && gateway.health().await;
    tracing::debug!(online, "Initial connectivity");

    let mut builder = SyncRepository::builder(gateway.clone(), store)
        .config(config.sync.engine_config())
        .connectivity(ConnectivityMonitor::new(online));

    let workspace = options
        .workspace
        .clone()
        .or_else(|| config.workspace.value.clone());
    if let Some(ws) = workspace {
        builder = builder.workspace(WorkspaceId::parse(&ws).map_err(EngineOpenError::Engine)?);
    }

    let repo = builder.open().await.map_err(EngineOpenError::Engine)?;
    Ok(Session {
        repo,
        gateway,
        offline: options.offline,
    })
}

#[derive(Debug)]
pub enum EngineOpenError {
    Database(sqlx::Error),
    Gateway(GatewayError),
    Engine(EngineError),
}

impl std::fmt::Display for EngineOpenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineOpenError::Database(e) => write!(f, "Failed to open local database: {}", e),
            EngineOpenError::Gateway(e) => write!(f, "Failed to set up sync client: {}", e),
            EngineOpenError::Engine(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for EngineOpenError {}

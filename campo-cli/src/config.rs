use campo_core::{EngineConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

fn default_drain_interval_secs() -> u64 {
    3
}

fn default_max_attempts() -> u32 {
    1
}

fn default_request_timeout_secs() -> u64 {
    10
}

/// Sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Remote store URL (e.g., "http://localhost:8080")
    pub server_url: Option<String>,
    /// Sent as a bearer token, if set
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Seconds between sync worker ticks
    #[serde(default = "default_drain_interval_secs")]
    pub drain_interval_secs: u64,
    /// Replay attempts before a queued mutation is dropped
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            api_key: None,
            drain_interval_secs: default_drain_interval_secs(),
            max_attempts: default_max_attempts(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl SyncConfig {
    /// Returns true if a remote store is configured
    pub fn is_configured(&self) -> bool {
        self.server_url.as_deref().is_some_and(|url| !url.is_empty())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            drain_interval: Duration::from_secs(self.drain_interval_secs.max(1)),
            request_timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
            retry: RetryPolicy::default().with_max_attempts(self.max_attempts),
            ..EngineConfig::default()
        }
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Directory holding the local database
    pub data_dir: ConfigValue<PathBuf>,
    /// Active workspace (e.g., a farm)
    pub workspace: ConfigValue<Option<String>>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    /// Sync configuration
    pub sync: SyncConfig,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    data_dir: Option<PathBuf>,
    workspace: Option<String>,
    sync: Option<SyncConfig>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut data_dir = ConfigValue::new(Self::default_data_dir(), ConfigSource::Default);
        let mut workspace = ConfigValue::new(None, ConfigSource::Default);
        let mut config_file = None;
        let mut sync = SyncConfig::default();

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(dir) = file_config.data_dir {
                // Resolve relative paths against config file's directory
                let resolved = if dir.is_relative() {
                    path.parent().map(|p| p.join(&dir)).unwrap_or(dir)
                } else {
                    dir
                };
                data_dir = ConfigValue::new(resolved, ConfigSource::File);
            }
            if let Some(ws) = file_config.workspace {
                workspace = ConfigValue::new(Some(ws), ConfigSource::File);
            }
            if let Some(sync_config) = file_config.sync {
                sync = sync_config;
            }
        }

        // Apply environment variable overrides
        if let Ok(dir) = std::env::var("CAMPO_DATA_DIR") {
            data_dir = ConfigValue::new(PathBuf::from(dir), ConfigSource::Environment);
        }
        if let Ok(ws) = std::env::var("CAMPO_WORKSPACE") {
            workspace = ConfigValue::new(Some(ws), ConfigSource::Environment);
        }
        if let Ok(url) = std::env::var("CAMPO_SYNC_URL") {
            sync.server_url = Some(url);
        }
        if let Ok(key) = std::env::var("CAMPO_SYNC_API_KEY") {
            sync.api_key = Some(key);
        }
        if let Ok(secs) = std::env::var("CAMPO_DRAIN_INTERVAL_SECS") {
            sync.drain_interval_secs = secs
                .parse()
                .map_err(|_| ConfigError::InvalidValue("CAMPO_DRAIN_INTERVAL_SECS", secs))?;
        }

        Ok(Self {
            data_dir,
            workspace,
            config_file,
            sync,
        })
    }

    /// Path of the local SQLite database
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.value.join("campo.db")
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/campo/
    /// - macOS: ~/Library/Application Support/campo/
    /// - Windows: %APPDATA%/campo/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("campo")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/campo/
    /// - macOS: ~/Library/Application Support/campo/
    /// - Windows: %APPDATA%/campo/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("campo")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    InvalidValue(&'static str, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidValue(name, value) => {
                write!(f, "Invalid value for {}: '{}'", name, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

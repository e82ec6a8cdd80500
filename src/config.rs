//! Configuration System
//!
//! Layered configuration: built-in defaults, the global config file, an optional explicit file,
//! then `COTSYNC__SECTION__KEY` environment variables. Values the engine needs (ports, paths,
//! intervals) are all decided here; the engine itself never reads the environment.

use crate::error::SyncError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod merge_policy;
mod sources;

pub use sources::global_config_path;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CotSyncConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub sweep: SweepConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Persistent store location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

pub(crate) fn default_store_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "cotsync")
        .map(|dirs| dirs.data_dir().join("store"))
        .unwrap_or_else(|| PathBuf::from(".cotsync/store"))
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Mission server connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host; empty disables the mission API
    #[serde(default)]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// http or https
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// uid this client presents when subscribing
    #[serde(default = "default_client_uid")]
    pub client_uid: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Retries for list/subscribe/detail requests on transport errors and 5xx
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_port() -> u16 {
    8443
}

fn default_scheme() -> String {
    "https".to_string()
}

fn default_client_uid() -> String {
    "cotsync-client".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> usize {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            scheme: default_scheme(),
            client_uid: default_client_uid(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl ServerConfig {
    /// Base URL of the mission server, if one is configured
    pub fn base_url(&self) -> Option<String> {
        if self.host.is_empty() {
            return None;
        }
        Some(format!("{}://{}:{}", self.scheme, self.host, self.port))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Transport ingress settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Upper bound for a retained partial text frame
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: usize,

    /// Datagram listener bind address; unset disables the listener
    #[serde(default = "default_datagram_bind")]
    pub datagram_bind: Option<String>,

    /// Stream server address to connect to; unset disables the stream reader
    #[serde(default)]
    pub stream_addr: Option<String>,
}

pub(crate) fn default_max_buffer_bytes() -> usize {
    1024 * 1024
}

fn default_datagram_bind() -> Option<String> {
    Some("0.0.0.0:6969".to_string())
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_buffer_bytes: default_max_buffer_bytes(),
            datagram_bind: default_datagram_bind(),
            stream_addr: None,
        }
    }
}

/// Staleness sweep settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
}

fn default_sweep_interval_secs() -> u64 {
    15
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl SweepConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Store(String),
    Server(String),
    Ingest(String),
    Sweep(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Store(msg) => write!(f, "Store: {}", msg),
            ValidationError::Server(msg) => write!(f, "Server: {}", msg),
            ValidationError::Ingest(msg) => write!(f, "Ingest: {}", msg),
            ValidationError::Sweep(msg) => write!(f, "Sweep: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl CotSyncConfig {
    /// Validate the entire configuration, collecting every problem
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.store.path.as_os_str().is_empty() {
            errors.push(ValidationError::Store("Store path cannot be empty".to_string()));
        }

        if self.server.scheme != "http" && self.server.scheme != "https" {
            errors.push(ValidationError::Server(format!(
                "Invalid scheme '{}' (must be 'http' or 'https')",
                self.server.scheme
            )));
        }
        if !self.server.host.is_empty() && self.server.port == 0 {
            errors.push(ValidationError::Server("Port cannot be 0".to_string()));
        }
        if self.server.client_uid.is_empty() {
            errors.push(ValidationError::Server("Client uid cannot be empty".to_string()));
        }

        if self.ingest.max_buffer_bytes < 1024 {
            errors.push(ValidationError::Ingest(format!(
                "max_buffer_bytes {} is below the 1024 byte minimum",
                self.ingest.max_buffer_bytes
            )));
        }

        if self.sweep.interval_secs == 0 {
            errors.push(ValidationError::Sweep(
                "interval_secs must be greater than 0".to_string(),
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Loads `CotSyncConfig` from the layered sources
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration: defaults, global file, optional explicit file, environment.
    pub fn load(explicit: Option<&Path>) -> Result<CotSyncConfig, SyncError> {
        let mut builder = merge_policy::builder_with_defaults()?;
        builder = sources::add_global_file(builder)?;
        if let Some(path) = explicit {
            builder = sources::add_explicit_file(builder, path)?;
        }
        builder = sources::add_environment(builder);

        let config: CotSyncConfig = builder.build()?.try_deserialize()?;
        Self::validated(config)
    }

    /// Load configuration from a single file on top of the defaults
    pub fn load_from_file(path: &Path) -> Result<CotSyncConfig, SyncError> {
        let builder = sources::add_explicit_file(merge_policy::builder_with_defaults()?, path)?;
        let config: CotSyncConfig = builder.build()?.try_deserialize()?;
        Self::validated(config)
    }

    fn validated(config: CotSyncConfig) -> Result<CotSyncConfig, SyncError> {
        config.validate().map_err(|errors| {
            let error_msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            SyncError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                error_msgs.join("\n")
            ))
        })?;
        Ok(config)
    }
}

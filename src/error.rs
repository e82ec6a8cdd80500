//! Error types for the cotsync ingestion and reconciliation engine.

use thiserror::Error;

/// Framing errors. Always recovered inside the splitter; surfaced only for logging.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Malformed binary header: {0}")]
    MalformedHeader(String),

    #[error("Text buffer exceeded {limit} bytes; discarded {discarded} bytes")]
    BufferOverflow { limit: usize, discarded: usize },
}

/// Per-frame decode errors
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid value for {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },

    #[error("Truncated or invalid binary message: {0}")]
    Truncated(#[from] prost::DecodeError),

    #[error("Malformed XML: {0}")]
    Xml(String),

    #[error("Frame contains no event element")]
    NotAnEvent,

    #[error("Binary message carries no CoT event")]
    EmptyMessage,
}

impl From<quick_xml::Error> for DecodeError {
    fn from(err: quick_xml::Error) -> Self {
        DecodeError::Xml(err.to_string())
    }
}

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Mission not found: {0}")]
    MissionNotFound(String),

    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Remote and orchestration errors for mission synchronization
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Bad password for mission {0}")]
    BadMissionPassword(String),

    #[error("Server unreachable: {0}")]
    ServerUnreachable(String),

    #[error("Request failed with status {status}: {message}")]
    RemoteStatus { status: u16, message: String },

    #[error("Invalid server response: {0}")]
    InvalidResponse(String),

    #[error("Mission {mission} is {state}, cannot {action}")]
    InvalidState {
        mission: String,
        state: String,
        action: &'static str,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl SyncError {
    /// Whether this failure is actionable by the user (prompt, connectivity).
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            SyncError::BadMissionPassword(_) | SyncError::ServerUnreachable(_)
        )
    }

    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::ServerUnreachable(_) => true,
            SyncError::RemoteStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<config::ConfigError> for SyncError {
    fn from(err: config::ConfigError) -> Self {
        SyncError::ConfigError(err.to_string())
    }
}

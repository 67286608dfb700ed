//! Error types for the offline engine

use std::time::Duration;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Operation failed: {0}")]
    Other(String),
}

impl Error {
    /// Classify this error for retry and reporting decisions.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Store(e) => e.class(),
            Error::Network(e) => e.class(),
            _ => ErrorClass::Terminal,
        }
    }
}

/// How the engine reacts to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retried automatically within policy
    Transient,
    /// Removed and reported, never retried
    Terminal,
    /// Blocks the store until a repair pass completes
    Structural,
    /// Not a failure; the engine pauses (offline)
    Policy,
}

/// Object store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage quota exceeded: write needs {needed} bytes, quota is {quota} bytes")]
    QuotaExceeded { needed: u64, quota: u64 },

    #[error("Schema version mismatch: found {found}, expected {expected}")]
    SchemaVersionMismatch { found: u32, expected: u32 },

    #[error("Storage corrupted: {0}")]
    Corrupted(String),

    #[error("Data needs repair: {0}. Run `stowaway repair`.")]
    NeedsRepair(String),

    #[error("Collection '{collection}' has no index named '{index}'")]
    UnknownIndex {
        collection: &'static str,
        index: String,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage I/O error: {0}")]
    Io(String),

    #[error("Could not determine data directory")]
    NoDataDir,
}

impl StoreError {
    pub fn class(&self) -> ErrorClass {
        match self {
            StoreError::QuotaExceeded { .. } => ErrorClass::Transient,
            StoreError::SchemaVersionMismatch { .. }
            | StoreError::Corrupted(_)
            | StoreError::NeedsRepair(_) => ErrorClass::Structural,
            StoreError::Database(_) | StoreError::Io(_) => ErrorClass::Transient,
            StoreError::UnknownIndex { .. }
            | StoreError::Serialization(_)
            | StoreError::NoDataDir => ErrorClass::Terminal,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref e, _)
                if e.code == rusqlite::ErrorCode::DatabaseCorrupt
                    || e.code == rusqlite::ErrorCode::NotADatabase =>
            {
                StoreError::Corrupted(err.to_string())
            }
            _ => StoreError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Network errors from the fetch and delivery seams
#[derive(Debug, Clone, Error)]
pub enum NetworkError {
    /// The elapsed limit, when the seam that gave up knows it
    #[error("Request timed out{}", .0.map(|d| format!(" after {:?}", d)).unwrap_or_default())]
    Timeout(Option<Duration>),

    #[error("Network unavailable (offline)")]
    Offline,

    #[error("Server responded with HTTP {0}")]
    Status(u16),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl NetworkError {
    pub fn class(&self) -> ErrorClass {
        match self {
            NetworkError::Offline => ErrorClass::Policy,
            NetworkError::InvalidUrl(_) => ErrorClass::Terminal,
            _ => ErrorClass::Transient,
        }
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NetworkError::Timeout(None)
        } else if err.is_connect() {
            NetworkError::Transport("Failed to connect to server".to_string())
        } else {
            NetworkError::Transport(err.to_string())
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to save configuration: {0}")]
    SaveError(String),
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

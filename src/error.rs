// src/error.rs
use std::io;
use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, MetricsError>;

/// Custom Error type for the metricflow library
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Metric not found: {0}")]
    NotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Database error: {message}")]
    Database { message: String, transient: bool },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("TLS error: {0}")]
    Tls(String),
}

impl MetricsError {
    /// Wrap a database failure that is not worth retrying
    pub fn database(message: impl Into<String>) -> Self {
        MetricsError::Database {
            message: message.into(),
            transient: false,
        }
    }

    /// Whether a retry has a chance of succeeding
    pub fn is_transient(&self) -> bool {
        match self {
            MetricsError::Transport(_) | MetricsError::Timeout(_) => true,
            MetricsError::Status { status, .. } => *status == 408 || *status == 503,
            MetricsError::Database { transient, .. } => *transient,
            _ => false,
        }
    }

    /// HTTP status the server answers with when this error reaches a handler
    pub fn status_code(&self) -> u16 {
        match self {
            MetricsError::Validation(_)
            | MetricsError::Integrity(_)
            | MetricsError::Crypto(_)
            | MetricsError::Compression(_)
            | MetricsError::Serialization(_) => 400,
            MetricsError::NotFound(_) => 404,
            _ => 500,
        }
    }
}

//! Error types for SSH Radar

use thiserror::Error;

/// Result type alias for SSH Radar operations
pub type Result<T> = std::result::Result<T, RadarError>;

/// Main error type for SSH Radar
#[derive(Error, Debug)]
pub enum RadarError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("command timed out after {timeout_secs}s: {command}")]
    CommandTimeout { command: String, timeout_secs: u64 },

    #[error("permission denied running: {0}")]
    PermissionDenied(String),

    #[error("configuration error: {0}")]
    Config(String),
}

//! Error types for the AppMap core library.

use std::path::PathBuf;

/// Top-level error enum for the AppMap core library.
#[derive(Debug, thiserror::Error)]
pub enum AppMapError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{} is too large to process ({size} bytes, limit is {limit} bytes)", path.display())]
    FileTooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("Unknown canonicalization algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Diagram error: {0}")]
    Diagram(String),

    #[error("Filter error: {0}")]
    Filter(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppMapError {
    /// Whether a batch driver may skip the offending file and keep going.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, AppMapError::FileTooLarge { .. })
    }
}

pub type AppMapResult<T> = Result<T, AppMapError>;

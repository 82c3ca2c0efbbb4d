// Error handling for the depth pipeline

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DepthError>;

#[derive(Error, Debug)]
pub enum DepthError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Error: file not recognized: {0}")]
    UnrecognizedFile(String),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Unsupported snapshot version: {0}")]
    UnsupportedVersion(i32),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Another operation is already in progress")]
    Busy,

    #[error("{0} cancelled")]
    Cancelled(String),

    #[error("Series not found: {0}")]
    SeriesNotFound(String),

    #[error("Invalid UTF-8 string")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DepthError {
    /// Short text for a log panel.
    pub fn diagnostic(&self) -> String {
        match self {
            DepthError::Io(e) => format!("Cannot access file: {e}"),
            DepthError::Busy => "Another operation is already in progress".to_string(),
            other => other.to_string(),
        }
    }
}

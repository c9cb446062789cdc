//! Error types for recall
//!
//! All modules use `RecallResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for recall operations
pub type RecallResult<T> = Result<T, RecallError>;

/// All errors that can occur in recall
#[derive(Error, Debug)]
pub enum RecallError {
    // Input errors
    #[error("recall: stream content is not supported: {0}")]
    StreamingContent(PathBuf),

    #[error("Transform already flushed; construct a new instance per pass")]
    TransformFinished,

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RecallError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

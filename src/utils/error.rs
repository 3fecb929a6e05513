//! Error types for the matstudio library.
//!
//! Uses thiserror for ergonomic error definitions; binaries wrap these
//! in anyhow at the top level.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for matstudio operations
#[derive(Error, Debug)]
pub enum MatStudioError {
    /// Error talking to the image store or model registry
    #[error("Store error: {0}")]
    Store(String),

    /// Error with dataset operations (decoding, splitting, balancing)
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Error with model operations (init, record load/save)
    #[error("Model error: {0}")]
    Model(String),

    /// Error during a training run
    #[error("Training error: {0}")]
    Training(String),

    /// Error during inference
    #[error("Inference error: {0}")]
    Inference(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown label index handed to the codec
    #[error("Unknown label index: {0}")]
    UnknownIndex(usize),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MongoDB driver error
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
}

/// Convenience Result type for matstudio operations
pub type Result<T> = std::result::Result<T, MatStudioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MatStudioError::Dataset("only 1 class present".to_string());
        assert_eq!(format!("{}", err), "Dataset error: only 1 class present");
    }

    #[test]
    fn test_io_error_conversion() {
        fn fails() -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into())
        }
        assert!(matches!(fails(), Err(MatStudioError::Io(_))));
    }

    #[test]
    fn test_unknown_index_display() {
        let err = MatStudioError::UnknownIndex(7);
        assert!(format!("{}", err).contains('7'));
    }
}

//! Error Handling Module
//!
//! Defines the error type shared by the dataset preparer, the data pipeline,
//! the model loader and the trainer. Uses thiserror for the definitions.

use std::path::PathBuf;

use burn::record::RecorderError;
use thiserror::Error;

/// Main error type for fine-tuning operations
#[derive(Error, Debug)]
pub enum FinetuneError {
    /// Error loading or decoding an image
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Image processing error
    #[error("Image processing error: {0}")]
    Image(String),

    /// Dataset layout or content error
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Malformed line in an annotation or vocabulary file
    #[error("{file}:{line}: {reason}")]
    Annotation {
        file: PathBuf,
        line: usize,
        reason: String,
    },

    /// Checkpoint file error
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Failure inside a burn recorder (model / optimizer state)
    #[error("Record error: {0}")]
    Record(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
}

impl From<serde_json::Error> for FinetuneError {
    fn from(err: serde_json::Error) -> Self {
        FinetuneError::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for FinetuneError {
    fn from(err: image::ImageError) -> Self {
        FinetuneError::Image(err.to_string())
    }
}

impl From<RecorderError> for FinetuneError {
    fn from(err: RecorderError) -> Self {
        FinetuneError::Record(format!("{:?}", err))
    }
}

/// Convenience Result type for fine-tuning operations
pub type Result<T> = std::result::Result<T, FinetuneError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FinetuneError::Dataset("no classes".to_string());
        assert_eq!(format!("{}", err), "Dataset error: no classes");
    }

    #[test]
    fn test_annotation_error_names_line() {
        let err = FinetuneError::Annotation {
            file: PathBuf::from("val/val_annotations.txt"),
            line: 7,
            reason: "expected at least 2 tab-separated fields".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.starts_with("val/val_annotations.txt:7:"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: FinetuneError = io_err.into();
        assert!(matches!(err, FinetuneError::Io(_)));
    }
}

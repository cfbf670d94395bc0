//! Error types for image handling and drift modelling

use thiserror::Error;

/// Errors raised while building images, fitting or scoring drift models
#[derive(Debug, Error)]
pub enum DriftError {
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Cannot score an empty batch")]
    EmptyBatch,

    #[error("Insufficient reference data: {0}")]
    InsufficientData(String),

    #[error("Dimension mismatch: model expects {expected} features, input has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Malformed model artifact: {0}")]
    ModelFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Image decode error: {0}")]
    ImageDecode(String),
}

impl From<image::ImageError> for DriftError {
    fn from(err: image::ImageError) -> Self {
        DriftError::ImageDecode(err.to_string())
    }
}

/// Result type for drift operations
pub type Result<T> = std::result::Result<T, DriftError>;

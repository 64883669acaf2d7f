//! Error types for the Dylan MT-Net model.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Tensor operation failed: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("{branch} attention: feature dimension {features} is not divisible by {heads} heads")]
    HeadMismatch {
        branch: &'static str,
        features: usize,
        heads: usize,
    },

    #[error("Shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Batch normalization in training mode needs more than one sample, got {batch}")]
    BatchTooSmall { batch: usize },

    #[error("Invalid model configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Model loading error: {0}")]
    ModelLoad(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

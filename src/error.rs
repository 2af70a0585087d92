//! Error types for Riesz representer estimation.

use thiserror::Error;

use crate::checkpoint::CheckpointKey;

/// Result type for estimator operations.
pub type RieszResult<T> = Result<T, RieszError>;

/// Errors that can occur during fitting or prediction.
#[derive(Debug, Error)]
pub enum RieszError {
    /// Tensor operation failed
    #[error("Candle error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Prediction requested before any fit completed
    #[error("Estimator has not been fitted - call fit() first")]
    NotFitted,

    /// Requested checkpoint was never saved
    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(CheckpointKey),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Observer callback failed
    #[error("Observer error: {0}")]
    Observer(String),
}

impl RieszError {
    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create an observer error
    pub fn observer(msg: impl Into<String>) -> Self {
        Self::Observer(msg.into())
    }
}

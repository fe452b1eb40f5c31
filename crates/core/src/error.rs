//! Error types for snapshot ensembles.

use thiserror::Error;

/// Every failure a fit, predict or persistence call can surface.
#[derive(Debug, Error)]
pub enum EnsembleError {
    /// Rejected hyper-parameters. Raised before any training step runs.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The ensemble is not in a state that allows the request
    /// (e.g. predicting with no snapshots).
    #[error("State error: {0}")]
    State(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl EnsembleError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    pub fn is_state(&self) -> bool {
        matches!(self, Self::State(_))
    }
}

pub type Result<T> = std::result::Result<T, EnsembleError>;

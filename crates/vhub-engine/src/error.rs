//! Error types for the analysis engine.

use thiserror::Error;
use uuid::Uuid;
use vhub_models::ModelError;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while managing or running classifiers.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unknown classifier type: {0}")]
    UnknownType(String),

    #[error("Classifier not found: {0}")]
    ClassifierNotFound(String),

    #[error("Classifier already registered: {0}")]
    ClassifierExists(String),

    #[error("Failed to initialize classifier {name}: {message}")]
    Initialization { name: String, message: String },

    #[error("Classifier {0} is not initialized")]
    NotInitialized(String),

    #[error("Detection failed in {name}: {message}")]
    DetectionFailed { name: String, message: String },

    #[error("No frame available")]
    NoFrameAvailable,

    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] ModelError),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(Uuid),
}

impl EngineError {
    /// Create an initialization failure error.
    pub fn initialization(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Initialization {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a detection failure error.
    pub fn detection_failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DetectionFailed {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Whether the caller may retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Initialization { .. } | EngineError::NoFrameAvailable
        )
    }
}

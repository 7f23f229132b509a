//! Validation errors for the shared data model.

use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("Invalid bounding box {0:?}: expected x1 < x2 and y1 < y2")]
    InvalidBoundingBox([i32; 4]),

    #[error("At least one classifier must be requested")]
    NoClassifiers,

    #[error("Invalid option {name}: {reason}")]
    InvalidOption { name: &'static str, reason: String },

    #[error("Invalid filter {name}: {reason}")]
    InvalidFilter { name: &'static str, reason: String },
}

impl ModelError {
    pub fn invalid_option(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            name,
            reason: reason.into(),
        }
    }

    pub fn invalid_filter(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidFilter {
            name,
            reason: reason.into(),
        }
    }
}

//! Shared data models for the VisionHub analysis service.
//!
//! This crate provides Serde-serializable types for:
//! - Classifier kinds and detections
//! - Analysis requests, options and filters
//! - Fused analysis results
//! - WebSocket message schemas for the broadcast channel

pub mod classifier;
pub mod detection;
pub mod error;
pub mod options;
pub mod request;
pub mod result;
pub mod ws;

// Re-export common types
pub use classifier::{ClassifierType, ClassifierTypeParseError};
pub use detection::{Detection, Position3D};
pub use error::{ModelError, ModelResult};
pub use options::{AnalysisOptions, DetectionFilters};
pub use request::AnalysisRequest;
pub use result::{AnalysisResult, PipelineInfo};
pub use ws::{AckMessage, ClientMessage, ErrorMessage, PushMessage, ServerMessage, Subscription};

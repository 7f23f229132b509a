//! Real-time vision analysis engine.
//!
//! This crate provides:
//! - A registry of named classifiers backed by shared, lazily loaded models
//! - A short-TTL result cache keyed by a sparse frame fingerprint
//! - A concurrent analysis pipeline with depth, 3D projection and filtering
//! - Subscription-filtered broadcasting of results to live connections
//!
//! Everything is owned by an [`AnalysisContext`] created at startup.

pub mod broadcast;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod context;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod registry;

#[cfg(feature = "stub-backend")]
pub mod backends;

pub use broadcast::{BroadcastConfig, BroadcastManager, BroadcastStats, ConnectionId};
pub use cache::{CacheConfig, CacheStats, ResultCache};
pub use classifier::{Classifier, ClassifierConfig, ClassifierInfo, ClassifierStats};
pub use config::EngineConfig;
pub use context::AnalysisContext;
pub use error::{EngineError, EngineResult};
pub use frame::{DepthImage, Frame, FrameSource, Intrinsics, LatestFrameSlot};
pub use model::{Model, ModelLoader, ModelSpec, RawDetection, SharedModelManager};
pub use pipeline::{PipelineConfig, PipelineStats, ProcessingPipeline};
pub use registry::{ClassifierRegistry, RegistryStats, BUILTIN_CLASSIFIERS};

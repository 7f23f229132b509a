//! In-process model and camera backends.

pub mod stub;

pub use stub::{StubModel, StubModelLoader, SyntheticFrameSource};

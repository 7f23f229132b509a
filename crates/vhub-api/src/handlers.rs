//! Request handlers.

pub mod analysis;
pub mod cache;
pub mod classifiers;
pub mod health;

pub use analysis::*;
pub use cache::*;
pub use classifiers::*;
pub use health::*;

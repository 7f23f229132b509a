//! Camera frames and the sources that provide them.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use image::{ImageBuffer, Luma, RgbImage};

/// Depth buffer in millimeters, aligned with the color image.
pub type DepthImage = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Pinhole camera intrinsics of the color stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub ppx: f64,
    pub ppy: f64,
}

impl Intrinsics {
    pub fn new(fx: f64, fy: f64, ppx: f64, ppy: f64) -> Self {
        Self { fx, fy, ppx, ppy }
    }

    /// Focal lengths of zero make projection undefined.
    pub fn is_usable(&self) -> bool {
        self.fx != 0.0 && self.fy != 0.0
    }
}

/// One captured frame: color, optional aligned depth, optional intrinsics.
#[derive(Debug, Clone)]
pub struct Frame {
    pub frame_id: u64,
    pub timestamp: DateTime<Utc>,
    pub color: RgbImage,
    pub depth: Option<DepthImage>,
    pub intrinsics: Option<Intrinsics>,
}

impl Frame {
    pub fn new(frame_id: u64, color: RgbImage) -> Self {
        Self {
            frame_id,
            timestamp: Utc::now(),
            color,
            depth: None,
            intrinsics: None,
        }
    }

    pub fn with_depth(mut self, depth: DepthImage) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn with_intrinsics(mut self, intrinsics: Intrinsics) -> Self {
        self.intrinsics = Some(intrinsics);
        self
    }

    /// `(width, height)` of the color image.
    pub fn resolution(&self) -> (u32, u32) {
        self.color.dimensions()
    }

    pub fn has_depth(&self) -> bool {
        self.depth.is_some()
    }
}

/// Provides the most recent frame captured by the camera.
pub trait FrameSource: Send + Sync {
    /// The newest frame, or `None` before the first capture.
    fn latest_frame(&self) -> Option<Arc<Frame>>;
}

/// Frame source fed by a capture loop that publishes each new frame.
#[derive(Debug, Default)]
pub struct LatestFrameSlot {
    frame: RwLock<Option<Arc<Frame>>>,
}

impl LatestFrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current frame.
    pub fn publish(&self, frame: Frame) {
        let mut slot = self.frame.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Arc::new(frame));
    }

    pub fn clear(&self) {
        let mut slot = self.frame.write().unwrap_or_else(PoisonError::into_inner);
        *slot = None;
    }
}

impl FrameSource for LatestFrameSlot {
    fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.frame
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

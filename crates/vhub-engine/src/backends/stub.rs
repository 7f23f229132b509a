//! Deterministic stand-ins for inference runtimes and cameras.
//!
//! Used by the demo server and tests. Models return scripted detections and
//! the synthetic camera renders a slowly moving gradient with a flat depth
//! plane.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use image::{Luma, Rgb, RgbImage};

use crate::classifier::coco_class_name;
use crate::frame::{DepthImage, Frame, FrameSource, Intrinsics};
use crate::model::{Model, ModelLoader, ModelSpec, RawDetection};

/// Model returning a fixed, replaceable list of detections.
pub struct StubModel {
    version: String,
    detections: Mutex<Vec<RawDetection>>,
}

impl StubModel {
    pub fn new(version: impl Into<String>, detections: Vec<RawDetection>) -> Self {
        Self {
            version: version.into(),
            detections: Mutex::new(detections),
        }
    }

    /// Replace the detections returned by subsequent inferences.
    pub fn script(&self, detections: Vec<RawDetection>) {
        *self.detections.lock().unwrap_or_else(PoisonError::into_inner) = detections;
    }
}

impl Model for StubModel {
    fn infer(&self, _frame: &Frame) -> anyhow::Result<Vec<RawDetection>> {
        Ok(self
            .detections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn version(&self) -> String {
        self.version.clone()
    }
}

/// Loader handing out [`StubModel`]s with per-model-type scripts.
pub struct StubModelLoader {
    scripts: HashMap<String, Vec<RawDetection>>,
    loads: AtomicUsize,
}

impl StubModelLoader {
    /// Loader with no scripted detections.
    pub fn empty() -> Self {
        Self {
            scripts: HashMap::new(),
            loads: AtomicUsize::new(0),
        }
    }

    /// Loader whose YOLO model sees a person and a cup and whose face model
    /// sees one face, laid out for a 640x480 frame.
    pub fn demo() -> Self {
        let cup = coco_class_name(41).unwrap_or("cup");
        Self::empty()
            .with_script(
                "yolov8",
                vec![
                    RawDetection::new([250, 120, 390, 460], 0.91, 0, "person"),
                    RawDetection::new([420, 300, 470, 370], 0.62, 41, cup),
                    RawDetection::new([30, 30, 60, 60], 0.22, 41, cup),
                ],
            )
            .with_script(
                "yunet",
                vec![RawDetection::new([290, 140, 350, 210], 0.88, 0, "face")
                    .with_attribute("landmarks", serde_json::json!([[305, 165], [335, 165], [320, 180], [308, 195], [332, 195]]))],
            )
    }

    pub fn with_script(mut self, model_type: impl Into<String>, detections: Vec<RawDetection>) -> Self {
        self.scripts.insert(model_type.into(), detections);
        self
    }

    /// How many models this loader has loaded.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ModelLoader for StubModelLoader {
    fn load(&self, spec: &ModelSpec) -> anyhow::Result<Arc<dyn Model>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let detections = self.scripts.get(&spec.model_type).cloned().unwrap_or_default();
        Ok(Arc::new(StubModel::new(
            format!("stub-{}", spec.model_type),
            detections,
        )))
    }
}

/// Camera producing a new synthetic frame on every read.
///
/// The image content only changes every `hold_frames` frames so that
/// consecutive reads can share cached results.
pub struct SyntheticFrameSource {
    width: u32,
    height: u32,
    depth_mm: u16,
    hold_frames: u64,
    intrinsics: Intrinsics,
    next_id: AtomicU64,
}

impl SyntheticFrameSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth_mm: 2000,
            hold_frames: 30,
            intrinsics: Intrinsics::new(
                width as f64 * 0.8,
                width as f64 * 0.8,
                width as f64 / 2.0,
                height as f64 / 2.0,
            ),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_depth_mm(mut self, depth_mm: u16) -> Self {
        self.depth_mm = depth_mm;
        self
    }

    pub fn with_hold_frames(mut self, hold_frames: u64) -> Self {
        self.hold_frames = hold_frames.max(1);
        self
    }

    fn render(&self, frame_id: u64) -> Frame {
        let shift = (frame_id / self.hold_frames) as u32;
        let color = RgbImage::from_fn(self.width, self.height, |x, y| {
            Rgb([
                ((x + shift) % 256) as u8,
                ((y + shift) % 256) as u8,
                ((x + y) % 256) as u8,
            ])
        });
        let depth = DepthImage::from_pixel(self.width, self.height, Luma([self.depth_mm]));
        Frame::new(frame_id, color)
            .with_depth(depth)
            .with_intrinsics(self.intrinsics)
    }
}

impl FrameSource for SyntheticFrameSource {
    fn latest_frame(&self) -> Option<Arc<Frame>> {
        let frame_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Some(Arc::new(self.render(frame_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_loader_scripts_by_model_type() {
        let loader = StubModelLoader::demo();
        let frame = Frame::new(1, RgbImage::new(4, 4));

        let yolo = loader.load(&ModelSpec::yolov8()).unwrap();
        assert_eq!(yolo.infer(&frame).unwrap().len(), 3);
        assert_eq!(yolo.version(), "stub-yolov8");

        let unknown = loader.load(&ModelSpec::new("x.onnx", "other")).unwrap();
        assert!(unknown.infer(&frame).unwrap().is_empty());
        assert_eq!(loader.load_count(), 2);
    }

    #[test]
    fn test_synthetic_frames_hold_content() {
        let source = SyntheticFrameSource::new(32, 24).with_hold_frames(4);
        let a = source.latest_frame().unwrap();
        let b = source.latest_frame().unwrap();
        assert_eq!(b.frame_id, a.frame_id + 1);
        assert_eq!(a.color, b.color);
        assert_eq!(a.resolution(), (32, 24));
        assert_eq!(a.depth.as_ref().unwrap().get_pixel(3, 3).0[0], 2000);
    }

    #[test]
    fn test_stub_model_script() {
        let model = StubModel::new("v", Vec::new());
        model.script(vec![RawDetection::new([0, 0, 2, 2], 0.5, 0, "person")]);
        let frame = Frame::new(1, RgbImage::new(2, 2));
        assert_eq!(model.infer(&frame).unwrap().len(), 1);
    }
}

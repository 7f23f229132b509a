//! Classifiers: model-backed detectors for one [`ClassifierType`] each.
//!
//! A classifier owns its configuration, enabled flag, emission threshold,
//! lazily loaded model handle and rolling statistics. Variants differ only in
//! how they post-process raw model output.

mod face;
mod object;
mod person;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use vhub_models::{ClassifierType, Detection};

use crate::error::{EngineError, EngineResult};
use crate::frame::Frame;
use crate::model::{Model, ModelSpec, RawDetection, SharedModelManager};

pub use face::FaceClassifier;
pub use object::{coco_class_name, ObjectClassifier, COCO_CLASSES};
pub use person::PersonClassifier;

/// Static configuration of a classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub model: ModelSpec,

    /// Minimum confidence for a detection to be emitted.
    pub confidence_threshold: f32,

    /// Class names this classifier reports. `None` reports every class.
    #[serde(default)]
    pub target_classes: Option<Vec<String>>,

    /// Boxes smaller than this many pixels on either side are dropped.
    #[serde(default)]
    pub min_box_size: i32,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Hard cap on detections per frame.
    #[serde(default)]
    pub max_detections: Option<usize>,
}

fn default_enabled() -> bool {
    true
}

impl ClassifierConfig {
    pub fn new(model: ModelSpec, confidence_threshold: f32) -> Self {
        Self {
            model,
            confidence_threshold,
            target_classes: None,
            min_box_size: 0,
            enabled: true,
            max_detections: None,
        }
    }

    pub fn with_target_classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_classes = Some(classes.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_min_box_size(mut self, px: i32) -> Self {
        self.min_box_size = px;
        self
    }
}

/// Rolling per-classifier statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClassifierStats {
    pub total_runs: u64,
    pub total_detections: u64,
    /// Exponential moving average, weight 0.1 on the newest run.
    pub avg_processing_time_ms: f64,
    pub last_processing_time_ms: f64,
    pub last_detection_at: Option<DateTime<Utc>>,
    pub model_version: Option<String>,
}

impl ClassifierStats {
    fn record(&mut self, detections: usize, elapsed_ms: f64, model_version: &str) {
        self.avg_processing_time_ms = if self.total_runs == 0 {
            elapsed_ms
        } else {
            self.avg_processing_time_ms * 0.9 + elapsed_ms * 0.1
        };
        self.total_runs += 1;
        self.total_detections += detections as u64;
        self.last_processing_time_ms = elapsed_ms;
        self.last_detection_at = Some(Utc::now());
        if self.model_version.as_deref() != Some(model_version) {
            self.model_version = Some(model_version.to_string());
        }
    }
}

/// Snapshot of a classifier for admin endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifierInfo {
    pub name: String,
    pub classifier_type: ClassifierType,
    pub enabled: bool,
    pub initialized: bool,
    pub confidence_threshold: f32,
    pub model: ModelSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_classes: Option<Vec<String>>,
    pub stats: ClassifierStats,
}

/// State shared by every classifier variant.
pub struct ClassifierCore {
    name: String,
    classifier_type: ClassifierType,
    config: ClassifierConfig,
    enabled: AtomicBool,
    threshold_bits: AtomicU32,
    busy: AtomicBool,
    model: RwLock<Option<Arc<dyn Model>>>,
    stats: Mutex<ClassifierStats>,
}

impl ClassifierCore {
    pub fn new(name: impl Into<String>, classifier_type: ClassifierType, config: ClassifierConfig) -> Self {
        let threshold = clamp_threshold(config.confidence_threshold);
        Self {
            name: name.into(),
            classifier_type,
            enabled: AtomicBool::new(config.enabled),
            threshold_bits: AtomicU32::new(threshold.to_bits()),
            busy: AtomicBool::new(false),
            config,
            model: RwLock::new(None),
            stats: Mutex::new(ClassifierStats::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn classifier_type(&self) -> ClassifierType {
        self.classifier_type
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn confidence_threshold(&self) -> f32 {
        f32::from_bits(self.threshold_bits.load(Ordering::Acquire))
    }

    /// Set the emission threshold, clamped to `[0, 1]`. Returns the stored value.
    pub fn set_confidence_threshold(&self, value: f32) -> f32 {
        let value = clamp_threshold(value);
        self.threshold_bits.store(value.to_bits(), Ordering::Release);
        value
    }

    /// Claim the classifier for one run. `false` while another run is in flight.
    pub fn try_begin_run(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_run(&self) {
        self.busy.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn is_initialized(&self) -> bool {
        self.model
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Load (or reuse) the model. Blocking; a no-op when already initialized.
    pub fn initialize(&self, models: &SharedModelManager) -> EngineResult<()> {
        if self.is_initialized() {
            return Ok(());
        }
        let model = models
            .get_or_load(&self.config.model)
            .map_err(|e| EngineError::initialization(&self.name, format!("{:#}", e)))?;
        let version = model.version();
        *self.model.write().unwrap_or_else(PoisonError::into_inner) = Some(model);
        info!(
            classifier = %self.name,
            classifier_type = %self.classifier_type,
            model = %self.config.model,
            version = %version,
            "Classifier initialized"
        );
        Ok(())
    }

    /// Drop this classifier's model handle.
    pub fn release(&self) {
        if self
            .model
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            debug!(classifier = %self.name, "Released model handle");
        }
    }

    pub fn model(&self) -> EngineResult<Arc<dyn Model>> {
        self.model
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| EngineError::NotInitialized(self.name.clone()))
    }

    pub fn record_run(&self, detections: usize, elapsed_ms: f64, model_version: &str) {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(detections, elapsed_ms, model_version);
    }

    pub fn stats(&self) -> ClassifierStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn info(&self) -> ClassifierInfo {
        ClassifierInfo {
            name: self.name.clone(),
            classifier_type: self.classifier_type,
            enabled: self.is_enabled(),
            initialized: self.is_initialized(),
            confidence_threshold: self.confidence_threshold(),
            model: self.config.model.clone(),
            target_classes: self.config.target_classes.clone(),
            stats: self.stats(),
        }
    }
}

fn clamp_threshold(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// A detector for one classifier type.
///
/// `detect` is blocking and must be called off the async runtime.
pub trait Classifier: Send + Sync {
    fn core(&self) -> &ClassifierCore;

    /// Whether a raw model detection belongs to this classifier.
    fn accepts(&self, raw: &RawDetection) -> bool {
        let config = self.core().config();
        let [x1, y1, x2, y2] = raw.bbox;
        if x2 - x1 < config.min_box_size || y2 - y1 < config.min_box_size {
            return false;
        }
        config
            .target_classes
            .as_ref()
            .map_or(true, |classes| classes.iter().any(|c| c == &raw.class_name))
    }

    /// Variant-specific enrichment of an accepted detection.
    fn annotate(&self, detection: Detection, _raw: &RawDetection) -> Detection {
        detection
    }

    fn name(&self) -> &str {
        self.core().name()
    }

    fn classifier_type(&self) -> ClassifierType {
        self.core().classifier_type()
    }

    /// Run the model on a frame and emit detections above the threshold.
    ///
    /// `threshold` overrides the classifier's own emission threshold.
    fn detect(&self, frame: &Frame, threshold: Option<f32>) -> EngineResult<Vec<Detection>> {
        let core = self.core();
        let model = core.model()?;
        let started = Instant::now();

        let raw = model
            .infer(frame)
            .map_err(|e| EngineError::detection_failed(core.name(), format!("{:#}", e)))?;

        let threshold = threshold
            .map(clamp_threshold)
            .unwrap_or_else(|| core.confidence_threshold());
        let version = model.version();
        let raw_count = raw.len();

        let mut detections = Vec::with_capacity(raw_count);
        for item in &raw {
            if !self.accepts(item) {
                continue;
            }
            let detection = match Detection::new(
                item.bbox,
                item.confidence,
                item.class_id,
                item.class_name.clone(),
                core.classifier_type(),
            ) {
                Ok(d) => d,
                Err(e) => {
                    debug!(classifier = %core.name(), error = %e, "Skipping malformed detection");
                    continue;
                }
            };
            if detection.confidence < threshold {
                continue;
            }
            let mut detection = detection.with_model_version(version.clone());
            detection.attributes = item.attributes.clone();
            detections.push(self.annotate(detection, item));
        }

        if let Some(max) = core.config().max_detections {
            detections.truncate(max);
        }

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        for detection in &mut detections {
            detection.processing_time_ms = Some(elapsed_ms);
        }
        core.record_run(detections.len(), elapsed_ms, &version);

        debug!(
            classifier = %core.name(),
            raw = raw_count,
            emitted = detections.len(),
            threshold,
            elapsed_ms,
            "Detection complete"
        );
        Ok(detections)
    }

    fn info(&self) -> ClassifierInfo {
        self.core().info()
    }
}

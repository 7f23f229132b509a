//! Fused analysis results.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::classifier::ClassifierType;
use crate::detection::Detection;

/// What the pipeline did while producing a result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PipelineInfo {
    /// Registry names of the classifiers that were dispatched.
    #[serde(default)]
    pub classifiers_run: Vec<String>,

    /// Classifiers whose `detect` failed and contributed nothing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classifiers_failed: Vec<String>,

    /// Classifiers that exceeded the per-classifier timeout.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classifiers_timed_out: Vec<String>,

    #[serde(default)]
    pub total_detections: usize,

    #[serde(default)]
    pub depth_attached: bool,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Result of analyzing one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisResult {
    pub frame_id: u64,
    pub timestamp: DateTime<Utc>,
    pub processing_time_ms: f64,

    /// Detections keyed by classifier type, in each classifier's emission order.
    pub detections: BTreeMap<ClassifierType, Vec<Detection>>,

    /// `(width, height)` of the analyzed frame.
    pub frame_resolution: (u32, u32),

    #[serde(default)]
    pub pipeline_info: PipelineInfo,

    #[serde(default)]
    pub cache_hit: bool,
}

impl AnalysisResult {
    /// An empty result for a frame with no classifier output.
    pub fn empty(frame_id: u64, frame_resolution: (u32, u32)) -> Self {
        Self {
            frame_id,
            timestamp: Utc::now(),
            processing_time_ms: 0.0,
            detections: BTreeMap::new(),
            frame_resolution,
            pipeline_info: PipelineInfo::default(),
            cache_hit: false,
        }
    }

    /// Total number of detections across all classifiers.
    pub fn detection_count(&self) -> usize {
        self.detections.values().map(Vec::len).sum()
    }

    /// Detections for one classifier (empty when it did not run).
    pub fn detections_for(&self, classifier: ClassifierType) -> &[Detection] {
        self.detections
            .get(&classifier)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_detections(&self) -> bool {
        self.detections.values().any(|d| !d.is_empty())
    }

    /// Copy of this result keeping only the given classifier keys.
    pub fn retain_classifiers(&self, classifiers: &[ClassifierType]) -> Self {
        let detections = self
            .detections
            .iter()
            .filter(|(ty, _)| classifiers.contains(ty))
            .map(|(ty, dets)| (*ty, dets.clone()))
            .collect();
        Self {
            detections,
            ..self.clone()
        }
    }
}

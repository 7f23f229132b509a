//! Per-request analysis options and post-detection filters.

use std::collections::{BTreeSet, HashMap};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::detection::Detection;
use crate::error::{ModelError, ModelResult};

/// Options that shape how a request is analyzed.
///
/// Only the recognized fields take part in cache fingerprinting. Anything
/// else a client sends is kept in `extra` and ignored by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisOptions {
    /// Emission threshold override for the requested classifiers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_threshold: Option<f32>,

    /// Attach per-detection depth when a depth buffer is available.
    #[serde(default = "default_include_depth")]
    pub include_depth: bool,

    /// Project detections into camera-frame 3D coordinates.
    #[serde(default)]
    pub include_3d_position: bool,

    /// Keep at most this many detections per classifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_detections: Option<usize>,

    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

fn default_include_depth() -> bool {
    true
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            confidence_threshold: None,
            include_depth: default_include_depth(),
            include_3d_position: false,
            max_detections: None,
            extra: HashMap::new(),
        }
    }
}

impl AnalysisOptions {
    /// Canonical string of the options that affect analysis output.
    pub fn cache_key(&self) -> String {
        let threshold = self
            .confidence_threshold
            .map(|t| format!("{:.4}", t))
            .unwrap_or_else(|| "-".to_string());
        let max = self
            .max_detections
            .map(|m| m.to_string())
            .unwrap_or_else(|| "-".to_string());
        format!(
            "ct={};depth={};pos3d={};max={}",
            threshold, self.include_depth as u8, self.include_3d_position as u8, max
        )
    }

    pub fn validate(&self) -> ModelResult<()> {
        if let Some(threshold) = self.confidence_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(ModelError::invalid_option(
                    "confidence_threshold",
                    format!("{} is outside [0, 1]", threshold),
                ));
            }
        }
        if self.max_detections == Some(0) {
            return Err(ModelError::invalid_option(
                "max_detections",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Filters applied to each classifier's detections after inference.
///
/// Filters always run in the same order: confidence floor, then distance
/// ceiling, then allowed class names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DetectionFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f32>,

    /// Detections without depth always pass this filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_distance_mm: Option<f32>,

    #[serde(
        default,
        alias = "class_names",
        skip_serializing_if = "Option::is_none"
    )]
    pub allowed_classes: Option<BTreeSet<String>>,
}

impl DetectionFilters {
    pub fn is_empty(&self) -> bool {
        self.min_confidence.is_none()
            && self.max_distance_mm.is_none()
            && self.allowed_classes.is_none()
    }

    pub fn passes_confidence(&self, detection: &Detection) -> bool {
        self.min_confidence
            .map_or(true, |min| detection.confidence >= min)
    }

    pub fn passes_distance(&self, detection: &Detection) -> bool {
        match (self.max_distance_mm, detection.depth_mm) {
            (Some(max), Some(depth)) => depth <= max,
            _ => true,
        }
    }

    pub fn passes_class(&self, detection: &Detection) -> bool {
        self.allowed_classes
            .as_ref()
            .map_or(true, |allowed| allowed.contains(&detection.class_name))
    }

    /// Apply every filter in order, preserving input order.
    pub fn apply(&self, detections: Vec<Detection>) -> Vec<Detection> {
        if self.is_empty() {
            return detections;
        }
        detections
            .into_iter()
            .filter(|d| self.passes_confidence(d))
            .filter(|d| self.passes_distance(d))
            .filter(|d| self.passes_class(d))
            .collect()
    }

    pub fn validate(&self) -> ModelResult<()> {
        if let Some(min) = self.min_confidence {
            if !(0.0..=1.0).contains(&min) {
                return Err(ModelError::invalid_filter(
                    "min_confidence",
                    format!("{} is outside [0, 1]", min),
                ));
            }
        }
        if let Some(max) = self.max_distance_mm {
            if max <= 0.0 {
                return Err(ModelError::invalid_filter(
                    "max_distance_mm",
                    "must be positive",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClassifierType;

    fn det(confidence: f32, class_name: &str, depth: Option<f32>) -> Detection {
        let d = Detection::new([0, 0, 10, 10], confidence, 0, class_name, ClassifierType::Object)
            .unwrap();
        match depth {
            Some(mm) => d.with_depth(mm),
            None => d,
        }
    }

    #[test]
    fn test_options_defaults_from_empty_json() {
        let opts: AnalysisOptions = serde_json::from_str("{}").unwrap();
        assert!(opts.include_depth);
        assert!(!opts.include_3d_position);
        assert_eq!(opts.confidence_threshold, None);
        assert_eq!(opts, AnalysisOptions::default());
    }

    #[test]
    fn test_unrecognized_options_do_not_change_cache_key() {
        let base: AnalysisOptions =
            serde_json::from_str(r#"{"confidence_threshold":0.5}"#).unwrap();
        let noisy: AnalysisOptions =
            serde_json::from_str(r#"{"confidence_threshold":0.5,"client_id":"abc","debug":true}"#)
                .unwrap();
        assert_eq!(noisy.extra.len(), 2);
        assert_eq!(base.cache_key(), noisy.cache_key());

        let other: AnalysisOptions =
            serde_json::from_str(r#"{"confidence_threshold":0.6}"#).unwrap();
        assert_ne!(base.cache_key(), other.cache_key());
    }

    #[test]
    fn test_options_validation() {
        let mut opts = AnalysisOptions::default();
        assert!(opts.validate().is_ok());
        opts.confidence_threshold = Some(1.5);
        assert!(opts.validate().is_err());
        opts.confidence_threshold = Some(0.5);
        opts.max_detections = Some(0);
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_low_confidence_dropped_regardless_of_other_filters() {
        let filters = DetectionFilters {
            min_confidence: Some(0.5),
            max_distance_mm: Some(10_000.0),
            allowed_classes: Some(["person".to_string()].into_iter().collect()),
        };
        let out = filters.apply(vec![det(0.4, "person", Some(100.0))]);
        assert!(out.is_empty());
    }

    #[test]
    fn test_distance_filter_after_confidence() {
        let filters = DetectionFilters {
            min_confidence: Some(0.5),
            max_distance_mm: Some(2000.0),
            allowed_classes: None,
        };
        let near = det(0.8, "person", Some(1500.0));
        let far = det(0.8, "person", Some(2500.0));
        let no_depth = det(0.8, "person", None);

        assert!(filters.passes_confidence(&far));
        assert!(!filters.passes_distance(&far));

        let out = filters.apply(vec![near.clone(), far, no_depth.clone()]);
        assert_eq!(out, vec![near, no_depth]);
    }

    #[test]
    fn test_allowed_classes_filter() {
        let filters: DetectionFilters =
            serde_json::from_str(r#"{"class_names":["cup","bottle"]}"#).unwrap();
        let out = filters.apply(vec![
            det(0.9, "cup", None),
            det(0.9, "chair", None),
            det(0.9, "bottle", None),
        ]);
        let names: Vec<_> = out.iter().map(|d| d.class_name.as_str()).collect();
        assert_eq!(names, vec!["cup", "bottle"]);
    }

    #[test]
    fn test_filter_validation() {
        let bad = DetectionFilters {
            min_confidence: Some(-0.1),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = DetectionFilters {
            max_distance_mm: Some(0.0),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        assert!(DetectionFilters::default().validate().is_ok());
    }
}

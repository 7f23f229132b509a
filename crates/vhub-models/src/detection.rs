//! Single-object detection record.

use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::classifier::ClassifierType;
use crate::error::{ModelError, ModelResult};

/// Camera-frame position in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Position3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position3D {
    pub const ORIGIN: Position3D = Position3D {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// One detected object produced by a classifier.
///
/// `bbox` is `[x1, y1, x2, y2]` in pixel coordinates with `x1 < x2` and
/// `y1 < y2`. `confidence` is always within `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Detection {
    pub bbox: [i32; 4],
    pub confidence: f32,
    pub class_id: u32,
    pub class_name: String,
    pub classifier_type: ClassifierType,

    /// Distance to the bbox center in millimeters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth_mm: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_3d: Option<Position3D>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<HashMap<String, serde_json::Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

impl Detection {
    /// Create a detection, rejecting unordered boxes and clamping confidence.
    pub fn new(
        bbox: [i32; 4],
        confidence: f32,
        class_id: u32,
        class_name: impl Into<String>,
        classifier_type: ClassifierType,
    ) -> ModelResult<Self> {
        if !bbox_is_ordered(&bbox) {
            return Err(ModelError::InvalidBoundingBox(bbox));
        }
        Ok(Self {
            bbox,
            confidence: clamp_confidence(confidence),
            class_id,
            class_name: class_name.into(),
            classifier_type,
            depth_mm: None,
            position_3d: None,
            attributes: None,
            processing_time_ms: None,
            model_version: None,
        })
    }

    /// Integer pixel center of the bounding box.
    pub fn center(&self) -> (i32, i32) {
        let [x1, y1, x2, y2] = self.bbox;
        ((x1 + x2) / 2, (y1 + y2) / 2)
    }

    pub fn width(&self) -> i32 {
        self.bbox[2] - self.bbox[0]
    }

    pub fn height(&self) -> i32 {
        self.bbox[3] - self.bbox[1]
    }

    pub fn with_depth(mut self, depth_mm: f32) -> Self {
        self.depth_mm = Some(depth_mm);
        self
    }

    pub fn with_position(mut self, position: Position3D) -> Self {
        self.position_3d = Some(position);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }

    pub fn with_model_version(mut self, version: impl Into<String>) -> Self {
        self.model_version = Some(version.into());
        self
    }

    pub fn with_processing_time(mut self, ms: f64) -> Self {
        self.processing_time_ms = Some(ms);
        self
    }
}

fn bbox_is_ordered(bbox: &[i32; 4]) -> bool {
    bbox[0] < bbox[2] && bbox[1] < bbox[3]
}

fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_unordered_bbox() {
        let err = Detection::new([10, 10, 5, 20], 0.5, 0, "person", ClassifierType::Person);
        assert_eq!(err.unwrap_err(), ModelError::InvalidBoundingBox([10, 10, 5, 20]));

        let flat = Detection::new([0, 10, 5, 10], 0.5, 0, "person", ClassifierType::Person);
        assert!(flat.is_err());
    }

    #[test]
    fn test_confidence_is_clamped() {
        let high = Detection::new([0, 0, 4, 4], 1.7, 0, "face", ClassifierType::Face).unwrap();
        assert_eq!(high.confidence, 1.0);

        let low = Detection::new([0, 0, 4, 4], -0.2, 0, "face", ClassifierType::Face).unwrap();
        assert_eq!(low.confidence, 0.0);

        let nan = Detection::new([0, 0, 4, 4], f32::NAN, 0, "face", ClassifierType::Face).unwrap();
        assert_eq!(nan.confidence, 0.0);
    }

    #[test]
    fn test_center() {
        let det = Detection::new([300, 200, 340, 280], 0.9, 0, "person", ClassifierType::Person)
            .unwrap();
        assert_eq!(det.center(), (320, 240));
        assert_eq!(det.width(), 40);
        assert_eq!(det.height(), 80);
    }

    #[test]
    fn test_optional_fields_skipped_in_json() {
        let det = Detection::new([0, 0, 4, 4], 0.5, 2, "car", ClassifierType::Object).unwrap();
        let json = serde_json::to_value(&det).unwrap();
        assert!(json.get("depth_mm").is_none());
        assert!(json.get("position_3d").is_none());
        assert_eq!(json["classifier_type"], "object");

        let det = det.with_depth(1500.0).with_attribute("color", serde_json::json!("red"));
        let json = serde_json::to_value(&det).unwrap();
        assert_eq!(json["depth_mm"], 1500.0);
        assert_eq!(json["attributes"]["color"], "red");
    }
}

//! General object classifier over the COCO label set.

use std::sync::Arc;

use vhub_models::ClassifierType;

use super::{Classifier, ClassifierConfig, ClassifierCore};
use crate::model::ModelSpec;

/// COCO class names in model output order.
pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

/// Name for a COCO class id, if in range.
pub fn coco_class_name(class_id: u32) -> Option<&'static str> {
    COCO_CLASSES.get(class_id as usize).copied()
}

pub struct ObjectClassifier {
    core: ClassifierCore,
}

impl ObjectClassifier {
    pub fn new(name: impl Into<String>, config: ClassifierConfig) -> Self {
        Self {
            core: ClassifierCore::new(name, ClassifierType::Object, config),
        }
    }

    pub fn create(name: String, config: ClassifierConfig) -> Arc<dyn Classifier> {
        Arc::new(Self::new(name, config))
    }

    pub fn default_config() -> ClassifierConfig {
        ClassifierConfig::new(ModelSpec::yolov8(), 0.4)
    }
}

impl Classifier for ObjectClassifier {
    fn core(&self) -> &ClassifierCore {
        &self.core
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawDetection;

    #[test]
    fn test_coco_lookup() {
        assert_eq!(coco_class_name(0), Some("person"));
        assert_eq!(coco_class_name(41), Some("cup"));
        assert_eq!(coco_class_name(80), None);
    }

    #[test]
    fn test_accepts_every_class() {
        let classifier = ObjectClassifier::new("object", ObjectClassifier::default_config());
        assert!(classifier.accepts(&RawDetection::new([0, 0, 5, 5], 0.5, 41, "cup")));
        assert!(classifier.accepts(&RawDetection::new([0, 0, 5, 5], 0.5, 0, "person")));
        assert_eq!(ObjectClassifier::default_config().model, ModelSpec::yolov8());
    }
}

//! Person classifier on top of the shared YOLO detector.

use std::sync::Arc;

use vhub_models::{ClassifierType, Detection};

use super::{Classifier, ClassifierConfig, ClassifierCore};
use crate::model::{ModelSpec, RawDetection};

pub struct PersonClassifier {
    core: ClassifierCore,
}

impl PersonClassifier {
    pub fn new(name: impl Into<String>, config: ClassifierConfig) -> Self {
        Self {
            core: ClassifierCore::new(name, ClassifierType::Person, config),
        }
    }

    pub fn create(name: String, config: ClassifierConfig) -> Arc<dyn Classifier> {
        Arc::new(Self::new(name, config))
    }

    pub fn default_config() -> ClassifierConfig {
        ClassifierConfig::new(ModelSpec::yolov8(), 0.5).with_target_classes(["person"])
    }
}

impl Classifier for PersonClassifier {
    fn core(&self) -> &ClassifierCore {
        &self.core
    }

    /// Tag each person with its box aspect ratio (height over width).
    fn annotate(&self, detection: Detection, _raw: &RawDetection) -> Detection {
        let aspect = detection.height() as f64 / detection.width() as f64;
        detection.with_attribute("aspect_ratio", serde_json::json!((aspect * 100.0).round() / 100.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PersonClassifier::default_config();
        assert_eq!(config.confidence_threshold, 0.5);
        assert_eq!(config.target_classes, Some(vec!["person".to_string()]));
        assert_eq!(config.model, ModelSpec::yolov8());
    }

    #[test]
    fn test_annotate_aspect_ratio() {
        let classifier = PersonClassifier::new("person", PersonClassifier::default_config());
        let raw = RawDetection::new([0, 0, 40, 100], 0.9, 0, "person");
        let det = Detection::new(raw.bbox, 0.9, 0, "person", ClassifierType::Person).unwrap();
        let det = classifier.annotate(det, &raw);
        assert_eq!(
            det.attributes.unwrap()["aspect_ratio"],
            serde_json::json!(2.5)
        );
    }
}

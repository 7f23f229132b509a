//! Face classifier backed by the YuNet detector.

use std::sync::Arc;

use vhub_models::{ClassifierType, Detection};

use super::{Classifier, ClassifierConfig, ClassifierCore};
use crate::model::{ModelSpec, RawDetection};

/// Faces smaller than this are too small to be useful downstream.
const MIN_FACE_SIZE_PX: i32 = 12;

pub struct FaceClassifier {
    core: ClassifierCore,
}

impl FaceClassifier {
    pub fn new(name: impl Into<String>, config: ClassifierConfig) -> Self {
        Self {
            core: ClassifierCore::new(name, ClassifierType::Face, config),
        }
    }

    pub fn create(name: String, config: ClassifierConfig) -> Arc<dyn Classifier> {
        Arc::new(Self::new(name, config))
    }

    pub fn default_config() -> ClassifierConfig {
        ClassifierConfig::new(ModelSpec::yunet(), 0.6).with_min_box_size(MIN_FACE_SIZE_PX)
    }
}

impl Classifier for FaceClassifier {
    fn core(&self) -> &ClassifierCore {
        &self.core
    }

    // YuNet has a single class; report it under one stable name.
    fn annotate(&self, mut detection: Detection, _raw: &RawDetection) -> Detection {
        detection.class_id = 0;
        detection.class_name = "face".to_string();
        detection
    }
}

//! Inference models and the shared model cache.
//!
//! Several classifiers may run off the same weights (the person and object
//! classifiers both use the YOLO detector by default). Models are keyed by
//! [`ModelSpec`] and loaded at most once per manager.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::frame::Frame;

/// Default YOLO weights shared by the person and object classifiers.
pub const DEFAULT_YOLO_MODEL: &str = "models/object_detection/yolov8n.onnx";

/// Default face detector weights.
pub const DEFAULT_FACE_MODEL: &str = "models/face_detection/yunet/face_detection_yunet_2023mar.onnx";

/// Identity of a model artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelSpec {
    pub path: String,
    pub model_type: String,
}

impl ModelSpec {
    pub fn new(path: impl Into<String>, model_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            model_type: model_type.into(),
        }
    }

    pub fn yolov8() -> Self {
        Self::new(DEFAULT_YOLO_MODEL, "yolov8")
    }

    pub fn yunet() -> Self {
        Self::new(DEFAULT_FACE_MODEL, "yunet")
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.model_type, self.path)
    }
}

/// Unfiltered model output for one object.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub bbox: [i32; 4],
    pub confidence: f32,
    pub class_id: u32,
    pub class_name: String,
    pub attributes: Option<HashMap<String, serde_json::Value>>,
}

impl RawDetection {
    pub fn new(bbox: [i32; 4], confidence: f32, class_id: u32, class_name: impl Into<String>) -> Self {
        Self {
            bbox,
            confidence,
            class_id,
            class_name: class_name.into(),
            attributes: None,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }
}

/// A loaded inference model. Inference is blocking.
pub trait Model: Send + Sync {
    fn infer(&self, frame: &Frame) -> anyhow::Result<Vec<RawDetection>>;

    /// Version string reported on every detection.
    fn version(&self) -> String;
}

/// Loads model artifacts. Loading is blocking.
pub trait ModelLoader: Send + Sync {
    fn load(&self, spec: &ModelSpec) -> anyhow::Result<Arc<dyn Model>>;
}

/// Loads each distinct model once and hands out shared handles.
pub struct SharedModelManager {
    loader: Arc<dyn ModelLoader>,
    models: Mutex<HashMap<ModelSpec, Arc<dyn Model>>>,
}

impl SharedModelManager {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            models: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached model for `spec`, loading it on first use.
    ///
    /// The map lock is held across the load so concurrent callers for the
    /// same spec never load twice. Call from a blocking context.
    pub fn get_or_load(&self, spec: &ModelSpec) -> anyhow::Result<Arc<dyn Model>> {
        let mut models = self.models.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(model) = models.get(spec) {
            debug!(model = %spec, "Reusing shared model");
            return Ok(Arc::clone(model));
        }

        let model = self.loader.load(spec)?;
        info!(model = %spec, version = %model.version(), "Loaded model");
        models.insert(spec.clone(), Arc::clone(&model));
        Ok(model)
    }

    pub fn is_loaded(&self, spec: &ModelSpec) -> bool {
        self.models
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(spec)
    }

    pub fn loaded_count(&self) -> usize {
        self.models
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drop every cached model handle.
    pub fn clear(&self) {
        let mut models = self.models.lock().unwrap_or_else(PoisonError::into_inner);
        let count = models.len();
        models.clear();
        if count > 0 {
            info!(count, "Released shared models");
        }
    }
}

impl fmt::Debug for SharedModelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedModelManager")
            .field("loaded", &self.loaded_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullModel;

    impl Model for NullModel {
        fn infer(&self, _frame: &Frame) -> anyhow::Result<Vec<RawDetection>> {
            Ok(Vec::new())
        }

        fn version(&self) -> String {
            "null".to_string()
        }
    }

    #[derive(Default)]
    struct CountingLoader {
        loads: AtomicUsize,
    }

    impl ModelLoader for CountingLoader {
        fn load(&self, spec: &ModelSpec) -> anyhow::Result<Arc<dyn Model>> {
            if spec.path.is_empty() {
                anyhow::bail!("empty model path");
            }
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NullModel))
        }
    }

    #[test]
    fn test_same_spec_loaded_once() {
        let loader = Arc::new(CountingLoader::default());
        let manager = SharedModelManager::new(loader.clone());

        let a = manager.get_or_load(&ModelSpec::yolov8()).unwrap();
        let b = manager.get_or_load(&ModelSpec::yolov8()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);

        manager.get_or_load(&ModelSpec::yunet()).unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
        assert_eq!(manager.loaded_count(), 2);
    }

    #[test]
    fn test_failed_load_is_not_cached() {
        let manager = SharedModelManager::new(Arc::new(CountingLoader::default()));
        let spec = ModelSpec::new("", "yolov8");
        assert!(manager.get_or_load(&spec).is_err());
        assert!(!manager.is_loaded(&spec));
    }

    #[test]
    fn test_clear() {
        let manager = SharedModelManager::new(Arc::new(CountingLoader::default()));
        manager.get_or_load(&ModelSpec::yolov8()).unwrap();
        manager.clear();
        assert_eq!(manager.loaded_count(), 0);
    }
}

//! Classifier registry.
//!
//! Owns every named classifier instance. All mutations go through one async
//! mutex over the name map; model loading and detection run outside it.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};
use vhub_models::ClassifierType;

use crate::classifier::{
    Classifier, ClassifierConfig, ClassifierInfo, FaceClassifier, ObjectClassifier,
    PersonClassifier,
};
use crate::error::{EngineError, EngineResult};
use crate::model::SharedModelManager;

/// A built-in classifier variant.
pub struct ClassifierRegistration {
    pub classifier_type: ClassifierType,
    pub default_config: fn() -> ClassifierConfig,
    pub constructor: fn(String, ClassifierConfig) -> Arc<dyn Classifier>,
}

/// Every classifier variant this build knows how to create.
pub const BUILTIN_CLASSIFIERS: &[ClassifierRegistration] = &[
    ClassifierRegistration {
        classifier_type: ClassifierType::Person,
        default_config: PersonClassifier::default_config,
        constructor: PersonClassifier::create,
    },
    ClassifierRegistration {
        classifier_type: ClassifierType::Face,
        default_config: FaceClassifier::default_config,
        constructor: FaceClassifier::create,
    },
    ClassifierRegistration {
        classifier_type: ClassifierType::Object,
        default_config: ObjectClassifier::default_config,
        constructor: ObjectClassifier::create,
    },
];

/// Find the registration for a type name such as `"person"` or `"faces"`.
pub fn registration_for(type_name: &str) -> EngineResult<&'static ClassifierRegistration> {
    let classifier_type: ClassifierType = type_name
        .parse()
        .map_err(|_| EngineError::UnknownType(type_name.to_string()))?;
    BUILTIN_CLASSIFIERS
        .iter()
        .find(|r| r.classifier_type == classifier_type)
        .ok_or_else(|| EngineError::UnknownType(type_name.to_string()))
}

/// Registry totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistryStats {
    pub registered: usize,
    pub enabled: usize,
    pub initialized: usize,
    pub loaded_models: usize,
}

pub struct ClassifierRegistry {
    classifiers: Mutex<HashMap<String, Arc<dyn Classifier>>>,
    models: Arc<SharedModelManager>,
}

impl ClassifierRegistry {
    pub fn new(models: Arc<SharedModelManager>) -> Self {
        Self {
            classifiers: Mutex::new(HashMap::new()),
            models,
        }
    }

    pub fn models(&self) -> &Arc<SharedModelManager> {
        &self.models
    }

    /// Create a classifier of `type_name` under `name` without loading its model.
    ///
    /// `config` defaults to the variant's default configuration.
    pub async fn create_classifier(
        &self,
        name: &str,
        type_name: &str,
        config: Option<ClassifierConfig>,
    ) -> EngineResult<ClassifierInfo> {
        let registration = registration_for(type_name)?;
        let config = config.unwrap_or_else(registration.default_config);

        let mut classifiers = self.classifiers.lock().await;
        if classifiers.contains_key(name) {
            return Err(EngineError::ClassifierExists(name.to_string()));
        }
        let classifier = (registration.constructor)(name.to_string(), config);
        let info = classifier.info();
        classifiers.insert(name.to_string(), classifier);

        info!(
            classifier = %name,
            classifier_type = %registration.classifier_type,
            threshold = info.confidence_threshold,
            "Classifier created"
        );
        Ok(info)
    }

    /// Load the classifier's model through the shared model manager.
    ///
    /// Failure leaves the classifier uninitialized; calling again retries.
    pub async fn initialize_classifier(&self, name: &str) -> EngineResult<ClassifierInfo> {
        let classifier = self.get_classifier(name).await?;
        let models = Arc::clone(&self.models);
        let worker = Arc::clone(&classifier);

        tokio::task::spawn_blocking(move || worker.core().initialize(&models))
            .await
            .map_err(|e| EngineError::initialization(name, format!("load task failed: {}", e)))??;

        Ok(classifier.info())
    }

    /// Initialize every registered classifier, logging failures.
    ///
    /// Returns the names that failed.
    pub async fn initialize_all(&self) -> Vec<String> {
        let mut failed = Vec::new();
        for name in self.names().await {
            if let Err(e) = self.initialize_classifier(&name).await {
                warn!(classifier = %name, error = %e, "Classifier initialization failed");
                failed.push(name);
            }
        }
        failed
    }

    /// Enabled classifiers, initialized or not, ordered by name.
    pub async fn get_enabled_classifiers(&self) -> Vec<Arc<dyn Classifier>> {
        let classifiers = self.classifiers.lock().await;
        let mut enabled: Vec<_> = classifiers
            .values()
            .filter(|c| c.core().is_enabled())
            .cloned()
            .collect();
        enabled.sort_by(|a, b| a.name().cmp(b.name()));
        enabled
    }

    pub async fn get_classifier(&self, name: &str) -> EngineResult<Arc<dyn Classifier>> {
        self.classifiers
            .lock()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::ClassifierNotFound(name.to_string()))
    }

    pub async fn classifier_info(&self, name: &str) -> EngineResult<ClassifierInfo> {
        Ok(self.get_classifier(name).await?.info())
    }

    /// Snapshot of every classifier, ordered by name.
    pub async fn list_classifiers(&self) -> Vec<ClassifierInfo> {
        let classifiers = self.classifiers.lock().await;
        let mut infos: Vec<_> = classifiers.values().map(|c| c.info()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    async fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.classifiers.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn set_enabled(&self, name: &str, enabled: bool) -> EngineResult<ClassifierInfo> {
        let classifier = self.get_classifier(name).await?;
        classifier.core().set_enabled(enabled);
        info!(classifier = %name, enabled, "Classifier toggled");
        Ok(classifier.info())
    }

    /// Set the emission threshold in place, clamped to `[0, 1]`.
    pub async fn set_confidence_threshold(
        &self,
        name: &str,
        value: f32,
    ) -> EngineResult<ClassifierInfo> {
        let classifier = self.get_classifier(name).await?;
        let stored = classifier.core().set_confidence_threshold(value);
        info!(classifier = %name, requested = value, threshold = stored, "Threshold updated");
        Ok(classifier.info())
    }

    /// Remove a classifier and release its model handle.
    pub async fn remove_classifier(&self, name: &str) -> EngineResult<()> {
        let removed = self
            .classifiers
            .lock()
            .await
            .remove(name)
            .ok_or_else(|| EngineError::ClassifierNotFound(name.to_string()))?;
        removed.core().release();
        info!(classifier = %name, "Classifier removed");
        Ok(())
    }

    /// Release every model handle and clear the shared model cache.
    pub async fn cleanup_all(&self) {
        let classifiers = self.classifiers.lock().await;
        for classifier in classifiers.values() {
            classifier.core().release();
        }
        self.models.clear();
        info!(count = classifiers.len(), "Classifiers cleaned up");
    }

    pub async fn stats(&self) -> RegistryStats {
        let classifiers = self.classifiers.lock().await;
        RegistryStats {
            registered: classifiers.len(),
            enabled: classifiers.values().filter(|c| c.core().is_enabled()).count(),
            initialized: classifiers
                .values()
                .filter(|c| c.core().is_initialized())
                .count(),
            loaded_models: self.models.loaded_count(),
        }
    }
}

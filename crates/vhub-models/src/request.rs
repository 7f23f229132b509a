//! Analysis requests.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::classifier::ClassifierType;
use crate::error::{ModelError, ModelResult};
use crate::options::{AnalysisOptions, DetectionFilters};

/// A request to analyze the current frame with a set of classifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisRequest {
    /// Requested classifiers (must be non-empty).
    pub classifiers: Vec<ClassifierType>,

    #[serde(default)]
    pub options: AnalysisOptions,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<DetectionFilters>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_id: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl AnalysisRequest {
    /// Create a request with default options and no filters.
    pub fn new(classifiers: impl IntoIterator<Item = ClassifierType>) -> Self {
        Self {
            classifiers: classifiers.into_iter().collect(),
            options: AnalysisOptions::default(),
            filters: None,
            frame_id: None,
            client_id: None,
            created_at: Utc::now(),
        }
    }

    /// Request every known classifier.
    pub fn all() -> Self {
        Self::new(ClassifierType::ALL.iter().copied())
    }

    pub fn with_options(mut self, options: AnalysisOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_filters(mut self, filters: DetectionFilters) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Requested classifiers, sorted and de-duplicated.
    pub fn sorted_classifiers(&self) -> Vec<ClassifierType> {
        let mut sorted = self.classifiers.clone();
        sorted.sort();
        sorted.dedup();
        sorted
    }

    pub fn requests(&self, classifier: ClassifierType) -> bool {
        self.classifiers.contains(&classifier)
    }

    /// Validate the request.
    pub fn validate(&self) -> ModelResult<()> {
        if self.classifiers.is_empty() {
            return Err(ModelError::NoClassifiers);
        }
        self.options.validate()?;
        if let Some(filters) = &self.filters {
            filters.validate()?;
        }
        Ok(())
    }
}

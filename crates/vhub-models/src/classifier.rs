//! Classifier kinds known to the service.
//!
//! Every classifier name a client may request is drawn from this closed
//! enumeration. The registry keys its records by free-form names, but each
//! record reports exactly one `ClassifierType`, and fused results are keyed
//! by it.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Kind of vision classifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierType {
    /// Whole-body person detection.
    Person,
    /// Face detection.
    Face,
    /// General object detection (COCO-style classes).
    Object,
}

impl ClassifierType {
    /// All known classifier kinds.
    pub const ALL: &'static [ClassifierType] = &[
        ClassifierType::Person,
        ClassifierType::Face,
        ClassifierType::Object,
    ];

    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassifierType::Person => "person",
            ClassifierType::Face => "face",
            ClassifierType::Object => "object",
        }
    }
}

impl fmt::Display for ClassifierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ClassifierType {
    type Err = ClassifierTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "person" | "people" => Ok(ClassifierType::Person),
            "face" | "faces" => Ok(ClassifierType::Face),
            "object" | "objects" => Ok(ClassifierType::Object),
            _ => Err(ClassifierTypeParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown classifier type: {0}")]
pub struct ClassifierTypeParseError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifier_type_parse() {
        assert_eq!("person".parse::<ClassifierType>().unwrap(), ClassifierType::Person);
        assert_eq!("Face".parse::<ClassifierType>().unwrap(), ClassifierType::Face);
        assert_eq!(" objects ".parse::<ClassifierType>().unwrap(), ClassifierType::Object);
        assert!("hand".parse::<ClassifierType>().is_err());
    }

    #[test]
    fn test_classifier_type_display_matches_serde() {
        for ty in ClassifierType::ALL {
            let json = serde_json::to_string(ty).unwrap();
            assert_eq!(json, format!("\"{}\"", ty));
        }
    }

    #[test]
    fn test_unknown_name_rejected_by_serde() {
        let parsed: Result<Vec<ClassifierType>, _> = serde_json::from_str(r#"["person","hand"]"#);
        assert!(parsed.is_err());
    }
}

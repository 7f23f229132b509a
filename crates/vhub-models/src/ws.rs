//! WebSocket message types for the result broadcast channel.
//!
//! Every message is a single JSON object sent as one text frame. Client
//! messages are tagged by `action`; server replies use `action` for
//! acknowledgements, `type` for pushed results, and a bare `error` field for
//! rejected input.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::classifier::ClassifierType;
use crate::detection::Detection;
use crate::options::{AnalysisOptions, DetectionFilters};
use crate::result::AnalysisResult;

/// A connection's declared interest in broadcast results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Subscription {
    pub classifiers: Vec<ClassifierType>,
    #[serde(default)]
    pub options: AnalysisOptions,
    #[serde(default)]
    pub filters: DetectionFilters,
    pub connected_at: DateTime<Utc>,
}

impl Subscription {
    /// Subscription given to a freshly connected client: person only.
    pub fn initial() -> Self {
        Self {
            classifiers: vec![ClassifierType::Person],
            options: AnalysisOptions::default(),
            filters: DetectionFilters::default(),
            connected_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        !self.classifiers.is_empty()
    }

    /// Restrict a result to this subscription's classifiers and filters.
    ///
    /// Returns `None` when the subscription has no classifiers.
    pub fn view_of(&self, result: &AnalysisResult) -> Option<AnalysisResult> {
        if !self.is_active() {
            return None;
        }
        let mut view = result.retain_classifiers(&self.classifiers);
        if !self.filters.is_empty() {
            for detections in view.detections.values_mut() {
                *detections = self.filters.apply(std::mem::take(detections));
            }
        }
        Some(view)
    }
}

/// Messages sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        #[serde(default)]
        classifiers: Vec<ClassifierType>,
        #[serde(default)]
        options: AnalysisOptions,
        #[serde(default)]
        filters: DetectionFilters,
    },
    Unsubscribe,
    Ping,
    GetLatest,
}

/// Acknowledgements of client actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AckMessage {
    Subscribed {
        subscription: Subscription,
        timestamp: DateTime<Utc>,
    },
    Unsubscribed {
        timestamp: DateTime<Utc>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
}

/// Results pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    AnalysisResult {
        frame_id: u64,
        timestamp: DateTime<Utc>,
        processing_time_ms: f64,
        detections: BTreeMap<ClassifierType, Vec<Detection>>,
        frame_resolution: (u32, u32),
        detection_count: usize,
    },
}

/// Rejection of malformed client input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorMessage {
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Any message the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ServerMessage {
    Ack(AckMessage),
    Push(PushMessage),
    Error(ErrorMessage),
}

impl ServerMessage {
    pub fn subscribed(subscription: Subscription) -> Self {
        ServerMessage::Ack(AckMessage::Subscribed {
            subscription,
            timestamp: Utc::now(),
        })
    }

    pub fn unsubscribed() -> Self {
        ServerMessage::Ack(AckMessage::Unsubscribed {
            timestamp: Utc::now(),
        })
    }

    pub fn pong() -> Self {
        ServerMessage::Ack(AckMessage::Pong {
            timestamp: Utc::now(),
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorMessage {
            error: message.into(),
            timestamp: Utc::now(),
        })
    }

    pub fn analysis_result(result: &AnalysisResult) -> Self {
        ServerMessage::Push(PushMessage::AnalysisResult {
            frame_id: result.frame_id,
            timestamp: result.timestamp,
            processing_time_ms: result.processing_time_ms,
            detections: result.detections.clone(),
            frame_resolution: result.frame_resolution,
            detection_count: result.detection_count(),
        })
    }

    /// Short label used for logging and metrics.
    pub fn message_type(&self) -> &'static str {
        match self {
            ServerMessage::Ack(AckMessage::Subscribed { .. }) => "subscribed",
            ServerMessage::Ack(AckMessage::Unsubscribed { .. }) => "unsubscribed",
            ServerMessage::Ack(AckMessage::Pong { .. }) => "pong",
            ServerMessage::Push(PushMessage::AnalysisResult { .. }) => "analysis_result",
            ServerMessage::Error(_) => "error",
        }
    }

    /// Serialize to a single-line JSON string.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_parse_client_messages() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"action":"subscribe","classifiers":["face"],"options":{"include_depth":false},"filters":{"min_confidence":0.7}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::Subscribe {
                classifiers,
                options,
                filters,
            } => {
                assert_eq!(classifiers, vec![ClassifierType::Face]);
                assert!(!options.include_depth);
                assert_eq!(filters.min_confidence, Some(0.7));
            }
            other => panic!("unexpected message: {:?}", other),
        }

        let ping: ClientMessage = serde_json::from_str(r#"{"action":"ping"}"#).unwrap();
        assert_eq!(ping, ClientMessage::Ping);
        let latest: ClientMessage = serde_json::from_str(r#"{"action":"get_latest"}"#).unwrap();
        assert_eq!(latest, ClientMessage::GetLatest);
        assert!(serde_json::from_str::<ClientMessage>(r#"{"action":"dance"}"#).is_err());
    }

    #[test]
    fn test_server_message_shapes() {
        let pong: Value = serde_json::from_str(&ServerMessage::pong().to_json().unwrap()).unwrap();
        assert_eq!(pong["action"], "pong");
        assert!(pong.get("timestamp").is_some());

        let err: Value =
            serde_json::from_str(&ServerMessage::error("bad").to_json().unwrap()).unwrap();
        assert_eq!(err["error"], "bad");
        assert!(err.get("action").is_none());

        let sub = ServerMessage::subscribed(Subscription::initial());
        let sub: Value = serde_json::from_str(&sub.to_json().unwrap()).unwrap();
        assert_eq!(sub["action"], "subscribed");
        assert_eq!(sub["subscription"]["classifiers"], json!(["person"]));
    }

    #[test]
    fn test_analysis_result_message() {
        let mut result = AnalysisResult::empty(42, (640, 480));
        result.detections.insert(
            ClassifierType::Person,
            vec![Detection::new([0, 0, 5, 5], 0.9, 0, "person", ClassifierType::Person).unwrap()],
        );
        let msg = ServerMessage::analysis_result(&result);
        assert_eq!(msg.message_type(), "analysis_result");

        let text = msg.to_json().unwrap();
        assert!(!text.contains('\n'));
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "analysis_result");
        assert_eq!(value["frame_id"], 42);
        assert_eq!(value["frame_resolution"], json!([640, 480]));
        assert_eq!(value["detection_count"], 1);
    }

    #[test]
    fn test_subscription_view_filters_classifiers_and_detections() {
        let mut result = AnalysisResult::empty(1, (100, 100));
        let strong =
            Detection::new([0, 0, 5, 5], 0.9, 0, "person", ClassifierType::Person).unwrap();
        let weak = Detection::new([0, 0, 5, 5], 0.2, 0, "person", ClassifierType::Person).unwrap();
        result
            .detections
            .insert(ClassifierType::Person, vec![strong.clone(), weak]);
        result.detections.insert(
            ClassifierType::Face,
            vec![Detection::new([0, 0, 2, 2], 0.9, 0, "face", ClassifierType::Face).unwrap()],
        );

        let mut sub = Subscription::initial();
        sub.filters.min_confidence = Some(0.5);
        let view = sub.view_of(&result).unwrap();
        assert_eq!(view.detections.len(), 1);
        assert_eq!(view.detections_for(ClassifierType::Person), &[strong]);

        sub.classifiers.clear();
        assert!(sub.view_of(&result).is_none());
    }
}

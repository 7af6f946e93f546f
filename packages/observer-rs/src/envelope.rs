//! Envelope classification for raw queue bodies.
//!
//! Two publishers deliver into the observation queue:
//!
//! - a **broadcast topic**, whose deliveries are wrapped in a broker envelope
//!   carrying `TopicArn` and the original `Message` string;
//! - an **event bus**, whose deliveries are pre-shaped by an input
//!   transformation into `{"eventBusName": ..., "event": {...}}`.
//!
//! [`classify`] turns a body into a tagged [`Envelope`]. Anything that is not
//! one of the two known shapes becomes [`Envelope::Unknown`] and is never
//! dispatched.
//!
//! Inner payloads are extracted verbatim. For the event bus the payload is the
//! exact source text of the `event` value, so string-equality predicates keep
//! working without re-serialization differences.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::MalformedEnvelope;

const TOPIC_FIELD: &str = "TopicArn";
const TOPIC_MESSAGE_FIELD: &str = "Message";
const BUS_FIELD: &str = "eventBusName";
const BUS_EVENT_FIELD: &str = "event";

/// Where an observed message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Broadcast (pub/sub topic) delivery.
    Broadcast,
    /// Event-routing bus delivery.
    RoutedEvent,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Broadcast => "broadcast",
            SourceType::RoutedEvent => "routed_event",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "broadcast" | "sns" => Ok(SourceType::Broadcast),
            "routed_event" | "routedevent" | "routed-event" | "eventbridge" => {
                Ok(SourceType::RoutedEvent)
            }
            other => Err(format!(
                "unknown source type '{other}' (expected broadcast or routed_event)"
            )),
        }
    }
}

/// A classified message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedMessage {
    pub source_type: SourceType,
    pub source_id: String,
    pub payload: String,
}

impl ObservedMessage {
    pub fn new(
        source_type: SourceType,
        source_id: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            source_type,
            source_id: source_id.into(),
            payload: payload.into(),
        }
    }

    pub fn broadcast(source_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::new(SourceType::Broadcast, source_id, payload)
    }

    pub fn routed_event(source_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::new(SourceType::RoutedEvent, source_id, payload)
    }
}

/// Result of classifying a raw queue body.
#[derive(Debug)]
pub enum Envelope {
    Broadcast { source_id: String, payload: String },
    RoutedEvent { source_id: String, payload: String },
    Unknown(MalformedEnvelope),
}

impl Envelope {
    /// Converts a known variant into an [`ObservedMessage`].
    ///
    /// Returns the reason on the unknown arm so callers can log it.
    pub fn into_observed(self) -> Result<ObservedMessage, MalformedEnvelope> {
        match self {
            Envelope::Broadcast { source_id, payload } => Ok(ObservedMessage {
                source_type: SourceType::Broadcast,
                source_id,
                payload,
            }),
            Envelope::RoutedEvent { source_id, payload } => Ok(ObservedMessage {
                source_type: SourceType::RoutedEvent,
                source_id,
                payload,
            }),
            Envelope::Unknown(reason) => Err(reason),
        }
    }
}

/// Classify a raw queue body.
///
/// A `TopicArn` string selects [`Envelope::Broadcast`]; otherwise an
/// `eventBusName` string selects [`Envelope::RoutedEvent`]. Never fails:
/// every problem is reported through [`Envelope::Unknown`].
pub fn classify(body: &str) -> Envelope {
    match decode(body) {
        Ok(envelope) => envelope,
        Err(reason) => Envelope::Unknown(reason),
    }
}

fn decode(body: &str) -> Result<Envelope, MalformedEnvelope> {
    let fields: HashMap<String, &RawValue> = match serde_json::from_str(body) {
        Ok(fields) => fields,
        Err(e) => {
            // Valid JSON that simply isn't an object gets its own reason.
            return match serde_json::from_str::<IgnoredAny>(body) {
                Ok(_) => Err(MalformedEnvelope::NotAnObject),
                Err(_) => Err(MalformedEnvelope::NotJson(e)),
            };
        }
    };

    if let Some(source_id) = string_field(&fields, TOPIC_FIELD) {
        return match string_field(&fields, TOPIC_MESSAGE_FIELD) {
            Some(payload) => Ok(Envelope::Broadcast { source_id, payload }),
            None => Err(MalformedEnvelope::MissingPayload {
                source_type: SourceType::Broadcast,
                source_id,
            }),
        };
    }

    if let Some(source_id) = string_field(&fields, BUS_FIELD) {
        return match fields.get(BUS_EVENT_FIELD) {
            Some(event) if event.get() != "null" => Ok(Envelope::RoutedEvent {
                source_id,
                payload: event.get().to_string(),
            }),
            _ => Err(MalformedEnvelope::MissingPayload {
                source_type: SourceType::RoutedEvent,
                source_id,
            }),
        };
    }

    Err(MalformedEnvelope::UnknownSource)
}

fn string_field(fields: &HashMap<String, &RawValue>, name: &str) -> Option<String> {
    fields
        .get(name)
        .and_then(|raw| serde_json::from_str::<String>(raw.get()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_envelope_extracts_message_string() {
        let body = r#"{
            "Type": "Notification",
            "MessageId": "5a6b",
            "TopicArn": "arn:aws:sns:eu-west-1:123:restaurant_notifications",
            "Message": "{\"orderId\":\"X1\",\"restaurantName\":\"Fangtasia\"}"
        }"#;

        match classify(body) {
            Envelope::Broadcast { source_id, payload } => {
                assert_eq!(source_id, "arn:aws:sns:eu-west-1:123:restaurant_notifications");
                assert_eq!(payload, r#"{"orderId":"X1","restaurantName":"Fangtasia"}"#);
            }
            other => panic!("expected broadcast, got {:?}", other),
        }
    }

    #[test]
    fn test_routed_event_payload_is_verbatim() {
        // Spacing inside the event must survive untouched.
        let body = r#"{"eventBusName":"order_events","event":{"source": "big-mouth", "detail-type":"order_placed"}}"#;

        match classify(body) {
            Envelope::RoutedEvent { source_id, payload } => {
                assert_eq!(source_id, "order_events");
                assert_eq!(
                    payload,
                    r#"{"source": "big-mouth", "detail-type":"order_placed"}"#
                );
            }
            other => panic!("expected routed event, got {:?}", other),
        }
    }

    #[test]
    fn test_topic_wins_when_both_identifiers_present() {
        let body = r#"{"TopicArn":"t","Message":"m","eventBusName":"b","event":{}}"#;
        assert!(matches!(classify(body), Envelope::Broadcast { .. }));
    }

    #[test]
    fn test_unknown_source() {
        let body = r#"{"orderId":"X1"}"#;
        assert!(matches!(
            classify(body),
            Envelope::Unknown(MalformedEnvelope::UnknownSource)
        ));
    }

    #[test]
    fn test_not_json() {
        assert!(matches!(
            classify("definitely not json"),
            Envelope::Unknown(MalformedEnvelope::NotJson(_))
        ));
    }

    #[test]
    fn test_json_array_is_not_an_object() {
        assert!(matches!(
            classify(r#"["TopicArn","Message"]"#),
            Envelope::Unknown(MalformedEnvelope::NotAnObject)
        ));
    }

    #[test]
    fn test_non_string_message_is_missing_payload() {
        let body = r#"{"TopicArn":"arn:topic","Message":{"nested":true}}"#;
        match classify(body) {
            Envelope::Unknown(MalformedEnvelope::MissingPayload {
                source_type,
                source_id,
            }) => {
                assert_eq!(source_type, SourceType::Broadcast);
                assert_eq!(source_id, "arn:topic");
            }
            other => panic!("expected missing payload, got {:?}", other),
        }
    }

    #[test]
    fn test_null_event_is_missing_payload() {
        let body = r#"{"eventBusName":"bus-1","event":null}"#;
        assert!(matches!(
            classify(body),
            Envelope::Unknown(MalformedEnvelope::MissingPayload { .. })
        ));
    }

    #[test]
    fn test_into_observed() {
        let observed = classify(r#"{"eventBusName":"bus-1","event":{"a":1}}"#)
            .into_observed()
            .unwrap();
        assert_eq!(observed, ObservedMessage::routed_event("bus-1", r#"{"a":1}"#));

        assert!(classify("{}").into_observed().is_err());
    }

    #[test]
    fn test_source_type_parsing() {
        assert_eq!("sns".parse::<SourceType>().unwrap(), SourceType::Broadcast);
        assert_eq!(
            "routedEvent".parse::<SourceType>().unwrap(),
            SourceType::RoutedEvent
        );
        assert_eq!(
            "EventBridge".parse::<SourceType>().unwrap(),
            SourceType::RoutedEvent
        );
        assert!("kafka".parse::<SourceType>().is_err());
        assert_eq!(SourceType::RoutedEvent.to_string(), "routed_event");
    }
}

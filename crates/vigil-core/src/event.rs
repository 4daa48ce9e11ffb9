//! Event kinds, payload schemas, typed payloads, and the wire message.
//!
//! Incoming messages are decoded explicitly: the topic selects a
//! [`PayloadSchema`] (via the topic registry), the schema decodes the body
//! into one [`EventPayload`] variant, and the result travels to handlers as
//! an [`Envelope`]. No runtime type inspection is involved.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::DecodeError;
use crate::topic::Topic;

/// Server heartbeat topic. Counts as keep-alive, never dispatched.
pub const HEARTBEAT_TOPIC: &str = "channel.metadata";

/// Sent by the server shortly before it closes the socket.
pub const SOCKET_CLOSING_TOPIC: &str = "v2.system.socket_closing";

/// Handler routing key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    /// Presence changes (available, away, offline, ...).
    Presence,
    /// Routing status changes (idle, interacting, not responding, ...).
    RoutingStatus,
    /// Any other topic, body passed through as JSON.
    Raw,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Presence => write!(f, "presence"),
            Self::RoutingStatus => write!(f, "routingStatus"),
            Self::Raw => write!(f, "raw"),
        }
    }
}

/// Decode rule for a topic's body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PayloadSchema {
    /// Decode into [`PresenceEvent`].
    Presence,
    /// Decode into [`RoutingStatusEvent`].
    RoutingStatus,
    /// Keep the body as raw JSON.
    Raw,
}

impl PayloadSchema {
    /// The event kind this schema produces.
    pub fn kind(self) -> EventKind {
        match self {
            Self::Presence => EventKind::Presence,
            Self::RoutingStatus => EventKind::RoutingStatus,
            Self::Raw => EventKind::Raw,
        }
    }

    /// Decode a message body against this schema.
    pub fn decode(self, topic: &Topic, body: Value) -> Result<EventPayload, DecodeError> {
        let schema_err = |reason: String| DecodeError::Schema {
            topic: topic.clone(),
            schema: self,
            reason,
        };
        match self {
            Self::Presence => PresenceEvent::from_body(body)
                .map(EventPayload::Presence)
                .map_err(schema_err),
            Self::RoutingStatus => RoutingStatusEvent::from_body(body)
                .map(EventPayload::RoutingStatus)
                .map_err(schema_err),
            Self::Raw => Ok(EventPayload::Raw(body)),
        }
    }
}

impl fmt::Display for PayloadSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind().fmt(f)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Payloads
// ─────────────────────────────────────────────────────────────────────────────

/// A presence change.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEvent {
    /// System presence, e.g. `AVAILABLE` or `Away`, as sent by the server.
    pub status: String,
    /// Presence definition id, when the server sends one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_id: Option<String>,
    /// Free-text status message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the presence last changed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_date: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PresenceBody {
    status: Option<String>,
    presence_definition: Option<PresenceDefinition>,
    message: Option<String>,
    modified_date: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PresenceDefinition {
    id: Option<String>,
    system_presence: Option<String>,
}

impl PresenceEvent {
    /// Accepts the flat `{"status": ..}` form or the nested
    /// `{"presenceDefinition": {"systemPresence": ..}}` form.
    fn from_body(body: Value) -> Result<Self, String> {
        let raw: PresenceBody = serde_json::from_value(body).map_err(|e| e.to_string())?;
        let (presence_id, nested_status) = match raw.presence_definition {
            Some(def) => (def.id, def.system_presence),
            None => (None, None),
        };
        let status = raw
            .status
            .or(nested_status)
            .ok_or_else(|| "missing presence status".to_owned())?;
        Ok(Self {
            status,
            presence_id,
            message: raw.message,
            modified_date: raw.modified_date,
        })
    }
}

/// A routing status change.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingStatusEvent {
    /// Routing status, e.g. `IDLE` or `INTERACTING`.
    pub status: String,
    /// When the status began.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoutingStatusBody {
    status: Option<String>,
    start_time: Option<DateTime<Utc>>,
    routing_status: Option<RoutingStatusInner>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoutingStatusInner {
    status: Option<String>,
    start_time: Option<DateTime<Utc>>,
}

impl RoutingStatusEvent {
    fn from_body(body: Value) -> Result<Self, String> {
        let raw: RoutingStatusBody = serde_json::from_value(body).map_err(|e| e.to_string())?;
        let (nested_status, nested_start) = match raw.routing_status {
            Some(inner) => (inner.status, inner.start_time),
            None => (None, None),
        };
        let status = raw
            .status
            .or(nested_status)
            .ok_or_else(|| "missing routing status".to_owned())?;
        Ok(Self {
            status,
            start_time: raw.start_time.or(nested_start),
        })
    }
}

/// Typed payload, one variant per [`EventKind`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", content = "body", rename_all = "camelCase")]
pub enum EventPayload {
    /// Decoded presence change.
    Presence(PresenceEvent),
    /// Decoded routing status change.
    RoutingStatus(RoutingStatusEvent),
    /// Undecoded body.
    Raw(Value),
}

impl EventPayload {
    /// The kind matching this payload variant.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Presence(_) => EventKind::Presence,
            Self::RoutingStatus(_) => EventKind::RoutingStatus,
            Self::Raw(_) => EventKind::Raw,
        }
    }

    /// Presence payload, if this is one.
    pub fn as_presence(&self) -> Option<&PresenceEvent> {
        match self {
            Self::Presence(p) => Some(p),
            _ => None,
        }
    }

    /// Routing status payload, if this is one.
    pub fn as_routing_status(&self) -> Option<&RoutingStatusEvent> {
        match self {
            Self::RoutingStatus(r) => Some(r),
            _ => None,
        }
    }
}

/// One decoded inbound event, handed to every handler of its kind.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Envelope {
    /// Topic the event arrived on.
    pub topic: Topic,
    /// Handler routing key.
    pub kind: EventKind,
    /// Decoded body.
    pub payload: EventPayload,
}

impl Envelope {
    /// Decode a wire message with the given schema.
    pub fn decode(message: WireMessage, schema: PayloadSchema) -> Result<Self, DecodeError> {
        let payload = schema.decode(&message.topic, message.event_body)?;
        Ok(Self {
            topic: message.topic,
            kind: schema.kind(),
            payload,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire format
// ─────────────────────────────────────────────────────────────────────────────

/// A raw message as carried by the notification channel.
///
/// The platform spelling (`topicName` / `eventBody`) is accepted as well.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Topic the body belongs to.
    #[serde(alias = "topicName")]
    pub topic: Topic,
    /// Undecoded body.
    #[serde(alias = "eventBody", default)]
    pub event_body: Value,
}

impl WireMessage {
    /// Parse a text frame.
    pub fn parse(raw: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(raw).map_err(|e| DecodeError::Malformed(e.to_string()))
    }

    /// Whether this is a server heartbeat.
    pub fn is_heartbeat(&self) -> bool {
        self.topic.as_str() == HEARTBEAT_TOPIC
    }

    /// Whether the server is announcing that it will close the socket.
    pub fn is_socket_closing(&self) -> bool {
        self.topic.as_str() == SOCKET_CLOSING_TOPIC
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn topic() -> Topic {
        Topic::new("v2.users.42.presence")
    }

    #[test]
    fn flat_presence_body() {
        let payload = PayloadSchema::Presence
            .decode(&topic(), json!({"status": "AVAILABLE"}))
            .unwrap();
        assert_eq!(payload.as_presence().unwrap().status, "AVAILABLE");
        assert_eq!(payload.kind(), EventKind::Presence);
    }

    #[test]
    fn nested_presence_body() {
        let body = json!({
            "presenceDefinition": {"id": "6a3a-4b", "systemPresence": "Away"},
            "message": "lunch",
            "modifiedDate": "2024-03-01T12:30:00.000Z"
        });
        let payload = PayloadSchema::Presence.decode(&topic(), body).unwrap();
        let presence = payload.as_presence().unwrap();
        assert_eq!(presence.status, "Away");
        assert_eq!(presence.presence_id.as_deref(), Some("6a3a-4b"));
        assert_eq!(presence.message.as_deref(), Some("lunch"));
        assert!(presence.modified_date.is_some());
    }

    #[test]
    fn presence_without_status_is_schema_error() {
        let err = PayloadSchema::Presence
            .decode(&topic(), json!({"message": "hi"}))
            .unwrap_err();
        assert_matches!(err, DecodeError::Schema { schema: PayloadSchema::Presence, .. });
    }

    #[test]
    fn presence_wrong_type_is_schema_error() {
        let err = PayloadSchema::Presence
            .decode(&topic(), json!({"status": 5}))
            .unwrap_err();
        assert_matches!(err, DecodeError::Schema { .. });
    }

    #[test]
    fn nested_routing_status_body() {
        let body = json!({
            "routingStatus": {"status": "INTERACTING", "startTime": "2024-03-01T12:30:00Z"}
        });
        let payload = PayloadSchema::RoutingStatus
            .decode(&Topic::new("v2.users.42.routingStatus"), body)
            .unwrap();
        let status = payload.as_routing_status().unwrap();
        assert_eq!(status.status, "INTERACTING");
        assert!(status.start_time.is_some());
    }

    #[test]
    fn flat_routing_status_body() {
        let payload = PayloadSchema::RoutingStatus
            .decode(&Topic::new("t"), json!({"status": "IDLE"}))
            .unwrap();
        assert_eq!(payload.as_routing_status().unwrap().status, "IDLE");
    }

    #[test]
    fn raw_schema_passes_body_through() {
        let body = json!({"anything": [1, 2, 3]});
        let payload = PayloadSchema::Raw.decode(&topic(), body.clone()).unwrap();
        assert_eq!(payload, EventPayload::Raw(body));
    }

    #[test]
    fn wire_message_accepts_both_spellings() {
        let snake = WireMessage::parse(r#"{"topic":"a.b","event_body":{"x":1}}"#).unwrap();
        let camel = WireMessage::parse(r#"{"topicName":"a.b","eventBody":{"x":1}}"#).unwrap();
        assert_eq!(snake, camel);
    }

    #[test]
    fn wire_message_without_topic_is_malformed() {
        assert_matches!(
            WireMessage::parse(r#"{"event_body":{}}"#),
            Err(DecodeError::Malformed(_))
        );
        assert_matches!(WireMessage::parse("not json"), Err(DecodeError::Malformed(_)));
    }

    #[test]
    fn reserved_topics_detected() {
        let hb = WireMessage::parse(
            r#"{"topicName":"channel.metadata","eventBody":{"message":"WebSocket Heartbeat"}}"#,
        )
        .unwrap();
        assert!(hb.is_heartbeat());
        assert!(!hb.is_socket_closing());

        let closing = WireMessage::parse(r#"{"topic":"v2.system.socket_closing"}"#).unwrap();
        assert!(closing.is_socket_closing());
        assert_eq!(closing.event_body, Value::Null);
    }

    #[test]
    fn envelope_decode_sets_kind_from_schema() {
        let msg = WireMessage::parse(
            r#"{"topic":"entity.42.presence","event_body":{"status":"AVAILABLE"}}"#,
        )
        .unwrap();
        let env = Envelope::decode(msg, PayloadSchema::Presence).unwrap();
        assert_eq!(env.topic.as_str(), "entity.42.presence");
        assert_eq!(env.kind, EventKind::Presence);
    }

    #[test]
    fn kind_display_matches_serde() {
        let json = serde_json::to_string(&EventKind::RoutingStatus).unwrap();
        assert_eq!(json, format!("\"{}\"", EventKind::RoutingStatus));
    }
}

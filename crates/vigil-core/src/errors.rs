//! Error taxonomy for the notification core.
//!
//! [`NotifyError`] classifies every failure the core can surface:
//!
//! - `Auth`: credential exchange failed. Fatal to startup, never retried.
//! - `Connection`: handshake or transport failure. Retried with backoff by the
//!   subscription manager and only surfaced once attempts are exhausted.
//! - `Subscription`: the remote side rejected an add/replace. Surfaced to the
//!   caller of `add` after the topics are rolled back.
//! - `Decode`: a message did not match its schema. Reported through the
//!   dispatcher's error hook; the message is dropped.
//! - `Closed`: an operation was attempted after shutdown.

use serde::{Deserialize, Serialize};

use crate::event::PayloadSchema;
use crate::topic::Topic;

/// A topic the subscription endpoint refused, with the server's reason.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedTopic {
    /// The refused topic.
    pub topic: Topic,
    /// Server-supplied reason (e.g. `invalid topic`, `quota exceeded`).
    pub reason: String,
}

/// Failure to turn a raw inbound message into an [`Envelope`](crate::Envelope).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The frame is not a `{topic, event_body}` JSON object.
    #[error("malformed message: {0}")]
    Malformed(String),
    /// No schema is registered for the message's topic.
    #[error("no schema registered for topic {0}")]
    UnknownTopic(Topic),
    /// The body does not match the topic's schema.
    #[error("body for {topic} does not match {schema} schema: {reason}")]
    Schema {
        /// Topic the message arrived on.
        topic: Topic,
        /// Schema the body was decoded against.
        schema: PayloadSchema,
        /// Parser detail.
        reason: String,
    },
}

impl DecodeError {
    /// Topic the failed message arrived on, when it could be read.
    pub fn topic(&self) -> Option<&Topic> {
        match self {
            Self::Malformed(_) => None,
            Self::UnknownTopic(topic) | Self::Schema { topic, .. } => Some(topic),
        }
    }
}

/// Top-level error for the notification core.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    /// Credential exchange failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Handshake or transport failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// The subscription endpoint rejected one or more topics.
    #[error("subscription rejected for {} topic(s): {}", .rejected.len(), summarize(.rejected))]
    Subscription {
        /// Every rejected topic with its reason.
        rejected: Vec<RejectedTopic>,
    },

    /// A message body could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Operation attempted after shutdown.
    #[error("notification service is closed")]
    Closed,
}

impl NotifyError {
    /// Whether the subscription manager should retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Whether the error must stop the caller outright.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Closed)
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::Connection(_) => "connection",
            Self::Subscription { .. } => "subscription",
            Self::Decode(_) => "decode",
            Self::Closed => "closed",
        }
    }

    /// Build a `Subscription` error rejecting every topic for the same reason.
    pub fn reject_all<'a>(topics: impl IntoIterator<Item = &'a Topic>, reason: &str) -> Self {
        Self::Subscription {
            rejected: topics
                .into_iter()
                .map(|topic| RejectedTopic {
                    topic: topic.clone(),
                    reason: reason.to_owned(),
                })
                .collect(),
        }
    }
}

fn summarize(rejected: &[RejectedTopic]) -> String {
    const SHOWN: usize = 3;
    let mut parts: Vec<String> = rejected
        .iter()
        .take(SHOWN)
        .map(|r| format!("{} ({})", r.topic, r.reason))
        .collect();
    if rejected.len() > SHOWN {
        parts.push(format!("and {} more", rejected.len() - SHOWN));
    }
    parts.join(", ")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! # vigil-core
//!
//! Foundation types shared by every vigil crate:
//!
//! - **Opaque IDs**: [`ConnectionId`], [`EntityId`], [`GroupId`] as newtypes
//! - **Topics**: [`Topic`] keys and [`TopicTemplate`] patterns with an `{id}` placeholder
//! - **Events**: [`EventKind`], [`PayloadSchema`], typed payloads and the [`Envelope`]
//! - **Wire format**: [`WireMessage`] as received from the notification channel
//! - **Errors**: [`NotifyError`] taxonomy and [`DecodeError`]
//! - **Retry math**: [`retry`] backoff calculation
//! - **Logging**: [`logging`] subscriber setup and test capture

#![deny(unsafe_code)]

pub mod errors;
pub mod event;
pub mod ids;
pub mod logging;
pub mod retry;
pub mod topic;

pub use errors::{DecodeError, NotifyError, RejectedTopic};
pub use event::{
    Envelope, EventKind, EventPayload, HEARTBEAT_TOPIC, PayloadSchema, PresenceEvent,
    RoutingStatusEvent, SOCKET_CLOSING_TOPIC, WireMessage,
};
pub use ids::{ConnectionId, EntityId, GroupId};
pub use topic::{TemplateError, Topic, TopicTemplate};

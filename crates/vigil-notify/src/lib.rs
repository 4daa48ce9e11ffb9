//! # vigil-notify
//!
//! The notification core: keeps one live push channel open, reconciles the
//! caller's desired topic set with the server, and fans decoded events out to
//! typed handlers.
//!
//! - [`registry`]: topic → payload schema
//! - [`channel`]: the streaming connection and its transports
//! - [`subscription`]: the subscription set, remote pushes, and reconnect replay
//! - [`dispatcher`]: decode and deliver inbound messages
//! - [`service`]: the supervisor that reconnects when a channel is lost
//! - [`mock`]: in-process transport and subscription endpoint for tests

#![deny(unsafe_code)]

pub mod channel;
pub mod dispatcher;
pub mod mock;
pub mod registry;
pub mod service;
pub mod subscription;

pub use channel::{
    ChannelConnection, ChannelHandle, ChannelState, ChannelTransport, Received, StreamEnd,
    TransportSession, WebSocketTransport,
};
pub use dispatcher::{Dispatched, Dispatcher, RunReport};
pub use registry::TopicRegistry;
pub use service::NotificationService;
pub use subscription::{
    HttpSubscriptionApi, Operation, PushOutcome, SubscriptionApi, SubscriptionConfig,
    SubscriptionManager, SubscriptionRequest, TopicResult,
};

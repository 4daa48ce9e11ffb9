//! Decode inbound messages and deliver them to typed handlers.
//!
//! Handlers run synchronously on the task that drives
//! [`Dispatcher::run`], so wire order is delivery order. A message that
//! cannot be decoded is reported to the error hook and dropped; the loop
//! keeps going.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};
use vigil_core::{DecodeError, Envelope, EventKind, WireMessage};

use crate::channel::{ChannelConnection, Received, StreamEnd};
use crate::registry::TopicRegistry;

/// Callback for one event kind.
pub type Handler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Callback for messages that could not be decoded.
pub type ErrorHook = Arc<dyn Fn(&DecodeError) + Send + Sync>;

/// What [`Dispatcher::dispatch`] did with a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatched {
    /// Decoded and handed to this many handlers.
    Delivered(usize),
    /// Server heartbeat; not dispatched.
    Heartbeat,
    /// The server announced it will close the socket.
    SocketClosing,
}

/// Counters from one [`Dispatcher::run`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunReport {
    /// Messages decoded and delivered.
    pub dispatched: u64,
    /// Messages dropped on decode errors.
    pub dropped: u64,
    /// Heartbeats seen.
    pub heartbeats: u64,
    /// Why the run ended.
    pub end: StreamEnd,
}

/// Routes decoded envelopes to handlers by [`EventKind`].
pub struct Dispatcher {
    registry: Arc<TopicRegistry>,
    handlers: RwLock<HashMap<EventKind, Vec<Handler>>>,
    on_error: RwLock<ErrorHook>,
}

impl Dispatcher {
    /// Dispatcher resolving schemas through `registry`.
    pub fn new(registry: Arc<TopicRegistry>) -> Self {
        Self {
            registry,
            handlers: RwLock::new(HashMap::new()),
            on_error: RwLock::new(Arc::new(log_decode_error)),
        }
    }

    /// Append a handler for `kind`. Handlers run in registration order.
    pub fn register_handler<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Replace the decode error hook. The default logs a warning.
    pub fn on_error<F>(&self, hook: F)
    where
        F: Fn(&DecodeError) + Send + Sync + 'static,
    {
        *self.on_error.write() = Arc::new(hook);
    }

    /// Number of handlers registered for `kind`.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.read().get(&kind).map_or(0, Vec::len)
    }

    /// Decode one raw message and deliver it.
    pub fn dispatch(&self, raw: &str) -> Result<Dispatched, DecodeError> {
        let message = WireMessage::parse(raw)?;
        if message.is_heartbeat() {
            return Ok(Dispatched::Heartbeat);
        }
        if message.is_socket_closing() {
            return Ok(Dispatched::SocketClosing);
        }

        let schema = self
            .registry
            .resolve(&message.topic)
            .ok_or_else(|| DecodeError::UnknownTopic(message.topic.clone()))?;
        let envelope = Envelope::decode(message, schema)?;

        // Cloned so a handler may register further handlers.
        let handlers: Vec<Handler> = self
            .handlers
            .read()
            .get(&envelope.kind)
            .cloned()
            .unwrap_or_default();
        for handler in &handlers {
            handler(&envelope);
        }
        Ok(Dispatched::Delivered(handlers.len()))
    }

    /// Receive and dispatch until the channel ends.
    ///
    /// Does not retry: the caller decides what to do with
    /// [`RunReport::end`]. A server `socket_closing` notice ends the run as
    /// `StreamEnd::Lost` so the caller can replace the channel early.
    pub async fn run(&self, channel: &mut ChannelConnection) -> RunReport {
        let mut dispatched = 0;
        let mut dropped = 0;
        let mut heartbeats = 0;

        let end = loop {
            match channel.receive().await {
                Ok(Received::Message(raw)) => match self.dispatch(&raw) {
                    Ok(Dispatched::Delivered(_)) => dispatched += 1,
                    Ok(Dispatched::Heartbeat) => heartbeats += 1,
                    Ok(Dispatched::SocketClosing) => {
                        break StreamEnd::Lost("server announced socket closing".into());
                    }
                    Err(e) => {
                        dropped += 1;
                        let hook = self.on_error.read().clone();
                        hook(&e);
                    }
                },
                Ok(Received::EndOfStream(end)) => break end,
                Err(_) => break StreamEnd::Closed,
            }
        };

        debug!(
            connection_id = %channel.connection_id(),
            dispatched,
            dropped,
            heartbeats,
            ?end,
            "dispatch run ended"
        );
        RunReport {
            dispatched,
            dropped,
            heartbeats,
            end,
        }
    }
}

fn log_decode_error(error: &DecodeError) {
    match error.topic() {
        Some(topic) => warn!(%topic, error = %error, "dropping undecodable message"),
        None => warn!(error = %error, "dropping undecodable message"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use serde_json::json;
    use tracing::Level;
    use vigil_core::logging::capture_logs;
    use vigil_core::{PayloadSchema, Topic};

    use super::*;

    fn dispatcher() -> Dispatcher {
        let registry = Arc::new(TopicRegistry::new());
        registry.register(Topic::new("u.1.presence"), PayloadSchema::Presence);
        registry.register(Topic::new("u.1.routing"), PayloadSchema::RoutingStatus);
        Dispatcher::new(registry)
    }

    fn message(topic: &str, body: serde_json::Value) -> String {
        json!({ "topic": topic, "event_body": body }).to_string()
    }

    #[test]
    fn routes_by_kind_in_registration_order() {
        let dispatcher = dispatcher();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let seen = seen.clone();
            dispatcher.register_handler(EventKind::Presence, move |env| {
                seen.lock().push(format!("{tag}:{}", env.topic));
            });
        }
        let routing = Arc::new(Mutex::new(0));
        let counter = routing.clone();
        dispatcher.register_handler(EventKind::RoutingStatus, move |_| *counter.lock() += 1);

        let result = dispatcher
            .dispatch(&message("u.1.presence", json!({"status": "AVAILABLE"})))
            .unwrap();
        assert_eq!(result, Dispatched::Delivered(2));
        assert_eq!(
            *seen.lock(),
            vec!["first:u.1.presence", "second:u.1.presence"]
        );
        assert_eq!(*routing.lock(), 0);
    }

    #[test]
    fn unknown_topic_is_an_error() {
        let err = dispatcher()
            .dispatch(&message("u.2.presence", json!({"status": "AWAY"})))
            .unwrap_err();
        assert_matches!(err, DecodeError::UnknownTopic(t) if t.as_str() == "u.2.presence");
    }

    #[test]
    fn schema_mismatch_is_an_error() {
        let err = dispatcher()
            .dispatch(&message("u.1.presence", json!({"nope": true})))
            .unwrap_err();
        assert_matches!(err, DecodeError::Schema { .. });
    }

    #[test]
    fn malformed_frame_is_an_error() {
        assert_matches!(
            dispatcher().dispatch("not json"),
            Err(DecodeError::Malformed(_))
        );
    }

    #[test]
    fn heartbeat_and_socket_closing_are_not_delivered() {
        let dispatcher = dispatcher();
        assert_eq!(
            dispatcher.dispatch(&message("channel.metadata", json!({"message": "WebSocket Heartbeat"}))),
            Ok(Dispatched::Heartbeat)
        );
        assert_eq!(
            dispatcher.dispatch(&message("v2.system.socket_closing", json!({}))),
            Ok(Dispatched::SocketClosing)
        );
    }

    #[test]
    fn handler_may_register_another_handler() {
        let dispatcher = Arc::new(dispatcher());
        let inner = dispatcher.clone();
        dispatcher.register_handler(EventKind::Presence, move |_| {
            inner.register_handler(EventKind::Presence, |_| {});
        });

        let _ = dispatcher
            .dispatch(&message("u.1.presence", json!({"status": "AVAILABLE"})))
            .unwrap();
        assert_eq!(dispatcher.handler_count(EventKind::Presence), 2);
    }

    #[test]
    fn default_hook_logs_warning() {
        let (logs, _guard) = capture_logs();
        let dispatcher = dispatcher();
        let hook = dispatcher.on_error.read().clone();
        hook(&DecodeError::UnknownTopic(Topic::new("x.y")));

        let events = logs.matching("undecodable");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, Level::WARN);
        assert_eq!(events[0].field("topic"), Some("x.y"));
    }
}

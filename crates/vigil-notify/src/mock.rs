//! In-process doubles for the transport and the subscription endpoint.
//!
//! [`MockTransport`] hands out channels whose inbound side is driven by the
//! test through [`MockChannel`]. [`MockSubscriptionApi`] records every push
//! that reached it, refuses configured topics, and can be scripted to fail.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use vigil_core::{ConnectionId, NotifyError, Topic};

use crate::channel::{ChannelTransport, Frame, TransportSession};
use crate::subscription::{
    Operation, PushOutcome, SubscriptionApi, SubscriptionRequest, TopicResult,
};

const FRAME_BUFFER: usize = 256;

// ─────────────────────────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────────────────────────

/// Test-side view of one channel handed out by [`MockTransport`].
#[derive(Clone, Debug)]
pub struct MockChannel {
    id: ConnectionId,
    frames: mpsc::Sender<Frame>,
    cancel: CancellationToken,
}

impl MockChannel {
    /// Connection id the channel was opened with.
    pub fn connection_id(&self) -> &ConnectionId {
        &self.id
    }

    /// Deliver a raw text frame. Returns `false` once the channel is gone.
    pub async fn emit(&self, raw: impl Into<String>) -> bool {
        self.frames.send(Ok(raw.into())).await.is_ok()
    }

    /// Deliver `{"topic": ..., "event_body": ...}`.
    pub async fn emit_event(&self, topic: &str, body: Value) -> bool {
        let message = serde_json::json!({ "topic": topic, "event_body": body });
        self.emit(message.to_string()).await
    }

    /// Simulate a transport failure.
    pub async fn fail(&self, reason: impl Into<String>) -> bool {
        self.frames.send(Err(reason.into())).await.is_ok()
    }

    /// Whether the client side closed the channel.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Default)]
struct TransportState {
    failures: Mutex<VecDeque<NotifyError>>,
    channels: Mutex<Vec<MockChannel>>,
    connects: AtomicUsize,
}

/// Channel transport driven by the test.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<TransportState>,
}

impl MockTransport {
    /// Transport whose connects succeed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` connects with `error`.
    pub fn fail_next(&self, count: usize, error: NotifyError) {
        let mut failures = self.state.failures.lock();
        failures.extend(std::iter::repeat_n(error, count));
    }

    /// Connect attempts so far, failed ones included.
    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Every channel opened so far, oldest first.
    pub fn channels(&self) -> Vec<MockChannel> {
        self.state.channels.lock().clone()
    }

    /// The most recently opened channel.
    pub fn latest(&self) -> Option<MockChannel> {
        self.state.channels.lock().last().cloned()
    }
}

#[async_trait]
impl ChannelTransport for MockTransport {
    async fn connect(&self) -> Result<TransportSession, NotifyError> {
        let _ = self.state.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.state.failures.lock().pop_front() {
            return Err(error);
        }

        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        let cancel = CancellationToken::new();
        let connection_id = ConnectionId::new(format!("mock-{}", Uuid::now_v7()));
        self.state.channels.lock().push(MockChannel {
            id: connection_id.clone(),
            frames: tx,
            cancel: cancel.clone(),
        });

        Ok(TransportSession {
            connection_id,
            frames: rx,
            cancel,
            task: None,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subscription endpoint
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct ApiState {
    log: Mutex<Vec<(SubscriptionRequest, PushOutcome)>>,
    refused: Mutex<HashMap<Topic, String>>,
    failures: Mutex<VecDeque<NotifyError>>,
}

/// Subscription endpoint that records what it was sent.
#[derive(Clone, Default)]
pub struct MockSubscriptionApi {
    state: Arc<ApiState>,
}

impl MockSubscriptionApi {
    /// Endpoint that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse `topic` in every add/replace from now on.
    pub fn refuse(&self, topic: impl Into<Topic>, reason: &str) {
        let _ = self
            .state
            .refused
            .lock()
            .insert(topic.into(), reason.to_owned());
    }

    /// Stop refusing `topic`.
    pub fn allow(&self, topic: &Topic) {
        let _ = self.state.refused.lock().remove(topic);
    }

    /// Fail the next `count` pushes with `error`. Failed pushes are not
    /// recorded.
    pub fn fail_next(&self, count: usize, error: NotifyError) {
        let mut failures = self.state.failures.lock();
        failures.extend(std::iter::repeat_n(error, count));
    }

    /// Every push that reached the endpoint, in order.
    pub fn requests(&self) -> Vec<SubscriptionRequest> {
        self.state.log.lock().iter().map(|(r, _)| r.clone()).collect()
    }

    /// Recorded pushes with the given operation.
    pub fn requests_with(&self, operation: Operation) -> Vec<SubscriptionRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.operation == operation)
            .collect()
    }

    /// Forget recorded pushes.
    pub fn clear(&self) {
        self.state.log.lock().clear();
    }

    /// The server's subscription list for `connection_id`, rebuilt from the
    /// accepted parts of every recorded push.
    pub fn server_view(&self, connection_id: &ConnectionId) -> BTreeSet<Topic> {
        let mut view = BTreeSet::new();
        for (request, outcome) in self.state.log.lock().iter() {
            if &request.connection_id != connection_id {
                continue;
            }
            if request.operation == Operation::Replace {
                view.clear();
            }
            for result in outcome.results.iter().filter(|r| r.accepted) {
                match request.operation {
                    Operation::Add | Operation::Replace => {
                        let _ = view.insert(result.topic.clone());
                    }
                    Operation::Remove => {
                        let _ = view.remove(&result.topic);
                    }
                }
            }
        }
        view
    }
}

#[async_trait]
impl SubscriptionApi for MockSubscriptionApi {
    async fn push(&self, request: &SubscriptionRequest) -> Result<PushOutcome, NotifyError> {
        if let Some(error) = self.state.failures.lock().pop_front() {
            return Err(error);
        }

        let outcome = {
            let refused = self.state.refused.lock();
            PushOutcome {
                results: request
                    .topics
                    .iter()
                    .map(|topic| {
                        let reason = match request.operation {
                            Operation::Remove => None,
                            Operation::Add | Operation::Replace => refused.get(topic).cloned(),
                        };
                        TopicResult {
                            topic: topic.clone(),
                            accepted: reason.is_none(),
                            reason,
                        }
                    })
                    .collect(),
            }
        };

        self.state.log.lock().push((request.clone(), outcome.clone()));
        Ok(outcome)
    }
}

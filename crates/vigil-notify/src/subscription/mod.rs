//! The Subscription Manager.
//!
//! Owns the caller's desired topic set and keeps the server's view of it in
//! sync for whichever channel is current. The set, the current channel, and
//! every remote push are serialized behind one async mutex, so a reconnect
//! can never race an `add` onto a stale connection id. Opening a channel and
//! the backoff sleeps between attempts happen without the lock.
//!
//! The set changes only through `add` and `remove`. Topics the server refuses
//! while a lost channel is being replayed stay in the set and are reported
//! through [`SubscriptionManager::refused`].
//!
//! Newly opened channels are handed to the supervisor through the receiver
//! returned by [`SubscriptionManager::new`]; channels opened by
//! [`reconnect`](SubscriptionManager::reconnect) are returned directly.

mod api;
mod http;

pub use api::{Operation, PushOutcome, SubscriptionApi, SubscriptionRequest, TopicResult};
pub use http::HttpSubscriptionApi;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_core::retry::RetryConfig;
use vigil_core::{ConnectionId, NotifyError, RejectedTopic, Topic};
use vigil_settings::VigilSettings;

use crate::channel::{ChannelConnection, ChannelHandle, ChannelState, ChannelTransport};

/// Tuning for the manager.
#[derive(Clone, Debug, PartialEq)]
pub struct SubscriptionConfig {
    /// Channel open backoff; `max_attempts` bounds every open.
    pub retry: RetryConfig,
    /// Most topics sent in one push.
    pub max_topics_per_request: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            max_topics_per_request: 1000,
        }
    }
}

impl SubscriptionConfig {
    /// Take the relevant sections from loaded settings.
    pub fn from_settings(settings: &VigilSettings) -> Self {
        Self {
            retry: settings.retry.clone(),
            max_topics_per_request: settings.subscription.max_topics_per_request,
        }
    }
}

/// Which channel the server-side list belongs to.
enum Link {
    /// No channel is open or being opened.
    Idle,
    /// The first channel is being opened; changes are recorded locally and
    /// included in its initial `replace`.
    Opening,
    /// Live channel with the server in sync.
    Active(ChannelHandle),
    /// Channel lost; changes are recorded locally and replayed on reconnect.
    Degraded,
}

struct Inner {
    desired: BTreeSet<Topic>,
    /// Topics in `desired` the server refused outside an `add`, with reasons.
    refused: BTreeMap<Topic, String>,
    link: Link,
    closed: bool,
}

impl Inner {
    /// The live channel, if any. A handle closed underneath us (the
    /// supervisor saw the stream end) demotes the link to `Degraded` so no
    /// push goes to its connection id.
    fn live(&mut self) -> Option<ChannelHandle> {
        match &self.link {
            Link::Active(handle) if handle.is_closed() => {
                debug!(
                    connection_id = %handle.connection_id(),
                    "channel already closed, deferring to replay"
                );
                self.link = Link::Degraded;
                None
            }
            Link::Active(handle) => Some(handle.clone()),
            Link::Idle | Link::Opening | Link::Degraded => None,
        }
    }
}

/// Reconciles the desired topic set with the server.
pub struct SubscriptionManager {
    inner: Mutex<Inner>,
    transport: Arc<dyn ChannelTransport>,
    api: Arc<dyn SubscriptionApi>,
    config: SubscriptionConfig,
    state: watch::Sender<ChannelState>,
    handoff: mpsc::UnboundedSender<ChannelConnection>,
    shutdown: CancellationToken,
}

impl SubscriptionManager {
    /// Create a manager. The receiver yields the channel opened by the first
    /// successful `add`.
    pub fn new(
        transport: Arc<dyn ChannelTransport>,
        api: Arc<dyn SubscriptionApi>,
        config: SubscriptionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelConnection>) {
        let (handoff, channels) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ChannelState::Disconnected);
        let manager = Self {
            inner: Mutex::new(Inner {
                desired: BTreeSet::new(),
                refused: BTreeMap::new(),
                link: Link::Idle,
                closed: false,
            }),
            transport,
            api,
            config,
            state,
            handoff,
            shutdown: CancellationToken::new(),
        };
        (manager, channels)
    }

    /// Add topics to the desired set.
    ///
    /// Topics already present are ignored; if nothing is new no remote call is
    /// made. The first effective add opens the channel and pushes a `replace`
    /// of the full set; later ones push an incremental `add`. While the
    /// channel is being opened or is degraded the topics are only recorded
    /// locally.
    ///
    /// On any refusal every topic new in this call is rolled back, the ones
    /// the server did accept are removed remotely (best effort), and
    /// `NotifyError::Subscription` lists the refused topics.
    pub async fn add(&self, topics: impl IntoIterator<Item = Topic>) -> Result<(), NotifyError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(NotifyError::Closed);
        }

        let new: Vec<Topic> = topics
            .into_iter()
            .filter(|t| !inner.desired.contains(t))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if new.is_empty() {
            return Ok(());
        }
        inner.desired.extend(new.iter().cloned());

        if let Some(handle) = inner.live() {
            return self.incremental_add(&mut inner, &handle, &new).await;
        }
        if matches!(inner.link, Link::Idle) {
            return self.first_subscribe(inner, &new).await;
        }
        self.publish_if_lost(&inner);
        debug!(count = new.len(), "no live channel, topics recorded for replay");
        Ok(())
    }

    /// Remove topics from the desired set.
    ///
    /// The remote `remove` is best effort: a failure is logged and the call
    /// still succeeds.
    pub async fn remove(&self, topics: impl IntoIterator<Item = Topic>) -> Result<(), NotifyError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(NotifyError::Closed);
        }

        let present: Vec<Topic> = topics
            .into_iter()
            .filter(|t| inner.desired.contains(t))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if present.is_empty() {
            return Ok(());
        }
        for topic in &present {
            let _ = inner.desired.remove(topic);
            let _ = inner.refused.remove(topic);
        }

        match inner.live() {
            Some(handle) => {
                self.push_best_effort(handle.connection_id(), Operation::Remove, &present)
                    .await;
            }
            None => self.publish_if_lost(&inner),
        }
        Ok(())
    }

    /// Replace the lost channel and replay the full set onto the new one.
    ///
    /// Opens with exponential backoff plus jitter, bounded by
    /// `retry.max_attempts`. A failed replay push counts as a failed attempt.
    /// Topics refused during the replay stay in the set and are reported by
    /// [`refused`](Self::refused). When attempts run out the manager is
    /// closed for good and `NotifyError::Connection` is returned.
    pub async fn reconnect(&self) -> Result<ChannelConnection, NotifyError> {
        {
            let mut inner = self.inner.lock().await;
            if inner.closed {
                return Err(NotifyError::Closed);
            }
            if let Link::Active(handle) = &inner.link {
                handle.close();
            }
            inner.link = Link::Degraded;
            self.publish(ChannelState::Reconnecting);
        }

        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut last_error = NotifyError::Connection("no attempt made".into());

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let delay = self.config.retry.delay_for(attempt - 1, rand::random::<f64>());
                debug!(attempt, delay_ms = delay.as_millis(), "backing off before reconnect");
                tokio::select! {
                    () = self.shutdown.cancelled() => return Err(NotifyError::Closed),
                    () = tokio::time::sleep(delay) => {}
                }
            }

            let mut channel = match ChannelConnection::open(self.transport.as_ref()).await {
                Ok(channel) => channel,
                Err(e) if e.is_retryable() => {
                    warn!(attempt, error = %e, "reconnect attempt failed");
                    last_error = e;
                    continue;
                }
                Err(e) => {
                    self.close_after_failure().await;
                    return Err(e);
                }
            };

            match self.replay(&channel).await {
                Ok(()) => return Ok(channel),
                Err(e) if e.is_retryable() => {
                    warn!(attempt, error = %e, "replay failed, retrying with a new channel");
                    channel.close().await;
                    last_error = e;
                }
                Err(e) => {
                    channel.close().await;
                    if !matches!(e, NotifyError::Closed) {
                        self.close_after_failure().await;
                    }
                    return Err(e);
                }
            }
        }

        warn!(attempts = max_attempts, error = %last_error, "reconnect attempts exhausted");
        self.close_after_failure().await;
        Err(last_error)
    }

    /// Record that the channel `connection_id` was lost.
    ///
    /// Ignored when `connection_id` is not the current channel.
    pub async fn mark_degraded(&self, connection_id: &ConnectionId) {
        let mut inner = self.inner.lock().await;
        let current = matches!(&inner.link, Link::Active(h) if h.connection_id() == connection_id);
        if !current {
            debug!(%connection_id, "ignoring loss of stale channel");
            return;
        }
        inner.link = Link::Degraded;
        if !inner.closed {
            self.publish(ChannelState::Degraded);
        }
    }

    /// Reject further calls and close the current channel. Idempotent.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return;
        }
        inner.closed = true;
        if let Link::Active(handle) = &inner.link {
            handle.close();
        }
        inner.link = Link::Idle;
        self.publish(ChannelState::Closed);
        info!(topic_count = inner.desired.len(), "subscription manager closed");
    }

    /// Snapshot of the desired set.
    pub async fn topics(&self) -> BTreeSet<Topic> {
        self.inner.lock().await.desired.clone()
    }

    /// Topics kept in the set that the server refused on the current
    /// channel's replay.
    pub async fn refused(&self) -> Vec<RejectedTopic> {
        self.inner
            .lock()
            .await
            .refused
            .iter()
            .map(|(topic, reason)| RejectedTopic {
                topic: topic.clone(),
                reason: reason.clone(),
            })
            .collect()
    }

    /// Id of the live channel, if any.
    pub async fn connection_id(&self) -> Option<ConnectionId> {
        match &self.inner.lock().await.link {
            Link::Active(handle) if !handle.is_closed() => Some(handle.connection_id().clone()),
            Link::Idle | Link::Opening | Link::Active(_) | Link::Degraded => None,
        }
    }

    /// Current channel state.
    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Subscribe to channel state changes.
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    // ─── internals ───────────────────────────────────────────────────────

    /// Open the first channel without holding the lock, then push a
    /// `replace` of whatever the set holds by then.
    async fn first_subscribe(
        &self,
        mut inner: MutexGuard<'_, Inner>,
        new: &[Topic],
    ) -> Result<(), NotifyError> {
        inner.link = Link::Opening;
        self.publish(ChannelState::Connecting);
        drop(inner);

        let opened = self.open_with_retry().await;

        let mut inner = self.inner.lock().await;
        let mut channel = match opened {
            Ok(channel) if inner.closed => {
                drop(inner);
                let mut channel = channel;
                channel.close().await;
                return Err(NotifyError::Closed);
            }
            Ok(channel) => channel,
            Err(e) => {
                if !inner.closed {
                    rollback(&mut inner, new);
                    inner.link = Link::Idle;
                    self.publish(ChannelState::Disconnected);
                }
                return Err(e);
            }
        };

        let all: Vec<Topic> = inner.desired.iter().cloned().collect();
        let outcome = match self
            .push_chunked(channel.connection_id(), Operation::Replace, &all)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                rollback(&mut inner, new);
                inner.link = Link::Idle;
                channel.close().await;
                self.publish(ChannelState::Disconnected);
                return Err(e);
            }
        };

        let id = channel.connection_id().clone();
        inner.link = Link::Active(channel.handle());
        self.publish(ChannelState::Connected);
        info!(connection_id = %id, topic_count = all.len(), "channel subscribed");
        if self.handoff.send(channel).is_err() {
            debug!("no supervisor is receiving channels");
        }

        // Refusals of topics added while the channel was opening are not
        // this call's to roll back.
        let rejected = outcome.rejected();
        for refused in rejected.iter().filter(|r| !new.contains(&r.topic)) {
            warn!(
                topic = %refused.topic,
                reason = %refused.reason,
                "topic refused on initial replace"
            );
            let _ = inner
                .refused
                .insert(refused.topic.clone(), refused.reason.clone());
        }
        self.settle(&mut inner, &id, new, &outcome).await
    }

    async fn incremental_add(
        &self,
        inner: &mut Inner,
        handle: &ChannelHandle,
        new: &[Topic],
    ) -> Result<(), NotifyError> {
        let id = handle.connection_id().clone();
        match self.push_chunked(&id, Operation::Add, new).await {
            Ok(outcome) => self.settle(inner, &id, new, &outcome).await,
            Err(e) if e.is_retryable() => {
                warn!(
                    connection_id = %id,
                    error = %e,
                    "subscription push failed, channel will be replaced"
                );
                inner.link = Link::Degraded;
                self.publish(ChannelState::Degraded);
                handle.close();
                Ok(())
            }
            Err(e) => {
                rollback(inner, new);
                Err(e)
            }
        }
    }

    /// Roll back `new` if any of it was refused and undo what the server did
    /// accept.
    async fn settle(
        &self,
        inner: &mut Inner,
        id: &ConnectionId,
        new: &[Topic],
        outcome: &PushOutcome,
    ) -> Result<(), NotifyError> {
        let rejected: Vec<RejectedTopic> = outcome
            .rejected()
            .into_iter()
            .filter(|r| new.contains(&r.topic))
            .collect();
        if rejected.is_empty() {
            return Ok(());
        }

        rollback(inner, new);
        let accepted: Vec<Topic> = outcome
            .accepted()
            .into_iter()
            .filter(|t| new.contains(t))
            .collect();
        warn!(
            rejected = rejected.len(),
            rolled_back = new.len(),
            "subscription rejected, rolling back"
        );
        self.push_best_effort(id, Operation::Remove, &accepted).await;
        Err(NotifyError::Subscription { rejected })
    }

    /// Push the full set onto a freshly opened channel and make it current.
    async fn replay(&self, channel: &ChannelConnection) -> Result<(), NotifyError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(NotifyError::Closed);
        }

        let all: Vec<Topic> = inner.desired.iter().cloned().collect();
        let outcome = self
            .push_chunked(channel.connection_id(), Operation::Replace, &all)
            .await?;

        inner.refused.clear();
        for refused in outcome.rejected() {
            warn!(
                topic = %refused.topic,
                reason = %refused.reason,
                "topic refused during replay, kept for the next replace"
            );
            let _ = inner.refused.insert(refused.topic, refused.reason);
        }

        inner.link = Link::Active(channel.handle());
        self.publish(ChannelState::Connected);
        info!(
            connection_id = %channel.connection_id(),
            topic_count = inner.desired.len(),
            refused = inner.refused.len(),
            "channel replaced and resubscribed"
        );
        Ok(())
    }

    async fn open_with_retry(&self) -> Result<ChannelConnection, NotifyError> {
        let max_attempts = self.config.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match ChannelConnection::open(self.transport.as_ref()).await {
                Ok(channel) => return Ok(channel),
                Err(e) if e.is_retryable() && attempt + 1 < max_attempts => {
                    let delay = self.config.retry.delay_for(attempt, rand::random::<f64>());
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "channel open failed, retrying"
                    );
                    attempt += 1;
                    tokio::select! {
                        () = self.shutdown.cancelled() => return Err(NotifyError::Closed),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send `topics` in batches of at most `max_topics_per_request`.
    ///
    /// A `replace` larger than one batch becomes one `replace` followed by
    /// `add`s. An empty `replace` is still sent so the server list is cleared.
    async fn push_chunked(
        &self,
        id: &ConnectionId,
        operation: Operation,
        topics: &[Topic],
    ) -> Result<PushOutcome, NotifyError> {
        if topics.is_empty() {
            if operation == Operation::Replace {
                return self
                    .api
                    .push(&SubscriptionRequest {
                        connection_id: id.clone(),
                        operation,
                        topics: Vec::new(),
                    })
                    .await;
            }
            return Ok(PushOutcome::default());
        }

        let size = self.config.max_topics_per_request.max(1);
        let mut outcome = PushOutcome::default();
        for (i, chunk) in topics.chunks(size).enumerate() {
            let op = if operation == Operation::Replace && i > 0 {
                Operation::Add
            } else {
                operation
            };
            let request = SubscriptionRequest {
                connection_id: id.clone(),
                operation: op,
                topics: chunk.to_vec(),
            };
            outcome.extend(self.api.push(&request).await?);
        }
        Ok(outcome)
    }

    async fn push_best_effort(&self, id: &ConnectionId, operation: Operation, topics: &[Topic]) {
        if topics.is_empty() {
            return;
        }
        match self.push_chunked(id, operation, topics).await {
            Ok(outcome) => {
                for refused in outcome.rejected() {
                    warn!(
                        topic = %refused.topic,
                        reason = %refused.reason,
                        %operation,
                        "server refused best-effort push"
                    );
                }
            }
            Err(e) => {
                warn!(connection_id = %id, %operation, error = %e, "best-effort push failed");
            }
        }
    }

    async fn close_after_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        inner.link = Link::Idle;
        self.shutdown.cancel();
        self.publish(ChannelState::Closed);
    }

    /// Reflect a link demoted by [`Inner::live`] in the published state.
    fn publish_if_lost(&self, inner: &Inner) {
        if matches!(inner.link, Link::Degraded) && self.state() == ChannelState::Connected {
            self.publish(ChannelState::Degraded);
        }
    }

    fn publish(&self, state: ChannelState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "channel state changed");
        }
    }
}

fn rollback(inner: &mut Inner, new: &[Topic]) {
    for topic in new {
        let _ = inner.desired.remove(topic);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;
    use crate::mock::{MockSubscriptionApi, MockTransport};

    fn manager(
        transport: &MockTransport,
        api: &MockSubscriptionApi,
        chunk: usize,
    ) -> (
        SubscriptionManager,
        mpsc::UnboundedReceiver<ChannelConnection>,
    ) {
        SubscriptionManager::new(
            Arc::new(transport.clone()),
            Arc::new(api.clone()),
            SubscriptionConfig {
                retry: RetryConfig {
                    max_attempts: 3,
                    base_delay_ms: 1,
                    max_delay_ms: 2,
                    jitter_factor: 0.0,
                },
                max_topics_per_request: chunk,
            },
        )
    }

    fn topics(names: &[&str]) -> Vec<Topic> {
        names.iter().map(|n| Topic::new(*n)).collect()
    }

    #[tokio::test]
    async fn first_add_opens_and_replaces() {
        let (transport, api) = (MockTransport::new(), MockSubscriptionApi::new());
        let (manager, mut channels) = manager(&transport, &api, 100);

        manager.add(topics(&["b", "a"])).await.unwrap();

        assert_eq!(transport.connect_count(), 1);
        let requests = api.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].operation, Operation::Replace);
        assert_eq!(requests[0].topics, topics(&["a", "b"]));
        assert_eq!(manager.state(), ChannelState::Connected);
        assert!(channels.try_recv().is_ok());
    }

    #[tokio::test]
    async fn replace_is_chunked() {
        let (transport, api) = (MockTransport::new(), MockSubscriptionApi::new());
        let (manager, _channels) = manager(&transport, &api, 2);

        manager.add(topics(&["a", "b", "c", "d", "e"])).await.unwrap();

        let ops: Vec<(Operation, usize)> = api
            .requests()
            .iter()
            .map(|r| (r.operation, r.topics.len()))
            .collect();
        assert_eq!(
            ops,
            vec![
                (Operation::Replace, 2),
                (Operation::Add, 2),
                (Operation::Add, 1)
            ]
        );
    }

    #[tokio::test]
    async fn open_exhaustion_rolls_back() {
        let (transport, api) = (MockTransport::new(), MockSubscriptionApi::new());
        transport.fail_next(3, NotifyError::Connection("refused".into()));
        let (manager, _channels) = manager(&transport, &api, 100);

        let err = manager.add(topics(&["a"])).await.unwrap_err();
        assert_matches!(err, NotifyError::Connection(_));
        assert!(manager.topics().await.is_empty());
        assert_eq!(transport.connect_count(), 3);
        assert_eq!(manager.state(), ChannelState::Disconnected);
        assert!(api.requests().is_empty());

        // not terminal: a later add may still connect
        manager.add(topics(&["a"])).await.unwrap();
        assert_eq!(manager.state(), ChannelState::Connected);
    }

    #[tokio::test]
    async fn first_open_backoff_does_not_hold_the_lock() {
        let (transport, api) = (MockTransport::new(), MockSubscriptionApi::new());
        transport.fail_next(2, NotifyError::Connection("refused".into()));
        let (manager, _channels) = SubscriptionManager::new(
            Arc::new(transport.clone()),
            Arc::new(api.clone()),
            SubscriptionConfig {
                retry: RetryConfig {
                    max_attempts: 3,
                    base_delay_ms: 200,
                    max_delay_ms: 200,
                    jitter_factor: 0.0,
                },
                max_topics_per_request: 100,
            },
        );
        let manager = Arc::new(manager);

        let opener = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.add(topics(&["a"])).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snapshot = tokio::time::timeout(Duration::from_millis(100), manager.topics())
            .await
            .unwrap();
        assert_eq!(snapshot, BTreeSet::from([Topic::new("a")]));
        assert_eq!(manager.state(), ChannelState::Connecting);

        // recorded locally, then included in the opener's replace
        tokio::time::timeout(Duration::from_millis(100), manager.add(topics(&["b"])))
            .await
            .unwrap()
            .unwrap();
        assert!(api.requests().is_empty());

        opener.await.unwrap().unwrap();
        let requests = api.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].operation, Operation::Replace);
        assert_eq!(requests[0].topics, topics(&["a", "b"]));
        assert_eq!(transport.connect_count(), 3);
    }

    #[tokio::test]
    async fn close_during_first_open_wins() {
        let (transport, api) = (MockTransport::new(), MockSubscriptionApi::new());
        transport.fail_next(1, NotifyError::Connection("refused".into()));
        let (manager, _channels) = SubscriptionManager::new(
            Arc::new(transport.clone()),
            Arc::new(api.clone()),
            SubscriptionConfig {
                retry: RetryConfig {
                    max_attempts: 3,
                    base_delay_ms: 500,
                    max_delay_ms: 500,
                    jitter_factor: 0.0,
                },
                max_topics_per_request: 100,
            },
        );
        let manager = Arc::new(manager);
        let opener = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.add(topics(&["a"])).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        manager.close().await;
        assert_matches!(opener.await.unwrap(), Err(NotifyError::Closed));
        assert_eq!(manager.state(), ChannelState::Closed);
        assert_eq!(transport.connect_count(), 1);
        assert!(api.requests().is_empty());
    }

    #[tokio::test]
    async fn closed_handle_defers_to_replay() {
        let (transport, api) = (MockTransport::new(), MockSubscriptionApi::new());
        let (manager, mut channels) = manager(&transport, &api, 100);
        manager.add(topics(&["a"])).await.unwrap();
        let mut channel = channels.try_recv().unwrap();
        channel.close().await;
        api.clear();

        manager.add(topics(&["b"])).await.unwrap();
        manager.remove(topics(&["a"])).await.unwrap();

        assert!(api.requests().is_empty());
        assert_eq!(manager.state(), ChannelState::Degraded);
        assert!(manager.connection_id().await.is_none());
        assert_eq!(manager.topics().await, BTreeSet::from([Topic::new("b")]));
    }

    #[tokio::test]
    async fn auth_failure_not_retried() {
        let (transport, api) = (MockTransport::new(), MockSubscriptionApi::new());
        transport.fail_next(1, NotifyError::Auth("bad token".into()));
        let (manager, _channels) = manager(&transport, &api, 100);

        let err = manager.add(topics(&["a"])).await.unwrap_err();
        assert_matches!(err, NotifyError::Auth(_));
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn failed_incremental_push_degrades_and_keeps_topics() {
        let (transport, api) = (MockTransport::new(), MockSubscriptionApi::new());
        let (manager, mut channels) = manager(&transport, &api, 100);
        manager.add(topics(&["a"])).await.unwrap();
        let mut channel = channels.try_recv().unwrap();

        api.fail_next(1, NotifyError::Connection("502".into()));
        manager.add(topics(&["b"])).await.unwrap();

        assert_eq!(manager.state(), ChannelState::Degraded);
        assert_eq!(manager.topics().await.len(), 2);
        assert!(channel.is_closed());
        assert_matches!(
            channel.receive().await,
            Ok(crate::channel::Received::EndOfStream(crate::channel::StreamEnd::Closed))
        );
    }

    #[tokio::test]
    async fn mark_degraded_ignores_stale_ids() {
        let (transport, api) = (MockTransport::new(), MockSubscriptionApi::new());
        let (manager, _channels) = manager(&transport, &api, 100);
        manager.add(topics(&["a"])).await.unwrap();

        manager.mark_degraded(&ConnectionId::new("someone-else")).await;
        assert_eq!(manager.state(), ChannelState::Connected);

        let current = manager.connection_id().await.unwrap();
        manager.mark_degraded(&current).await;
        assert_eq!(manager.state(), ChannelState::Degraded);
        assert!(manager.connection_id().await.is_none());
    }

    #[tokio::test]
    async fn closed_manager_rejects_calls() {
        let (transport, api) = (MockTransport::new(), MockSubscriptionApi::new());
        let (manager, _channels) = manager(&transport, &api, 100);
        manager.add(topics(&["a"])).await.unwrap();

        manager.close().await;
        manager.close().await;
        assert_eq!(manager.state(), ChannelState::Closed);
        assert_matches!(manager.add(topics(&["b"])).await, Err(NotifyError::Closed));
        assert_matches!(manager.remove(topics(&["a"])).await, Err(NotifyError::Closed));
        assert_matches!(manager.reconnect().await, Err(NotifyError::Closed));
    }

    #[tokio::test]
    async fn state_changes_are_observable() {
        let (transport, api) = (MockTransport::new(), MockSubscriptionApi::new());
        let (manager, _channels) = manager(&transport, &api, 100);
        let mut rx = manager.watch_state();
        assert_eq!(*rx.borrow_and_update(), ChannelState::Disconnected);

        manager.add(topics(&["a"])).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ChannelState::Connected);
    }
}

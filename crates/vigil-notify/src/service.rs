//! The supervisor: runs the dispatch loop and replaces lost channels.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vigil_core::{DecodeError, Envelope, EventKind, NotifyError, Topic};

use crate::channel::{ChannelConnection, ChannelState, ChannelTransport, StreamEnd};
use crate::dispatcher::Dispatcher;
use crate::registry::TopicRegistry;
use crate::subscription::{SubscriptionApi, SubscriptionConfig, SubscriptionManager};

/// Default bound on [`NotificationService::shutdown`].
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

type LoopHandle = JoinHandle<Result<(), NotifyError>>;

/// Registry, dispatcher, and subscription manager wired to one supervisor
/// task.
///
/// The supervisor waits for the channel opened by the first `add`, runs the
/// dispatcher on it, and on `StreamEnd::Lost` asks the manager to reconnect
/// and replay. It ends when the service shuts down or reconnect attempts run
/// out.
pub struct NotificationService {
    registry: Arc<TopicRegistry>,
    dispatcher: Arc<Dispatcher>,
    manager: Arc<SubscriptionManager>,
    channels: Mutex<Option<mpsc::UnboundedReceiver<ChannelConnection>>>,
    task: Mutex<Option<LoopHandle>>,
    shutdown: CancellationToken,
}

impl NotificationService {
    /// Wire a service over a transport and subscription endpoint.
    pub fn new(
        transport: Arc<dyn ChannelTransport>,
        api: Arc<dyn SubscriptionApi>,
        config: SubscriptionConfig,
    ) -> Self {
        let registry = Arc::new(TopicRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(registry.clone()));
        let (manager, channels) = SubscriptionManager::new(transport, api, config);
        Self {
            registry,
            dispatcher,
            manager: Arc::new(manager),
            channels: Mutex::new(Some(channels)),
            task: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// The topic registry.
    pub fn registry(&self) -> &Arc<TopicRegistry> {
        &self.registry
    }

    /// The dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// The subscription manager.
    pub fn manager(&self) -> &Arc<SubscriptionManager> {
        &self.manager
    }

    /// Shorthand for [`Dispatcher::register_handler`].
    pub fn register_handler<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.dispatcher.register_handler(kind, handler);
    }

    /// Shorthand for [`Dispatcher::on_error`].
    pub fn on_error<F>(&self, hook: F)
    where
        F: Fn(&DecodeError) + Send + Sync + 'static,
    {
        self.dispatcher.on_error(hook);
    }

    /// Shorthand for [`SubscriptionManager::add`].
    pub async fn add(&self, topics: impl IntoIterator<Item = Topic>) -> Result<(), NotifyError> {
        self.manager.add(topics).await
    }

    /// Shorthand for [`SubscriptionManager::remove`].
    pub async fn remove(&self, topics: impl IntoIterator<Item = Topic>) -> Result<(), NotifyError> {
        self.manager.remove(topics).await
    }

    /// Current channel state.
    pub fn state(&self) -> ChannelState {
        self.manager.state()
    }

    /// Spawn the supervisor. Calling it again is a no-op.
    pub fn start(&self) {
        let Some(channels) = self.channels.lock().take() else {
            return;
        };
        let handle = tokio::spawn(supervise(
            self.dispatcher.clone(),
            self.manager.clone(),
            channels,
            self.shutdown.clone(),
        ));
        *self.task.lock() = Some(handle);
        info!("notification service started");
    }

    /// Resolves once the service is closed, by [`shutdown`](Self::shutdown)
    /// or because reconnect attempts ran out.
    pub async fn closed(&self) {
        let mut state = self.manager.watch_state();
        let _ = state.wait_for(|s| *s == ChannelState::Closed).await;
    }

    /// Whether the supervisor task has finished.
    pub fn is_finished(&self) -> bool {
        self.task.lock().as_ref().is_some_and(JoinHandle::is_finished)
    }

    /// Stop accepting add/remove, close the channel, and wait up to
    /// `timeout` for the in-flight handler and the supervisor to finish.
    ///
    /// Returns the supervisor's error if it had already failed.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), NotifyError> {
        self.shutdown.cancel();
        self.manager.close().await;

        let Some(mut handle) = self.task.lock().take() else {
            return Ok(());
        };
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(result)) => {
                info!("notification service stopped");
                result
            }
            Ok(Err(join_error)) => {
                error!(error = %join_error, "supervisor task failed");
                Err(NotifyError::Connection(format!("supervisor task failed: {join_error}")))
            }
            Err(_) => {
                warn!("shutdown timed out after {timeout:?}, aborting supervisor");
                handle.abort();
                Ok(())
            }
        }
    }
}

async fn supervise(
    dispatcher: Arc<Dispatcher>,
    manager: Arc<SubscriptionManager>,
    mut channels: mpsc::UnboundedReceiver<ChannelConnection>,
    shutdown: CancellationToken,
) -> Result<(), NotifyError> {
    let mut channel = tokio::select! {
        () = shutdown.cancelled() => return Ok(()),
        next = channels.recv() => match next {
            Some(channel) => channel,
            None => return Ok(()),
        },
    };

    loop {
        let report = dispatcher.run(&mut channel).await;
        channel.close().await;
        info!(
            connection_id = %channel.connection_id(),
            dispatched = report.dispatched,
            dropped = report.dropped,
            "channel ended"
        );

        if shutdown.is_cancelled() {
            return Ok(());
        }
        if let StreamEnd::Lost(reason) = &report.end {
            warn!(connection_id = %channel.connection_id(), %reason, "channel lost");
            manager.mark_degraded(channel.connection_id()).await;
        }

        match manager.reconnect().await {
            Ok(next) => channel = next,
            Err(NotifyError::Closed) => return Ok(()),
            Err(e) => {
                error!(error = %e, kind = e.error_kind(), "giving up on notification channel");
                return Err(e);
            }
        }
    }
}

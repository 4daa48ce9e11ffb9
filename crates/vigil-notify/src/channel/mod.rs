//! The persistent streaming connection.
//!
//! A [`ChannelConnection`] owns one live session handed out by a
//! [`ChannelTransport`]. [`receive`](ChannelConnection::receive) is the only
//! suspension point of the dispatch loop; another task interrupts it through
//! a cloned [`ChannelHandle`].

mod transport;
mod websocket;

pub use transport::{ChannelTransport, Frame, TransportSession};
pub use websocket::WebSocketTransport;

use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use vigil_core::{ConnectionId, NotifyError};

/// Lifecycle of the service's channel.
///
/// `Disconnected -> Connecting -> Connected -> (Degraded -> Reconnecting ->
/// Connected) -> Closed`. `Closed` is terminal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelState {
    /// No channel has been opened yet.
    #[default]
    Disconnected,
    /// The first handshake is in progress.
    Connecting,
    /// Streaming, with the server's view in sync.
    Connected,
    /// The channel was lost; no replacement yet.
    Degraded,
    /// A replacement is being opened and replayed.
    Reconnecting,
    /// Shut down, or reconnect attempts exhausted.
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Degraded => "degraded",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// How a stream ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEnd {
    /// Closed locally.
    Closed,
    /// Transport failure, keep-alive miss, or server-announced close.
    Lost(String),
}

/// Result of one [`ChannelConnection::receive`] call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Received {
    /// A raw text message.
    Message(String),
    /// The stream is over.
    EndOfStream(StreamEnd),
}

/// Cloneable id + closer for a channel owned by another task.
#[derive(Clone, Debug)]
pub struct ChannelHandle {
    id: ConnectionId,
    cancel: CancellationToken,
}

impl ChannelHandle {
    /// Connection id of the channel.
    pub fn connection_id(&self) -> &ConnectionId {
        &self.id
    }

    /// Interrupt the channel. A pending `receive()` returns
    /// `EndOfStream(Closed)`.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// One live streaming connection.
pub struct ChannelConnection {
    id: ConnectionId,
    frames: mpsc::Receiver<Frame>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    ended: bool,
}

impl ChannelConnection {
    /// Handshake through `transport`.
    pub async fn open(transport: &dyn ChannelTransport) -> Result<Self, NotifyError> {
        let session = transport.connect().await?;
        info!(connection_id = %session.connection_id, "channel opened");
        Ok(Self::from_session(session))
    }

    /// Wrap an already-established session.
    pub fn from_session(session: TransportSession) -> Self {
        Self {
            id: session.connection_id,
            frames: session.frames,
            cancel: session.cancel,
            task: session.task,
            ended: false,
        }
    }

    /// Server-assigned connection id.
    pub fn connection_id(&self) -> &ConnectionId {
        &self.id
    }

    /// A handle that can close this channel from another task.
    pub fn handle(&self) -> ChannelHandle {
        ChannelHandle {
            id: self.id.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Wait for the next message.
    ///
    /// After `EndOfStream` has been returned once the channel counts as
    /// closed and every further call fails with `NotifyError::Closed`.
    pub async fn receive(&mut self) -> Result<Received, NotifyError> {
        if self.ended {
            return Err(NotifyError::Closed);
        }

        let received = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Received::EndOfStream(StreamEnd::Closed),
            frame = self.frames.recv() => match frame {
                Some(Ok(text)) => Received::Message(text),
                Some(Err(reason)) => Received::EndOfStream(StreamEnd::Lost(reason)),
                None if self.cancel.is_cancelled() => Received::EndOfStream(StreamEnd::Closed),
                None => Received::EndOfStream(StreamEnd::Lost("stream ended".into())),
            },
        };

        if let Received::EndOfStream(end) = &received {
            debug!(connection_id = %self.id, ?end, "end of stream");
            self.ended = true;
            // Handles observe the loss before anyone reports it.
            self.cancel.cancel();
        }
        Ok(received)
    }

    /// Cancel the pump and wait for it to release the transport. Idempotent.
    pub async fn close(&mut self) {
        self.cancel.cancel();
        self.ended = true;
        self.frames.close();
        if let Some(task) = self.task.take() {
            let _ = task.await;
            debug!(connection_id = %self.id, "channel closed");
        }
    }

    /// Whether the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for ChannelConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for ChannelConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelConnection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

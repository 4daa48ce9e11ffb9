//! The transport seam under a [`ChannelConnection`](super::ChannelConnection).

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vigil_core::{ConnectionId, NotifyError};

/// One inbound frame: text payload, or the reason the transport failed.
pub type Frame = Result<String, String>;

/// A freshly handshaken connection.
///
/// The transport's pump forwards text frames into `frames` until `cancel`
/// fires or the socket fails. A failure is reported as a final `Err` frame.
pub struct TransportSession {
    /// Server-assigned connection id.
    pub connection_id: ConnectionId,
    /// Inbound frames.
    pub frames: mpsc::Receiver<Frame>,
    /// Cancels the pump and releases the socket.
    pub cancel: CancellationToken,
    /// The pump task, if the transport runs one.
    pub task: Option<JoinHandle<()>>,
}

/// Opens streaming connections.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Perform the handshake and start streaming.
    ///
    /// `NotifyError::Connection` on timeout, rejection, or transport failure;
    /// `NotifyError::Auth` when no token can be obtained.
    async fn connect(&self) -> Result<TransportSession, NotifyError>;
}

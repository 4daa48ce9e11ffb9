//! WebSocket transport: REST handshake, then a `tokio-tungstenite` stream.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vigil_auth::{AuthProvider, Credentials};
use vigil_core::{ConnectionId, NotifyError};
use vigil_settings::{ChannelSettings, ServiceSettings};

use super::transport::{ChannelTransport, Frame, TransportSession};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Channel creation response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelInfo {
    id: String,
    connect_uri: String,
}

/// Opens channels against the platform's notifications API.
pub struct WebSocketTransport {
    http: reqwest::Client,
    service: ServiceSettings,
    channel: ChannelSettings,
    auth: Arc<dyn AuthProvider>,
    credentials: Credentials,
}

impl WebSocketTransport {
    /// Build a transport from settings and an auth provider.
    pub fn new(
        service: ServiceSettings,
        channel: ChannelSettings,
        auth: Arc<dyn AuthProvider>,
        credentials: Credentials,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            service,
            channel,
            auth,
            credentials,
        }
    }

    /// Use a preconfigured HTTP client.
    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    async fn create_channel(&self) -> Result<ChannelInfo, NotifyError> {
        let token = self.auth.get_token(&self.credentials).await?;
        let url = self.service.channels_url();
        debug!(%url, "creating notification channel");

        let response = self
            .http
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, token.bearer())
            .timeout(self.channel.handshake_timeout())
            .send()
            .await
            .map_err(|e| NotifyError::Connection(format!("channel handshake: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(NotifyError::Auth(format!(
                "channels endpoint returned {status}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Connection(format!(
                "channels endpoint returned {status}: {body}"
            )));
        }

        response
            .json::<ChannelInfo>()
            .await
            .map_err(|e| NotifyError::Connection(format!("invalid channel response: {e}")))
    }
}

#[async_trait]
impl ChannelTransport for WebSocketTransport {
    async fn connect(&self) -> Result<TransportSession, NotifyError> {
        let info = self.create_channel().await?;

        let (ws, _) = time::timeout(
            self.channel.handshake_timeout(),
            connect_async(info.connect_uri.as_str()),
        )
        .await
        .map_err(|_| {
            NotifyError::Connection(format!(
                "websocket handshake timed out after {:?}",
                self.channel.handshake_timeout()
            ))
        })?
        .map_err(|e| NotifyError::Connection(format!("websocket connect: {e}")))?;

        let (tx, rx) = mpsc::channel(self.channel.frame_buffer.max(1));
        let cancel = CancellationToken::new();
        let connection_id = ConnectionId::new(info.id);
        let task = tokio::spawn(pump(
            ws,
            tx,
            cancel.clone(),
            self.channel.keepalive_interval(),
            self.channel.keepalive_timeout(),
        ));

        Ok(TransportSession {
            connection_id,
            frames: rx,
            cancel,
            task: Some(task),
        })
    }
}

/// Forward text frames until cancelled or the socket fails.
///
/// Pings every `interval`. Any inbound traffic counts as liveness; when none
/// has arrived for `timeout` the pump reports a keep-alive miss and exits.
async fn pump(
    ws: WsStream,
    frames: mpsc::Sender<Frame>,
    cancel: CancellationToken,
    interval: Duration,
    timeout: Duration,
) {
    let (mut sink, mut stream) = ws.split();
    let mut ping = time::interval_at(Instant::now() + interval, interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen = Instant::now();

    let failure = loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return;
            }
            _ = ping.tick() => {
                if last_seen.elapsed() >= timeout {
                    break format!("keep-alive missed: no traffic for {timeout:?}");
                }
                if let Err(e) = sink.send(Message::Ping(Vec::<u8>::new().into())).await {
                    break format!("ping failed: {e}");
                }
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    last_seen = Instant::now();
                    if frames.send(Ok(text.as_str().to_owned())).await.is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) => format!(
                            "server closed: {} {}",
                            u16::from(frame.code),
                            frame.reason.as_str()
                        ),
                        None => "server closed".to_string(),
                    };
                }
                Some(Ok(_)) => last_seen = Instant::now(),
                Some(Err(e)) => break format!("read failed: {e}"),
                None => break "stream ended".to_string(),
            },
        }
    };

    warn!(reason = %failure, "channel transport lost");
    let _ = frames.send(Err(failure)).await;
}

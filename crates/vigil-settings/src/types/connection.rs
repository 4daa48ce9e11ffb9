//! Endpoint, channel, and subscription settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Notification service endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceSettings {
    /// Base URL of the platform API.
    pub api_base_url: String,
    /// Path creating a notification channel (handshake).
    pub channels_path: String,
    /// Path of a channel's subscription list. `{id}` is the connection id.
    pub subscriptions_path: String,
    /// HTTP request timeout in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.mypurecloud.com".to_string(),
            channels_path: "/api/v2/notifications/channels".to_string(),
            subscriptions_path: "/api/v2/notifications/channels/{id}/subscriptions".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

impl ServiceSettings {
    /// Full URL of the channels endpoint.
    pub fn channels_url(&self) -> String {
        join_url(&self.api_base_url, &self.channels_path)
    }

    /// Full URL of the subscription endpoint for a connection id.
    pub fn subscriptions_url(&self, connection_id: &str) -> String {
        join_url(
            &self.api_base_url,
            &self.subscriptions_path.replace("{id}", connection_id),
        )
    }

    /// HTTP request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Push channel timing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelSettings {
    /// Bound on the handshake (channel creation plus socket upgrade).
    pub handshake_timeout_ms: u64,
    /// Interval between client pings.
    pub keepalive_interval_ms: u64,
    /// Silence after which the channel is considered lost.
    pub keepalive_timeout_ms: u64,
    /// Inbound frames buffered between the socket and the dispatch loop.
    pub frame_buffer: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 10_000,
            keepalive_interval_ms: 30_000,
            keepalive_timeout_ms: 90_000,
            frame_buffer: 256,
        }
    }
}

impl ChannelSettings {
    /// Handshake bound.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Ping interval.
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    /// Silence bound.
    pub fn keepalive_timeout(&self) -> Duration {
        Duration::from_millis(self.keepalive_timeout_ms)
    }
}

/// Subscription push limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscriptionSettings {
    /// Most topics sent in one push request.
    pub max_topics_per_request: usize,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            max_topics_per_request: 1000,
        }
    }
}

//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]`. Each type implements
//! [`Default`] with production default values, and `#[serde(default)]` allows
//! partial JSON: missing fields get their default value during
//! deserialization.

mod collaborators;
mod connection;

pub use collaborators::*;
pub use connection::*;

use serde::{Deserialize, Serialize};
use vigil_core::retry::RetryConfig;

use crate::errors::{Result, SettingsError};

/// Root settings type for vigil.
///
/// Loaded from `~/.vigil/settings.json` with defaults applied for missing
/// fields. Environment variables can override specific values.
///
/// # JSON Format
///
/// ```json
/// {
///   "service": { "apiBaseUrl": "https://api.example.test" },
///   "retry": { "maxAttempts": 5 },
///   "directory": { "groups": { "support": { "id": "g-1", "members": ["42"] } } }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VigilSettings {
    /// Settings schema version.
    pub version: String,
    /// Notification service endpoints.
    pub service: ServiceSettings,
    /// Push channel timing.
    pub channel: ChannelSettings,
    /// Subscription push limits.
    pub subscription: SubscriptionSettings,
    /// Reconnect backoff.
    pub retry: RetryConfig,
    /// Credentials handed to the auth provider.
    pub auth: AuthSettings,
    /// Static directory contents.
    pub directory: DirectorySettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
    /// Upper bound on graceful shutdown in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl Default for VigilSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            service: ServiceSettings::default(),
            channel: ChannelSettings::default(),
            subscription: SubscriptionSettings::default(),
            retry: RetryConfig::default(),
            auth: AuthSettings::default(),
            directory: DirectorySettings::default(),
            logging: LoggingSettings::default(),
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl VigilSettings {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.channel.keepalive_timeout_ms <= self.channel.keepalive_interval_ms {
            return Err(SettingsError::InvalidValue(format!(
                "channel.keepaliveTimeoutMs ({}) must exceed channel.keepaliveIntervalMs ({})",
                self.channel.keepalive_timeout_ms, self.channel.keepalive_interval_ms
            )));
        }
        if self.subscription.max_topics_per_request == 0 {
            return Err(SettingsError::InvalidValue(
                "subscription.maxTopicsPerRequest must be at least 1".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(SettingsError::InvalidValue(
                "retry.maxAttempts must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(SettingsError::InvalidValue(format!(
                "retry.jitterFactor ({}) must be within 0.0..=1.0",
                self.retry.jitter_factor
            )));
        }
        Ok(())
    }
}

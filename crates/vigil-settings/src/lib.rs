//! # vigil-settings
//!
//! Configuration with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`VigilSettings::default()`]
//! 2. **User file**: `~/.vigil/settings.json` or an explicit path (deep-merged over defaults)
//! 3. **Environment variables**: `VIGIL_*` overrides (highest priority)
//!
//! The loaded value is an explicit configuration object: callers pass the
//! relevant sections to constructors instead of reading a global.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let settings = VigilSettings::default();
        assert_eq!(settings.service.api_base_url, "https://api.mypurecloud.com");
        assert_eq!(settings.channel.keepalive_interval_ms, 30_000);
        assert_eq!(settings.channel.keepalive_timeout_ms, 90_000);
        assert_eq!(settings.subscription.max_topics_per_request, 1000);
        assert_eq!(settings.retry.max_attempts, 10);
        assert_eq!(settings.logging.level, "info");
        assert!(settings.directory.groups.is_empty());
        assert!(settings.validate().is_ok());
    }
}

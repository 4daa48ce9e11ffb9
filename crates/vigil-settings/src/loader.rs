//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`VigilSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply `VIGIL_*` environment variable overrides (highest priority)
//! 4. Validate cross-field constraints
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::VigilSettings;

/// Resolve the path to the settings file (`~/.vigil/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".vigil").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<VigilSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. Invalid JSON or values that
/// fail [`VigilSettings::validate`] are errors.
pub fn load_settings_from_path(path: &Path) -> Result<VigilSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<VigilSettings> {
    let defaults = serde_json::to_value(VigilSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Integers must parse and fall within the given range. Invalid values are
/// logged and ignored (fall back to file/default).
pub fn apply_env_overrides(settings: &mut VigilSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary lookup. Split out so tests do not have
/// to mutate the process environment.
fn apply_overrides(settings: &mut VigilSettings, lookup: impl Fn(&str) -> Option<String>) {
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let u64_in = |name: &str, min: u64, max: u64| {
        let val = lookup(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    };
    let usize_in = |name: &str, min: usize, max: usize| {
        let val = lookup(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    };

    // ── Service ─────────────────────────────────────────────────────
    if let Some(v) = string("VIGIL_API_BASE_URL") {
        settings.service.api_base_url = v;
    }

    // ── Auth ────────────────────────────────────────────────────────
    if let Some(v) = string("VIGIL_CLIENT_ID") {
        settings.auth.client_id = v;
    }
    if let Some(v) = string("VIGIL_CLIENT_SECRET") {
        settings.auth.client_secret = Some(v);
    }
    if let Some(v) = string("VIGIL_ACCESS_TOKEN") {
        settings.auth.access_token = Some(v);
    }

    // ── Channel ─────────────────────────────────────────────────────
    if let Some(v) = u64_in("VIGIL_HANDSHAKE_TIMEOUT_MS", 100, 120_000) {
        settings.channel.handshake_timeout_ms = v;
    }
    if let Some(v) = u64_in("VIGIL_KEEPALIVE_INTERVAL_MS", 1_000, 600_000) {
        settings.channel.keepalive_interval_ms = v;
    }
    if let Some(v) = u64_in("VIGIL_KEEPALIVE_TIMEOUT_MS", 1_000, 1_800_000) {
        settings.channel.keepalive_timeout_ms = v;
    }

    // ── Subscription / retry ────────────────────────────────────────
    if let Some(v) = usize_in("VIGIL_MAX_TOPICS_PER_REQUEST", 1, 10_000) {
        settings.subscription.max_topics_per_request = v;
    }
    if let Some(v) = u64_in("VIGIL_MAX_RECONNECT_ATTEMPTS", 1, 1_000) {
        settings.retry.max_attempts = u32::try_from(v).unwrap_or(u32::MAX);
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = string("VIGIL_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = string("VIGIL_LOG_FORMAT") {
        settings.logging.format = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"channel": {"a": 1, "b": 2}});
        let source = serde_json::json!({"channel": {"a": 10}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["channel"]["a"], 10);
        assert_eq!(merged["channel"]["b"], 2);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"members": [1, 2, 3]});
        let source = serde_json::json!({"members": [4]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["members"], serde_json::json!([4]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_new_keys_added() {
        let target = serde_json::json!({"a": 1});
        let source = serde_json::json!({"b": {"c": 2}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"]["c"], 2);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_file_layer(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.subscription.max_topics_per_request, 1000);
        assert_eq!(settings.retry.max_attempts, 10);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"retry": {"maxAttempts": 3}, "channel": {"keepaliveIntervalMs": 5000}}"#,
        )
        .unwrap();

        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.retry.base_delay_ms, 500);
        assert_eq!(settings.channel.keepalive_interval_ms, 5_000);
        assert_eq!(settings.channel.keepalive_timeout_ms, 90_000);
    }

    #[test]
    fn load_directory_groups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"directory": {"groups": {"support": {"id": "g-7", "members": ["42"]}}}}"#,
        )
        .unwrap();

        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.directory.groups["support"].id, "g-7");
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_invalid_combination() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"channel": {"keepaliveIntervalMs": 60000, "keepaliveTimeoutMs": 30000}}"#,
        )
        .unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::InvalidValue(_)));
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let mut settings = VigilSettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                ("VIGIL_API_BASE_URL", "http://localhost:1234"),
                ("VIGIL_ACCESS_TOKEN", "tok"),
                ("VIGIL_MAX_RECONNECT_ATTEMPTS", "4"),
                ("VIGIL_MAX_TOPICS_PER_REQUEST", "50"),
                ("VIGIL_LOG_FORMAT", "json"),
            ]),
        );
        assert_eq!(settings.service.api_base_url, "http://localhost:1234");
        assert_eq!(settings.auth.access_token.as_deref(), Some("tok"));
        assert_eq!(settings.retry.max_attempts, 4);
        assert_eq!(settings.subscription.max_topics_per_request, 50);
        assert_eq!(settings.logging.format, "json");
    }

    #[test]
    fn env_invalid_values_ignored() {
        let mut settings = VigilSettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                ("VIGIL_KEEPALIVE_INTERVAL_MS", "10"),
                ("VIGIL_MAX_TOPICS_PER_REQUEST", "lots"),
                ("VIGIL_CLIENT_ID", ""),
            ]),
        );
        assert_eq!(settings.channel.keepalive_interval_ms, 30_000);
        assert_eq!(settings.subscription.max_topics_per_request, 1000);
        assert_eq!(settings.auth.client_id, "");
    }

    // ── parse_*_range ───────────────────────────────────────────────

    #[test]
    fn parse_u64_bounds() {
        assert_eq!(parse_u64_range("30000", 1000, 600_000), Some(30_000));
        assert_eq!(parse_u64_range("500", 1000, 600_000), None);
        assert_eq!(parse_u64_range("700000", 1000, 600_000), None);
        assert_eq!(parse_u64_range("abc", 1000, 600_000), None);
    }

    #[test]
    fn parse_usize_bounds() {
        assert_eq!(parse_usize_range("50", 1, 10_000), Some(50));
        assert_eq!(parse_usize_range("0", 1, 10_000), None);
    }
}

//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`CourierSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::CourierSettings;

/// Resolve the settings file: `COURIER_CONFIG`, else `~/.courier/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(path) = read_env_string("COURIER_CONFIG") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".courier").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<CourierSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<CourierSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Defaults merged with the file at `path`, without env overrides.
pub fn load_file_layer(path: &Path) -> Result<CourierSettings> {
    let defaults = serde_json::to_value(CourierSettings::default())?;

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
/// Invalid values are ignored with a warning.
pub fn apply_env_overrides(settings: &mut CourierSettings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_u16("PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_string("HOST") {
        settings.server.host = v;
    }

    // ── Session ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("SESSION_PATH") {
        settings.session.path = v;
    }
    if let Some(v) = read_env_string("SESSION_ID") {
        settings.session.id = v;
    }
    if let Some(v) = read_env_string("SESSION_KEY_PATH") {
        settings.session.key_path = Some(v);
    }

    // ── Webhook ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("WEBHOOK_URL") {
        settings.webhook.url = Some(v);
    }
    if let Some(v) = read_env_string("WEBHOOK_PAYLOAD") {
        match serde_json::from_value(Value::String(v.clone())) {
            Ok(mode) => settings.webhook.payload = mode,
            Err(_) => tracing::warn!(key = "WEBHOOK_PAYLOAD", value = %v, "invalid relay payload, ignoring"),
        }
    }
    if let Some(v) = read_env_string("WEBHOOK_TOKEN") {
        settings.webhook.token = Some(v);
    }
    if let Some(v) = read_env_u64("WEBHOOK_TIMEOUT_MS", 100, 600_000) {
        settings.webhook.timeout_ms = v;
    }

    // ── Reconnect ───────────────────────────────────────────────────
    if let Some(v) = read_env_u64("RECONNECT_BASE_MS", 0, 3_600_000) {
        settings.reconnect.base_delay_ms = v;
    }
    if let Some(v) = read_env_u64("RECONNECT_MAX_MS", 0, 86_400_000) {
        settings.reconnect.max_delay_ms = v;
    }
    if let Some(v) = read_env_u64("RECONNECT_MAX_ATTEMPTS", 1, u64::from(u32::MAX)) {
        settings.reconnect.max_attempts = Some(v as u32);
    }

    // ── Bridge ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("BRIDGE_URL") {
        settings.bridge.url = v;
    }
    if let Some(v) = read_env_u64("BRIDGE_TIMEOUT_MS", 100, 600_000) {
        settings.bridge.request_timeout_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_string("LOG_FORMAT") {
        settings.logging.format = v;
    }
}

/// Reject combinations that cannot work at runtime.
pub fn validate(settings: &CourierSettings) -> Result<()> {
    if let Some(url) = &settings.webhook.url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(SettingsError::InvalidValue(format!(
                "webhook url must be http(s): {url}"
            )));
        }
    }
    if !(settings.bridge.url.starts_with("ws://") || settings.bridge.url.starts_with("wss://")) {
        return Err(SettingsError::InvalidValue(format!(
            "bridge url must be ws(s): {}",
            settings.bridge.url
        )));
    }
    if !(0.0..=1.0).contains(&settings.reconnect.jitter_factor) {
        return Err(SettingsError::InvalidValue(
            "reconnect jitterFactor must be within 0..=1".to_string(),
        ));
    }
    if settings.session.id.is_empty() || settings.session.id.contains(['/', '\\']) {
        return Err(SettingsError::InvalidValue(format!(
            "session id must be a plain name: {:?}",
            settings.session.id
        )));
    }
    Ok(())
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::RelayPayload;

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 3000, "host": "0.0.0.0"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    #[test]
    fn file_layer_missing_file_returns_defaults() {
        let settings = load_file_layer(Path::new("/nonexistent/courier.json")).unwrap();
        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.session.id, "default");
    }

    #[test]
    fn file_layer_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"webhook": {"url": "https://hooks.example/in", "payload": "normalized"}, "reconnect": {"maxAttempts": 5}}"#,
        )
        .unwrap();

        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.webhook.url.as_deref(), Some("https://hooks.example/in"));
        assert_eq!(settings.webhook.payload, RelayPayload::Normalized);
        assert_eq!(settings.reconnect.max_attempts, Some(5));
        assert_eq!(settings.reconnect.base_delay_ms, 1_000);
    }

    #[test]
    fn file_layer_invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();
        assert!(matches!(load_file_layer(&path), Err(SettingsError::Json(_))));
    }

    #[test]
    fn validate_rejects_non_http_webhook() {
        let mut settings = CourierSettings::default();
        settings.webhook.url = Some("ftp://hook".into());
        assert!(matches!(validate(&settings), Err(SettingsError::InvalidValue(_))));
    }

    #[test]
    fn validate_rejects_path_like_session_id() {
        let mut settings = CourierSettings::default();
        settings.session.id = "../escape".into();
        assert!(validate(&settings).is_err());
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(validate(&CourierSettings::default()).is_ok());
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("3000", 1, 65535), Some(3000));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("x", 1, 65535), None);
        assert_eq!(parse_u64_range("500", 100, 1000), Some(500));
        assert_eq!(parse_u64_range("50", 100, 1000), None);
    }
}

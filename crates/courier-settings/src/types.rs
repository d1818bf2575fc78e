//! Settings type definitions.
//!
//! All types use camelCase on the wire and implement [`Default`] with
//! production values, so a settings file only needs the keys it changes.

use courier_core::RelayPayload;
use serde::{Deserialize, Serialize};

/// Root settings for the gateway.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CourierSettings {
    pub server: ServerSettings,
    pub session: SessionSettings,
    pub webhook: WebhookSettings,
    pub reconnect: ReconnectSettings,
    pub bridge: BridgeSettings,
    pub logging: LoggingSettings,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Root directory holding one sub-directory per session.
    pub path: String,
    /// Session identifier (sub-directory name).
    pub id: String,
    /// When set, session files are sealed with the key stored here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            path: "./auth_info_baileys".to_string(),
            id: "default".to_string(),
            key_path: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebhookSettings {
    /// Destination URL. Relaying is disabled when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub payload: RelayPayload,
    /// Sent as `Authorization: Bearer <token>` when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub timeout_ms: u64,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            url: None,
            payload: RelayPayload::Raw,
            token: None,
            timeout_ms: 10_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectSettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
    /// Consecutive attempts before giving up. Unlimited when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter_factor: 0.2,
            max_attempts: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    /// WebSocket URL of the protocol bridge.
    pub url: String,
    pub request_timeout_ms: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:3100/bridge".to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    /// `json` or `text`.
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_port_and_path() {
        let settings = CourierSettings::default();
        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.session.path, "./auth_info_baileys");
        assert!(settings.webhook.url.is_none());
        assert_eq!(settings.webhook.payload, RelayPayload::Raw);
        assert!(settings.reconnect.max_attempts.is_none());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: CourierSettings =
            serde_json::from_str(r#"{"webhook": {"url": "http://hook", "payload": "both"}}"#)
                .unwrap();
        assert_eq!(settings.webhook.url.as_deref(), Some("http://hook"));
        assert_eq!(settings.webhook.payload, RelayPayload::Both);
        assert_eq!(settings.webhook.timeout_ms, 10_000);
        assert_eq!(settings.server.port, 3000);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(CourierSettings::default()).unwrap();
        assert_eq!(json["reconnect"]["baseDelayMs"], 1_000);
        assert_eq!(json["bridge"]["requestTimeoutMs"], 30_000);
        assert!(json["webhook"].get("url").is_none());
    }
}

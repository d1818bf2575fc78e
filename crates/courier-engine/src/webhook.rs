use std::sync::Arc;
use std::time::{Duration, Instant};

use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use courier_core::events::MESSAGES_UPSERT;
use courier_core::{InboundMessage, RelayPayload};
use courier_telemetry::{names, MetricsRecorder};

use crate::error::WebhookError;

/// Where and how inbound messages are relayed.
#[derive(Clone, Debug)]
pub struct WebhookConfig {
    /// Destination. `None` turns the dispatcher into a no-op.
    pub url: Option<String>,
    pub payload: RelayPayload,
    pub token: Option<SecretString>,
    pub timeout: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            payload: RelayPayload::Raw,
            token: None,
            timeout: Duration::from_secs(10),
        }
    }
}

struct DispatcherInner {
    config: WebhookConfig,
    client: reqwest::Client,
    metrics: Arc<MetricsRecorder>,
}

/// Best-effort relay of inbound messages to one HTTP subscriber.
///
/// Every delivery is a single POST on its own task: no retries, and a slow
/// or failing subscriber never holds up the next message.
#[derive(Clone)]
pub struct WebhookDispatcher {
    inner: Arc<DispatcherInner>,
}

impl std::fmt::Debug for WebhookDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookDispatcher")
            .field("url", &self.inner.config.url)
            .field("payload", &self.inner.config.payload)
            .finish_non_exhaustive()
    }
}

impl WebhookDispatcher {
    pub fn new(config: WebhookConfig, metrics: Arc<MetricsRecorder>) -> Self {
        Self::with_client(config, reqwest::Client::new(), metrics)
    }

    pub fn with_client(
        config: WebhookConfig,
        client: reqwest::Client,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                config,
                client,
                metrics,
            }),
        }
    }

    /// A dispatcher with no destination.
    pub fn disabled(metrics: Arc<MetricsRecorder>) -> Self {
        Self::new(WebhookConfig::default(), metrics)
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.config.url.is_some()
    }

    /// `{event: "messages.upsert", data}` for the configured relay form.
    pub fn envelope(&self, message: &InboundMessage) -> Result<Value, WebhookError> {
        let data = match self.inner.config.payload {
            RelayPayload::Raw => message.raw.as_value().clone(),
            RelayPayload::Normalized => to_value(&message.normalized)?,
            RelayPayload::Both => {
                let mut data = to_value(&message.normalized)?;
                if let Value::Object(fields) = &mut data {
                    let _ = fields.insert("raw".into(), message.raw.as_value().clone());
                }
                data
            }
        };
        Ok(json!({ "event": MESSAGES_UPSERT, "data": data }))
    }

    /// Spawn one delivery attempt and return without waiting for it.
    /// Returns `None` when no destination is configured.
    pub fn deliver(&self, message: &InboundMessage) -> Option<JoinHandle<()>> {
        if !self.is_enabled() {
            return None;
        }
        let dispatcher = self.clone();
        let message = message.clone();
        Some(tokio::spawn(async move {
            // Failures are already logged and counted inside `attempt`.
            let _ = dispatcher.attempt(&message).await;
        }))
    }

    /// Perform one delivery and report the outcome.
    pub async fn attempt(&self, message: &InboundMessage) -> Result<(), WebhookError> {
        let Some(url) = self.inner.config.url.as_deref() else {
            return Ok(());
        };
        let message_id = message.normalized.message_id.as_str();

        let result = match self.envelope(message) {
            Ok(body) => self.post(url, &body).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(()) => {
                self.inner
                    .metrics
                    .counter_inc(names::MESSAGES_RELAYED, &[], 1);
                debug!(message_id, "webhook delivered");
            }
            Err(e) => {
                self.inner.metrics.counter_inc(
                    names::WEBHOOK_FAILURES,
                    &[("kind", e.error_kind())],
                    1,
                );
                warn!(message_id, error = %e, kind = e.error_kind(), "webhook delivery failed");
            }
        }
        result
    }

    async fn post(&self, url: &str, body: &Value) -> Result<(), WebhookError> {
        let timeout = self.inner.config.timeout;
        let mut request = self.inner.client.post(url).timeout(timeout).json(body);
        if let Some(token) = &self.inner.config.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let started = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| WebhookError::from_reqwest(e, timeout))?;
        self.inner.metrics.histogram_observe(
            names::WEBHOOK_LATENCY_MS,
            &[],
            started.elapsed().as_secs_f64() * 1000.0,
        );

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(WebhookError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, WebhookError> {
    serde_json::to_value(value).map_err(|e| WebhookError::Encode(e.to_string()))
}

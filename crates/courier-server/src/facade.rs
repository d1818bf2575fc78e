//! The boundary the HTTP layer calls into.

use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use courier_core::{ConnectionState, Identity, SendError};
use courier_engine::{ConnectionHandle, EngineError};
use courier_telemetry::MetricSample;

/// Coarse connection status reported to API clients.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GatewayStatus {
    Connected { user: Identity },
    ScanQr { qr_code: String },
    /// Anything else: starting up, reconnecting, or logged out.
    Connecting,
}

impl From<&ConnectionState> for GatewayStatus {
    fn from(state: &ConnectionState) -> Self {
        match state {
            ConnectionState::Open { identity } => Self::Connected {
                user: identity.clone(),
            },
            ConnectionState::AwaitingPairing { qr } => Self::ScanQr {
                qr_code: qr.clone(),
            },
            _ => Self::Connecting,
        }
    }
}

/// What the pairing page should show.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QrView {
    AlreadyConnected,
    Pending(String),
    NotYetAvailable,
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub state: &'static str,
    pub uptime_secs: u64,
    pub metrics: Vec<MetricSample>,
}

/// Send, status and pairing entry points over a running connection manager.
#[derive(Debug)]
pub struct GatewayFacade {
    handle: ConnectionHandle,
    started_at: Instant,
}

impl GatewayFacade {
    pub fn new(handle: ConnectionHandle) -> Self {
        Self {
            handle,
            started_at: Instant::now(),
        }
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Send `message` to `jid`. The payload is handed to the transport as is.
    pub async fn send(&self, jid: &str, message: &Value) -> Result<Value, SendError> {
        debug!(jid, "outbound send requested");
        self.handle.send(jid, message).await
    }

    pub fn status(&self) -> GatewayStatus {
        GatewayStatus::from(&self.handle.current_state())
    }

    pub fn qr(&self) -> QrView {
        match self.handle.current_state() {
            ConnectionState::Open { .. } => QrView::AlreadyConnected,
            ConnectionState::AwaitingPairing { qr } => QrView::Pending(qr),
            _ => QrView::NotYetAvailable,
        }
    }

    /// Drop the stored session and start pairing again.
    pub async fn reinitialize(&self) -> Result<(), EngineError> {
        info!("reinitialize requested");
        self.handle.reinitialize().await
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "ok",
            state: self.handle.current_state().name(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            metrics: self.handle.metrics().snapshot(),
        }
    }
}

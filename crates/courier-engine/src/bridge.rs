//! WebSocket client for an out-of-process protocol bridge.
//!
//! The bridge owns the messaging network's wire protocol; this side only
//! relays JSON frames. On connect we send the stored credentials, then every
//! frame the bridge pushes becomes a [`TransportEvent`]. Outbound sends are
//! request/response frames correlated by id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use courier_core::wire::RawInboundEvent;
use courier_core::{
    BatchKind, CredentialUpdate, DisconnectReason, Identity, Session, Transport, TransportError,
    TransportEvent, TransportSession,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

type PendingTx = oneshot::Sender<Result<Value, TransportError>>;

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// `ws://` or `wss://` endpoint of the bridge.
    pub url: String,
    /// Bound on the WebSocket handshake and on each send round-trip.
    pub request_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:3100/bridge".into(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Frames pushed by the bridge.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeFrame {
    Qr {
        qr: String,
    },
    Open {
        user: Identity,
    },
    Close {
        #[serde(rename = "statusCode", default)]
        status_code: Option<u16>,
        #[serde(default)]
        message: String,
    },
    Creds(CredentialUpdate),
    Messages {
        #[serde(default = "notify")]
        kind: BatchKind,
        #[serde(default)]
        messages: Vec<RawInboundEvent>,
    },
    Result {
        id: u64,
        #[serde(default)]
        ok: bool,
        #[serde(default)]
        result: Value,
        #[serde(default)]
        error: Option<String>,
    },
}

fn notify() -> BatchKind {
    BatchKind::Notify
}

/// What one inbound frame means to the connection.
#[derive(Debug, PartialEq)]
enum Decoded {
    Event(TransportEvent),
    Reply {
        id: u64,
        result: Result<Value, String>,
    },
}

fn decode_frame(text: &str) -> Result<Decoded, TransportError> {
    let frame: BridgeFrame =
        serde_json::from_str(text).map_err(|e| TransportError::Protocol(e.to_string()))?;
    Ok(match frame {
        BridgeFrame::Qr { qr } => Decoded::Event(TransportEvent::PairingTokenIssued { qr }),
        BridgeFrame::Open { user } => {
            Decoded::Event(TransportEvent::ConnectionOpened { identity: user })
        }
        BridgeFrame::Close {
            status_code,
            message,
        } => Decoded::Event(TransportEvent::ConnectionClosed {
            reason: DisconnectReason::new(status_code, message),
        }),
        BridgeFrame::Creds(update) => Decoded::Event(TransportEvent::CredentialsRotated(update)),
        BridgeFrame::Messages { kind, messages } => {
            Decoded::Event(TransportEvent::InboundBatch { kind, messages })
        }
        BridgeFrame::Result {
            id,
            ok,
            result,
            error,
        } => Decoded::Reply {
            id,
            result: if ok {
                Ok(result)
            } else {
                Err(error.unwrap_or_else(|| "bridge rejected send".into()))
            },
        },
    })
}

/// [`Transport`] that talks to a protocol bridge over WebSocket.
pub struct BridgeTransport {
    config: BridgeConfig,
}

impl BridgeTransport {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transport for BridgeTransport {
    fn name(&self) -> &str {
        "bridge"
    }

    async fn connect(
        &self,
        session: &Session,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Arc<dyn TransportSession>, TransportError> {
        let timeout = self.config.request_timeout;
        let (mut ws, _) = tokio::time::timeout(timeout, connect_async(self.config.url.as_str()))
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        let hello = json!({
            "type": "connect",
            "session": session.id,
            "creds": session.creds,
            "keys": session.keys,
        });
        ws.send(Message::Text(hello.to_string().into()))
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        debug!(url = %self.config.url, registered = session.is_registered(), "bridge connected");

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let closed = CancellationToken::new();
        tokio::spawn(bridge_loop(ws, cmd_rx, events, closed.clone()));

        Ok(Arc::new(BridgeSession {
            cmd_tx,
            timeout,
            closed,
        }))
    }
}

struct SendCommand {
    to: String,
    payload: Value,
    response_tx: PendingTx,
}

struct BridgeSession {
    cmd_tx: mpsc::Sender<SendCommand>,
    timeout: Duration,
    closed: CancellationToken,
}

#[async_trait]
impl TransportSession for BridgeSession {
    async fn send(&self, to: &str, payload: &Value) -> Result<Value, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(SendCommand {
                to: to.to_string(),
                payload: payload.clone(),
                response_tx: tx,
            })
            .await
            .map_err(|_| TransportError::Closed)?;

        tokio::time::timeout(self.timeout, rx)
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
            .map_err(|_| TransportError::Closed)?
    }

    async fn close(&self) {
        self.closed.cancel();
    }
}

async fn bridge_loop(
    ws: WsStream,
    mut cmd_rx: mpsc::Receiver<SendCommand>,
    events: mpsc::Sender<TransportEvent>,
    closed: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut pending: HashMap<u64, PendingTx> = HashMap::new();
    let mut next_id: u64 = 0;

    let lost = loop {
        tokio::select! {
            _ = closed.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break None;
            }
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break None };
                next_id += 1;
                let id = next_id;
                let frame = json!({
                    "type": "send",
                    "id": id,
                    "to": cmd.to,
                    "payload": cmd.payload,
                });
                if let Err(e) = ws_tx.send(Message::Text(frame.to_string().into())).await {
                    let _ = cmd.response_tx.send(Err(TransportError::Network(e.to_string())));
                    break Some(DisconnectReason::new(None, format!("bridge write failed: {e}")));
                }
                let _ = pending.insert(id, cmd.response_tx);
            }
            msg = ws_rx.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(frame))) => {
                        let detail = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                        break Some(DisconnectReason::new(None, format!("bridge closed the socket {detail}").trim_end().to_string()));
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => break Some(DisconnectReason::new(None, format!("bridge connection lost: {e}"))),
                    None => break Some(DisconnectReason::new(None, "bridge connection lost")),
                };
                match decode_frame(text.as_str()) {
                    Ok(Decoded::Reply { id, result }) => {
                        if let Some(tx) = pending.remove(&id) {
                            let _ = tx.send(result.map_err(TransportError::Protocol));
                        }
                    }
                    Ok(Decoded::Event(event)) => {
                        let is_close = matches!(event, TransportEvent::ConnectionClosed { .. });
                        if events.send(event).await.is_err() || is_close {
                            break None;
                        }
                    }
                    Err(e) => warn!(error = %e, "ignoring malformed bridge frame"),
                }
            }
        }
    };

    for (_, tx) in pending.drain() {
        let _ = tx.send(Err(TransportError::Closed));
    }
    if let Some(reason) = lost {
        if !closed.is_cancelled() {
            warn!(reason = %reason, "bridge connection ended");
            let _ = events.send(TransportEvent::ConnectionClosed { reason }).await;
        }
    }
}

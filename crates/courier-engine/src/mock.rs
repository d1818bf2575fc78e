use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use courier_core::{Session, Transport, TransportError, TransportEvent, TransportSession};

/// What one `connect` call on a [`MockTransport`] does.
pub enum MockConnection {
    /// Succeed, then emit these events in order.
    Script(Vec<TransportEvent>),
    /// Fail the handshake outright.
    Fail(TransportError),
}

#[derive(Default)]
struct SessionLog {
    sent: Mutex<Vec<(String, Value)>>,
    fail_sends: AtomicBool,
    closes: AtomicUsize,
}

/// Scripted transport for deterministic tests of the connection lifecycle.
///
/// Each `connect` consumes the next [`MockConnection`]. Once the script runs
/// out, connections succeed and stay silent. The event sender of the latest
/// connection is kept so tests can [`emit`](Self::emit) more events.
pub struct MockTransport {
    connections: Mutex<VecDeque<MockConnection>>,
    connect_count: AtomicUsize,
    sessions_seen: Mutex<Vec<Session>>,
    live: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    log: Arc<SessionLog>,
}

impl MockTransport {
    pub fn new(connections: Vec<MockConnection>) -> Self {
        Self {
            connections: Mutex::new(connections.into()),
            connect_count: AtomicUsize::new(0),
            sessions_seen: Mutex::new(Vec::new()),
            live: Mutex::new(None),
            log: Arc::new(SessionLog::default()),
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connect_count.load(Ordering::SeqCst)
    }

    /// Sessions handed to `connect`, in call order.
    pub fn sessions_seen(&self) -> Vec<Session> {
        self.sessions_seen.lock().clone()
    }

    /// Outbound sends that reached the transport.
    pub fn sent(&self) -> Vec<(String, Value)> {
        self.log.sent.lock().clone()
    }

    pub fn close_count(&self) -> usize {
        self.log.closes.load(Ordering::SeqCst)
    }

    /// Make every subsequent `send` fail with a network error.
    pub fn fail_sends(&self, fail: bool) {
        self.log.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Push an event on the latest connection's channel.
    pub async fn emit(&self, event: TransportEvent) -> Result<(), TransportError> {
        let sender = self.live.lock().clone().ok_or(TransportError::Closed)?;
        sender.send(event).await.map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn connect(
        &self,
        session: &Session,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Arc<dyn TransportSession>, TransportError> {
        let _ = self.connect_count.fetch_add(1, Ordering::SeqCst);
        self.sessions_seen.lock().push(session.clone());

        let next = self
            .connections
            .lock()
            .pop_front()
            .unwrap_or(MockConnection::Script(Vec::new()));
        let script = match next {
            MockConnection::Fail(err) => return Err(err),
            MockConnection::Script(script) => script,
        };
        *self.live.lock() = Some(events.clone());
        // Emit from a task so a long script cannot fill the channel before
        // the caller starts reading.
        tokio::spawn(async move {
            for event in script {
                if events.send(event).await.is_err() {
                    break;
                }
            }
        });
        Ok(Arc::new(MockSession {
            log: Arc::clone(&self.log),
        }))
    }
}

struct MockSession {
    log: Arc<SessionLog>,
}

#[async_trait]
impl TransportSession for MockSession {
    async fn send(&self, to: &str, payload: &Value) -> Result<Value, TransportError> {
        if self.log.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Network("mock send failure".into()));
        }
        let mut sent = self.log.sent.lock();
        sent.push((to.to_string(), payload.clone()));
        Ok(json!({
            "key": {"remoteJid": to, "fromMe": true, "id": format!("MOCK{}", sent.len())},
            "status": "PENDING",
        }))
    }

    async fn close(&self) {
        let _ = self.log.closes.fetch_add(1, Ordering::SeqCst);
    }
}

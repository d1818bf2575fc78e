//! Connection lifecycle.
//!
//! One [`ConnectionManager`] task owns the transport connection and the
//! working copy of the session. Transport notifications arrive on a single
//! ordered channel per connection and are applied one at a time, so every
//! state change happens on that task. Other tasks talk to it through a
//! cloneable [`ConnectionHandle`].

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use courier_core::wire::RawInboundEvent;
use courier_core::{
    BatchKind, ConnectionState, DisconnectReason, InboundMessage, SendError, Session, SessionId,
    Transport, TransportEvent, TransportSession,
};
use courier_store::SessionStore;
use courier_telemetry::{names, MetricsRecorder};

use crate::error::EngineError;
use crate::normalizer::normalize_now;
use crate::reconnect::{ReconnectBudget, ReconnectPolicy};
use crate::webhook::WebhookDispatcher;

const TRANSITION_BUFFER: usize = 64;

#[derive(Clone, Debug)]
pub struct ManagerConfig {
    pub session_id: SessionId,
    pub reconnect: ReconnectPolicy,
    /// Capacity of each connection's event channel.
    pub channel_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            session_id: SessionId::from_raw("default"),
            reconnect: ReconnectPolicy::default(),
            channel_capacity: 256,
        }
    }
}

type Responder = oneshot::Sender<Result<(), EngineError>>;

enum Command {
    Reinitialize { done: Responder },
}

/// How a live connection ended.
enum Exit {
    Closed(DisconnectReason),
    Reinitialize(Responder),
    Cancelled,
}

/// What to do after a connection ended.
enum Resume {
    Reconnect,
    Reinitialize(Responder),
    Cancelled,
}

struct Shared {
    state: RwLock<ConnectionState>,
    transport: RwLock<Option<Arc<dyn TransportSession>>>,
    transitions: broadcast::Sender<ConnectionState>,
    metrics: Arc<MetricsRecorder>,
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        debug!(state = next.name(), "connection state changed");
        *self.state.write() = next.clone();
        let _ = self.transitions.send(next);
    }

    fn transport(&self) -> Option<Arc<dyn TransportSession>> {
        self.transport.read().clone()
    }
}

/// Cloneable control surface for a running [`ConnectionManager`].
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("state", &self.shared.state.read().name())
            .finish_non_exhaustive()
    }
}

impl ConnectionHandle {
    /// Snapshot of the current state.
    pub fn current_state(&self) -> ConnectionState {
        self.shared.state.read().clone()
    }

    /// Every state transition from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionState> {
        self.shared.transitions.subscribe()
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.shared.metrics
    }

    /// Send `payload` to `to` through the live connection.
    ///
    /// Fails with [`SendError::NotConnected`] without touching the transport
    /// unless the connection is open.
    pub async fn send(&self, to: &str, payload: &Value) -> Result<Value, SendError> {
        if !self.shared.state.read().is_open() {
            return Err(SendError::NotConnected);
        }
        let transport = self.shared.transport().ok_or(SendError::NotConnected)?;

        match transport.send(to, payload).await {
            Ok(receipt) => {
                self.shared
                    .metrics
                    .counter_inc(names::OUTBOUND_SENDS, &[("outcome", "ok")], 1);
                Ok(receipt)
            }
            Err(e) => {
                self.shared
                    .metrics
                    .counter_inc(names::OUTBOUND_SENDS, &[("outcome", "failed")], 1);
                warn!(to, error = %e, "outbound send failed");
                Err(e.into())
            }
        }
    }

    /// Discard the stored session and start pairing from scratch.
    ///
    /// Resolves once the stored session is cleared; the new handshake
    /// proceeds in the background.
    pub async fn reinitialize(&self) -> Result<(), EngineError> {
        let (done, rx) = oneshot::channel();
        self.commands
            .send(Command::Reinitialize { done })
            .await
            .map_err(|_| EngineError::Stopped)?;
        rx.await.map_err(|_| EngineError::Stopped)?
    }

    /// Stop the manager. The transport connection is closed on the way out.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Drives the connection state machine for one session.
pub struct ConnectionManager {
    config: ManagerConfig,
    transport: Arc<dyn Transport>,
    store: Arc<dyn SessionStore>,
    dispatcher: WebhookDispatcher,
    shared: Arc<Shared>,
    commands: mpsc::Receiver<Command>,
    cancel: CancellationToken,
    session: Session,
    budget: ReconnectBudget,
}

impl ConnectionManager {
    pub fn new(
        config: ManagerConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn SessionStore>,
        dispatcher: WebhookDispatcher,
        metrics: Arc<MetricsRecorder>,
        cancel: CancellationToken,
    ) -> (Self, ConnectionHandle) {
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);
        let shared = Arc::new(Shared {
            state: RwLock::new(ConnectionState::Initializing),
            transport: RwLock::new(None),
            transitions,
            metrics,
        });
        let (commands_tx, commands_rx) = mpsc::channel(8);

        let handle = ConnectionHandle {
            shared: Arc::clone(&shared),
            commands: commands_tx,
            cancel: cancel.clone(),
        };
        let manager = Self {
            session: Session::fresh(config.session_id.clone()),
            config,
            transport,
            store,
            dispatcher,
            shared,
            commands: commands_rx,
            cancel,
            budget: ReconnectBudget::default(),
        };
        (manager, handle)
    }

    pub fn spawn(self) -> JoinHandle<Result<(), EngineError>> {
        tokio::spawn(self.run())
    }

    /// Load the session and keep a connection alive until cancelled.
    #[instrument(skip(self), fields(session_id = %self.config.session_id, transport = self.transport.name()))]
    pub async fn run(mut self) -> Result<(), EngineError> {
        match self.store.load(&self.config.session_id).await {
            Ok(session) => self.session = session,
            // A fresh session means re-pairing, which beats never connecting.
            Err(e) => warn!(error = %e, "could not load stored session, starting unpaired"),
        }
        info!(registered = self.session.is_registered(), "connection manager started");

        loop {
            let resume = match self.run_connection().await {
                Exit::Cancelled => break,
                Exit::Reinitialize(done) => Resume::Reinitialize(done),
                Exit::Closed(reason) => self.after_close(reason).await,
            };
            match resume {
                Resume::Reconnect => {}
                Resume::Reinitialize(done) => self.reset_session(done).await,
                Resume::Cancelled => break,
            }
        }

        self.drop_transport().await;
        info!("connection manager stopped");
        Ok(())
    }

    /// One handshake plus the event pump for the resulting connection.
    async fn run_connection(&mut self) -> Exit {
        self.shared.set_state(ConnectionState::Initializing);

        let (events_tx, mut events) = mpsc::channel(self.config.channel_capacity);
        let connected = tokio::select! {
            _ = self.cancel.cancelled() => return Exit::Cancelled,
            result = self.transport.connect(&self.session, events_tx) => result,
        };
        let transport = match connected {
            Ok(transport) => transport,
            Err(e) => {
                warn!(error = %e, kind = e.error_kind(), "handshake failed");
                return Exit::Closed(e.disconnect_reason());
            }
        };
        *self.shared.transport.write() = Some(transport);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Exit::Cancelled,
                Some(command) = self.commands.recv() => match command {
                    Command::Reinitialize { done } => return Exit::Reinitialize(done),
                },
                event = events.recv() => match event {
                    Some(TransportEvent::ConnectionClosed { reason }) => return Exit::Closed(reason),
                    Some(event) => self.handle_event(event).await,
                    None => {
                        return Exit::Closed(DisconnectReason::new(None, "transport event stream ended"));
                    }
                },
            }
        }
    }

    async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::PairingTokenIssued { qr } => {
                let state = self.shared.state.read().clone();
                match state {
                    ConnectionState::Initializing
                    | ConnectionState::AwaitingPairing { .. }
                    | ConnectionState::Reconnecting { .. } => {
                        info!(qr = %qr, "pairing required, scan the QR code to link this device");
                        self.shared
                            .set_state(ConnectionState::AwaitingPairing { qr });
                    }
                    other => {
                        debug!(state = other.name(), "ignoring pairing token");
                    }
                }
            }
            TransportEvent::ConnectionOpened { identity } => {
                info!(user = %identity.id, "connection open");
                self.budget.reset();
                self.shared.metrics.gauge_set(names::CONNECTION_OPEN, &[], 1.0);
                self.shared.set_state(ConnectionState::Open { identity });
            }
            TransportEvent::CredentialsRotated(update) => {
                self.session.apply(update);
                match self.store.save(&self.session).await {
                    Ok(()) => {
                        self.shared
                            .metrics
                            .counter_inc(names::CREDENTIAL_SAVES, &[], 1);
                    }
                    Err(e) => error!(error = %e, "failed to persist rotated credentials"),
                }
            }
            TransportEvent::InboundBatch { kind, messages } => self.relay_batch(kind, messages),
            TransportEvent::ConnectionClosed { .. } => {}
        }
    }

    fn relay_batch(&self, kind: BatchKind, messages: Vec<RawInboundEvent>) {
        let metrics = &self.shared.metrics;
        metrics.counter_inc(names::MESSAGES_RECEIVED, &[], messages.len() as u64);

        if kind != BatchKind::Notify {
            debug!(count = messages.len(), ?kind, "skipping history batch");
            metrics.counter_inc(
                names::MESSAGES_SKIPPED,
                &[("reason", "history")],
                messages.len() as u64,
            );
            return;
        }

        for raw in messages {
            let normalized = normalize_now(&raw);
            if normalized.from_me {
                metrics.counter_inc(names::MESSAGES_SKIPPED, &[("reason", "from_me")], 1);
                continue;
            }
            debug!(
                message_id = %normalized.message_id,
                message_type = %normalized.message_type,
                from = normalized.from.as_deref().unwrap_or_default(),
                "inbound message"
            );
            let _ = self
                .dispatcher
                .deliver(&InboundMessage { raw, normalized });
        }
    }

    async fn after_close(&mut self, reason: DisconnectReason) -> Resume {
        self.drop_transport().await;
        self.shared.set_state(ConnectionState::Closed {
            reason: reason.clone(),
        });

        if reason.is_terminal() {
            warn!(reason = %reason, "logged out, pairing from scratch requires reinitialize");
            self.shared.set_state(ConnectionState::LoggedOut);
            return self.idle().await;
        }

        let Some(attempt) = self.budget.next_attempt(&self.config.reconnect) else {
            error!(
                reason = %reason,
                attempts = self.budget.attempts(),
                "reconnect budget exhausted, staying closed until reinitialized"
            );
            return self.idle().await;
        };

        let delay = self.config.reconnect.delay_for(attempt);
        self.shared
            .metrics
            .counter_inc(names::RECONNECT_ATTEMPTS, &[], 1);
        info!(reason = %reason, attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
        self.shared
            .set_state(ConnectionState::Reconnecting { attempt, delay });

        tokio::select! {
            _ = self.cancel.cancelled() => Resume::Cancelled,
            Some(Command::Reinitialize { done }) = self.commands.recv() => Resume::Reinitialize(done),
            _ = tokio::time::sleep(delay) => Resume::Reconnect,
        }
    }

    /// Wait for an operator decision while no connection is wanted.
    async fn idle(&mut self) -> Resume {
        tokio::select! {
            _ = self.cancel.cancelled() => Resume::Cancelled,
            Some(Command::Reinitialize { done }) = self.commands.recv() => Resume::Reinitialize(done),
        }
    }

    async fn reset_session(&mut self, done: Responder) {
        self.drop_transport().await;
        let result = self
            .store
            .clear(&self.config.session_id)
            .await
            .map_err(EngineError::from);
        if let Err(e) = &result {
            warn!(error = %e, "failed to clear stored session");
        }
        self.session = Session::fresh(self.config.session_id.clone());
        self.budget.reset();
        info!("session reinitialized, starting pairing");
        let _ = done.send(result);
    }

    async fn drop_transport(&self) {
        let transport = self.shared.transport.write().take();
        if let Some(transport) = transport {
            self.shared.metrics.gauge_set(names::CONNECTION_OPEN, &[], 0.0);
            transport.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use courier_core::session::KeyWrite;
    use courier_core::{CredentialUpdate, Identity, TransportError};
    use courier_store::MemorySessionStore;
    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::mock::{MockConnection, MockTransport};
    use crate::webhook::WebhookConfig;

    struct Harness {
        handle: ConnectionHandle,
        transport: Arc<MockTransport>,
        store: Arc<MemorySessionStore>,
        transitions: broadcast::Receiver<ConnectionState>,
        task: JoinHandle<Result<(), EngineError>>,
    }

    fn identity() -> Identity {
        Identity {
            id: "5511999999999:3@s.whatsapp.net".into(),
            name: Some("Courier".into()),
            lid: None,
        }
    }

    fn opened() -> TransportEvent {
        TransportEvent::ConnectionOpened { identity: identity() }
    }

    fn closed(status: u16) -> TransportEvent {
        TransportEvent::ConnectionClosed {
            reason: DisconnectReason::new(Some(status), "stream errored"),
        }
    }

    fn start(
        connections: Vec<MockConnection>,
        policy: ReconnectPolicy,
        store: Arc<MemorySessionStore>,
        dispatcher: Option<WebhookDispatcher>,
    ) -> Harness {
        let transport = Arc::new(MockTransport::new(connections));
        let metrics = Arc::new(MetricsRecorder::new());
        let dispatcher =
            dispatcher.unwrap_or_else(|| WebhookDispatcher::disabled(Arc::clone(&metrics)));
        let config = ManagerConfig {
            reconnect: policy,
            ..ManagerConfig::default()
        };
        let (manager, handle) = ConnectionManager::new(
            config,
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::clone(&store) as Arc<dyn SessionStore>,
            dispatcher,
            metrics,
            CancellationToken::new(),
        );
        let transitions = handle.subscribe();
        let task = manager.spawn();
        Harness {
            handle,
            transport,
            store,
            transitions,
            task,
        }
    }

    async fn eventually(mut cond: impl FnMut() -> bool) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    fn drain(rx: &mut broadcast::Receiver<ConnectionState>) -> Vec<&'static str> {
        let mut names = Vec::new();
        while let Ok(state) = rx.try_recv() {
            names.push(state.name());
        }
        names
    }

    #[tokio::test]
    async fn pairing_then_open_swaps_token_for_identity() {
        let mut h = start(
            vec![MockConnection::Script(vec![
                TransportEvent::PairingTokenIssued { qr: "2@abc".into() },
                opened(),
            ])],
            ReconnectPolicy::immediate(),
            Arc::new(MemorySessionStore::new()),
            None,
        );

        eventually(|| h.handle.current_state().is_open()).await;
        let state = h.handle.current_state();
        assert_eq!(state.identity(), Some(&identity()));
        assert!(state.pairing_token().is_none());
        assert_eq!(
            drain(&mut h.transitions),
            vec!["initializing", "awaiting_pairing", "open"]
        );
    }

    #[tokio::test]
    async fn state_stays_initializing_until_transport_reports() {
        let h = start(
            vec![MockConnection::Script(vec![])],
            ReconnectPolicy::immediate(),
            Arc::new(MemorySessionStore::new()),
            None,
        );
        eventually(|| h.transport.connect_count() == 1).await;
        assert_eq!(h.handle.current_state(), ConnectionState::Initializing);

        h.transport
            .emit(TransportEvent::PairingTokenIssued { qr: "first".into() })
            .await
            .unwrap();
        h.transport
            .emit(TransportEvent::PairingTokenIssued { qr: "second".into() })
            .await
            .unwrap();
        eventually(|| h.handle.current_state().pairing_token() == Some("second")).await;
    }

    #[tokio::test]
    async fn pairing_token_is_ignored_while_open() {
        let h = start(
            vec![MockConnection::Script(vec![opened()])],
            ReconnectPolicy::immediate(),
            Arc::new(MemorySessionStore::new()),
            None,
        );
        eventually(|| h.handle.current_state().is_open()).await;
        h.transport
            .emit(TransportEvent::PairingTokenIssued { qr: "late".into() })
            .await
            .unwrap();
        // Follow with a rotation so we know the token was processed.
        h.transport
            .emit(TransportEvent::CredentialsRotated(CredentialUpdate::default()))
            .await
            .unwrap();
        eventually(|| h.store.save_count() == 1).await;
        assert!(h.handle.current_state().is_open());
    }

    #[tokio::test]
    async fn rotated_credentials_are_saved_before_next_event() {
        let update = CredentialUpdate {
            creds: json!({"me": {"id": "5511999999999:3@s.whatsapp.net"}})
                .as_object()
                .cloned()
                .unwrap(),
            keys: vec![KeyWrite {
                category: "pre-key".into(),
                id: "1".into(),
                value: Some(json!({"k": 1})),
            }],
        };
        let h = start(
            vec![MockConnection::Script(vec![
                TransportEvent::CredentialsRotated(update),
                opened(),
            ])],
            ReconnectPolicy::immediate(),
            Arc::new(MemorySessionStore::new()),
            None,
        );

        eventually(|| h.handle.current_state().is_open()).await;
        assert_eq!(h.store.save_count(), 1);
        let stored = h.store.get(&SessionId::from_raw("default")).unwrap();
        assert!(stored.is_registered());
        assert_eq!(stored.key_count(), 1);
        assert_eq!(h.handle.metrics().counter_get(names::CREDENTIAL_SAVES, &[]), 1);
    }

    #[tokio::test]
    async fn stored_session_is_handed_to_the_transport() {
        let mut session = Session::fresh(SessionId::from_raw("default"));
        let _ = session
            .creds
            .insert("me".into(), json!({"id": "5511999999999:3@s.whatsapp.net"}));
        let h = start(
            vec![MockConnection::Script(vec![opened()])],
            ReconnectPolicy::immediate(),
            Arc::new(MemorySessionStore::with_session(session.clone())),
            None,
        );
        eventually(|| h.handle.current_state().is_open()).await;
        assert_eq!(h.transport.sessions_seen(), vec![session]);
    }

    #[tokio::test]
    async fn recoverable_close_reconnects_exactly_once() {
        let mut h = start(
            vec![
                MockConnection::Script(vec![opened(), closed(428)]),
                MockConnection::Script(vec![opened()]),
            ],
            ReconnectPolicy::immediate(),
            Arc::new(MemorySessionStore::new()),
            None,
        );

        eventually(|| h.transport.connect_count() == 2 && h.handle.current_state().is_open())
            .await;
        assert_eq!(
            drain(&mut h.transitions),
            vec![
                "initializing",
                "open",
                "closed",
                "reconnecting",
                "initializing",
                "open"
            ]
        );
        assert_eq!(h.handle.metrics().counter_get(names::RECONNECT_ATTEMPTS, &[]), 1);
        assert_eq!(h.transport.close_count(), 1);
    }

    #[tokio::test]
    async fn reconnecting_state_carries_attempt_and_delay() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_millis(40),
            max_delay: Duration::from_millis(40),
            jitter_factor: 0.0,
            max_attempts: None,
        };
        let h = start(
            vec![MockConnection::Script(vec![closed(408)])],
            policy,
            Arc::new(MemorySessionStore::new()),
            None,
        );
        eventually(|| matches!(h.handle.current_state(), ConnectionState::Reconnecting { .. }))
            .await;
        assert_eq!(
            h.handle.current_state(),
            ConnectionState::Reconnecting {
                attempt: 1,
                delay: Duration::from_millis(40)
            }
        );
        eventually(|| h.transport.connect_count() == 2).await;
    }

    #[tokio::test]
    async fn logout_is_terminal() {
        let h = start(
            vec![MockConnection::Script(vec![
                opened(),
                TransportEvent::ConnectionClosed {
                    reason: DisconnectReason::logged_out(),
                },
            ])],
            ReconnectPolicy::immediate(),
            Arc::new(MemorySessionStore::new()),
            None,
        );

        eventually(|| h.handle.current_state() == ConnectionState::LoggedOut).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(h.transport.connect_count(), 1);
        assert!(matches!(
            h.handle.send("1@s.whatsapp.net", &json!({"text": "hi"})).await,
            Err(SendError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn failed_handshake_counts_as_recoverable_close() {
        let h = start(
            vec![
                MockConnection::Fail(TransportError::Network("connection refused".into())),
                MockConnection::Script(vec![opened()]),
            ],
            ReconnectPolicy::immediate(),
            Arc::new(MemorySessionStore::new()),
            None,
        );
        eventually(|| h.handle.current_state().is_open()).await;
        assert_eq!(h.transport.connect_count(), 2);
    }

    #[tokio::test]
    async fn exhausted_budget_stays_closed() {
        let policy = ReconnectPolicy {
            max_attempts: Some(1),
            ..ReconnectPolicy::immediate()
        };
        let h = start(
            vec![
                MockConnection::Fail(TransportError::Network("down".into())),
                MockConnection::Fail(TransportError::Network("still down".into())),
                MockConnection::Script(vec![opened()]),
            ],
            policy,
            Arc::new(MemorySessionStore::new()),
            None,
        );
        eventually(|| {
            h.transport.connect_count() == 2
                && matches!(h.handle.current_state(), ConnectionState::Closed { .. })
        })
        .await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(h.transport.connect_count(), 2);
        assert!(matches!(h.handle.current_state(), ConnectionState::Closed { .. }));
    }

    #[tokio::test]
    async fn send_outside_open_never_reaches_transport() {
        let h = start(
            vec![MockConnection::Script(vec![TransportEvent::PairingTokenIssued {
                qr: "q".into(),
            }])],
            ReconnectPolicy::immediate(),
            Arc::new(MemorySessionStore::new()),
            None,
        );
        eventually(|| h.handle.current_state().pairing_token().is_some()).await;
        let err = h
            .handle
            .send("5511@s.whatsapp.net", &json!({"text": "hi"}))
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::NotConnected));
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn send_when_open_returns_receipt_or_delivery_failure() {
        let h = start(
            vec![MockConnection::Script(vec![opened()])],
            ReconnectPolicy::immediate(),
            Arc::new(MemorySessionStore::new()),
            None,
        );
        eventually(|| h.handle.current_state().is_open()).await;

        let receipt = h
            .handle
            .send("5511@s.whatsapp.net", &json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(receipt["key"]["remoteJid"], "5511@s.whatsapp.net");
        assert_eq!(h.transport.sent().len(), 1);

        h.transport.fail_sends(true);
        let err = h
            .handle
            .send("5511@s.whatsapp.net", &json!({"text": "again"}))
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::DeliveryFailed { .. }));
    }

    #[tokio::test]
    async fn only_live_messages_from_others_are_relayed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let metrics = Arc::new(MetricsRecorder::new());
        let dispatcher = WebhookDispatcher::new(
            WebhookConfig {
                url: Some(server.uri()),
                ..WebhookConfig::default()
            },
            metrics,
        );
        let msg = |id: &str, from_me: bool| {
            RawInboundEvent::new(json!({
                "key": {"id": id, "remoteJid": "5511@s.whatsapp.net", "fromMe": from_me},
                "message": {"conversation": "hi"}
            }))
        };
        let h = start(
            vec![MockConnection::Script(vec![
                opened(),
                TransportEvent::InboundBatch {
                    kind: BatchKind::Append,
                    messages: vec![msg("old", false)],
                },
                TransportEvent::InboundBatch {
                    kind: BatchKind::Notify,
                    messages: vec![msg("mine", true), msg("theirs", false)],
                },
            ])],
            ReconnectPolicy::immediate(),
            Arc::new(MemorySessionStore::new()),
            Some(dispatcher),
        );

        let metrics = h.handle.metrics();
        eventually(|| {
            metrics.counter_get(names::MESSAGES_SKIPPED, &[("reason", "from_me")]) == 1
        })
        .await;
        assert_eq!(metrics.counter_get(names::MESSAGES_RECEIVED, &[]), 3);
        assert_eq!(
            metrics.counter_get(names::MESSAGES_SKIPPED, &[("reason", "history")]),
            1
        );

        for _ in 0..400 {
            if !server.received_requests().await.unwrap_or_default().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["data"]["key"]["id"], "theirs");
    }

    #[tokio::test]
    async fn reinitialize_recovers_from_logout() {
        let mut session = Session::fresh(SessionId::from_raw("default"));
        let _ = session
            .creds
            .insert("me".into(), json!({"id": "5511999999999:3@s.whatsapp.net"}));
        let h = start(
            vec![
                MockConnection::Script(vec![
                    opened(),
                    TransportEvent::ConnectionClosed {
                        reason: DisconnectReason::logged_out(),
                    },
                ]),
                MockConnection::Script(vec![TransportEvent::PairingTokenIssued {
                    qr: "fresh".into(),
                }]),
            ],
            ReconnectPolicy::immediate(),
            Arc::new(MemorySessionStore::with_session(session)),
            None,
        );

        eventually(|| h.handle.current_state() == ConnectionState::LoggedOut).await;
        h.handle.reinitialize().await.unwrap();
        assert!(h.store.get(&SessionId::from_raw("default")).is_none());

        eventually(|| h.handle.current_state().pairing_token() == Some("fresh")).await;
        let seen = h.transport.sessions_seen();
        assert_eq!(seen.len(), 2);
        assert!(!seen[1].is_registered());
    }

    #[tokio::test]
    async fn shutdown_closes_the_connection() {
        let h = start(
            vec![MockConnection::Script(vec![opened()])],
            ReconnectPolicy::immediate(),
            Arc::new(MemorySessionStore::new()),
            None,
        );
        eventually(|| h.handle.current_state().is_open()).await;

        h.handle.shutdown();
        h.task.await.unwrap().unwrap();
        assert_eq!(h.transport.close_count(), 1);
        assert!(matches!(
            h.handle.reinitialize().await,
            Err(EngineError::Stopped)
        ));
    }

    #[tokio::test]
    async fn paired_session_survives_a_restart_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let update = CredentialUpdate {
            creds: json!({"me": {"id": "5511999999999:3@s.whatsapp.net"}})
                .as_object()
                .cloned()
                .unwrap(),
            keys: Vec::new(),
        };

        for (run, script) in [
            vec![TransportEvent::CredentialsRotated(update), opened()],
            vec![opened()],
        ]
        .into_iter()
        .enumerate()
        {
            let transport = Arc::new(MockTransport::new(vec![MockConnection::Script(script)]));
            let metrics = Arc::new(MetricsRecorder::new());
            let (manager, handle) = ConnectionManager::new(
                ManagerConfig::default(),
                Arc::clone(&transport) as Arc<dyn Transport>,
                Arc::new(courier_store::FileSessionStore::new(dir.path())),
                WebhookDispatcher::disabled(Arc::clone(&metrics)),
                metrics,
                CancellationToken::new(),
            );
            let task = manager.spawn();
            eventually(|| handle.current_state().is_open()).await;
            handle.shutdown();
            task.await.unwrap().unwrap();

            // The second process starts from what the first one saved.
            assert_eq!(transport.sessions_seen()[0].is_registered(), run == 1);
        }

        let reloaded = courier_store::FileSessionStore::new(dir.path())
            .load(&SessionId::from_raw("default"))
            .await
            .unwrap();
        assert!(reloaded.is_registered());
    }

    /// Fails every load; saves go to memory.
    struct UnreadableStore(MemorySessionStore);

    #[async_trait::async_trait]
    impl SessionStore for UnreadableStore {
        async fn load(&self, _id: &SessionId) -> Result<Session, courier_store::StoreError> {
            Err(courier_store::StoreError::Io("permission denied".into()))
        }

        async fn save(&self, session: &Session) -> Result<(), courier_store::StoreError> {
            self.0.save(session).await
        }

        async fn clear(&self, id: &SessionId) -> Result<(), courier_store::StoreError> {
            self.0.clear(id).await
        }
    }

    #[tokio::test]
    async fn unreadable_store_starts_unpaired_and_still_connects() {
        let update = CredentialUpdate {
            creds: json!({"me": {"id": "5511999999999:3@s.whatsapp.net"}})
                .as_object()
                .cloned()
                .unwrap(),
            keys: Vec::new(),
        };
        let transport = Arc::new(MockTransport::new(vec![MockConnection::Script(vec![
            TransportEvent::CredentialsRotated(update),
            opened(),
        ])]));
        let store = Arc::new(UnreadableStore(MemorySessionStore::new()));
        let metrics = Arc::new(MetricsRecorder::new());
        let (manager, handle) = ConnectionManager::new(
            ManagerConfig::default(),
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::clone(&store) as Arc<dyn SessionStore>,
            WebhookDispatcher::disabled(Arc::clone(&metrics)),
            metrics,
            CancellationToken::new(),
        );
        let task = manager.spawn();

        eventually(|| handle.current_state().is_open()).await;
        assert_eq!(transport.connect_count(), 1);
        assert!(!transport.sessions_seen()[0].is_registered());

        handle.shutdown();
        task.await.unwrap().unwrap();
        let saved = store.0.load(&SessionId::from_raw("default")).await.unwrap();
        assert!(saved.is_registered());
    }
}

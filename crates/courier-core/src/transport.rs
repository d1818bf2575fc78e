use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::errors::TransportError;
use crate::events::TransportEvent;
use crate::session::Session;

/// The messaging network's wire protocol, supplied from outside.
///
/// `connect` begins a handshake with the given credentials and returns a
/// live session. From then on every notification for that connection is
/// pushed onto `events` in the order the network produced it; the last one
/// for a connection is always `ConnectionClosed`.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(
        &self,
        session: &Session,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Arc<dyn TransportSession>, TransportError>;
}

/// A live connection returned by [`Transport::connect`].
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Send `payload` to `to` and return the network's receipt.
    async fn send(&self, to: &str, payload: &Value) -> Result<Value, TransportError>;

    /// Tear the connection down. Idempotent.
    async fn close(&self);
}

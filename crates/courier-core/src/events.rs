use serde::{Deserialize, Serialize};

use crate::normalized::NormalizedMessage;
use crate::session::CredentialUpdate;
use crate::state::{DisconnectReason, Identity};
use crate::wire::RawInboundEvent;

/// Kind of an inbound batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    /// New messages delivered live.
    Notify,
    /// Messages replayed by history sync.
    Append,
}

/// Notifications a transport delivers, in order, on a single channel.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    PairingTokenIssued { qr: String },
    ConnectionOpened { identity: Identity },
    ConnectionClosed { reason: DisconnectReason },
    CredentialsRotated(CredentialUpdate),
    InboundBatch {
        kind: BatchKind,
        messages: Vec<RawInboundEvent>,
    },
}

impl TransportEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PairingTokenIssued { .. } => "pairing_token_issued",
            Self::ConnectionOpened { .. } => "connection_opened",
            Self::ConnectionClosed { .. } => "connection_closed",
            Self::CredentialsRotated(_) => "credentials_rotated",
            Self::InboundBatch { .. } => "inbound_batch",
        }
    }
}

/// Event name used in the webhook envelope for inbound messages.
pub const MESSAGES_UPSERT: &str = "messages.upsert";

/// Which form of an inbound message the webhook relays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayPayload {
    /// The transport payload exactly as received.
    #[default]
    Raw,
    /// The canonical [`NormalizedMessage`].
    Normalized,
    /// The normalized record with the raw payload nested under `raw`.
    Both,
}

/// One inbound message that survived filtering and is ready to relay.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundMessage {
    pub raw: RawInboundEvent,
    pub normalized: NormalizedMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_names() {
        let evt = TransportEvent::PairingTokenIssued { qr: "ref".into() };
        assert_eq!(evt.event_type(), "pairing_token_issued");
        let evt = TransportEvent::ConnectionClosed {
            reason: DisconnectReason::logged_out(),
        };
        assert_eq!(evt.event_type(), "connection_closed");
    }

    #[test]
    fn relay_payload_defaults_to_raw() {
        assert_eq!(RelayPayload::default(), RelayPayload::Raw);
        let mode: RelayPayload = serde_json::from_str("\"normalized\"").unwrap();
        assert_eq!(mode, RelayPayload::Normalized);
    }

    #[test]
    fn batch_kind_serde() {
        let kind: BatchKind = serde_json::from_str("\"notify\"").unwrap();
        assert_eq!(kind, BatchKind::Notify);
        assert_eq!(serde_json::to_string(&BatchKind::Append).unwrap(), "\"append\"");
    }
}

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The account a connection is authenticated as.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lid: Option<String>,
}

/// Status code the network uses for an explicit logout.
pub const LOGGED_OUT: u16 = 401;

/// Why the transport closed the connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectReason {
    pub status_code: Option<u16>,
    pub message: String,
}

impl DisconnectReason {
    pub fn new(status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
        }
    }

    pub fn logged_out() -> Self {
        Self::new(Some(LOGGED_OUT), "logged out")
    }

    /// Only an explicit logout is terminal; everything else is worth a
    /// reconnection attempt.
    pub fn is_terminal(&self) -> bool {
        self.status_code == Some(LOGGED_OUT)
    }

    /// Short classification string for logging/metrics.
    pub fn kind(&self) -> &'static str {
        match self.status_code {
            Some(401) => "logged_out",
            Some(403) => "forbidden",
            Some(408) => "connection_lost",
            Some(411) => "multidevice_mismatch",
            Some(428) => "connection_closed",
            Some(440) => "connection_replaced",
            Some(500) => "bad_session",
            Some(503) => "unavailable_service",
            Some(515) => "restart_required",
            Some(_) => "other",
            None => "unknown",
        }
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} ({code}): {}", self.kind(), self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Process-wide connection state.
///
/// The pairing token only exists while awaiting pairing and the identity only
/// while open; the variants make any other combination unrepresentable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Initializing,
    AwaitingPairing {
        qr: String,
    },
    Open {
        identity: Identity,
    },
    Closed {
        reason: DisconnectReason,
    },
    Reconnecting {
        attempt: u32,
        #[serde(with = "millis")]
        delay: Duration,
    },
    /// Terminal: the account logged out and must be paired from scratch.
    LoggedOut,
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::AwaitingPairing { .. } => "awaiting_pairing",
            Self::Open { .. } => "open",
            Self::Closed { .. } => "closed",
            Self::Reconnecting { .. } => "reconnecting",
            Self::LoggedOut => "logged_out",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    pub fn pairing_token(&self) -> Option<&str> {
        match self {
            Self::AwaitingPairing { qr } => Some(qr),
            _ => None,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Open { identity } => Some(identity),
            _ => None,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        Identity {
            id: "5511999999999@s.whatsapp.net".into(),
            name: None,
            lid: None,
        }
    }

    #[test]
    fn only_logout_is_terminal() {
        assert!(DisconnectReason::logged_out().is_terminal());
        for code in [403, 408, 428, 440, 500, 503, 515] {
            assert!(!DisconnectReason::new(Some(code), "x").is_terminal(), "code {code}");
        }
        assert!(!DisconnectReason::new(None, "socket reset").is_terminal());
    }

    #[test]
    fn reason_kind_names() {
        assert_eq!(DisconnectReason::new(Some(515), "").kind(), "restart_required");
        assert_eq!(DisconnectReason::new(Some(440), "").kind(), "connection_replaced");
        assert_eq!(DisconnectReason::new(None, "").kind(), "unknown");
    }

    #[test]
    fn pairing_token_only_while_awaiting_pairing() {
        let awaiting = ConnectionState::AwaitingPairing { qr: "2@abc".into() };
        assert_eq!(awaiting.pairing_token(), Some("2@abc"));
        assert_eq!(awaiting.identity(), None);

        let open = ConnectionState::Open { identity: identity() };
        assert_eq!(open.pairing_token(), None);
        assert_eq!(open.identity(), Some(&identity()));
        assert!(open.is_open());
    }

    #[test]
    fn state_serializes_with_tag() {
        let state = ConnectionState::Reconnecting {
            attempt: 2,
            delay: Duration::from_millis(1500),
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["state"], "reconnecting");
        assert_eq!(json["attempt"], 2);
        assert_eq!(json["delay"], 1500);
        assert_eq!(ConnectionState::LoggedOut.name(), "logged_out");
    }
}

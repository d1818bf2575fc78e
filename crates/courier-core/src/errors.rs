use std::time::Duration;

use crate::state::DisconnectReason;

/// Errors raised by a transport implementation.
#[derive(Clone, Debug, thiserror::Error)]
pub enum TransportError {
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("rejected by network ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("connection closed")]
    Closed,
}

impl TransportError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Handshake(_) => "handshake",
            Self::Network(_) => "network",
            Self::Protocol(_) => "protocol",
            Self::Rejected { .. } => "rejected",
            Self::Timeout(_) => "timeout",
            Self::Closed => "closed",
        }
    }

    /// How a failed connection attempt is classified for the state machine.
    pub fn disconnect_reason(&self) -> DisconnectReason {
        match self {
            Self::Rejected { status, message } => DisconnectReason::new(Some(*status), message),
            other => DisconnectReason::new(None, other.to_string()),
        }
    }
}

/// Outcome of an outbound send that did not succeed.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SendError {
    #[error("not connected")]
    NotConnected,
    #[error("delivery failed: {detail}")]
    DeliveryFailed { detail: String },
}

impl From<TransportError> for SendError {
    fn from(e: TransportError) -> Self {
        Self::DeliveryFailed {
            detail: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_keeps_status_for_classification() {
        let err = TransportError::Rejected {
            status: 401,
            message: "logged out".into(),
        };
        let reason = err.disconnect_reason();
        assert_eq!(reason.status_code, Some(401));
        assert!(reason.is_terminal());
    }

    #[test]
    fn other_errors_are_recoverable() {
        let reason = TransportError::Network("connection refused".into()).disconnect_reason();
        assert_eq!(reason.status_code, None);
        assert!(!reason.is_terminal());
        assert!(reason.message.contains("connection refused"));
    }

    #[test]
    fn transport_error_becomes_delivery_failed() {
        let err: SendError = TransportError::Timeout(Duration::from_secs(5)).into();
        match err {
            SendError::DeliveryFailed { detail } => assert!(detail.contains("timeout")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn error_kinds() {
        assert_eq!(TransportError::Closed.error_kind(), "closed");
        assert_eq!(TransportError::Protocol("x".into()).error_kind(), "protocol");
    }
}

//! Connection lifecycle, inbound normalization and webhook relay.
//!
//! [`ConnectionManager`] owns the transport connection and drives the state
//! machine; [`ConnectionHandle`] is the cloneable surface the HTTP layer uses.

#![deny(unsafe_code)]

pub mod bridge;
pub mod connection;
pub mod error;
pub mod mock;
pub mod normalizer;
pub mod reconnect;
pub mod webhook;

pub use bridge::{BridgeConfig, BridgeTransport};
pub use connection::{ConnectionHandle, ConnectionManager, ManagerConfig};
pub use error::{EngineError, WebhookError};
pub use mock::{MockConnection, MockTransport};
pub use normalizer::{normalize, normalize_now, quoted_content};
pub use reconnect::{ReconnectBudget, ReconnectPolicy};
pub use webhook::{WebhookConfig, WebhookDispatcher};

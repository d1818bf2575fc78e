pub mod errors;
pub mod events;
pub mod ids;
pub mod jid;
pub mod normalized;
pub mod session;
pub mod state;
pub mod transport;
pub mod wire;

pub use errors::{SendError, TransportError};
pub use events::{BatchKind, InboundMessage, RelayPayload, TransportEvent};
pub use ids::SessionId;
pub use jid::Jid;
pub use normalized::{MessageType, NormalizedMessage};
pub use session::{CredentialUpdate, Session};
pub use state::{ConnectionState, DisconnectReason, Identity};
pub use transport::{Transport, TransportSession};

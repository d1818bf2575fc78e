use async_trait::async_trait;

use courier_core::{Session, SessionId};

use crate::error::StoreError;

/// Durable home for one account's authentication material.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// The stored session, or a fresh one when nothing usable is stored.
    async fn load(&self, id: &SessionId) -> Result<Session, StoreError>;

    /// Overwrite the stored session with `session`. Idempotent.
    async fn save(&self, session: &Session) -> Result<(), StoreError>;

    /// Forget everything stored for `id`.
    async fn clear(&self, id: &SessionId) -> Result<(), StoreError>;
}

use async_trait::async_trait;

use parley_types::{MessageDto, ParticipantId, UserDetail};

use crate::error::{FetchError, TransportError};
use crate::user_cache::UserDirectory;

/// REST collaborator of the sync engine.
#[async_trait]
pub trait ChatApi: UserDirectory {
    /// Newest message of every conversation `self_id` takes part in.
    async fn fetch_summaries(&self, self_id: ParticipantId) -> Result<Vec<MessageDto>, FetchError>;

    /// Full history between `self_id` and `other`, any order.
    async fn fetch_history(
        &self,
        self_id: ParticipantId,
        other: ParticipantId,
    ) -> Result<Vec<MessageDto>, FetchError>;

    /// Everyone who can be messaged, possibly including self.
    async fn list_users(&self) -> Result<Vec<UserDetail>, FetchError>;
}

/// Push transport as seen from the engine. Inbound frames reach the engine
/// through [`crate::EngineHandle::push`]; this side only publishes.
#[async_trait]
pub trait Transport: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn publish(&self, message: MessageDto) -> Result<(), TransportError>;

    async fn close(&self);
}

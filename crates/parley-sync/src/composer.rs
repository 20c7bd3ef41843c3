use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use parley_types::MessageDto;

use crate::error::SendError;
use crate::key::ConversationKey;
use crate::message::{Delivery, MessageRecord};
use crate::store::{ConversationStore, HistoryTicket};

/// An optimistic message that is already in the store and still has to be
/// published.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub key: ConversationKey,
    pub local_ref: Uuid,
    pub publish: MessageDto,
    pub history_request: Option<HistoryTicket>,
}

/// Builds optimistic outgoing messages.
///
/// The record is tagged with a fresh `local_ref` so its delivery state can
/// be tracked. The push echo of our own messages is filtered out before it
/// reaches the store, so nothing is reconciled against it.
#[derive(Debug, Default)]
pub struct OutboundComposer;

impl OutboundComposer {
    pub fn new() -> Self {
        Self
    }

    /// Checks run in a fixed order (empty text, no open conversation,
    /// disconnected transport) and a failed check leaves the store as it
    /// was.
    pub fn send(
        &self,
        store: &mut ConversationStore,
        key: Option<&ConversationKey>,
        text: &str,
        connected: bool,
    ) -> Result<Outbound, SendError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SendError::EmptyMessage);
        }
        let key = key.ok_or(SendError::NoActiveConversation)?;
        let other = store
            .get(key)
            .map(|c| c.participants.other)
            .ok_or(SendError::NoActiveConversation)?;
        if !connected {
            return Err(SendError::TransportDisconnected);
        }

        let local_ref = Uuid::new_v4();
        let record = MessageRecord {
            id: None,
            sender_id: store.self_id(),
            receiver_id: other,
            text: text.to_string(),
            sent_at: Utc::now(),
            status: None,
            local_ref: Some(local_ref),
            delivery: Delivery::Pending,
        };
        let publish = record.to_dto();

        let outcome = store
            .append_incoming(key, record)
            .ok_or(SendError::NoActiveConversation)?;
        debug!("Queued message {} for {}", local_ref, key);

        Ok(Outbound {
            key: key.clone(),
            local_ref,
            publish,
            history_request: outcome.history_request,
        })
    }
}

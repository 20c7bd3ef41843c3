use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use parley_types::{MessageStatus, ParticipantId};

use crate::key::ConversationKey;
use crate::message::{Delivery, MessageRecord};
use crate::store::{ConversationState, ConversationStore, HistoryTicket};

// -- View models --

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationListItem {
    pub key: ConversationKey,
    pub display_name: String,
    pub last_message: String,
    pub last_message_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageView {
    pub id: Option<i64>,
    pub text: String,
    pub sent_at: DateTime<Utc>,
    /// Sent by the session user
    pub mine: bool,
    pub status: Option<MessageStatus>,
    pub delivery: Delivery,
    pub local_ref: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveConversationView {
    pub key: ConversationKey,
    pub other: ParticipantId,
    pub display_name: String,
    /// Full history once loaded, otherwise just the newest known message
    pub messages: Vec<MessageView>,
    pub history_loaded: bool,
    pub history_pending: bool,
}

/// Which views a set of changed conversations invalidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Refresh {
    pub list: bool,
    pub active: bool,
}

// -- Projector --

/// Tracks the open conversation and derives view models from the store.
#[derive(Debug, Default)]
pub struct ActiveConversationProjector {
    selection: Option<ConversationKey>,
}

impl ActiveConversationProjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selection(&self) -> Option<&ConversationKey> {
        self.selection.as_ref()
    }

    /// Open `key`. The view is available right away with whatever is
    /// cached; the returned ticket, if any, is the history fetch to run.
    /// Unknown keys leave the selection untouched.
    pub fn select(&mut self, store: &mut ConversationStore, key: &ConversationKey) -> Option<HistoryTicket> {
        store.get(key)?;
        if self.selection.as_ref() != Some(key) {
            debug!("Selected conversation {}", key);
            self.selection = Some(key.clone());
        }
        store.request_history(key)
    }

    pub fn clear(&mut self) {
        self.selection = None;
    }

    /// Any change re-renders the list; only a change to the open
    /// conversation re-renders the active view.
    pub fn affected(&self, changed: &[ConversationKey]) -> Refresh {
        Refresh {
            list: !changed.is_empty(),
            active: self
                .selection
                .as_ref()
                .is_some_and(|key| changed.contains(key)),
        }
    }

    pub fn list_view(&self, store: &ConversationStore) -> Vec<ConversationListItem> {
        store
            .conversations_by_recency()
            .into_iter()
            .map(|c| ConversationListItem {
                key: c.key.clone(),
                display_name: c.display_name.clone(),
                last_message: c.last_message.clone(),
                last_message_at: c.last_message_at,
                is_active: self.selection.as_ref() == Some(&c.key),
            })
            .collect()
    }

    pub fn active_view(&self, store: &ConversationStore) -> Option<ActiveConversationView> {
        let state = store.get(self.selection.as_ref()?)?;
        let self_id = store.self_id();
        Some(ActiveConversationView {
            key: state.key.clone(),
            other: state.participants.other,
            display_name: state.display_name.clone(),
            messages: visible(state)
                .map(|m| message_view(m, self_id))
                .collect(),
            history_loaded: state.history_loaded,
            history_pending: state.is_history_pending(),
        })
    }
}

fn visible(state: &ConversationState) -> Box<dyn Iterator<Item = &MessageRecord> + '_> {
    if state.history_loaded {
        Box::new(state.messages.iter())
    } else {
        Box::new(state.latest().into_iter())
    }
}

fn message_view(m: &MessageRecord, self_id: ParticipantId) -> MessageView {
    MessageView {
        id: m.id,
        text: m.text.clone(),
        sent_at: m.sent_at,
        mine: m.sender_id == self_id,
        status: m.status,
        delivery: m.delivery,
        local_ref: m.local_ref,
    }
}

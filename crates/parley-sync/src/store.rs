use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use parley_types::ParticipantId;

use crate::ingest::Ingested;
use crate::key::ConversationKey;
use crate::message::{Delivery, MessageRecord};
use crate::user_cache::DisplayProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Participants {
    pub self_id: ParticipantId,
    pub other: ParticipantId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationPhase {
    Unknown,
    SummaryOnly,
    FullyLoaded,
}

/// One two-party conversation.
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub key: ConversationKey,
    pub participants: Participants,
    pub display_name: String,
    pub display_name_resolved: bool,
    /// Ascending `sent_at`, ties in insertion order
    pub messages: Vec<MessageRecord>,
    pub last_message: String,
    pub last_message_at: Option<DateTime<Utc>>,
    pub history_loaded: bool,
    latest: Option<MessageRecord>,
    early_arrivals: Vec<MessageRecord>,
    pending_history: Option<u64>,
    auto_history_requested: bool,
    name_claimed: bool,
    first_seen: u64,
}

impl ConversationState {
    fn new(key: ConversationKey, participants: Participants, first_seen: u64) -> Self {
        Self {
            key,
            participants,
            display_name: DisplayProfile::fallback(participants.other).name,
            display_name_resolved: false,
            messages: Vec::new(),
            last_message: String::new(),
            last_message_at: None,
            history_loaded: false,
            latest: None,
            early_arrivals: Vec::new(),
            pending_history: None,
            auto_history_requested: false,
            name_claimed: false,
            first_seen,
        }
    }

    pub fn phase(&self) -> ConversationPhase {
        if self.history_loaded {
            ConversationPhase::FullyLoaded
        } else {
            ConversationPhase::SummaryOnly
        }
    }

    /// Newest record seen for this conversation from any source. Shown in
    /// place of the message sequence until history is loaded.
    pub fn latest(&self) -> Option<&MessageRecord> {
        self.latest.as_ref()
    }

    pub fn is_history_pending(&self) -> bool {
        self.pending_history.is_some()
    }

    /// Move last-message metadata to `message` if it is newer. Summary rows
    /// need to be strictly newer; live messages only need to be not older.
    fn note_latest(&mut self, message: &MessageRecord, strictly: bool) -> bool {
        let newer = match self.last_message_at {
            None => true,
            Some(at) if strictly => message.sent_at > at,
            Some(at) => message.sent_at >= at,
        };
        if newer {
            self.last_message = message.text.clone();
            self.last_message_at = Some(message.sent_at);
            self.latest = Some(message.clone());
        }
        newer
    }

    fn insert_sorted(&mut self, message: MessageRecord) -> bool {
        if self.messages.iter().any(|m| m.same_as(&message)) {
            return false;
        }
        let at = self
            .messages
            .partition_point(|m| m.sent_at <= message.sent_at);
        self.messages.insert(at, message);
        true
    }
}

/// A history fetch the store is waiting for. Only the ticket most recently
/// issued for a conversation can complete it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryTicket {
    pub key: ConversationKey,
    pub other: ParticipantId,
    pub generation: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    /// The conversation did not exist before this append
    pub created: bool,
    /// The record was added to `messages`
    pub appended: bool,
    /// History should now be fetched for this conversation
    pub history_request: Option<HistoryTicket>,
}

/// Owns every conversation of the session, keyed by [`ConversationKey`].
pub struct ConversationStore {
    self_id: ParticipantId,
    conversations: HashMap<ConversationKey, ConversationState>,
    next_seq: u64,
    next_generation: u64,
}

impl ConversationStore {
    pub fn new(self_id: ParticipantId) -> Self {
        Self {
            self_id,
            conversations: HashMap::new(),
            next_seq: 0,
            next_generation: 0,
        }
    }

    pub fn self_id(&self) -> ParticipantId {
        self.self_id
    }

    pub fn get(&self, key: &ConversationKey) -> Option<&ConversationState> {
        self.conversations.get(key)
    }

    pub fn phase(&self, key: &ConversationKey) -> ConversationPhase {
        self.conversations
            .get(key)
            .map_or(ConversationPhase::Unknown, ConversationState::phase)
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ConversationKey> {
        self.conversations.keys()
    }

    fn participants_for(&self, message: &MessageRecord) -> Option<Participants> {
        let other = if message.sender_id == self.self_id {
            message.receiver_id
        } else if message.receiver_id == self.self_id {
            message.sender_id
        } else {
            return None;
        };
        Some(Participants {
            self_id: self.self_id,
            other,
        })
    }

    /// Look up `key`, creating it when this is the first sighting.
    fn entry(&mut self, key: &ConversationKey, participants: Participants) -> (&mut ConversationState, bool) {
        let seq = self.next_seq;
        let mut created = false;
        let state = self.conversations.entry(key.clone()).or_insert_with(|| {
            created = true;
            debug!("New conversation {} with user {}", key, participants.other);
            ConversationState::new(key.clone(), participants, seq)
        });
        if created {
            self.next_seq += 1;
        }
        (state, created)
    }

    /// Seed conversations from summary rows. Rows never enter `messages`;
    /// they only move last-message metadata forward. Returns every key that
    /// changed, in first-change order.
    pub fn ingest_summary_batch(&mut self, batch: Vec<Ingested>) -> Vec<ConversationKey> {
        let mut changed = Vec::new();
        for Ingested { key, message } in batch {
            let Some(participants) = self.participants_for(&message) else {
                warn!("Skipping summary row {} that does not involve user {}", key, self.self_id);
                continue;
            };
            let (state, created) = self.entry(&key, participants);
            let updated = state.note_latest(&message, true);
            if (created || updated) && !changed.contains(&key) {
                changed.push(key);
            }
        }
        changed
    }

    /// Install the authoritative message sequence. At most once per
    /// conversation: returns `false` without touching anything if history
    /// is already loaded or the conversation is unknown.
    pub fn merge_history(&mut self, key: &ConversationKey, records: Vec<MessageRecord>) -> bool {
        let Some(state) = self.conversations.get_mut(key) else {
            warn!("History for unknown conversation {} dropped", key);
            return false;
        };
        if state.history_loaded {
            debug!("History for {} already loaded, ignoring", key);
            return false;
        }

        let mut messages: Vec<MessageRecord> = records
            .into_iter()
            .filter(|m| {
                let ok = &m.key() == key;
                if !ok {
                    warn!("History row for {} returned with {}", m.key(), key);
                }
                ok
            })
            .collect();
        messages.sort_by_key(|m| m.sent_at);

        state.messages = messages;
        state.history_loaded = true;
        state.pending_history = None;

        for early in std::mem::take(&mut state.early_arrivals) {
            if state.insert_sorted(early) {
                debug!("Kept a message for {} that arrived during the fetch", key);
            }
        }
        if let Some(newest) = state.messages.last().cloned() {
            state.note_latest(&newest, true);
        }
        true
    }

    /// Apply a live message (push or optimistic). Idempotent when history
    /// is loaded. When it is not, only last-message metadata moves and a
    /// history fetch is requested, once per conversation.
    ///
    /// Returns `None` when the record cannot belong to a conversation of
    /// this session.
    pub fn append_incoming(&mut self, key: &ConversationKey, message: MessageRecord) -> Option<AppendOutcome> {
        if &message.key() != key {
            warn!("Message for {} offered under key {}", message.key(), key);
            return None;
        }
        let participants = self.participants_for(&message)?;
        let (state, created) = self.entry(key, participants);

        let mut outcome = AppendOutcome {
            created,
            ..Default::default()
        };
        state.note_latest(&message, false);

        if state.history_loaded {
            outcome.appended = state.insert_sorted(message);
            return Some(outcome);
        }

        if message.delivery == Delivery::Confirmed
            && !state.early_arrivals.iter().any(|m| m.same_as(&message))
        {
            state.early_arrivals.push(message);
        }
        if !state.auto_history_requested {
            state.auto_history_requested = true;
            outcome.history_request = self.request_history(key);
        }
        Some(outcome)
    }

    /// Issue a history ticket, unless history is loaded or a fetch is
    /// already outstanding.
    pub fn request_history(&mut self, key: &ConversationKey) -> Option<HistoryTicket> {
        let state = self.conversations.get_mut(key)?;
        if state.history_loaded || state.pending_history.is_some() {
            return None;
        }
        self.next_generation += 1;
        state.pending_history = Some(self.next_generation);
        Some(HistoryTicket {
            key: key.clone(),
            other: state.participants.other,
            generation: self.next_generation,
        })
    }

    pub fn is_history_pending(&self, key: &ConversationKey) -> bool {
        self.conversations
            .get(key)
            .is_some_and(ConversationState::is_history_pending)
    }

    /// Apply a finished fetch if `ticket` is the one outstanding.
    pub fn complete_history(&mut self, ticket: &HistoryTicket, records: Vec<MessageRecord>) -> bool {
        let current = self
            .conversations
            .get(&ticket.key)
            .and_then(|s| s.pending_history);
        if current != Some(ticket.generation) {
            debug!(
                "Discarding stale history for {} (generation {}, outstanding {:?})",
                ticket.key, ticket.generation, current
            );
            return false;
        }
        self.merge_history(&ticket.key, records)
    }

    /// Forget a failed fetch so the next selection retries. The
    /// conversation stays `SummaryOnly`.
    pub fn history_failed(&mut self, ticket: &HistoryTicket) -> bool {
        match self.conversations.get_mut(&ticket.key) {
            Some(state) if state.pending_history == Some(ticket.generation) => {
                state.pending_history = None;
                true
            }
            _ => false,
        }
    }

    /// The participant whose name should be looked up for `key`. Yields it
    /// once per conversation; later calls return `None`.
    pub fn claim_display_name(&mut self, key: &ConversationKey) -> Option<ParticipantId> {
        let state = self.conversations.get_mut(key)?;
        if state.display_name_resolved || state.name_claimed {
            return None;
        }
        state.name_claimed = true;
        Some(state.participants.other)
    }

    /// Record the looked-up name. No-op once resolved.
    pub fn apply_display_name(&mut self, key: &ConversationKey, profile: &DisplayProfile) -> bool {
        let Some(state) = self.conversations.get_mut(key) else {
            return false;
        };
        if state.display_name_resolved || profile.id != state.participants.other {
            return false;
        }
        state.display_name = profile.name.clone();
        state.display_name_resolved = true;
        state.name_claimed = true;
        true
    }

    /// Open (or find) the conversation with `other`. Returns the key and
    /// whether it was created, or `None` for `other == self`.
    pub fn start_conversation(
        &mut self,
        other: ParticipantId,
        profile: Option<&DisplayProfile>,
    ) -> Option<(ConversationKey, bool)> {
        if other == self.self_id {
            return None;
        }
        let key = ConversationKey::new(self.self_id, other);
        let participants = Participants {
            self_id: self.self_id,
            other,
        };
        let (_, created) = self.entry(&key, participants);
        if let Some(profile) = profile {
            self.apply_display_name(&key, profile);
        }
        Some((key, created))
    }

    /// Update the delivery state of an optimistic record.
    pub fn mark_delivery(&mut self, key: &ConversationKey, local_ref: Uuid, delivery: Delivery) -> bool {
        let Some(state) = self.conversations.get_mut(key) else {
            return false;
        };
        let mut found = false;
        let records = state.messages.iter_mut().chain(state.latest.iter_mut());
        for record in records.filter(|m| m.local_ref == Some(local_ref)) {
            record.delivery = delivery;
            found = true;
        }
        found
    }

    /// Newest activity first; conversations without messages last, ties in
    /// first-seen order.
    pub fn conversations_by_recency(&self) -> Vec<&ConversationState> {
        let mut list: Vec<_> = self.conversations.values().collect();
        list.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then(a.first_seen.cmp(&b.first_seen))
        });
        list
    }

    pub fn clear(&mut self) {
        self.conversations.clear();
    }
}

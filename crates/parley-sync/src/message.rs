use chrono::{DateTime, Utc};
use uuid::Uuid;

use parley_types::time::format_timestamp;
use parley_types::{MessageDto, MessageStatus, ParticipantId};

use crate::key::ConversationKey;

/// Local delivery state. Server-sourced records are always `Confirmed`;
/// optimistic ones start `Pending` and move to `Published` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Confirmed,
    Pending,
    Published,
    Failed,
}

/// Canonical message shape inside the core.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    /// Server id, absent on optimistic records
    pub id: Option<i64>,
    pub sender_id: ParticipantId,
    pub receiver_id: ParticipantId,
    pub text: String,
    /// Sole ordering key
    pub sent_at: DateTime<Utc>,
    pub status: Option<MessageStatus>,
    /// Client correlation id, set only on messages composed here
    pub local_ref: Option<Uuid>,
    pub delivery: Delivery,
}

impl MessageRecord {
    pub fn key(&self) -> ConversationKey {
        ConversationKey::new(self.sender_id, self.receiver_id)
    }

    /// Whether `other` is the same message, so appending it again would
    /// duplicate it. Server ids win, then correlation ids, then content.
    pub fn same_as(&self, other: &MessageRecord) -> bool {
        if let (Some(a), Some(b)) = (self.id, other.id) {
            return a == b;
        }
        if let (Some(a), Some(b)) = (self.local_ref, other.local_ref) {
            return a == b;
        }
        self.sender_id == other.sender_id
            && self.receiver_id == other.receiver_id
            && self.sent_at == other.sent_at
            && self.text == other.text
    }

    /// Publish payload for the transport.
    pub fn to_dto(&self) -> MessageDto {
        MessageDto {
            id: self.id,
            sender_id: Some(self.sender_id),
            receiver_id: Some(self.receiver_id),
            message_text: Some(self.text.clone()),
            sent_at: Some(format_timestamp(&self.sent_at)),
            status: self.status,
            ..Default::default()
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    pub fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    pub fn record(id: Option<i64>, from: i64, to: i64, text: &str, secs: i64) -> MessageRecord {
        MessageRecord {
            id,
            sender_id: ParticipantId(from),
            receiver_id: ParticipantId(to),
            text: text.to_string(),
            sent_at: at(secs),
            status: None,
            local_ref: None,
            delivery: Delivery::Confirmed,
        }
    }
}

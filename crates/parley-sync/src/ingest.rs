use std::fmt;

use tracing::{trace, warn};

use parley_types::MessageDto;
use parley_types::time::parse_timestamp;

use crate::error::IngestError;
use crate::key::ConversationKey;
use crate::message::{Delivery, MessageRecord};

/// Where a raw record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    History,
    Summary,
    Push,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::History => "history",
            Self::Summary => "summary",
            Self::Push => "push",
        })
    }
}

/// A normalized record together with the conversation it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct Ingested {
    pub key: ConversationKey,
    pub message: MessageRecord,
}

/// Map a raw record into the canonical shape.
pub fn normalize(raw: MessageDto, source: Source) -> Result<Ingested, IngestError> {
    let sender_id = raw.sender().ok_or(IngestError::Malformed("missing sender id"))?;
    let receiver_id = raw
        .receiver()
        .ok_or(IngestError::Malformed("missing receiver id"))?;
    if sender_id == receiver_id {
        return Err(IngestError::Malformed("sender and receiver are the same"));
    }

    let sent_at = raw
        .sent_at
        .as_deref()
        .ok_or(IngestError::Malformed("missing sentAt"))?;
    let sent_at = parse_timestamp(sent_at).ok_or(IngestError::Malformed("unparsable sentAt"))?;

    let message = MessageRecord {
        id: raw.id,
        sender_id,
        receiver_id,
        text: raw.message_text.unwrap_or_default(),
        sent_at,
        status: raw.status,
        local_ref: None,
        delivery: Delivery::Confirmed,
    };

    let key = ConversationKey::new(sender_id, receiver_id);
    trace!("Normalized {} record into {}", source, key);
    Ok(Ingested { key, message })
}

/// Normalize a batch, skipping (and logging) malformed records.
pub fn normalize_batch(raws: Vec<MessageDto>, source: Source) -> Vec<Ingested> {
    raws.into_iter()
        .filter_map(|raw| {
            let id = raw.id;
            match normalize(raw, source) {
                Ok(ingested) => Some(ingested),
                Err(e) => {
                    warn!("Skipping {} record {:?}: {}", source, id, e);
                    None
                }
            }
        })
        .collect()
}

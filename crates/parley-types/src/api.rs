use serde::{Deserialize, Serialize};

use crate::models::{MessageStatus, ParticipantId, Role};

// -- JWT Claims --

/// Claims carried by the session token. The client never verifies the
/// signature; it only reads `exp` to avoid reusing an expired session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

// -- Auth --

#[derive(Debug, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: SelfProfile,
}

/// The minimal slice of the logged-in user that survives a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfProfile {
    pub id: ParticipantId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: Option<Role>,
}

// -- Users --

/// Detail lookup result, also the shape of each directory entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDetail {
    pub id: ParticipantId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

/// Nested user object found on history rows (`sender` / `receiver`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: Option<ParticipantId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

// -- Messages --

/// A message record exactly as it travels: summary rows, history rows, push
/// frame bodies and outgoing publishes all share this shape.
///
/// Every field is optional so one bad row never fails a whole batch; the
/// sync core decides what is usable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default)]
    pub sender_id: Option<ParticipantId>,
    #[serde(default)]
    pub receiver_id: Option<ParticipantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<UserRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<UserRef>,
    #[serde(default)]
    pub message_text: Option<String>,
    #[serde(default)]
    pub sent_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
}

impl MessageDto {
    /// Sender id, from the flat field or the nested `sender` object.
    pub fn sender(&self) -> Option<ParticipantId> {
        self.sender_id
            .or_else(|| self.sender.as_ref().and_then(|u| u.id))
    }

    /// Receiver id, from the flat field or the nested `receiver` object.
    pub fn receiver(&self) -> Option<ParticipantId> {
        self.receiver_id
            .or_else(|| self.receiver.as_ref().and_then(|u| u.id))
    }
}

//! Text projection of the engine's view events.

use chrono::{DateTime, Local, Utc};

use parley_sync::{ActiveConversationView, ConversationListItem, Delivery, DisplayProfile, Notice};

/// Shown on every open conversation. Nothing is actually encrypted.
pub const ENCRYPTED_LABEL: &str = "encrypted";

fn clock(at: &DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M").to_string()
}

pub fn conversation_list(items: &[ConversationListItem]) -> String {
    if items.is_empty() {
        return "no conversations yet; /users to find someone".to_string();
    }
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let marker = if item.is_active { '*' } else { ' ' };
            let when = item
                .last_message_at
                .as_ref()
                .map(|at| format!(" [{}]", clock(at)))
                .unwrap_or_default();
            format!(
                "{}{:>3}. {} ({}){}: {}",
                marker, i + 1, item.display_name, item.key, when, item.last_message
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn active_conversation(view: &ActiveConversationView) -> String {
    let mut out = format!("== {} ({}) ==", view.display_name, ENCRYPTED_LABEL);
    if !view.history_loaded {
        out.push_str(if view.history_pending {
            "\n(loading history...)"
        } else {
            "\n(history unavailable; /open again to retry)"
        });
    }
    for m in &view.messages {
        let who = if m.mine { "you" } else { view.display_name.as_str() };
        let suffix = match m.delivery {
            Delivery::Pending => " (sending)",
            Delivery::Failed => " (not sent)",
            Delivery::Confirmed | Delivery::Published => "",
        };
        out.push_str(&format!("\n[{}] {}: {}{}", clock(&m.sent_at), who, m.text, suffix));
    }
    out
}

pub fn directory(users: &[DisplayProfile]) -> String {
    if users.is_empty() {
        return "nobody else is registered".to_string();
    }
    users
        .iter()
        .map(|u| match &u.email {
            Some(email) => format!("  {:>5}  {} <{}>", u.id, u.name, email),
            None => format!("  {:>5}  {}", u.id, u.name),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn notice(notice: &Notice) -> String {
    match notice {
        Notice::SummaryFetchFailed { reason } => {
            format!("! could not load conversations ({}); /reload to retry", reason)
        }
        Notice::HistoryFetchFailed { key, reason } => {
            format!("! could not load history for {} ({}); /open it again to retry", key, reason)
        }
        Notice::DirectoryFetchFailed { reason } => {
            format!("! could not load users ({}); /users to retry", reason)
        }
        Notice::PublishFailed { key, reason, .. } => format!("! message to {} not sent: {}", key, reason),
        Notice::TransportDisconnected => "! connection lost, reconnecting; sending is paused".to_string(),
        Notice::TransportConnected => "connected".to_string(),
    }
}

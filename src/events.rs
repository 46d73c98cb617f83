//! Live-channel events and best-effort fan-out.
//!
//! Every event here has a corresponding pull path that recomputes the same
//! state from the store; delivery affects latency, never correctness.
//! Callers publish only after the durable write has committed, and always
//! to the other party, never as an echo back to the actor.

use std::collections::BTreeMap;

use axum::extract::ws::Message;
use serde::Serialize;

use crate::chat::messages::MessageResponse;
use crate::registry::Registry;
use crate::social::notifications::NotificationResponse;

/// Per-message reaction state: emoji -> user ids who reacted with it.
pub type ReactionMap = BTreeMap<String, Vec<String>>;

/// Events pushed over the live channel, serialized as JSON text frames:
/// `{"type": "newMessage", "data": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum Event {
    NewMessage {
        message: MessageResponse,
    },
    MessageDeleted {
        chat_id: String,
        message_id: String,
    },
    /// Carries the full current reaction map, not a delta, so a client that
    /// missed an earlier toggle cannot drift.
    MessageReactionUpdated {
        chat_id: String,
        message_id: String,
        reactions: ReactionMap,
    },
    NewNotification {
        notification: NotificationResponse,
    },
}

/// Push an event to every live connection of `user_id`.
///
/// An offline target is a harmless no-op. A failed send to one connection
/// (closed between resolve and send) never prevents delivery to siblings and
/// never surfaces to the caller: the durable state is unaffected and the
/// client reconciles via pull.
pub fn publish(registry: &Registry, user_id: &str, event: &Event) {
    let payload = match serde_json::to_string(event) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize event");
            return;
        }
    };

    let connections = registry.resolve(user_id);
    if connections.is_empty() {
        tracing::debug!(user_id = %user_id, "target offline, skipping push");
        return;
    }

    for conn in connections {
        if conn.sender.send(Message::Text(payload.clone().into())).is_err() {
            tracing::debug!(
                user_id = %user_id,
                connection = %conn.id,
                "live connection closed mid-send"
            );
        }
    }
}

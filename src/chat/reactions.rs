//! REST endpoint for emoji reactions on messages.
//!
//! A reaction is a toggle: the same (user, emoji) pair applied twice returns
//! the message to its prior state. The fan-out event carries the full current
//! reaction map rather than a delta, so a client that missed an earlier
//! toggle cannot drift.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

use crate::auth::middleware::Claims;
use crate::chat::{load_chat_for, reaction_map};
use crate::error::AppError;
use crate::events::{self, Event, ReactionMap};
use crate::state::AppState;

/// Maximum emoji length (bytes). Generous enough for multi-codepoint emoji.
const MAX_EMOJI_LENGTH: usize = 64;

#[derive(Debug, Deserialize)]
pub struct ToggleReactionRequest {
    pub emoji: String,
}

/// POST /api/chats/{chat_id}/messages/{message_id}/reactions
/// Toggle the caller's reaction on a message. Participant-only.
/// Returns the full reaction map after the toggle and fans out
/// `messageReactionUpdated` to the counterpart.
pub async fn toggle_reaction(
    State(state): State<AppState>,
    claims: Claims,
    Path((chat_id, message_id)): Path<(String, String)>,
    Json(body): Json<ToggleReactionRequest>,
) -> Result<Json<ReactionMap>, AppError> {
    let emoji = body.emoji.trim().to_string();
    if emoji.is_empty() {
        return Err(AppError::BadRequest("emoji must not be empty"));
    }
    if emoji.len() > MAX_EMOJI_LENGTH {
        return Err(AppError::BadRequest("emoji too long"));
    }

    let db = state.db.clone();
    let user_id = claims.sub.clone();
    let mid = message_id.clone();

    let (reactions, chat_id, counterpart) = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| AppError::Internal)?;
        let chat = load_chat_for(&conn, &chat_id, &user_id)?;

        let message_exists: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM messages WHERE id = ?1 AND chat_id = ?2",
                rusqlite::params![mid, chat.id],
                |row| row.get::<_, i64>(0).map(|c| c > 0),
            )
            .unwrap_or(false);
        if !message_exists {
            return Err(AppError::NotFound("message not found"));
        }

        // Toggle: remove the triple if present, otherwise add it. Both legs
        // are idempotent set operations; the whole toggle runs under the
        // store lock, so concurrent reactors cannot lose each other's
        // updates.
        let removed = conn.execute(
            "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
            rusqlite::params![mid, user_id, emoji],
        )?;
        if removed == 0 {
            conn.execute(
                "INSERT OR IGNORE INTO reactions (message_id, user_id, emoji) VALUES (?1, ?2, ?3)",
                rusqlite::params![mid, user_id, emoji],
            )?;
        }

        let reactions = reaction_map(&conn, &mid)?;
        Ok::<_, AppError>((reactions, chat.id.clone(), chat.counterpart_of(&user_id)))
    })
    .await??;

    events::publish(
        &state.registry,
        &counterpart,
        &Event::MessageReactionUpdated {
            chat_id,
            message_id,
            reactions: reactions.clone(),
        },
    );

    Ok(Json(reactions))
}

//! REST endpoints for chat messages: send, history, delete.
//!
//! Fetching a chat's messages doubles as mark-as-read: every message the
//! caller didn't author gets the caller appended to its read-receipt set
//! before the rows are returned. There is no separate "mark read" action.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::chat::{load_chat_for, reaction_map};
use crate::error::AppError;
use crate::events::{self, Event, ReactionMap};
use crate::state::AppState;

/// Maximum message content length (chars).
const MAX_CONTENT_LENGTH: usize = 4000;

// --- Request / Response types ---

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    pub reply_to_id: Option<String>,
}

/// Snapshot of a replied-to message, captured at send time.
/// Deliberately not a live link: deleting the original does not blank this.
#[derive(Debug, Clone, Serialize)]
pub struct ReplySnapshot {
    pub message_id: String,
    pub sender_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub reply_to: Option<ReplySnapshot>,
    pub read_by: Vec<String>,
    pub reactions: ReactionMap,
    pub created_at: String,
}

// --- Handlers ---

/// POST /api/chats/{chat_id}/messages
/// Send a message. Participant-only. Body: { content, reply_to_id? }.
/// Fans out `newMessage` to the counterpart after the write commits.
pub async fn send_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(chat_id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), AppError> {
    let content = body.content.trim().to_string();
    if content.is_empty() {
        return Err(AppError::BadRequest("message content must not be empty"));
    }
    if content.len() > MAX_CONTENT_LENGTH {
        return Err(AppError::BadRequest("message content too long"));
    }

    let db = state.db.clone();
    let user_id = claims.sub.clone();
    let reply_to_id = body.reply_to_id;

    let (response, counterpart) = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| AppError::Internal)?;
        let chat = load_chat_for(&conn, &chat_id, &user_id)?;

        let sender_name: String = conn.query_row(
            "SELECT display_name FROM users WHERE id = ?1",
            rusqlite::params![user_id],
            |row| row.get(0),
        )?;

        // Snapshot the replied-to message now; later edits or deletes of the
        // original must not retroactively change this reply.
        let reply_to = match &reply_to_id {
            Some(target_id) => {
                let snapshot = conn
                    .query_row(
                        "SELECT id, sender_id, content FROM messages
                         WHERE id = ?1 AND chat_id = ?2",
                        rusqlite::params![target_id, chat.id],
                        |row| {
                            Ok(ReplySnapshot {
                                message_id: row.get(0)?,
                                sender_id: row.get(1)?,
                                content: row.get(2)?,
                            })
                        },
                    )
                    .map_err(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => {
                            AppError::NotFound("reply target not found in this chat")
                        }
                        other => AppError::Store(other),
                    })?;
                Some(snapshot)
            }
            None => None,
        };

        let message_id = Uuid::now_v7().to_string();
        let created_at = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO messages
                 (id, chat_id, sender_id, content,
                  reply_to_id, reply_to_sender_id, reply_to_content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                message_id,
                chat.id,
                user_id,
                content,
                reply_to.as_ref().map(|r| r.message_id.clone()),
                reply_to.as_ref().map(|r| r.sender_id.clone()),
                reply_to.as_ref().map(|r| r.content.clone()),
                created_at,
            ],
        )?;

        conn.execute(
            "UPDATE chats SET last_message_at = ?1 WHERE id = ?2",
            rusqlite::params![created_at, chat.id],
        )?;

        let counterpart = chat.counterpart_of(&user_id);
        let response = MessageResponse {
            id: message_id,
            chat_id: chat.id,
            sender_id: user_id,
            sender_name,
            content,
            reply_to,
            read_by: Vec::new(),
            reactions: ReactionMap::new(),
            created_at,
        };

        Ok::<_, AppError>((response, counterpart))
    })
    .await??;

    // Write committed; push is latency-only from here on.
    events::publish(
        &state.registry,
        &counterpart,
        &Event::NewMessage {
            message: response.clone(),
        },
    );

    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/chats/{chat_id}/messages
/// Full message history, oldest first. Participant-only.
/// Marks every message not authored by the caller as read, idempotently,
/// before returning.
pub async fn list_messages(
    State(state): State<AppState>,
    claims: Claims,
    Path(chat_id): Path<String>,
) -> Result<Json<Vec<MessageResponse>>, AppError> {
    let db = state.db.clone();
    let user_id = claims.sub;

    let messages = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| AppError::Internal)?;
        let chat = load_chat_for(&conn, &chat_id, &user_id)?;

        // Mark-as-read side effect. INSERT OR IGNORE makes re-opening the
        // same chat a no-op beyond the first fetch.
        conn.execute(
            "INSERT OR IGNORE INTO read_receipts (message_id, user_id)
             SELECT id, ?1 FROM messages WHERE chat_id = ?2 AND sender_id <> ?1",
            rusqlite::params![user_id, chat.id],
        )?;

        let mut stmt = conn.prepare(
            "SELECT m.id, m.chat_id, m.sender_id, m.content,
                    m.reply_to_id, m.reply_to_sender_id, m.reply_to_content,
                    m.created_at, u.display_name
             FROM messages m
             JOIN users u ON u.id = m.sender_id
             WHERE m.chat_id = ?1
             ORDER BY m.created_at ASC, m.id ASC",
        )?;

        let mut messages: Vec<MessageResponse> = stmt
            .query_map(rusqlite::params![chat.id], |row| {
                let reply_to = match (
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ) {
                    (Some(message_id), Some(sender_id), Some(content)) => Some(ReplySnapshot {
                        message_id,
                        sender_id,
                        content,
                    }),
                    _ => None,
                };

                Ok(MessageResponse {
                    id: row.get(0)?,
                    chat_id: row.get(1)?,
                    sender_id: row.get(2)?,
                    content: row.get(3)?,
                    reply_to,
                    created_at: row.get(7)?,
                    sender_name: row.get(8)?,
                    read_by: Vec::new(),
                    reactions: ReactionMap::new(),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        for msg in &mut messages {
            msg.read_by = read_by(&conn, &msg.id)?;
            msg.reactions = reaction_map(&conn, &msg.id)?;
        }

        Ok::<_, AppError>(messages)
    })
    .await??;

    Ok(Json(messages))
}

/// DELETE /api/chats/{chat_id}/messages/{message_id}
/// Hard-delete a message. Only the sender may delete — the other participant
/// is Unauthorized even though they can read it.
/// Fans out `messageDeleted` to the counterpart after the write commits.
pub async fn delete_message(
    State(state): State<AppState>,
    claims: Claims,
    Path((chat_id, message_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let db = state.db.clone();
    let user_id = claims.sub.clone();
    let mid = message_id.clone();

    let (chat_id, counterpart) = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| AppError::Internal)?;
        let chat = load_chat_for(&conn, &chat_id, &user_id)?;

        let sender_id: String = conn
            .query_row(
                "SELECT sender_id FROM messages WHERE id = ?1 AND chat_id = ?2",
                rusqlite::params![mid, chat.id],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => AppError::NotFound("message not found"),
                other => AppError::Store(other),
            })?;

        if sender_id != user_id {
            return Err(AppError::Unauthorized("only the sender may delete a message"));
        }

        conn.execute("DELETE FROM messages WHERE id = ?1", rusqlite::params![mid])?;

        Ok::<_, AppError>((chat.id.clone(), chat.counterpart_of(&user_id)))
    })
    .await??;

    events::publish(
        &state.registry,
        &counterpart,
        &Event::MessageDeleted {
            chat_id,
            message_id,
        },
    );

    Ok(StatusCode::OK)
}

// --- Helpers ---

/// User ids that have fetched this chat since the message was sent.
fn read_by(conn: &Connection, message_id: &str) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM read_receipts WHERE message_id = ?1 ORDER BY user_id",
    )?;
    let readers = stmt
        .query_map(rusqlite::params![message_id], |row| row.get(0))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(readers)
}

//! REST endpoints for chat lifecycle and unread reconciliation.
//!
//! Chats are one-to-one between two users, created lazily on first contact.
//! Participant order is normalized (lexicographically smaller id is always
//! participant_a) to prevent duplicates.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::chat::{load_chat_for, normalize_pair};
use crate::error::AppError;
use crate::state::AppState;

// --- Request / Response types ---

#[derive(Debug, Deserialize)]
pub struct OpenChatRequest {
    pub counterpart_id: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub id: String,
    pub participant_a: String,
    pub participant_b: String,
    pub participant_a_name: String,
    pub participant_b_name: String,
    pub created_at: String,
    pub last_message_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub chat_id: String,
    pub counterpart_id: String,
    pub unread: i64,
}

// --- Handlers ---

/// POST /api/chats — Get or create a chat with a counterpart.
/// JWT auth required. Body: { "counterpart_id": "..." }.
/// Idempotent: returns the existing chat (200) if one already exists,
/// otherwise creates it (201).
pub async fn open_chat(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<OpenChatRequest>,
) -> Result<(StatusCode, Json<ChatResponse>), AppError> {
    let db = state.db.clone();
    let user_id = claims.sub.clone();
    let counterpart_id = body.counterpart_id;

    let (is_new, response) = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| AppError::Internal)?;

        if user_id == counterpart_id {
            return Err(AppError::BadRequest("cannot open a chat with yourself"));
        }

        let counterpart_name: String = conn
            .query_row(
                "SELECT display_name FROM users WHERE id = ?1",
                rusqlite::params![counterpart_id],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => AppError::NotFound("user not found"),
                other => AppError::Store(other),
            })?;

        let caller_name: String = conn.query_row(
            "SELECT display_name FROM users WHERE id = ?1",
            rusqlite::params![user_id],
            |row| row.get(0),
        )?;

        let (participant_a, participant_b) = normalize_pair(&user_id, &counterpart_id);
        let (name_a, name_b) = if participant_a == user_id {
            (caller_name, counterpart_name)
        } else {
            (counterpart_name, caller_name)
        };

        // Check if a chat already exists for this pair
        let existing: Option<(String, String, Option<String>)> = conn
            .query_row(
                "SELECT id, created_at, last_message_at FROM chats
                 WHERE participant_a = ?1 AND participant_b = ?2",
                rusqlite::params![participant_a, participant_b],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .ok();

        if let Some((id, created_at, last_message_at)) = existing {
            return Ok((
                false,
                ChatResponse {
                    id,
                    participant_a,
                    participant_b,
                    participant_a_name: name_a,
                    participant_b_name: name_b,
                    created_at,
                    last_message_at,
                },
            ));
        }

        let chat_id = Uuid::now_v7().to_string();
        let created_at = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO chats (id, participant_a, participant_b, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![chat_id, participant_a, participant_b, created_at],
        )?;

        Ok((
            true,
            ChatResponse {
                id: chat_id,
                participant_a,
                participant_b,
                participant_a_name: name_a,
                participant_b_name: name_b,
                created_at,
                last_message_at: None,
            },
        ))
    })
    .await??;

    let status = if is_new {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(response)))
}

/// GET /api/chats — List all chats for the authenticated user,
/// most recent activity first.
pub async fn list_chats(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<ChatResponse>>, AppError> {
    let db = state.db.clone();
    let user_id = claims.sub;

    let chats = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| AppError::Internal)?;

        let mut stmt = conn.prepare(
            "SELECT c.id, c.participant_a, c.participant_b, c.created_at, c.last_message_at,
                    ua.display_name, ub.display_name
             FROM chats c
             JOIN users ua ON ua.id = c.participant_a
             JOIN users ub ON ub.id = c.participant_b
             WHERE c.participant_a = ?1 OR c.participant_b = ?1
             ORDER BY CASE WHEN c.last_message_at IS NULL THEN 1 ELSE 0 END,
                      c.last_message_at DESC,
                      c.created_at DESC",
        )?;

        let chats: Vec<ChatResponse> = stmt
            .query_map(rusqlite::params![user_id], |row| {
                Ok(ChatResponse {
                    id: row.get(0)?,
                    participant_a: row.get(1)?,
                    participant_b: row.get(2)?,
                    created_at: row.get(3)?,
                    last_message_at: row.get(4)?,
                    participant_a_name: row.get(5)?,
                    participant_b_name: row.get(6)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok::<_, AppError>(chats)
    })
    .await??;

    Ok(Json(chats))
}

/// DELETE /api/chats/{id} — Remove a chat and its messages.
/// Participant-only. Either participant may delete; the chat is gone for both.
pub async fn delete_chat(
    State(state): State<AppState>,
    claims: Claims,
    Path(chat_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let db = state.db.clone();
    let user_id = claims.sub;

    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| AppError::Internal)?;
        let chat = load_chat_for(&conn, &chat_id, &user_id)?;

        // ON DELETE CASCADE takes messages, receipts, and reactions with it.
        conn.execute("DELETE FROM chats WHERE id = ?1", rusqlite::params![chat.id])?;

        Ok::<_, AppError>(())
    })
    .await??;

    Ok(StatusCode::OK)
}

/// GET /api/chats/unread — Unread message count per chat for the caller.
///
/// Recomputed from the store on every call — push delivery is best-effort,
/// so this pull path is what keeps clients honest. A message is unread when
/// the caller did not send it and the caller's id is absent from its
/// read-receipt set.
pub async fn unread_counts(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<UnreadCountResponse>>, AppError> {
    let db = state.db.clone();
    let user_id = claims.sub;

    let counts = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| AppError::Internal)?;

        let mut stmt = conn.prepare(
            "SELECT c.id,
                    CASE WHEN c.participant_a = ?1 THEN c.participant_b ELSE c.participant_a END,
                    COUNT(m.id)
             FROM chats c
             LEFT JOIN messages m
               ON m.chat_id = c.id
              AND m.sender_id <> ?1
              AND NOT EXISTS (
                  SELECT 1 FROM read_receipts r
                  WHERE r.message_id = m.id AND r.user_id = ?1
              )
             WHERE c.participant_a = ?1 OR c.participant_b = ?1
             GROUP BY c.id",
        )?;

        let counts: Vec<UnreadCountResponse> = stmt
            .query_map(rusqlite::params![user_id], |row| {
                Ok(UnreadCountResponse {
                    chat_id: row.get(0)?,
                    counterpart_id: row.get(1)?,
                    unread: row.get(2)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok::<_, AppError>(counts)
    })
    .await??;

    Ok(Json(counts))
}

//! REST endpoints for notifications.
//!
//! Notifications are destructive-read: deleting one is how it is marked
//! consumed, and there is no read flag retained. A client that fetches and
//! then crashes before rendering has permanently lost those rows — an
//! accepted trade-off of this model, not a bug.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::auth::middleware::Claims;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct NotificationResponse {
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub receiver_id: String,
    /// connectionRequest | acceptedConnection | rejectedConnection | message
    pub kind: String,
    pub body: String,
    pub created_at: String,
}

/// GET /api/notifications — The caller's notifications, newest first.
pub async fn list_notifications(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<NotificationResponse>>, AppError> {
    let db = state.db.clone();
    let user_id = claims.sub;

    let notifications = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| AppError::Internal)?;

        let mut stmt = conn.prepare(
            "SELECT n.id, n.sender_id, u.display_name, n.receiver_id, n.kind, n.body, n.created_at
             FROM notifications n
             JOIN users u ON u.id = n.sender_id
             WHERE n.receiver_id = ?1
             ORDER BY n.created_at DESC, n.id DESC",
        )?;

        let notifications: Vec<NotificationResponse> = stmt
            .query_map(rusqlite::params![user_id], |row| {
                Ok(NotificationResponse {
                    id: row.get(0)?,
                    sender_id: row.get(1)?,
                    sender_name: row.get(2)?,
                    receiver_id: row.get(3)?,
                    kind: row.get(4)?,
                    body: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok::<_, AppError>(notifications)
    })
    .await??;

    Ok(Json(notifications))
}

/// DELETE /api/notifications/{id} — Consume a single notification.
/// Receiver-only.
pub async fn delete_notification(
    State(state): State<AppState>,
    claims: Claims,
    Path(notification_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let db = state.db.clone();
    let user_id = claims.sub;

    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| AppError::Internal)?;

        let receiver_id: String = conn
            .query_row(
                "SELECT receiver_id FROM notifications WHERE id = ?1",
                rusqlite::params![notification_id],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    AppError::NotFound("notification not found")
                }
                other => AppError::Store(other),
            })?;

        if receiver_id != user_id {
            return Err(AppError::Unauthorized("not your notification"));
        }

        conn.execute(
            "DELETE FROM notifications WHERE id = ?1",
            rusqlite::params![notification_id],
        )?;

        Ok::<_, AppError>(())
    })
    .await??;

    Ok(StatusCode::OK)
}

/// DELETE /api/notifications — Consume all of the caller's notifications.
pub async fn delete_all_notifications(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<StatusCode, AppError> {
    let db = state.db.clone();
    let user_id = claims.sub;

    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| AppError::Internal)?;
        conn.execute(
            "DELETE FROM notifications WHERE receiver_id = ?1",
            rusqlite::params![user_id],
        )?;
        Ok::<_, AppError>(())
    })
    .await??;

    Ok(StatusCode::OK)
}

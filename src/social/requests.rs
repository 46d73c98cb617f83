//! REST endpoints for the social graph: connection requests and edges.
//!
//! A request is a directed pending edge that resolves exactly once. Accepting
//! it materializes one normalized row in `connections`, which stands for the
//! symmetric edge — both directions exist and vanish together.

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
use crate::chat::normalize_pair;
use crate::error::AppError;
use crate::events::{self, Event};
use crate::social::notifications::NotificationResponse;
use crate::state::AppState;

const KIND_CONNECTION_REQUEST: &str = "connectionRequest";
const KIND_ACCEPTED: &str = "acceptedConnection";
const KIND_REJECTED: &str = "rejectedConnection";

// --- Request / Response types ---

#[derive(Debug, Deserialize)]
pub struct CreateRequestBody {
    pub receiver_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RespondBody {
    /// "accept" or "reject"
    pub action: String,
}

#[derive(Debug, Serialize)]
pub struct RequestResponse {
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub receiver_id: String,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct ConnectionResponse {
    pub user_id: String,
    pub display_name: String,
    pub role: String,
    pub connected_at: String,
}

// --- Handlers ---

/// POST /api/requests — Send a connection request.
/// Conflict if a pending request for this pair exists or the two users are
/// already connected. Creates a `connectionRequest` notification and fans
/// out `newNotification` to the receiver.
pub async fn create_request(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<CreateRequestBody>,
) -> Result<(StatusCode, Json<RequestResponse>), AppError> {
    let db = state.db.clone();
    let sender_id = claims.sub.clone();
    let receiver_id = body.receiver_id;

    let (response, notification) = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| AppError::Internal)?;

        if sender_id == receiver_id {
            return Err(AppError::BadRequest("cannot send a request to yourself"));
        }

        // Receiver must exist
        conn.query_row(
            "SELECT 1 FROM users WHERE id = ?1",
            rusqlite::params![receiver_id],
            |_| Ok(()),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => AppError::NotFound("user not found"),
            other => AppError::Store(other),
        })?;

        let sender_name: String = conn.query_row(
            "SELECT display_name FROM users WHERE id = ?1",
            rusqlite::params![sender_id],
            |row| row.get(0),
        )?;

        let (user_a, user_b) = normalize_pair(&sender_id, &receiver_id);
        let already_connected: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM connections WHERE user_a = ?1 AND user_b = ?2",
                rusqlite::params![user_a, user_b],
                |row| row.get::<_, i64>(0).map(|c| c > 0),
            )
            .unwrap_or(false);
        if already_connected {
            return Err(AppError::Conflict("users are already connected"));
        }

        let request_id = Uuid::now_v7().to_string();
        let created_at = Utc::now().to_rfc3339();

        // The partial unique index on (sender, receiver) WHERE pending makes
        // this the single point of truth for the one-pending-request rule.
        conn.execute(
            "INSERT INTO connection_requests (id, sender_id, receiver_id, status, created_at)
             VALUES (?1, ?2, ?3, 'pending', ?4)",
            rusqlite::params![request_id, sender_id, receiver_id, created_at],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                AppError::Conflict("a request between these users is already pending")
            }
            other => AppError::Store(other),
        })?;

        let notification = insert_notification(
            &conn,
            &sender_id,
            &sender_name,
            &receiver_id,
            KIND_CONNECTION_REQUEST,
            &format!("{} sent you a connection request", sender_name),
        )?;

        Ok::<_, AppError>((
            RequestResponse {
                id: request_id,
                sender_id,
                sender_name,
                receiver_id,
                status: "pending".to_string(),
                created_at,
            },
            notification,
        ))
    })
    .await??;

    events::publish(
        &state.registry,
        &response.receiver_id,
        &Event::NewNotification { notification },
    );

    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/requests/{id}/respond — Accept or reject a pending request.
/// Receiver-only; Conflict once the request is terminal. On accept the
/// symmetric connection edge is created. Either way the receiver's pending
/// `connectionRequest` notifications from that sender are consumed and the
/// original sender is notified.
pub async fn respond_request(
    State(state): State<AppState>,
    claims: Claims,
    Path(request_id): Path<String>,
    Json(body): Json<RespondBody>,
) -> Result<Json<RequestResponse>, AppError> {
    let accept = match body.action.as_str() {
        "accept" => true,
        "reject" => false,
        _ => return Err(AppError::BadRequest("action must be \"accept\" or \"reject\"")),
    };

    let db = state.db.clone();
    let user_id = claims.sub.clone();

    let (response, notification) = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| AppError::Internal)?;

        let (sender_id, receiver_id, status, created_at): (String, String, String, String) = conn
            .query_row(
                "SELECT sender_id, receiver_id, status, created_at
                 FROM connection_requests WHERE id = ?1",
                rusqlite::params![request_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => AppError::NotFound("request not found"),
                other => AppError::Store(other),
            })?;

        if receiver_id != user_id {
            return Err(AppError::Unauthorized("only the receiver may respond"));
        }
        if status != "pending" {
            return Err(AppError::Conflict("request already resolved"));
        }

        let new_status = if accept { "accepted" } else { "rejected" };
        let responded_at = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE connection_requests SET status = ?1, responded_at = ?2 WHERE id = ?3",
            rusqlite::params![new_status, responded_at, request_id],
        )?;

        if accept {
            let (user_a, user_b) = normalize_pair(&sender_id, &receiver_id);
            conn.execute(
                "INSERT OR IGNORE INTO connections (user_a, user_b, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![user_a, user_b, responded_at],
            )?;
        }

        // The request notification has served its purpose either way.
        conn.execute(
            "DELETE FROM notifications
             WHERE receiver_id = ?1 AND sender_id = ?2 AND kind = ?3",
            rusqlite::params![receiver_id, sender_id, KIND_CONNECTION_REQUEST],
        )?;

        let receiver_name: String = conn.query_row(
            "SELECT display_name FROM users WHERE id = ?1",
            rusqlite::params![receiver_id],
            |row| row.get(0),
        )?;
        let sender_name: String = conn.query_row(
            "SELECT display_name FROM users WHERE id = ?1",
            rusqlite::params![sender_id],
            |row| row.get(0),
        )?;

        let (kind, verb) = if accept {
            (KIND_ACCEPTED, "accepted")
        } else {
            (KIND_REJECTED, "declined")
        };
        let notification = insert_notification(
            &conn,
            &receiver_id,
            &receiver_name,
            &sender_id,
            kind,
            &format!("{} {} your connection request", receiver_name, verb),
        )?;

        Ok::<_, AppError>((
            RequestResponse {
                id: request_id,
                sender_id,
                sender_name,
                receiver_id,
                status: new_status.to_string(),
                created_at,
            },
            notification,
        ))
    })
    .await??;

    // Addressed to the original sender, never echoed to the responder.
    events::publish(
        &state.registry,
        &response.sender_id,
        &Event::NewNotification { notification },
    );

    Ok(Json(response))
}

/// GET /api/requests — Pending requests addressed to the caller.
pub async fn list_requests(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<RequestResponse>>, AppError> {
    let db = state.db.clone();
    let user_id = claims.sub;

    let requests = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| AppError::Internal)?;

        let mut stmt = conn.prepare(
            "SELECT r.id, r.sender_id, u.display_name, r.receiver_id, r.status, r.created_at
             FROM connection_requests r
             JOIN users u ON u.id = r.sender_id
             WHERE r.receiver_id = ?1 AND r.status = 'pending'
             ORDER BY r.created_at DESC",
        )?;

        let requests: Vec<RequestResponse> = stmt
            .query_map(rusqlite::params![user_id], |row| {
                Ok(RequestResponse {
                    id: row.get(0)?,
                    sender_id: row.get(1)?,
                    sender_name: row.get(2)?,
                    receiver_id: row.get(3)?,
                    status: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok::<_, AppError>(requests)
    })
    .await??;

    Ok(Json(requests))
}

/// GET /api/connections — The caller's accepted connections.
pub async fn list_connections(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<ConnectionResponse>>, AppError> {
    let db = state.db.clone();
    let user_id = claims.sub;

    let connections = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| AppError::Internal)?;

        let mut stmt = conn.prepare(
            "SELECT u.id, u.display_name, u.role, con.created_at
             FROM connections con
             JOIN users u
               ON u.id = CASE WHEN con.user_a = ?1 THEN con.user_b ELSE con.user_a END
             WHERE con.user_a = ?1 OR con.user_b = ?1
             ORDER BY u.display_name",
        )?;

        let connections: Vec<ConnectionResponse> = stmt
            .query_map(rusqlite::params![user_id], |row| {
                Ok(ConnectionResponse {
                    user_id: row.get(0)?,
                    display_name: row.get(1)?,
                    role: row.get(2)?,
                    connected_at: row.get(3)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok::<_, AppError>(connections)
    })
    .await??;

    Ok(Json(connections))
}

/// DELETE /api/connections/{user_id} — Remove the edge with another user.
/// One operation removes both directions (the edge is a single normalized
/// row).
pub async fn remove_connection(
    State(state): State<AppState>,
    claims: Claims,
    Path(other_user_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let db = state.db.clone();
    let user_id = claims.sub;

    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| AppError::Internal)?;

        let (user_a, user_b) = normalize_pair(&user_id, &other_user_id);
        let removed = conn.execute(
            "DELETE FROM connections WHERE user_a = ?1 AND user_b = ?2",
            rusqlite::params![user_a, user_b],
        )?;
        if removed == 0 {
            return Err(AppError::NotFound("connection not found"));
        }

        Ok::<_, AppError>(())
    })
    .await??;

    Ok(StatusCode::OK)
}

// --- Helpers ---

/// Insert a notification row and return its response form for fan-out.
fn insert_notification(
    conn: &Connection,
    sender_id: &str,
    sender_name: &str,
    receiver_id: &str,
    kind: &str,
    body: &str,
) -> Result<NotificationResponse, AppError> {
    let id = Uuid::now_v7().to_string();
    let created_at = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO notifications (id, sender_id, receiver_id, kind, body, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![id, sender_id, receiver_id, kind, body, created_at],
    )?;

    Ok(NotificationResponse {
        id,
        sender_id: sender_id.to_string(),
        sender_name: sender_name.to_string(),
        receiver_id: receiver_id.to_string(),
        kind: kind.to_string(),
        body: body.to_string(),
        created_at,
    })
}

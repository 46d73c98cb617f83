//! Minimal identity surface: registration and directory lookups.
//!
//! Registration mints a durable user id and an access token, nothing more.
//! Credentialing (passwords, SSO, alumni verification) belongs to an
//! upstream identity provider.

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::jwt;
use crate::auth::middleware::Claims;
use crate::error::AppError;
use crate::state::AppState;

/// Maximum display name length (chars).
const MAX_DISPLAY_NAME_LENGTH: usize = 64;

const DEFAULT_ROLE: &str = "student";

// --- Request / Response types ---

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub display_name: String,
    pub role: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub display_name: String,
    pub role: String,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user: UserResponse,
    pub access_token: String,
}

// --- Handlers ---

/// POST /api/users/register
/// Create a user and issue an access token. Rate limited.
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), AppError> {
    let display_name = body.display_name.trim().to_string();
    if display_name.is_empty() {
        return Err(AppError::BadRequest("display name must not be empty"));
    }
    if display_name.len() > MAX_DISPLAY_NAME_LENGTH {
        return Err(AppError::BadRequest("display name too long"));
    }
    let role = body
        .role
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| DEFAULT_ROLE.to_string());

    let db = state.db.clone();
    let user = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| AppError::Internal)?;

        let id = Uuid::now_v7().to_string();
        let created_at = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO users (id, display_name, role, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![id, display_name, role, created_at],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                AppError::Conflict("display name already taken")
            }
            other => AppError::Store(other),
        })?;

        Ok::<_, AppError>(UserResponse {
            id,
            display_name,
            role,
            created_at,
        })
    })
    .await??;

    let access_token = jwt::issue_access_token(&state.jwt_secret, &user.id, &user.display_name)
        .map_err(|_| AppError::Internal)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse { user, access_token }),
    ))
}

/// GET /api/users/me — The caller's own profile. JWT auth required.
pub async fn me(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<UserResponse>, AppError> {
    let db = state.db.clone();
    let user_id = claims.sub;

    let user = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| AppError::Internal)?;
        conn.query_row(
            "SELECT id, display_name, role, created_at FROM users WHERE id = ?1",
            rusqlite::params![user_id],
            |row| {
                Ok(UserResponse {
                    id: row.get(0)?,
                    display_name: row.get(1)?,
                    role: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => AppError::NotFound("user not found"),
            other => AppError::Store(other),
        })
    })
    .await??;

    Ok(Json(user))
}

/// GET /api/users — Directory listing. JWT auth required.
pub async fn list_users(
    State(state): State<AppState>,
    _claims: Claims,
) -> Result<Json<Vec<UserResponse>>, AppError> {
    let db = state.db.clone();

    let users = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| AppError::Internal)?;
        let mut stmt = conn.prepare(
            "SELECT id, display_name, role, created_at FROM users ORDER BY display_name",
        )?;

        let users: Vec<UserResponse> = stmt
            .query_map([], |row| {
                Ok(UserResponse {
                    id: row.get(0)?,
                    display_name: row.get(1)?,
                    role: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok::<_, AppError>(users)
    })
    .await??;

    Ok(Json(users))
}

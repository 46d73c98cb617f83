use axum::{middleware, Router};
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::auth::middleware::JwtSecret;
use crate::chat::{chats, messages, reactions};
use crate::social::{notifications, requests};
use crate::state::AppState;
use crate::users;
use crate::ws::handler as ws_handler;

/// Make the signing secret reachable from request parts, where the Claims
/// extractor runs without access to application state.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Registration is the only unauthenticated mutation; cap it at 5 per
    // minute per IP. PeerIpKeyExtractor reads ConnectInfo<SocketAddr>.
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(12) // one token every 12s
            .burst_size(5)
            .finish()
            .expect("Failed to build governor config"),
    );
    let governor_limiter = governor_config.limiter().clone();

    // The limiter accumulates per-IP state; prune it periodically.
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            governor_limiter.retain_recent();
        }
    });

    let registration_routes = Router::new()
        .route(
            "/api/users/register",
            axum::routing::post(users::register),
        )
        .layer(GovernorLayer {
            config: governor_config,
        });

    let user_routes = Router::new()
        .route("/api/users/me", axum::routing::get(users::me))
        .route("/api/users", axum::routing::get(users::list_users));

    let chat_routes = Router::new()
        .route("/api/chats", axum::routing::post(chats::open_chat))
        .route("/api/chats", axum::routing::get(chats::list_chats))
        .route("/api/chats/unread", axum::routing::get(chats::unread_counts))
        .route("/api/chats/{id}", axum::routing::delete(chats::delete_chat))
        .route(
            "/api/chats/{id}/messages",
            axum::routing::get(messages::list_messages),
        )
        .route(
            "/api/chats/{id}/messages",
            axum::routing::post(messages::send_message),
        )
        .route(
            "/api/chats/{id}/messages/{message_id}",
            axum::routing::delete(messages::delete_message),
        )
        .route(
            "/api/chats/{id}/messages/{message_id}/reactions",
            axum::routing::post(reactions::toggle_reaction),
        );

    let social_routes = Router::new()
        .route("/api/requests", axum::routing::post(requests::create_request))
        .route("/api/requests", axum::routing::get(requests::list_requests))
        .route(
            "/api/requests/{id}/respond",
            axum::routing::post(requests::respond_request),
        )
        .route(
            "/api/connections",
            axum::routing::get(requests::list_connections),
        )
        .route(
            "/api/connections/{user_id}",
            axum::routing::delete(requests::remove_connection),
        );

    let notification_routes = Router::new()
        .route(
            "/api/notifications",
            axum::routing::get(notifications::list_notifications),
        )
        .route(
            "/api/notifications/{id}",
            axum::routing::delete(notifications::delete_notification),
        )
        .route(
            "/api/notifications",
            axum::routing::delete(notifications::delete_all_notifications),
        );

    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(registration_routes)
        .merge(user_routes)
        .merge(chat_routes)
        .merge(social_routes)
        .merge(notification_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

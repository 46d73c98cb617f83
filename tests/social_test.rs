//! Integration tests for connection requests, the symmetric connection
//! edge, and destructive-read notifications.

use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Helper: start the server on a random port and return its base URL.
async fn start_test_server() -> String {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = alumnet_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = alumnet_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");

    let state = alumnet_server::state::AppState {
        db,
        jwt_secret,
        registry: Arc::new(alumnet_server::registry::Registry::new()),
    };

    let app = alumnet_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    format!("http://{}", addr)
}

/// Register a user and return (access_token, user_id).
async fn register_user(base_url: &str, display_name: &str) -> (String, String) {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/users/register", base_url))
        .json(&json!({ "display_name": display_name }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 201, "Registration failed for {}", display_name);
    let body: serde_json::Value = resp.json().await.unwrap();
    (
        body["access_token"].as_str().unwrap().to_string(),
        body["user"]["id"].as_str().unwrap().to_string(),
    )
}

/// Send a connection request, returning the request id.
async fn send_request(base_url: &str, token: &str, receiver_id: &str) -> String {
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/requests", base_url))
        .bearer_auth(token)
        .json(&json!({ "receiver_id": receiver_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: serde_json::Value = resp.json().await.unwrap();
    body["id"].as_str().unwrap().to_string()
}

async fn respond(
    base_url: &str,
    token: &str,
    request_id: &str,
    action: &str,
) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{}/api/requests/{}/respond", base_url, request_id))
        .bearer_auth(token)
        .json(&json!({ "action": action }))
        .send()
        .await
        .unwrap()
}

async fn fetch_notifications(base_url: &str, token: &str) -> serde_json::Value {
    let resp = reqwest::Client::new()
        .get(format!("{}/api/notifications", base_url))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    resp.json().await.unwrap()
}

async fn fetch_connections(base_url: &str, token: &str) -> serde_json::Value {
    let resp = reqwest::Client::new()
        .get(format!("{}/api/connections", base_url))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    resp.json().await.unwrap()
}

#[tokio::test]
async fn test_accept_flow_creates_edge_and_swaps_notifications() {
    let base_url = start_test_server().await;
    let (token_a, id_a) = register_user(&base_url, "FlowAlice").await;
    let (token_b, id_b) = register_user(&base_url, "FlowBob").await;

    let request_id = send_request(&base_url, &token_a, &id_b).await;

    // Bob sees the pending request and its notification
    let notifications = fetch_notifications(&base_url, &token_b).await;
    let notifications = notifications.as_array().unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0]["kind"], "connectionRequest");
    assert_eq!(notifications[0]["sender_id"], id_a.as_str());

    // Bob accepts
    let resp = respond(&base_url, &token_b, &request_id, "accept").await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "accepted");

    // The edge exists in both directions
    let a_conns = fetch_connections(&base_url, &token_a).await;
    assert_eq!(a_conns[0]["user_id"], id_b.as_str());
    let b_conns = fetch_connections(&base_url, &token_b).await;
    assert_eq!(b_conns[0]["user_id"], id_a.as_str());

    // Exactly one acceptedConnection notification for Alice
    let a_notifications = fetch_notifications(&base_url, &token_a).await;
    let a_notifications = a_notifications.as_array().unwrap();
    assert_eq!(a_notifications.len(), 1);
    assert_eq!(a_notifications[0]["kind"], "acceptedConnection");
    assert_eq!(a_notifications[0]["sender_id"], id_b.as_str());

    // Bob's connectionRequest notification from Alice was consumed
    let b_notifications = fetch_notifications(&base_url, &token_b).await;
    assert!(b_notifications.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_at_most_one_pending_request_per_pair() {
    let base_url = start_test_server().await;
    let (token_a, _id_a) = register_user(&base_url, "PendAlice").await;
    let (token_b, id_b) = register_user(&base_url, "PendBob").await;

    let request_id = send_request(&base_url, &token_a, &id_b).await;

    // A second request while the first is pending is rejected
    let resp = reqwest::Client::new()
        .post(format!("{}/api/requests", base_url))
        .bearer_auth(&token_a)
        .json(&json!({ "receiver_id": id_b }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    // After resolution (reject), a fresh request is permitted
    let resp = respond(&base_url, &token_b, &request_id, "reject").await;
    assert_eq!(resp.status(), 200);
    send_request(&base_url, &token_a, &id_b).await;
}

#[tokio::test]
async fn test_request_between_connected_users_is_a_conflict() {
    let base_url = start_test_server().await;
    let (token_a, _id_a) = register_user(&base_url, "ConnAlice").await;
    let (token_b, id_b) = register_user(&base_url, "ConnBob").await;

    let request_id = send_request(&base_url, &token_a, &id_b).await;
    respond(&base_url, &token_b, &request_id, "accept").await;

    let resp = reqwest::Client::new()
        .post(format!("{}/api/requests", base_url))
        .bearer_auth(&token_a)
        .json(&json!({ "receiver_id": id_b }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
}

#[tokio::test]
async fn test_reject_flow_notifies_sender_without_creating_edge() {
    let base_url = start_test_server().await;
    let (token_a, _id_a) = register_user(&base_url, "RejAlice").await;
    let (token_b, id_b) = register_user(&base_url, "RejBob").await;

    let request_id = send_request(&base_url, &token_a, &id_b).await;
    let resp = respond(&base_url, &token_b, &request_id, "reject").await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "rejected");

    // No edge was created
    assert!(fetch_connections(&base_url, &token_a)
        .await
        .as_array()
        .unwrap()
        .is_empty());

    // Alice learns about the rejection
    let notifications = fetch_notifications(&base_url, &token_a).await;
    assert_eq!(notifications[0]["kind"], "rejectedConnection");
}

#[tokio::test]
async fn test_only_the_receiver_may_respond_and_only_once() {
    let base_url = start_test_server().await;
    let (token_a, _id_a) = register_user(&base_url, "OnceAlice").await;
    let (token_b, id_b) = register_user(&base_url, "OnceBob").await;
    let (token_c, _id_c) = register_user(&base_url, "OnceCarol").await;

    let request_id = send_request(&base_url, &token_a, &id_b).await;

    // Carol is not the receiver
    let resp = respond(&base_url, &token_c, &request_id, "accept").await;
    assert_eq!(resp.status(), 403);

    // The sender cannot accept their own request either
    let resp = respond(&base_url, &token_a, &request_id, "accept").await;
    assert_eq!(resp.status(), 403);

    // Bob resolves it; the request is then terminal
    let resp = respond(&base_url, &token_b, &request_id, "accept").await;
    assert_eq!(resp.status(), 200);
    let resp = respond(&base_url, &token_b, &request_id, "reject").await;
    assert_eq!(resp.status(), 409);

    // Unknown action is rejected outright
    let resp = respond(&base_url, &token_b, &request_id, "maybe").await;
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_notification_read_is_destructive() {
    let base_url = start_test_server().await;
    let (token_a, _id_a) = register_user(&base_url, "NotifAlice").await;
    let (token_b, id_b) = register_user(&base_url, "NotifBob").await;
    let (token_c, id_c) = register_user(&base_url, "NotifCarol").await;

    // Two notifications for Carol: requests from Alice and Bob
    send_request(&base_url, &token_a, &id_c).await;
    send_request(&base_url, &token_b, &id_c).await;

    let notifications = fetch_notifications(&base_url, &token_c).await;
    let notifications = notifications.as_array().unwrap();
    assert_eq!(notifications.len(), 2);
    let first_id = notifications[0]["id"].as_str().unwrap();

    // Only the receiver may consume a notification
    let resp = reqwest::Client::new()
        .delete(format!("{}/api/notifications/{}", base_url, first_id))
        .bearer_auth(&token_b)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    // Consuming one removes it permanently
    let resp = reqwest::Client::new()
        .delete(format!("{}/api/notifications/{}", base_url, first_id))
        .bearer_auth(&token_c)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let notifications = fetch_notifications(&base_url, &token_c).await;
    assert_eq!(notifications.as_array().unwrap().len(), 1);

    // Consuming all clears the rest
    let resp = reqwest::Client::new()
        .delete(format!("{}/api/notifications", base_url))
        .bearer_auth(&token_c)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let notifications = fetch_notifications(&base_url, &token_c).await;
    assert!(notifications.as_array().unwrap().is_empty());

    // Unknown ids are NotFound, even for the receiver
    let resp = reqwest::Client::new()
        .delete(format!("{}/api/notifications/{}", base_url, first_id))
        .bearer_auth(&token_c)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_removing_a_connection_severs_both_directions() {
    let base_url = start_test_server().await;
    let (token_a, id_a) = register_user(&base_url, "SevAlice").await;
    let (token_b, id_b) = register_user(&base_url, "SevBob").await;

    let request_id = send_request(&base_url, &token_a, &id_b).await;
    respond(&base_url, &token_b, &request_id, "accept").await;

    // Bob removes the edge; it disappears for both
    let resp = reqwest::Client::new()
        .delete(format!("{}/api/connections/{}", base_url, id_a))
        .bearer_auth(&token_b)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    assert!(fetch_connections(&base_url, &token_a)
        .await
        .as_array()
        .unwrap()
        .is_empty());
    assert!(fetch_connections(&base_url, &token_b)
        .await
        .as_array()
        .unwrap()
        .is_empty());

    // Removing it again is NotFound
    let resp = reqwest::Client::new()
        .delete(format!("{}/api/connections/{}", base_url, id_a))
        .bearer_auth(&token_b)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

//! Integration tests for WebSocket auth, keepalive, and targeted event
//! delivery (including the no-echo rule).

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

type WsRead = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;
type WsWrite = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Helper: start the server on a random port and return (base_url, addr).
async fn start_test_server() -> (String, SocketAddr) {
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

    (format!("http://{}", addr), addr)
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

/// Connect to the live channel as an authenticated user.
async fn connect_ws(addr: SocketAddr, token: &str) -> (WsWrite, WsRead) {
    let ws_url = format!("ws://{}/ws?token={}", addr, token);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream.split()
}

/// Read the next JSON event frame, failing on anything else.
async fn next_event(read: &mut WsRead) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
            .await
            .expect("Expected event within timeout")
            .expect("Stream ended")
            .expect("WebSocket error");
        match msg {
            Message::Text(text) => {
                return serde_json::from_str(text.as_str()).expect("Event should be JSON")
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("Expected text event frame, got: {:?}", other),
        }
    }
}

/// Assert that no event arrives on this socket within the window.
async fn assert_silent(read: &mut WsRead, window: Duration) {
    let result = tokio::time::timeout(window, read.next()).await;
    if let Ok(Some(Ok(msg))) = &result {
        assert!(
            matches!(msg, Message::Ping(_) | Message::Pong(_)),
            "Expected silence, got: {:?}",
            msg
        );
    }
}

#[tokio::test]
async fn test_ws_connection_with_valid_jwt() {
    let (base_url, addr) = start_test_server().await;
    let (token, _user_id) = register_user(&base_url, "WsUser1").await;

    let (mut _write, mut read) = connect_ws(addr, &token).await;

    // The live channel is push-only; a fresh connection stays silent.
    assert_silent(&mut read, Duration::from_millis(500)).await;
}

#[tokio::test]
async fn test_ws_auth_failure_invalid_token() {
    let (_base_url, addr) = start_test_server().await;

    // Use a completely invalid token
    let ws_url = format!("ws://{}/ws?token=invalid_jwt_token", addr);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("WebSocket should upgrade even with invalid token");

    let (mut _write, mut read) = ws_stream.split();

    // Server should immediately send a close frame with code 4002 (token invalid)
    let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
        .await
        .expect("Expected close message within timeout");

    match msg {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(
                frame.code,
                tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::from(4002),
                "Expected close code 4002 (token invalid)"
            );
        }
        Some(Ok(Message::Close(None))) => {
            // Close without frame — acceptable for invalid token
        }
        other => {
            if let Some(Ok(msg)) = other {
                assert!(msg.is_close(), "Expected close message, got: {:?}", msg);
            }
        }
    }
}

#[tokio::test]
async fn test_ws_ping_pong() {
    let (base_url, addr) = start_test_server().await;
    let (token, _user_id) = register_user(&base_url, "PingPongUser").await;

    let (mut write, mut read) = connect_ws(addr, &token).await;

    // Send a client ping
    write
        .send(Message::Ping(vec![42, 43, 44].into()))
        .await
        .expect("Failed to send ping");

    // We should receive a pong back
    let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
        .await
        .expect("Expected pong within timeout");

    match msg {
        Some(Ok(Message::Pong(data))) => {
            assert_eq!(data.as_ref(), &[42, 43, 44], "Pong data should match ping");
        }
        other => panic!("Expected Pong message, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_new_message_is_delivered_to_counterpart_only() {
    let (base_url, addr) = start_test_server().await;
    let (token_a, _id_a) = register_user(&base_url, "Alice").await;
    let (token_b, id_b) = register_user(&base_url, "Bob").await;

    let (mut _write_a, mut read_a) = connect_ws(addr, &token_a).await;
    let (mut _write_b, mut read_b) = connect_ws(addr, &token_b).await;

    let client = reqwest::Client::new();

    // Alice opens a chat with Bob
    let resp = client
        .post(format!("{}/api/chats", base_url))
        .bearer_auth(&token_a)
        .json(&json!({ "counterpart_id": id_b }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let chat: serde_json::Value = resp.json().await.unwrap();
    let chat_id = chat["id"].as_str().unwrap();

    // Alice sends a message
    let resp = client
        .post(format!("{}/api/chats/{}/messages", base_url, chat_id))
        .bearer_auth(&token_a)
        .json(&json!({ "content": "hi" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    // Bob receives the event
    let event = next_event(&mut read_b).await;
    assert_eq!(event["type"], "newMessage");
    assert_eq!(event["data"]["message"]["content"], "hi");
    assert_eq!(event["data"]["message"]["chat_id"], chat_id);

    // Alice never receives an echo of her own mutation
    assert_silent(&mut read_a, Duration::from_millis(500)).await;
}

#[tokio::test]
async fn test_events_reach_every_connection_of_a_user() {
    let (base_url, addr) = start_test_server().await;
    let (token_a, _id_a) = register_user(&base_url, "MultiTabSender").await;
    let (token_b, id_b) = register_user(&base_url, "MultiTabReceiver").await;

    // Receiver has two live connections (two tabs)
    let (mut _w1, mut read_first) = connect_ws(addr, &token_b).await;
    let (mut _w2, mut read_second) = connect_ws(addr, &token_b).await;

    let client = reqwest::Client::new();
    let chat: serde_json::Value = client
        .post(format!("{}/api/chats", base_url))
        .bearer_auth(&token_a)
        .json(&json!({ "counterpart_id": id_b }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let chat_id = chat["id"].as_str().unwrap();

    client
        .post(format!("{}/api/chats/{}/messages", base_url, chat_id))
        .bearer_auth(&token_a)
        .json(&json!({ "content": "both tabs should see this" }))
        .send()
        .await
        .unwrap();

    let first = next_event(&mut read_first).await;
    let second = next_event(&mut read_second).await;
    assert_eq!(first["type"], "newMessage");
    assert_eq!(second["type"], "newMessage");
}

#[tokio::test]
async fn test_connection_request_notifies_receiver_only() {
    let (base_url, addr) = start_test_server().await;
    let (token_a, _id_a) = register_user(&base_url, "ReqSender").await;
    let (token_b, id_b) = register_user(&base_url, "ReqReceiver").await;

    let (mut _write_a, mut read_a) = connect_ws(addr, &token_a).await;
    let (mut _write_b, mut read_b) = connect_ws(addr, &token_b).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/api/requests", base_url))
        .bearer_auth(&token_a)
        .json(&json!({ "receiver_id": id_b }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let event = next_event(&mut read_b).await;
    assert_eq!(event["type"], "newNotification");
    assert_eq!(event["data"]["notification"]["kind"], "connectionRequest");

    assert_silent(&mut read_a, Duration::from_millis(500)).await;
}

#[tokio::test]
async fn test_ws_connection_cleanup_on_disconnect() {
    let (base_url, addr) = start_test_server().await;
    let (token, _user_id) = register_user(&base_url, "CleanupUser").await;

    // Connect and then immediately close
    {
        let (mut write, _read) = connect_ws(addr, &token).await;
        write
            .send(Message::Close(None))
            .await
            .expect("Failed to send close");
    }

    // Give the server a moment to clean up
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Reconnect should work fine (connection was cleaned up)
    let (mut _write2, mut read2) = connect_ws(addr, &token).await;
    assert_silent(&mut read2, Duration::from_millis(300)).await;
}

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use uuid::Uuid;

use crate::state::AppState;

/// Server-initiated ping cadence. A client that vanished without a close
/// frame would otherwise stay resolvable in the registry forever.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long a ping may go unanswered before the connection is declared dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Actor for one authenticated live connection.
///
/// The socket is split: a writer task owns the sink and drains an mpsc
/// channel, while this function's reader loop handles keepalive and close
/// frames. Fan-out reaches the client by cloning the channel sender out of
/// the registry. The live channel is push-only — clients mutate via REST —
/// so inbound text/binary frames are ignored.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: String) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    // Register this connection under the verified user id. From this point
    // on the connection is resolvable for targeted pushes.
    let conn_id = Uuid::now_v7();
    state.registry.join(conn_id, &user_id, tx.clone());

    tracing::info!(
        user_id = %user_id,
        connection = %conn_id,
        "WebSocket actor started"
    );

    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Keepalive: ping on an interval, require a pong within the timeout.
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();
    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // The first tick fires immediately; skip it.
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer is gone, so the connection is too.
                break;
            }

            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {}
                _ => {
                    tracing::warn!("Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Reader loop: nothing to dispatch on a push-only channel, just
    // keepalive bookkeeping until the client goes away.
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    tracing::debug!(
                        user_id = %user_id,
                        "ignoring inbound text frame on push-only channel: {}",
                        text.chars().take(100).collect::<String>()
                    );
                }
                Message::Binary(_) => {
                    tracing::debug!(
                        user_id = %user_id,
                        "ignoring inbound binary frame on push-only channel"
                    );
                }
                Message::Pong(_) => {
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = %user_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                tracing::info!(user_id = %user_id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Every exit path lands here: kill the helper tasks and make the
    // connection unresolvable before the actor returns.
    writer_handle.abort();
    ping_handle.abort();
    state.registry.leave(conn_id);

    tracing::info!(
        user_id = %user_id,
        connection = %conn_id,
        "WebSocket actor stopped"
    );
}

/// Drains the connection's mpsc channel into the WebSocket sink.
/// A failed send means the transport is broken; the reader loop will
/// observe the same and tear the actor down.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            break;
        }
    }
}

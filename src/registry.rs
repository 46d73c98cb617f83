//! Identity registry: maps durable user ids to live WebSocket connections.
//!
//! A user can have multiple concurrent connections (multiple devices/tabs),
//! and most users have none at any given moment — an empty resolve is the
//! common case, not an error. The registry is an explicitly constructed
//! component held in AppState; it is never persisted and starts empty on
//! every process restart.

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Sender half of a WebSocket connection's channel.
/// Other parts of the system clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// A live connection as seen by the registry.
#[derive(Clone)]
pub struct RegisteredConnection {
    pub id: Uuid,
    pub sender: ConnectionSender,
}

/// Tracks all active WebSocket connections per user.
pub struct Registry {
    /// user_id -> live connections
    by_user: DashMap<String, Vec<RegisteredConnection>>,
    /// connection id -> owning user_id, for O(1) leave()
    owners: DashMap<Uuid, String>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            by_user: DashMap::new(),
            owners: DashMap::new(),
        }
    }

    /// Register a live connection as representing `user_id`.
    ///
    /// Idempotent: joining twice with the same (connection, user) pair is a
    /// no-op. A connection re-announcing itself under a different user is
    /// last-write-wins — the connection is detached from its previous owner.
    pub fn join(&self, conn_id: Uuid, user_id: &str, sender: ConnectionSender) {
        if let Some(prev) = self.owners.insert(conn_id, user_id.to_string()) {
            if prev != user_id {
                self.detach(&prev, conn_id);
            }
        }

        let mut conns = self.by_user.entry(user_id.to_string()).or_default();
        if !conns.iter().any(|c| c.id == conn_id) {
            conns.push(RegisteredConnection {
                id: conn_id,
                sender,
            });
        }

        tracing::debug!(
            user_id = %user_id,
            connection = %conn_id,
            connections = conns.len(),
            "connection joined"
        );
    }

    /// Remove a connection on transport disconnect.
    /// Safe to call for a connection that was never registered.
    pub fn leave(&self, conn_id: Uuid) {
        let Some((_, user_id)) = self.owners.remove(&conn_id) else {
            return;
        };
        self.detach(&user_id, conn_id);

        tracing::debug!(
            user_id = %user_id,
            connection = %conn_id,
            "connection left"
        );
    }

    /// Snapshot of the live connections for a user.
    /// Empty when the user is offline.
    pub fn resolve(&self, user_id: &str) -> Vec<RegisteredConnection> {
        self.by_user
            .get(user_id)
            .map(|conns| conns.clone())
            .unwrap_or_default()
    }

    /// Number of live connections for a user.
    pub fn connection_count(&self, user_id: &str) -> usize {
        self.by_user.get(user_id).map(|c| c.len()).unwrap_or(0)
    }

    fn detach(&self, user_id: &str, conn_id: Uuid) {
        let mut now_empty = false;
        if let Some(mut conns) = self.by_user.get_mut(user_id) {
            conns.retain(|c| c.id != conn_id);
            now_empty = conns.is_empty();
        }
        // Guard dropped above; re-check emptiness under the removal lock.
        if now_empty {
            self.by_user.remove_if(user_id, |_, conns| conns.is_empty());
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

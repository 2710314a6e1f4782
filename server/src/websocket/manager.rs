//! WebSocket connection manager.
//!
//! Each connection owns one store subscription for its viewer. The
//! subscription's callback serializes nothing itself; it hands events to the
//! connection's outgoing channel and the socket task writes them.

use std::sync::Arc;

use agency_sync::{Subscription, SyncEvent, SyncStore, Viewer};
use dashmap::DashMap;
use tokio::sync::mpsc;

use super::ServerMessage;

/// Sender for WebSocket messages.
pub type MessageSender = mpsc::UnboundedSender<ServerMessage>;

/// A single WebSocket connection.
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection, also its subscriber id
    pub id: String,
    /// Who is connected
    pub viewer: Viewer,
    /// Channel to send messages to this connection
    pub sender: MessageSender,
    /// Dropped with the connection, which unsubscribes it
    _subscription: Subscription,
}

/// Manages active WebSocket connections.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    /// All active connections, keyed by connection ID.
    connections: DashMap<String, Connection>,
}

impl ConnectionManager {
    /// Create a new connection manager.
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Create a new connection manager wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new connection and subscribe it to `store`.
    ///
    /// Returns the connection ID.
    pub fn register(
        &self,
        store: &SyncStore,
        viewer: Viewer,
        sender: MessageSender,
    ) -> Result<String, agency_sync::Error> {
        let conn_id = uuid::Uuid::new_v4().to_string();

        let forward = sender.clone();
        let subscription = store.subscribe(conn_id.clone(), viewer.clone(), move |event: &SyncEvent| {
            forward
                .send(ServerMessage::event(event))
                .map_err(|_| "connection closed".into())
        })?;

        let connection = Connection {
            id: conn_id.clone(),
            viewer: viewer.clone(),
            sender,
            _subscription: subscription,
        };
        self.connections.insert(conn_id.clone(), connection);

        tracing::info!(
            conn_id = %conn_id,
            role = %viewer.role,
            scope_id = ?viewer.scope_id,
            "WebSocket connection registered"
        );

        Ok(conn_id)
    }

    /// Unregister a connection, dropping its subscription.
    pub fn unregister(&self, conn_id: &str) {
        if let Some((_, conn)) = self.connections.remove(conn_id) {
            tracing::info!(
                conn_id = %conn.id,
                role = %conn.viewer.role,
                "WebSocket connection unregistered"
            );
        }
    }

    /// Send a message to a specific connection.
    pub fn send_to(&self, conn_id: &str, message: ServerMessage) -> bool {
        if let Some(conn) = self.connections.get(conn_id) {
            conn.sender.send(message).is_ok()
        } else {
            false
        }
    }

    /// Get the number of active connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

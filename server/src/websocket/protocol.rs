//! WebSocket message protocol definitions.
//!
//! All messages are JSON-encoded and tagged by `type`. Change events are
//! nested under `event` and keep their own camelCase shape.

use agency_sync::SyncEvent;
use serde::{Deserialize, Serialize};

/// Messages sent from client to server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Keep-alive ping.
    Ping {
        /// Request ID for correlating responses
        #[serde(default)]
        request_id: Option<String>,
    },
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once after the connection's subscription is registered.
    Subscribed { subscriber_id: String },

    /// An accepted change visible to this connection.
    Event { event: SyncEvent },

    /// Response to ping.
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Error message.
    Error {
        /// Error description
        message: String,
        /// Request ID from the original request (if applicable)
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

impl ServerMessage {
    /// Create an error message.
    pub fn error(message: impl Into<String>, request_id: Option<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            request_id,
        }
    }

    /// Wrap a change event for delivery.
    pub fn event(event: &SyncEvent) -> Self {
        ServerMessage::Event {
            event: event.clone(),
        }
    }
}

//! WebSocket support for live change notifications.
//!
//! Clients connect via WebSocket with the same identity headers as the HTTP
//! API and receive every accepted change their viewer is allowed to see.

mod manager;
mod protocol;

pub use manager::ConnectionManager;
pub use protocol::*;

//! Request handlers for entity operations and live updates.

mod entities;
mod websocket;

pub use entities::*;
pub use websocket::*;

pub mod connctx;
pub mod coordinator;
pub mod events;
pub mod handler;
pub mod transport;

pub use handler::websocket_handler;

/// Identifier assigned to a WebSocket connection on connect
pub type ConnId = uuid::Uuid;

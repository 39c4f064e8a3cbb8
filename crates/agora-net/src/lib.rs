// Network layer: the WebSocket push channel and the HTTP pull endpoints.

pub mod api;
pub mod connection;
pub mod error;

pub use api::{ChatApi, HttpChatApi};
pub use connection::{ConnectionEvent, ConnectionManager, EnvelopeSink};
pub use error::NetError;

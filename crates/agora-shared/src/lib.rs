//! Wire types shared by the Agora chat crates.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use protocol::{InboundEnvelope, OutboundEnvelope};
pub use types::{ChatId, ConnectionState, Message, MessageId, RosterUser, UserId};

//! # agora-client
//!
//! Synchronization engine of the Agora direct-message client.
//!
//! The engine keeps one user's view of their conversations consistent
//! against the WebSocket push channel and the paginated history endpoint.
//! Pure reducers ([`store`], [`ranker`], [`guard`], [`throttle`]) hold the
//! rules; [`session::ChatSession`] drives them and publishes
//! [`events::SessionEvent`]s for a renderer; [`client::ChatClient`] wires
//! the session to the real network and database.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod guard;
pub mod ranker;
pub mod session;
pub mod store;
pub mod throttle;
pub mod typing;

pub use client::ChatClient;
pub use config::ClientConfig;
pub use error::ClientError;
pub use events::SessionEvent;
pub use session::{ChatSession, LoadOutcome, SessionConfig};
pub use store::{Conversation, Peer};

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("agora_client=debug,agora_net=debug,agora_store=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();
}

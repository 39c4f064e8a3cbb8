//! Production wiring of the session: HTTP pull client, WebSocket push
//! channel, persisted ranking and the task pumping connection events into
//! the session.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use agora_net::{ConnectionEvent, ConnectionManager, HttpChatApi};
use agora_shared::{ConnectionState, RosterUser};
use agora_store::Database;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::events::SessionEvent;
use crate::ranker::ConversationRanker;
use crate::session::{ChatSession, SessionConfig};

pub struct ChatClient {
    connection: ConnectionManager,
    session: ChatSession,
    pump: JoinHandle<()>,
}

impl ChatClient {
    /// Build the client and start forwarding push events to the session.
    /// Must be called from within a tokio runtime.
    pub fn new(config: ClientConfig) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let api = Arc::new(HttpChatApi::new(
            config.server_url.clone(),
            config.session_cookie.clone(),
        ));
        let (connection, connection_events) =
            ConnectionManager::new(config.ws_url.clone(), config.session_cookie.clone());

        let session_config = SessionConfig {
            page_size: config.page_size,
            ..Default::default()
        };
        let (session, events) = ChatSession::new(
            session_config,
            api,
            Arc::new(connection.clone()),
            open_ranker(&config),
        );

        let pump = tokio::spawn(pump_events(session.clone(), connection_events));
        (
            Self {
                connection,
                session,
                pump,
            },
            events,
        )
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Open the push channel and resolve the authenticated user.
    pub async fn login(&self) -> Result<RosterUser> {
        self.connection.connect();
        let user = self.session.initialize().await?;
        info!(user = %user.id, nickname = %user.nickname, "logged in");
        Ok(user)
    }

    /// Close the push channel and clear the session.
    pub fn logout(&self) {
        self.connection.close();
        self.session.teardown();
        info!("logged out");
    }

    /// Authentication state changed; re-open the push channel if it is
    /// down and the user is authenticated.
    pub fn reconnect_requested(&self, authenticated: bool) {
        if authenticated {
            self.connection.reconnect_requested();
        }
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

fn open_ranker(config: &ClientConfig) -> ConversationRanker {
    let db = match config.db_path {
        Some(ref path) => Database::open_at(path),
        None => Database::new(),
    };
    match db {
        Ok(db) => ConversationRanker::with_database(db),
        Err(e) => {
            warn!(error = %e, "activity database unavailable, ranking will not persist");
            ConversationRanker::new()
        }
    }
}

pub(crate) async fn pump_events(session: ChatSession, mut events: mpsc::Receiver<ConnectionEvent>) {
    info!("connection event pump started");
    while let Some(event) = events.recv().await {
        session.handle_connection_event(event).await;
    }
    warn!("connection event pump ended");
}

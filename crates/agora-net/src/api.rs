//! Pull-channel client for the REST endpoints the chat engine consumes.
//!
//! [`ChatApi`] is the seam the session depends on; [`HttpChatApi`] is the
//! production implementation over `reqwest`, authenticated with the session
//! cookie the login flow obtained.

use async_trait::async_trait;
use reqwest::header::COOKIE;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use agora_shared::constants::{MAX_PAGE_SIZE, SESSION_COOKIE_NAME};
use agora_shared::{ChatId, Message, MessageId, RosterUser, UserId};

use crate::error::{NetError, Result};

/// Endpoints of the chat server used by the sync engine.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// `GET /api/user/current`
    async fn current_user(&self) -> Result<RosterUser>;

    /// `GET /api/chat?user={peer}`: find or create the conversation with `peer`.
    async fn lookup_chat(&self, peer: &UserId) -> Result<ChatId>;

    /// `GET /api/chat/history`: up to `limit` messages with `peer`, older than
    /// `before` when given. Page order is not relied upon.
    async fn history(
        &self,
        peer: &UserId,
        limit: usize,
        before: Option<MessageId>,
    ) -> Result<Vec<Message>>;

    /// `GET /api/online-users`
    async fn online_users(&self) -> Result<Vec<RosterUser>>;
}

#[derive(Debug, Deserialize)]
struct CurrentUserResponse {
    #[serde(default)]
    success: bool,
    user: Option<RosterUser>,
}

#[derive(Debug, Deserialize)]
struct ChatLookupResponse {
    #[serde(default)]
    success: bool,
    #[serde(rename = "chatId")]
    chat_id: Option<ChatId>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    success: bool,
    // An empty page may be encoded as `null`.
    #[serde(default)]
    messages: Option<Vec<Message>>,
}

/// [`ChatApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    client: reqwest::Client,
    base_url: String,
    session_cookie: Option<String>,
}

impl HttpChatApi {
    pub fn new(base_url: impl Into<String>, session_cookie: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session_cookie,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.get(&url).query(query);
        if let Some(ref cookie) = self.session_cookie {
            request = request.header(COOKIE, format!("{SESSION_COOKIE_NAME}={cookie}"));
        }

        let resp = request.send().await?;
        if !resp.status().is_success() {
            return Err(NetError::Status(resp.status().as_u16()));
        }

        Ok(resp.json().await?)
    }
}

/// Query string for a history page. `limit` is clamped to what the server
/// accepts.
pub fn history_query(peer: &UserId, limit: usize, before: Option<MessageId>) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("receiverId", peer.to_string()),
        ("limit", limit.clamp(1, MAX_PAGE_SIZE).to_string()),
    ];
    if let Some(before) = before {
        query.push(("before", before.to_string()));
    }
    query
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn current_user(&self) -> Result<RosterUser> {
        let resp: CurrentUserResponse = self.get_json("/api/user/current", &[]).await?;
        match resp.user {
            Some(user) if resp.success => Ok(user),
            _ => Err(NetError::Rejected("current user unavailable".into())),
        }
    }

    async fn lookup_chat(&self, peer: &UserId) -> Result<ChatId> {
        let resp: ChatLookupResponse = self
            .get_json("/api/chat", &[("user", peer.to_string())])
            .await?;
        match resp.chat_id {
            Some(chat_id) if resp.success => Ok(chat_id),
            _ => Err(NetError::Rejected(format!("no chat with user {peer}"))),
        }
    }

    async fn history(
        &self,
        peer: &UserId,
        limit: usize,
        before: Option<MessageId>,
    ) -> Result<Vec<Message>> {
        let query = history_query(peer, limit, before);
        let resp: HistoryResponse = self.get_json("/api/chat/history", &query).await?;
        if !resp.success {
            return Err(NetError::Rejected("history request unsuccessful".into()));
        }

        let messages = resp.messages.unwrap_or_default();
        debug!(peer = %peer, before = ?before, count = messages.len(), "history page received");
        Ok(messages)
    }

    async fn online_users(&self) -> Result<Vec<RosterUser>> {
        let users: Option<Vec<RosterUser>> = self.get_json("/api/online-users", &[]).await?;
        Ok(users.unwrap_or_default())
    }
}

//! Client configuration loaded from environment variables.
//!
//! Every setting has a default suitable for a development server on
//! localhost.

use std::path::PathBuf;

use agora_shared::constants::{DEFAULT_SERVER_URL, MAX_PAGE_SIZE, MESSAGES_PER_LOAD, WS_PATH};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the HTTP API.
    /// Env: `AGORA_SERVER_URL`
    /// Default: `http://localhost:8080`
    pub server_url: String,

    /// Push channel URL.
    /// Env: `AGORA_WS_URL`
    /// Default: the server URL with a `ws` scheme and `/ws` path.
    pub ws_url: String,

    /// Value of the session cookie obtained at login.
    /// Env: `AGORA_SESSION_COOKIE`
    pub session_cookie: Option<String>,

    /// Location of the local activity database.
    /// Env: `AGORA_DB_PATH`
    /// Default: platform data directory (`None` here).
    pub db_path: Option<PathBuf>,

    /// History page size.
    /// Env: `AGORA_PAGE_SIZE`
    /// Default: `10`
    pub page_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            ws_url: ws_url_for(DEFAULT_SERVER_URL),
            session_cookie: None,
            db_path: None,
            page_size: MESSAGES_PER_LOAD,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("AGORA_SERVER_URL").filter(|u| !u.trim().is_empty()) {
            let url = url.trim().trim_end_matches('/').to_string();
            config.ws_url = ws_url_for(&url);
            config.server_url = url;
        }

        if let Some(url) = lookup("AGORA_WS_URL").filter(|u| !u.trim().is_empty()) {
            config.ws_url = url.trim().to_string();
        }

        if let Some(cookie) = lookup("AGORA_SESSION_COOKIE") {
            if !cookie.is_empty() {
                config.session_cookie = Some(cookie);
            }
        }

        if let Some(path) = lookup("AGORA_DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Some(val) = lookup("AGORA_PAGE_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if (1..=MAX_PAGE_SIZE).contains(&n) => config.page_size = n,
                _ => {
                    tracing::warn!(value = %val, "Invalid AGORA_PAGE_SIZE, using default");
                }
            }
        }

        config
    }
}

/// `http://host:port` → `ws://host:port/ws`.
fn ws_url_for(server_url: &str) -> String {
    let base = server_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{base}{WS_PATH}")
}

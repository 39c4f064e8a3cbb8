use std::time::Duration;

/// Messages requested per history page (initial and backward loads)
pub const MESSAGES_PER_LOAD: usize = 10;

/// Upper bound the server accepts for `limit` on the history endpoint
pub const MAX_PAGE_SIZE: usize = 50;

/// Minimum interval between two backward-pagination fetches
pub const LOAD_COOLDOWN: Duration = Duration::from_millis(3000);

/// Cooldown applied after a failed backward-pagination fetch
pub const ERROR_COOLDOWN: Duration = Duration::from_millis(3000);

/// Scroll handler throttle window
pub const SCROLL_THROTTLE_WAIT: Duration = Duration::from_millis(500);

/// Distance from the top of the message pane (px) that triggers a backward load
pub const SCROLL_TOP_THRESHOLD: u32 = 100;

/// Inactivity after the last keystroke before `stop_typing` is sent
pub const TYPING_TIMEOUT: Duration = Duration::from_millis(3000);

/// Default HTTP API base (server)
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";

/// Path of the push channel relative to the server root
pub const WS_PATH: &str = "/ws";

/// Cookie carrying the authenticated session
pub const SESSION_COOKIE_NAME: &str = "session";

/// Storage keys of the persisted ranking documents
pub const KEY_CONVERSATION_ORDER: &str = "conversationOrder";
pub const KEY_USER_HAS_MESSAGES: &str = "userHasMessages";
pub const KEY_LAST_MESSAGE_TIMES: &str = "lastMessageTimes";

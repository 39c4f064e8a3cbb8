use serde::Serialize;
use tokio::sync::mpsc;

use agora_shared::{ChatId, ConnectionState, Message, RosterUser, UserId};

use crate::store::Peer;

/// How the renderer should position the message pane after a re-render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollIntent {
    /// Scroll to the newest message.
    Bottom,
    /// `prepended` older messages were inserted above the viewport; keep the
    /// user's visual position by offsetting with their rendered height.
    PreserveFromTop { prepended: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterEntry {
    pub user: RosterUser,
    pub highlighted: bool,
}

/// Everything the session asks the view layer to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    ConversationOpened { peer: Peer, chat_id: ChatId },
    /// Full re-render of the active conversation, ascending by id.
    MessagesRendered {
        chat_id: ChatId,
        messages: Vec<Message>,
        scroll: ScrollIntent,
    },
    LoadingOlder { chat_id: ChatId },
    HistoryError { chat_id: ChatId, initial: bool, error: String },
    TypingShown { name: String },
    TypingHidden,
    Highlighted { user: UserId },
    RosterUpdated { entries: Vec<RosterEntry> },
    RosterError { error: String },
    InputCleared,
    /// The chat view must be mounted before `peer` can be opened.
    NavigateToChat { peer: Peer },
    ConnectionChanged { state: ConnectionState },
    SessionCleared,
}

pub fn emit_event(tx: &mpsc::UnboundedSender<SessionEvent>, event: SessionEvent) {
    if let Err(e) = tx.send(event) {
        tracing::debug!(event = ?e.0, "session event dropped, no renderer attached");
    }
}

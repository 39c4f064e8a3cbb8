//! Domain model structs persisted in the local database.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Activity
// ---------------------------------------------------------------------------

/// Everything the roster ranking needs to survive a restart.
///
/// Each field is stored as its own JSON document so the three can evolve
/// independently.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivitySnapshot {
    /// User ids, most recently active first.
    pub conversation_order: Vec<String>,
    /// Whether a message was ever exchanged with the user.
    pub user_has_messages: BTreeMap<String, bool>,
    /// Raw timestamp of the last message exchanged with the user.
    pub last_message_times: BTreeMap<String, String>,
}

//! Persistence of the conversation activity documents.

use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use agora_shared::constants::{
    KEY_CONVERSATION_ORDER, KEY_LAST_MESSAGE_TIMES, KEY_USER_HAS_MESSAGES,
};

use crate::database::Database;
use crate::error::Result;
use crate::models::ActivitySnapshot;

impl Database {
    /// Load the activity documents. Missing documents come back empty.
    pub fn load_activity(&self) -> Result<ActivitySnapshot> {
        Ok(ActivitySnapshot {
            conversation_order: self.get_json(KEY_CONVERSATION_ORDER)?.unwrap_or_default(),
            user_has_messages: self.get_json(KEY_USER_HAS_MESSAGES)?.unwrap_or_default(),
            last_message_times: self.get_json(KEY_LAST_MESSAGE_TIMES)?.unwrap_or_default(),
        })
    }

    /// Write all three activity documents in one transaction.
    pub fn save_activity(&self, snapshot: &ActivitySnapshot) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;
        put_json(&tx, KEY_CONVERSATION_ORDER, &snapshot.conversation_order)?;
        put_json(&tx, KEY_USER_HAS_MESSAGES, &snapshot.user_has_messages)?;
        put_json(&tx, KEY_LAST_MESSAGE_TIMES, &snapshot.last_message_times)?;
        tx.commit()?;

        tracing::debug!(
            tracked = snapshot.conversation_order.len(),
            "activity saved"
        );
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw: Option<String> = self
            .conn()
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;

        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }
}

fn put_json<T: Serialize>(conn: &rusqlite::Connection, key: &str, value: &T) -> Result<()> {
    let text = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO kv (key, value, updated_at)
         VALUES (?1, ?2, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, text],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ActivitySnapshot {
        let mut snapshot = ActivitySnapshot {
            conversation_order: vec!["b".into(), "a".into()],
            ..Default::default()
        };
        snapshot.user_has_messages.insert("a".into(), true);
        snapshot.user_has_messages.insert("b".into(), true);
        snapshot
            .last_message_times
            .insert("b".into(), "2024-05-01T10:00:00Z".into());
        snapshot
    }

    #[test]
    fn empty_database_loads_default() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.load_activity().unwrap(), ActivitySnapshot::default());
    }

    #[test]
    fn activity_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.db");

        {
            let db = Database::open_at(&path).unwrap();
            db.save_activity(&sample()).unwrap();
        }

        let db = Database::open_at(&path).unwrap();
        assert_eq!(db.load_activity().unwrap(), sample());
    }

    #[test]
    fn save_overwrites_previous_documents() {
        let db = Database::open_in_memory().unwrap();
        db.save_activity(&sample()).unwrap();

        let mut next = sample();
        next.conversation_order = vec!["a".into(), "b".into()];
        db.save_activity(&next).unwrap();

        assert_eq!(db.load_activity().unwrap().conversation_order, vec!["a", "b"]);
    }

    #[test]
    fn documents_are_plain_json() {
        let db = Database::open_in_memory().unwrap();
        db.save_activity(&sample()).unwrap();

        let raw: String = db
            .conn()
            .query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![KEY_CONVERSATION_ORDER],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(raw, r#"["b","a"]"#);
    }
}

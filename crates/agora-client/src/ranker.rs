//! Roster ordering from conversation activity.
//!
//! Activity is kept as the same three documents that are persisted: an LRU
//! list of user ids, a has-history map and a last-message-time map. Every
//! [`ConversationRanker::record_activity`] call writes all three through to
//! the database when one is attached.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use agora_shared::types::parse_timestamp;
use agora_shared::{RosterUser, UserId};
use agora_store::{ActivitySnapshot, Database};

pub struct ConversationRanker {
    activity: ActivitySnapshot,
    db: Option<Database>,
}

impl ConversationRanker {
    /// An in-memory ranker with no history.
    pub fn new() -> Self {
        Self::from_snapshot(ActivitySnapshot::default())
    }

    pub fn from_snapshot(activity: ActivitySnapshot) -> Self {
        Self { activity, db: None }
    }

    /// Load persisted activity from `db` and write back to it from now on.
    /// Unreadable documents are logged and start empty.
    pub fn with_database(db: Database) -> Self {
        let activity = db.load_activity().unwrap_or_else(|e| {
            warn!(error = %e, "failed to load conversation activity, starting empty");
            ActivitySnapshot::default()
        });
        debug!(tracked = activity.conversation_order.len(), "conversation activity loaded");
        Self {
            activity,
            db: Some(db),
        }
    }

    pub fn snapshot(&self) -> &ActivitySnapshot {
        &self.activity
    }

    pub fn has_history(&self, user: &UserId) -> bool {
        self.activity
            .user_has_messages
            .get(user.as_str())
            .copied()
            .unwrap_or(false)
    }

    /// Position in the LRU list, 0 being the most recent.
    pub fn manual_rank(&self, user: &UserId) -> Option<usize> {
        self.activity
            .conversation_order
            .iter()
            .position(|id| id == user.as_str())
    }

    /// Last message time, only if it parses.
    pub fn last_message_time(&self, user: &UserId) -> Option<DateTime<Utc>> {
        self.activity
            .last_message_times
            .get(user.as_str())
            .and_then(|raw| parse_timestamp(raw))
    }

    /// Note a message exchanged with `user`. An absent or blank `time`
    /// records the current time.
    pub fn record_activity(&mut self, user: &UserId, time: Option<&str>) {
        let id = user.as_str();
        self.activity.user_has_messages.insert(id.to_string(), true);

        self.activity.conversation_order.retain(|other| other != id);
        self.activity.conversation_order.insert(0, id.to_string());

        let time = match time.map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => Utc::now().to_rfc3339(),
        };
        self.activity.last_message_times.insert(id.to_string(), time);

        self.persist();
    }

    fn persist(&self) {
        if let Some(ref db) = self.db {
            if let Err(e) = db.save_activity(&self.activity) {
                warn!(error = %e, "failed to persist conversation activity");
            }
        }
    }

    /// Pairwise roster order: recent activity first, then names.
    pub fn compare(&self, a: &RosterUser, b: &RosterUser) -> Ordering {
        let by_activity = match (self.has_history(&a.id), self.has_history(&b.id)) {
            (true, true) => match (self.last_message_time(&a.id), self.last_message_time(&b.id)) {
                (Some(ta), Some(tb)) => tb.cmp(&ta),
                _ => match (self.manual_rank(&a.id), self.manual_rank(&b.id)) {
                    (Some(ra), Some(rb)) => ra.cmp(&rb),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                },
            },
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => Ordering::Equal,
        };

        by_activity.then_with(|| compare_names(&a.nickname, &b.nickname))
    }

    /// Sort a roster for display.
    ///
    /// The activity rules are not guaranteed transitive when timestamps are
    /// partly missing, so this uses a stable insertion sort rather than
    /// `sort_by`, which may panic on an inconsistent comparator.
    pub fn rank(&self, mut users: Vec<RosterUser>) -> Vec<RosterUser> {
        for i in 1..users.len() {
            let mut j = i;
            while j > 0 && self.compare(&users[j - 1], &users[j]) == Ordering::Greater {
                users.swap(j - 1, j);
                j -= 1;
            }
        }
        users
    }
}

impl Default for ConversationRanker {
    fn default() -> Self {
        Self::new()
    }
}

fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, nickname: &str) -> RosterUser {
        RosterUser {
            id: UserId::new(id),
            nickname: nickname.into(),
        }
    }

    fn names(users: &[RosterUser]) -> Vec<&str> {
        users.iter().map(|u| u.nickname.as_str()).collect()
    }

    #[test]
    fn recent_history_first_then_no_history() {
        let mut ranker = ConversationRanker::new();
        ranker.record_activity(&UserId::new("b"), Some("2024-05-01 09:00:00"));
        ranker.record_activity(&UserId::new("a"), Some("2024-05-01 10:00:00"));

        let ranked = ranker.rank(vec![user("c", "C"), user("b", "B"), user("a", "A")]);
        assert_eq!(names(&ranked), ["A", "B", "C"]);

        let ranked = ranker.rank(vec![user("a", "A"), user("b", "B"), user("c", "C")]);
        assert_eq!(names(&ranked), ["A", "B", "C"]);
    }

    #[test]
    fn server_local_time_compares_with_recorded_now() {
        // A server stamp from a second ago, in the zone the server writes.
        let earlier = (chrono::Local::now() - chrono::Duration::seconds(1))
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();

        let mut ranker = ConversationRanker::new();
        ranker.record_activity(&UserId::new("a"), Some(&earlier));
        ranker.record_activity(&UserId::new("b"), None);

        let ta = ranker.last_message_time(&UserId::new("a")).unwrap();
        let tb = ranker.last_message_time(&UserId::new("b")).unwrap();
        assert!(ta < tb);

        let ranked = ranker.rank(vec![user("a", "A"), user("b", "B")]);
        assert_eq!(names(&ranked), ["B", "A"]);
    }

    #[test]
    fn missing_timestamps_fall_back_to_manual_rank() {
        let mut snapshot = ActivitySnapshot {
            conversation_order: vec!["a".into(), "b".into()],
            ..Default::default()
        };
        snapshot.user_has_messages.insert("a".into(), true);
        snapshot.user_has_messages.insert("b".into(), true);
        let ranker = ConversationRanker::from_snapshot(snapshot);

        let ranked = ranker.rank(vec![user("b", "B"), user("a", "A")]);
        assert_eq!(names(&ranked), ["A", "B"]);
    }

    #[test]
    fn unparseable_time_counts_as_missing() {
        let mut ranker = ConversationRanker::new();
        ranker.record_activity(&UserId::new("z"), Some("2024-05-01 10:00:00"));
        ranker.record_activity(&UserId::new("y"), Some("sometime"));

        assert!(ranker.last_message_time(&UserId::new("y")).is_none());
        // y is more recent in the LRU list even though z has a real time.
        let ranked = ranker.rank(vec![user("z", "Z"), user("y", "Y")]);
        assert_eq!(names(&ranked), ["Y", "Z"]);
    }

    #[test]
    fn listed_user_sorts_before_unlisted() {
        let mut snapshot = ActivitySnapshot {
            conversation_order: vec!["b".into()],
            ..Default::default()
        };
        snapshot.user_has_messages.insert("a".into(), true);
        snapshot.user_has_messages.insert("b".into(), true);
        let ranker = ConversationRanker::from_snapshot(snapshot);

        let ranked = ranker.rank(vec![user("a", "A"), user("b", "B")]);
        assert_eq!(names(&ranked), ["B", "A"]);
    }

    #[test]
    fn names_compare_case_insensitively() {
        let ranker = ConversationRanker::new();
        let ranked = ranker.rank(vec![
            user("1", "charlie"),
            user("2", "Bravo"),
            user("3", "alpha"),
            user("4", "Alpha"),
        ]);
        assert_eq!(names(&ranked), ["Alpha", "alpha", "Bravo", "charlie"]);
    }

    #[test]
    fn record_activity_moves_to_front_without_duplicates() {
        let mut ranker = ConversationRanker::new();
        for id in ["a", "b", "c", "a"] {
            ranker.record_activity(&UserId::new(id), None);
        }

        assert_eq!(ranker.snapshot().conversation_order, ["a", "c", "b"]);
        assert_eq!(ranker.manual_rank(&UserId::new("a")), Some(0));
        assert!(ranker.has_history(&UserId::new("b")));
        // "now" was recorded and parses back.
        assert!(ranker.last_message_time(&UserId::new("c")).is_some());
    }

    #[test]
    fn blank_time_records_now() {
        let mut ranker = ConversationRanker::new();
        let before = Utc::now();
        ranker.record_activity(&UserId::new("a"), Some("  "));
        let recorded = ranker.last_message_time(&UserId::new("a")).unwrap();
        assert!(recorded >= before);
    }

    #[test]
    fn activity_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agora.db");

        {
            let mut ranker = ConversationRanker::with_database(Database::open_at(&path).unwrap());
            ranker.record_activity(&UserId::new("b"), Some("2024-05-01 09:00:00"));
            ranker.record_activity(&UserId::new("a"), None);
        }

        let ranker = ConversationRanker::with_database(Database::open_at(&path).unwrap());
        assert_eq!(ranker.snapshot().conversation_order, ["a", "b"]);
        assert!(ranker.has_history(&UserId::new("b")));
        assert_eq!(
            ranker.snapshot().last_message_times.get("b").map(String::as_str),
            Some("2024-05-01 09:00:00")
        );
    }
}

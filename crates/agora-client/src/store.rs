//! Per-conversation message buffer.
//!
//! A [`Conversation`] is a pure reducer: it owns the messages loaded so far
//! and the pagination cursor, and knows nothing about rendering or I/O. The
//! session drives it and turns its results into render events.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use agora_shared::{ChatId, Message, MessageId, UserId};

/// The remote side of a direct conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Peer {
    pub id: UserId,
    pub name: String,
}

impl Peer {
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Messages of one conversation, keyed and ordered by server id.
#[derive(Debug, Clone)]
pub struct Conversation {
    peer: Peer,
    chat_id: ChatId,
    messages: BTreeMap<MessageId, Message>,
    exhausted: bool,
    loading: bool,
}

impl Conversation {
    pub fn new(peer: Peer, chat_id: ChatId) -> Self {
        Self {
            peer,
            chat_id,
            messages: BTreeMap::new(),
            exhausted: false,
            loading: false,
        }
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    /// Buffered messages, ascending by id.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.values()
    }

    /// Owned copy of the buffer, ascending by id.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Cursor for the next backward fetch: the smallest id held.
    pub fn earliest_loaded_id(&self) -> Option<MessageId> {
        self.messages.keys().next().copied()
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Claim the in-flight slot. Returns `false` if a load is already running.
    pub fn begin_load(&mut self) -> bool {
        if self.loading {
            return false;
        }
        self.loading = true;
        true
    }

    pub fn end_load(&mut self) {
        self.loading = false;
    }

    /// Replace the buffer with the newest page.
    pub fn apply_initial(&mut self, page: Vec<Message>, page_size: usize) {
        self.exhausted = page.len() < page_size;
        self.messages = page.into_iter().map(|m| (m.id, m)).collect();
    }

    /// Merge a page of older messages. Returns how many were new.
    pub fn apply_older(&mut self, page: Vec<Message>, page_size: usize) -> usize {
        if page.len() < page_size {
            self.exhausted = true;
        }

        let mut added = 0;
        for message in page {
            if let Entry::Vacant(slot) = self.messages.entry(message.id) {
                slot.insert(message);
                added += 1;
            }
        }
        added
    }

    /// Insert a pushed message. Returns `false` for a duplicate id.
    pub fn append_incoming(&mut self, message: Message) -> bool {
        if self.messages.contains_key(&message.id) {
            return false;
        }
        self.messages.insert(message.id, message);
        true
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn msg(id: i64) -> Message {
        Message {
            id: MessageId(id),
            chat_id: ChatId(1),
            sender_id: UserId::new(if id % 2 == 0 { "me" } else { "peer" }),
            sender_name: String::new(),
            body: format!("message {id}"),
            time: "2024-05-01 10:00:00".into(),
        }
    }

    /// A history page as the server sends it: newest first.
    pub(crate) fn page(ids: std::ops::RangeInclusive<i64>) -> Vec<Message> {
        ids.rev().map(msg).collect()
    }

    fn conversation() -> Conversation {
        Conversation::new(Peer::new("peer", "Peer"), ChatId(1))
    }

    fn ids(conv: &Conversation) -> Vec<i64> {
        conv.messages().map(|m| m.id.0).collect()
    }

    #[test]
    fn initial_page_is_ordered_ascending() {
        let mut conv = conversation();
        conv.apply_initial(page(91..=100), 10);

        assert_eq!(ids(&conv), (91..=100).collect::<Vec<_>>());
        assert_eq!(conv.earliest_loaded_id(), Some(MessageId(91)));
        assert!(!conv.is_exhausted());
    }

    #[test]
    fn short_initial_page_exhausts() {
        let mut conv = conversation();
        conv.apply_initial(page(1..=4), 10);
        assert!(conv.is_exhausted());

        let mut empty = conversation();
        empty.apply_initial(Vec::new(), 10);
        assert!(empty.is_exhausted());
        assert!(empty.is_empty());
        assert_eq!(empty.earliest_loaded_id(), None);
    }

    #[test]
    fn initial_page_replaces_and_dedups() {
        let mut conv = conversation();
        conv.append_incoming(msg(500));

        let mut dup_page = page(91..=100);
        dup_page.push(msg(95));
        conv.apply_initial(dup_page, 10);

        assert_eq!(ids(&conv), (91..=100).collect::<Vec<_>>());
    }

    #[test]
    fn older_page_is_idempotent() {
        let mut conv = conversation();
        conv.apply_initial(page(91..=100), 10);

        assert_eq!(conv.apply_older(page(81..=90), 10), 10);
        let after_first = ids(&conv);

        assert_eq!(conv.apply_older(page(81..=90), 10), 0);
        assert_eq!(ids(&conv), after_first);
        assert_eq!(conv.earliest_loaded_id(), Some(MessageId(81)));
    }

    #[test]
    fn older_page_with_overlap_only_adds_unique() {
        let mut conv = conversation();
        conv.apply_initial(page(91..=100), 10);

        assert_eq!(conv.apply_older(page(86..=95), 10), 5);
        assert_eq!(ids(&conv), (86..=100).collect::<Vec<_>>());
    }

    #[test]
    fn short_older_page_exhausts_even_without_new_ids() {
        let mut conv = conversation();
        conv.apply_initial(page(91..=100), 10);

        assert_eq!(conv.apply_older(page(95..=97), 10), 0);
        assert!(conv.is_exhausted());
    }

    #[test]
    fn incoming_duplicates_are_suppressed() {
        let mut conv = conversation();
        assert!(conv.append_incoming(msg(7)));
        assert!(!conv.append_incoming(msg(7)));
        assert_eq!(conv.len(), 1);
    }

    #[test]
    fn interleaved_push_and_pull_stay_sorted() {
        let mut conv = conversation();
        conv.append_incoming(msg(103));
        conv.apply_initial(page(91..=100), 10);
        conv.append_incoming(msg(102));
        conv.apply_older(page(71..=80), 10);
        conv.append_incoming(msg(101));
        conv.apply_older(page(81..=90), 10);
        conv.append_incoming(msg(99));

        let got = ids(&conv);
        let mut sorted = got.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(got, sorted);
        assert_eq!(got.first(), Some(&71));
        assert_eq!(got.last(), Some(&102));
        assert_eq!(conv.earliest_loaded_id(), Some(MessageId(71)));
    }

    #[test]
    fn in_flight_slot_is_exclusive() {
        let mut conv = conversation();
        assert!(conv.begin_load());
        assert!(!conv.begin_load());
        conv.end_load();
        assert!(conv.begin_load());
    }
}

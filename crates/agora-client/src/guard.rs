//! Gate in front of backward pagination.
//!
//! Scroll events arrive far faster than history pages should be requested.
//! [`PaginationGuard`] admits a fetch only when the pane is at the top, the
//! conversation can still grow backward, enough messages are buffered, and
//! the cooldown since the previous fetch has passed.

use std::time::Duration;

use tokio::time::Instant;

use agora_shared::constants::{
    ERROR_COOLDOWN, LOAD_COOLDOWN, MESSAGES_PER_LOAD, SCROLL_TOP_THRESHOLD,
};

use crate::store::Conversation;

/// Why a scroll check did not start a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotAtTop,
    Exhausted,
    Loading,
    InFlight,
    TooFewMessages(usize),
    Cooldown(Duration),
}

/// Per-conversation pagination state. Replaced with a fresh one whenever a
/// different peer is opened.
#[derive(Debug, Clone, Default)]
pub struct PaginationGuard {
    in_flight: bool,
    cooldown_until: Option<Instant>,
}

impl PaginationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn cooldown_until(&self) -> Option<Instant> {
        self.cooldown_until
    }

    /// Every reason the fetch would be refused; empty means go.
    pub fn check(&self, now: Instant, scroll_top: u32, conv: &Conversation) -> Vec<SkipReason> {
        let mut reasons = Vec::new();
        if scroll_top > SCROLL_TOP_THRESHOLD {
            reasons.push(SkipReason::NotAtTop);
            return reasons;
        }
        if conv.is_exhausted() {
            reasons.push(SkipReason::Exhausted);
        }
        if conv.is_loading() {
            reasons.push(SkipReason::Loading);
        }
        if self.in_flight {
            reasons.push(SkipReason::InFlight);
        }
        if conv.len() < MESSAGES_PER_LOAD {
            reasons.push(SkipReason::TooFewMessages(conv.len()));
        }
        if let Some(until) = self.cooldown_until {
            if now < until {
                reasons.push(SkipReason::Cooldown(until - now));
            }
        }
        reasons
    }

    /// Record that a fetch is starting at `now`.
    pub fn start(&mut self, now: Instant) {
        self.in_flight = true;
        self.cooldown_until = Some(now + LOAD_COOLDOWN);
    }

    /// Record completion; the cooldown restarts from `now`.
    pub fn finish(&mut self, now: Instant, success: bool) {
        self.in_flight = false;
        let hold = if success { LOAD_COOLDOWN } else { ERROR_COOLDOWN };
        self.cooldown_until = Some(now + hold);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::page;
    use crate::store::Peer;
    use agora_shared::ChatId;

    fn loaded(count: i64) -> Conversation {
        let mut conv = Conversation::new(Peer::new("7", "Seven"), ChatId(1));
        conv.apply_initial(page(1..=count), count as usize);
        conv
    }

    #[test]
    fn fresh_guard_admits_full_conversation_at_top() {
        let guard = PaginationGuard::new();
        assert!(guard.check(Instant::now(), 0, &loaded(10)).is_empty());
        assert!(guard.check(Instant::now(), SCROLL_TOP_THRESHOLD, &loaded(10)).is_empty());
    }

    #[test]
    fn scrolled_down_is_refused() {
        let guard = PaginationGuard::new();
        assert_eq!(
            guard.check(Instant::now(), SCROLL_TOP_THRESHOLD + 1, &loaded(10)),
            vec![SkipReason::NotAtTop]
        );
    }

    #[test]
    fn too_few_messages_is_refused() {
        let guard = PaginationGuard::new();
        let mut conv = Conversation::new(Peer::new("7", "Seven"), ChatId(1));
        conv.apply_initial(page(1..=9), 5);
        assert_eq!(
            guard.check(Instant::now(), 0, &conv),
            vec![SkipReason::TooFewMessages(9)]
        );
    }

    #[test]
    fn exhausted_and_loading_are_refused() {
        let guard = PaginationGuard::new();
        let mut conv = Conversation::new(Peer::new("7", "Seven"), ChatId(1));
        conv.apply_initial(page(1..=12), 20);
        conv.begin_load();

        let reasons = guard.check(Instant::now(), 0, &conv);
        assert!(reasons.contains(&SkipReason::Exhausted));
        assert!(reasons.contains(&SkipReason::Loading));
    }

    #[test]
    fn cooldown_holds_after_start_and_after_finish() {
        let mut guard = PaginationGuard::new();
        let conv = loaded(10);
        let t0 = Instant::now();

        guard.start(t0);
        let reasons = guard.check(t0 + Duration::from_millis(100), 0, &conv);
        assert!(reasons.contains(&SkipReason::InFlight));

        // Completion two seconds later pushes the window out again.
        let done = t0 + Duration::from_secs(2);
        guard.finish(done, true);
        assert!(!guard.is_in_flight());
        assert_eq!(
            guard.check(t0 + Duration::from_secs(4), 0, &conv),
            vec![SkipReason::Cooldown(Duration::from_secs(1))]
        );
        assert!(guard.check(done + LOAD_COOLDOWN, 0, &conv).is_empty());
    }

    #[test]
    fn failure_uses_error_cooldown() {
        let mut guard = PaginationGuard::new();
        let t0 = Instant::now();
        guard.start(t0);
        guard.finish(t0, false);
        assert_eq!(guard.cooldown_until(), Some(t0 + ERROR_COOLDOWN));
    }
}

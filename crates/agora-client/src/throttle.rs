//! Leading-edge throttle with a single trailing call.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Execute now; the window restarts.
    RunNow,
    /// Execute once after this delay, replacing any earlier deferred call.
    Defer(Duration),
}

/// Collapses bursts into at most one execution per `wait` window without
/// losing the last call of a burst. The caller owns the deferred task and
/// reports its execution through [`Throttle::mark_run`].
#[derive(Debug, Clone)]
pub struct Throttle {
    wait: Duration,
    last_run: Option<Instant>,
}

impl Throttle {
    pub fn new(wait: Duration) -> Self {
        Self {
            wait,
            last_run: None,
        }
    }

    pub fn decide(&mut self, now: Instant) -> ThrottleDecision {
        match self.last_run {
            Some(last) if now.duration_since(last) < self.wait => {
                ThrottleDecision::Defer(self.wait - now.duration_since(last))
            }
            _ => {
                self.last_run = Some(now);
                ThrottleDecision::RunNow
            }
        }
    }

    pub fn mark_run(&mut self, now: Instant) {
        self.last_run = Some(now);
    }
}

//! Deterministic back-off for the Event Watcher's watch-reconnect loop
//! (spec §4.6, §6, §8 "410 loop fix").
//!
//! Grounded on `kube_runtime::utils::backoff_resettable`'s
//! `ResettableBackoff` shape (an `Iterator<Item = Duration>` that can also be
//! reset), but the schedule itself is fixed doubling rather than `backon`'s
//! jittered exponential — the spec pins the exact sequence `1s, 2s, 4s, 8s,
//! 16s`, capped at 30s, so jitter would make the "410 loop fix" scenario's
//! "no more than one re-list attempt per back-off tick" assertion untestable.

use std::time::Duration;

const INITIAL: Duration = Duration::from_secs(1);
const CAP: Duration = Duration::from_secs(30);

/// Tracks consecutive watch failures and yields the next delay to wait
/// before retrying. Resets to the initial delay on any success.
#[derive(Debug, Clone)]
pub struct EventBackoff {
    attempt: u32,
    next_delay: Duration,
}

impl Default for EventBackoff {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBackoff {
    pub fn new() -> Self {
        Self {
            attempt: 0,
            next_delay: INITIAL,
        }
    }

    /// Consecutive failures observed since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record a failure and return the delay to wait before retrying.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt += 1;
        let delay = self.next_delay;
        self.next_delay = (self.next_delay * 2).min(CAP);
        delay
    }

    /// Record a success: the delay sequence restarts from `1s` and the
    /// attempt counter clears (spec §4.6 "reset to 1s on any successful event").
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.next_delay = INITIAL;
    }

    /// Whether the retry budget (5 consecutive failures, spec §4.6/§7) is exhausted.
    pub fn budget_exhausted(&self, retry_budget: u32) -> bool {
        self.attempt >= retry_budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_doubles_and_caps_at_30s() {
        let mut backoff = EventBackoff::new();
        let delays: Vec<Duration> = (0..7).map(|_| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(16),
                Duration::from_secs(30),
                Duration::from_secs(30),
            ]
        );
    }

    #[test]
    fn reset_restarts_from_initial() {
        let mut backoff = EventBackoff::new();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.attempt(), 1);
    }

    #[test]
    fn budget_exhaustion_at_five_consecutive_failures() {
        let mut backoff = EventBackoff::new();
        for _ in 0..4 {
            backoff.next_delay();
            assert!(!backoff.budget_exhausted(5));
        }
        backoff.next_delay();
        assert!(backoff.budget_exhausted(5));
    }
}

//! Bounded failure history for one identifier.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Failure timestamps, oldest first, never longer than the cap.
#[derive(Debug, Clone)]
pub struct FailureHistory {
    failures: VecDeque<Instant>,
    cap: usize,
}

impl FailureHistory {
    /// Create an empty history holding at most `cap` failures.
    pub fn new(cap: usize) -> Self {
        Self {
            failures: VecDeque::with_capacity(cap),
            cap,
        }
    }

    /// Append a failure, dropping the oldest ones beyond the cap.
    pub fn record(&mut self, now: Instant) {
        self.failures.push_back(now);
        while self.failures.len() > self.cap {
            self.failures.pop_front();
        }
    }

    /// Drop failures whose age is at least `window`. Returns how many were dropped.
    pub fn purge_expired(&mut self, now: Instant, window: Duration) -> usize {
        let mut purged = 0;
        while let Some(&oldest) = self.failures.front() {
            if now.saturating_duration_since(oldest) < window {
                break;
            }
            self.failures.pop_front();
            purged += 1;
        }
        purged
    }

    /// Failures inside `(now - window, now]`, without purging.
    pub fn count_within(&self, now: Instant, window: Duration) -> usize {
        self.failures
            .iter()
            .rev()
            .take_while(|&&ts| now.saturating_duration_since(ts) < window)
            .count()
    }

    pub fn most_recent(&self) -> Option<Instant> {
        self.failures.back().copied()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn clear(&mut self) {
        self.failures.clear();
    }
}

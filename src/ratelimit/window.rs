//! Sliding window of event timestamps.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Event timestamps for one client key, oldest first.
///
/// Timestamps are appended in clock order, so the front is always the oldest
/// and expiry only ever pops from the front.
#[derive(Debug, Clone, Default)]
pub struct Window {
    events: VecDeque<Instant>,
    /// Longest policy window this key has been checked against
    span: Duration,
}

impl Window {
    /// Create an empty window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every timestamp at or before `now - window`.
    ///
    /// Returns the number of timestamps removed. A timestamp later than `now`
    /// (clock moved backwards) is treated as age zero and kept.
    pub fn evict_expired(&mut self, now: Instant, window: Duration) -> usize {
        let mut evicted = 0;
        while let Some(&oldest) = self.events.front() {
            if now.saturating_duration_since(oldest) < window {
                break;
            }
            self.events.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Count events inside `(now - window, now]` without evicting.
    pub fn count_within(&self, now: Instant, window: Duration) -> usize {
        self.events
            .iter()
            .rev()
            .take_while(|&&ts| now.saturating_duration_since(ts) < window)
            .count()
    }

    /// The `n`th oldest event inside `(now - window, now]`, counting from zero.
    pub fn nth_within(&self, now: Instant, window: Duration, n: usize) -> Option<Instant> {
        self.events
            .iter()
            .skip_while(|&&ts| now.saturating_duration_since(ts) >= window)
            .nth(n)
            .copied()
    }

    /// Append an event.
    pub fn record(&mut self, now: Instant) {
        self.events.push_back(now);
    }

    /// Note that this window is governed by a policy of the given length.
    pub(crate) fn observe_span(&mut self, window: Duration) {
        self.span = self.span.max(window);
    }

    /// Longest policy window seen for this key.
    pub fn span(&self) -> Duration {
        self.span
    }

    /// Number of retained events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether no events are retained.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The oldest retained event.
    pub fn oldest(&self) -> Option<Instant> {
        self.events.front().copied()
    }

    /// The newest retained event.
    pub fn newest(&self) -> Option<Instant> {
        self.events.back().copied()
    }
}

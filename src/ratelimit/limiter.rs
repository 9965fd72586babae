//! Sliding-window rate limiter.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

use super::key::ClientKey;
use super::policy::LimiterPolicy;
use super::window::Window;
use crate::clock::{Clock, SystemClock};
use crate::config::RateLimitingConfig;
use crate::janitor::{Janitor, Sweep};

/// Default pause between opportunistic sweeps.
const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);
/// Default age after which a sweep drops recorded events.
const DEFAULT_RETENTION: Duration = Duration::from_secs(3600);

/// Outcome of a single rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// The event was recorded.
    Allowed {
        /// Events still available in the current window
        remaining: u32,
    },
    /// The window is full; nothing was recorded.
    Denied {
        /// Time until the oldest counted event leaves the window
        retry_after: Duration,
    },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed { .. })
    }

    /// The retry hint for a denial.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RateLimitDecision::Allowed { .. } => None,
            RateLimitDecision::Denied { retry_after } => Some(*retry_after),
        }
    }
}

/// Per-client sliding-window rate limiter.
///
/// Each [`ClientKey`] owns a [`Window`] in a sharded map. The
/// evict-decide-record sequence for a key runs under that key's shard lock, so
/// concurrent callers on the same key are serialized while different keys
/// mostly proceed in parallel.
pub struct RateLimiter {
    windows: DashMap<ClientKey, Window>,
    clock: Arc<dyn Clock>,
    janitor: Janitor,
}

impl RateLimiter {
    /// Create a rate limiter with explicit cleanup settings.
    pub fn new(cleanup_interval: Duration, retention: Duration, clock: Arc<dyn Clock>) -> Self {
        let janitor = Janitor::new(cleanup_interval, retention, clock.now());
        Self {
            windows: DashMap::new(),
            clock,
            janitor,
        }
    }

    /// Create a rate limiter from configuration.
    pub fn from_config(config: &RateLimitingConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            Duration::from_secs(config.cleanup_interval_seconds),
            Duration::from_secs(config.retention_horizon_seconds),
            clock,
        )
    }

    /// Check `key` against `policy` at the clock's current time.
    pub fn check_and_record(&self, key: &ClientKey, policy: &LimiterPolicy) -> RateLimitDecision {
        self.check_and_record_at(key, policy, self.clock.now())
    }

    /// Check a resolved client identity against `policy`, deriving the key from the policy scope.
    pub fn check_client(&self, client: &str, policy: &LimiterPolicy) -> RateLimitDecision {
        self.check_and_record(&ClientKey::for_policy(client, policy), policy)
    }

    /// Check `key` against `policy` at `now`.
    ///
    /// Events older than the longest window seen for the key are evicted
    /// first, then only events inside `policy.window()` are counted. Keys shared
    /// by global-scope policies of different lengths therefore keep what the
    /// longer policy still needs. If the count is at the limit the call is
    /// denied without being recorded, otherwise `now` is appended.
    pub fn check_and_record_at(
        &self,
        key: &ClientKey,
        policy: &LimiterPolicy,
        now: Instant,
    ) -> RateLimitDecision {
        // Sweeping takes shard locks, so it has to happen before we hold an entry.
        self.janitor.maybe_sweep(now, self);

        trace!(key = %key, operation = policy.operation(), "Checking rate limit");

        if policy.max_events() == 0 {
            debug!(key = %key, operation = policy.operation(), "Operation has a zero budget");
            return RateLimitDecision::Denied {
                retry_after: policy.window(),
            };
        }

        let max_events = policy.max_events() as usize;
        let mut window = self.windows.entry(key.clone()).or_default();
        window.observe_span(policy.window());
        let span = window.span();
        window.evict_expired(now, span);

        let count = window.count_within(now, policy.window());
        if count >= max_events {
            // The count drops below the limit once this event ages out.
            let retry_after = window
                .nth_within(now, policy.window(), count - max_events)
                .map(|ts| policy.window().saturating_sub(now.saturating_duration_since(ts)))
                .unwrap_or_else(|| policy.window());
            debug!(
                key = %key,
                count = count,
                limit = max_events,
                retry_after_secs = retry_after.as_secs_f64(),
                "Rate limit exceeded"
            );
            return RateLimitDecision::Denied { retry_after };
        }

        window.record(now);
        RateLimitDecision::Allowed {
            remaining: (max_events - count - 1) as u32,
        }
    }

    pub fn active_count(&self, key: &ClientKey, window: Duration) -> usize {
        self.active_count_at(key, window, self.clock.now())
    }

    /// Events for `key` inside `(now - window, now]`, without mutating state.
    pub fn active_count_at(&self, key: &ClientKey, window: Duration, now: Instant) -> usize {
        self.windows
            .get(key)
            .map(|w| w.count_within(now, window))
            .unwrap_or(0)
    }

    /// Number of keys currently holding a window.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Drop all windows and restart the cleanup interval.
    pub fn reset(&self) {
        self.windows.clear();
        self.janitor.reset(self.clock.now());
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(
            DEFAULT_CLEANUP_INTERVAL,
            DEFAULT_RETENTION,
            Arc::new(SystemClock::new()),
        )
    }
}

impl Sweep for RateLimiter {
    fn sweep(&self, now: Instant, horizon: Duration) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| {
            // Never prune inside a live decision window.
            let keep_for = horizon.max(window.span());
            window.evict_expired(now, keep_for);
            !window.is_empty()
        });
        let dropped = before.saturating_sub(self.windows.len());
        if dropped > 0 {
            info!(dropped = dropped, remaining = self.windows.len(), "Pruned idle rate limit windows");
        }
        dropped
    }

    fn retention(&self) -> Duration {
        self.janitor.retention()
    }

    fn name(&self) -> &'static str {
        "rate_limiter"
    }
}

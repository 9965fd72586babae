//! Brute-force lockout tracker.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::history::FailureHistory;
use crate::clock::{Clock, SystemClock};
use crate::config::BruteForceConfig;
use crate::identity::Identifier;
use crate::janitor::{Janitor, Sweep};

/// Outcome of a lockout check. Derived on demand, never stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LockoutDecision {
    /// Whether the login attempt may proceed
    pub permitted: bool,
    /// Failures counted inside the lockout window
    pub attempts_in_window: u32,
    /// Time left on an active lockout
    pub remaining: Option<Duration>,
}

impl LockoutDecision {
    fn open(attempts_in_window: u32) -> Self {
        Self {
            permitted: true,
            attempts_in_window,
            remaining: None,
        }
    }

    /// Remaining lockout in whole seconds, rounded up.
    pub fn remaining_secs(&self) -> Option<u64> {
        self.remaining
            .map(|r| r.as_secs() + u64::from(r.subsec_nanos() > 0))
    }

    /// Human-readable status, e.g. `"Locked for 10m 59s"`.
    pub fn message(&self) -> String {
        match self.remaining_secs() {
            Some(secs) if !self.permitted => format!("Locked for {}m {}s", secs / 60, secs % 60),
            _ => "OK".to_string(),
        }
    }
}

/// Tracks failed logins per (client, account) identifier.
///
/// An identifier is locked while at least `threshold` failures fall inside
/// the trailing lockout window. The remaining time reported for a lockout is
/// anchored to the most recent failure. A steady drip of failures spaced just
/// wide enough keeps a high attempt count without ever locking; that anchoring
/// is kept deliberately.
pub struct BruteForceTracker {
    histories: DashMap<Identifier, FailureHistory>,
    threshold: usize,
    lockout_window: Duration,
    history_cap: usize,
    clock: Arc<dyn Clock>,
    janitor: Janitor,
}

impl BruteForceTracker {
    /// Create a tracker.
    ///
    /// `history_cap` is raised to `threshold` if smaller, since a shorter
    /// history could never reach the threshold.
    pub fn new(
        threshold: u32,
        lockout_window: Duration,
        history_cap: usize,
        cleanup_interval: Duration,
        retention: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let threshold = threshold.max(1) as usize;
        if history_cap < threshold {
            warn!(
                history_cap = history_cap,
                threshold = threshold,
                "History cap below lockout threshold, raising it"
            );
        }
        let janitor = Janitor::new(cleanup_interval, retention, clock.now());
        Self {
            histories: DashMap::new(),
            threshold,
            lockout_window,
            history_cap: history_cap.max(threshold),
            clock,
            janitor,
        }
    }

    /// Create a tracker from configuration.
    pub fn from_config(config: &BruteForceConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            config.lockout_threshold,
            Duration::from_secs(config.lockout_window_seconds),
            config.history_cap,
            Duration::from_secs(config.cleanup_interval_seconds),
            Duration::from_secs(config.retention_horizon_seconds),
            clock,
        )
    }

    pub fn evaluate(&self, identifier: &Identifier) -> LockoutDecision {
        self.evaluate_at(identifier, self.clock.now())
    }

    /// Decide whether `identifier` may attempt a login at `now`.
    pub fn evaluate_at(&self, identifier: &Identifier, now: Instant) -> LockoutDecision {
        self.janitor.maybe_sweep(now, self);

        let decision = {
            let Some(mut history) = self.histories.get_mut(identifier) else {
                return LockoutDecision::open(0);
            };
            history.purge_expired(now, self.lockout_window);

            if history.len() < self.threshold {
                LockoutDecision::open(history.len() as u32)
            } else {
                let age = history
                    .most_recent()
                    .map(|last| now.saturating_duration_since(last))
                    .unwrap_or(self.lockout_window);
                if age < self.lockout_window {
                    LockoutDecision {
                        permitted: false,
                        attempts_in_window: history.len() as u32,
                        remaining: Some(self.lockout_window - age),
                    }
                } else {
                    // Lockout expired: start over.
                    history.clear();
                    LockoutDecision::open(0)
                }
            }
        };

        if decision.attempts_in_window == 0 {
            self.histories.remove_if(identifier, |_, h| h.is_empty());
        }

        if decision.permitted {
            debug!(
                identifier = %identifier,
                attempts = decision.attempts_in_window,
                "Login attempt permitted"
            );
        } else {
            warn!(
                identifier = %identifier,
                attempts = decision.attempts_in_window,
                remaining_secs = decision.remaining_secs(),
                "Login attempt blocked by lockout"
            );
        }
        decision
    }

    pub fn record_failure(&self, identifier: &Identifier) -> LockoutDecision {
        self.record_failure_at(identifier, self.clock.now())
    }

    /// Record a failed login for `identifier` at `now`.
    ///
    /// Returns the state right after recording, so the caller can tell
    /// whether this failure is the one that locked the identifier.
    pub fn record_failure_at(&self, identifier: &Identifier, now: Instant) -> LockoutDecision {
        self.janitor.maybe_sweep(now, self);

        let mut history = self
            .histories
            .entry(identifier.clone())
            .or_insert_with(|| FailureHistory::new(self.history_cap));
        history.record(now);

        let recent = history.count_within(now, self.lockout_window);
        if recent >= self.threshold {
            if recent == self.threshold {
                warn!(identifier = %identifier, failures = recent, "Lockout threshold reached");
            }
            LockoutDecision {
                permitted: false,
                attempts_in_window: recent as u32,
                remaining: Some(self.lockout_window),
            }
        } else {
            debug!(identifier = %identifier, failures = recent, "Login failure recorded");
            LockoutDecision::open(recent as u32)
        }
    }

    /// Forget every failure for `identifier`.
    pub fn record_success(&self, identifier: &Identifier) {
        if self.histories.remove(identifier).is_some() {
            debug!(identifier = %identifier, "Failure history cleared after successful login");
        }
    }

    pub fn attempts(&self, identifier: &Identifier) -> usize {
        self.attempts_at(identifier, self.clock.now())
    }

    /// Failures for `identifier` inside the lockout window at `now`, without mutating state.
    pub fn attempts_at(&self, identifier: &Identifier, now: Instant) -> usize {
        self.histories
            .get(identifier)
            .map(|h| h.count_within(now, self.lockout_window))
            .unwrap_or(0)
    }

    /// Failures still allowed before `identifier` locks, given `attempts` in the window.
    pub fn remaining_attempts(&self, attempts: u32) -> u32 {
        (self.threshold as u32).saturating_sub(attempts)
    }

    /// Number of identifiers holding a history.
    pub fn tracked_identifiers(&self) -> usize {
        self.histories.len()
    }

    pub fn threshold(&self) -> u32 {
        self.threshold as u32
    }

    /// Drop every history and restart the cleanup interval.
    pub fn reset(&self) {
        self.histories.clear();
        self.janitor.reset(self.clock.now());
    }
}

impl Default for BruteForceTracker {
    fn default() -> Self {
        Self::from_config(&BruteForceConfig::default(), Arc::new(SystemClock::new()))
    }
}

impl Sweep for BruteForceTracker {
    fn sweep(&self, now: Instant, horizon: Duration) -> usize {
        let keep_for = horizon.max(self.lockout_window);
        let before = self.histories.len();
        self.histories.retain(|_, history| {
            history.purge_expired(now, keep_for);
            !history.is_empty()
        });
        let dropped = before.saturating_sub(self.histories.len());
        if dropped > 0 {
            info!(dropped = dropped, remaining = self.histories.len(), "Pruned stale failure histories");
        }
        dropped
    }

    fn retention(&self) -> Duration {
        self.janitor.retention()
    }

    fn name(&self) -> &'static str {
        "brute_force"
    }
}

//! Amortized cleanup of stale governance state.
//!
//! Stores implement [`Sweep`]. A [`Janitor`] decides when a sweep is due and
//! is checked on every governed call, so memory stays bounded without a
//! dedicated thread. [`spawn_background`] additionally drives sweeps from a
//! tokio interval for hosts that see long idle stretches.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::clock::Clock;

/// A store whose stale entries can be pruned.
pub trait Sweep: Send + Sync {
    /// Remove every recorded event older than `horizon` relative to `now`,
    /// dropping entries left empty. Returns the number of entries dropped.
    fn sweep(&self, now: Instant, horizon: Duration) -> usize;

    /// Default horizon for sweeps of this store.
    fn retention(&self) -> Duration;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// Opportunistic sweep scheduler.
#[derive(Debug)]
pub struct Janitor {
    interval: Duration,
    retention: Duration,
    last_sweep: Mutex<Instant>,
}

impl Janitor {
    /// Create a janitor that sweeps once more than `interval` has passed,
    /// pruning events older than `retention`. The interval starts at `now`.
    pub fn new(interval: Duration, retention: Duration, now: Instant) -> Self {
        Self {
            interval,
            retention,
            last_sweep: Mutex::new(now),
        }
    }

    /// How old an event must be before a sweep drops it.
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Sweep `target` if the interval has elapsed.
    ///
    /// Must not be called while holding a lock on any of `target`'s entries.
    /// If another caller is already checking, this returns immediately.
    pub fn maybe_sweep<S: Sweep + ?Sized>(&self, now: Instant, target: &S) -> Option<usize> {
        let mut last = self.last_sweep.try_lock()?;
        if now.saturating_duration_since(*last) <= self.interval {
            return None;
        }
        *last = now;
        drop(last);

        let dropped = target.sweep(now, self.retention);
        debug!(
            store = target.name(),
            dropped = dropped,
            "Opportunistic sweep finished"
        );
        Some(dropped)
    }

    /// Restart the interval at `now`.
    pub fn reset(&self, now: Instant) {
        *self.last_sweep.lock() = now;
    }
}

/// Run sweeps over `targets` every `period`, each with its own retention,
/// until `shutdown` flips to `true` or its sender is dropped.
pub fn spawn_background(
    targets: Vec<Arc<dyn Sweep>>,
    clock: Arc<dyn Clock>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately; skip it so the first sweep
        // happens one period after startup.
        ticker.tick().await;

        info!(
            period_secs = period.as_secs(),
            stores = targets.len(),
            "Background janitor started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = clock.now();
                    for target in &targets {
                        let dropped = target.sweep(now, target.retention());
                        debug!(store = target.name(), dropped = dropped, "Background sweep finished");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Background janitor stopped");
    })
}

//! Brute-force login lockout tracking.

mod history;
mod tracker;

pub use history::FailureHistory;
pub use tracker::{BruteForceTracker, LockoutDecision};

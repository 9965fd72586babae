//! Tollgate - In-process request governance
//!
//! This crate bounds request volume per client with a sliding-window rate
//! limiter and bounds password guessing per (client, account) pair with a
//! brute-force lockout tracker. Both keep time-windowed state in memory, are
//! safe to share across request handlers, and prune themselves as they go.

pub mod bruteforce;
pub mod clock;
pub mod config;
pub mod error;
pub mod guard;
pub mod identity;
pub mod janitor;
pub mod ratelimit;
pub mod server;

pub use bruteforce::{BruteForceTracker, LockoutDecision};
pub use clock::{Clock, MockClock, SystemClock};
pub use guard::{GuardDecision, LoginGate, LoginOutcome, Rejection, RequestGuard};
pub use identity::{Identifier, RequestMetadata};
pub use ratelimit::{ClientKey, LimiterPolicy, RateLimitDecision, RateLimiter, ScopeMode};

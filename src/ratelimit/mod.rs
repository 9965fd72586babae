//! Sliding-window rate limiting and state management.

mod key;
mod limiter;
mod policy;
mod window;

pub use key::ClientKey;
pub use limiter::{RateLimitDecision, RateLimiter};
pub use policy::{normalize_operation, LimiterPolicy, ScopeMode, GLOBAL_SCOPE};
pub use window::Window;

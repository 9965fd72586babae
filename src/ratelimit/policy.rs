//! Rate limit policies and their scope.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scope sentinel shared by every globally scoped operation of a client.
pub const GLOBAL_SCOPE: &str = "__global__";

/// Canonical form of an operation name. Lookups and keys are case-insensitive
/// because layered configuration lowercases map keys.
pub fn normalize_operation(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

/// Whether a limit counts per protected operation or across all of them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeMode {
    /// Each operation has its own budget
    #[default]
    PerOperation,
    /// All globally scoped operations share one budget per client
    Global,
}

/// An immutable limit bound to one protected operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterPolicy {
    operation: String,
    max_events: u32,
    window: Duration,
    scope_mode: ScopeMode,
}

impl LimiterPolicy {
    /// Bind a limit of `max_events` per `window_seconds` to `operation`.
    ///
    /// The operation name is stored in its normalized form. A policy with
    /// `max_events == 0` denies every call.
    pub fn configure(
        operation: impl AsRef<str>,
        max_events: u32,
        window_seconds: u64,
        scope_mode: ScopeMode,
    ) -> Self {
        Self {
            operation: normalize_operation(operation.as_ref()),
            max_events,
            window: Duration::from_secs(window_seconds),
            scope_mode,
        }
    }

    /// The protected operation this policy is bound to.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Maximum events allowed inside one window.
    pub fn max_events(&self) -> u32 {
        self.max_events
    }

    /// Length of the sliding window.
    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn scope_mode(&self) -> ScopeMode {
        self.scope_mode
    }

    /// The scope component of client keys governed by this policy.
    pub fn scope(&self) -> &str {
        match self.scope_mode {
            ScopeMode::PerOperation => &self.operation,
            ScopeMode::Global => GLOBAL_SCOPE,
        }
    }

    /// Human-readable description of the limit, used in denial details.
    pub fn describe(&self) -> String {
        format!(
            "Maximum {} requests per {} seconds",
            self.max_events,
            self.window.as_secs()
        )
    }
}

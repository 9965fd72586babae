//! Request guard: the governance stage of the request pipeline.
//!
//! A host calls [`RequestGuard::admit`] before running a protected handler and
//! maps a [`Rejection`] to an HTTP 429. Login handlers additionally call
//! [`RequestGuard::login_gate`] before verifying credentials and
//! [`RequestGuard::report_login`] afterwards. Decisions are advisory; the
//! guard never runs or aborts the handler itself.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{trace, warn};

use crate::bruteforce::{BruteForceTracker, LockoutDecision};
use crate::clock::Clock;
use crate::config::TollgateConfig;
use crate::identity::{Identifier, RequestMetadata};
use crate::janitor::Sweep;
use crate::ratelimit::{normalize_operation, LimiterPolicy, RateLimitDecision, RateLimiter};

/// Status code hosts should answer a rejection with.
pub const TOO_MANY_REQUESTS: u16 = 429;

/// A denial, shaped for an HTTP error body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub status: u16,
    pub error: String,
    pub detail: String,
    /// Seconds until retrying can succeed
    pub retry_after_secs: f64,
}

impl Rejection {
    fn rate_limited(policy: &LimiterPolicy, retry_after_secs: f64) -> Self {
        Self {
            status: TOO_MANY_REQUESTS,
            error: "Rate limit exceeded".to_string(),
            detail: policy.describe(),
            retry_after_secs,
        }
    }

    fn locked(decision: &LockoutDecision) -> Self {
        Self {
            status: TOO_MANY_REQUESTS,
            error: "Too many failed login attempts".to_string(),
            detail: decision.message(),
            retry_after_secs: decision.remaining_secs().unwrap_or(0) as f64,
        }
    }
}

/// Outcome of admitting a request to a protected operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GuardDecision {
    Allowed {
        client: String,
        /// Budget left in the window; absent for ungoverned operations
        remaining: Option<u32>,
    },
    Rejected(Rejection),
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardDecision::Allowed { .. })
    }
}

/// Outcome of the pre-credential lockout check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum LoginGate {
    /// Verify credentials, then report back with this identifier.
    Proceed { identifier: Identifier },
    /// Do not verify credentials.
    Locked(Rejection),
}

/// What to tell the caller after credentials were checked.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoginOutcome {
    Succeeded,
    /// Wrong credentials; the identifier is still open.
    Failed { remaining_attempts: u32 },
    /// Wrong credentials, and this failure locked the identifier. The
    /// remaining-attempts count is withheld.
    LockedOut(Rejection),
}

/// Point-in-time counters for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct GuardStats {
    pub tracked_keys: usize,
    pub tracked_identifiers: usize,
    pub governed_operations: usize,
    pub as_of: DateTime<Utc>,
}

/// Governance stage combining the rate limiter, the lockout tracker and the
/// per-operation policy table.
pub struct RequestGuard {
    limiter: Arc<RateLimiter>,
    tracker: Arc<BruteForceTracker>,
    policies: HashMap<String, LimiterPolicy>,
}

impl RequestGuard {
    /// Assemble a guard from existing services and policies.
    pub fn new(
        limiter: Arc<RateLimiter>,
        tracker: Arc<BruteForceTracker>,
        policies: impl IntoIterator<Item = LimiterPolicy>,
    ) -> Self {
        let policies = policies
            .into_iter()
            .map(|p| (p.operation().to_string(), p))
            .collect();
        Self {
            limiter,
            tracker,
            policies,
        }
    }

    /// Build the services and the policy table from configuration.
    pub fn from_config(config: &TollgateConfig, clock: Arc<dyn Clock>) -> Self {
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limiting, clock.clone()));
        let tracker = Arc::new(BruteForceTracker::from_config(&config.brute_force, clock));
        Self::new(limiter, tracker, config.rate_limiting.policies())
    }

    /// The policy bound to `operation`, if it is governed.
    pub fn policy(&self, operation: &str) -> Option<&LimiterPolicy> {
        self.policies.get(&normalize_operation(operation))
    }

    /// Admit a request for `operation` from the client described by `meta`.
    pub fn admit(&self, operation: &str, meta: &RequestMetadata) -> GuardDecision {
        self.admit_client(operation, &meta.client_identity())
    }

    /// Admit a request for `operation` from an already resolved client.
    pub fn admit_client(&self, operation: &str, client: &str) -> GuardDecision {
        let Some(policy) = self.policy(operation) else {
            trace!(operation = operation, "Operation is not rate limited");
            return GuardDecision::Allowed {
                client: client.to_string(),
                remaining: None,
            };
        };

        match self.limiter.check_client(client, policy) {
            RateLimitDecision::Allowed { remaining } => GuardDecision::Allowed {
                client: client.to_string(),
                remaining: Some(remaining),
            },
            RateLimitDecision::Denied { retry_after } => {
                warn!(
                    client = client,
                    operation = operation,
                    retry_after_secs = retry_after.as_secs_f64(),
                    "Request rejected by rate limit"
                );
                GuardDecision::Rejected(Rejection::rate_limited(policy, retry_after.as_secs_f64()))
            }
        }
    }

    /// Check lockout for a login to `account` before verifying credentials.
    pub fn login_gate(&self, meta: &RequestMetadata, account: &str) -> LoginGate {
        let identifier = Identifier::new(&meta.client_identity(), account);
        let decision = self.tracker.evaluate(&identifier);
        if decision.permitted {
            LoginGate::Proceed { identifier }
        } else {
            LoginGate::Locked(Rejection::locked(&decision))
        }
    }

    /// Report the credential check for an identifier obtained from [`login_gate`](Self::login_gate).
    pub fn report_login(&self, identifier: &Identifier, success: bool) -> LoginOutcome {
        if success {
            self.tracker.record_success(identifier);
            return LoginOutcome::Succeeded;
        }

        let state = self.tracker.record_failure(identifier);
        if state.permitted {
            LoginOutcome::Failed {
                remaining_attempts: self.tracker.remaining_attempts(state.attempts_in_window),
            }
        } else {
            LoginOutcome::LockedOut(Rejection::locked(&state))
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn tracker(&self) -> &Arc<BruteForceTracker> {
        &self.tracker
    }

    /// Stores a background janitor should sweep.
    pub fn sweep_targets(&self) -> Vec<Arc<dyn Sweep>> {
        vec![
            self.limiter.clone() as Arc<dyn Sweep>,
            self.tracker.clone() as Arc<dyn Sweep>,
        ]
    }

    pub fn stats(&self) -> GuardStats {
        GuardStats {
            tracked_keys: self.limiter.tracked_keys(),
            tracked_identifiers: self.tracker.tracked_identifiers(),
            governed_operations: self.policies.len(),
            as_of: Utc::now(),
        }
    }

    /// Forget all limiter and lockout state.
    pub fn reset(&self) {
        self.limiter.reset();
        self.tracker.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::ratelimit::ScopeMode;
    use std::time::Duration;

    fn guard(clock: &MockClock) -> RequestGuard {
        let yaml = r#"
rate_limiting:
  operations:
    analyze-file:
      requests_per_window: 2
    limits:
      requests_per_window: 3
      scope_mode: global
    test-ocr:
      requests_per_window: 3
      scope_mode: global
"#;
        let config = TollgateConfig::from_yaml(yaml).unwrap();
        RequestGuard::from_config(&config, Arc::new(clock.clone()))
    }

    fn meta(ip: &str) -> RequestMetadata {
        RequestMetadata {
            forwarded_for: Some(ip.to_string()),
            ..RequestMetadata::default()
        }
    }

    #[test]
    fn test_admit_until_rejected() {
        let clock = MockClock::default();
        let guard = guard(&clock);

        assert_eq!(
            guard.admit("analyze-file", &meta("1.2.3.4")),
            GuardDecision::Allowed {
                client: "1.2.3.4".to_string(),
                remaining: Some(1)
            }
        );
        clock.advance(Duration::from_secs(5));
        assert!(guard.admit("analyze-file", &meta("1.2.3.4")).is_allowed());

        clock.advance(Duration::from_secs(5));
        match guard.admit("analyze-file", &meta("1.2.3.4")) {
            GuardDecision::Rejected(rejection) => {
                assert_eq!(rejection.status, 429);
                assert_eq!(rejection.retry_after_secs, 50.0);
                assert_eq!(rejection.detail, "Maximum 2 requests per 60 seconds");
            }
            other => panic!("expected rejection, got {:?}", other),
        }

        // Another client is unaffected
        assert!(guard.admit("analyze-file", &meta("5.6.7.8")).is_allowed());
    }

    #[test]
    fn test_loaded_mixed_case_operation_is_governed() {
        let path = std::env::temp_dir().join(format!("tollgate-guard-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "rate_limiting:\n  operations:\n    analyzeFile:\n      requests_per_window: 1\n",
        )
        .unwrap();
        let config = TollgateConfig::load(Some(path.as_path()));
        std::fs::remove_file(&path).unwrap();

        let clock = MockClock::default();
        let guard = RequestGuard::from_config(&config.unwrap(), Arc::new(clock.clone()));
        assert!(guard.policy("analyzeFile").is_some());
        assert_eq!(
            guard.admit_client("analyzeFile", "1.2.3.4"),
            GuardDecision::Allowed {
                client: "1.2.3.4".to_string(),
                remaining: Some(0)
            }
        );
        assert!(!guard.admit_client("analyzeFile", "1.2.3.4").is_allowed());
        assert!(!guard.admit_client("ANALYZEFILE", "1.2.3.4").is_allowed());
    }

    #[test]
    fn test_ungoverned_operation_passes() {
        let clock = MockClock::default();
        let guard = guard(&clock);
        for _ in 0..100 {
            assert_eq!(
                guard.admit("health", &meta("1.2.3.4")),
                GuardDecision::Allowed {
                    client: "1.2.3.4".to_string(),
                    remaining: None
                }
            );
        }
        assert_eq!(guard.stats().tracked_keys, 0);
    }

    #[test]
    fn test_global_operations_share_budget() {
        let clock = MockClock::default();
        let guard = guard(&clock);
        assert_eq!(guard.policy("limits").unwrap().scope_mode(), ScopeMode::Global);

        assert!(guard.admit("limits", &meta("1.2.3.4")).is_allowed());
        assert!(guard.admit("test-ocr", &meta("1.2.3.4")).is_allowed());
        assert!(guard.admit("limits", &meta("1.2.3.4")).is_allowed());
        assert!(!guard.admit("test-ocr", &meta("1.2.3.4")).is_allowed());
        // Per-operation budget is separate from the global one
        assert!(guard.admit("analyze-file", &meta("1.2.3.4")).is_allowed());
    }

    #[test]
    fn test_login_flow_withholds_count_when_locking() {
        let clock = MockClock::default();
        let guard = guard(&clock);
        let client = meta("1.2.3.4");

        for expected_remaining in (1..5).rev() {
            let LoginGate::Proceed { identifier } = guard.login_gate(&client, "Bob@Example.com") else {
                panic!("should not be locked yet");
            };
            assert_eq!(
                guard.report_login(&identifier, false),
                LoginOutcome::Failed {
                    remaining_attempts: expected_remaining
                }
            );
            clock.advance(Duration::from_secs(60));
        }

        let LoginGate::Proceed { identifier } = guard.login_gate(&client, "bob@example.com") else {
            panic!("should not be locked yet");
        };
        match guard.report_login(&identifier, false) {
            LoginOutcome::LockedOut(rejection) => {
                assert_eq!(rejection.detail, "Locked for 15m 0s");
            }
            other => panic!("expected lockout, got {:?}", other),
        }

        clock.advance(Duration::from_secs(1));
        match guard.login_gate(&client, "bob@example.com") {
            LoginGate::Locked(rejection) => {
                assert_eq!(rejection.status, 429);
                assert_eq!(rejection.detail, "Locked for 14m 59s");
            }
            other => panic!("expected lockout, got {:?}", other),
        }

        // Same account from another address is independent
        assert!(matches!(
            guard.login_gate(&meta("9.9.9.9"), "bob@example.com"),
            LoginGate::Proceed { .. }
        ));
    }

    #[test]
    fn test_success_resets_failures() {
        let clock = MockClock::default();
        let guard = guard(&clock);
        let client = meta("1.2.3.4");

        let LoginGate::Proceed { identifier } = guard.login_gate(&client, "alice@example.com") else {
            panic!("fresh identifier must proceed");
        };
        guard.report_login(&identifier, false);
        guard.report_login(&identifier, false);
        assert_eq!(guard.report_login(&identifier, true), LoginOutcome::Succeeded);
        assert_eq!(guard.tracker().evaluate(&identifier).attempts_in_window, 0);
    }

    #[test]
    fn test_reset_and_stats() {
        let clock = MockClock::default();
        let guard = guard(&clock);
        guard.admit("analyze-file", &meta("1.2.3.4"));
        let identifier = Identifier::new("1.2.3.4", "x@example.com");
        guard.report_login(&identifier, false);

        let stats = guard.stats();
        assert_eq!(stats.tracked_keys, 1);
        assert_eq!(stats.tracked_identifiers, 1);
        assert_eq!(stats.governed_operations, 3);

        guard.reset();
        let stats = guard.stats();
        assert_eq!(stats.tracked_keys, 0);
        assert_eq!(stats.tracked_identifiers, 0);
    }

    #[test]
    fn test_rejection_serializes_for_http_body() {
        let decision = GuardDecision::Rejected(Rejection {
            status: 429,
            error: "Rate limit exceeded".to_string(),
            detail: "Maximum 5 requests per 60 seconds".to_string(),
            retry_after_secs: 55.0,
        });
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["decision"], "rejected");
        assert_eq!(json["status"], 429);
        assert_eq!(json["retry_after_secs"], 55.0);
    }
}

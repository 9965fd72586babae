//! Client key generation.

use super::policy::LimiterPolicy;

/// A key that identifies one sliding window: a client within a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey {
    /// Resolved client identity
    pub client: String,
    /// Operation name, or the global sentinel
    pub scope: String,
}

impl ClientKey {
    /// Create a key from its parts.
    pub fn new(client: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            scope: scope.into(),
        }
    }

    /// The key a policy uses for `client`.
    pub fn for_policy(client: &str, policy: &LimiterPolicy) -> Self {
        Self::new(client, policy.scope())
    }
}

impl std::fmt::Display for ClientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}", self.client, self.scope)
    }
}

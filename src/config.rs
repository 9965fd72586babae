//! Configuration management for Tollgate.
//!
//! Configuration comes from an optional YAML file layered with environment
//! variables such as `TOLLGATE__BRUTE_FORCE__LOCKOUT_THRESHOLD=3`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::error::{Result, TollgateError};
use crate::ratelimit::{normalize_operation, LimiterPolicy, ScopeMode};

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Brute-force lockout configuration
    #[serde(default)]
    pub brute_force: BruteForceConfig,

    /// Background cleanup configuration
    #[serde(default)]
    pub janitor: JanitorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Window length for operations that don't set their own
    #[serde(default = "default_window")]
    pub window_seconds: u64,

    /// Minimum time between opportunistic sweeps
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,

    /// Age after which a sweep drops recorded events
    #[serde(default = "default_retention_horizon")]
    pub retention_horizon_seconds: u64,

    /// Limits keyed by protected operation name
    #[serde(default)]
    pub operations: BTreeMap<String, OperationLimit>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_window(),
            cleanup_interval_seconds: default_cleanup_interval(),
            retention_horizon_seconds: default_retention_horizon(),
            operations: BTreeMap::new(),
        }
    }
}

/// The limit for one protected operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationLimit {
    /// Maximum requests per window
    pub requests_per_window: u32,

    /// Overrides the section-wide window length
    #[serde(default)]
    pub window_seconds: Option<u64>,

    /// Whether this operation shares the client's global budget
    #[serde(default)]
    pub scope_mode: ScopeMode,
}

impl RateLimitingConfig {
    /// Build one policy per configured operation.
    pub fn policies(&self) -> Vec<LimiterPolicy> {
        self.operations
            .iter()
            .map(|(name, limit)| {
                LimiterPolicy::configure(
                    name.clone(),
                    limit.requests_per_window,
                    limit.window_seconds.unwrap_or(self.window_seconds),
                    limit.scope_mode,
                )
            })
            .collect()
    }
}

fn default_window() -> u64 {
    60
}

fn default_cleanup_interval() -> u64 {
    300
}

fn default_retention_horizon() -> u64 {
    3600
}

/// Brute-force lockout configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BruteForceConfig {
    /// Failures inside the window that lock an identifier
    #[serde(default = "default_lockout_threshold")]
    pub lockout_threshold: u32,

    /// Trailing window over which failures count
    #[serde(default = "default_lockout_window")]
    pub lockout_window_seconds: u64,

    /// Failures kept per identifier
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,

    /// Minimum time between opportunistic sweeps
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,

    /// Age after which a sweep drops recorded failures
    #[serde(default = "default_retention_horizon")]
    pub retention_horizon_seconds: u64,
}

impl Default for BruteForceConfig {
    fn default() -> Self {
        Self {
            lockout_threshold: default_lockout_threshold(),
            lockout_window_seconds: default_lockout_window(),
            history_cap: default_history_cap(),
            cleanup_interval_seconds: default_cleanup_interval(),
            retention_horizon_seconds: default_retention_horizon(),
        }
    }
}

fn default_lockout_threshold() -> u32 {
    5
}

fn default_lockout_window() -> u64 {
    900
}

fn default_history_cap() -> usize {
    10
}

/// Background cleanup configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JanitorConfig {
    /// Period of the background sweep task; unset disables it
    #[serde(default)]
    pub background_interval_seconds: Option<u64>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TollgateConfig {
    /// Load configuration from an optional YAML file layered with
    /// `TOLLGATE__`-prefixed environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Yaml),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix("TOLLGATE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: TollgateConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollgateConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings under which the limiter or tracker cannot work.
    pub fn validate(&self) -> Result<()> {
        let rl = &self.rate_limiting;
        if rl.window_seconds == 0 {
            return Err(TollgateError::Config(
                "rate_limiting.window_seconds must be positive".to_string(),
            ));
        }
        if rl.cleanup_interval_seconds == 0 {
            return Err(TollgateError::Config(
                "rate_limiting.cleanup_interval_seconds must be positive".to_string(),
            ));
        }
        let mut seen = std::collections::BTreeSet::new();
        for (name, limit) in &rl.operations {
            if !seen.insert(normalize_operation(name)) {
                return Err(TollgateError::Config(format!(
                    "rate_limiting.operations.{} differs from another operation only by case",
                    name
                )));
            }
            if limit.window_seconds == Some(0) {
                return Err(TollgateError::Config(format!(
                    "rate_limiting.operations.{}.window_seconds must be positive",
                    name
                )));
            }
        }

        let bf = &self.brute_force;
        if bf.lockout_threshold == 0 {
            return Err(TollgateError::Config(
                "brute_force.lockout_threshold must be positive".to_string(),
            ));
        }
        if bf.lockout_window_seconds == 0 {
            return Err(TollgateError::Config(
                "brute_force.lockout_window_seconds must be positive".to_string(),
            ));
        }
        if bf.history_cap < bf.lockout_threshold as usize {
            return Err(TollgateError::Config(format!(
                "brute_force.history_cap ({}) must be at least lockout_threshold ({})",
                bf.history_cap, bf.lockout_threshold
            )));
        }
        if bf.cleanup_interval_seconds == 0 {
            return Err(TollgateError::Config(
                "brute_force.cleanup_interval_seconds must be positive".to_string(),
            ));
        }

        if self.janitor.background_interval_seconds == Some(0) {
            return Err(TollgateError::Config(
                "janitor.background_interval_seconds must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let config = TollgateConfig::default();
        assert_eq!(config.rate_limiting.window_seconds, 60);
        assert_eq!(config.rate_limiting.cleanup_interval_seconds, 300);
        assert_eq!(config.rate_limiting.retention_horizon_seconds, 3600);
        assert_eq!(config.brute_force.lockout_threshold, 5);
        assert_eq!(config.brute_force.lockout_window_seconds, 900);
        assert_eq!(config.brute_force.history_cap, 10);
        assert!(config.janitor.background_interval_seconds.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_operations() {
        let yaml = r#"
rate_limiting:
  operations:
    analyze-file:
      requests_per_window: 10
    limits:
      requests_per_window: 30
      scope_mode: global
    test-ocr:
      requests_per_window: 5
      window_seconds: 120
"#;
        let config = TollgateConfig::from_yaml(yaml).unwrap();
        let policies = config.rate_limiting.policies();
        assert_eq!(policies.len(), 3);

        let analyze = policies.iter().find(|p| p.operation() == "analyze-file").unwrap();
        assert_eq!(analyze.max_events(), 10);
        assert_eq!(analyze.window(), Duration::from_secs(60));
        assert_eq!(analyze.scope_mode(), ScopeMode::PerOperation);

        let limits = policies.iter().find(|p| p.operation() == "limits").unwrap();
        assert_eq!(limits.scope_mode(), ScopeMode::Global);

        let ocr = policies.iter().find(|p| p.operation() == "test-ocr").unwrap();
        assert_eq!(ocr.window(), Duration::from_secs(120));
    }

    #[test]
    fn test_partial_brute_force_section_keeps_defaults() {
        let yaml = r#"
brute_force:
  lockout_threshold: 3
"#;
        let config = TollgateConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.brute_force.lockout_threshold, 3);
        assert_eq!(config.brute_force.lockout_window_seconds, 900);
    }

    #[test]
    fn test_history_cap_below_threshold_rejected() {
        let yaml = r#"
brute_force:
  lockout_threshold: 12
  history_cap: 10
"#;
        let err = TollgateConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, TollgateError::Config(_)));
    }

    #[test]
    fn test_zero_window_rejected() {
        let yaml = r#"
rate_limiting:
  operations:
    upload:
      requests_per_window: 5
      window_seconds: 0
"#;
        assert!(TollgateConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_zero_budget_operation_is_valid() {
        let yaml = r#"
rate_limiting:
  operations:
    disabled:
      requests_per_window: 0
"#;
        assert!(TollgateConfig::from_yaml(yaml).is_ok());
    }

    #[test]
    fn test_malformed_yaml() {
        let err = TollgateConfig::from_yaml("rate_limiting: [").unwrap_err();
        assert!(matches!(err, TollgateError::Yaml(_)));
    }

    #[test]
    fn test_operations_differing_by_case_rejected() {
        let yaml = r#"
rate_limiting:
  operations:
    Upload:
      requests_per_window: 5
    upload:
      requests_per_window: 50
"#;
        let err = TollgateConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, TollgateError::Config(_)));
    }

    #[test]
    fn test_load_and_from_yaml_agree_on_operation_names() {
        let yaml = r#"
rate_limiting:
  operations:
    analyzeFile:
      requests_per_window: 1
"#;
        let path = std::env::temp_dir().join(format!("tollgate-config-{}.yaml", std::process::id()));
        std::fs::write(&path, yaml).unwrap();
        let loaded = TollgateConfig::load(Some(path.as_path()));
        std::fs::remove_file(&path).unwrap();
        let loaded = loaded.unwrap();
        let parsed = TollgateConfig::from_yaml(yaml).unwrap();

        let names = |config: &TollgateConfig| -> Vec<String> {
            config
                .rate_limiting
                .policies()
                .iter()
                .map(|p| p.operation().to_string())
                .collect()
        };
        assert_eq!(names(&loaded), vec!["analyzefile".to_string()]);
        assert_eq!(names(&loaded), names(&parsed));
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = TollgateConfig::load(None).unwrap();
        assert_eq!(config.brute_force.history_cap, 10);
    }
}

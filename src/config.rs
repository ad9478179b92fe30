//! Per-operation call policies.
//!
//! Rates, retry delays and attempt caps differ per API operation. They are
//! configuration, loaded from TOML:
//!
//! ```toml
//! [defaults]
//! max_attempts = 3
//! timeout_secs = 120.0
//!
//! [operations.getInventorySummaries]
//! delay = { kind = "linear", step_secs = 2.0 }
//!
//! [operations.getOrders]
//! rate = 10.0
//! ```

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::meter::interval_for_rate;
use crate::retry::{DelayFn, RetryPolicy};

/// Errors that can occur when loading policy configuration.
#[derive(Debug, Error)]
pub enum PolicyConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    /// The path could not be converted to a string.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// The configuration sources could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    /// Inline TOML could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("Invalid policy for {scope}: {reason}")]
    Invalid { scope: String, reason: String },
}

/// How long to wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DelaySpec {
    /// `step_secs * attempt`
    Linear { step_secs: f64 },
    /// `secs` after every attempt
    Constant { secs: f64 },
    /// `base_secs * 2^(attempt - 1)`, capped at `max_secs`
    Exponential { base_secs: f64, max_secs: f64 },
}

impl DelaySpec {
    fn validate(&self) -> Result<(), String> {
        let values = match *self {
            DelaySpec::Linear { step_secs } => vec![step_secs],
            DelaySpec::Constant { secs } => vec![secs],
            DelaySpec::Exponential {
                base_secs,
                max_secs,
            } => vec![base_secs, max_secs],
        };
        if values.iter().all(|v| v.is_finite() && *v >= 0.0) {
            Ok(())
        } else {
            Err(format!("delay values must be finite and non-negative: {:?}", self))
        }
    }

    /// Builds the delay function. Call [`PolicyConfig::validate`] first.
    pub fn to_delay_fn(&self) -> DelayFn {
        match *self {
            DelaySpec::Linear { step_secs } => DelayFn::linear(secs(step_secs)),
            DelaySpec::Constant { secs: value } => DelayFn::constant(secs(value)),
            DelaySpec::Exponential {
                base_secs,
                max_secs,
            } => DelayFn::exponential(secs(base_secs), secs(max_secs)),
        }
    }
}

/// Validated values are finite and non-negative, so the only failure left
/// is overflow, which saturates.
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}

/// Policy for one operation. Unset fields fall back to [`PolicyDefaults`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OperationPolicy {
    /// Requests per second admitted through this operation's meter.
    #[serde(default)]
    pub rate: Option<f64>,
    /// Backoff between attempts; when unset the operation is not retried.
    #[serde(default)]
    pub delay: Option<DelaySpec>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Overall deadline for one call, retries included.
    #[serde(default)]
    pub timeout_secs: Option<f64>,
}

/// Settings applied to every operation unless overridden.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PolicyDefaults {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub timeout_secs: Option<f64>,
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for PolicyDefaults {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            timeout_secs: None,
        }
    }
}

/// Operation name to policy mapping.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub defaults: PolicyDefaults,
    #[serde(default)]
    pub operations: HashMap<String, OperationPolicy>,
}

/// A policy with defaults applied, ready to build invokers from.
#[derive(Debug, Clone)]
pub struct ResolvedPolicy {
    pub rate: Option<f64>,
    pub retry: Option<RetryPolicy>,
    pub timeout: Option<Duration>,
}

impl PolicyConfig {
    /// Loads policies from a TOML file.
    ///
    /// Environment variables prefixed with `SPCALL__` override file values,
    /// with `__` separating nested keys
    /// (e.g. `SPCALL__DEFAULTS__MAX_ATTEMPTS=5`).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PolicyConfigError> {
        let path = path.as_ref();

        let path_str = path
            .to_str()
            .ok_or_else(|| PolicyConfigError::InvalidPath(format!("{:?}", path)))?;

        if !path.exists() {
            return Err(PolicyConfigError::FileNotFound(path_str.to_string()));
        }

        let config = Config::builder()
            .add_source(File::with_name(path_str))
            .add_source(
                Environment::with_prefix("SPCALL")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let policies: PolicyConfig = config.try_deserialize()?;
        policies.validate()?;
        Ok(policies)
    }

    /// Parses policies from a TOML string.
    pub fn from_toml_str(source: &str) -> Result<Self, PolicyConfigError> {
        let policies: PolicyConfig = toml::from_str(source)?;
        policies.validate()?;
        Ok(policies)
    }

    /// Checks every rate, delay, attempt cap and timeout.
    pub fn validate(&self) -> Result<(), PolicyConfigError> {
        let invalid = |scope: &str, reason: String| PolicyConfigError::Invalid {
            scope: scope.to_string(),
            reason,
        };

        if self.defaults.max_attempts == 0 {
            return Err(invalid("defaults", "max_attempts must be at least 1".into()));
        }
        validate_timeout(self.defaults.timeout_secs).map_err(|r| invalid("defaults", r))?;

        for (name, policy) in &self.operations {
            if let Some(rate) = policy.rate {
                interval_for_rate(rate).map_err(|e| invalid(name, e.to_string()))?;
            }
            if let Some(delay) = &policy.delay {
                delay.validate().map_err(|r| invalid(name, r))?;
            }
            if policy.max_attempts == Some(0) {
                return Err(invalid(name, "max_attempts must be at least 1".into()));
            }
            validate_timeout(policy.timeout_secs).map_err(|r| invalid(name, r))?;
        }
        Ok(())
    }

    /// Looks up an operation's policy. Names match case-insensitively.
    pub fn get(&self, operation: &str) -> Option<&OperationPolicy> {
        self.operations.get(operation).or_else(|| {
            self.operations
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(operation))
                .map(|(_, policy)| policy)
        })
    }

    /// Applies defaults to an operation's policy.
    ///
    /// Unknown operations get neither a meter nor retries, only the default
    /// timeout.
    pub fn resolve(&self, operation: &str) -> ResolvedPolicy {
        let policy = self.get(operation).cloned().unwrap_or_default();
        let max_attempts = policy.max_attempts.unwrap_or(self.defaults.max_attempts);
        ResolvedPolicy {
            rate: policy.rate,
            retry: policy
                .delay
                .map(|delay| RetryPolicy::new(delay.to_delay_fn(), max_attempts)),
            timeout: policy
                .timeout_secs
                .or(self.defaults.timeout_secs)
                .map(secs),
        }
    }

    /// Configured operation names, sorted.
    pub fn operation_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

fn validate_timeout(timeout_secs: Option<f64>) -> Result<(), String> {
    match timeout_secs {
        Some(value) if !(value.is_finite() && value > 0.0) => {
            Err(format!("timeout_secs must be positive, got {}", value))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [defaults]
        max_attempts = 4

        [operations.getInventorySummaries]
        delay = { kind = "linear", step_secs = 2.0 }

        [operations.getOrders]
        rate = 10.0
        timeout_secs = 30.0

        [operations.getShippingLabels]
        rate = 5.0
        delay = { kind = "exponential", base_secs = 1.0, max_secs = 8.0 }
        max_attempts = 6
    "#;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = PolicyConfig::from_toml_str("").unwrap();
        assert_eq!(config.defaults.max_attempts, 3);
        assert!(config.operations.is_empty());
    }

    #[test]
    fn test_parse_sample() {
        let config = PolicyConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(
            config.operation_names(),
            vec!["getInventorySummaries", "getOrders", "getShippingLabels"]
        );
        assert_eq!(
            config.get("getInventorySummaries").unwrap().delay,
            Some(DelaySpec::Linear { step_secs: 2.0 })
        );
        assert_eq!(config.get("getorders").unwrap().rate, Some(10.0));
    }

    #[test]
    fn test_resolve_applies_defaults() {
        let config = PolicyConfig::from_toml_str(SAMPLE).unwrap();

        let inventory = config.resolve("getInventorySummaries");
        let retry = inventory.retry.unwrap();
        assert_eq!(retry.max_attempts(), 4);
        assert_eq!(retry.delay_for(3), Duration::from_secs(6));
        assert!(inventory.rate.is_none());

        let orders = config.resolve("getOrders");
        assert!(orders.retry.is_none());
        assert_eq!(orders.timeout, Some(Duration::from_secs(30)));

        let labels = config.resolve("getShippingLabels");
        assert_eq!(labels.rate, Some(5.0));
        assert_eq!(labels.retry.unwrap().max_attempts(), 6);
    }

    #[test]
    fn test_unknown_operation_resolves_to_plain_call() {
        let config = PolicyConfig::from_toml_str(SAMPLE).unwrap();
        let resolved = config.resolve("createFeed");
        assert!(resolved.rate.is_none());
        assert!(resolved.retry.is_none());
        assert!(resolved.timeout.is_none());
    }

    #[test]
    fn test_huge_durations_saturate() {
        let config = PolicyConfig::from_toml_str(
            r#"
            [operations.getOrders]
            delay = { kind = "constant", secs = 1e300 }
            timeout_secs = 1e300
            "#,
        )
        .unwrap();
        config.validate().unwrap();

        let resolved = config.resolve("getOrders");
        assert_eq!(resolved.timeout, Some(Duration::MAX));
        assert_eq!(resolved.retry.unwrap().delay_for(1), Duration::MAX);
    }

    #[test]
    fn test_invalid_rate_rejected() {
        let err = PolicyConfig::from_toml_str("[operations.x]\nrate = 0.0").unwrap_err();
        assert!(matches!(err, PolicyConfigError::Invalid { ref scope, .. } if scope == "x"));
    }

    #[test]
    fn test_negative_delay_rejected() {
        let source = "[operations.x]\ndelay = { kind = \"constant\", secs = -1.0 }";
        assert!(PolicyConfig::from_toml_str(source).is_err());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        assert!(PolicyConfig::from_toml_str("[defaults]\nmax_attempts = 0").is_err());
        assert!(PolicyConfig::from_toml_str("[operations.x]\nmax_attempts = 0").is_err());
    }

    #[test]
    fn test_unknown_delay_kind_rejected() {
        let source = "[operations.x]\ndelay = { kind = \"fibonacci\" }";
        assert!(matches!(
            PolicyConfig::from_toml_str(source),
            Err(PolicyConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = PolicyConfig::load("/nonexistent/spcall.toml").unwrap_err();
        assert!(matches!(err, PolicyConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policies.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = PolicyConfig::load(&path).unwrap();
        assert_eq!(config.defaults.max_attempts, 4);
        assert_eq!(config.get("getOrders").unwrap().rate, Some(10.0));
    }
}

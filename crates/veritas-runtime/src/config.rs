//! Engine configuration.
//!
//! [`EngineConfig`] is read from YAML. Every section has defaults, so an
//! empty document is a valid config. Durations are humantime strings
//! (`"60s"`, `"5m"`, `"1h 30m"`). `VERITAS_*` environment variables can
//! override a few common settings on top of the defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use veritas_core::ProviderId;

use crate::cache::CacheConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::queue::QueueConfig;
use crate::resilience::{CircuitBreakerConfig, CostConfig, RateLimitConfig, RetryPolicy};

/// Serde helpers for `Duration` as a humantime string.
pub mod duration_str {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        humantime::parse_duration(value.trim()).map_err(D::Error::custom)
    }
}

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// An environment override could not be parsed.
    #[error("invalid value '{value}' for {name}: {reason}")]
    InvalidEnv {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Default limit plus per-provider overrides.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitsConfig {
    pub default: RateLimitConfig,
    pub providers: BTreeMap<ProviderId, RateLimitConfig>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub rate_limits: RateLimitsConfig,
    pub retry: RetryPolicy,
    pub circuit_breaker: CircuitBreakerConfig,
    pub cost: CostConfig,
    pub orchestrator: OrchestratorConfig,
    pub queue: QueueConfig,
}

impl EngineConfig {
    const ENV_CACHE_CAPACITY: &'static str = "VERITAS_CACHE_CAPACITY";
    const ENV_CACHE_TTL: &'static str = "VERITAS_CACHE_TTL";
    const ENV_CALL_TIMEOUT: &'static str = "VERITAS_CALL_TIMEOUT";
    const ENV_BUDGET_LIMIT: &'static str = "VERITAS_BUDGET_LIMIT";
    const ENV_MAX_RETRIES: &'static str = "VERITAS_MAX_RETRIES";

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    /// Defaults with `VERITAS_*` environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Defaults with overrides read through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let read = |name: &'static str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(|v| (name, v))
        };

        if let Some((name, value)) = read(Self::ENV_CACHE_CAPACITY) {
            config.cache.capacity = parse_number(name, &value)?;
        }
        if let Some((name, value)) = read(Self::ENV_CACHE_TTL) {
            config.cache.default_ttl = parse_duration(name, &value)?;
        }
        if let Some((name, value)) = read(Self::ENV_CALL_TIMEOUT) {
            config.orchestrator.call_timeout = parse_duration(name, &value)?;
        }
        if let Some((name, value)) = read(Self::ENV_BUDGET_LIMIT) {
            config.cost.budget.limit = parse_number(name, &value)?;
        }
        if let Some((name, value)) = read(Self::ENV_MAX_RETRIES) {
            config.retry.max_retries = parse_number(name, &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let cache = &self.cache;
        if cache.capacity == 0 {
            return Err(ConfigError::invalid("cache.capacity", "must be greater than 0"));
        }
        if cache.max_capacity < cache.capacity {
            return Err(ConfigError::invalid(
                "cache.max_capacity",
                "must not be below cache.capacity",
            ));
        }
        if cache.default_ttl.is_zero() {
            return Err(ConfigError::invalid("cache.default_ttl", "must be positive"));
        }
        if cache.max_ttl_multiplier.is_nan() || cache.max_ttl_multiplier < 1.0 {
            return Err(ConfigError::invalid(
                "cache.max_ttl_multiplier",
                "must be at least 1",
            ));
        }
        check_fraction("cache.similarity_threshold", cache.similarity_threshold)?;
        check_fraction("cache.target_hit_rate", cache.target_hit_rate)?;

        validate_rate_limit("rate_limits.default", &self.rate_limits.default)?;
        for (provider, limit) in &self.rate_limits.providers {
            validate_rate_limit(&format!("rate_limits.providers.{}", provider), limit)?;
        }

        if self.retry.base_delay > self.retry.max_delay {
            return Err(ConfigError::invalid(
                "retry.base_delay",
                "must not exceed retry.max_delay",
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(ConfigError::invalid("retry.jitter", "must be within [0, 1]"));
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "circuit_breaker.failure_threshold",
                "must be greater than 0",
            ));
        }

        let budget = &self.cost.budget;
        if !budget.limit.is_finite() || budget.limit < 0.0 {
            return Err(ConfigError::invalid("cost.budget.limit", "must be 0 or positive"));
        }
        for threshold in &budget.alert_thresholds {
            check_fraction("cost.budget.alert_thresholds", *threshold)?;
        }
        for (model, pricing) in &self.cost.pricing {
            if pricing.input_per_1k < 0.0 || pricing.output_per_1k < 0.0 {
                return Err(ConfigError::invalid(
                    format!("cost.pricing.{}", model),
                    "rates must not be negative",
                ));
            }
        }

        let orchestrator = &self.orchestrator;
        if orchestrator.call_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "orchestrator.call_timeout",
                "must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&orchestrator.min_similarity) {
            return Err(ConfigError::invalid(
                "orchestrator.min_similarity",
                "must be within [0, 1]",
            ));
        }
        let weights = &orchestrator.weights;
        let all = [weights.factcheck, weights.llm, weights.vector, weights.pattern];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ConfigError::invalid(
                "orchestrator.weights",
                "must be finite and not negative",
            ));
        }
        if all.iter().sum::<f64>() <= 0.0 {
            return Err(ConfigError::invalid(
                "orchestrator.weights",
                "at least one weight must be positive",
            ));
        }

        if self.queue.capacity == 0 {
            return Err(ConfigError::invalid("queue.capacity", "must be greater than 0"));
        }
        if self.queue.max_attempts == 0 {
            return Err(ConfigError::invalid("queue.max_attempts", "must be greater than 0"));
        }

        Ok(())
    }
}

fn validate_rate_limit(field: &str, limit: &RateLimitConfig) -> Result<(), ConfigError> {
    limit
        .validate()
        .map_err(|e| ConfigError::invalid(format!("{}.{}", field, e.field), e.reason))
}

fn check_fraction(field: &str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, "must be within (0, 1]"))
    }
}

fn parse_number<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
        name,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_duration(name: &'static str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value).map_err(|e| ConfigError::InvalidEnv {
        name,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::RateLimitStrategy;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.orchestrator.call_timeout, Duration::from_secs(20));
        assert_eq!(config.cache.capacity, 1000);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(EngineConfig::from_yaml("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_yaml_with_humantime_durations() {
        let yaml = r#"
cache:
  capacity: 250
  default_ttl: 5m
rate_limits:
  default:
    strategy: sliding_window
    max_requests: 30
    window: 1m
  providers:
    llm:
      strategy: token_bucket
      max_tokens: 10
      refill_rate: 0.5
retry:
  max_retries: 2
  base_delay: 250ms
  backoff: linear
circuit_breaker:
  reset_timeout: 90s
cost:
  budget:
    limit: 5.0
    period: daily
  pricing:
    my-model:
      input_per_1k: 0.001
      output_per_1k: 0.002
orchestrator:
  call_timeout: 10s
  approximate_cache: true
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.cache.capacity, 250);
        assert_eq!(config.cache.default_ttl, Duration::from_secs(300));
        assert_eq!(config.rate_limits.default.max_requests, 30);
        let llm = &config.rate_limits.providers[&ProviderId::Llm];
        assert_eq!(llm.strategy, RateLimitStrategy::TokenBucket);
        assert_eq!(llm.max_tokens, 10);
        assert_eq!(config.retry.base_delay, Duration::from_millis(250));
        assert_eq!(config.circuit_breaker.reset_timeout, Duration::from_secs(90));
        assert_eq!(config.cost.budget.limit, 5.0);
        assert!(config.cost.pricing.contains_key("my-model"));
        assert_eq!(config.orchestrator.call_timeout, Duration::from_secs(10));
        assert!(config.orchestrator.approximate_cache);
        // untouched sections keep their defaults
        assert_eq!(config.queue, QueueConfig::default());
    }

    #[test]
    fn test_yaml_round_trip_keeps_values() {
        let mut config = EngineConfig::default();
        config.cache.default_ttl = Duration::from_secs(5400);
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("1h 30m"));
        assert_eq!(EngineConfig::from_yaml(&yaml).unwrap(), config);
    }

    #[test]
    fn test_bad_duration_is_parse_error() {
        let err = EngineConfig::from_yaml("retry:\n  base_delay: soon\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let cases = [
            "cache:\n  capacity: 0\n",
            "rate_limits:\n  default:\n    max_requests: 0\n",
            "orchestrator:\n  weights:\n    factcheck: 0\n    llm: 0\n    vector: 0\n    pattern: 0\n",
            "orchestrator:\n  weights:\n    llm: -1\n",
            "cost:\n  budget:\n    alert_thresholds: [0.5, 1.5]\n",
            "cost:\n  budget:\n    alert_thresholds: [0]\n",
            "queue:\n  capacity: 0\n",
            "rate_limits:\n  default:\n    strategy: token_bucket\n    max_tokens: 0\n",
        ];
        for yaml in cases {
            let err = EngineConfig::from_yaml(yaml).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { .. }), "{yaml}");
        }
    }

    #[test]
    fn test_env_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("VERITAS_CACHE_CAPACITY", "42"),
            ("VERITAS_CACHE_TTL", "10m"),
            ("VERITAS_CALL_TIMEOUT", "3s"),
            ("VERITAS_BUDGET_LIMIT", "12.5"),
            ("VERITAS_MAX_RETRIES", "1"),
        ]))
        .unwrap();

        assert_eq!(config.cache.capacity, 42);
        assert_eq!(config.cache.default_ttl, Duration::from_secs(600));
        assert_eq!(config.orchestrator.call_timeout, Duration::from_secs(3));
        assert_eq!(config.cost.budget.limit, 12.5);
        assert_eq!(config.retry.max_retries, 1);
    }

    #[test]
    fn test_env_blank_values_are_ignored() {
        let config = EngineConfig::from_lookup(lookup(&[("VERITAS_CACHE_CAPACITY", "  ")])).unwrap();
        assert_eq!(config.cache.capacity, 1000);
    }

    #[test]
    fn test_env_invalid_value() {
        let err = EngineConfig::from_lookup(lookup(&[("VERITAS_MAX_RETRIES", "many")])).unwrap_err();
        match err {
            ConfigError::InvalidEnv { name, value, .. } => {
                assert_eq!(name, "VERITAS_MAX_RETRIES");
                assert_eq!(value, "many");
            }
            other => panic!("unexpected error: {other}"),
        }

        let err = EngineConfig::from_lookup(lookup(&[("VERITAS_CACHE_CAPACITY", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cache:\n  capacity: 7").unwrap();
        let config = EngineConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.cache.capacity, 7);

        let err = EngineConfig::from_yaml_file("/nonexistent/veritas.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}

// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::config::consts::{
    DEFAULT_BACKOFF_FACTOR, DEFAULT_BACKOFF_FIRST_MS, DEFAULT_BACKOFF_MAX_MS, DEFAULT_BUS_CAPACITY,
    DEFAULT_HEARTBEAT_TOLERANCE_SECONDS, DEFAULT_MAX_RETRIES, FALLBACK_MAX_CONCURRENCY,
};
use crate::errors::ConfigError;
use crate::runs::{BackoffPolicy, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for a Runwood instance.
///
/// Every section is optional; a missing section takes the defaults from
/// [`consts`](crate::config::consts). It is typically loaded from a YAML file,
/// TOML is accepted when the file extension is `.toml`.
///
/// # Example
/// ```yaml
/// executor:
///   max_concurrency: 4
/// retry:
///   max_retries: 2
///   backoff:
///     first_ms: 100
///     max_ms: 5000
///     factor: 2.0
/// concurrency:
///   storage_path: /var/lib/runwood/concurrency.json
///   limits:
///     foo: 10
/// daemons:
///   heartbeat_tolerance_seconds: 300
///   required: [SCHEDULER, SENSOR]
/// events:
///   bus_capacity: 1024
/// settings:
///   auto_materialize_paused: false
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct InstanceConfig {
    pub executor: ExecutorOptions,
    pub retry: RetryConfig,
    pub concurrency: ConcurrencyConfig,
    pub daemons: DaemonConfig,
    pub events: EventConfig,
    pub settings: SettingsConfig,
}

/// Executor-specific configuration options.
///
/// # Fields
/// * `max_concurrency` - Maximum number of steps of one run executing at once (optional,
///   defaults to the number of CPU cores)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutorOptions {
    pub max_concurrency: Option<usize>,
}

impl ExecutorOptions {
    /// Configured concurrency, or the CPU count, falling back to 4.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(FALLBACK_MAX_CONCURRENCY)
        })
    }
}

/// Retry policy applied to steps that fail with a retryable error.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff: BackoffConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: BackoffConfig::default(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: BackoffPolicy {
                first: Duration::from_millis(self.backoff.first_ms),
                max: Duration::from_millis(self.backoff.max_ms),
                factor: self.backoff.factor,
            },
        }
    }
}

/// Exponential backoff between retry attempts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub first_ms: u64,
    pub max_ms: u64,
    pub factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            first_ms: DEFAULT_BACKOFF_FIRST_MS,
            max_ms: DEFAULT_BACKOFF_MAX_MS,
            factor: DEFAULT_BACKOFF_FACTOR,
        }
    }
}

/// Concurrency ledger configuration.
///
/// # Fields
/// * `storage_path` - JSON file backing the ledger; in-memory when absent
/// * `limits` - limits applied at startup (key -> limit)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub storage_path: Option<PathBuf>,
    pub limits: BTreeMap<String, i64>,
}

/// Daemon health tracking configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub heartbeat_tolerance_seconds: u64,
    pub required: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            heartbeat_tolerance_seconds: DEFAULT_HEARTBEAT_TOLERANCE_SECONDS,
            required: Vec::new(),
        }
    }
}

impl DaemonConfig {
    pub fn heartbeat_tolerance(&self) -> Duration {
        Duration::from_secs(self.heartbeat_tolerance_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventConfig {
    pub bus_capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            bus_capacity: DEFAULT_BUS_CAPACITY,
        }
    }
}

/// Initial values for process-wide instance settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SettingsConfig {
    pub auto_materialize_paused: bool,
}

/// Load a config from a YAML file (or TOML when the extension is `.toml`)
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<InstanceConfig, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);

    let cfg = if is_toml {
        toml::from_str(&content)?
    } else {
        serde_yaml::from_str(&content)?
    };
    Ok(cfg)
}

/// Check the semantic constraints serde cannot express.
pub fn validate_config(cfg: &InstanceConfig) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if cfg.executor.max_concurrency == Some(0) {
        errors.push("executor.max_concurrency must be at least 1".to_string());
    }
    if cfg.events.bus_capacity == 0 {
        errors.push("events.bus_capacity must be at least 1".to_string());
    }
    if !cfg.retry.backoff.factor.is_finite() || cfg.retry.backoff.factor < 1.0 {
        errors.push(format!(
            "retry.backoff.factor must be >= 1.0, got {}",
            cfg.retry.backoff.factor
        ));
    }
    if cfg.retry.backoff.first_ms > cfg.retry.backoff.max_ms {
        errors.push(format!(
            "retry.backoff.first_ms ({}) exceeds retry.backoff.max_ms ({})",
            cfg.retry.backoff.first_ms, cfg.retry.backoff.max_ms
        ));
    }
    for (key, limit) in &cfg.concurrency.limits {
        if *limit < 0 {
            errors.push(format!(
                "concurrency.limits.{} must be >= 0, got {}",
                key, limit
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Load and validate a config file
pub fn load_and_validate_config<P: AsRef<Path>>(path: P) -> Result<InstanceConfig, ConfigError> {
    let cfg = load_config(path)?;
    validate_config(&cfg).map_err(ConfigError::Invalid)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_config() {
        let yaml = r#"
executor:
  max_concurrency: 3
retry:
  max_retries: 2
  backoff:
    first_ms: 10
    max_ms: 100
    factor: 3.0
concurrency:
  limits:
    foo: 10
    bar: 1
daemons:
  heartbeat_tolerance_seconds: 60
  required: [SCHEDULER, SENSOR]
settings:
  auto_materialize_paused: true
"#;

        let cfg: InstanceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.executor.max_concurrency(), 3);
        assert_eq!(cfg.retry.max_retries, 2);
        assert_eq!(cfg.concurrency.limits.get("foo"), Some(&10));
        assert_eq!(cfg.daemons.required, vec!["SCHEDULER", "SENSOR"]);
        assert_eq!(cfg.daemons.heartbeat_tolerance(), Duration::from_secs(60));
        assert_eq!(cfg.events.bus_capacity, DEFAULT_BUS_CAPACITY);
        assert!(cfg.settings.auto_materialize_paused);

        let policy = cfg.retry.policy();
        assert_eq!(policy.backoff.first, Duration::from_millis(10));
        assert_eq!(policy.backoff.delay_for(1), Duration::from_millis(30));
    }

    #[test]
    fn empty_document_uses_defaults() {
        let cfg: InstanceConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg.retry.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(cfg.daemons.heartbeat_tolerance_seconds, DEFAULT_HEARTBEAT_TOLERANCE_SECONDS);
        assert!(cfg.concurrency.storage_path.is_none());
        assert!(validate_config(&cfg).is_ok());
    }

    #[test]
    fn validation_collects_every_problem() {
        let mut cfg = InstanceConfig::default();
        cfg.executor.max_concurrency = Some(0);
        cfg.events.bus_capacity = 0;
        cfg.retry.backoff.factor = 0.5;
        cfg.concurrency.limits.insert("foo".into(), -1);

        let errors = validate_config(&cfg).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors[3].contains("concurrency.limits.foo"));
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pipeline settings file parser
//!
//! Settings are a YAML document in which every field is optional; missing
//! fields keep their defaults. Durations are given in seconds and may be
//! fractional.
//!
//! ```yaml
//! endpoint: http://otel-collector:4317
//! queue_capacity: 5000
//! circuit_breaker:
//!   failure_threshold: 5
//!   recovery_timeout_secs: 60
//! retry:
//!   initial_delay_secs: 0.5
//!   jitter: true
//! buffer:
//!   capacity: 2000
//!   max_age_secs: 300
//! health:
//!   check_interval_secs: 15
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::PipelineConfig;
use crate::error::{PipelineError, Result};

/// Path to the settings file.
pub const ENV_CONFIG_PATH: &str = "TELEMETRY_PIPELINE_CONFIG";
/// Collector endpoint override.
pub const ENV_ENDPOINT: &str = "TELEMETRY_PIPELINE_ENDPOINT";
/// Inbound queue capacity override.
pub const ENV_QUEUE_CAPACITY: &str = "TELEMETRY_PIPELINE_QUEUE_CAPACITY";
/// Retry buffer capacity override.
pub const ENV_BUFFER_CAPACITY: &str = "TELEMETRY_PIPELINE_BUFFER_CAPACITY";
/// Health probe interval override, in seconds.
pub const ENV_CHECK_INTERVAL_SECS: &str = "TELEMETRY_PIPELINE_CHECK_INTERVAL_SECS";

/// The settings file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_capacity: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconcile_interval_secs: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_timeout_secs: Option<f64>,

    /// Prefix for exposed metric names
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_namespace: Option<String>,

    pub circuit_breaker: BreakerSettings,
    pub retry: RetrySettings,
    pub buffer: BufferSettings,
    pub health: HealthSettings,
}

/// Circuit breaker section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BreakerSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_timeout_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_timeout_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub half_open_max_requests: Option<u32>,
}

/// Retry section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_delay_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_delay_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_multiplier: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter: Option<bool>,
}

/// Retry buffer section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BufferSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

/// Health probe section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HealthSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_interval_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe_timeout_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_failures: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_threshold: Option<u32>,
}

fn secs(field: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|e| {
        PipelineError::Config(format!(
            "{field} must be a non-negative number of seconds: {e}"
        ))
    })
}

fn set_secs(target: &mut Duration, field: &str, value: Option<f64>) -> Result<()> {
    if let Some(value) = value {
        *target = secs(field, value)?;
    }
    Ok(())
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

impl PipelineSettings {
    /// Load settings from the default location
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The config directory cannot be determined
    /// - The settings file cannot be read
    /// - The settings file is malformed
    pub fn load_default() -> Result<Self> {
        let path = Self::default_path()?;
        Self::load_from_path(&path)
    }

    /// Load settings from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is malformed YAML
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read settings file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse settings from a YAML string
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed or names unknown fields
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| PipelineError::Config(format!("Failed to parse settings YAML: {e}")))
    }

    /// Get the default settings path (`<config dir>/telemetry-pipeline/config.yaml`)
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be determined
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().ok_or_else(|| {
            PipelineError::Config("Could not determine config directory".to_string())
        })?;

        Ok(dir.join("telemetry-pipeline").join("config.yaml"))
    }

    /// Get the path to the settings file, respecting `TELEMETRY_PIPELINE_CONFIG`
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be determined when the
    /// variable is not set
    pub fn config_path() -> Result<PathBuf> {
        if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
            Ok(PathBuf::from(env_path))
        } else {
            Self::default_path()
        }
    }

    /// Load settings from [`config_path`](Self::config_path) if the file
    /// exists, then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be parsed or an override
    /// has an invalid value
    pub fn load_with_env() -> Result<Self> {
        let path = Self::config_path()?;
        let settings = if path.exists() {
            Self::load_from_path(&path)?
        } else {
            Self::default()
        };
        settings.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides looked up by environment variable name.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric override cannot be parsed
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
        where
            T::Err: std::fmt::Display,
        {
            value
                .trim()
                .parse()
                .map_err(|e| PipelineError::Config(format!("Invalid value for {key}: {e}")))
        }

        if let Some(endpoint) = lookup(ENV_ENDPOINT) {
            self.endpoint = Some(endpoint);
        }
        if let Some(value) = lookup(ENV_QUEUE_CAPACITY) {
            self.queue_capacity = Some(parse(ENV_QUEUE_CAPACITY, &value)?);
        }
        if let Some(value) = lookup(ENV_BUFFER_CAPACITY) {
            self.buffer.capacity = Some(parse(ENV_BUFFER_CAPACITY, &value)?);
        }
        if let Some(value) = lookup(ENV_CHECK_INTERVAL_SECS) {
            self.health.check_interval_secs = Some(parse(ENV_CHECK_INTERVAL_SECS, &value)?);
        }
        Ok(self)
    }

    /// Convert into a validated [`PipelineConfig`].
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Config` for negative or non-finite durations
    /// and for values rejected by [`PipelineConfig::validate`]
    pub fn into_config(self) -> Result<PipelineConfig> {
        let mut config = PipelineConfig::default();

        set(&mut config.endpoint, self.endpoint);
        set(&mut config.queue_capacity, self.queue_capacity);
        set_secs(
            &mut config.reconcile_interval,
            "reconcile_interval_secs",
            self.reconcile_interval_secs,
        )?;
        set_secs(
            &mut config.attempt_timeout,
            "attempt_timeout_secs",
            self.attempt_timeout_secs,
        )?;
        set(&mut config.metrics.namespace, self.metrics_namespace);

        let breaker = &mut config.circuit_breaker;
        set(&mut breaker.failure_threshold, self.circuit_breaker.failure_threshold);
        set(&mut breaker.success_threshold, self.circuit_breaker.success_threshold);
        set_secs(
            &mut breaker.recovery_timeout,
            "circuit_breaker.recovery_timeout_secs",
            self.circuit_breaker.recovery_timeout_secs,
        )?;
        set_secs(
            &mut breaker.call_timeout,
            "circuit_breaker.call_timeout_secs",
            self.circuit_breaker.call_timeout_secs,
        )?;
        if let Some(max) = self.circuit_breaker.half_open_max_requests {
            breaker.half_open_max_requests = Some(max);
        }

        let retry = &mut config.retry;
        set(&mut retry.max_retries, self.retry.max_retries);
        set_secs(
            &mut retry.initial_delay,
            "retry.initial_delay_secs",
            self.retry.initial_delay_secs,
        )?;
        set_secs(&mut retry.max_delay, "retry.max_delay_secs", self.retry.max_delay_secs)?;
        set(&mut retry.backoff_multiplier, self.retry.backoff_multiplier);
        set(&mut retry.jitter, self.retry.jitter);

        let buffer = &mut config.buffer;
        set(&mut buffer.capacity, self.buffer.capacity);
        set_secs(&mut buffer.max_age, "buffer.max_age_secs", self.buffer.max_age_secs)?;
        set(&mut buffer.max_retries, self.buffer.max_retries);

        let health = &mut config.health;
        set_secs(
            &mut health.check_interval,
            "health.check_interval_secs",
            self.health.check_interval_secs,
        )?;
        set_secs(
            &mut health.probe_timeout,
            "health.probe_timeout_secs",
            self.health.probe_timeout_secs,
        )?;
        set(&mut health.max_failures, self.health.max_failures);
        set(&mut health.recovery_threshold, self.health.recovery_threshold);

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const SAMPLE_SETTINGS: &str = r#"
endpoint: http://otel-collector:4317
queue_capacity: 5000
reconcile_interval_secs: 15
metrics_namespace: edge
circuit_breaker:
  failure_threshold: 3
  recovery_timeout_secs: 20.5
  half_open_max_requests: 1
retry:
  max_retries: 5
  initial_delay_secs: 0.25
  jitter: false
buffer:
  capacity: 200
  max_age_secs: 120
health:
  check_interval_secs: 10
  recovery_threshold: 4
"#;

    #[test]
    fn test_parse_settings() {
        let settings = PipelineSettings::from_yaml(SAMPLE_SETTINGS).unwrap();

        assert_eq!(
            settings.endpoint.as_deref(),
            Some("http://otel-collector:4317")
        );
        assert_eq!(settings.queue_capacity, Some(5000));
        assert_eq!(settings.circuit_breaker.failure_threshold, Some(3));
        assert_eq!(settings.retry.jitter, Some(false));
        assert_eq!(settings.buffer.capacity, Some(200));
        assert!(settings.health.max_failures.is_none());
    }

    #[test]
    fn test_into_config_applies_fields_over_defaults() {
        let config = PipelineSettings::from_yaml(SAMPLE_SETTINGS)
            .unwrap()
            .into_config()
            .unwrap();

        assert_eq!(config.endpoint, "http://otel-collector:4317");
        assert_eq!(config.queue_capacity, 5000);
        assert_eq!(config.reconcile_interval, Duration::from_secs(15));
        assert_eq!(config.attempt_timeout, Duration::from_secs(30));
        assert_eq!(config.metrics.namespace, "edge");
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.success_threshold, 3);
        assert_eq!(
            config.circuit_breaker.recovery_timeout,
            Duration::from_millis(20_500)
        );
        assert_eq!(config.circuit_breaker.half_open_max_requests, Some(1));
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(250));
        assert!(!config.retry.jitter);
        assert_eq!(config.buffer.capacity, 200);
        assert_eq!(config.buffer.max_age, Duration::from_secs(120));
        assert_eq!(config.buffer.max_retries, 3);
        assert_eq!(config.health.check_interval, Duration::from_secs(10));
        assert_eq!(config.health.recovery_threshold, 4);
    }

    #[test]
    fn test_empty_settings_yield_defaults() {
        let config = PipelineSettings::from_yaml("{}")
            .unwrap()
            .into_config()
            .unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_negative_duration_rejected() {
        let settings = PipelineSettings::from_yaml("retry:\n  initial_delay_secs: -1\n").unwrap();
        let err = settings.into_config().unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Config(ref msg) if msg.contains("initial_delay_secs")
        ));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let settings =
            PipelineSettings::from_yaml("circuit_breaker:\n  failure_threshold: 0\n").unwrap();
        assert!(matches!(
            settings.into_config(),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(PipelineSettings::from_yaml("queue_capcity: 10\n").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_ENDPOINT, "http://override:4318"),
            (ENV_QUEUE_CAPACITY, "64"),
            (ENV_BUFFER_CAPACITY, " 32 "),
            (ENV_CHECK_INTERVAL_SECS, "2.5"),
        ]
        .into_iter()
        .collect();

        let config = PipelineSettings::from_yaml(SAMPLE_SETTINGS)
            .unwrap()
            .with_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap()
            .into_config()
            .unwrap();

        assert_eq!(config.endpoint, "http://override:4318");
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.buffer.capacity, 32);
        assert_eq!(config.health.check_interval, Duration::from_millis(2500));
    }

    #[test]
    fn test_invalid_env_override() {
        let result = PipelineSettings::default().with_overrides(|key| {
            (key == ENV_QUEUE_CAPACITY).then(|| "lots".to_string())
        });
        assert!(matches!(
            result,
            Err(PipelineError::Config(ref msg)) if msg.contains(ENV_QUEUE_CAPACITY)
        ));
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE_SETTINGS.as_bytes()).unwrap();

        let settings = PipelineSettings::load_from_path(file.path()).unwrap();
        assert_eq!(settings.queue_capacity, Some(5000));

        let missing = file.path().with_extension("missing");
        assert!(matches!(
            PipelineSettings::load_from_path(&missing),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_default_path_layout() {
        if let Ok(path) = PipelineSettings::default_path() {
            assert!(path.ends_with("telemetry-pipeline/config.yaml"));
        }
    }
}

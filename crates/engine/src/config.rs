//! Engine configuration: cache policy, usage reporting cadence, log level.
//!
//! Values come from an optional JSON file overlaid with environment variables.
//! Environment variables carry the `FPE_` prefix and nest with a double
//! underscore, for example `FPE_EVENT_REPORTING__MINIMUM_COUNT=20` or
//! `FPE_CACHE__TTL_SECS=60`. Every field has a default, so an absent file and
//! an empty environment are valid.

use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cache::CachePolicy;

/// Validated engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub event_reporting: EventReportingConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    /// Tracing filter directive (e.g. `"info"`, `"fpe_engine=debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// When the background reporter flushes aggregated usage.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EventReportingConfig {
    /// How often (seconds) the reporter wakes to check its thresholds.
    #[serde(default = "default_wake_interval")]
    pub wake_interval_secs: u64,

    /// Flush as soon as this many distinct records are pending.
    #[serde(default = "default_minimum_count")]
    pub minimum_count: usize,

    /// Flush at least this often (seconds), however few records are pending.
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,
}

/// Expiry and fetch bounds shared by the dataset and cipher-context caches.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CacheConfig {
    /// Entry lifetime in seconds. `null` keeps entries until cleared; `0`
    /// disables caching.
    #[serde(default = "default_ttl")]
    pub ttl_secs: Option<u64>,

    /// Upper bound (milliseconds) on one upstream fetch; `0` waits forever.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_ms: u64,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_wake_interval() -> u64 {
    1
}
fn default_minimum_count() -> usize {
    5
}
fn default_flush_interval() -> u64 {
    10
}
fn default_ttl() -> Option<u64> {
    Some(1800)
}
fn default_fetch_timeout() -> u64 {
    3750
}

impl Default for EventReportingConfig {
    fn default() -> Self {
        Self {
            wake_interval_secs: default_wake_interval(),
            minimum_count: default_minimum_count(),
            flush_interval_secs: default_flush_interval(),
        }
    }
}

impl EventReportingConfig {
    pub fn wake_interval(&self) -> Duration {
        Duration::from_secs(self.wake_interval_secs)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl(),
            fetch_timeout_ms: default_fetch_timeout(),
        }
    }
}

impl CacheConfig {
    /// The [`CachePolicy`] these settings describe.
    pub fn policy(&self) -> CachePolicy {
        CachePolicy {
            ttl: self.ttl_secs.map(Duration::from_secs),
            fetch_timeout: (self.fetch_timeout_ms > 0)
                .then(|| Duration::from_millis(self.fetch_timeout_ms)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            event_reporting: EventReportingConfig::default(),
            cache: CacheConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from `file` (JSON, optional) and the environment,
    /// the environment taking precedence.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is malformed, a value cannot be parsed,
    /// or validation fails.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Json)
                    .required(false),
            );
        }
        let cfg = builder
            .add_source(
                config::Environment::with_prefix("FPE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to build configuration")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    pub fn validate(&self) -> Result<()> {
        if self.log_level.trim().is_empty() {
            anyhow::bail!("FPE_LOG_LEVEL must not be empty");
        }
        if self.event_reporting.wake_interval_secs == 0 {
            anyhow::bail!("FPE_EVENT_REPORTING__WAKE_INTERVAL_SECS must be > 0");
        }
        if self.event_reporting.flush_interval_secs == 0 {
            anyhow::bail!("FPE_EVENT_REPORTING__FLUSH_INTERVAL_SECS must be > 0");
        }
        if self.event_reporting.minimum_count == 0 {
            anyhow::bail!("FPE_EVENT_REPORTING__MINIMUM_COUNT must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_correct() {
        let c = Config::default();
        assert_eq!(c.log_level, "info");
        assert_eq!(c.event_reporting.wake_interval(), Duration::from_secs(1));
        assert_eq!(c.event_reporting.minimum_count, 5);
        assert_eq!(c.event_reporting.flush_interval(), Duration::from_secs(10));
        assert_eq!(
            c.cache.policy(),
            CachePolicy {
                ttl: Some(Duration::from_secs(1800)),
                fetch_timeout: Some(Duration::from_millis(3750)),
            }
        );
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let c: Config = serde_json::from_str(
            r#"{"event_reporting": {"minimum_count": 50}, "cache": {"ttl_secs": null}}"#,
        )
        .unwrap();
        assert_eq!(c.event_reporting.minimum_count, 50);
        assert_eq!(c.event_reporting.flush_interval_secs, 10);
        assert_eq!(c.cache.ttl_secs, None);
        assert_eq!(c.cache.fetch_timeout_ms, 3750);
        assert_eq!(c.cache.policy().ttl, None);
    }

    #[test]
    fn zero_timeout_means_unbounded() {
        let cache = CacheConfig {
            ttl_secs: Some(0),
            fetch_timeout_ms: 0,
        };
        let policy = cache.policy();
        assert_eq!(policy.ttl, Some(Duration::ZERO));
        assert_eq!(policy.fetch_timeout, None);
    }

    #[test]
    fn validate_rejects_zero_intervals() {
        let mut c = Config::default();
        c.event_reporting.wake_interval_secs = 0;
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.event_reporting.minimum_count = 0;
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.log_level = " ".into();
        assert!(c.validate().is_err());
    }

    #[test]
    fn loads_json_file() {
        let path = std::env::temp_dir().join(format!("fpe-engine-config-{}.json", std::process::id()));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(br#"{"log_level": "debug", "event_reporting": {"flush_interval_secs": 30}}"#)
            .unwrap();
        drop(f);

        let c = Config::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(c.event_reporting.flush_interval_secs, 30);
        assert_eq!(c.event_reporting.minimum_count, 5);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let c = Config::load(Some(Path::new("/nonexistent/fpe-engine.json"))).unwrap();
        assert_eq!(c.cache.fetch_timeout_ms, 3750);
    }
}

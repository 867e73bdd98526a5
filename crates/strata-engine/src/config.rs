//! Engine configuration.
//!
//! Supports YAML/TOML configuration files, `STRATA__`-prefixed environment
//! variable overrides, reasonable defaults, and validation.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::TierConfig;
use strata_core::{CoreError, CoreResult};

/// Bounded retry behavior for backend adapter calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts per operation, including the first.
    pub max_attempts: u32,
    /// Base backoff between attempts in milliseconds.
    pub base_backoff_ms: u64,
    /// Backoff ceiling in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 100,
            max_backoff_ms: 5000,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff for the given zero-based attempt, clamped to the
    /// ceiling.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(16);
        let millis = self
            .base_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }

    /// Validate field ranges.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidPolicy` when `max_attempts` is zero.
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_attempts == 0 {
            return Err(CoreError::invalid_policy("retry max_attempts must be >= 1"));
        }
        Ok(())
    }
}

/// Root configuration for the policy engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Cache tier hierarchy, fastest and smallest first.
    pub tiers: Vec<TierConfig>,

    /// Retry behavior for replication copies.
    pub retry: RetryPolicy,

    /// Time bound for a single backend adapter call, in milliseconds.
    pub adapter_timeout_ms: u64,

    /// Background maintenance interval in seconds.
    pub maintenance_interval_secs: u64,

    /// Where policy documents and the violation log persist; `None` keeps
    /// state in memory only.
    pub state_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tiers: vec![
                TierConfig::new("fast", 256 * 1024 * 1024)
                    .with_promote_threshold(3)
                    .with_demote_after(Duration::from_secs(6 * 3600)),
                TierConfig::new("warm", 4 * 1024 * 1024 * 1024)
                    .with_promote_threshold(3)
                    .with_demote_after(Duration::from_secs(7 * 24 * 3600)),
                TierConfig::new("cold", 64 * 1024 * 1024 * 1024),
            ],
            retry: RetryPolicy::default(),
            adapter_timeout_ms: 30_000,
            maintenance_interval_secs: 300,
            state_path: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest priority), e.g.
    ///    `STRATA__ADAPTER_TIMEOUT_MS=5000`
    /// 2. Config file specified by the `STRATA_CONFIG` env var
    /// 3. `./config/strata.yaml`
    /// 4. `/etc/strata/strata.yaml`
    /// 5. Hardcoded defaults (lowest priority)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` on unreadable sources or failed validation.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Ok(config_path) = std::env::var("STRATA_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }

        builder = builder
            .add_source(File::with_name("./config/strata").required(false))
            .add_source(File::with_name("/etc/strata/strata").required(false))
            .add_source(
                Environment::with_prefix("STRATA")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: EngineConfig = builder.build()?.try_deserialize()?;

        config
            .validate()
            .map_err(|err| ConfigError::Message(err.to_string()))?;

        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidPolicy` on any out-of-range value.
    pub fn validate(&self) -> CoreResult<()> {
        crate::cache::validate_hierarchy(&self.tiers)?;
        self.retry.validate()?;
        if self.adapter_timeout_ms == 0 {
            return Err(CoreError::invalid_policy("adapter_timeout_ms must be >= 1"));
        }
        if self.maintenance_interval_secs < 60 {
            return Err(CoreError::invalid_policy(
                "maintenance_interval_secs must be >= 60",
            ));
        }
        Ok(())
    }

    /// Adapter call time bound as a `Duration`.
    #[must_use]
    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_millis(self.adapter_timeout_ms)
    }

    /// Maintenance interval as a `Duration`.
    #[must_use]
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    /// Replaces the tier hierarchy.
    #[must_use]
    pub fn with_tiers(mut self, tiers: Vec<TierConfig>) -> Self {
        self.tiers = tiers;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the adapter call time bound.
    #[must_use]
    pub fn with_adapter_timeout(mut self, timeout: Duration) -> Self {
        self.adapter_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the persisted-state path.
    #[must_use]
    pub fn with_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = Some(path.into());
        self
    }
}

//! Reconciler configuration
//!
//! [`ReconcilerConfig`] follows the builder style: start from
//! `ReconcilerConfig::new()` and override with `with_*` methods, or load it
//! from YAML/JSON.

use crate::error::ConfigError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry budget and backoff for change-token conflicts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum acquire-and-call cycles, including the first
    pub max_attempts: u32,
    /// Delay after the first failed attempt, in milliseconds
    pub base_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds
    pub max_delay_ms: u64,
    /// Growth factor per attempt
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.0 - 1.0)
    pub jitter: f64,
}

impl RetryPolicy {
    /// Policy with `max_attempts` and no delay between attempts
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Delay after failed attempt `attempt` (1-based), before jitter
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss)]
        let millis = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        #[allow(clippy::cast_precision_loss)]
        let capped = millis.min(self.max_delay_ms as f64).max(0.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(capped.round() as u64)
    }

    /// Delay after failed attempt `attempt`, with jitter applied
    ///
    /// The result stays within `[0, max_delay_ms]`.
    #[must_use]
    pub fn jittered_delay<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.delay_for_attempt(attempt);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let factor = 1.0 + rng.random_range(-self.jitter..=self.jitter);
        base.mul_f64(factor.max(0.0))
            .min(Duration::from_millis(self.max_delay_ms))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(ConfigError::Invalid("retry.multiplier must be >= 1.0".into()));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::Invalid("retry.jitter must be within 0.0..=1.0".into()));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay_ms: 200,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

/// How operations are grouped into remote calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "style", rename_all = "snake_case")]
pub enum BatchStyle {
    /// One call carrying a mixed list of adds and removes
    Mixed {
        /// Split into calls of at most this many operations
        #[serde(default)]
        max_batch_size: Option<usize>,
    },
    /// One call per operation
    PerOperation,
}

impl BatchStyle {
    /// Operations per remote call when applying `len` operations
    #[must_use]
    pub fn batch_size(&self, len: usize) -> usize {
        match self {
            Self::Mixed { max_batch_size } => max_batch_size.unwrap_or(len).max(1),
            Self::PerOperation => 1,
        }
    }
}

impl Default for BatchStyle {
    fn default() -> Self {
        Self::Mixed {
            max_batch_size: None,
        }
    }
}

/// Relative order of removes and adds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOrder {
    /// Removes, then adds
    #[default]
    RemovesFirst,
    /// Adds, then removes
    AddsFirst,
}

/// Behaviour when the desired state is explicit but nothing changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyBatchPolicy {
    /// Issue no remote call
    #[default]
    Skip,
    /// Issue one call with an empty operation list
    Send,
}

/// Reconciler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Conflict retry policy
    pub retry: RetryPolicy,
    /// Batching contract of the remote API
    pub batch: BatchStyle,
    /// Order of removes relative to adds
    pub order: ApplyOrder,
    /// Explicit-empty handling
    pub empty_batch: EmptyBatchPolicy,
    /// Read back canonical state after applying
    pub verify_convergence: bool,
    /// Overall deadline per reconciliation, in seconds
    pub timeout_secs: Option<u64>,
}

impl ReconcilerConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With retry policy
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// With batch style
    #[inline]
    #[must_use]
    pub fn with_batch_style(mut self, batch: BatchStyle) -> Self {
        self.batch = batch;
        self
    }

    /// With apply order
    #[inline]
    #[must_use]
    pub fn with_order(mut self, order: ApplyOrder) -> Self {
        self.order = order;
        self
    }

    /// With empty batch policy
    #[inline]
    #[must_use]
    pub fn with_empty_batch(mut self, policy: EmptyBatchPolicy) -> Self {
        self.empty_batch = policy;
        self
    }

    /// With post-mutation verification on or off
    #[inline]
    #[must_use]
    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify_convergence = verify;
        self
    }

    /// With overall deadline (`None` disables it)
    #[inline]
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Deadline as a duration
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Check semantic constraints
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] describing the first bad value
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;
        if let BatchStyle::Mixed {
            max_batch_size: Some(0),
        } = self.batch
        {
            return Err(ConfigError::Invalid("batch.max_batch_size must be at least 1".into()));
        }
        if self.timeout_secs == Some(0) {
            return Err(ConfigError::Invalid("timeout_secs must be at least 1".into()));
        }
        Ok(())
    }

    /// Parse and validate YAML
    ///
    /// # Errors
    /// Returns parse or validation error
    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate JSON
    ///
    /// # Errors
    /// Returns parse or validation error
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            batch: BatchStyle::default(),
            order: ApplyOrder::default(),
            empty_batch: EmptyBatchPolicy::default(),
            verify_convergence: true,
            timeout_secs: Some(30 * 60),
        }
    }
}

//! Resilience configuration.
//!
//! Defines circuit breaker thresholds and the retry/backoff policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ResilienceError, ResilienceResult};

/// Resilience configuration for one adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Circuit breaker configuration.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry policy applied to every operation.
    pub retry: RetryPolicy,
}

impl ResilienceConfig {
    pub fn validate(&self) -> ResilienceResult<()> {
        self.circuit_breaker.validate()?;
        self.retry.validate()
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Seconds an open circuit waits before letting a probe through.
    pub recovery_timeout_secs: u64,

    /// Consecutive half-open successes needed to close the circuit.
    pub half_open_success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60,
            half_open_success_threshold: 3,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }

    pub fn validate(&self) -> ResilienceResult<()> {
        if self.failure_threshold == 0 {
            return Err(ResilienceError::Configuration(
                "circuit_breaker.failure_threshold must be positive".into(),
            ));
        }
        if self.recovery_timeout_secs == 0 {
            return Err(ResilienceError::Configuration(
                "circuit_breaker.recovery_timeout_secs must be positive".into(),
            ));
        }
        if self.half_open_success_threshold == 0 {
            return Err(ResilienceError::Configuration(
                "circuit_breaker.half_open_success_threshold must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt; zero means a single attempt.
    pub max_retries: u32,

    /// Delay before the first retry.
    pub initial_backoff_ms: u64,

    /// Growth factor applied to the delay on each further retry.
    pub backoff_multiplier: f64,

    /// Upper bound on any single delay.
    pub max_backoff_ms: u64,

    /// Add up to 10% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            backoff_multiplier: 2.0,
            max_backoff_ms: 30_000,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Total number of attempts the policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based), without jitter.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_ms = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = delay_ms.min(self.max_backoff_ms as f64);
        Duration::from_millis(capped as u64)
    }

    pub fn validate(&self) -> ResilienceResult<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ResilienceError::Configuration(
                "retry.backoff_multiplier must be at least 1".into(),
            ));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ResilienceError::Configuration(
                "retry.max_backoff_ms must not be below retry.initial_backoff_ms".into(),
            ));
        }
        Ok(())
    }
}

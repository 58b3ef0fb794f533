//! # Conduit Resilience
//!
//! Fault isolation for calls to third-party services.
//!
//! - [`CircuitBreaker`]: per-adapter state machine that stops sending
//!   requests to an upstream after repeated failures and probes it again
//!   once a recovery timeout has passed.
//! - [`RetryExecutor`]: runs a fallible async operation with bounded,
//!   exponentially backed-off retries, consulting the breaker before every
//!   attempt.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use conduit_resilience::{CircuitBreaker, OperationError, ResilienceConfig, RetryExecutor};
//! use conduit_types::SystemClock;
//!
//! # async fn example() {
//! let config = ResilienceConfig::default();
//! let breaker = Arc::new(CircuitBreaker::new(
//!     "gmail",
//!     config.circuit_breaker.clone(),
//!     Arc::new(SystemClock),
//! ));
//! let executor = RetryExecutor::new(breaker, config.retry.clone());
//!
//! let result = executor
//!     .execute(|_attempt| async { Ok::<_, OperationError>("ok") }, |_report| {})
//!     .await;
//! assert!(result.is_ok());
//! # }
//! ```

#![deny(unsafe_code)]

pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod retry;

pub use circuit_breaker::{AttemptPermit, CircuitBreaker, CircuitBreakerStats, CircuitState};
pub use config::{CircuitBreakerConfig, ResilienceConfig, RetryPolicy};
pub use error::{
    ExecutionError, OperationError, OperationErrorKind, ResilienceError, ResilienceResult,
};
pub use retry::{AttemptOutcome, AttemptReport, RetryExecutor};

//! Error types for conduit-resilience.

use conduit_types::ErrorKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::circuit_breaker::CircuitState;

/// Class of a failed upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "status", rename_all = "snake_case")]
pub enum OperationErrorKind {
    /// Connection refused, reset, DNS failure, ...
    Network,

    /// Upstream answered with a non-2xx status.
    Status(u16),

    /// Upstream did not answer in time.
    Timeout,

    Other,
}

/// Failure of the wrapped upstream operation itself.
///
/// Always treated as transient: it is retried and counts against the
/// circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct OperationError {
    pub kind: OperationErrorKind,
    pub message: String,
}

impl OperationError {
    pub fn new(kind: OperationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(OperationErrorKind::Network, message)
    }

    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self::new(OperationErrorKind::Status(code), message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(OperationErrorKind::Timeout, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(OperationErrorKind::Other, message)
    }
}

/// Why a call through the [`RetryExecutor`](crate::RetryExecutor) failed.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    /// The breaker refused an attempt.
    #[error("circuit for {service} is {state} after {attempts} attempt(s)")]
    CircuitOpen {
        service: String,
        state: CircuitState,
        attempts: u32,
    },

    /// Every permitted attempt failed.
    #[error("gave up after {attempts} attempt(s): {last}")]
    MaxRetriesExceeded {
        attempts: u32,
        #[source]
        last: OperationError,
    },

    /// The caller's deadline passed before the call completed.
    #[error("deadline exceeded after {attempts} attempt(s)")]
    DeadlineExceeded { attempts: u32 },
}

impl ExecutionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutionError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            ExecutionError::MaxRetriesExceeded { .. } => ErrorKind::MaxRetriesExceeded,
            ExecutionError::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
        }
    }

    /// Attempts that actually invoked the operation.
    pub fn attempts(&self) -> u32 {
        match self {
            ExecutionError::CircuitOpen { attempts, .. }
            | ExecutionError::MaxRetriesExceeded { attempts, .. }
            | ExecutionError::DeadlineExceeded { attempts } => *attempts,
        }
    }
}

/// Errors raised while setting up resilience components.
#[derive(Debug, Error)]
pub enum ResilienceError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Result type for resilience setup.
pub type ResilienceResult<T> = Result<T, ResilienceError>;

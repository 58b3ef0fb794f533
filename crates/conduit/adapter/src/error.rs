//! Error types for conduit-adapter.
//!
//! Every failure of [`ServiceAdapter::invoke`](crate::ServiceAdapter::invoke)
//! is a distinct variant so callers can choose between re-authenticating,
//! backing off and giving up.

use conduit_resilience::{CircuitState, ExecutionError, OperationError};
use conduit_telemetry::TelemetryError;
use conduit_types::{AuthorizationFailure, ErrorKind, PrincipalId};
use thiserror::Error;

/// Errors returned by an adapter call.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// Token invalid, expired, for another service or missing a scope.
    #[error("authorization failed for {service}: {failure}")]
    Authorization {
        service: String,
        failure: AuthorizationFailure,
    },

    /// Policy gate denied the action.
    #[error("consent denied for {principal} to {action}")]
    ConsentDenied {
        principal: PrincipalId,
        action: String,
        reason: Option<String>,
    },

    /// Circuit breaker refused the call.
    #[error("circuit for {service} is {state}")]
    CircuitOpen {
        service: String,
        state: CircuitState,
        attempts: u32,
    },

    /// Every retry failed.
    #[error("{service} failed after {attempts} attempt(s): {last}")]
    MaxRetriesExceeded {
        service: String,
        attempts: u32,
        #[source]
        last: OperationError,
    },

    /// Caller's deadline passed before the call completed.
    #[error("deadline exceeded calling {service} after {attempts} attempt(s)")]
    DeadlineExceeded { service: String, attempts: u32 },
}

impl AdapterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AdapterError::Authorization { .. } => ErrorKind::Authorization,
            AdapterError::ConsentDenied { .. } => ErrorKind::ConsentDenied,
            AdapterError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            AdapterError::MaxRetriesExceeded { .. } => ErrorKind::MaxRetriesExceeded,
            AdapterError::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
        }
    }

    /// The caller needs a new token or credential before retrying.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(self, AdapterError::Authorization { .. })
    }

    /// A later call may succeed without any change on the caller's side.
    pub fn is_retryable_later(&self) -> bool {
        matches!(
            self,
            AdapterError::CircuitOpen { .. }
                | AdapterError::MaxRetriesExceeded { .. }
                | AdapterError::DeadlineExceeded { .. }
        )
    }

    pub(crate) fn from_execution(service: &str, error: ExecutionError) -> Self {
        match error {
            ExecutionError::CircuitOpen {
                state, attempts, ..
            } => AdapterError::CircuitOpen {
                service: service.to_string(),
                state,
                attempts,
            },
            ExecutionError::MaxRetriesExceeded { attempts, last } => {
                AdapterError::MaxRetriesExceeded {
                    service: service.to_string(),
                    attempts,
                    last,
                }
            }
            ExecutionError::DeadlineExceeded { attempts } => AdapterError::DeadlineExceeded {
                service: service.to_string(),
                attempts,
            },
        }
    }
}

/// Result type for adapter calls.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Errors raised while configuring or building an adapter.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration sources could not be read or merged.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// Configuration values are out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// Telemetry sink could not be opened.
    #[error("telemetry sink error: {0}")]
    Telemetry(#[from] TelemetryError),
}

impl From<conduit_resilience::ResilienceError> for ConfigError {
    fn from(error: conduit_resilience::ResilienceError) -> Self {
        ConfigError::Invalid(error.to_string())
    }
}

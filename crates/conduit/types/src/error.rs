//! Error types and failure classification shared by all conduit crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::scope::Scope;

/// Stable tag for each failure class an adapter call can end in.
///
/// Written into telemetry under the `error_kind` context key, so audit
/// queries can tell an unhealthy upstream from a wave of bad tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authorization,
    ConsentDenied,
    CircuitOpen,
    TransientOperation,
    MaxRetriesExceeded,
    DeadlineExceeded,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Authorization => "authorization",
            ErrorKind::ConsentDenied => "consent_denied",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::TransientOperation => "transient_operation",
            ErrorKind::MaxRetriesExceeded => "max_retries_exceeded",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
        }
    }

    /// Whether this failure says something about upstream health.
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            ErrorKind::TransientOperation
                | ErrorKind::MaxRetriesExceeded
                | ErrorKind::CircuitOpen
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a capability token was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum AuthorizationFailure {
    #[error("token expired")]
    Expired,

    #[error("token audience {actual:?} does not match service {expected:?}")]
    AudienceMismatch { expected: String, actual: String },

    #[error("token lacks required scope {0}")]
    MissingScope(Scope),

    #[error("token issued to {token_principal} presented by {principal}")]
    PrincipalMismatch {
        principal: String,
        token_principal: String,
    },

    #[error("token does not cover resource {0}")]
    ResourceNotCovered(String),

    #[error("no upstream credential for principal {0}")]
    MissingCredential(String),

    #[error("action {0} is not known to this service")]
    UnknownAction(String),
}

/// Errors raised while constructing a capability token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("ttl must be positive")]
    ZeroTtl,

    #[error("ttl of {0}s is out of range")]
    TtlOutOfRange(u64),
}

//! Error types for telemetry export.

use thiserror::Error;

/// Errors raised by telemetry sinks.
///
/// Never surfaced to adapter callers: a failing sink is logged and the
/// call's own outcome stands.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("sink error: {0}")]
    Sink(String),
}

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

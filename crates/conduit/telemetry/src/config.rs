//! Telemetry configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Telemetry configuration for one adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Records kept in memory; the oldest is evicted first.
    pub buffer_capacity: usize,

    /// Where records are exported, if anywhere.
    pub sink: TelemetrySinkConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1000,
            sink: TelemetrySinkConfig::None,
        }
    }
}

/// Export backend for telemetry records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetrySinkConfig {
    /// Keep records in the ring buffer only.
    #[default]
    None,

    /// In-memory sink (for development/testing).
    Memory,

    /// Append-only JSON lines file.
    JsonLines {
        /// Path to the log file.
        path: PathBuf,
    },
}

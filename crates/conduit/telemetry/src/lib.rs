//! Conduit Telemetry
//!
//! Records every adapter call for audit and derives health aggregates.
//!
//! ## Features
//!
//! - **Records**: one [`TelemetryRecord`] per call, failures always tagged
//!   with an [`ErrorKind`](conduit_types::ErrorKind)
//! - **Recorder**: bounded FIFO ring buffer plus running counters
//! - **Sinks**: optional export of every record (memory, JSON lines file)

pub mod config;
pub mod error;
pub mod record;
pub mod recorder;
pub mod sink;

pub use config::{TelemetryConfig, TelemetrySinkConfig};
pub use error::{TelemetryError, TelemetryResult};
pub use record::{TelemetryRecord, TelemetryRecordBuilder};
pub use recorder::{TelemetryMetrics, TelemetryRecorder};
pub use sink::{create_sink, JsonLinesTelemetrySink, MemoryTelemetrySink, TelemetrySink};

//! Telemetry sinks for exporting records

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::config::TelemetrySinkConfig;
use crate::error::TelemetryResult;
use crate::record::TelemetryRecord;

/// Trait for telemetry sinks
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Export one record
    async fn emit(&self, record: &TelemetryRecord) -> TelemetryResult<()>;

    /// Flush any buffered records
    async fn flush(&self) -> TelemetryResult<()>;
}

/// In-memory sink for testing
#[derive(Default)]
pub struct MemoryTelemetrySink {
    records: RwLock<Vec<TelemetryRecord>>,
}

impl MemoryTelemetrySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all records
    pub fn records(&self) -> Vec<TelemetryRecord> {
        self.records.read().clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TelemetrySink for MemoryTelemetrySink {
    async fn emit(&self, record: &TelemetryRecord) -> TelemetryResult<()> {
        self.records.write().push(record.clone());
        Ok(())
    }

    async fn flush(&self) -> TelemetryResult<()> {
        Ok(())
    }
}

/// Append-only JSON lines file sink
pub struct JsonLinesTelemetrySink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesTelemetrySink {
    /// Open (or create) the log file for appending
    pub async fn new(path: PathBuf) -> TelemetryResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all records back from the file
    pub async fn read_all(&self) -> TelemetryResult<Vec<TelemetryRecord>> {
        let file = File::open(&self.path).await?;
        let mut lines = BufReader::new(file).lines();
        let mut records = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(&line)?);
        }

        Ok(records)
    }
}

#[async_trait]
impl TelemetrySink for JsonLinesTelemetrySink {
    async fn emit(&self, record: &TelemetryRecord) -> TelemetryResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn flush(&self) -> TelemetryResult<()> {
        self.file.lock().await.flush().await?;
        Ok(())
    }
}

/// Create a sink based on configuration
pub async fn create_sink(
    config: &TelemetrySinkConfig,
) -> TelemetryResult<Option<Arc<dyn TelemetrySink>>> {
    match config {
        TelemetrySinkConfig::None => Ok(None),
        TelemetrySinkConfig::Memory => Ok(Some(Arc::new(MemoryTelemetrySink::new()))),
        TelemetrySinkConfig::JsonLines { path } => {
            let sink = JsonLinesTelemetrySink::new(path.clone()).await?;
            Ok(Some(Arc::new(sink)))
        }
    }
}

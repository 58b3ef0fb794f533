//! Bounded in-memory telemetry recorder.
//!
//! Keeps the most recent records in a FIFO ring buffer and maintains
//! running aggregates over every record ever seen, so health metrics stay
//! exact after old records are evicted.

use std::collections::{BTreeMap, HashSet, VecDeque};

use conduit_types::{ErrorKind, TokenId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::record::TelemetryRecord;

/// Aggregate view over all recorded calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryMetrics {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    /// `successes / max(requests, 1)`
    pub success_rate: f64,
    /// `total latency / max(requests, 1)`
    pub avg_latency_ms: f64,
    /// Distinct token ids seen.
    pub unique_tokens: usize,
    /// Failure count per error kind.
    pub failures_by_kind: BTreeMap<ErrorKind, u64>,
}

#[derive(Debug)]
struct RecorderInner {
    buffer: VecDeque<TelemetryRecord>,
    request_count: u64,
    success_count: u64,
    failure_count: u64,
    total_latency_ms: f64,
    tokens: HashSet<TokenId>,
    failures_by_kind: BTreeMap<ErrorKind, u64>,
}

/// Per-adapter telemetry recorder. Safe to share between tasks.
#[derive(Debug)]
pub struct TelemetryRecorder {
    capacity: usize,
    inner: Mutex<RecorderInner>,
}

impl TelemetryRecorder {
    /// Create a recorder keeping at most `capacity` records (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(RecorderInner {
                buffer: VecDeque::with_capacity(capacity),
                request_count: 0,
                success_count: 0,
                failure_count: 0,
                total_latency_ms: 0.0,
                tokens: HashSet::new(),
                failures_by_kind: BTreeMap::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffer a record and fold it into the aggregates.
    pub fn record(&self, entry: TelemetryRecord) {
        let mut inner = self.inner.lock();

        inner.request_count += 1;
        if entry.success() {
            inner.success_count += 1;
        } else {
            inner.failure_count += 1;
            if let Some(kind) = entry.error_kind() {
                *inner.failures_by_kind.entry(kind).or_insert(0) += 1;
            }
        }
        inner.total_latency_ms += entry.latency_ms();
        if let Some(token_id) = entry.token_id() {
            if !inner.tokens.contains(token_id) {
                inner.tokens.insert(token_id.clone());
            }
        }

        if inner.buffer.len() == self.capacity {
            if let Some(evicted) = inner.buffer.pop_front() {
                debug!(record_id = %evicted.id(), capacity = self.capacity, "Telemetry buffer full, evicting oldest record");
            }
        }
        inner.buffer.push_back(entry);
    }

    /// Current aggregates. Never divides by zero.
    pub fn metrics(&self) -> TelemetryMetrics {
        let inner = self.inner.lock();
        let denominator = inner.request_count.max(1) as f64;

        TelemetryMetrics {
            requests: inner.request_count,
            successes: inner.success_count,
            failures: inner.failure_count,
            success_rate: inner.success_count as f64 / denominator,
            avg_latency_ms: inner.total_latency_ms / denominator,
            unique_tokens: inner.tokens.len(),
            failures_by_kind: inner.failures_by_kind.clone(),
        }
    }

    /// Buffered records, oldest first.
    pub fn records(&self) -> Vec<TelemetryRecord> {
        self.inner.lock().buffer.iter().cloned().collect()
    }

    /// The `n` most recent records, oldest first.
    pub fn recent(&self, n: usize) -> Vec<TelemetryRecord> {
        let inner = self.inner.lock();
        let skip = inner.buffer.len().saturating_sub(n);
        inner.buffer.iter().skip(skip).cloned().collect()
    }

    pub fn failures_by_kind(&self) -> BTreeMap<ErrorKind, u64> {
        self.inner.lock().failures_by_kind.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TelemetryRecorder {
    fn default() -> Self {
        Self::new(1000)
    }
}

//! Telemetry record types

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use conduit_types::{ErrorKind, PrincipalId, TokenId};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Context key carrying the failure classification.
pub const ERROR_KIND_KEY: &str = "error_kind";

/// Audit record of one attempted adapter call.
///
/// Immutable once built; a failed record always carries an [`ErrorKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    id: Uuid,
    timestamp: DateTime<Utc>,
    service: String,
    principal_id: PrincipalId,
    action: String,
    resource: String,
    success: bool,
    latency_ms: f64,
    token_id: Option<TokenId>,
    error_kind: Option<ErrorKind>,
    context: HashMap<String, serde_json::Value>,
}

impl TelemetryRecord {
    /// Create a new record builder
    pub fn builder(principal_id: PrincipalId, action: impl Into<String>) -> TelemetryRecordBuilder {
        TelemetryRecordBuilder::new(principal_id, action)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn principal_id(&self) -> &PrincipalId {
        &self.principal_id
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn latency_ms(&self) -> f64 {
        self.latency_ms
    }

    pub fn token_id(&self) -> Option<&TokenId> {
        self.token_id.as_ref()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error_kind
    }

    pub fn context(&self) -> &HashMap<String, serde_json::Value> {
        &self.context
    }
}

/// Builder for telemetry records
#[derive(Debug)]
pub struct TelemetryRecordBuilder {
    timestamp: Option<DateTime<Utc>>,
    service: String,
    principal_id: PrincipalId,
    action: String,
    resource: String,
    latency_ms: f64,
    token_id: Option<TokenId>,
    context: HashMap<String, serde_json::Value>,
}

impl TelemetryRecordBuilder {
    fn new(principal_id: PrincipalId, action: impl Into<String>) -> Self {
        Self {
            timestamp: None,
            service: String::new(),
            principal_id,
            action: action.into(),
            resource: String::new(),
            latency_ms: 0.0,
            token_id: None,
            context: HashMap::new(),
        }
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }

    /// Negative or non-finite latencies are stored as zero.
    pub fn latency_ms(mut self, latency_ms: f64) -> Self {
        self.latency_ms = if latency_ms.is_finite() && latency_ms > 0.0 {
            latency_ms
        } else {
            0.0
        };
        self
    }

    pub fn token_id(mut self, token_id: Option<TokenId>) -> Self {
        self.token_id = token_id;
        self
    }

    /// Add context value.
    ///
    /// A value that cannot be represented as JSON is logged and stored as
    /// the serialization error text, so the key is never lost.
    pub fn context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let key = key.into();
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(error) => {
                warn!(key = %key, error = %error, "Telemetry context value not serializable");
                serde_json::Value::String(format!("unserializable: {error}"))
            }
        };
        self.context.insert(key, value);
        self
    }

    /// Merge caller-supplied context without overwriting keys already set.
    pub fn extend_context(mut self, extra: &HashMap<String, serde_json::Value>) -> Self {
        for (key, value) in extra {
            self.context
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }

    /// Finish as a successful call.
    pub fn succeeded(self) -> TelemetryRecord {
        self.finish(None)
    }

    /// Finish as a failed call of the given kind.
    pub fn failed(mut self, kind: ErrorKind) -> TelemetryRecord {
        self.context
            .insert(ERROR_KIND_KEY.to_string(), serde_json::Value::from(kind.as_str()));
        self.finish(Some(kind))
    }

    fn finish(self, error_kind: Option<ErrorKind>) -> TelemetryRecord {
        TelemetryRecord {
            id: Uuid::new_v4(),
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            service: self.service,
            principal_id: self.principal_id,
            action: self.action,
            resource: self.resource,
            success: error_kind.is_none(),
            latency_ms: self.latency_ms,
            token_id: self.token_id,
            error_kind,
            context: self.context,
        }
    }
}

//! Service adapter orchestration.
//!
//! The ServiceAdapter owns one circuit breaker and one telemetry recorder
//! for its upstream service and runs every call through
//! authorize → consent → retry/breaker → record.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use conduit_resilience::{
    AttemptOutcome, AttemptReport, CircuitBreaker, CircuitState, OperationError, RetryExecutor,
};
use conduit_telemetry::{
    create_sink, TelemetryMetrics, TelemetryRecord, TelemetryRecordBuilder, TelemetryRecorder,
    TelemetrySink,
};
use conduit_types::{
    AuthorizationFailure, CapabilityToken, ErrorKind, InvocationId, PrincipalId, Scope,
    ServiceProfile, SharedClock, SystemClock,
};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::AdapterConfig;
use crate::consent::ConsentGate;
use crate::credentials::{CredentialStore, UpstreamCredential};
use crate::error::{AdapterError, AdapterResult, ConfigError};

/// One call to make through an adapter.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub principal: PrincipalId,
    pub action: String,
    /// Required scope; taken from the service profile when unset.
    pub required_scope: Option<Scope>,
    pub resource: Option<String>,
    /// Free-form metadata passed to the consent gate and telemetry.
    pub context: HashMap<String, serde_json::Value>,
    /// Bound on the whole call, retries included.
    pub deadline: Option<Instant>,
}

impl InvocationRequest {
    pub fn new(principal: PrincipalId, action: impl Into<String>) -> Self {
        Self {
            principal,
            action: action.into(),
            required_scope: None,
            resource: None,
            context: HashMap::new(),
            deadline: None,
        }
    }

    pub fn scope(mut self, scope: impl Into<Scope>) -> Self {
        self.required_scope = Some(scope.into());
        self
    }

    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Attach metadata. Values that cannot be represented as JSON are
    /// logged and skipped.
    pub fn context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let key = key.into();
        match serde_json::to_value(value) {
            Ok(v) => {
                self.context.insert(key, v);
            }
            Err(error) => warn!(key = %key, error = %error, "Invocation context value not serializable"),
        }
        self
    }

    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Deadline relative to now.
    pub fn timeout(self, timeout: Duration) -> Self {
        self.deadline(Instant::now() + timeout)
    }
}

/// What the upstream operation receives on each attempt.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub invocation_id: InvocationId,
    /// 1-based attempt number.
    pub attempt: u32,
    pub principal: PrincipalId,
    pub action: String,
    pub resource: Option<String>,
    /// Provider credential, when a credential store is configured.
    pub credential: Option<UpstreamCredential>,
}

/// Point-in-time health of an adapter, suitable for JSON export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterHealthSnapshot {
    pub service: String,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    pub request_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: f64,
    pub average_latency_ms: f64,
    pub unique_tokens_used: usize,
    pub failures_by_kind: BTreeMap<ErrorKind, u64>,
    pub taken_at: DateTime<Utc>,
}

impl AdapterHealthSnapshot {
    /// The upstream is being shielded by the breaker.
    pub fn is_service_down(&self) -> bool {
        self.circuit_state != CircuitState::Closed
    }

    /// Failures of one kind.
    pub fn failures_of(&self, kind: ErrorKind) -> u64 {
        self.failures_by_kind.get(&kind).copied().unwrap_or(0)
    }
}

/// Resilient adapter for one upstream service.
///
/// Cheap to share: wrap in an `Arc` and call [`invoke`](Self::invoke)
/// from as many tasks as needed.
pub struct ServiceAdapter {
    profile: ServiceProfile,
    breaker: Arc<CircuitBreaker>,
    executor: RetryExecutor,
    telemetry: TelemetryRecorder,
    sink: Option<Arc<dyn TelemetrySink>>,
    consent: Option<Arc<dyn ConsentGate>>,
    credentials: Option<Arc<dyn CredentialStore>>,
    clock: SharedClock,
}

impl ServiceAdapter {
    pub fn builder(profile: ServiceProfile) -> ServiceAdapterBuilder {
        ServiceAdapterBuilder::new(profile)
    }

    /// Build an adapter from configuration, opening the configured
    /// telemetry sink.
    pub async fn from_config(config: AdapterConfig) -> Result<Self, ConfigError> {
        let sink = create_sink(&config.telemetry.sink).await?;
        let mut builder = ServiceAdapterBuilder::new(config.profile()).config(config);
        builder.sink = sink;
        builder.build()
    }

    pub fn service(&self) -> &str {
        &self.profile.name
    }

    pub fn profile(&self) -> &ServiceProfile {
        &self.profile
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn telemetry(&self) -> &TelemetryRecorder {
        &self.telemetry
    }

    /// Run `operation` against the upstream on behalf of `request.principal`.
    ///
    /// Steps, each terminal on failure:
    /// 1. token checks (expiry, audience, scope, principal, resource)
    /// 2. upstream credential lookup, when a store is configured
    /// 3. consent gate
    /// 4. retries under the circuit breaker
    ///
    /// Every outcome is recorded in telemetry. Only step 4 can affect the
    /// breaker.
    #[instrument(
        skip(self, request, token, operation),
        fields(service = %self.profile.name, principal = %request.principal, action = %request.action)
    )]
    pub async fn invoke<T, F, Fut>(
        &self,
        request: InvocationRequest,
        token: &CapabilityToken,
        mut operation: F,
    ) -> AdapterResult<T>
    where
        F: FnMut(OperationContext) -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        let started = Instant::now();
        let invocation_id = InvocationId::generate();

        if let Err(failure) = self.authorize(&request, token) {
            debug!(failure = %failure, "Token rejected");
            return Err(self
                .fail(&request, token, started, authorization_error(&self.profile.name, failure))
                .await);
        }

        let credential = match self.resolve_credential(&request).await {
            Ok(credential) => credential,
            Err(error) => return Err(self.fail(&request, token, started, error).await),
        };

        if let Err(error) = self.check_consent(&request).await {
            return Err(self.fail(&request, token, started, error).await);
        }

        let mut attempts: Vec<AttemptReport> = Vec::new();
        let result = self
            .executor
            .execute_until(
                request.deadline,
                |attempt| {
                    operation(OperationContext {
                        invocation_id,
                        attempt,
                        principal: request.principal.clone(),
                        action: request.action.clone(),
                        resource: request.resource.clone(),
                        credential: credential.clone(),
                    })
                },
                |report| {
                    if let AttemptOutcome::Failed(error) = &report.outcome {
                        debug!(attempt = report.attempt, latency_ms = report.latency_ms, error = %error, "Attempt failed");
                    }
                    attempts.push(report.clone());
                },
            )
            .await;

        match result {
            Ok(value) => {
                let record = self
                    .base_record(&request, token, started)
                    .context("invocation_id", invocation_id.to_string())
                    .context("attempts", attempts.len())
                    .context("attempt_latencies_ms", attempt_latencies(&attempts))
                    .succeeded();
                self.record(record).await;
                Ok(value)
            }
            Err(error) => {
                let error = AdapterError::from_execution(&self.profile.name, error);
                let builder = self
                    .base_record(&request, token, started)
                    .context("invocation_id", invocation_id.to_string())
                    .context("attempts", attempts.len())
                    .context("attempt_latencies_ms", attempt_latencies(&attempts));
                Err(self.fail_with(builder, error).await)
            }
        }
    }

    /// Shorthand for [`invoke`](Self::invoke) with the scope looked up from
    /// the service profile and no resource, context or deadline.
    pub async fn invoke_action<T, F, Fut>(
        &self,
        principal: PrincipalId,
        action: &str,
        token: &CapabilityToken,
        operation: F,
    ) -> AdapterResult<T>
    where
        F: FnMut(OperationContext) -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        self.invoke(InvocationRequest::new(principal, action), token, operation)
            .await
    }

    /// Current health: breaker state plus telemetry aggregates. Has no side
    /// effects.
    pub fn health_status(&self) -> AdapterHealthSnapshot {
        let breaker = self.breaker.stats();
        let TelemetryMetrics {
            requests,
            successes,
            failures,
            success_rate,
            avg_latency_ms,
            unique_tokens,
            failures_by_kind,
        } = self.telemetry.metrics();

        AdapterHealthSnapshot {
            service: self.profile.name.clone(),
            circuit_state: breaker.state,
            consecutive_failures: breaker.failure_count,
            request_count: requests,
            success_count: successes,
            failure_count: failures,
            success_rate,
            average_latency_ms: avg_latency_ms,
            unique_tokens_used: unique_tokens,
            failures_by_kind,
            taken_at: self.clock.now(),
        }
    }

    /// Flush the telemetry sink, if any.
    pub async fn flush_telemetry(&self) {
        if let Some(sink) = &self.sink {
            if let Err(error) = sink.flush().await {
                warn!(service = %self.profile.name, error = %error, "Telemetry sink flush failed");
            }
        }
    }

    fn authorize(
        &self,
        request: &InvocationRequest,
        token: &CapabilityToken,
    ) -> Result<(), AuthorizationFailure> {
        let required = match &request.required_scope {
            Some(scope) => scope,
            None => self
                .profile
                .required_scope(&request.action)
                .ok_or_else(|| AuthorizationFailure::UnknownAction(request.action.clone()))?,
        };

        if token.principal_id() != &request.principal {
            return Err(AuthorizationFailure::PrincipalMismatch {
                principal: request.principal.to_string(),
                token_principal: token.principal_id().to_string(),
            });
        }

        token.authorize(self.clock.now(), required, &self.profile.name)?;

        if let Some(resource) = &request.resource {
            if !token.covers_resource(resource) {
                return Err(AuthorizationFailure::ResourceNotCovered(resource.clone()));
            }
        }

        Ok(())
    }

    async fn resolve_credential(
        &self,
        request: &InvocationRequest,
    ) -> AdapterResult<Option<UpstreamCredential>> {
        let Some(store) = &self.credentials else {
            return Ok(None);
        };

        let lookup = store.credential_for(&request.principal);
        let credential = self.within_deadline(request, lookup).await?;

        match credential {
            Some(credential) if !credential.is_expired(self.clock.now()) => Ok(Some(credential)),
            _ => Err(authorization_error(
                &self.profile.name,
                AuthorizationFailure::MissingCredential(request.principal.to_string()),
            )),
        }
    }

    async fn check_consent(&self, request: &InvocationRequest) -> AdapterResult<()> {
        let Some(gate) = &self.consent else {
            return Ok(());
        };

        let decision = gate.check(&request.principal, &request.action, &request.context);
        let reason = match self.within_deadline(request, decision).await? {
            Ok(true) => return Ok(()),
            Ok(false) => None,
            Err(error) => {
                warn!(error = %error, "Consent gate failed, treating as denial");
                Some(error.to_string())
            }
        };

        info!("Consent denied");
        Err(AdapterError::ConsentDenied {
            principal: request.principal.clone(),
            action: request.action.clone(),
            reason,
        })
    }

    async fn within_deadline<O>(
        &self,
        request: &InvocationRequest,
        future: impl Future<Output = O>,
    ) -> AdapterResult<O> {
        match request.deadline {
            None => Ok(future.await),
            Some(deadline) => tokio::time::timeout_at(deadline, future).await.map_err(|_| {
                AdapterError::DeadlineExceeded {
                    service: self.profile.name.clone(),
                    attempts: 0,
                }
            }),
        }
    }

    fn base_record(
        &self,
        request: &InvocationRequest,
        token: &CapabilityToken,
        started: Instant,
    ) -> TelemetryRecordBuilder {
        TelemetryRecord::builder(request.principal.clone(), request.action.clone())
            .timestamp(self.clock.now())
            .service(self.profile.name.clone())
            .resource(request.resource.clone().unwrap_or_default())
            .latency_ms(started.elapsed().as_secs_f64() * 1000.0)
            .token_id(Some(token.token_id().clone()))
            .extend_context(&request.context)
    }

    async fn fail(
        &self,
        request: &InvocationRequest,
        token: &CapabilityToken,
        started: Instant,
        error: AdapterError,
    ) -> AdapterError {
        let builder = self.base_record(request, token, started);
        self.fail_with(builder, error).await
    }

    async fn fail_with(&self, builder: TelemetryRecordBuilder, error: AdapterError) -> AdapterError {
        let kind = error.kind();
        let mut builder = builder
            .context("reason", kind.as_str())
            .context("error", error.to_string());

        match &error {
            AdapterError::Authorization { failure, .. } => {
                builder = builder.context("authorization_failure", failure);
            }
            AdapterError::ConsentDenied {
                reason: Some(reason),
                ..
            } => {
                builder = builder.context("consent_error", reason);
            }
            AdapterError::CircuitOpen { state, .. } => {
                builder = builder.context("circuit_state", state);
            }
            AdapterError::MaxRetriesExceeded { last, .. } => {
                builder = builder.context("last_error", last);
            }
            _ => {}
        }

        self.record(builder.failed(kind)).await;
        error
    }

    async fn record(&self, record: TelemetryRecord) {
        self.telemetry.record(record.clone());
        if let Some(sink) = &self.sink {
            if let Err(error) = sink.emit(&record).await {
                warn!(service = %self.profile.name, error = %error, "Telemetry sink rejected record");
            }
        }
    }
}

fn authorization_error(service: &str, failure: AuthorizationFailure) -> AdapterError {
    AdapterError::Authorization {
        service: service.to_string(),
        failure,
    }
}

fn attempt_latencies(attempts: &[AttemptReport]) -> Vec<f64> {
    attempts.iter().map(|report| report.latency_ms).collect()
}

/// Builder for [`ServiceAdapter`].
pub struct ServiceAdapterBuilder {
    profile: ServiceProfile,
    config: AdapterConfig,
    clock: SharedClock,
    consent: Option<Arc<dyn ConsentGate>>,
    credentials: Option<Arc<dyn CredentialStore>>,
    sink: Option<Arc<dyn TelemetrySink>>,
}

impl ServiceAdapterBuilder {
    fn new(profile: ServiceProfile) -> Self {
        let config = AdapterConfig::for_service(profile.name.clone());
        Self {
            profile,
            config,
            clock: Arc::new(SystemClock),
            consent: None,
            credentials: None,
            sink: None,
        }
    }

    /// Use the resilience and telemetry settings of `config`. The profile
    /// given to [`ServiceAdapter::builder`] stays authoritative.
    pub fn config(mut self, config: AdapterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn consent_gate(mut self, gate: Arc<dyn ConsentGate>) -> Self {
        self.consent = Some(gate);
        self
    }

    pub fn credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    pub fn telemetry_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<ServiceAdapter, ConfigError> {
        if self.profile.name.trim().is_empty() {
            return Err(ConfigError::Invalid("service name must not be empty".into()));
        }
        let mut config = self.config;
        config.service = self.profile.name.clone();
        config.validate()?;

        let breaker = Arc::new(CircuitBreaker::new(
            self.profile.name.clone(),
            config.resilience.circuit_breaker.clone(),
            self.clock.clone(),
        ));
        let executor = RetryExecutor::new(breaker.clone(), config.resilience.retry.clone());

        info!(
            service = %self.profile.name,
            failure_threshold = config.resilience.circuit_breaker.failure_threshold,
            max_retries = config.resilience.retry.max_retries,
            "Service adapter created"
        );

        Ok(ServiceAdapter {
            profile: self.profile,
            breaker,
            executor,
            telemetry: TelemetryRecorder::new(config.telemetry.buffer_capacity),
            sink: self.sink,
            consent: self.consent,
            credentials: self.credentials,
            clock: self.clock,
        })
    }
}

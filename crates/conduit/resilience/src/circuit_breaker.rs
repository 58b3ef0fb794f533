//! Circuit breaker pattern for upstream fault isolation.
//!
//! Prevents hammering a failing upstream by counting consecutive failures
//! and temporarily refusing attempts once a threshold is reached.

use chrono::{DateTime, Duration, Utc};
use conduit_types::SharedClock;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally.
    Closed,

    /// Circuit is open, requests are blocked.
    Open,

    /// Circuit is testing if the upstream has recovered.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Mutable breaker state. Guarded by one lock so every transition is
/// linearizable.
#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    half_open_success_count: u32,
    last_failure_time: Option<DateTime<Utc>>,
    probe_in_flight: bool,
    last_transition: DateTime<Utc>,
}

/// Circuit breaker for a single adapter.
///
/// Transitions:
/// - Closed: every attempt allowed; `failure_threshold` consecutive
///   failures open the circuit
/// - Open: attempts refused until more than `recovery_timeout_secs` have
///   passed since the last failure, then one probe is let through
/// - Half-Open: one probe in flight at a time; a failure re-opens,
///   `half_open_success_threshold` consecutive successes close
pub struct CircuitBreaker {
    /// Service this breaker guards.
    service: String,

    /// Configuration.
    config: CircuitBreakerConfig,

    /// Open-to-half-open delay as a signed duration for clock arithmetic.
    recovery_timeout: Duration,

    /// Time source.
    clock: SharedClock,

    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new, closed circuit breaker.
    pub fn new(service: impl Into<String>, config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        let recovery_timeout = i64::try_from(config.recovery_timeout_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        let now = clock.now();

        Self {
            service: service.into(),
            config,
            recovery_timeout,
            clock,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                half_open_success_count: 0,
                last_failure_time: None,
                probe_in_flight: false,
                last_transition: now,
            }),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state. Never causes a transition.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Check whether an attempt may start now, claiming the probe slot when
    /// the answer is yes in the half-open state.
    ///
    /// An open circuit whose recovery timeout has elapsed moves to half-open
    /// here and admits the caller as its probe.
    pub fn can_attempt(&self) -> bool {
        self.admit().is_ok()
    }

    /// Like [`can_attempt`](Self::can_attempt), but returns a permit that
    /// reports the outcome and gives the probe slot back if dropped
    /// unresolved.
    pub fn try_acquire(&self) -> Result<AttemptPermit<'_>, CircuitState> {
        let probe = self.admit()?;
        Ok(AttemptPermit {
            breaker: self,
            probe,
            resolved: false,
        })
    }

    /// Record a successful operation.
    pub fn record_success(&self) {
        self.on_success(true);
    }

    /// Record a failed operation.
    pub fn record_failure(&self) {
        self.on_failure(true);
    }

    /// Force the circuit to a specific state.
    pub fn force_state(&self, new_state: CircuitState) {
        let mut inner = self.inner.lock();
        info!(
            service = %self.service,
            old_state = %inner.state,
            new_state = %new_state,
            "Circuit breaker state forced"
        );
        let now = self.clock.now();
        if new_state == CircuitState::Open {
            inner.last_failure_time = Some(now);
        }
        Self::transition_to(&mut inner, new_state, now);
    }

    /// Reset the circuit breaker to closed state.
    pub fn reset(&self) {
        self.force_state(CircuitState::Closed);
    }

    /// Get circuit breaker statistics.
    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        CircuitBreakerStats {
            service: self.service.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            half_open_success_count: inner.half_open_success_count,
            last_failure_time: inner.last_failure_time,
            last_transition: inner.last_transition,
        }
    }

    /// Admission decision. `Ok(true)` means the caller holds the probe slot.
    fn admit(&self) -> Result<bool, CircuitState> {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => {
                let now = self.clock.now();
                let recovered = inner
                    .last_failure_time
                    .map(|at| now - at > self.recovery_timeout)
                    .unwrap_or(true);

                if !recovered {
                    return Err(CircuitState::Open);
                }

                info!(
                    service = %self.service,
                    "Circuit breaker transitioning to half-open after timeout"
                );
                Self::transition_to(&mut inner, CircuitState::HalfOpen, now);
                inner.probe_in_flight = true;
                Ok(true)
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    debug!(service = %self.service, "Half-open probe already in flight");
                    return Err(CircuitState::HalfOpen);
                }
                inner.probe_in_flight = true;
                Ok(true)
            }
        }
    }

    fn on_success(&self, releases_probe: bool) {
        let mut inner = self.inner.lock();
        if releases_probe {
            inner.probe_in_flight = false;
        }

        match inner.state {
            CircuitState::Closed => {
                // Reset failure count on success
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen if !releases_probe => {
                debug!(service = %self.service, "Ignoring success of an attempt admitted before half-open");
            }
            CircuitState::HalfOpen => {
                inner.half_open_success_count += 1;
                let successes = inner.half_open_success_count;

                if successes >= self.config.half_open_success_threshold {
                    info!(
                        service = %self.service,
                        successes = successes,
                        "Circuit breaker closing after successful recovery"
                    );
                    Self::transition_to(&mut inner, CircuitState::Closed, self.clock.now());
                }
            }
            CircuitState::Open => {
                debug!(service = %self.service, "Success recorded while circuit open");
            }
        }
    }

    fn on_failure(&self, releases_probe: bool) {
        let mut inner = self.inner.lock();
        if releases_probe {
            inner.probe_in_flight = false;
        }
        let now = self.clock.now();

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                inner.last_failure_time = Some(now);
                let failures = inner.failure_count;

                if failures >= self.config.failure_threshold {
                    warn!(
                        service = %self.service,
                        failures = failures,
                        "Circuit breaker opening due to failures"
                    );
                    Self::transition_to(&mut inner, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => {
                inner.failure_count += 1;
                inner.last_failure_time = Some(now);
                warn!(
                    service = %self.service,
                    "Circuit breaker re-opening after half-open failure"
                );
                Self::transition_to(&mut inner, CircuitState::Open, now);
            }
            CircuitState::Open => {}
        }
    }

    fn release_probe(&self) {
        self.inner.lock().probe_in_flight = false;
    }

    /// Transition to a new state, resetting counters as needed.
    fn transition_to(inner: &mut BreakerInner, new_state: CircuitState, now: DateTime<Utc>) {
        inner.state = new_state;
        inner.last_transition = now;

        match new_state {
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.half_open_success_count = 0;
                inner.probe_in_flight = false;
            }
            CircuitState::Open => {
                inner.half_open_success_count = 0;
                inner.probe_in_flight = false;
            }
            CircuitState::HalfOpen => {
                inner.half_open_success_count = 0;
            }
        }
    }
}

/// Admission ticket for one attempt.
///
/// Consume it with [`succeeded`](Self::succeeded) or
/// [`failed`](Self::failed). Dropping it unresolved (the attempt was
/// cancelled) leaves the breaker's counters untouched and frees the
/// half-open probe slot.
#[must_use = "an attempt permit must be resolved with its outcome"]
pub struct AttemptPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    resolved: bool,
}

impl AttemptPermit<'_> {
    /// Whether this attempt is the half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn succeeded(mut self) {
        self.resolved = true;
        self.breaker.on_success(self.probe);
    }

    pub fn failed(mut self) {
        self.resolved = true;
        self.breaker.on_failure(self.probe);
    }
}

impl Drop for AttemptPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved && self.probe {
            debug!(service = %self.breaker.service, "Half-open probe abandoned");
            self.breaker.release_probe();
        }
    }
}

/// Statistics for a circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    /// Guarded service.
    pub service: String,

    /// Current state.
    pub state: CircuitState,

    /// Consecutive failures recorded since the last close or success.
    pub failure_count: u32,

    /// Consecutive successes in the current half-open period.
    pub half_open_success_count: u32,

    /// Time of the most recent recorded failure.
    pub last_failure_time: Option<DateTime<Utc>>,

    /// Time of last state transition.
    pub last_transition: DateTime<Utc>,
}

//! Retry executor.
//!
//! Runs a fallible async operation under the adapter's [`RetryPolicy`],
//! asking the [`CircuitBreaker`] for permission before every attempt and
//! reporting each attempt's outcome and latency to a caller hook.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::config::RetryPolicy;
use crate::error::{ExecutionError, OperationError};

/// Outcome of a single attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed(OperationError),
}

/// What the caller's hook learns about each attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptReport {
    /// 1-based attempt number.
    pub attempt: u32,

    /// Time spent inside the operation, in milliseconds.
    pub latency_ms: f64,

    pub outcome: AttemptOutcome,
}

impl AttemptReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Succeeded)
    }
}

/// Bounded retry loop coordinated with a circuit breaker.
#[derive(Clone)]
pub struct RetryExecutor {
    breaker: Arc<CircuitBreaker>,
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(breaker: Arc<CircuitBreaker>, policy: RetryPolicy) -> Self {
        Self { breaker, policy }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, the policy is exhausted or the
    /// breaker refuses an attempt.
    ///
    /// `operation` receives the 1-based attempt number. `on_attempt` is
    /// called once per attempt that actually ran.
    pub async fn execute<T, F, Fut, H>(
        &self,
        operation: F,
        on_attempt: H,
    ) -> Result<T, ExecutionError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
        H: FnMut(&AttemptReport),
    {
        let attempts = AtomicU32::new(0);
        self.run(&attempts, operation, on_attempt).await
    }

    /// [`execute`](Self::execute) bounded by a deadline covering every
    /// attempt and every backoff sleep.
    ///
    /// When the deadline passes the in-flight attempt is dropped; it is
    /// reported neither as a success nor as a failure to the breaker.
    pub async fn execute_until<T, F, Fut, H>(
        &self,
        deadline: Option<Instant>,
        operation: F,
        on_attempt: H,
    ) -> Result<T, ExecutionError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
        H: FnMut(&AttemptReport),
    {
        let attempts = AtomicU32::new(0);
        let run = self.run(&attempts, operation, on_attempt);

        let Some(deadline) = deadline else {
            return run.await;
        };

        match tokio::time::timeout_at(deadline, run).await {
            Ok(result) => result,
            Err(_) => {
                let attempts = attempts.load(Ordering::SeqCst);
                warn!(
                    service = %self.breaker.service(),
                    attempts = attempts,
                    "Deadline exceeded during retry loop"
                );
                Err(ExecutionError::DeadlineExceeded { attempts })
            }
        }
    }

    async fn run<T, F, Fut, H>(
        &self,
        attempts: &AtomicU32,
        mut operation: F,
        mut on_attempt: H,
    ) -> Result<T, ExecutionError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
        H: FnMut(&AttemptReport),
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0u32;

        loop {
            let permit = match self.breaker.try_acquire() {
                Ok(permit) => permit,
                Err(state) => {
                    debug!(
                        service = %self.breaker.service(),
                        state = %state,
                        attempts = attempt,
                        "Circuit breaker refused attempt"
                    );
                    return Err(ExecutionError::CircuitOpen {
                        service: self.breaker.service().to_string(),
                        state,
                        attempts: attempt,
                    });
                }
            };

            attempt += 1;
            attempts.store(attempt, Ordering::SeqCst);

            let started = Instant::now();
            let result = operation(attempt).await;
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

            match result {
                Ok(value) => {
                    permit.succeeded();
                    on_attempt(&AttemptReport {
                        attempt,
                        latency_ms,
                        outcome: AttemptOutcome::Succeeded,
                    });
                    return Ok(value);
                }
                Err(error) => {
                    permit.failed();
                    on_attempt(&AttemptReport {
                        attempt,
                        latency_ms,
                        outcome: AttemptOutcome::Failed(error.clone()),
                    });

                    if attempt >= max_attempts {
                        warn!(
                            service = %self.breaker.service(),
                            attempts = attempt,
                            error = %error,
                            "Retries exhausted"
                        );
                        return Err(ExecutionError::MaxRetriesExceeded {
                            attempts: attempt,
                            last: error,
                        });
                    }

                    let state = self.breaker.state();
                    if state == CircuitState::Open {
                        warn!(
                            service = %self.breaker.service(),
                            attempts = attempt,
                            "Circuit opened during retries, giving up"
                        );
                        return Err(ExecutionError::CircuitOpen {
                            service: self.breaker.service().to_string(),
                            state,
                            attempts: attempt,
                        });
                    }

                    let delay = self.delay_for(attempt);
                    debug!(
                        service = %self.breaker.service(),
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn delay_for(&self, retry: u32) -> Duration {
        let base = self.policy.backoff_for(retry);
        if !self.policy.jitter {
            return base;
        }
        let spread = (base.as_millis() as u64) / 10;
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use conduit_types::ManualClock;
    use proptest::prelude::*;

    use super::*;
    use crate::config::CircuitBreakerConfig;

    fn executor(threshold: u32, policy: RetryPolicy) -> RetryExecutor {
        let breaker = Arc::new(CircuitBreaker::new(
            "drive",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout_secs: 60,
                half_open_success_threshold: 3,
            },
            Arc::new(ManualClock::starting_now()),
        ));
        RetryExecutor::new(breaker, policy)
    }

    fn failing(calls: &AtomicUsize) -> impl FnMut(u32) -> futures::future::Ready<Result<(), OperationError>> + '_ {
        move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Err(OperationError::status(503, "unavailable")))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failures() {
        let executor = executor(10, RetryPolicy::default());
        let calls = AtomicUsize::new(0);
        let mut reports = Vec::new();
        let started = Instant::now();

        let value = executor
            .execute(
                |attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt < 3 {
                            Err(OperationError::network("reset"))
                        } else {
                            Ok(attempt)
                        }
                    }
                },
                |report| reports.push(report.clone()),
            )
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(reports.len(), 3);
        assert!(reports[2].succeeded());
        // 1s + 2s of backoff
        assert!(started.elapsed() >= Duration::from_millis(3000));
        assert_eq!(executor.breaker().stats().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_wrap_last_error() {
        let executor = executor(10, RetryPolicy::default());
        let calls = AtomicUsize::new(0);

        let err = executor
            .execute(failing(&calls), |_| {})
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match err {
            ExecutionError::MaxRetriesExceeded { attempts, last } => {
                assert_eq!(attempts, 4);
                assert_eq!(last, OperationError::status(503, "unavailable"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_means_single_attempt() {
        let executor = executor(10, RetryPolicy::no_retry());
        let calls = AtomicUsize::new(0);
        let started = Instant::now();

        let err = executor.execute(failing(&calls), |_| {}).await.unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.attempts(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opening_mid_loop_stops_retries() {
        let executor = executor(2, RetryPolicy::default());
        let calls = AtomicUsize::new(0);
        let started = Instant::now();

        let err = executor.execute(failing(&calls), |_| {}).await.unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // Only the backoff between the two attempts is waited.
        assert_eq!(started.elapsed(), Duration::from_millis(1000));
        match err {
            ExecutionError::CircuitOpen {
                state, attempts, ..
            } => {
                assert_eq!(state, CircuitState::Open);
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_that_opens_breaker_skips_backoff() {
        let executor = executor(1, RetryPolicy::default());
        let calls = AtomicUsize::new(0);
        let started = Instant::now();

        let err = executor.execute(failing(&calls), |_| {}).await.unwrap_err();

        assert!(matches!(
            err,
            ExecutionError::CircuitOpen {
                state: CircuitState::Open,
                attempts: 1,
                ..
            }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_fails_fast_without_sleeping() {
        let executor = executor(1, RetryPolicy::default());
        executor.breaker().force_state(CircuitState::Open);
        let calls = AtomicUsize::new(0);
        let started = Instant::now();

        let err = executor.execute(failing(&calls), |_| {}).await.unwrap_err();

        assert!(matches!(err, ExecutionError::CircuitOpen { attempts: 0, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_whole_loop() {
        let executor = executor(10, RetryPolicy::default());
        let calls = AtomicUsize::new(0);
        let deadline = Instant::now() + Duration::from_millis(2500);

        let err = executor
            .execute_until(Some(deadline), failing(&calls), |_| {})
            .await
            .unwrap_err();

        // attempts at t=0 and t=1s; the 2s backoff crosses the deadline
        assert!(matches!(err, ExecutionError::DeadlineExceeded { attempts: 2 }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_in_flight_probe() {
        let executor = executor(1, RetryPolicy::no_retry());
        executor.breaker().force_state(CircuitState::HalfOpen);
        let deadline = Instant::now() + Duration::from_millis(100);

        let err = executor
            .execute_until(
                Some(deadline),
                |_| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok::<_, OperationError>(())
                },
                |_| {},
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::DeadlineExceeded { attempts: 1 }));
        let stats = executor.breaker().stats();
        assert_eq!(stats.state, CircuitState::HalfOpen);
        assert_eq!(stats.half_open_success_count, 0);
        assert!(executor.breaker().can_attempt());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_latency_reported() {
        let executor = executor(10, RetryPolicy::default());
        let mut latencies = Vec::new();

        executor
            .execute(
                |_| async {
                    tokio::time::sleep(Duration::from_millis(250)).await;
                    Ok::<_, OperationError>(())
                },
                |report| latencies.push(report.latency_ms),
            )
            .await
            .unwrap();

        assert_eq!(latencies.len(), 1);
        assert!(latencies[0] >= 250.0);
    }

    proptest! {
        #[test]
        fn attempts_never_exceed_policy(max_retries in 0u32..6, threshold in 1u32..10) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();

            let calls = AtomicUsize::new(0);
            let policy = RetryPolicy { max_retries, initial_backoff_ms: 10, ..RetryPolicy::default() };
            let executor = executor(threshold, policy);
            let result = runtime.block_on(executor.execute(failing(&calls), |_| {}));

            let calls = calls.load(Ordering::SeqCst) as u32;
            prop_assert!(result.is_err());
            prop_assert!(calls <= max_retries + 1);
            prop_assert_eq!(calls, (max_retries + 1).min(threshold));
        }
    }
}

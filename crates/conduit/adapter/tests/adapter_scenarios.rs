//! End-to-end behavior of a shared service adapter under failures,
//! expiry, consent denial and deadlines.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use conduit_adapter::{
    AdapterConfig, AdapterError, DenyAllConsentGate, InvocationRequest, ServiceAdapter,
};
use conduit_resilience::{CircuitState, OperationError, RetryPolicy};
use conduit_telemetry::{TelemetryRecord, TelemetrySinkConfig};
use conduit_types::{CapabilityToken, Clock, ErrorKind, ManualClock, PrincipalId, ServiceProfile};
use proptest::prelude::*;

fn gmail_adapter(clock: Arc<ManualClock>, retry: RetryPolicy) -> ServiceAdapter {
    let mut config = AdapterConfig::for_service("gmail");
    config.resilience.retry = retry;
    ServiceAdapter::builder(ServiceProfile::gmail())
        .config(config)
        .clock(clock)
        .build()
        .expect("adapter should build")
}

fn alice_token(clock: &ManualClock) -> CapabilityToken {
    CapabilityToken::builder()
        .principal("alice")
        .audience("gmail")
        .scopes(["list", "read"])
        .ttl_seconds(3600)
        .issued_at(clock.now())
        .build()
        .expect("token should build")
}

fn list_request() -> InvocationRequest {
    InvocationRequest::new(PrincipalId::new("alice"), "list_messages")
}

async fn call_counted(
    adapter: &ServiceAdapter,
    token: &CapabilityToken,
    calls: &AtomicU32,
    fail: bool,
) -> Result<(), AdapterError> {
    adapter
        .invoke(list_request(), token, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if fail {
                    Err(OperationError::network("connection reset"))
                } else {
                    Ok(())
                }
            }
        })
        .await
}

#[tokio::test]
async fn breaker_opens_fails_fast_and_recovers_through_probes() {
    let clock = Arc::new(ManualClock::starting_now());
    let adapter = gmail_adapter(clock.clone(), RetryPolicy::no_retry());
    let token = alice_token(&clock);
    let calls = AtomicU32::new(0);

    for _ in 0..5 {
        let err = call_counted(&adapter, &token, &calls, true)
            .await
            .expect_err("upstream is failing");
        assert!(matches!(err, AdapterError::MaxRetriesExceeded { attempts: 1, .. }));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert_eq!(adapter.circuit_breaker().state(), CircuitState::Open);

    let err = call_counted(&adapter, &token, &calls, false)
        .await
        .expect_err("breaker must fail fast");
    assert!(matches!(
        err,
        AdapterError::CircuitOpen {
            state: CircuitState::Open,
            attempts: 0,
            ..
        }
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 5, "operation must not run");

    clock.advance_secs(61);
    call_counted(&adapter, &token, &calls, false)
        .await
        .expect("probe should be admitted");
    assert_eq!(calls.load(Ordering::SeqCst), 6);
    assert_eq!(adapter.circuit_breaker().state(), CircuitState::HalfOpen);

    for _ in 0..2 {
        call_counted(&adapter, &token, &calls, false)
            .await
            .expect("half-open probe should succeed");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 8);
    assert_eq!(adapter.circuit_breaker().state(), CircuitState::Closed);
    assert_eq!(adapter.circuit_breaker().stats().failure_count, 0);

    let health = adapter.health_status();
    assert_eq!(health.request_count, 9);
    assert_eq!(health.success_count, 3);
    assert_eq!(health.failures_of(ErrorKind::MaxRetriesExceeded), 5);
    assert_eq!(health.failures_of(ErrorKind::CircuitOpen), 1);
    assert!(!health.is_service_down());
}

#[tokio::test]
async fn expired_token_never_reaches_the_operation() {
    let clock = Arc::new(ManualClock::starting_now());
    let adapter = gmail_adapter(clock.clone(), RetryPolicy::default());
    let token = alice_token(&clock);
    let calls = AtomicU32::new(0);

    clock.advance_secs(3601);
    let err = call_counted(&adapter, &token, &calls, false)
        .await
        .expect_err("token is expired");

    assert!(err.requires_reauthorization());
    assert_eq!(err.kind(), ErrorKind::Authorization);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(adapter.circuit_breaker().stats().failure_count, 0);

    let health = adapter.health_status();
    assert_eq!(health.failures_of(ErrorKind::Authorization), 1);
    assert_eq!(health.circuit_state, CircuitState::Closed);
}

#[tokio::test]
async fn wrong_audience_is_rejected() {
    let clock = Arc::new(ManualClock::starting_now());
    let adapter = gmail_adapter(clock.clone(), RetryPolicy::default());
    let token = CapabilityToken::builder()
        .principal("alice")
        .audience("dropbox")
        .scope("list")
        .ttl_seconds(60)
        .build()
        .expect("token should build");

    let err = adapter
        .invoke(list_request(), &token, |_| async { Ok::<_, OperationError>(()) })
        .await
        .expect_err("token is for another service");
    assert!(matches!(err, AdapterError::Authorization { .. }));
}

#[tokio::test(start_paused = true)]
async fn deadline_bounds_the_whole_retry_loop() {
    let clock = Arc::new(ManualClock::starting_now());
    let adapter = gmail_adapter(clock.clone(), RetryPolicy::default());
    let token = alice_token(&clock);
    let calls = AtomicU32::new(0);

    // Attempts run at 0s and 1s; the next backoff ends at 3s.
    let request = list_request().timeout(Duration::from_millis(2500));
    let err = adapter
        .invoke(request, &token, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(OperationError::timeout("upstream slow")) }
        })
        .await
        .expect_err("deadline should expire");

    match err {
        AdapterError::DeadlineExceeded { attempts, .. } => assert_eq!(attempts, 2),
        other => panic!("expected deadline error, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(adapter.circuit_breaker().stats().failure_count, 2);
    assert_eq!(
        adapter.health_status().failures_of(ErrorKind::DeadlineExceeded),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn abandoned_attempt_does_not_count_against_breaker() {
    let clock = Arc::new(ManualClock::starting_now());
    let adapter = gmail_adapter(clock.clone(), RetryPolicy::default());
    let token = alice_token(&clock);

    let request = list_request().timeout(Duration::from_secs(1));
    let err = adapter
        .invoke(request, &token, |_| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, OperationError>(())
        })
        .await
        .expect_err("operation outlives the deadline");

    assert!(matches!(err, AdapterError::DeadlineExceeded { attempts: 1, .. }));
    let stats = adapter.circuit_breaker().stats();
    assert_eq!(stats.failure_count, 0);
    assert_eq!(stats.state, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn only_one_half_open_probe_at_a_time() {
    let clock = Arc::new(ManualClock::starting_now());
    let adapter = gmail_adapter(clock.clone(), RetryPolicy::no_retry());
    let token = alice_token(&clock);

    for _ in 0..5 {
        adapter.circuit_breaker().record_failure();
    }
    clock.advance_secs(61);

    let slow_probe = adapter.invoke(list_request(), &token, |_| async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok::<_, OperationError>("probe")
    });
    let competitor = adapter.invoke(list_request(), &token, |_| async {
        Ok::<_, OperationError>("competitor")
    });
    let (probe, competitor) = tokio::join!(slow_probe, competitor);

    assert_eq!(probe.expect("probe is admitted"), "probe");
    assert!(matches!(
        competitor,
        Err(AdapterError::CircuitOpen {
            state: CircuitState::HalfOpen,
            ..
        })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shared_adapter_serves_concurrent_callers() {
    let clock = Arc::new(ManualClock::starting_now());
    let adapter = Arc::new(gmail_adapter(clock.clone(), RetryPolicy::no_retry()));
    let token = alice_token(&clock);

    let mut handles = Vec::new();
    for i in 0..64u32 {
        let adapter = adapter.clone();
        let token = token.clone();
        handles.push(tokio::spawn(async move {
            adapter
                .invoke(
                    list_request().context("caller", i),
                    &token,
                    |_| async move { Ok::<_, OperationError>(i) },
                )
                .await
        }));
    }

    let mut total = 0;
    for handle in handles {
        total += handle.await.expect("task panicked").expect("call succeeds");
    }

    assert_eq!(total, (0..64).sum::<u32>());
    let health = adapter.health_status();
    assert_eq!(health.request_count, 64);
    assert_eq!(health.success_rate, 1.0);
    assert_eq!(health.unique_tokens_used, 1);
}

#[tokio::test]
async fn health_snapshot_separates_outage_from_bad_tokens() {
    let clock = Arc::new(ManualClock::starting_now());
    let adapter = gmail_adapter(clock.clone(), RetryPolicy::no_retry());
    let token = alice_token(&clock);
    let stale = CapabilityToken::builder()
        .principal("alice")
        .audience("gmail")
        .scope("list")
        .ttl_seconds(1)
        .issued_at(clock.now() - chrono::Duration::seconds(10))
        .build()
        .expect("token should build");

    for _ in 0..10 {
        let _ = adapter
            .invoke(list_request(), &stale, |_| async { Ok::<_, OperationError>(()) })
            .await;
    }
    let health = adapter.health_status();
    assert_eq!(health.failures_of(ErrorKind::Authorization), 10);
    assert!(!health.is_service_down());

    for _ in 0..5 {
        let _ = adapter
            .invoke(list_request(), &token, |_| async {
                Err::<(), _>(OperationError::status(503, "unavailable"))
            })
            .await;
    }
    let health = adapter.health_status();
    assert!(health.is_service_down());
    assert_eq!(health.consecutive_failures, 5);

    let json = serde_json::to_value(&health).expect("snapshot serializes");
    assert_eq!(json["circuit_state"], "open");
    assert_eq!(json["failures_by_kind"]["authorization"], 10);
}

#[tokio::test]
async fn adapter_from_config_writes_json_lines() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("audit").join("gmail.jsonl");

    let mut config = AdapterConfig::for_service("gmail");
    config.telemetry.sink = TelemetrySinkConfig::JsonLines { path: path.clone() };
    let adapter = ServiceAdapter::from_config(config)
        .await
        .expect("adapter should build");

    let token = CapabilityToken::builder()
        .principal("alice")
        .audience("gmail")
        .scope("list")
        .ttl_seconds(60)
        .build()
        .expect("token should build");
    adapter
        .invoke(list_request(), &token, |_| async { Ok::<_, OperationError>(()) })
        .await
        .expect("call succeeds");
    adapter.flush_telemetry().await;

    let contents = std::fs::read_to_string(&path).expect("log written");
    let records: Vec<TelemetryRecord> = contents
        .lines()
        .map(|line| serde_json::from_str(line).expect("valid record"))
        .collect();
    assert_eq!(records.len(), 1);
    assert!(records[0].success());
    assert_eq!(records[0].action(), "list_messages");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn consent_denials_never_move_the_breaker(prior_failures in 0u32..5, denials in 1usize..20) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");

        runtime.block_on(async {
            let clock = Arc::new(ManualClock::starting_now());
            let adapter = ServiceAdapter::builder(ServiceProfile::gmail())
                .clock(clock.clone())
                .consent_gate(Arc::new(DenyAllConsentGate))
                .build()
                .expect("adapter should build");
            let token = alice_token(&clock);

            for _ in 0..prior_failures {
                adapter.circuit_breaker().record_failure();
            }
            let before = adapter.circuit_breaker().stats();

            for _ in 0..denials {
                let err = adapter
                    .invoke(list_request(), &token, |_| async { Ok::<_, OperationError>(()) })
                    .await
                    .expect_err("consent is denied");
                prop_assert_eq!(err.kind(), ErrorKind::ConsentDenied);
            }

            let after = adapter.circuit_breaker().stats();
            prop_assert_eq!(before.state, after.state);
            prop_assert_eq!(before.failure_count, after.failure_count);
            prop_assert_eq!(adapter.health_status().failures_of(ErrorKind::ConsentDenied), denials as u64);
            Ok(())
        })?;
    }
}

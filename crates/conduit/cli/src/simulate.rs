//! Seeded simulation of an adapter against a flaky upstream.
//!
//! Wall time is simulated with a [`ManualClock`] advanced between requests,
//! so breaker recovery and token expiry play out without waiting. Retry
//! backoff still sleeps, scaled down by `--backoff-ms`.

use std::collections::BTreeMap;
use std::sync::Arc;

use clap::Args;
use conduit_adapter::{AdapterConfig, AdapterHealthSnapshot, ServiceAdapter};
use conduit_resilience::OperationError;
use conduit_telemetry::create_sink;
use conduit_types::{CapabilityToken, Clock, ManualClock, PrincipalId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::info;

use crate::error::{CliError, CliResult};

/// Options for `conduit simulate`.
#[derive(Debug, Clone, Args)]
pub struct SimulateArgs {
    /// Service to simulate (defaults to the configured service)
    #[arg(short, long)]
    pub service: Option<String>,

    /// Number of invocations
    #[arg(short = 'n', long, default_value_t = 100)]
    pub requests: u32,

    /// Probability that a single upstream attempt fails
    #[arg(short = 'f', long, default_value_t = 0.2, value_parser = parse_probability)]
    pub failure_rate: f64,

    /// Random seed
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Number of distinct principals making calls
    #[arg(long, default_value_t = 3)]
    pub principals: u32,

    /// Simulated time between requests in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub interval_ms: u64,

    /// Initial retry backoff used by the simulation in milliseconds
    #[arg(long, default_value_t = 5)]
    pub backoff_ms: u64,

    /// Lifetime of the simulated principals' tokens in seconds
    #[arg(long, default_value_t = 3600)]
    pub token_ttl_secs: u64,
}

/// What a simulation run produced.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub service: String,
    pub requests: u32,
    pub failure_rate: f64,
    pub seed: u64,
    /// Count of invocation outcomes, `ok` or an error kind.
    pub outcomes: BTreeMap<String, u64>,
    pub health: AdapterHealthSnapshot,
}

fn parse_probability(value: &str) -> Result<f64, String> {
    let rate: f64 = value
        .parse()
        .map_err(|e| format!("not a number: {e}"))?;
    if (0.0..=1.0).contains(&rate) {
        Ok(rate)
    } else {
        Err(format!("{rate} is not between 0 and 1"))
    }
}

/// Run the simulation described by `args` on top of `config`.
pub async fn run(mut config: AdapterConfig, args: &SimulateArgs) -> CliResult<SimulationReport> {
    if let Some(service) = &args.service {
        config.service = service.clone();
    }
    if args.principals == 0 {
        return Err(CliError::InvalidArgument("principals must be positive".into()));
    }
    config.resilience.retry.initial_backoff_ms = args.backoff_ms;

    let profile = config.profile();
    let actions: Vec<String> = profile.actions.keys().cloned().collect();
    if actions.is_empty() {
        return Err(CliError::InvalidArgument(format!(
            "service {} has no actions; configure some under `actions`",
            profile.name
        )));
    }

    let clock = Arc::new(ManualClock::starting_now());
    let sink = create_sink(&config.telemetry.sink)
        .await
        .map_err(conduit_adapter::ConfigError::from)?;
    let mut builder = ServiceAdapter::builder(profile.clone())
        .config(config)
        .clock(clock.clone());
    if let Some(sink) = sink {
        builder = builder.telemetry_sink(sink);
    }
    let adapter = builder.build()?;

    let tokens = (0..args.principals)
        .map(|i| {
            CapabilityToken::builder()
                .principal(format!("user-{i}").as_str())
                .audience(profile.name.clone())
                .scopes(profile.actions.values().cloned())
                .ttl_seconds(args.token_ttl_secs)
                .issued_at(clock.now())
                .build()
        })
        .collect::<Result<Vec<_>, _>>()?;

    info!(
        service = %profile.name,
        requests = args.requests,
        failure_rate = args.failure_rate,
        seed = args.seed,
        "Starting simulation"
    );

    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut outcomes: BTreeMap<String, u64> = BTreeMap::new();

    for _ in 0..args.requests {
        let token = &tokens[rng.gen_range(0..tokens.len())];
        let action = &actions[rng.gen_range(0..actions.len())];
        let principal = PrincipalId::new(token.principal_id().as_str());

        let result = adapter
            .invoke_action(principal, action, token, |_| {
                let outcome = flaky_upstream(&mut rng, args.failure_rate);
                async move { outcome }
            })
            .await;

        let label = match result {
            Ok(()) => "ok".to_string(),
            Err(error) => error.kind().as_str().to_string(),
        };
        *outcomes.entry(label).or_default() += 1;

        clock.advance(chrono::Duration::milliseconds(
            i64::try_from(args.interval_ms).unwrap_or(i64::MAX),
        ));
    }

    adapter.flush_telemetry().await;
    let health = adapter.health_status();
    info!(
        service = %health.service,
        circuit_state = %health.circuit_state,
        success_rate = health.success_rate,
        "Simulation finished"
    );

    Ok(SimulationReport {
        service: health.service.clone(),
        requests: args.requests,
        failure_rate: args.failure_rate,
        seed: args.seed,
        outcomes,
        health,
    })
}

fn flaky_upstream(rng: &mut StdRng, failure_rate: f64) -> Result<(), OperationError> {
    if !rng.gen_bool(failure_rate) {
        return Ok(());
    }
    Err(match rng.gen_range(0..3) {
        0 => OperationError::network("connection reset by peer"),
        1 => OperationError::timeout("upstream did not answer"),
        _ => OperationError::status(503, "service unavailable"),
    })
}

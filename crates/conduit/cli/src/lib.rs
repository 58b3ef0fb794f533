//! Conduit CLI
//!
//! Operator tooling for conduit adapters:
//! - print the effective layered configuration
//! - run a seeded simulation of an adapter against a flaky upstream and
//!   report its health snapshot

use std::ffi::OsString;

use clap::{Parser, Subcommand};
use conduit_adapter::AdapterConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod error;
pub mod simulate;

pub use error::{CliError, CliResult};
use simulate::SimulateArgs;

/// Conduit CLI
#[derive(Debug, Parser)]
#[command(name = "conduit")]
#[command(about = "Conduit - Resilient third-party service adapters", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CONDUIT_CONFIG", global = true)]
    config: Option<String>,

    /// Log level
    #[arg(long, env = "CONDUIT_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "CONDUIT_LOG_JSON", global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Debug, Subcommand)]
enum Commands {
    /// Show the effective configuration as JSON
    Config,

    /// Drive an adapter against a simulated flaky upstream
    Simulate(SimulateArgs),
}

/// Run using the current process arguments.
pub async fn run() -> CliResult<()> {
    run_with_args(std::env::args_os()).await
}

/// Run using the provided argument iterator.
pub async fn run_with_args<I, T>(args: I) -> CliResult<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_tracing(&cli);

    let output = execute(cli).await?;
    println!("{output}");
    Ok(())
}

/// Execute a parsed command and return what it prints.
pub async fn execute(cli: Cli) -> CliResult<String> {
    let config = AdapterConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Config => Ok(serde_json::to_string_pretty(&config)?),
        Commands::Simulate(args) => {
            let report = simulate::run(config, &args).await?;
            Ok(serde_json::to_string_pretty(&report)?)
        }
    }
}

fn init_tracing(cli: &Cli) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cli.log_level.clone().into());

    // Logs go to stderr so stdout stays machine readable.
    let result = if cli.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    if let Err(error) = result {
        eprintln!("tracing already initialized: {error}");
    }
}

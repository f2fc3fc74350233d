//! Yieldflow Optimizer - Main entry point
//!
//! Runs a single optimization, a continuous loop, or prints the efficient frontier.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Arg, ArgAction, Command};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use yieldflow_dataplane::{CachedMetricsSource, MetricsSource, SourceMode, StaticMetricsSource};
use yieldflow_optimizer::{
    OptimizationMethod, OptimizationOrchestrator, OptimizerConfig, RiskTolerance, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let matches = Command::new("optimizer")
        .version(VERSION)
        .about("Yieldflow Optimizer - yield strategy allocation")
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("Run mode (optimize, continuous, frontier)")
                .value_parser(["optimize", "continuous", "frontier"])
                .default_value("optimize"),
        )
        .arg(
            Arg::new("amount")
                .short('a')
                .long("amount")
                .value_name("AMOUNT")
                .help("Amount to allocate")
                .value_parser(clap::value_parser!(f64))
                .default_value("10000"),
        )
        .arg(
            Arg::new("risk")
                .short('r')
                .long("risk")
                .value_name("TOLERANCE")
                .help("Risk tolerance (conservative, moderate, aggressive)")
                .default_value("moderate"),
        )
        .arg(
            Arg::new("method")
                .long("method")
                .value_name("METHOD")
                .help("Optimization method (max_sharpe, min_variance, risk_parity, mean_variance)"),
        )
        .arg(
            Arg::new("interval-hours")
                .long("interval-hours")
                .value_name("HOURS")
                .help("Hours between cycles in continuous mode")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("points")
                .long("points")
                .value_name("N")
                .help("Efficient frontier points (5-50)")
                .value_parser(clap::value_parser!(usize))
                .default_value("20"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("OUTPUT")
                .help("Generate example config and exit"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)")
                .default_value("info"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Emit logs as JSON")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    // Initialize logging
    let log_level = matches
        .get_one::<String>("log-level")
        .map(String::as_str)
        .unwrap_or("info");
    init_logging(log_level, matches.get_flag("json-logs"));

    // Handle config generation
    if let Some(output_path) = matches.get_one::<String>("generate-config") {
        OptimizerConfig::default().save_to_file(output_path)?;
        info!("Generated example config at: {}", output_path);
        return Ok(());
    }

    info!(version = VERSION, "Yieldflow Optimizer starting...");

    // Load configuration
    let config = match matches.get_one::<String>("config") {
        Some(config_path) => {
            info!("Loading config from: {}", config_path);
            OptimizerConfig::from_file(config_path)
                .with_context(|| format!("failed to load config from {}", config_path))?
        }
        None => OptimizerConfig::from_env_and_file().context("failed to load config")?,
    };

    let amount = matches.get_one::<f64>("amount").copied().unwrap_or(10_000.0);
    let risk_tolerance: RiskTolerance = matches
        .get_one::<String>("risk")
        .map(String::as_str)
        .unwrap_or("moderate")
        .parse()?;
    let method = matches
        .get_one::<String>("method")
        .map(|m| m.parse::<OptimizationMethod>())
        .transpose()?;

    // Build the metrics source
    let source: Arc<dyn MetricsSource> = match config.dataplane.mode {
        SourceMode::Static => {
            warn!("Using built-in reference strategies");
            Arc::new(
                CachedMetricsSource::with_ttl(
                    StaticMetricsSource::with_default_strategies(),
                    config.dataplane.cache_ttl(),
                )
                .with_retry(config.dataplane.retry_config())
                .with_timeout(config.dataplane.request_timeout()),
            )
        }
        SourceMode::Rpc => {
            error!(
                endpoint = %config.dataplane.rpc_endpoint,
                "RPC mode requires a chain metrics source, none is linked into this binary"
            );
            bail!("RPC metrics source not available");
        }
    };

    let orchestrator = Arc::new(OptimizationOrchestrator::new(config.clone(), source));
    orchestrator.initialize()?;

    let mode = matches
        .get_one::<String>("mode")
        .map(String::as_str)
        .unwrap_or("optimize");

    match mode {
        "optimize" => {
            let result = orchestrator.run_optimization(amount, risk_tolerance, method).await?;
            println!("{}", serde_json::to_string_pretty(&*result)?);
        }
        "frontier" => {
            let points = matches.get_one::<usize>("points").copied().unwrap_or(20);
            let frontier = orchestrator.generate_efficient_frontier(points).await?;
            println!("{}", serde_json::to_string_pretty(&frontier)?);
        }
        "continuous" => {
            let hours = matches
                .get_one::<u64>("interval-hours")
                .copied()
                .unwrap_or(config.optimization.rebalance_interval_hours);
            let interval = Duration::from_secs(hours * 3600);

            let runner = Arc::clone(&orchestrator);
            let mut handle =
                tokio::spawn(async move { runner.run_continuous(amount, risk_tolerance, interval).await });

            tokio::select! {
                joined = &mut handle => {
                    joined??;
                    info!("Continuous loop stopped");
                }
                _ = setup_shutdown_signal() => {
                    info!("Shutdown signal received");
                    orchestrator.shutdown().await;
                    handle.await??;
                }
            }
        }
        other => bail!("Unknown mode: {}", other),
    }

    let (state, last) = orchestrator.snapshot();
    info!(
        optimizations = state.optimization_count,
        errors = state.error_count,
        last_run = ?last.as_ref().map(|r| r.run_id),
        "Final optimizer state"
    );
    if state.is_running {
        orchestrator.shutdown().await;
    }
    info!("Yieldflow Optimizer stopped");
    Ok(())
}

/// Initialize logging
fn init_logging(log_level: &str, json: bool) {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => {
            eprintln!("Invalid log level: {}. Using 'info'", log_level);
            tracing::Level::INFO
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("yieldflow_optimizer={level},yieldflow_dataplane={level},optimizer={level}").into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Set up graceful shutdown signal handling
async fn setup_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

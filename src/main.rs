use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tollgate::clock::SystemClock;
use tollgate::config::{LoggingConfig, TollgateConfig};
use tollgate::guard::RequestGuard;
use tollgate::janitor;
use tollgate::server::DecisionServer;

/// In-process request governance sidecar.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Cli {
    /// YAML configuration file; environment variables prefixed with
    /// TOLLGATE__ override it
    #[arg(short, long, env = "TOLLGATE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load and validate the configuration, then print the effective settings
    CheckConfig,
    /// Answer JSON-lines decision requests on stdin until EOF or a shutdown signal
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = TollgateConfig::load(cli.config.as_deref())?;

    init_logging(&config.logging);

    match cli.command {
        Command::CheckConfig => {
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
        Command::Serve => serve(config).await,
    }
}

/// Initialize tracing on stderr; stdout carries the decision protocol.
fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true);

    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn serve(config: TollgateConfig) -> anyhow::Result<()> {
    info!("Starting Tollgate decision server");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let clock = Arc::new(SystemClock::new());
    let guard = Arc::new(RequestGuard::from_config(&config, clock.clone()));
    info!(
        operations = config.rate_limiting.operations.len(),
        lockout_threshold = config.brute_force.lockout_threshold,
        lockout_window_secs = config.brute_force.lockout_window_seconds,
        "Request guard initialized"
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let background = config.janitor.background_interval_seconds.map(|period| {
        janitor::spawn_background(
            guard.sweep_targets(),
            clock.clone(),
            Duration::from_secs(period),
            stop_rx,
        )
    });

    let server = DecisionServer::new(guard);
    let result = server
        .serve_with_shutdown(
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
            shutdown_signal(),
        )
        .await;

    let _ = stop_tx.send(true);
    if let Some(handle) = background {
        if let Err(e) = handle.await {
            error!(error = %e, "Background janitor task failed");
        }
    }

    result?;
    info!("Tollgate decision server stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

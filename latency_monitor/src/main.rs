mod configuration;
mod server;

use anyhow::Context;
use clap::Parser;
use configuration::Configuration;
use server::{create_router, AppState};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio_icmp_latency::Monitor;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Continuous ICMP latency monitor with an HTTP query interface.
#[derive(Parser, Debug)]
#[command(name = "latency_monitor", version, about, long_about = None)]
struct Cli {
    /// JSON configuration file (default: config.json next to the executable)
    #[arg(short, long, env = "LATENCY_MONITOR_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,latency_monitor=debug,tokio_icmp_latency=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let path = match cli.config {
        Some(path) => path,
        None => Configuration::default_path()?,
    };
    tracing::info!(path = %path.display(), "Loading configuration");
    let conf = Configuration::load(&path)?;
    let monitor_config = conf.monitor_config()?;
    let address = conf.monitor_address()?;

    let mut monitor = Monitor::start(monitor_config).context("cannot start probing")?;

    let state = AppState {
        results: monitor.results(),
        destinations: monitor.destinations().count(),
    };
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("cannot bind query interface on {}", address))?;
    tracing::info!("Query interface listening on http://{}", address);

    let cancel = monitor.cancellation_token();
    let server = tokio::spawn(async move {
        axum::serve(listener, create_router(state))
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
    });

    let outcome = tokio::select! {
        res = monitor.wait() => res,
        _ = shutdown_signal() => Ok(()),
    };

    tracing::info!("Shutting down");
    let stopped = monitor.shutdown().await;
    server.await?.context("query interface failed")?;
    outcome.context("probing stopped")?;
    stopped.context("probing stopped")?;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        _ = terminate => tracing::info!("Received terminate signal"),
    }
}

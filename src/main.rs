// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - config:      Environment-driven startup configuration
// - credentials: Account name -> OAuth token resolution
// - error:       Typed startup errors
// - event:       Stream events and delivery outcomes
// - twitter:     Filtered-stream client (signing, framing, connector)
// - collector:   Stream workers and their supervisor
// - publisher:   Serialization + durable delivery to the topic
// - metrics:     Process-wide counters
//
mod collector;
mod config;
mod credentials;
mod error;
mod event;
mod logging;
mod metrics;
mod publisher;
mod twitter;
mod util;

#[cfg(test)]
mod testing;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use rustls::crypto::{CryptoProvider, ring};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use collector::supervisor::{Supervisor, WorkerBoard};
use config::Config;
use error::{ConfigError, CredentialError};
use metrics::METRICS;
use publisher::dry_run::DryRunTransport;
use publisher::kafka::KafkaTransport;
use publisher::transport::Transport;
use publisher::{Publisher, RetryPolicy};
use twitter::filter::FilterStream;

/// Startup configuration was missing or malformed; no worker started.
const EXIT_CONFIG: u8 = 1;
/// Any other startup failure (HTTP client, producer).
const EXIT_STARTUP: u8 = 2;

const METRICS_INTERVAL: Duration = Duration::from_secs(10);

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Responsibilities:
// - Initialize cryptography backend (rustls) and logging
// - Load configuration (fatal on error, before any worker starts)
// - Create the shared publisher
// - Run the supervisor until an interrupt arrives
// - Drain the publisher and exit
//
#[tokio::main]
async fn main() -> ExitCode {
    // rustls >= 0.23 requires an explicit CryptoProvider, installed
    // exactly once before any TLS connection is made.
    CryptoProvider::install_default(ring::default_provider())
        .expect("failed to install rustls CryptoProvider");

    logging::init();

    match run().await {
        Ok(()) => {
            info!("harvester stopped");
            ExitCode::SUCCESS
        }
        Err(e) if is_config_error(&e) => {
            error!("configuration error: {e:#}");
            ExitCode::from(EXIT_CONFIG)
        }
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::from(EXIT_STARTUP)
        }
    }
}

async fn run() -> anyhow::Result<()> {
    // A missing .env file is fine; the process environment is used as is.
    if let Ok(path) = dotenvy::dotenv() {
        info!("loaded environment overrides from {}", path.display());
    }

    let config = Config::from_env()?;
    info!(
        "{} harvesters, {} accounts, brokers {}",
        config.harvesters.len(),
        config.accounts.len(),
        config.producer.bootstrap_servers
    );

    let connector = Arc::new(FilterStream::new(&config.stream_url, config.app.clone())?);

    let transport: Arc<dyn Transport> = if config.dry_run {
        Arc::new(DryRunTransport::new())
    } else {
        Arc::new(KafkaTransport::new(&config.producer)?)
    };
    let publisher = Publisher::new(
        transport,
        config.producer.topic.clone(),
        RetryPolicy::from(&config.producer),
    );
    info!(
        "publishing to '{}' ({}, acks={}, {} retries)",
        publisher.topic(),
        if config.dry_run { "dry run" } else { config.producer.compression.as_str() },
        config.producer.acks.as_str(),
        config.producer.retries
    );

    let supervisor = Supervisor::new(
        config.harvesters.clone(),
        &config.accounts,
        connector,
        publisher,
        config.drain_timeout,
    )?;

    let shutdown = CancellationToken::new();
    tokio::spawn(report_metrics(supervisor.board(), shutdown.clone()));
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("interrupt received, shutting down");
            shutdown.cancel();
        }
    });

    let report = supervisor.run(shutdown).await;
    if report.flush.dropped > 0 {
        error!("{} messages were not delivered before exit", report.flush.dropped);
    }

    Ok(())
}

fn is_config_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause.downcast_ref::<ConfigError>().is_some()
            || cause.downcast_ref::<CredentialError>().is_some()
    })
}

// ------------------------------------------------------------
// Shutdown signal
// ------------------------------------------------------------
//
// Ctrl-C everywhere, SIGTERM on unix as well.
//
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

// ------------------------------------------------------------
// Metrics reporter (periodic, low-noise)
// ------------------------------------------------------------
async fn report_metrics(board: WorkerBoard, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = sleep(METRICS_INTERVAL) => {}
        }

        match serde_json::to_string(&METRICS.snapshot()) {
            Ok(line) => info!("[METRICS] {line}"),
            Err(e) => error!("failed to render metrics: {e}"),
        }

        let workers: Vec<String> = board
            .snapshot()
            .iter()
            .map(|w| format!("{}#{}={:?}", w.config.label, w.generation, w.status))
            .collect();
        info!("[WORKERS] {}/{} active: {}", board.active(), workers.len(), workers.join(" "));
    }
}

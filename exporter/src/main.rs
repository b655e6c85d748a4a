//! Queue Exporter
//!
//! Reads the configured queue table every interval and serves its state as
//! Prometheus gauges. The metrics endpoint only starts once the database is
//! reachable.

use anyhow::{Context, Result};
use clap::Parser;
use queue_exporter::config::{Args, ExporterConfig, LogFormat};
use queue_exporter::controller::wait_for_signal;
use queue_exporter::reader::postgres::PgConnector;
use queue_exporter::{report, Controller, PollSettings, QueueMetrics};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ExporterConfig::resolve(&args, |key| std::env::var(key).ok());

    let debug = config.as_ref().is_ok_and(|c| c.verbosity.is_debug());
    init_tracing(args.log_format(), debug);

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            // A new pod gets a chance to fix the environment
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    report::started(env!("CARGO_PKG_VERSION"));
    tracing::debug!("Configuration: {:?}", config);

    let metrics = Arc::new(
        QueueMetrics::new(config.metric_prefix.as_deref()).context("Failed to register metrics")?,
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(name) => {
                report::shutdown_requested(name);
                signal_token.cancel();
            }
            Err(e) => tracing::error!("Signal handling unavailable: {:#}", e),
        }
    });

    let connector = PgConnector::new(&config.database, &config.table);
    Controller::new(connector, metrics, PollSettings::from(&config), shutdown)
        .run()
        .await
}

/// Initialize tracing/logging
fn init_tracing(format: LogFormat, debug: bool) {
    // Debug output stays limited to the exporter; sqlx logs every statement at debug
    let default_filter = if debug { "info,queue_exporter=debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
            .init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init(),
    }
}

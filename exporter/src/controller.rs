//! Poll loop
//!
//! Connects to the data store (retrying forever), starts the admin endpoint,
//! then reads, aggregates and publishes one snapshot per interval until
//! shutdown is requested.

use crate::aggregate::aggregate_with;
use crate::config::{ExporterConfig, Verbosity};
use crate::metrics::{CycleOutcome, QueueMetrics};
use crate::reader::{Connector, ReaderError, SnapshotReader};
use crate::report::{self, DebugObserver};
use crate::retry::retry_until_ok;
use crate::server::http::spawn_admin;
use anyhow::{Context, Result};
use queue_exporter_shared::utils::time::system_time_secs;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Delay between connection attempts.
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Lifecycle of the exporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Disconnected,
    Connected,
    Polling,
    Terminating,
}

/// Settings the poll loop needs from the configuration.
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub table: String,
    pub interval: Duration,
    pub connect_retry_delay: Duration,
    pub verbosity: Verbosity,
    pub metrics_addr: SocketAddr,
}

impl From<&ExporterConfig> for PollSettings {
    fn from(config: &ExporterConfig) -> Self {
        Self {
            table: config.table.to_string(),
            interval: config.interval,
            connect_retry_delay: CONNECT_RETRY_DELAY,
            verbosity: config.verbosity,
            metrics_addr: config.metrics_addr,
        }
    }
}

pub struct Controller<C: Connector> {
    connector: C,
    metrics: Arc<QueueMetrics>,
    settings: PollSettings,
    state: watch::Sender<ControllerState>,
    shutdown: CancellationToken,
    /// Epoch seconds used as "now" for each snapshot
    clock: fn() -> i64,
}

impl<C: Connector> Controller<C> {
    pub fn new(
        connector: C,
        metrics: Arc<QueueMetrics>,
        settings: PollSettings,
        shutdown: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(ControllerState::Disconnected);
        Self {
            connector,
            metrics,
            settings,
            state,
            shutdown,
            clock: system_time_secs,
        }
    }

    /// Replace the wall clock, for deterministic snapshots.
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    /// Follow state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ControllerState> {
        self.state.subscribe()
    }

    fn transition(&self, next: ControllerState) {
        let previous = self.state.send_replace(next);
        tracing::debug!(from = ?previous, to = ?next, "Controller state changed");
    }

    /// Run until shutdown is requested.
    ///
    /// Only fails when the admin endpoint cannot be started.
    pub async fn run(self) -> Result<()> {
        self.transition(ControllerState::Disconnected);

        let target = self.connector.describe();
        let delay = self.settings.connect_retry_delay;
        let connected = retry_until_ok(
            delay,
            &self.shutdown,
            || self.connector.connect(),
            |_, err: &ReaderError| report::connect_failed(&target, err, delay),
        )
        .await;

        let Some(mut reader) = connected else {
            self.transition(ControllerState::Terminating);
            return Ok(());
        };
        report::connected(&target);
        self.transition(ControllerState::Connected);

        // Serving only once connected makes the endpoint a readiness signal
        let server = spawn_admin(
            self.settings.metrics_addr,
            self.metrics.clone(),
            self.state.subscribe(),
            self.shutdown.clone(),
        );
        let (addr, server) = match server {
            Ok(started) => started,
            Err(e) => {
                self.transition(ControllerState::Terminating);
                if let Err(close_err) = reader.close().await {
                    tracing::warn!("Failed to close database connection: {}", close_err);
                }
                return Err(e).context("Failed to start metrics endpoint");
            }
        };
        report::metrics_listening(&addr);
        self.transition(ControllerState::Polling);

        loop {
            // Sleeping first leaves time for a replaced pod to release the ingress
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.settings.interval) => {}
            }
            self.poll_once(&mut reader).await;
        }

        self.transition(ControllerState::Terminating);
        if let Err(e) = reader.close().await {
            tracing::warn!("Failed to close database connection: {}", e);
        }
        report::connection_closed();

        if let Err(e) = server.await {
            tracing::warn!("Admin HTTP server task failed: {}", e);
        }
        Ok(())
    }

    /// Read, aggregate and publish one snapshot.
    pub async fn poll_once<R: SnapshotReader>(&self, reader: &mut R) -> CycleOutcome {
        let started = Instant::now();
        let table = self.settings.table.as_str();
        let verbosity = self.settings.verbosity;
        report::reading_table(verbosity, table);

        let outcome = match reader.fetch().await {
            Ok(rows) => {
                let mut observer = DebugObserver::new(verbosity);
                let aggregation = aggregate_with(&rows, (self.clock)(), &mut observer);
                if let Some(halted) = &aggregation.halted {
                    report::future_start(halted);
                }
                if let Err(e) = self.metrics.publish(&aggregation) {
                    report::publish_failed(&e);
                }
                report::histogram_summary(verbosity, &aggregation);
                report::cycle_summary(table, &aggregation);

                if aggregation.halted.is_some() {
                    CycleOutcome::Halted
                } else {
                    CycleOutcome::Ok
                }
            }
            Err(e) => {
                report::fetch_failed(table, &e);
                CycleOutcome::FetchError
            }
        };

        self.metrics.observe_cycle(outcome, started.elapsed());
        outcome
    }
}

/// Wait for SIGINT, SIGQUIT or SIGTERM and return its name.
#[cfg(unix)]
pub async fn wait_for_signal() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt()).context("Install SIGINT handler")?;
    let mut quit = signal(SignalKind::quit()).context("Install SIGQUIT handler")?;
    let mut terminate = signal(SignalKind::terminate()).context("Install SIGTERM handler")?;

    let name = tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = quit.recv() => "SIGQUIT",
        _ = terminate.recv() => "SIGTERM",
    };
    Ok(name)
}

/// Wait for Ctrl-C and return its name.
#[cfg(not(unix))]
pub async fn wait_for_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c().await.context("Install Ctrl-C handler")?;
    Ok("Ctrl-C")
}

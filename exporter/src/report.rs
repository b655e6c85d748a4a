//! Operational events.
//!
//! Every event is emitted via `tracing` with a dedicated target so log
//! pipelines can pick them out. Debug events are additionally gated by the
//! configured [`Verbosity`] bitmask.

use crate::aggregate::{Aggregation, AggregationObserver, HaltedRow};
use crate::config::Verbosity;
use queue_exporter_shared::utils::time::millis_to_rfc3339;
use queue_exporter_shared::{JobStatus, QueueRow};
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const EVENT_TARGET: &str = "queue_exporter::events";

pub fn started(version: &str) {
    info!(target: EVENT_TARGET, event = "started", version, "Started version {}", version);
}

pub fn connected(target: &str) {
    info!(
        target: EVENT_TARGET,
        event = "db_connected",
        "Connected to database {}", target
    );
}

pub fn connect_failed(target: &str, err: &dyn std::fmt::Display, retry_in: Duration) {
    error!(
        target: EVENT_TARGET,
        event = "db_connect_failed",
        error = %err,
        retry_in_secs = retry_in.as_secs(),
        "Failed to connect to database {}: {}", target, err
    );
}

pub fn metrics_listening(addr: &std::net::SocketAddr) {
    info!(
        target: EVENT_TARGET,
        event = "metrics_listening",
        addr = %addr,
        "Serving metrics on {}", addr
    );
}

/// Summary of one successful cycle, with per-status totals.
pub fn cycle_summary(table: &str, aggregation: &Aggregation) {
    let total = aggregation.counts.total();
    let noun = if total == 1 { "row" } else { "rows" };
    info!(
        target: EVENT_TARGET,
        event = "cycle",
        table,
        total,
        completed = aggregation.counts.status_total(&JobStatus::Completed),
        failed = aggregation.counts.status_total(&JobStatus::Failed),
        in_progress = aggregation.counts.status_total(&JobStatus::InProgress),
        unrecognized = aggregation.unrecognized_total(),
        "Read {} {} from queue({}).", total, noun, table
    );
}

pub fn future_start(halted: &HaltedRow) {
    let row = &halted.row;
    warn!(
        target: EVENT_TARGET,
        event = "future_start_time",
        index = %row.index,
        requesturi = %row.request_uri,
        status = %row.status,
        starttime = row.start_time_ms,
        skipped_from = halted.position as u64,
        "Queue entry has future start time index:{} requesturi:{} status:{} starttime:{} ({})",
        row.index,
        row.request_uri,
        row.status,
        row.start_time_ms,
        millis_to_rfc3339(row.start_time_ms)
    );
}

pub fn fetch_failed(table: &str, err: &dyn std::fmt::Display) {
    error!(
        target: EVENT_TARGET,
        event = "fetch_failed",
        table,
        error = %err,
        "Failed to read queue({}): {}", table, err
    );
}

pub fn publish_failed(err: &dyn std::fmt::Display) {
    error!(
        target: EVENT_TARGET,
        event = "publish_failed",
        error = %err,
        "Failed to publish metrics: {}", err
    );
}

/// Log admin HTTP request (metrics, health, readiness).
pub fn admin_http_request(path: &str, status: u16) {
    debug!(
        target: EVENT_TARGET,
        event = "admin_http_request",
        path = %path,
        status = %status,
    );
}

pub fn shutdown_requested(signal: &str) {
    info!(
        target: EVENT_TARGET,
        event = "signal",
        signal,
        "Received signal {}.", signal
    );
}

pub fn connection_closed() {
    info!(
        target: EVENT_TARGET,
        event = "terminating",
        "Connection closed. Terminating."
    );
}

pub fn reading_table(verbosity: Verbosity, table: &str) {
    if verbosity.enabled(Verbosity::TABLE_READS) {
        debug!(target: EVENT_TARGET, "Reading queue from table ({}).", table);
    }
}

/// One line per URI: `Histogram[uri] |count (le)|...`
pub fn histogram_summary(verbosity: Verbosity, aggregation: &Aggregation) {
    if !verbosity.enabled(Verbosity::HISTOGRAM_SUMMARY) {
        return;
    }
    for (uri, histogram) in &aggregation.histogram {
        let mut line = format!("Histogram[{}] |", uri);
        for (le, count) in histogram.iter() {
            let _ = write!(line, "{} ({})|", count, le);
        }
        debug!(target: EVENT_TARGET, "{}", line);
    }
}

/// Turns aggregation steps into debug logs according to the verbosity bits.
#[derive(Debug, Clone, Copy)]
pub struct DebugObserver {
    verbosity: Verbosity,
}

impl DebugObserver {
    pub fn new(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }
}

impl AggregationObserver for DebugObserver {
    fn row(&mut self, row: &QueueRow) {
        if self.verbosity.enabled(Verbosity::RAW_ROWS) {
            debug!(target: EVENT_TARGET, ?row, "row");
        }
    }

    fn completed(&mut self, row: &QueueRow) {
        if self.verbosity.enabled(Verbosity::COMPLETED_ROWS) {
            debug!(
                target: EVENT_TARGET,
                "index:{} requesturi:{} status:{}", row.index, row.request_uri, row.status
            );
        }
    }

    fn failed(&mut self, row: &QueueRow, elapsed_secs: i64) {
        if self.verbosity.enabled(Verbosity::FAILED_ROWS) {
            debug!(
                target: EVENT_TARGET,
                "index:{} requesturi:{} status:{} elapsed:{}",
                row.index, row.request_uri, row.status, elapsed_secs
            );
        }
    }

    fn waiting(&mut self, row: &QueueRow, elapsed_secs: i64) {
        if self.verbosity.enabled(Verbosity::WAITING_ROWS) {
            debug!(
                target: EVENT_TARGET,
                "index:{} requesturi:{} status:{} elapsed:{}",
                row.index, row.request_uri, row.status, elapsed_secs
            );
        }
    }

    fn bucketed(&mut self, row: &QueueRow, bucket: &'static str, count: u64) {
        if self.verbosity.enabled(Verbosity::BUCKETS) {
            debug!(
                target: EVENT_TARGET,
                "Histogram[{}][{}][{}] incremented to {}",
                row.request_uri, row.status, bucket, count
            );
        }
    }

    fn oldest_updated(&mut self, row: &QueueRow, elapsed_secs: i64) {
        if self.verbosity.enabled(Verbosity::OLDEST) {
            debug!(
                target: EVENT_TARGET,
                "Oldest[{}][{}] updated {}", row.request_uri, row.status, elapsed_secs
            );
        }
    }
}

//! Prometheus gauges published from each aggregation
//!
//! All series live in a dedicated registry so scrapes only expose the queue
//! state and the exporter's own cycle metrics, without process collectors.

use crate::aggregate::Aggregation;
use prometheus::{
    Encoder, GaugeVec, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::RwLock;
use std::time::Duration;
use thiserror::Error;

/// Status label used on the oldest-wait and bucket gauges.
pub const IN_PROGRESS_LABEL: &str = "InProgress";

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("encoded metrics are not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("metrics lock poisoned")]
    Poisoned,
}

/// How a poll cycle ended, for `queue_exporter_cycles_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Ok,
    Halted,
    FetchError,
}

impl CycleOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            CycleOutcome::Ok => "ok",
            CycleOutcome::Halted => "halted",
            CycleOutcome::FetchError => "fetch_error",
        }
    }
}

/// Queue gauges plus exporter self-metrics.
pub struct QueueMetrics {
    registry: Registry,

    /// Jobs by request URI and status
    jobs: GaugeVec,

    /// Longest wait of an active job, by request URI
    oldest: GaugeVec,

    /// Active jobs distributed over wait-time buckets
    buckets: GaugeVec,

    cycles: IntCounterVec,
    cycle_duration: Histogram,

    /// Held for writing while a cycle is published and for reading while a
    /// scrape gathers, so scrapes never see half of a cycle.
    cycle_lock: RwLock<()>,
}

impl QueueMetrics {
    /// Create and register all metrics.
    ///
    /// `prefix` becomes the Prometheus namespace of the queue gauges, e.g.
    /// `Some("hydro_api")` yields `hydro_api_queue_gauge`.
    pub fn new(prefix: Option<&str>) -> Result<Self, MetricsError> {
        let registry = Registry::new();
        let namespaced = |name: &str, help: &str| {
            let opts = Opts::new(name, help);
            match prefix {
                Some(ns) if !ns.is_empty() => opts.namespace(ns),
                _ => opts,
            }
        };

        let jobs = GaugeVec::new(
            namespaced("queue_gauge", "Jobs Status"),
            &["requesturi", "status"],
        )?;
        let oldest = GaugeVec::new(
            namespaced("queue_oldest", "Longest time a job is waiting in queue"),
            &["requesturi", "status"],
        )?;
        // Gauges rather than a real histogram: a histogram would count every
        // job in all buckets above its own.
        let buckets = GaugeVec::new(
            namespaced("queue_bucket", "Job queue distribution over wait time"),
            &["requesturi", "status", "le"],
        )?;

        let cycles = IntCounterVec::new(
            Opts::new("queue_exporter_cycles_total", "Poll cycles by outcome"),
            &["outcome"],
        )?;
        let cycle_duration = Histogram::with_opts(
            HistogramOpts::new(
                "queue_exporter_cycle_duration_seconds",
                "Time spent reading, aggregating and publishing one snapshot",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;

        registry.register(Box::new(jobs.clone()))?;
        registry.register(Box::new(oldest.clone()))?;
        registry.register(Box::new(buckets.clone()))?;
        registry.register(Box::new(cycles.clone()))?;
        registry.register(Box::new(cycle_duration.clone()))?;

        Ok(Self {
            registry,
            jobs,
            oldest,
            buckets,
            cycles,
            cycle_duration,
            cycle_lock: RwLock::new(()),
        })
    }

    /// Overwrite the gauges with one cycle's aggregation.
    ///
    /// Series from earlier cycles that are absent from `aggregation` keep
    /// their last value.
    pub fn publish(&self, aggregation: &Aggregation) -> Result<(), MetricsError> {
        let _guard = self.cycle_lock.write().map_err(|_| MetricsError::Poisoned)?;

        for (status, counts) in aggregation.counts.iter() {
            for (uri, count) in &counts.by_uri {
                self.jobs
                    .with_label_values(&[uri.as_str(), status.as_str()])
                    .set(*count as f64);
            }
        }

        for (uri, secs) in &aggregation.oldest_wait_secs {
            self.oldest
                .with_label_values(&[uri.as_str(), IN_PROGRESS_LABEL])
                .set(*secs as f64);
        }

        for (uri, histogram) in &aggregation.histogram {
            for (le, count) in histogram.iter() {
                self.buckets
                    .with_label_values(&[uri.as_str(), IN_PROGRESS_LABEL, le])
                    .set(count as f64);
            }
        }

        Ok(())
    }

    /// Record how a cycle ended and how long it took.
    pub fn observe_cycle(&self, outcome: CycleOutcome, elapsed: Duration) {
        self.cycles.with_label_values(&[outcome.as_str()]).inc();
        self.cycle_duration.observe(elapsed.as_secs_f64());
    }

    /// Render all metrics in the Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let families = {
            let _guard = self.cycle_lock.read().map_err(|_| MetricsError::Poisoned)?;
            self.registry.gather()
        };
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Content type of [`QueueMetrics::encode`] output.
    pub fn content_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }
}

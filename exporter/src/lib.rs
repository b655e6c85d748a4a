//! Queue exporter library
//!
//! Reads a work-queue table on a fixed interval and republishes its state as
//! Prometheus gauges: jobs per status, the longest wait of active jobs and the
//! wait-time distribution, per request URI.

pub mod aggregate;
pub mod config;
pub mod controller;
pub mod metrics;
pub mod reader;
pub mod report;
pub mod retry;
pub mod server;

pub use aggregate::{aggregate, Aggregation};
pub use controller::{Controller, ControllerState, PollSettings};
pub use metrics::QueueMetrics;

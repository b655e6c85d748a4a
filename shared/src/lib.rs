//! Shared types and utilities for the queue exporter
//!
//! This crate holds the queue row model read from the source table and small
//! helpers (clock, duration parsing) used by the exporter service.

pub mod types;
pub mod utils;

// Re-export commonly used types
pub use types::queue::*;

//! Servers exposed by the exporter

pub mod http;

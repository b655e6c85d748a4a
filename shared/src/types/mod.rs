//! Queue data types

pub mod queue;

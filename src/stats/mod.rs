//! Stream statistics

pub mod metrics;

pub use metrics::{BitrateMeter, CounterSnapshot, StreamCounters};

//! Aggregation of report rows into per-agent totals.

pub mod aggregator;

pub use aggregator::*;

//! Time-series aggregation and filtering engine for software-change records.
//!
//! The pipeline: remote report artifacts (TTL-cached, fetched once per
//! process) → option-driven filtering → calendar bucketing with
//! caller-supplied accumulators → chart-ready counter series.

pub mod aggregate;
pub mod artifacts;
pub mod cache;
pub mod calendar;
pub mod charts;
pub mod counter;
pub mod filters;
pub mod logging;
pub mod model;
pub mod state;

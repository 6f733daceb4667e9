//! Metrics for the gateway, exported in Prometheus text format.
//!
//! Uses the `metrics` crate facade; [`init_metrics`] installs the Prometheus
//! recorder once at startup and returns a handle the `/metrics` endpoint
//! renders from.

mod definitions;
mod recorder;

pub use {
    definitions::*,
    recorder::{MetricsHandle, init_metrics},
};

// Re-export the facade macros for convenience.
pub use metrics::{counter, gauge, histogram};

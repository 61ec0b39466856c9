//! wakegate-metrics — counters for the wake protocol.
//!
//! `WakeMetrics` is a set of lock-free atomic counters shared by the
//! coordinator, the scaler, and the sleep trigger. `render_prometheus`
//! turns a snapshot into the Prometheus text exposition format served
//! at `/metrics`.

pub mod collector;
pub mod prometheus;

pub use collector::{MetricsSnapshot, WakeMetrics};
pub use prometheus::render_prometheus;

//! pulse-metrics: folds probe results into service health figures.
//!
//! Keeps a fixed-capacity history per target and derives per-service
//! status (24h uptime, average latency, checks per day) and fleet-wide
//! figures (30d uptime, 24h average latency). Also renders a published
//! snapshot in Prometheus text format.
//!
//! # Architecture
//!
//! ```text
//! MetricsAggregator
//!   ├── HistoryArena (one ring buffer per target, indexed by target id)
//!   ├── record() ← called per probe result
//!   └── service_statuses() / fleet_uptime() → read by the snapshot builder
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod aggregator;
pub mod history;
pub mod prometheus;

pub use aggregator::{FLEET_WINDOW, MetricsAggregator, MetricsError, SERVICE_WINDOW};
pub use history::{HistoryArena, TargetId};
pub use prometheus::render_prometheus;

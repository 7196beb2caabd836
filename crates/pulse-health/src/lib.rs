//! pulse-health: health probes and the probe scheduler for Pulse.
//!
//! # Architecture
//!
//! ```text
//! Scheduler
//!   ├── interval tick (ticks never cancel each other)
//!   │   └── JoinSet: one task per target
//!   │       ├── per-target lock (one probe in flight per target)
//!   │       ├── Prober::probe() → ProbeResult, retried while down
//!   │       └── ProbeObserver::on_result (lock still held)
//!   └── ProbeObserver::on_cycle_complete once every probe returned
//! ```
//!
//! A probe never fails: transport errors, timeouts, bad statuses and missing
//! content are folded into a `down` or `degraded` result whose message
//! explains why.

pub mod checker;
pub mod scheduler;

pub use checker::{ProbeError, Prober};
pub use scheduler::{BoxFuture, ProbeObserver, Scheduler, SchedulerError, TickReport};

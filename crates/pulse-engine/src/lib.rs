//! pulse-engine: turns probes, deployments and incidents into one status.
//!
//! # Architecture
//!
//! ```text
//! Scheduler ──on_result──▶ Engine ◀── Dispatcher ◀── inbound events
//!                            │
//!          Mutex<aggregator, incident book, ledger>
//!                            │ rebuild after every mutation
//!                            ▼
//!            watch<Arc<StatusSnapshot>> ──▶ Publisher ──▶ webhook / file
//!                            │
//!                            └──▶ StateStore (write-through)
//! ```
//!
//! Every mutation and the rebuild that follows it happen under one lock, so
//! a published snapshot never mixes old services with new incidents.

pub mod dispatch;
pub mod engine;
pub mod error;
pub mod publish;
pub mod snapshot;

pub use dispatch::{DispatchOutcome, Dispatcher};
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use publish::{FileSink, PublishError, Publisher, SinkError, SnapshotSink, WebhookSink};
pub use snapshot::{SnapshotSources, build_snapshot, overall_status, status_message};

//! pulse-state: domain types and embedded state store for Pulse.
//!
//! Holds the types every other crate speaks (targets, probe results,
//! deployments, incidents, the published status snapshot), the parser for
//! inbound dispatch events, and a [redb](https://docs.rs/redb) store used to
//! survive restarts.
//!
//! # Architecture
//!
//! All persisted values are JSON-serialized into redb's `&[u8]` value
//! columns. Deployments use the composite key `{service}:{deployment_id}`,
//! incidents their id, and the last published snapshot the key `latest`.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod events;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use events::{CreateIncident, DeploymentUpdate, EventError, InboundEvent, ServiceUpdate};
pub use store::StateStore;
pub use types::*;

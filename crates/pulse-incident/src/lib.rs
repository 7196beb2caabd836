//! Pulse incidents: lifecycle state machine and incident book.
//!
//! Incidents move `investigating → identified → monitoring → resolved`,
//! never backward, and `resolved` is terminal. They are opened by failed
//! probes of critical targets, by failed deployments, or by explicit
//! request, and closed by explicit request, by sustained recovery of the
//! affected targets, or by a later successful deployment.
//!
//! # Components
//!
//! - **`machine`**: transition rules and dedup keys
//! - **`policy`**: dedup window, auto-resolve threshold, retention
//! - **`book`**: the incident store that applies the rules

pub mod book;
pub mod machine;
pub mod policy;

pub use book::{Created, IncidentBook, NewIncident};
pub use machine::{IncidentError, check_transition, dedup_key};
pub use policy::IncidentPolicy;

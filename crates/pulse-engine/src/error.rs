//! Engine error types.

use thiserror::Error;

use pulse_core::ConfigError;
use pulse_health::SchedulerError;
use pulse_incident::IncidentError;
use pulse_ledger::LedgerError;
use pulse_metrics::MetricsError;
use pulse_state::{EventError, StateError};

/// Errors surfaced to callers of the engine. None of them leave state
/// half-updated.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Incident(#[from] IncidentError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Event(#[from] EventError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

pub type EngineResult<T> = Result<T, EngineError>;

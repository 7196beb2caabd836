//! Incident transition rules.

use thiserror::Error;

use pulse_state::{IncidentId, IncidentStatus};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IncidentError {
    #[error("incident {id}: cannot move from {from} to {to}")]
    InvalidTransition {
        id: IncidentId,
        from: IncidentStatus,
        to: IncidentStatus,
    },

    #[error("incident not found: {0}")]
    NotFound(IncidentId),

    #[error("incident title must not be empty")]
    EmptyTitle,
}

/// Whether `from → to` is allowed.
///
/// Any strictly later state is reachable, including skipping straight to
/// `resolved`. Staying put, moving backward, and leaving `resolved` are not.
pub fn check_transition(
    id: &str,
    from: IncidentStatus,
    to: IncidentStatus,
) -> Result<(), IncidentError> {
    if from == IncidentStatus::Resolved || to.rank() <= from.rank() {
        return Err(IncidentError::InvalidTransition {
            id: id.to_string(),
            from,
            to,
        });
    }
    Ok(())
}

/// Identity of a manual creation request: normalized title plus sorted services.
pub fn dedup_key<'a>(title: &str, services: impl IntoIterator<Item = &'a str>) -> String {
    let title = title.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    let mut services: Vec<&str> = services.into_iter().map(str::trim).collect();
    services.sort_unstable();
    services.dedup();
    format!("{title}|{}", services.join(","))
}

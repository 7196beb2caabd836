//! Incident book: owns every incident and applies the lifecycle rules.
//!
//! Mutating operations return the incidents they touched so the caller can
//! write them through to the state store. A rejected operation leaves the
//! book untouched.

use std::collections::BTreeSet;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use pulse_state::{
    Deployment, Incident, IncidentSource, IncidentStatus, IncidentUpdate, ProbeOutcome,
    ProbeResult, Severity, Target,
};

use crate::machine::{IncidentError, check_transition, dedup_key};
use crate::policy::IncidentPolicy;

/// Start of a window ending at `now`, clamped to the earliest representable time.
fn window_start(now: DateTime<Utc>, window: TimeDelta) -> DateTime<Utc> {
    now.checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// An explicit creation request.
#[derive(Debug, Clone, PartialEq)]
pub struct NewIncident {
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub services_affected: Vec<String>,
}

/// Outcome of [`IncidentBook::create`].
#[derive(Debug, Clone, PartialEq)]
pub enum Created {
    New(Incident),
    /// An identical request inside the dedup window already opened this one.
    Existing(Incident),
}

impl Created {
    pub fn incident(&self) -> &Incident {
        match self {
            Created::New(i) | Created::Existing(i) => i,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Created::New(_))
    }
}

#[derive(Debug)]
pub struct IncidentBook {
    policy: IncidentPolicy,
    /// Creation order.
    incidents: Vec<Incident>,
    next_seq: u64,
    resolved_total: u64,
}

impl IncidentBook {
    pub fn new(policy: IncidentPolicy) -> Self {
        Self {
            policy,
            incidents: Vec::new(),
            next_seq: 1,
            resolved_total: 0,
        }
    }

    /// Rebuild from persisted incidents (creation order).
    ///
    /// The id sequence resumes after the highest stored id, and every stored
    /// resolution counts toward the resolved total even if it is pruned here.
    pub fn restore(policy: IncidentPolicy, incidents: Vec<Incident>) -> Self {
        let next_seq = incidents
            .iter()
            .filter_map(Incident::sequence)
            .max()
            .map_or(1, |n| n + 1);
        let resolved_total = incidents.iter().filter(|i| !i.is_open()).count() as u64;
        let mut book = Self {
            policy,
            incidents,
            next_seq,
            resolved_total,
        };
        book.prune();
        book
    }

    pub fn policy(&self) -> &IncidentPolicy {
        &self.policy
    }

    pub fn get(&self, id: &str) -> Option<&Incident> {
        self.incidents.iter().find(|i| i.id == id)
    }

    pub fn all(&self) -> &[Incident] {
        &self.incidents
    }

    /// Open incidents that reference `service`.
    pub fn open_for<'a>(&'a self, service: &'a str) -> impl Iterator<Item = &'a Incident> + 'a {
        self.incidents
            .iter()
            .filter(move |i| i.is_open() && i.affects(service))
    }

    pub fn open_count(&self) -> usize {
        self.incidents.iter().filter(|i| i.is_open()).count()
    }

    /// Every resolution ever made, including pruned incidents.
    pub fn resolved_total(&self) -> u64 {
        self.resolved_total
    }

    /// Open incidents plus those resolved within the recent window, newest first.
    pub fn visible(&self, now: DateTime<Utc>) -> Vec<Incident> {
        let cutoff = window_start(now, self.policy.recent_window);
        let mut out: Vec<Incident> = self
            .incidents
            .iter()
            .filter(|i| i.resolved_at.is_none_or(|at| at >= cutoff))
            .cloned()
            .collect();
        out.reverse();
        out
    }

    // ── Automatic signals ──────────────────────────────────────────

    /// Open an incident when a critical target goes down and nothing open
    /// already covers it.
    pub fn on_probe(&mut self, target: &Target, result: &ProbeResult) -> Option<Incident> {
        if !target.critical || result.outcome != ProbeOutcome::Down {
            return None;
        }
        if self.open_for(&target.name).next().is_some() {
            return None;
        }

        let description = result
            .message
            .clone()
            .unwrap_or_else(|| format!("{} failed its health check", target.name));
        let incident = self.open(
            format!("{} is down", target.name),
            description,
            Severity::High,
            BTreeSet::from([target.name.clone()]),
            IncidentSource::Probe,
            format!("probe:{}", target.name),
            result.timestamp,
        );
        warn!(id = %incident.id, target = %target.name, "incident opened from failed probe");
        Some(incident)
    }

    /// Open an incident for a failed deployment unless an automatic incident
    /// for the same service was opened within the dedup window.
    pub fn on_deployment_failed(
        &mut self,
        deployment: &Deployment,
        now: DateTime<Utc>,
    ) -> Option<Incident> {
        let cutoff = window_start(now, self.policy.dedup_window);
        if let Some(existing) = self
            .open_for(&deployment.service)
            .find(|i| i.auto_created && i.created_at >= cutoff)
        {
            debug!(
                id = %existing.id,
                service = %deployment.service,
                deployment = %deployment.deployment_id,
                "failed deployment folded into open incident"
            );
            return None;
        }

        let incident = self.open(
            format!(
                "Deployment {} of {} failed",
                deployment.deployment_id, deployment.service
            ),
            format!(
                "Deployment {} (commit {}) by {} failed",
                deployment.deployment_id,
                or_unknown(&deployment.commit_sha),
                or_unknown(&deployment.deployed_by),
            ),
            Severity::High,
            BTreeSet::from([deployment.service.clone()]),
            IncidentSource::Deployment,
            format!("deployment:{}", deployment.service),
            now,
        );
        warn!(
            id = %incident.id,
            service = %deployment.service,
            deployment = %deployment.deployment_id,
            "incident opened from failed deployment"
        );
        Some(incident)
    }

    /// Resolve the open deployment incident of a service that just deployed
    /// successfully.
    pub fn on_deployment_succeeded(
        &mut self,
        deployment: &Deployment,
        now: DateTime<Utc>,
    ) -> Vec<Incident> {
        let message = format!(
            "Resolved by successful deployment {}",
            deployment.deployment_id
        );
        let ids: Vec<String> = self
            .open_for(&deployment.service)
            .filter(|i| i.source == IncidentSource::Deployment)
            .map(|i| i.id.clone())
            .collect();

        let resolved: Vec<Incident> = ids
            .iter()
            .filter_map(|id| self.resolve(id, message.clone(), now))
            .collect();
        if !resolved.is_empty() {
            self.prune();
        }
        resolved
    }

    /// Resolve probe-opened incidents whose targets have all recovered.
    ///
    /// `consecutive` reports how many of a target's latest probes in a row
    /// were operational.
    pub fn auto_resolve(
        &mut self,
        consecutive: impl Fn(&str) -> u32,
        now: DateTime<Utc>,
    ) -> Vec<Incident> {
        if !self.policy.auto_resolve {
            return Vec::new();
        }
        let threshold = self.policy.auto_resolve_after;
        let ids: Vec<String> = self
            .incidents
            .iter()
            .filter(|i| i.is_open() && i.auto_created && i.source == IncidentSource::Probe)
            .filter(|i| {
                i.services_affected
                    .iter()
                    .all(|s| consecutive(s) >= threshold)
            })
            .map(|i| i.id.clone())
            .collect();

        let message = format!("Recovered after {threshold} consecutive operational checks");
        let resolved: Vec<Incident> = ids
            .iter()
            .filter_map(|id| self.resolve(id, message.clone(), now))
            .collect();
        if !resolved.is_empty() {
            self.prune();
        }
        resolved
    }

    // ── Explicit requests ──────────────────────────────────────────

    /// Open an incident on request, or return the open one an identical
    /// request created within the dedup window.
    pub fn create(
        &mut self,
        request: NewIncident,
        now: DateTime<Utc>,
    ) -> Result<Created, IncidentError> {
        let title = request.title.trim();
        if title.is_empty() {
            return Err(IncidentError::EmptyTitle);
        }
        let services: BTreeSet<String> = request
            .services_affected
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        let key = dedup_key(title, services.iter().map(String::as_str));

        let cutoff = window_start(now, self.policy.dedup_window);
        if let Some(existing) = self
            .incidents
            .iter()
            .find(|i| i.is_open() && i.dedup_key == key && i.created_at >= cutoff)
        {
            debug!(id = %existing.id, "duplicate creation request");
            return Ok(Created::Existing(existing.clone()));
        }

        let incident = self.open(
            title.to_string(),
            request.description,
            request.severity,
            services,
            IncidentSource::Manual,
            key,
            now,
        );
        info!(id = %incident.id, severity = ?incident.severity, "incident opened");
        Ok(Created::New(incident))
    }

    /// Move an incident forward. Rejected moves leave it unchanged.
    pub fn transition(
        &mut self,
        id: &str,
        to: IncidentStatus,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Incident, IncidentError> {
        let incident = self
            .incidents
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| IncidentError::NotFound(id.to_string()))?;
        check_transition(id, incident.status, to)?;

        let from = incident.status;
        let message = message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| format!("Status changed to {to}"));
        apply(incident, to, message, now);
        let updated = incident.clone();
        info!(%id, %from, %to, "incident transitioned");

        if to == IncidentStatus::Resolved {
            self.resolved_total += 1;
            self.prune();
        }
        Ok(updated)
    }

    // ── Internals ──────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    fn open(
        &mut self,
        title: String,
        description: String,
        severity: Severity,
        services_affected: BTreeSet<String>,
        source: IncidentSource,
        dedup_key: String,
        now: DateTime<Utc>,
    ) -> Incident {
        let id = format!("INC-{}", self.next_seq);
        self.next_seq += 1;

        let incident = Incident {
            id,
            updates: vec![IncidentUpdate {
                status: IncidentStatus::Investigating,
                message: if description.is_empty() {
                    title.clone()
                } else {
                    description.clone()
                },
                timestamp: now,
            }],
            title,
            description,
            severity,
            status: IncidentStatus::Investigating,
            services_affected,
            created_at: now,
            updated_at: now,
            resolved_at: None,
            auto_created: source != IncidentSource::Manual,
            source,
            dedup_key,
        };
        self.incidents.push(incident.clone());
        incident
    }

    fn resolve(&mut self, id: &str, message: String, now: DateTime<Utc>) -> Option<Incident> {
        let incident = self
            .incidents
            .iter_mut()
            .find(|i| i.id == id && i.is_open())?;
        apply(incident, IncidentStatus::Resolved, message, now);
        self.resolved_total += 1;
        info!(%id, "incident resolved");
        Some(incident.clone())
    }

    /// Drop the oldest resolved incidents beyond the retained count.
    fn prune(&mut self) {
        let resolved = self.incidents.iter().filter(|i| !i.is_open()).count();
        let excess = resolved.saturating_sub(self.policy.resolved_capacity);
        if excess == 0 {
            return;
        }

        let mut by_resolution: Vec<(DateTime<Utc>, String)> = self
            .incidents
            .iter()
            .filter_map(|i| i.resolved_at.map(|at| (at, i.id.clone())))
            .collect();
        by_resolution.sort();
        let drop: BTreeSet<String> = by_resolution
            .into_iter()
            .take(excess)
            .map(|(_, id)| id)
            .collect();
        self.incidents.retain(|i| !drop.contains(&i.id));
        debug!(pruned = drop.len(), "resolved incidents pruned");
    }
}

fn apply(incident: &mut Incident, to: IncidentStatus, message: String, now: DateTime<Utc>) {
    incident.status = to;
    incident.updated_at = now;
    if to == IncidentStatus::Resolved {
        incident.resolved_at = Some(now);
    }
    incident.updates.push(IncidentUpdate {
        status: to,
        message,
        timestamp: now,
    });
}

fn or_unknown(value: &str) -> &str {
    if value.is_empty() { "unknown" } else { value }
}

//! Pulse deployment ledger.
//!
//! Records deployment events per service and fleet-wide, most recent first,
//! and derives the deployment success rate. Deployment ids are unique per
//! service; a repeat is rejected and leaves the ledger unchanged.

use std::collections::{BTreeMap, HashSet};

use thiserror::Error;
use tracing::{debug, info};

use pulse_core::RetentionSettings;
use pulse_state::{Deployment, DeploymentOutcome, Percent};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("deployment {id} already recorded for {service}")]
    DuplicateDeploymentId { service: String, id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerPolicy {
    /// Deployments kept per list for display.
    pub display_capacity: usize,
    /// Completed deployments the success rate is computed over.
    pub rate_window: usize,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            display_capacity: 50,
            rate_window: 20,
        }
    }
}

impl LedgerPolicy {
    pub fn from_settings(settings: &RetentionSettings) -> Self {
        Self {
            display_capacity: settings.deployments_display.max(1),
            rate_window: settings.deployments_rate_window.max(1),
        }
    }
}

#[derive(Debug, Default)]
pub struct DeploymentLedger {
    policy: LedgerPolicy,
    /// Fleet-wide, most recent first.
    recent: Vec<Deployment>,
    by_service: BTreeMap<String, Vec<Deployment>>,
    /// Completed deployments for the success rate, independent of display.
    completed: Vec<Deployment>,
    /// Every (service, id) ever accepted, including ones truncated from display.
    seen: HashSet<(String, String)>,
    total: u64,
}

impl DeploymentLedger {
    pub fn new(policy: LedgerPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Rebuild from persisted deployments in any order.
    pub fn restore(policy: LedgerPolicy, deployments: Vec<Deployment>) -> Self {
        let mut ledger = Self::new(policy);
        for deployment in deployments {
            if let Err(e) = ledger.record(deployment) {
                debug!(error = %e, "skipping stored duplicate deployment");
            }
        }
        ledger
    }

    /// Accept a deployment.
    pub fn record(&mut self, deployment: Deployment) -> Result<(), LedgerError> {
        let key = (
            deployment.service.clone(),
            deployment.deployment_id.clone(),
        );
        if self.seen.contains(&key) {
            return Err(LedgerError::DuplicateDeploymentId {
                service: key.0,
                id: key.1,
            });
        }

        let capacity = self.policy.display_capacity;
        insert_ordered(
            self.by_service.entry(deployment.service.clone()).or_default(),
            deployment.clone(),
            capacity,
        );
        info!(
            service = %deployment.service,
            id = %deployment.deployment_id,
            status = ?deployment.status,
            "deployment recorded"
        );
        if deployment.status != DeploymentOutcome::InProgress {
            insert_ordered(&mut self.completed, deployment.clone(), self.policy.rate_window);
        }
        insert_ordered(&mut self.recent, deployment, capacity);
        self.seen.insert(key);
        self.total += 1;
        Ok(())
    }

    /// Share of successful deployments among the most recent completed ones.
    ///
    /// Reports 100% before any deployment has completed.
    pub fn success_rate(&self) -> Percent {
        let window = &self.completed;
        if window.is_empty() {
            return Percent(Some(100.0));
        }
        let successes = window
            .iter()
            .filter(|d| d.status == DeploymentOutcome::Success)
            .count();
        Percent(Some(successes as f64 * 100.0 / window.len() as f64))
    }

    /// Every deployment ever accepted.
    pub fn total_deployments(&self) -> u64 {
        self.total
    }

    pub fn last_deployment(&self) -> Option<&Deployment> {
        self.recent.first()
    }

    /// Fleet-wide deployments, most recent first.
    pub fn recent(&self) -> &[Deployment] {
        &self.recent
    }

    pub fn for_service(&self, service: &str) -> &[Deployment] {
        self.by_service.get(service).map_or(&[], Vec::as_slice)
    }
}

/// Insert keeping `deployed_at` descending; ties keep arrival order (newest
/// arrival first). Truncates to `capacity`.
fn insert_ordered(list: &mut Vec<Deployment>, deployment: Deployment, capacity: usize) {
    let at = list.partition_point(|d| d.deployed_at > deployment.deployed_at);
    list.insert(at, deployment);
    list.truncate(capacity);
}

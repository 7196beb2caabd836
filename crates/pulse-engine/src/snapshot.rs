//! Snapshot builder: a pure read of aggregator, incident book and ledger.

use chrono::{DateTime, Utc};

use pulse_incident::IncidentBook;
use pulse_ledger::DeploymentLedger;
use pulse_metrics::{FLEET_WINDOW, MetricsAggregator, SERVICE_WINDOW};
use pulse_state::{
    MetricsBlock, OverallStatus, ProbeOutcome, ServiceHealth, ServiceStatus, StatusSnapshot,
    SystemInfo,
};

/// Borrowed view of everything a snapshot is built from.
pub struct SnapshotSources<'a> {
    pub metrics: &'a MetricsAggregator,
    pub incidents: &'a IncidentBook,
    pub ledger: &'a DeploymentLedger,
    /// Configured probe interval as written in the config.
    pub check_interval: &'a str,
}

pub fn status_message(status: ProbeOutcome) -> &'static str {
    match status {
        ProbeOutcome::Operational => "All systems operational",
        ProbeOutcome::Degraded => "Some systems are experiencing issues",
        ProbeOutcome::Down => "Major outage in progress",
    }
}

/// Worst-case reduction over the services.
///
/// Critical services count at full weight. A non-critical outage can only
/// pull the fleet down to `degraded`. Services never probed are ignored.
pub fn overall_status(services: &[ServiceStatus]) -> OverallStatus {
    let status = services
        .iter()
        .filter_map(|s| {
            let outcome = s.status.outcome()?;
            Some(match (s.critical, outcome) {
                (false, ProbeOutcome::Down) => ProbeOutcome::Degraded,
                (_, outcome) => outcome,
            })
        })
        .fold(ProbeOutcome::Operational, ProbeOutcome::worst);

    OverallStatus {
        status,
        message: status_message(status).to_string(),
    }
}

/// Assemble a complete snapshot. Reads only.
pub fn build_snapshot(
    sources: SnapshotSources<'_>,
    version: u64,
    now: DateTime<Utc>,
) -> StatusSnapshot {
    let services = sources.metrics.service_statuses(now);
    let overall_status = overall_status(&services);
    let active_services = services
        .iter()
        .filter(|s| matches!(s.status, ServiceHealth::Operational | ServiceHealth::Degraded))
        .count();

    let metrics = MetricsBlock {
        total_uptime: sources.metrics.fleet_uptime(FLEET_WINDOW, now),
        avg_response_time: sources.metrics.fleet_avg_response_time(SERVICE_WINDOW, now),
        total_deployments: sources.ledger.total_deployments(),
        success_rate: sources.ledger.success_rate(),
        active_services,
        incidents_resolved: sources.incidents.resolved_total(),
    };

    StatusSnapshot {
        version,
        last_updated: now,
        overall_status,
        system_info: SystemInfo {
            last_deployment: sources.ledger.last_deployment().map(|d| d.deployed_at),
            monitored_services: services.len(),
            check_interval: sources.check_interval.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        services,
        metrics,
        recent_deployments: sources.ledger.recent().to_vec(),
        incidents: sources.incidents.visible(now),
    }
}

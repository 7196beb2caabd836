//! Metrics aggregator: derives service status from probe history.
//!
//! Uptime is the share of `operational` results in a rolling window. The
//! average response time only counts `operational` and `degraded` results
//! (a `down` probe has no meaningful latency) but `down` still counts
//! toward the uptime denominator. A window with no qualifying results is
//! undefined and renders as "N/A", never as 0% or 100%.

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tracing::debug;

use pulse_state::{Millis, Percent, ProbeOutcome, ProbeResult, ServiceHealth, ServiceStatus, Target};

use crate::history::{HistoryArena, TargetId};

/// Per-service uptime and latency window.
pub const SERVICE_WINDOW: TimeDelta = TimeDelta::hours(24);

/// Fleet-wide uptime window.
pub const FLEET_WINDOW: TimeDelta = TimeDelta::days(30);

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("probe result for unconfigured target: {0}")]
    UnknownTarget(String),
}

/// Counts over one window of results.
#[derive(Debug, Default, Clone, Copy)]
struct WindowTally {
    total: usize,
    operational: usize,
    latency_sum: u64,
    latency_samples: usize,
}

impl WindowTally {
    fn add(&mut self, result: &ProbeResult) {
        self.total += 1;
        match result.outcome {
            ProbeOutcome::Operational => {
                self.operational += 1;
                self.latency_sum += result.latency_ms;
                self.latency_samples += 1;
            }
            ProbeOutcome::Degraded => {
                self.latency_sum += result.latency_ms;
                self.latency_samples += 1;
            }
            ProbeOutcome::Down => {}
        }
    }

    fn uptime(&self) -> Percent {
        if self.total == 0 {
            return Percent(None);
        }
        Percent(Some(self.operational as f64 * 100.0 / self.total as f64))
    }

    fn avg_latency(&self) -> Millis {
        if self.latency_samples == 0 {
            return Millis(None);
        }
        Millis(Some(self.latency_sum as f64 / self.latency_samples as f64))
    }
}

fn tally<'a>(
    results: impl Iterator<Item = &'a ProbeResult>,
    window: TimeDelta,
    now: DateTime<Utc>,
) -> WindowTally {
    let cutoff = now - window;
    let mut tally = WindowTally::default();
    for result in results.filter(|r| r.timestamp > cutoff && r.timestamp <= now) {
        tally.add(result);
    }
    tally
}

/// Owns the probe history of every configured target.
#[derive(Debug)]
pub struct MetricsAggregator {
    targets: Vec<Target>,
    history: HistoryArena,
}

impl MetricsAggregator {
    pub fn new(targets: &[Target], capacity: usize) -> Self {
        let history = HistoryArena::new(targets.iter().map(|t| t.name.as_str()), capacity);
        Self {
            targets: targets.to_vec(),
            history,
        }
    }

    fn id(&self, name: &str) -> Option<TargetId> {
        self.history.id_of(name)
    }

    /// Append a result to its target's history.
    ///
    /// Results for names that are not configured are rejected and leave
    /// every history untouched.
    pub fn record(&mut self, result: ProbeResult) -> Result<(), MetricsError> {
        let id = self
            .id(&result.target)
            .ok_or_else(|| MetricsError::UnknownTarget(result.target.clone()))?;
        debug!(
            target = %result.target,
            outcome = %result.outcome,
            latency_ms = result.latency_ms,
            "probe result recorded"
        );
        self.history.push(id, result);
        Ok(())
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn latest(&self, name: &str) -> Option<&ProbeResult> {
        self.id(name).and_then(|id| self.history.latest(id))
    }

    /// History for a target, oldest first.
    pub fn history(&self, name: &str) -> Vec<ProbeResult> {
        match self.id(name) {
            Some(id) => self.history.entries(id).cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Number of trailing results with the given outcome.
    pub fn consecutive(&self, name: &str, outcome: ProbeOutcome) -> u32 {
        let Some(id) = self.id(name) else {
            return 0;
        };
        self.history
            .entries(id)
            .rev()
            .take_while(|r| r.outcome == outcome)
            .count() as u32
    }

    pub fn uptime(&self, name: &str, window: TimeDelta, now: DateTime<Utc>) -> Percent {
        match self.id(name) {
            Some(id) => tally(self.history.entries(id), window, now).uptime(),
            None => Percent(None),
        }
    }

    pub fn avg_response_time(&self, name: &str, window: TimeDelta, now: DateTime<Utc>) -> Millis {
        match self.id(name) {
            Some(id) => tally(self.history.entries(id), window, now).avg_latency(),
            None => Millis(None),
        }
    }

    /// Number of checks recorded for a target inside the window.
    pub fn checks_in_window(&self, name: &str, window: TimeDelta, now: DateTime<Utc>) -> usize {
        match self.id(name) {
            Some(id) => tally(self.history.entries(id), window, now).total,
            None => 0,
        }
    }

    /// Uptime across every target's results in the window.
    pub fn fleet_uptime(&self, window: TimeDelta, now: DateTime<Utc>) -> Percent {
        tally(self.history.all(), window, now).uptime()
    }

    pub fn fleet_avg_response_time(&self, window: TimeDelta, now: DateTime<Utc>) -> Millis {
        tally(self.history.all(), window, now).avg_latency()
    }

    /// Derived status for one target over [`SERVICE_WINDOW`].
    pub fn service_status(&self, target: &Target, now: DateTime<Utc>) -> ServiceStatus {
        let (window, latest) = match self.id(&target.name) {
            Some(id) => (
                tally(self.history.entries(id), SERVICE_WINDOW, now),
                self.history.latest(id),
            ),
            None => (WindowTally::default(), None),
        };

        ServiceStatus {
            name: target.name.clone(),
            description: target.description.clone(),
            status: latest
                .map(|r| ServiceHealth::from(r.outcome))
                .unwrap_or(ServiceHealth::Unknown),
            response_time: window.avg_latency(),
            uptime: window.uptime(),
            message: latest.and_then(|r| r.message.clone()),
            category: target.category.clone(),
            critical: target.critical,
            last_checked: latest.map(|r| r.timestamp),
            checks_24h: window.total,
        }
    }

    /// Status of every target, in configuration order.
    pub fn service_statuses(&self, now: DateTime<Utc>) -> Vec<ServiceStatus> {
        self.targets
            .iter()
            .map(|t| self.service_status(t, now))
            .collect()
    }
}

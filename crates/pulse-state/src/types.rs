//! Domain types for Pulse.
//!
//! These types describe what is monitored (targets), what was observed
//! (probe results, deployments, incidents), and the aggregate document
//! published to status consumers. Everything that leaves the process is
//! serializable to/from JSON.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use pulse_core::{ConfigError, TargetConfig};

/// Name of a configured target; unique across the fleet.
pub type TargetName = String;

/// Incident identifier (`INC-<n>`).
pub type IncidentId = String;

// ── Target ────────────────────────────────────────────────────────

/// A monitored endpoint. Immutable once loaded from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub name: TargetName,
    pub description: String,
    pub url: String,
    /// Substring the response body must contain to count as operational.
    pub expected_content: Option<String>,
    pub timeout: Duration,
    /// A critical target's outage takes the overall status down.
    pub critical: bool,
    pub category: String,
}

impl Target {
    /// Build a target from its `[[targets]]` entry.
    pub fn from_config(cfg: &TargetConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            name: cfg.name.clone(),
            description: cfg.description.clone(),
            url: cfg.url.trim().to_string(),
            expected_content: cfg
                .expected_content
                .clone()
                .filter(|needle| !needle.is_empty()),
            timeout: cfg.timeout()?,
            critical: cfg.critical,
            category: cfg.category.clone(),
        })
    }
}

// ── Probe results ─────────────────────────────────────────────────

/// Classification of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    Operational,
    Degraded,
    Down,
}

impl ProbeOutcome {
    /// Ordering used by worst-case reductions (down > degraded > operational).
    pub fn rank(self) -> u8 {
        match self {
            ProbeOutcome::Operational => 0,
            ProbeOutcome::Degraded => 1,
            ProbeOutcome::Down => 2,
        }
    }

    pub fn worst(self, other: ProbeOutcome) -> ProbeOutcome {
        if other.rank() > self.rank() { other } else { self }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProbeOutcome::Operational => "operational",
            ProbeOutcome::Degraded => "degraded",
            ProbeOutcome::Down => "down",
        }
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one health check against one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub target: TargetName,
    pub timestamp: DateTime<Utc>,
    pub outcome: ProbeOutcome,
    /// Wall-clock round trip, recorded for every outcome.
    pub latency_ms: u64,
    pub message: Option<String>,
}

// ── Service status ────────────────────────────────────────────────

/// Current health of a service as shown to status consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceHealth {
    Operational,
    Degraded,
    Down,
    /// No probe has completed yet.
    Unknown,
}

impl ServiceHealth {
    pub fn outcome(self) -> Option<ProbeOutcome> {
        match self {
            ServiceHealth::Operational => Some(ProbeOutcome::Operational),
            ServiceHealth::Degraded => Some(ProbeOutcome::Degraded),
            ServiceHealth::Down => Some(ProbeOutcome::Down),
            ServiceHealth::Unknown => None,
        }
    }
}

impl From<ProbeOutcome> for ServiceHealth {
    fn from(outcome: ProbeOutcome) -> Self {
        match outcome {
            ProbeOutcome::Operational => ServiceHealth::Operational,
            ProbeOutcome::Degraded => ServiceHealth::Degraded,
            ProbeOutcome::Down => ServiceHealth::Down,
        }
    }
}

/// A percentage that may be undefined; serialized as `"99.95%"` or `"N/A"`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Percent(pub Option<f64>);

/// A latency in milliseconds that may be undefined; serialized as `"123ms"` or `"N/A"`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Millis(pub Option<f64>);

const NOT_AVAILABLE: &str = "N/A";

/// Two decimals at most, one at least: 90.0, 99.95, 100.0.
fn trim_decimals(value: f64) -> String {
    let mut s = format!("{value:.2}");
    if s.ends_with('0') {
        s.pop();
    }
    s
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{}%", trim_decimals(v)),
            None => f.write_str(NOT_AVAILABLE),
        }
    }
}

impl fmt::Display for Millis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{}ms", v.round() as u64),
            None => f.write_str(NOT_AVAILABLE),
        }
    }
}

impl Serialize for Percent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl Serialize for Millis {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn parse_rendered<'de, D: Deserializer<'de>>(
    deserializer: D,
    suffix: &str,
) -> Result<Option<f64>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    if raw == NOT_AVAILABLE {
        return Ok(None);
    }
    raw.strip_suffix(suffix)
        .unwrap_or(&raw)
        .trim()
        .parse::<f64>()
        .map(Some)
        .map_err(serde::de::Error::custom)
}

impl<'de> Deserialize<'de> for Percent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        parse_rendered(deserializer, "%").map(Percent)
    }
}

impl<'de> Deserialize<'de> for Millis {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        parse_rendered(deserializer, "ms").map(Millis)
    }
}

/// Derived view of a target, recomputed from its probe history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub name: TargetName,
    pub description: String,
    pub status: ServiceHealth,
    /// Average latency over the last 24h, excluding `down` results.
    pub response_time: Millis,
    /// Share of operational results over the last 24h.
    pub uptime: Percent,
    pub message: Option<String>,
    pub category: String,
    pub critical: bool,
    pub last_checked: Option<DateTime<Utc>>,
    /// Number of checks recorded in the last 24h.
    pub checks_24h: usize,
}

// ── Deployment ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentOutcome {
    Success,
    Failed,
    InProgress,
}

/// A recorded deployment attempt. Immutable once accepted by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub service: String,
    pub deployment_id: String,
    pub status: DeploymentOutcome,
    pub deployed_by: String,
    pub commit_sha: String,
    /// Human-readable duration as reported by the pipeline.
    pub duration: Option<String>,
    pub deployed_at: DateTime<Utc>,
}

impl Deployment {
    /// Build the composite key for the deployments table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.service, self.deployment_id)
    }
}

// ── Incident ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Lifecycle state of an incident. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Investigating,
    Identified,
    Monitoring,
    Resolved,
}

impl IncidentStatus {
    /// Position in the lifecycle sequence.
    pub fn rank(self) -> u8 {
        match self {
            IncidentStatus::Investigating => 0,
            IncidentStatus::Identified => 1,
            IncidentStatus::Monitoring => 2,
            IncidentStatus::Resolved => 3,
        }
    }

    pub fn is_open(self) -> bool {
        self != IncidentStatus::Resolved
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IncidentStatus::Investigating => "investigating",
            IncidentStatus::Identified => "identified",
            IncidentStatus::Monitoring => "monitoring",
            IncidentStatus::Resolved => "resolved",
        }
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What opened an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentSource {
    Probe,
    Deployment,
    Manual,
}

/// One entry of an incident's timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentUpdate {
    pub status: IncidentStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub services_affected: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub auto_created: bool,
    pub source: IncidentSource,
    /// Identity used to collapse repeated creation requests.
    pub dedup_key: String,
    pub updates: Vec<IncidentUpdate>,
}

impl Incident {
    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    pub fn affects(&self, service: &str) -> bool {
        self.services_affected.contains(service)
    }

    /// Numeric part of the id, used to resume the id sequence after restart.
    pub fn sequence(&self) -> Option<u64> {
        self.id.strip_prefix("INC-")?.parse().ok()
    }
}

// ── Snapshot ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallStatus {
    pub status: ProbeOutcome,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsBlock {
    /// Fleet-wide share of operational results over 30 days.
    pub total_uptime: Percent,
    /// Fleet-wide average latency over 24 hours.
    pub avg_response_time: Millis,
    pub total_deployments: u64,
    pub success_rate: Percent,
    /// Services whose latest probe was not `down`.
    pub active_services: usize,
    pub incidents_resolved: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub last_deployment: Option<DateTime<Utc>>,
    pub monitored_services: usize,
    pub check_interval: String,
    pub version: String,
}

/// The published aggregate. Replaced as a whole, never patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Increases by one with every publish.
    pub version: u64,
    pub last_updated: DateTime<Utc>,
    pub overall_status: OverallStatus,
    pub services: Vec<ServiceStatus>,
    pub metrics: MetricsBlock,
    pub recent_deployments: Vec<Deployment>,
    pub incidents: Vec<Incident>,
    pub system_info: SystemInfo,
}

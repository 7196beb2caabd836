//! pulse.toml configuration parser.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::parse_duration;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no targets configured")]
    NoTargets,
    #[error("duplicate target name: {0}")]
    DuplicateTarget(String),
    #[error("target {name}: invalid url {url:?} (expected http:// or https://)")]
    InvalidUrl { name: String, url: String },
    #[error("invalid duration for {field}: {value:?}")]
    InvalidDuration { field: String, value: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("{field} is {value:?}, at most {max} allowed")]
    TooLong {
        field: String,
        value: String,
        max: &'static str,
    },
    #[error("retention.deployments_rate_window ({rate_window}) exceeds retention.deployments_display ({display})")]
    RateWindowExceedsDisplay { rate_window: usize, display: usize },
}

/// Upper bound for the incident windows.
pub const MAX_WINDOW: Duration = Duration::from_secs(3650 * 24 * 60 * 60);
pub const MAX_WINDOW_TEXT: &str = "3650d";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulseConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub retention: RetentionSettings,
    #[serde(default)]
    pub incidents: IncidentSettings,
    #[serde(default)]
    pub publish: PublishSettings,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Directory holding the embedded state database.
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_interval")]
    pub interval: String,
    /// Extra attempts for a probe that came back `down`.
    #[serde(default)]
    pub probe_retries: u32,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionSettings {
    /// Probe results kept per target.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_deployments_display")]
    pub deployments_display: usize,
    #[serde(default = "default_rate_window")]
    pub deployments_rate_window: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentSettings {
    #[serde(default = "default_dedup_window")]
    pub dedup_window: String,
    #[serde(default = "default_true")]
    pub auto_resolve: bool,
    /// Consecutive operational probes before an auto-created incident resolves.
    #[serde(default = "default_auto_resolve_after")]
    pub auto_resolve_after: u32,
    #[serde(default = "default_resolved_capacity")]
    pub resolved_capacity: usize,
    #[serde(default = "default_recent_window")]
    pub recent_window: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishSettings {
    /// Local fallback sink: the snapshot is written here as JSON.
    pub file: Option<PathBuf>,
    pub webhook: Option<WebhookSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSettings {
    pub url: String,
    /// Name of the environment variable holding the bearer token.
    pub token_env: Option<String>,
    #[serde(default = "default_event_type")]
    pub event_type: String,
    #[serde(default = "default_webhook_timeout")]
    pub timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
    #[serde(default = "default_true")]
    pub critical: bool,
    #[serde(default = "default_timeout")]
    pub timeout: String,
    pub expected_content: Option<String>,
    #[serde(default = "default_category")]
    pub category: String,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_interval() -> String {
    "5m".to_string()
}

fn default_retry_backoff() -> String {
    "2s".to_string()
}

fn default_history_capacity() -> usize {
    // 30 days at a 5 minute interval.
    8640
}

fn default_deployments_display() -> usize {
    50
}

fn default_rate_window() -> usize {
    20
}

fn default_dedup_window() -> String {
    "30m".to_string()
}

fn default_true() -> bool {
    true
}

fn default_auto_resolve_after() -> u32 {
    3
}

fn default_resolved_capacity() -> usize {
    100
}

fn default_recent_window() -> String {
    "7d".to_string()
}

fn default_event_type() -> String {
    "status-update".to_string()
}

fn default_webhook_timeout() -> String {
    "10s".to_string()
}

fn default_timeout() -> String {
    "10s".to_string()
}

fn default_category() -> String {
    "general".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            data_dir: None,
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            probe_retries: 0,
            retry_backoff: default_retry_backoff(),
        }
    }
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            deployments_display: default_deployments_display(),
            deployments_rate_window: default_rate_window(),
        }
    }
}

impl Default for IncidentSettings {
    fn default() -> Self {
        Self {
            dedup_window: default_dedup_window(),
            auto_resolve: true,
            auto_resolve_after: default_auto_resolve_after(),
            resolved_capacity: default_resolved_capacity(),
            recent_window: default_recent_window(),
        }
    }
}

fn duration_field(field: &str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
        field: field.to_string(),
        value: value.to_string(),
    })
}

impl SchedulerSettings {
    pub fn interval(&self) -> Result<Duration, ConfigError> {
        duration_field("scheduler.interval", &self.interval)
    }

    pub fn retry_backoff(&self) -> Result<Duration, ConfigError> {
        duration_field("scheduler.retry_backoff", &self.retry_backoff)
    }
}

fn window_field(field: &str, value: &str) -> Result<Duration, ConfigError> {
    let window = duration_field(field, value)?;
    if window > MAX_WINDOW {
        return Err(ConfigError::TooLong {
            field: field.to_string(),
            value: value.to_string(),
            max: MAX_WINDOW_TEXT,
        });
    }
    Ok(window)
}

impl IncidentSettings {
    pub fn dedup_window(&self) -> Result<Duration, ConfigError> {
        window_field("incidents.dedup_window", &self.dedup_window)
    }

    pub fn recent_window(&self) -> Result<Duration, ConfigError> {
        window_field("incidents.recent_window", &self.recent_window)
    }
}

impl WebhookSettings {
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        duration_field("publish.webhook.timeout", &self.timeout)
    }
}

impl TargetConfig {
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        duration_field(&format!("targets.{}.timeout", self.name), &self.timeout)
    }
}

impl PulseConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: PulseConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every invariant the engine relies on at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }

        let mut seen = HashSet::new();
        for target in &self.targets {
            if !seen.insert(target.name.as_str()) {
                return Err(ConfigError::DuplicateTarget(target.name.clone()));
            }
            let url = target.url.trim();
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidUrl {
                    name: target.name.clone(),
                    url: target.url.clone(),
                });
            }
            if target.timeout()?.is_zero() {
                return Err(ConfigError::Zero("target timeout"));
            }
        }

        if self.scheduler.interval()?.is_zero() {
            return Err(ConfigError::Zero("scheduler.interval"));
        }
        self.scheduler.retry_backoff()?;
        self.incidents.dedup_window()?;
        self.incidents.recent_window()?;
        if let Some(webhook) = &self.publish.webhook {
            webhook.timeout()?;
        }

        if self.retention.history_capacity == 0 {
            return Err(ConfigError::Zero("retention.history_capacity"));
        }
        if self.retention.deployments_display == 0 {
            return Err(ConfigError::Zero("retention.deployments_display"));
        }
        if self.retention.deployments_rate_window == 0 {
            return Err(ConfigError::Zero("retention.deployments_rate_window"));
        }
        if self.retention.deployments_rate_window > self.retention.deployments_display {
            return Err(ConfigError::RateWindowExceedsDisplay {
                rate_window: self.retention.deployments_rate_window,
                display: self.retention.deployments_display,
            });
        }
        if self.incidents.auto_resolve_after == 0 {
            return Err(ConfigError::Zero("incidents.auto_resolve_after"));
        }
        Ok(())
    }

    /// Scaffold a config with a single target.
    pub fn scaffold(name: &str, url: &str) -> Self {
        PulseConfig {
            server: ServerSettings::default(),
            scheduler: SchedulerSettings::default(),
            retention: RetentionSettings::default(),
            incidents: IncidentSettings::default(),
            publish: PublishSettings {
                file: Some(PathBuf::from("public/status.json")),
                webhook: None,
            },
            targets: vec![TargetConfig {
                name: name.to_string(),
                description: String::new(),
                url: url.to_string(),
                critical: true,
                timeout: default_timeout(),
                expected_content: None,
                category: default_category(),
            }],
        }
    }
}

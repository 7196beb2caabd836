//! Incident policy: dedup, auto-resolve, and retention knobs.

use chrono::TimeDelta;

use pulse_core::{ConfigError, IncidentSettings, MAX_WINDOW_TEXT, format_duration};

#[derive(Debug, Clone)]
pub struct IncidentPolicy {
    /// Repeated failure signals inside this span reuse the open incident.
    pub dedup_window: TimeDelta,
    pub auto_resolve: bool,
    /// Consecutive operational probes required before auto-resolving.
    pub auto_resolve_after: u32,
    /// Resolved incidents kept in memory; open incidents are always kept.
    pub resolved_capacity: usize,
    /// How long a resolved incident stays on the published snapshot.
    pub recent_window: TimeDelta,
}

impl Default for IncidentPolicy {
    fn default() -> Self {
        Self {
            dedup_window: TimeDelta::minutes(30),
            auto_resolve: true,
            auto_resolve_after: 3,
            resolved_capacity: 100,
            recent_window: TimeDelta::days(7),
        }
    }
}

impl IncidentPolicy {
    pub fn from_settings(settings: &IncidentSettings) -> Result<Self, ConfigError> {
        Ok(Self {
            dedup_window: to_delta("incidents.dedup_window", settings.dedup_window()?)?,
            auto_resolve: settings.auto_resolve,
            auto_resolve_after: settings.auto_resolve_after.max(1),
            resolved_capacity: settings.resolved_capacity,
            recent_window: to_delta("incidents.recent_window", settings.recent_window()?)?,
        })
    }
}

fn to_delta(field: &str, d: std::time::Duration) -> Result<TimeDelta, ConfigError> {
    TimeDelta::from_std(d).map_err(|_| ConfigError::TooLong {
        field: field.to_string(),
        value: format_duration(d),
        max: MAX_WINDOW_TEXT,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_settings_parses_windows() {
        let settings = IncidentSettings {
            dedup_window: "10m".to_string(),
            auto_resolve: false,
            auto_resolve_after: 5,
            resolved_capacity: 10,
            recent_window: "1d".to_string(),
        };
        let policy = IncidentPolicy::from_settings(&settings).unwrap();
        assert_eq!(policy.dedup_window, TimeDelta::minutes(10));
        assert_eq!(policy.recent_window, TimeDelta::days(1));
        assert!(!policy.auto_resolve);
        assert_eq!(policy.auto_resolve_after, 5);
    }

    #[test]
    fn from_settings_rejects_bad_window() {
        let settings = IncidentSettings {
            dedup_window: "whenever".to_string(),
            ..IncidentSettings::default()
        };
        assert!(IncidentPolicy::from_settings(&settings).is_err());
    }

    #[test]
    fn from_settings_rejects_oversized_window() {
        let settings = IncidentSettings {
            recent_window: "100000000d".to_string(),
            ..IncidentSettings::default()
        };
        assert!(matches!(
            IncidentPolicy::from_settings(&settings),
            Err(ConfigError::TooLong { .. })
        ));
    }
}

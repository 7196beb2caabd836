pub mod config;
pub mod duration;

pub use config::{
    ConfigError, IncidentSettings, MAX_WINDOW, MAX_WINDOW_TEXT, PublishSettings, PulseConfig, RetentionSettings,
    SchedulerSettings, ServerSettings, TargetConfig, WebhookSettings,
};
pub use duration::{format_duration, parse_duration};

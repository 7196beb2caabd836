//! Inbound dispatch events.
//!
//! External triggers deliver events as an envelope
//! `{"event_type": "...", "client_payload": {...}}`. The envelope is parsed
//! into [`InboundEvent`] at the boundary; unknown event types and unknown
//! payload fields are rejected instead of ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::types::{Deployment, DeploymentOutcome, Severity};

#[derive(Debug, Error)]
pub enum EventError {
    #[error("malformed event: {0}")]
    Malformed(String),

    #[error("unknown event type: {0}")]
    UnknownType(String),

    #[error("invalid {event_type} payload: {reason}")]
    InvalidPayload { event_type: &'static str, reason: String },

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "client_payload", rename_all = "kebab-case")]
pub enum InboundEvent {
    DeploymentUpdate(DeploymentUpdate),
    CreateIncident(CreateIncident),
    ServiceUpdate(ServiceUpdate),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploymentUpdate {
    pub service: String,
    #[serde(deserialize_with = "string_or_number")]
    pub deployment_id: String,
    pub status: DeploymentOutcome,
    #[serde(default)]
    pub deployed_by: String,
    #[serde(default)]
    pub commit_sha: String,
    #[serde(default)]
    pub duration: Option<String>,
    /// Defaults to the time the event is accepted.
    #[serde(default)]
    pub deployed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateIncident {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    #[serde(default)]
    pub services_affected: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceUpdate {
    /// Target name, or `all` for the whole fleet.
    pub service: String,
    #[serde(default)]
    pub trigger: String,
}

fn default_severity() -> Severity {
    Severity::Medium
}

/// Pipelines send run ids as numbers or strings; both are kept as text.
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(u64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope {
    event_type: String,
    #[serde(default)]
    client_payload: serde_json::Value,
}

fn payload<T: serde::de::DeserializeOwned>(
    event_type: &'static str,
    value: serde_json::Value,
) -> Result<T, EventError> {
    serde_json::from_value(value).map_err(|e| EventError::InvalidPayload {
        event_type,
        reason: e.to_string(),
    })
}

impl InboundEvent {
    /// Parse and validate a dispatch envelope.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EventError> {
        let envelope: Envelope =
            serde_json::from_slice(bytes).map_err(|e| EventError::Malformed(e.to_string()))?;

        let event = match envelope.event_type.as_str() {
            "deployment-update" => InboundEvent::DeploymentUpdate(payload(
                "deployment-update",
                envelope.client_payload,
            )?),
            "create-incident" => {
                InboundEvent::CreateIncident(payload("create-incident", envelope.client_payload)?)
            }
            "service-update" => {
                InboundEvent::ServiceUpdate(payload("service-update", envelope.client_payload)?)
            }
            other => return Err(EventError::UnknownType(other.to_string())),
        };

        event.validate()?;
        Ok(event)
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            InboundEvent::DeploymentUpdate(_) => "deployment-update",
            InboundEvent::CreateIncident(_) => "create-incident",
            InboundEvent::ServiceUpdate(_) => "service-update",
        }
    }

    /// Reject payloads that parsed but carry empty identifiers.
    pub fn validate(&self) -> Result<(), EventError> {
        match self {
            InboundEvent::DeploymentUpdate(d) => {
                if d.service.trim().is_empty() {
                    return Err(EventError::MissingField("service"));
                }
                if d.deployment_id.trim().is_empty() {
                    return Err(EventError::MissingField("deployment_id"));
                }
            }
            InboundEvent::CreateIncident(c) => {
                if c.title.trim().is_empty() {
                    return Err(EventError::MissingField("title"));
                }
            }
            InboundEvent::ServiceUpdate(s) => {
                if s.service.trim().is_empty() {
                    return Err(EventError::MissingField("service"));
                }
            }
        }
        Ok(())
    }
}

impl DeploymentUpdate {
    pub fn into_deployment(self, received_at: DateTime<Utc>) -> Deployment {
        Deployment {
            service: self.service.trim().to_string(),
            deployment_id: self.deployment_id.trim().to_string(),
            status: self.status,
            deployed_by: self.deployed_by,
            commit_sha: self.commit_sha,
            duration: self.duration,
            deployed_at: self.deployed_at.unwrap_or(received_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_deployment_update_with_numeric_id() {
        let raw = br#"{
            "event_type": "deployment-update",
            "client_payload": {
                "service": "api",
                "deployment_id": 4812,
                "status": "failed",
                "deployed_by": "octocat",
                "commit_sha": "abc123",
                "duration": "2m 14s"
            }
        }"#;
        let event = InboundEvent::from_slice(raw).unwrap();
        match event {
            InboundEvent::DeploymentUpdate(d) => {
                assert_eq!(d.deployment_id, "4812");
                assert_eq!(d.status, DeploymentOutcome::Failed);
                assert!(d.deployed_at.is_none());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn parses_create_incident_with_defaults() {
        let raw = br#"{
            "event_type": "create-incident",
            "client_payload": { "title": "Elevated errors", "services_affected": ["api"] }
        }"#;
        let event = InboundEvent::from_slice(raw).unwrap();
        assert_eq!(event.event_type(), "create-incident");
        match event {
            InboundEvent::CreateIncident(c) => {
                assert_eq!(c.severity, Severity::Medium);
                assert_eq!(c.services_affected, vec!["api".to_string()]);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_event_type() {
        let raw = br#"{"event_type": "reboot-world", "client_payload": {}}"#;
        assert!(matches!(
            InboundEvent::from_slice(raw),
            Err(EventError::UnknownType(t)) if t == "reboot-world"
        ));
    }

    #[test]
    fn rejects_unknown_payload_fields() {
        let raw = br#"{
            "event_type": "service-update",
            "client_payload": { "service": "api", "trigger": "push", "colour": "red" }
        }"#;
        assert!(matches!(
            InboundEvent::from_slice(raw),
            Err(EventError::InvalidPayload { event_type: "service-update", .. })
        ));
    }

    #[test]
    fn rejects_unknown_envelope_fields_and_garbage() {
        let raw = br#"{"event_type": "service-update", "client_payload": {"service": "api"}, "x": 1}"#;
        assert!(matches!(InboundEvent::from_slice(raw), Err(EventError::Malformed(_))));
        assert!(matches!(InboundEvent::from_slice(b"not json"), Err(EventError::Malformed(_))));
    }

    #[test]
    fn rejects_empty_identifiers() {
        let raw = br#"{
            "event_type": "deployment-update",
            "client_payload": { "service": " ", "deployment_id": "1", "status": "success" }
        }"#;
        assert!(matches!(
            InboundEvent::from_slice(raw),
            Err(EventError::MissingField("service"))
        ));
    }

    #[test]
    fn deployment_defaults_timestamp_to_receipt() {
        let now = Utc::now();
        let update = DeploymentUpdate {
            service: " api ".to_string(),
            deployment_id: "7".to_string(),
            status: DeploymentOutcome::Success,
            deployed_by: "ci".to_string(),
            commit_sha: "deadbeef".to_string(),
            duration: None,
            deployed_at: None,
        };
        let deployment = update.into_deployment(now);
        assert_eq!(deployment.service, "api");
        assert_eq!(deployment.deployed_at, now);
        assert_eq!(deployment.table_key(), "api:7");
    }
}

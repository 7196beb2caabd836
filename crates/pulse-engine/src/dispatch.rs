//! Routes inbound dispatch events to the engine or the scheduler.

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use pulse_health::Scheduler;
use pulse_incident::NewIncident;
use pulse_state::{Deployment, InboundEvent, Incident};

use crate::engine::Engine;
use crate::error::EngineResult;

/// What handling an event produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Deployment {
        deployment: Deployment,
    },
    Incident {
        incident: Incident,
        /// False when an identical open incident was returned instead.
        created: bool,
    },
    Probed {
        operational: usize,
        degraded: usize,
        down: usize,
    },
}

#[derive(Clone)]
pub struct Dispatcher {
    engine: Engine,
    scheduler: Scheduler,
}

impl Dispatcher {
    pub fn new(engine: Engine, scheduler: Scheduler) -> Self {
        Self { engine, scheduler }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Parse a raw `{"event_type", "client_payload"}` envelope and handle it.
    pub async fn dispatch_slice(&self, bytes: &[u8]) -> EngineResult<DispatchOutcome> {
        let event = InboundEvent::from_slice(bytes)?;
        self.dispatch(event).await
    }

    pub async fn dispatch(&self, event: InboundEvent) -> EngineResult<DispatchOutcome> {
        info!(event_type = event.event_type(), "dispatch event received");
        match event {
            InboundEvent::DeploymentUpdate(update) => {
                let deployment = self
                    .engine
                    .record_deployment(update.into_deployment(Utc::now()))
                    .await?;
                Ok(DispatchOutcome::Deployment { deployment })
            }
            InboundEvent::CreateIncident(create) => {
                let created = self
                    .engine
                    .create_incident(NewIncident {
                        title: create.title,
                        description: create.description,
                        severity: create.severity,
                        services_affected: create.services_affected,
                    })
                    .await?;
                Ok(DispatchOutcome::Incident {
                    created: created.is_new(),
                    incident: created.incident().clone(),
                })
            }
            InboundEvent::ServiceUpdate(update) => {
                let report = self.scheduler.probe_now(update.service.trim()).await?;
                info!(
                    service = %update.service,
                    trigger = %update.trigger,
                    probed = report.probed(),
                    "out-of-band probe complete"
                );
                Ok(DispatchOutcome::Probed {
                    operational: report.operational,
                    degraded: report.degraded,
                    down: report.down,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use axum::Router;
    use axum::routing::get;
    use pulse_core::PulseConfig;
    use pulse_health::{Prober, SchedulerError};
    use pulse_state::{DeploymentOutcome, EventError, ServiceHealth};
    use std::sync::Arc;

    async fn dispatcher() -> Dispatcher {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = Router::new().route("/healthz", get(|| async { "ok" }));
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

        let config = PulseConfig::from_toml(&format!(
            r#"
            [[targets]]
            name = "api"
            url = "http://{addr}/healthz"
            "#
        ))
        .unwrap();
        let engine = Engine::new(&config, None).unwrap();
        let scheduler = Scheduler::new(
            Prober::new().unwrap(),
            engine.targets().to_vec(),
            &config.scheduler,
            Arc::new(engine.clone()),
        )
        .unwrap();
        Dispatcher::new(engine, scheduler)
    }

    #[tokio::test]
    async fn deployment_update_is_recorded_once() {
        let dispatcher = dispatcher().await;
        let raw = br#"{"event_type": "deployment-update", "client_payload": {
            "service": "api", "deployment_id": 981, "status": "success",
            "deployed_by": "octocat", "commit_sha": "f00d"
        }}"#;

        let outcome = dispatcher.dispatch_slice(raw).await.unwrap();
        match outcome {
            DispatchOutcome::Deployment { deployment } => {
                assert_eq!(deployment.deployment_id, "981");
                assert_eq!(deployment.status, DeploymentOutcome::Success);
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        let err = dispatcher.dispatch_slice(raw).await.unwrap_err();
        assert!(matches!(err, EngineError::Ledger(_)));
        assert_eq!(dispatcher.engine().current().metrics.total_deployments, 1);
    }

    #[tokio::test]
    async fn create_incident_reports_whether_new() {
        let dispatcher = dispatcher().await;
        let raw = br#"{"event_type": "create-incident", "client_payload": {
            "title": "Login errors", "severity": "critical", "services_affected": ["api"]
        }}"#;

        let first = dispatcher.dispatch_slice(raw).await.unwrap();
        let second = dispatcher.dispatch_slice(raw).await.unwrap();
        assert!(matches!(first, DispatchOutcome::Incident { created: true, .. }));
        assert!(matches!(second, DispatchOutcome::Incident { created: false, .. }));
    }

    #[tokio::test]
    async fn service_update_probes_immediately() {
        let dispatcher = dispatcher().await;
        let raw = br#"{"event_type": "service-update", "client_payload": {"service": "api", "trigger": "push"}}"#;

        let outcome = dispatcher.dispatch_slice(raw).await.unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Probed {
                operational: 1,
                degraded: 0,
                down: 0
            }
        );
        let snapshot = dispatcher.engine().current();
        assert_eq!(snapshot.services[0].status, ServiceHealth::Operational);
    }

    #[tokio::test]
    async fn unknown_service_and_bad_events_are_rejected() {
        let dispatcher = dispatcher().await;

        let raw = br#"{"event_type": "service-update", "client_payload": {"service": "billing"}}"#;
        assert!(matches!(
            dispatcher.dispatch_slice(raw).await,
            Err(EngineError::Scheduler(SchedulerError::UnknownTarget(_)))
        ));

        let raw = br#"{"event_type": "launch-rockets", "client_payload": {}}"#;
        assert!(matches!(
            dispatcher.dispatch_slice(raw).await,
            Err(EngineError::Event(EventError::UnknownType(_)))
        ));
        assert_eq!(dispatcher.engine().current().version, 0);
    }
}

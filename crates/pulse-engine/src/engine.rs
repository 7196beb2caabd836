//! Engine: the single coordination point for every mutation.
//!
//! The aggregator, incident book and ledger live behind one async mutex.
//! Each mutation runs to completion under that lock, writes what it changed
//! through to the state store, then rebuilds and publishes a new snapshot
//! before the lock is released. Readers only ever see published snapshots.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use pulse_core::PulseConfig;
use pulse_health::{BoxFuture, ProbeObserver, TickReport};
use pulse_incident::{Created, IncidentBook, IncidentPolicy, NewIncident};
use pulse_ledger::{DeploymentLedger, LedgerPolicy};
use pulse_metrics::MetricsAggregator;
use pulse_state::{
    Deployment, DeploymentOutcome, Incident, IncidentStatus, ProbeOutcome, ProbeResult,
    StateStore, StatusSnapshot, Target,
};

use crate::error::EngineResult;
use crate::snapshot::{SnapshotSources, build_snapshot};

struct EngineState {
    metrics: MetricsAggregator,
    incidents: IncidentBook,
    ledger: DeploymentLedger,
    /// Version of the last published snapshot.
    version: u64,
}

struct Inner {
    targets: Vec<Target>,
    check_interval: String,
    state: Mutex<EngineState>,
    snapshot_tx: watch::Sender<Arc<StatusSnapshot>>,
    store: Option<StateStore>,
}

/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    /// Build an engine from configuration, restoring deployments, incidents
    /// and the last published snapshot from `store` when one is given.
    pub fn new(config: &PulseConfig, store: Option<StateStore>) -> EngineResult<Self> {
        let targets = config
            .targets
            .iter()
            .map(Target::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        let incident_policy = IncidentPolicy::from_settings(&config.incidents)?;
        let ledger_policy = LedgerPolicy::from_settings(&config.retention);
        let metrics = MetricsAggregator::new(&targets, config.retention.history_capacity);

        let (incidents, ledger, restored) = match &store {
            Some(store) => {
                let deployments = store.list_deployments()?;
                let stored_incidents = store.list_incidents()?;
                info!(
                    deployments = deployments.len(),
                    incidents = stored_incidents.len(),
                    "restored state"
                );
                (
                    IncidentBook::restore(incident_policy, stored_incidents),
                    DeploymentLedger::restore(ledger_policy, deployments),
                    store.latest_snapshot()?,
                )
            }
            None => (
                IncidentBook::new(incident_policy),
                DeploymentLedger::new(ledger_policy),
                None,
            ),
        };

        let check_interval = config.scheduler.interval.clone();
        let initial = match restored {
            Some(snapshot) => {
                info!(version = snapshot.version, "serving last published snapshot");
                snapshot
            }
            None => build_snapshot(
                SnapshotSources {
                    metrics: &metrics,
                    incidents: &incidents,
                    ledger: &ledger,
                    check_interval: &check_interval,
                },
                0,
                Utc::now(),
            ),
        };

        let version = initial.version;
        let (snapshot_tx, _) = watch::channel(Arc::new(initial));
        Ok(Self {
            inner: Arc::new(Inner {
                targets,
                check_interval,
                state: Mutex::new(EngineState {
                    metrics,
                    incidents,
                    ledger,
                    version,
                }),
                snapshot_tx,
                store,
            }),
        })
    }

    pub fn targets(&self) -> &[Target] {
        &self.inner.targets
    }

    /// The current published snapshot.
    pub fn current(&self) -> Arc<StatusSnapshot> {
        self.inner.snapshot_tx.borrow().clone()
    }

    /// Receiver notified on every publish.
    pub fn subscribe(&self) -> watch::Receiver<Arc<StatusSnapshot>> {
        self.inner.snapshot_tx.subscribe()
    }

    // ── Mutations ──────────────────────────────────────────────────

    /// Fold one probe result into history, open an incident if a critical
    /// target went down, and publish.
    pub async fn record_probe(&self, result: ProbeResult) -> EngineResult<()> {
        let mut state = self.inner.state.lock().await;
        let target = self.inner.targets.iter().find(|t| t.name == result.target);
        state.metrics.record(result.clone())?;

        if let Some(incident) = target.and_then(|t| state.incidents.on_probe(t, &result)) {
            self.persist_incident(&incident);
        }
        self.publish(&mut state);
        Ok(())
    }

    /// End of a probe cycle: auto-resolve recovered incidents and publish.
    pub async fn complete_cycle(&self, now: DateTime<Utc>) {
        let mut state = self.inner.state.lock().await;
        let EngineState {
            metrics, incidents, ..
        } = &mut *state;
        let resolved =
            incidents.auto_resolve(|name| metrics.consecutive(name, ProbeOutcome::Operational), now);
        for incident in &resolved {
            self.persist_incident(incident);
        }
        self.publish(&mut state);
    }

    /// Accept a deployment event. A failed deployment may open an incident;
    /// a successful one closes the service's deployment incident.
    pub async fn record_deployment(&self, deployment: Deployment) -> EngineResult<Deployment> {
        let now = Utc::now();
        let mut state = self.inner.state.lock().await;
        state.ledger.record(deployment.clone())?;
        self.persist(|store| store.put_deployment(&deployment), "deployment");

        let touched: Vec<Incident> = match deployment.status {
            DeploymentOutcome::Failed => state
                .incidents
                .on_deployment_failed(&deployment, now)
                .into_iter()
                .collect(),
            DeploymentOutcome::Success => state.incidents.on_deployment_succeeded(&deployment, now),
            DeploymentOutcome::InProgress => Vec::new(),
        };
        for incident in &touched {
            self.persist_incident(incident);
        }
        self.publish(&mut state);
        Ok(deployment)
    }

    /// Open an incident on request. Identical requests inside the dedup
    /// window return the existing incident without republishing.
    pub async fn create_incident(&self, request: NewIncident) -> EngineResult<Created> {
        let mut state = self.inner.state.lock().await;
        let created = state.incidents.create(request, Utc::now())?;
        if created.is_new() {
            self.persist_incident(created.incident());
            self.publish(&mut state);
        }
        Ok(created)
    }

    pub async fn transition_incident(
        &self,
        id: &str,
        to: IncidentStatus,
        message: Option<String>,
    ) -> EngineResult<Incident> {
        let mut state = self.inner.state.lock().await;
        let incident = state.incidents.transition(id, to, message, Utc::now())?;
        self.persist_incident(&incident);
        self.publish(&mut state);
        Ok(incident)
    }

    /// Rebuild and publish without any input change.
    pub async fn refresh(&self) -> Arc<StatusSnapshot> {
        let mut state = self.inner.state.lock().await;
        self.publish(&mut state)
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Every incident held in memory, oldest first.
    pub async fn incidents(&self) -> Vec<Incident> {
        self.inner.state.lock().await.incidents.all().to_vec()
    }

    pub async fn incident(&self, id: &str) -> Option<Incident> {
        self.inner.state.lock().await.incidents.get(id).cloned()
    }

    /// Recent deployments, most recent first, optionally for one service.
    pub async fn deployments(&self, service: Option<&str>) -> Vec<Deployment> {
        let state = self.inner.state.lock().await;
        match service {
            Some(service) => state.ledger.for_service(service).to_vec(),
            None => state.ledger.recent().to_vec(),
        }
    }

    pub async fn history(&self, target: &str) -> Vec<ProbeResult> {
        self.inner.state.lock().await.metrics.history(target)
    }

    // ── Internals ──────────────────────────────────────────────────

    /// Build the next snapshot and swap it in. Caller holds the lock.
    fn publish(&self, state: &mut EngineState) -> Arc<StatusSnapshot> {
        let version = state.version + 1;
        let snapshot = Arc::new(build_snapshot(
            SnapshotSources {
                metrics: &state.metrics,
                incidents: &state.incidents,
                ledger: &state.ledger,
                check_interval: &self.inner.check_interval,
            },
            version,
            Utc::now(),
        ));
        state.version = version;

        self.persist(|store| store.put_snapshot(&snapshot), "snapshot");
        self.inner.snapshot_tx.send_replace(Arc::clone(&snapshot));
        debug!(
            version,
            overall = %snapshot.overall_status.status,
            "snapshot rebuilt"
        );
        snapshot
    }

    fn persist_incident(&self, incident: &Incident) {
        self.persist(|store| store.put_incident(incident), "incident");
    }

    /// Write through to the store. Failures are logged; memory stays authoritative.
    fn persist(
        &self,
        write: impl FnOnce(&StateStore) -> pulse_state::StateResult<()>,
        what: &'static str,
    ) {
        let Some(store) = &self.inner.store else {
            return;
        };
        if let Err(e) = write(store) {
            error!(error = %e, what, "failed to persist");
        }
    }
}

impl ProbeObserver for Engine {
    fn on_result(&self, result: ProbeResult) -> BoxFuture<'_> {
        Box::pin(async move {
            let target = result.target.clone();
            if let Err(e) = self.record_probe(result).await {
                warn!(%target, error = %e, "probe result rejected");
            }
        })
    }

    fn on_cycle_complete<'a>(&'a self, _report: &'a TickReport) -> BoxFuture<'a> {
        Box::pin(async move {
            self.complete_cycle(Utc::now()).await;
        })
    }
}

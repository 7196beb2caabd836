//! Wires the subsystems into one running daemon.
//!
//! In `run` mode the daemon:
//! 1. Opens the state store under `server.data_dir`, if one is configured
//! 2. Restores the engine from it
//! 3. Drives the probe scheduler on its interval
//! 4. Pushes each new snapshot to the configured sinks
//! 5. Serves the REST API until the shutdown future resolves

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use pulse_core::PulseConfig;
use pulse_engine::{Dispatcher, Engine, Publisher};
use pulse_health::{Prober, Scheduler, TickReport};
use pulse_state::{StateStore, StatusSnapshot};

const STORE_FILE: &str = "pulse.redb";
const PUBLISH_DEBOUNCE: Duration = Duration::from_secs(1);

/// Open `<data_dir>/pulse.redb`, creating the directory first.
pub fn open_store(config: &PulseConfig) -> anyhow::Result<Option<StateStore>> {
    let Some(data_dir) = &config.server.data_dir else {
        info!("no data_dir configured, state is kept in memory only");
        return Ok(None);
    };
    std::fs::create_dir_all(data_dir)?;
    let path = data_dir.join(STORE_FILE);
    let store = StateStore::open(&path)?;
    info!(path = ?path, "state store opened");
    Ok(Some(store))
}

pub struct Daemon {
    pub engine: Engine,
    pub scheduler: Scheduler,
    pub dispatcher: Dispatcher,
    pub publisher: Publisher,
}

impl Daemon {
    pub fn build(config: &PulseConfig, store: Option<StateStore>) -> anyhow::Result<Self> {
        let engine = Engine::new(config, store)?;
        info!(targets = engine.targets().len(), "engine initialized");

        let prober = Prober::new()?;
        let scheduler = Scheduler::new(
            prober,
            engine.targets().to_vec(),
            &config.scheduler,
            Arc::new(engine.clone()),
        )?;
        info!(interval = %config.scheduler.interval, "scheduler initialized");

        let publisher = Publisher::from_settings(&config.publish)?.with_debounce(PUBLISH_DEBOUNCE);
        if publisher.is_empty() {
            info!("no publish sinks configured, snapshot served over HTTP only");
        }

        let dispatcher = Dispatcher::new(engine.clone(), scheduler.clone());
        Ok(Self {
            engine,
            scheduler,
            dispatcher,
            publisher,
        })
    }

    pub fn router(&self) -> Router {
        pulse_api::build_router(self.dispatcher.clone())
    }

    /// Probe every target once and return the snapshot that cycle produced.
    pub async fn check_once(&self) -> (TickReport, Arc<StatusSnapshot>) {
        let report = self.scheduler.tick().await;
        (report, self.engine.current())
    }

    /// Run the scheduler, publisher and API server until `signal` resolves.
    pub async fn serve<F>(self, listener: TcpListener, signal: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let scheduler = self.scheduler.clone();
        let scheduler_shutdown = shutdown_rx.clone();
        let scheduler_handle = tokio::spawn(async move {
            scheduler.run(scheduler_shutdown).await;
        });

        let publisher = self.publisher.clone();
        let snapshots = self.engine.subscribe();
        let publisher_shutdown = shutdown_rx.clone();
        let publisher_handle = tokio::spawn(async move {
            publisher.run(snapshots, publisher_shutdown).await;
        });

        let router = self.router();
        info!(addr = %listener.local_addr()?, "API server starting");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                signal.await;
                info!("shutdown signal received");
                let _ = shutdown_tx.send(true);
            })
            .await?;

        let _ = scheduler_handle.await;
        let _ = publisher_handle.await;

        info!(version = self.engine.current().version, "pulse daemon stopped");
        Ok(())
    }
}

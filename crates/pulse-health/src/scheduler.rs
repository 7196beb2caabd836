//! Probe scheduler: fans out one probe per target on every tick.
//!
//! A tick that is still running when the next one fires keeps going; the
//! per-target locks make the newer tick wait for that target instead of
//! interleaving results. Results reach the observer as they arrive, so a
//! slow target never holds back the others.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use pulse_core::{ConfigError, SchedulerSettings};
use pulse_state::{ProbeOutcome, ProbeResult, Target};

use crate::checker::Prober;

pub type BoxFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Retry backoff never grows past this.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Receives probe results from the scheduler.
pub trait ProbeObserver: Send + Sync + 'static {
    /// Called for every final result while the target's probe lock is held.
    fn on_result(&self, result: ProbeResult) -> BoxFuture<'_>;

    /// Called once every probe of a cycle has returned.
    fn on_cycle_complete<'a>(&'a self, report: &'a TickReport) -> BoxFuture<'a>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("unknown target: {0}")]
    UnknownTarget(String),
}

/// Summary of one probe cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub operational: usize,
    pub degraded: usize,
    pub down: usize,
    pub elapsed: Duration,
}

impl TickReport {
    pub fn probed(&self) -> usize {
        self.operational + self.degraded + self.down
    }

    fn count(&mut self, outcome: ProbeOutcome) {
        match outcome {
            ProbeOutcome::Operational => self.operational += 1,
            ProbeOutcome::Degraded => self.degraded += 1,
            ProbeOutcome::Down => self.down += 1,
        }
    }
}

/// Cheap to clone; clones share targets, locks, and the observer.
#[derive(Clone)]
pub struct Scheduler {
    prober: Prober,
    targets: Arc<[Arc<Target>]>,
    locks: Arc<HashMap<String, Arc<Mutex<()>>>>,
    observer: Arc<dyn ProbeObserver>,
    interval: Duration,
    retries: u32,
    retry_backoff: Duration,
}

impl Scheduler {
    pub fn new(
        prober: Prober,
        targets: Vec<Target>,
        settings: &SchedulerSettings,
        observer: Arc<dyn ProbeObserver>,
    ) -> Result<Self, ConfigError> {
        let locks = targets
            .iter()
            .map(|t| (t.name.clone(), Arc::new(Mutex::new(()))))
            .collect();
        Ok(Self {
            prober,
            targets: targets.into_iter().map(Arc::new).collect(),
            locks: Arc::new(locks),
            observer,
            interval: settings.interval()?,
            retries: settings.probe_retries,
            retry_backoff: settings.retry_backoff()?,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn targets(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter().map(|t| t.as_ref())
    }

    /// Probe every target once and wait for all of them.
    pub async fn tick(&self) -> TickReport {
        self.cycle(self.targets.to_vec()).await
    }

    /// Out-of-band probe of one target, or of every target for `all`.
    pub async fn probe_now(&self, service: &str) -> Result<TickReport, SchedulerError> {
        if service.eq_ignore_ascii_case("all") {
            return Ok(self.tick().await);
        }
        let target = self
            .targets
            .iter()
            .find(|t| t.name == service)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownTarget(service.to_string()))?;
        Ok(self.cycle(vec![target]).await)
    }

    /// Tick on the configured interval until `shutdown` flips to true or its
    /// sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut in_flight = JoinSet::new();

        info!(
            targets = self.targets.len(),
            interval = ?self.interval,
            "probe scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    while in_flight.try_join_next().is_some() {}
                    if !in_flight.is_empty() {
                        debug!(running = in_flight.len(), "previous tick still running");
                    }
                    let this = self.clone();
                    in_flight.spawn(async move {
                        this.tick().await;
                    });
                }
                changed = shutdown.changed() => {
                    // A dropped sender means nobody is left to ask for a stop.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        in_flight.shutdown().await;
        info!("probe scheduler stopped");
    }

    async fn cycle(&self, targets: Vec<Arc<Target>>) -> TickReport {
        let started = Instant::now();
        let mut probes = JoinSet::new();
        for target in targets {
            let this = self.clone();
            probes.spawn(async move { this.probe_target(&target).await });
        }

        let mut report = TickReport::default();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(outcome) => report.count(outcome),
                Err(e) => warn!(error = %e, "probe task failed"),
            }
        }
        report.elapsed = started.elapsed();

        debug!(
            operational = report.operational,
            degraded = report.degraded,
            down = report.down,
            elapsed = ?report.elapsed,
            "probe cycle complete"
        );
        self.observer.on_cycle_complete(&report).await;
        report
    }

    async fn probe_target(&self, target: &Target) -> ProbeOutcome {
        let lock = match self.locks.get(&target.name) {
            Some(lock) => Arc::clone(lock),
            None => Arc::new(Mutex::new(())),
        };
        let _guard = lock.lock().await;

        let mut result = self.prober.probe(target).await;
        let mut backoff = self.retry_backoff;
        for attempt in 1..=self.retries {
            if result.outcome != ProbeOutcome::Down {
                break;
            }
            debug!(target = %target.name, attempt, ?backoff, "retrying failed probe");
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
            result = self.prober.probe(target).await;
        }

        let outcome = result.outcome;
        if outcome != ProbeOutcome::Operational {
            warn!(
                target = %target.name,
                %outcome,
                message = result.message.as_deref().unwrap_or_default(),
                "target not operational"
            );
        }
        self.observer.on_result(result).await;
        outcome
    }
}

//! Snapshot publishing: pushes each new snapshot to external sinks.
//!
//! Sinks are tried in order and the first success completes a publish.
//! When every sink fails the publish is retried with backoff; a newer
//! snapshot arriving meanwhile replaces the one being retried. The engine
//! keeps serving the last snapshot either way.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use pulse_core::{ConfigError, PublishSettings, WebhookSettings};
use pulse_state::StatusSnapshot;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rejected with HTTP {0}")]
    Rejected(u16),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("no sinks configured")]
    NoSinks,

    #[error("snapshot {version} not published: {}", .failures.join("; "))]
    AllSinksFailed { version: u64, failures: Vec<String> },
}

pub type SinkFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>>;

/// A destination for published snapshots.
pub trait SnapshotSink: Send + Sync {
    fn name(&self) -> &str;

    fn write<'a>(&'a self, snapshot: &'a StatusSnapshot) -> SinkFuture<'a>;
}

// ── File sink ─────────────────────────────────────────────────────

/// Writes the snapshot as pretty JSON. Readers see the old or the new file,
/// never a partial one.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn write_atomic(&self, snapshot: &StatusSnapshot) -> Result<(), SinkError> {
        let body = serde_json::to_vec_pretty(snapshot)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

impl SnapshotSink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    fn write<'a>(&'a self, snapshot: &'a StatusSnapshot) -> SinkFuture<'a> {
        Box::pin(self.write_atomic(snapshot))
    }
}

// ── Webhook sink ──────────────────────────────────────────────────

#[derive(Serialize)]
struct Dispatch<'a> {
    event_type: &'a str,
    client_payload: &'a StatusSnapshot,
}

/// POSTs the snapshot as a dispatch envelope.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    event_type: String,
    timeout: Duration,
}

impl WebhookSink {
    /// The bearer token is read from the environment variable named by
    /// `token_env`, never from the config file.
    pub fn from_settings(settings: &WebhookSettings) -> Result<Self, ConfigError> {
        let token = settings
            .token_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|t| !t.is_empty());
        if let (Some(var), None) = (&settings.token_env, &token) {
            warn!(%var, "webhook token variable not set, publishing without auth");
        }
        Ok(Self {
            client: reqwest::Client::new(),
            url: settings.url.clone(),
            token,
            event_type: settings.event_type.clone(),
            timeout: settings.timeout()?,
        })
    }

    async fn post(&self, snapshot: &StatusSnapshot) -> Result<(), SinkError> {
        let mut request = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&Dispatch {
                event_type: &self.event_type,
                client_payload: snapshot,
            });
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}

impl SnapshotSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    fn write<'a>(&'a self, snapshot: &'a StatusSnapshot) -> SinkFuture<'a> {
        Box::pin(self.post(snapshot))
    }
}

// ── Publisher ─────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct Publisher {
    sinks: Vec<Arc<dyn SnapshotSink>>,
    /// Quiet period after a change so a burst of rebuilds is pushed once.
    debounce: Duration,
}

impl Publisher {
    pub fn new(sinks: Vec<Arc<dyn SnapshotSink>>) -> Self {
        Self {
            sinks,
            debounce: Duration::ZERO,
        }
    }

    /// Webhook first, local file as fallback.
    pub fn from_settings(settings: &PublishSettings) -> Result<Self, ConfigError> {
        let mut sinks: Vec<Arc<dyn SnapshotSink>> = Vec::new();
        if let Some(webhook) = &settings.webhook {
            sinks.push(Arc::new(WebhookSink::from_settings(webhook)?));
        }
        if let Some(file) = &settings.file {
            sinks.push(Arc::new(FileSink::new(file)));
        }
        Ok(Self::new(sinks))
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Try each sink in order; returns the name of the one that took it.
    pub async fn publish(&self, snapshot: &StatusSnapshot) -> Result<String, PublishError> {
        if self.sinks.is_empty() {
            return Err(PublishError::NoSinks);
        }
        let mut failures = Vec::new();
        for sink in &self.sinks {
            match sink.write(snapshot).await {
                Ok(()) => return Ok(sink.name().to_string()),
                Err(e) => {
                    warn!(sink = sink.name(), version = snapshot.version, error = %e, "sink failed");
                    failures.push(format!("{}: {e}", sink.name()));
                }
            }
        }
        Err(PublishError::AllSinksFailed {
            version: snapshot.version,
            failures,
        })
    }

    /// Publish every new snapshot until shutdown.
    pub async fn run(
        &self,
        mut snapshots: watch::Receiver<Arc<StatusSnapshot>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        if self.sinks.is_empty() {
            debug!("no publish sinks configured");
            return;
        }
        info!(sinks = self.sinks.len(), "publisher started");

        'changes: loop {
            tokio::select! {
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = shutdown.changed() => break,
            }

            if !self.debounce.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.debounce) => {}
                    _ = shutdown.changed() => break,
                }
            }

            let mut backoff = INITIAL_BACKOFF;
            loop {
                let snapshot = snapshots.borrow_and_update().clone();
                match self.publish(&snapshot).await {
                    Ok(sink) => {
                        info!(version = snapshot.version, %sink, "snapshot published");
                        continue 'changes;
                    }
                    Err(e) => {
                        warn!(error = %e, retry_in = ?backoff, "publish failed");
                    }
                }

                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    changed = snapshots.changed() => {
                        if changed.is_err() {
                            break 'changes;
                        }
                    }
                    _ = shutdown.changed() => break 'changes,
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }

        info!("publisher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use chrono::Utc;
    use pulse_state::{MetricsBlock, Millis, OverallStatus, Percent, ProbeOutcome, SystemInfo};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn snapshot(version: u64) -> StatusSnapshot {
        StatusSnapshot {
            version,
            last_updated: Utc::now(),
            overall_status: OverallStatus {
                status: ProbeOutcome::Operational,
                message: "All systems operational".to_string(),
            },
            services: Vec::new(),
            metrics: MetricsBlock {
                total_uptime: Percent(Some(100.0)),
                avg_response_time: Millis(Some(12.0)),
                total_deployments: 0,
                success_rate: Percent(Some(100.0)),
                active_services: 0,
                incidents_resolved: 0,
            },
            recent_deployments: Vec::new(),
            incidents: Vec::new(),
            system_info: SystemInfo {
                last_deployment: None,
                monitored_services: 0,
                check_interval: "5m".to_string(),
                version: "0.1.0".to_string(),
            },
        }
    }

    /// Fails a fixed number of times, then succeeds.
    struct Flaky {
        failures_left: AtomicUsize,
        written: Mutex<Vec<u64>>,
    }

    impl SnapshotSink for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn write<'a>(&'a self, snapshot: &'a StatusSnapshot) -> SinkFuture<'a> {
            Box::pin(async move {
                let left = self.failures_left.load(Ordering::SeqCst);
                if left > 0 {
                    self.failures_left.store(left - 1, Ordering::SeqCst);
                    return Err(SinkError::Rejected(503));
                }
                self.written.lock().unwrap().push(snapshot.version);
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn file_sink_replaces_file_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("public").join("status.json");
        let sink = FileSink::new(&path);

        sink.write(&snapshot(1)).await.unwrap();
        sink.write(&snapshot(2)).await.unwrap();

        let written: StatusSnapshot =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written.version, 2);
        assert_eq!(written.metrics.avg_response_time, Millis(Some(12.0)));
        assert!(!dir.path().join("public").join("status.json.tmp").exists());
    }

    /// Authorization header and body of the last dispatch received.
    type Seen = Arc<Mutex<Option<(Option<String>, serde_json::Value)>>>;

    #[tokio::test]
    async fn webhook_sink_posts_dispatch_envelope() {
        let seen: Seen = Arc::default();
        let router = Router::new()
            .route(
                "/dispatches",
                post(
                    |State(seen): State<Seen>,
                     headers: HeaderMap,
                     body: axum::Json<serde_json::Value>| async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        *seen.lock().unwrap() = Some((auth, body.0));
                        StatusCode::NO_CONTENT
                    },
                ),
            )
            .with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

        let sink = WebhookSink {
            client: reqwest::Client::new(),
            url: format!("http://{addr}/dispatches"),
            token: Some("s3cret".to_string()),
            event_type: "status-update".to_string(),
            timeout: Duration::from_secs(5),
        };
        sink.write(&snapshot(4)).await.unwrap();

        let (auth, body) = seen.lock().unwrap().take().unwrap();
        assert_eq!(auth.as_deref(), Some("Bearer s3cret"));
        assert_eq!(body["event_type"], "status-update");
        assert_eq!(body["client_payload"]["version"], 4);
        assert_eq!(body["client_payload"]["metrics"]["success_rate"], "100.0%");
    }

    #[tokio::test]
    async fn falls_back_to_second_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        let failing = Arc::new(Flaky {
            failures_left: AtomicUsize::new(usize::MAX),
            written: Mutex::new(Vec::new()),
        });
        let publisher = Publisher::new(vec![
            failing as Arc<dyn SnapshotSink>,
            Arc::new(FileSink::new(&path)),
        ]);

        assert_eq!(publisher.publish(&snapshot(3)).await.unwrap(), "file");
        assert!(path.exists());
    }

    #[tokio::test]
    async fn all_sinks_failing_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be makes the rename fail.
        let path = dir.path().join("status.json");
        std::fs::create_dir_all(path.join("occupied")).unwrap();
        let publisher = Publisher::new(vec![Arc::new(FileSink::new(&path))]);

        let err = publisher.publish(&snapshot(9)).await.unwrap_err();
        assert!(matches!(err, PublishError::AllSinksFailed { version: 9, .. }));
        assert!(matches!(
            Publisher::default().publish(&snapshot(1)).await,
            Err(PublishError::NoSinks)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn run_retries_until_a_sink_accepts() {
        let sink = Arc::new(Flaky {
            failures_left: AtomicUsize::new(2),
            written: Mutex::new(Vec::new()),
        });
        let publisher = Publisher::new(vec![sink.clone() as Arc<dyn SnapshotSink>]);
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(snapshot(0)));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move { publisher.run(snapshot_rx, shutdown_rx).await });
        snapshot_tx.send_replace(Arc::new(snapshot(1)));

        // Two failures: 1s + 2s of backoff.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(*sink.written.lock().unwrap(), vec![1]);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}

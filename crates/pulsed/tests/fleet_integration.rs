//! Fleet integration tests.
//!
//! Runs the assembled daemon against local axum servers standing in for
//! monitored services, and checks what ends up in the published snapshot.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use pulse_core::PulseConfig;
use pulse_state::{IncidentSource, IncidentStatus, ProbeOutcome, ServiceHealth};
use pulsed::Daemon;

/// Fake service: `/ok` is healthy, `/slow` never answers in time, and
/// `/flaky` fails while the flag is set.
async fn fleet(failing: Arc<AtomicBool>) -> SocketAddr {
    let router = Router::new()
        .route("/ok", get(|| async { "ok" }))
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                "ok"
            }),
        )
        .route(
            "/flaky",
            get(|State(failing): State<Arc<AtomicBool>>| async move {
                if failing.load(Ordering::SeqCst) {
                    (StatusCode::SERVICE_UNAVAILABLE, "down")
                } else {
                    (StatusCode::OK, "ok")
                }
            }),
        )
        .with_state(failing);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn target(name: &str, url: String, extra: &str) -> String {
    format!("[[targets]]\nname = \"{name}\"\nurl = \"{url}\"\n{extra}\n")
}

#[tokio::test]
async fn slow_target_does_not_hold_back_the_cycle() {
    let addr = fleet(Arc::new(AtomicBool::new(false))).await;
    let mut toml = String::new();
    for name in ["api", "web", "auth", "search"] {
        toml.push_str(&target(name, format!("http://{addr}/ok"), "expected_content = \"ok\""));
    }
    toml.push_str(&target(
        "reports",
        format!("http://{addr}/slow"),
        "timeout = \"300ms\"\ncritical = false",
    ));
    let config = PulseConfig::from_toml(&toml).unwrap();
    let daemon = Daemon::build(&config, None).unwrap();

    let started = Instant::now();
    let (report, snapshot) = daemon.check_once().await;
    assert!(started.elapsed() < Duration::from_secs(5));

    assert_eq!(report.operational, 4);
    assert_eq!(report.down, 1);
    assert_eq!(snapshot.services.len(), 5);

    let fast: Vec<_> = snapshot
        .services
        .iter()
        .filter(|s| s.name != "reports")
        .collect();
    assert!(fast.iter().all(|s| s.status == ServiceHealth::Operational));

    let slow = snapshot.services.iter().find(|s| s.name == "reports").unwrap();
    assert_eq!(slow.status, ServiceHealth::Down);
    assert!(slow.message.as_deref().unwrap().starts_with("timed out"));

    // A non-critical outage only degrades the fleet, and opens no incident.
    assert_eq!(snapshot.overall_status.status, ProbeOutcome::Degraded);
    assert!(snapshot.incidents.is_empty());
    assert_eq!(snapshot.metrics.active_services, 4);
}

#[tokio::test]
async fn outage_opens_one_incident_and_recovery_resolves_it() {
    let failing = Arc::new(AtomicBool::new(true));
    let addr = fleet(failing.clone()).await;
    let toml = format!(
        "[incidents]\nauto_resolve_after = 2\n\n{}",
        target("api", format!("http://{addr}/flaky"), "")
    );
    let config = PulseConfig::from_toml(&toml).unwrap();
    let daemon = Daemon::build(&config, None).unwrap();

    for _ in 0..3 {
        daemon.check_once().await;
    }
    let snapshot = daemon.engine.current();
    assert_eq!(snapshot.overall_status.status, ProbeOutcome::Down);
    assert_eq!(snapshot.incidents.len(), 1);
    let incident = &snapshot.incidents[0];
    assert_eq!(incident.status, IncidentStatus::Investigating);
    assert_eq!(incident.source, IncidentSource::Probe);
    assert!(incident.auto_created);

    failing.store(false, Ordering::SeqCst);
    daemon.check_once().await;
    assert!(daemon.engine.current().incidents[0].is_open());

    let (_, snapshot) = daemon.check_once().await;
    assert_eq!(snapshot.overall_status.status, ProbeOutcome::Operational);
    assert_eq!(snapshot.incidents.len(), 1);
    assert_eq!(snapshot.incidents[0].status, IncidentStatus::Resolved);
    assert_eq!(snapshot.metrics.incidents_resolved, 1);
}

#[tokio::test]
async fn serve_publishes_to_file_and_stops_on_signal() {
    let addr = fleet(Arc::new(AtomicBool::new(false))).await;
    let dir = tempfile::tempdir().unwrap();
    let artifact = dir.path().join("status.json");
    let toml = format!(
        "[scheduler]\ninterval = \"1h\"\n\n[publish]\nfile = {:?}\n\n{}",
        artifact.display().to_string(),
        target("api", format!("http://{addr}/ok"), "")
    );
    let config = PulseConfig::from_toml(&toml).unwrap();
    let daemon = Daemon::build(&config, None).unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let api = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(daemon.serve(listener, async move {
        let _ = stop_rx.await;
    }));

    let client = reqwest::Client::new();
    let health = client
        .get(format!("http://{api}/healthz"))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status(), reqwest::StatusCode::OK);

    // The first scheduler tick fires immediately; wait for it to be published.
    let deadline = Instant::now() + Duration::from_secs(10);
    let published = loop {
        if let Ok(raw) = std::fs::read(&artifact) {
            let doc: serde_json::Value = serde_json::from_slice(&raw).unwrap();
            if doc["services"][0]["status"] == "operational" {
                break doc;
            }
        }
        assert!(Instant::now() < deadline, "snapshot never published");
        tokio::time::sleep(Duration::from_millis(100)).await;
    };
    assert_eq!(published["overall_status"]["status"], "operational");
    assert!(published["version"].as_u64().unwrap() >= 1);

    let served: serde_json::Value = client
        .get(format!("http://{api}/status.json"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(served["version"].as_u64().unwrap() >= published["version"].as_u64().unwrap());

    stop_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

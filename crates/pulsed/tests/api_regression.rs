//! API regression tests.
//!
//! Drives the daemon's router in-process: dispatch events, manual incident
//! changes, the published artifact, and state carried across a restart.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use pulse_core::PulseConfig;
use pulsed::{Daemon, open_store};

const CONFIG: &str = r#"
[[targets]]
name = "api"
url = "http://127.0.0.1:9/healthz"

[[targets]]
name = "web"
url = "http://127.0.0.1:9/"
critical = false
"#;

fn daemon_with(toml: &str) -> Daemon {
    let config = PulseConfig::from_toml(toml).unwrap();
    let store = open_store(&config).unwrap();
    Daemon::build(&config, store).unwrap()
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    send(router, Request::get(uri).body(Body::empty()).unwrap()).await
}

async fn post(router: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(router, req).await
}

fn deployment(service: &str, id: u64, status: &str) -> Value {
    json!({
        "event_type": "deployment-update",
        "client_payload": {
            "service": service,
            "deployment_id": id,
            "status": status,
            "deployed_by": "ci",
            "commit_sha": format!("{id:07x}"),
            "duration": "1m 30s",
        }
    })
}

#[tokio::test]
async fn deployment_events_drive_success_rate() {
    let daemon = daemon_with(CONFIG);
    let router = daemon.router();

    for id in 1..=20u64 {
        let status = if id == 7 || id == 13 { "failed" } else { "success" };
        let (code, body) = post(&router, "/api/v1/events", deployment("api", id, status)).await;
        assert_eq!(code, StatusCode::ACCEPTED, "{body}");
        assert_eq!(body["data"]["kind"], "deployment");
    }

    let (_, snapshot) = get(&router, "/status.json").await;
    assert_eq!(snapshot["metrics"]["total_deployments"], 20);
    assert_eq!(snapshot["metrics"]["success_rate"], "90.0%");
    assert_eq!(snapshot["recent_deployments"][0]["deployment_id"], "20");
    assert!(snapshot["system_info"]["last_deployment"].is_string());

    let (_, listed) = get(&router, "/api/v1/deployments?service=api").await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 20);
    let (_, other) = get(&router, "/api/v1/deployments?service=web").await;
    assert!(other["data"].as_array().unwrap().is_empty());

    let resp = router
        .clone()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let exposition = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(exposition.contains("pulse_deployments_total 20"));
    assert!(exposition.contains("pulse_deployment_success_ratio 0.9000"));
}

#[tokio::test]
async fn duplicate_deployment_is_rejected() {
    let daemon = daemon_with(CONFIG);
    let router = daemon.router();

    let (code, _) = post(&router, "/api/v1/events", deployment("api", 1, "in-progress")).await;
    assert_eq!(code, StatusCode::ACCEPTED);
    let before = daemon.engine.current().version;

    let (code, body) = post(&router, "/api/v1/events", deployment("api", 1, "success")).await;
    assert_eq!(code, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert_eq!(daemon.engine.current().version, before);

    // The same id on another service is a different deployment.
    let (code, _) = post(&router, "/api/v1/events", deployment("web", 1, "success")).await;
    assert_eq!(code, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn failed_deployment_opens_incident_and_success_closes_it() {
    let daemon = daemon_with(CONFIG);
    let router = daemon.router();

    post(&router, "/api/v1/events", deployment("api", 1, "failed")).await;
    let (_, incidents) = get(&router, "/api/v1/incidents").await;
    let incidents = incidents["data"].as_array().unwrap().clone();
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0]["source"], "deployment");
    assert_eq!(incidents[0]["status"], "investigating");

    post(&router, "/api/v1/events", deployment("api", 2, "success")).await;
    let id = incidents[0]["id"].as_str().unwrap();
    let (_, incident) = get(&router, &format!("/api/v1/incidents/{id}")).await;
    assert_eq!(incident["data"]["status"], "resolved");
}

#[tokio::test]
async fn manual_incident_lifecycle_over_http() {
    let daemon = daemon_with(CONFIG);
    let router = daemon.router();
    let request = json!({
        "title": "Elevated error rate",
        "severity": "high",
        "services_affected": ["api"],
    });

    let (code, created) = post(&router, "/api/v1/incidents", request.clone()).await;
    assert_eq!(code, StatusCode::CREATED);
    let id = created["data"]["id"].as_str().unwrap().to_string();

    // An identical request inside the dedup window returns the same incident.
    let (code, again) = post(&router, "/api/v1/incidents", request).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(again["data"]["id"], id.as_str());

    let transition = format!("/api/v1/incidents/{id}/transition");
    let (code, identified) =
        post(&router, &transition, json!({"status": "identified", "message": "bad config"})).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(identified["data"]["status"], "identified");

    let (code, _) = post(&router, &transition, json!({"status": "investigating"})).await;
    assert_eq!(code, StatusCode::CONFLICT);

    let (code, resolved) = post(&router, &transition, json!({"status": "resolved"})).await;
    assert_eq!(code, StatusCode::OK);
    assert!(resolved["data"]["resolved_at"].is_string());

    let (code, _) = post(&router, &transition, json!({"status": "monitoring"})).await;
    assert_eq!(code, StatusCode::CONFLICT);

    let (code, _) = post(
        &router,
        "/api/v1/incidents/INC-999/transition",
        json!({"status": "resolved"}),
    )
    .await;
    assert_eq!(code, StatusCode::NOT_FOUND);

    let (_, snapshot) = get(&router, "/status.json").await;
    assert_eq!(snapshot["metrics"]["incidents_resolved"], 1);
}

#[tokio::test]
async fn bad_events_are_rejected() {
    let daemon = daemon_with(CONFIG);
    let router = daemon.router();

    let req = Request::post("/api/v1/events")
        .body(Body::from("not json"))
        .unwrap();
    let (code, _) = send(&router, req).await;
    assert_eq!(code, StatusCode::BAD_REQUEST);

    let (code, body) = post(
        &router,
        "/api/v1/events",
        json!({"event_type": "reboot-world", "client_payload": {}}),
    )
    .await;
    assert_eq!(code, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("reboot-world"));

    let (code, _) = post(
        &router,
        "/api/v1/events",
        json!({"event_type": "service-update", "client_payload": {"service": "nope"}}),
    )
    .await;
    assert_eq!(code, StatusCode::NOT_FOUND);

    assert_eq!(daemon.engine.current().version, 0);
}

#[tokio::test]
async fn state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let toml = format!(
        "[server]\ndata_dir = {:?}\n{CONFIG}",
        dir.path().display().to_string()
    );

    let (incident_id, version) = {
        let daemon = daemon_with(&toml);
        let router = daemon.router();
        post(&router, "/api/v1/events", deployment("api", 41, "success")).await;
        let (_, created) = post(
            &router,
            "/api/v1/incidents",
            json!({"title": "Slow search", "services_affected": ["web"]}),
        )
        .await;
        (
            created["data"]["id"].as_str().unwrap().to_string(),
            daemon.engine.current().version,
        )
    };

    let daemon = daemon_with(&toml);
    let router = daemon.router();

    // Served as last-known-good before any probe runs.
    let (_, snapshot) = get(&router, "/status.json").await;
    assert_eq!(snapshot["version"], version);
    assert_eq!(snapshot["metrics"]["total_deployments"], 1);

    let (code, _) = get(&router, &format!("/api/v1/incidents/{incident_id}")).await;
    assert_eq!(code, StatusCode::OK);

    // The restored ledger still remembers the id.
    let (code, _) = post(&router, "/api/v1/events", deployment("api", 41, "success")).await;
    assert_eq!(code, StatusCode::CONFLICT);

    // Numbering continues after the restored incidents.
    let (_, next) = post(
        &router,
        "/api/v1/incidents",
        json!({"title": "Another one", "services_affected": ["api"]}),
    )
    .await;
    assert_ne!(next["data"]["id"], incident_id.as_str());
}

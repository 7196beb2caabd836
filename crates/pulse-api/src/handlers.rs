//! REST API handlers.
//!
//! Reads come from the published snapshot or the engine; writes go through
//! the engine. JSON responses use the `{success, data, error}` wrapper
//! except `/status.json`, which is the raw published document.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::debug;

use pulse_engine::EngineError;
use pulse_health::SchedulerError;
use pulse_incident::{IncidentError, NewIncident};
use pulse_ledger::LedgerError;
use pulse_metrics::MetricsError;
use pulse_state::{CreateIncident, EventError, IncidentStatus, StatusSnapshot};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// HTTP status for an engine error.
fn status_for(e: &EngineError) -> StatusCode {
    match e {
        EngineError::Incident(IncidentError::InvalidTransition { .. })
        | EngineError::Ledger(LedgerError::DuplicateDeploymentId { .. }) => StatusCode::CONFLICT,
        EngineError::Incident(IncidentError::NotFound(_))
        | EngineError::Scheduler(SchedulerError::UnknownTarget(_))
        | EngineError::Metrics(MetricsError::UnknownTarget(_)) => StatusCode::NOT_FOUND,
        EngineError::Incident(IncidentError::EmptyTitle) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::Event(EventError::Malformed(_)) => StatusCode::BAD_REQUEST,
        EngineError::Event(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::Config(_) | EngineError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn engine_error(e: EngineError) -> axum::response::Response {
    let status = status_for(&e);
    debug!(%status, error = %e, "request rejected");
    error_response(&e.to_string(), status).into_response()
}

// ── Snapshot ───────────────────────────────────────────────────

/// GET /status.json
pub async fn status_json(State(state): State<ApiState>) -> impl IntoResponse {
    Json(StatusSnapshot::clone(&state.engine().current()))
}

/// GET /api/v1/services
pub async fn list_services(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.engine().current().services.clone())
}

/// GET /api/v1/services/{name}
pub async fn get_service(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let snapshot = state.engine().current();
    match snapshot.services.iter().find(|s| s.name == name) {
        Some(service) => ApiResponse::ok(service.clone()).into_response(),
        None => error_response("service not found", StatusCode::NOT_FOUND).into_response(),
    }
}

// ── Incidents ──────────────────────────────────────────────────

/// GET /api/v1/incidents
pub async fn list_incidents(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.engine().incidents().await)
}

/// GET /api/v1/incidents/{id}
pub async fn get_incident(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.engine().incident(&id).await {
        Some(incident) => ApiResponse::ok(incident).into_response(),
        None => error_response("incident not found", StatusCode::NOT_FOUND).into_response(),
    }
}

/// POST /api/v1/incidents
pub async fn create_incident(
    State(state): State<ApiState>,
    Json(req): Json<CreateIncident>,
) -> impl IntoResponse {
    let request = NewIncident {
        title: req.title,
        description: req.description,
        severity: req.severity,
        services_affected: req.services_affected,
    };
    match state.engine().create_incident(request).await {
        Ok(created) => {
            let status = if created.is_new() {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            (status, ApiResponse::ok(created.incident().clone())).into_response()
        }
        Err(e) => engine_error(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransitionRequest {
    pub status: IncidentStatus,
    #[serde(default)]
    pub message: Option<String>,
}

/// POST /api/v1/incidents/{id}/transition
pub async fn transition_incident(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<TransitionRequest>,
) -> impl IntoResponse {
    match state
        .engine()
        .transition_incident(&id, req.status, req.message)
        .await
    {
        Ok(incident) => ApiResponse::ok(incident).into_response(),
        Err(e) => engine_error(e),
    }
}

// ── Deployments ────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct DeploymentQuery {
    pub service: Option<String>,
}

/// GET /api/v1/deployments
pub async fn list_deployments(
    State(state): State<ApiState>,
    Query(query): Query<DeploymentQuery>,
) -> impl IntoResponse {
    ApiResponse::ok(state.engine().deployments(query.service.as_deref()).await)
}

// ── Events ─────────────────────────────────────────────────────

/// POST /api/v1/events
///
/// Takes the raw body so envelope errors are reported by the event parser
/// rather than a generic JSON rejection.
pub async fn post_event(State(state): State<ApiState>, body: Bytes) -> impl IntoResponse {
    match state.dispatcher.dispatch_slice(&body).await {
        Ok(outcome) => (StatusCode::ACCEPTED, ApiResponse::ok(outcome)).into_response(),
        Err(e) => engine_error(e),
    }
}

// ── Operational ────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let body = pulse_metrics::render_prometheus(&state.engine().current());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

//! pulse-api: REST API for Pulse.
//!
//! Serves the published snapshot and accepts incident and deployment
//! changes. Every read comes from the current snapshot or the engine; every
//! write goes through the engine so it is published like any other change.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/status.json` | Current snapshot |
//! | GET | `/api/v1/services` | Service statuses |
//! | GET | `/api/v1/services/{name}` | One service status |
//! | GET | `/api/v1/incidents` | Incidents in the book |
//! | POST | `/api/v1/incidents` | Open an incident |
//! | GET | `/api/v1/incidents/{id}` | One incident |
//! | POST | `/api/v1/incidents/{id}/transition` | Move an incident forward |
//! | GET | `/api/v1/deployments` | Recent deployments (`?service=`) |
//! | POST | `/api/v1/events` | Dispatch envelope |
//! | GET | `/metrics` | Prometheus exposition |
//! | GET | `/healthz` | Liveness |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};

use pulse_engine::{Dispatcher, Engine};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub dispatcher: Dispatcher,
}

impl ApiState {
    pub fn engine(&self) -> &Engine {
        self.dispatcher.engine()
    }
}

/// Build the complete router.
pub fn build_router(dispatcher: Dispatcher) -> Router {
    let state = ApiState { dispatcher };

    let api_routes = Router::new()
        .route("/services", get(handlers::list_services))
        .route("/services/{name}", get(handlers::get_service))
        .route(
            "/incidents",
            get(handlers::list_incidents).post(handlers::create_incident),
        )
        .route("/incidents/{id}", get(handlers::get_incident))
        .route(
            "/incidents/{id}/transition",
            post(handlers::transition_incident),
        )
        .route("/deployments", get(handlers::list_deployments))
        .route("/events", post(handlers::post_event))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/status.json", get(handlers::status_json))
        .route("/metrics", get(handlers::prometheus_metrics))
        .route("/healthz", get(handlers::healthz))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use pulse_core::PulseConfig;
    use pulse_health::{Prober, Scheduler};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn router() -> Router {
        let config = PulseConfig::from_toml(
            r#"
            [[targets]]
            name = "api"
            url = "http://127.0.0.1:9/healthz"
            "#,
        )
        .unwrap();
        let engine = Engine::new(&config, None).unwrap();
        let scheduler = Scheduler::new(
            Prober::new().unwrap(),
            engine.targets().to_vec(),
            &config.scheduler,
            Arc::new(engine.clone()),
        )
        .unwrap();
        build_router(Dispatcher::new(engine, scheduler))
    }

    async fn get_status(uri: &str) -> StatusCode {
        router()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn routes_are_mounted() {
        assert_eq!(get_status("/healthz").await, StatusCode::OK);
        assert_eq!(get_status("/status.json").await, StatusCode::OK);
        assert_eq!(get_status("/metrics").await, StatusCode::OK);
        assert_eq!(get_status("/api/v1/services").await, StatusCode::OK);
        assert_eq!(get_status("/api/v1/services/api").await, StatusCode::OK);
        assert_eq!(get_status("/api/v1/incidents").await, StatusCode::OK);
        assert_eq!(get_status("/api/v1/incidents/INC-1").await, StatusCode::NOT_FOUND);
        assert_eq!(get_status("/api/v1/deployments?service=api").await, StatusCode::OK);
        assert_eq!(get_status("/nope").await, StatusCode::NOT_FOUND);
    }
}

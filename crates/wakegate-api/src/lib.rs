//! wakegate-api — HTTP surface of the activation controller.
//!
//! Runs as the reverse proxy's default backend. Requests the proxy could
//! not serve land on the fallback handler, which wakes the target
//! workload if it is asleep and redirects the client back once it is up.
//!
//! The proxy forwards arbitrary client paths to the public router, so it
//! carries nothing but the activation path. Admin and metrics routes live
//! on a separate router bound to the admin listener.
//!
//! # Public routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | any | (unrouted) | Activation fallback |
//! | GET | `/error` | Generic backend error (503 JSON) |
//! | GET | `/healthz` | Liveness probe |
//!
//! # Admin routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/healthz` | Liveness probe |
//! | GET | `/metrics` | Prometheus exposition |
//! | GET | `/api/v1/workloads/{namespace}/{name}` | Lifecycle state |
//! | POST | `/api/v1/workloads/{namespace}/{name}/sleep` | Scale to zero |
//! | POST | `/api/v1/workloads/{namespace}/{name}/wake` | Wake and wait |

pub mod fallback;
pub mod gateway;
pub mod handlers;
pub mod render;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use wakegate_coordinator::WakeCoordinator;
use wakegate_core::config::{GatewayConfig, WorkloadHeader};
use wakegate_metrics::WakeMetrics;
use wakegate_scaler::SleepTrigger;
use wakegate_state::StateStore;

pub use gateway::{Activation, ActivationGateway};

/// Request-independent knobs of the fallback handler.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub workload_header: WorkloadHeader,
    pub default_format: String,
    pub debug_headers: bool,
    /// `Retry-After` sent with waiting pages.
    pub retry_after_secs: u64,
}

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn StateStore>,
    pub gateway: Arc<ActivationGateway>,
    pub sleeper: Arc<SleepTrigger>,
    pub metrics: Arc<WakeMetrics>,
    pub settings: Arc<GatewaySettings>,
}

impl ApiState {
    pub fn new(
        store: Arc<dyn StateStore>,
        coordinator: Arc<WakeCoordinator>,
        sleeper: Arc<SleepTrigger>,
        metrics: Arc<WakeMetrics>,
        config: &GatewayConfig,
        wake_unrecorded: bool,
    ) -> Self {
        let retry_after_secs = coordinator.policy().poll_interval.as_secs().max(1);
        let gateway = ActivationGateway::new(store.clone(), coordinator)
            .with_wake_unrecorded(wake_unrecorded);

        Self {
            store,
            gateway: Arc::new(gateway),
            sleeper,
            metrics,
            settings: Arc::new(GatewaySettings {
                workload_header: config.workload_header,
                default_format: config.default_format.clone(),
                debug_headers: config.debug_headers,
                retry_after_secs,
            }),
        }
    }
}

/// Build the public router: activation fallback and probes.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/error", get(handlers::backend_error))
        .route("/healthz", get(handlers::healthz))
        .fallback(handlers::fallback)
        .with_state(state)
}

/// Build the admin router: workload API, metrics and probes.
pub fn build_admin_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/workloads/{namespace}/{name}", get(handlers::get_workload))
        .route("/workloads/{namespace}/{name}/sleep", post(handlers::sleep_workload))
        .route("/workloads/{namespace}/{name}/wake", post(handlers::wake_workload));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::prometheus_metrics))
        .with_state(state)
}

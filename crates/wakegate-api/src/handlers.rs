//! HTTP handlers.
//!
//! The fallback handler is the activation path; everything under
//! `/api/v1` is the admin surface and answers with a JSON envelope.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::{info, warn};

use wakegate_coordinator::WakeOutcome;
use wakegate_core::{InvalidWorkloadKey, WorkloadKey};
use wakegate_orchestrator::OrchestrationError;
use wakegate_scaler::ScalerError;
use wakegate_state::LifecycleState;

use crate::ApiState;
use crate::fallback::FallbackRequest;
use crate::gateway::Activation;
use crate::render::{PageFormat, StatusPage};

/// Response wrapper for the admin API.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

// ── Activation ─────────────────────────────────────────────────

/// Any unrouted request: the reverse proxy's fallback.
pub async fn fallback(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    let req = FallbackRequest::from_headers(&headers);
    if state.settings.debug_headers {
        req.log_headers();
    }

    let format =
        PageFormat::negotiate(req.format.as_deref().unwrap_or(&state.settings.default_format));

    let Some(key) = req.workload_key(state.settings.workload_header) else {
        return StatusPage::not_found(req.status()).render(format);
    };

    let url = req.original_url();
    match state.gateway.activate(&key, &url).await {
        Activation::PassThrough => StatusPage::for_code(req.status(), Some(key.to_string())).render(format),
        Activation::Redirect(url) => match HeaderValue::try_from(url.as_str()) {
            Ok(location) => {
                info!(workload = %key, %url, "redirecting to awake workload");
                (StatusCode::SEE_OTHER, [(header::LOCATION, location)]).into_response()
            }
            Err(e) => {
                warn!(workload = %key, error = %e, "original URL is not a valid Location");
                StatusPage::for_code(req.status(), Some(key.to_string())).render(format)
            }
        },
        Activation::Waiting => {
            info!(workload = %key, "workload still waking, asking client to retry");
            let mut resp = StatusPage::waiting(&key.to_string()).render(format);
            resp.headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(state.settings.retry_after_secs));
            resp
        }
    }
}

#[derive(Serialize)]
struct BackendError {
    message: &'static str,
    error: &'static str,
}

/// GET /error
pub async fn backend_error() -> impl IntoResponse {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(BackendError {
            message: "the requested backend is unavailable",
            error: "backend error",
        }),
    )
}

/// GET /healthz
pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

// ── Workloads ──────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct WorkloadStatus {
    pub namespace: String,
    pub name: String,
    pub state: &'static str,
}

#[derive(Debug, Serialize)]
pub struct SleepReport {
    pub namespace: String,
    pub name: String,
    pub from: &'static str,
    pub to: &'static str,
    /// The record was in a state that does not normally allow sleep.
    pub forced: bool,
}

#[derive(Debug, Serialize)]
pub struct WakeReport {
    pub namespace: String,
    pub name: String,
    pub outcome: WakeOutcome,
}

/// GET /api/v1/workloads/{namespace}/{name}
pub async fn get_workload(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Response {
    let key = match WorkloadKey::parse(namespace, name) {
        Ok(key) => key,
        Err(e) => return invalid_key(e),
    };
    match state.store.get(&key).await {
        Ok(current) => ApiResponse::ok(WorkloadStatus {
            state: LifecycleState::label(current),
            namespace: key.namespace,
            name: key.name,
        })
        .into_response(),
        Err(e) if e.is_unavailable() => error_response(&e.to_string(), StatusCode::SERVICE_UNAVAILABLE),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

fn invalid_key(err: InvalidWorkloadKey) -> Response {
    warn!(error = %err, "rejected admin request");
    error_response(&err.to_string(), StatusCode::BAD_REQUEST)
}

fn scaler_error_status(err: &ScalerError) -> StatusCode {
    match err {
        ScalerError::Orchestration(OrchestrationError::InvalidWorkload(_)) => StatusCode::BAD_REQUEST,
        ScalerError::Orchestration(OrchestrationError::NotFound(_)) => StatusCode::NOT_FOUND,
        ScalerError::Orchestration(OrchestrationError::Conflict(_)) => StatusCode::CONFLICT,
        ScalerError::Orchestration(_) => StatusCode::BAD_GATEWAY,
        ScalerError::State(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// POST /api/v1/workloads/{namespace}/{name}/sleep
pub async fn sleep_workload(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Response {
    let key = match WorkloadKey::parse(namespace, name) {
        Ok(key) => key,
        Err(e) => return invalid_key(e),
    };
    match state.sleeper.sleep(&key).await {
        Ok(transition) => ApiResponse::ok(SleepReport {
            from: LifecycleState::label(transition.from),
            to: transition.to.as_str(),
            forced: transition.invalid.is_some(),
            namespace: key.namespace,
            name: key.name,
        })
        .into_response(),
        Err(e) => error_response(&e.to_string(), scaler_error_status(&e)),
    }
}

/// POST /api/v1/workloads/{namespace}/{name}/wake
///
/// Runs a coalesced wake and reports its outcome; a timeout answers 504.
pub async fn wake_workload(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Response {
    let key = match WorkloadKey::parse(namespace, name) {
        Ok(key) => key,
        Err(e) => return invalid_key(e),
    };
    let outcome = state.gateway.coordinator().request_wake(&key).await;
    let status = match outcome {
        WakeOutcome::BecameAwake => StatusCode::OK,
        WakeOutcome::TimedOut => StatusCode::GATEWAY_TIMEOUT,
    };
    let report = WakeReport {
        namespace: key.namespace,
        name: key.name,
        outcome,
    };
    (status, ApiResponse::ok(report)).into_response()
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let body = wakegate_metrics::render_prometheus(&state.metrics.snapshot());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use wakegate_coordinator::{WakeCoordinator, WakePolicy};
    use wakegate_core::KeyLayout;
    use wakegate_core::config::GatewayConfig;
    use wakegate_metrics::WakeMetrics;
    use wakegate_orchestrator::MemoryOrchestrator;
    use wakegate_scaler::SleepTrigger;
    use wakegate_state::{EmbeddedStore, StateStore};

    fn test_state() -> (EmbeddedStore, MemoryOrchestrator, ApiState) {
        let store = EmbeddedStore::open_in_memory(KeyLayout::default()).unwrap();
        let orch = MemoryOrchestrator::new();
        let shared: Arc<dyn StateStore> = Arc::new(store.clone());
        let metrics = Arc::new(WakeMetrics::new());
        let policy = WakePolicy {
            poll_interval: Duration::from_millis(10),
            ceiling_timeout: Duration::from_millis(100),
            settle_delay: Duration::ZERO,
        };
        let coordinator = Arc::new(WakeCoordinator::new(shared.clone(), policy, metrics.clone()));
        let sleeper = Arc::new(SleepTrigger::new(
            shared.clone(),
            Arc::new(orch.clone()),
            metrics.clone(),
        ));
        let state = ApiState::new(
            shared,
            coordinator,
            sleeper,
            metrics,
            &GatewayConfig::default(),
            false,
        );
        (store, orch, state)
    }

    fn path(ns: &str, name: &str) -> Path<(String, String)> {
        Path((ns.to_string(), name.to_string()))
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        assert_eq!(healthz().await, StatusCode::OK);
    }

    #[tokio::test]
    async fn backend_error_is_unavailable() {
        let resp = backend_error().await.into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn get_unrecorded_workload() {
        let (_, _, state) = test_state();
        let resp = get_workload(State(state), path("default", "grafana")).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_workload_with_bad_record() {
        let (store, _, state) = test_state();
        store
            .put_raw(&WorkloadKey::new("default", "grafana"), "zombie")
            .unwrap();
        let resp = get_workload(State(state), path("default", "grafana")).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn sleep_scales_to_zero() {
        let (store, orch, state) = test_state();
        let key = WorkloadKey::new("default", "grafana");

        let resp = sleep_workload(State(state), path("default", "grafana")).await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(orch.replicas(&key), Some(0));
        assert_eq!(store.get(&key).await.unwrap(), Some(LifecycleState::Asleep));
    }

    #[tokio::test]
    async fn sleep_of_missing_deployment_is_not_found() {
        let (_, orch, state) = test_state();
        orch.fail_with(
            &WorkloadKey::new("default", "ghost"),
            OrchestrationError::NotFound("deployments.apps \"ghost\" not found".into()),
        );
        let resp = sleep_workload(State(state), path("default", "ghost")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn wake_without_scaler_times_out() {
        let (_, _, state) = test_state();
        let resp = wake_workload(State(state), path("default", "grafana")).await;
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn wake_of_awake_workload_is_ok() {
        let (store, _, state) = test_state();
        store
            .set(&WorkloadKey::new("default", "grafana"), LifecycleState::Awake)
            .await
            .unwrap();
        let resp = wake_workload(State(state), path("default", "grafana")).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn invalid_names_are_rejected_before_scaling() {
        let (_, orch, state) = test_state();

        let resp = sleep_workload(State(state.clone()), path("kube-system", "coredns/scale?x=1")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = wake_workload(State(state.clone()), path("Default", "grafana")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = get_workload(State(state), path("default", "")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        assert!(orch.calls().is_empty());
    }

    #[tokio::test]
    async fn prometheus_endpoint_returns_text() {
        let (_, _, state) = test_state();
        let resp = prometheus_metrics(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));
    }
}

//! End-to-end activation scenarios.
//!
//! Gateway, coordinator and scaler wired together the way `wakegated
//! serve` wires them, over an in-memory store and a recording
//! orchestrator, with short wake timings.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use tokio::sync::watch;
use tower::ServiceExt;

use wakegate_api::{ApiState, build_admin_router, build_router};
use wakegate_coordinator::{WakeCoordinator, WakePolicy};
use wakegate_core::config::GatewayConfig;
use wakegate_core::{KeyLayout, WorkloadKey};
use wakegate_metrics::WakeMetrics;
use wakegate_orchestrator::{MemoryOrchestrator, OrchestrationError};
use wakegate_scaler::{SleepTrigger, WorkloadScaler};
use wakegate_state::{EmbeddedStore, LifecycleState, StateStore};

const ORIGINAL_URL: &str = "https://grafana.example.com/d/home";

fn grafana() -> WorkloadKey {
    WorkloadKey::new("default", "grafana")
}

struct Harness {
    store: EmbeddedStore,
    orch: MemoryOrchestrator,
    metrics: Arc<WakeMetrics>,
    coordinator: Arc<WakeCoordinator>,
    router: Router,
    admin: Router,
    shutdown: watch::Sender<bool>,
    scaler: tokio::task::JoinHandle<()>,
}

impl Harness {
    async fn start(ceiling: Duration) -> Self {
        let store = EmbeddedStore::open_in_memory(KeyLayout::default()).unwrap();
        let orch = MemoryOrchestrator::new();
        let metrics = Arc::new(WakeMetrics::new());
        let shared: Arc<dyn StateStore> = Arc::new(store.clone());

        let policy = WakePolicy {
            poll_interval: Duration::from_millis(20),
            ceiling_timeout: ceiling,
            settle_delay: Duration::ZERO,
        };
        let coordinator = Arc::new(WakeCoordinator::new(shared.clone(), policy, metrics.clone()));
        let sleeper = Arc::new(SleepTrigger::new(
            shared.clone(),
            Arc::new(orch.clone()),
            metrics.clone(),
        ));

        let scaler = WorkloadScaler::new(
            shared.clone(),
            Arc::new(orch.clone()),
            1,
            metrics.clone(),
        );
        let (shutdown, shutdown_rx) = watch::channel(false);
        let scaler = tokio::spawn(async move { scaler.run(shutdown_rx).await });
        // Let the scaler subscribe before anything is published.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let state = ApiState::new(
            shared,
            coordinator.clone(),
            sleeper,
            metrics.clone(),
            &GatewayConfig::default(),
            false,
        );
        let router = build_router(state.clone());
        let admin = build_admin_router(state);

        Self {
            store,
            orch,
            metrics,
            coordinator,
            router,
            admin,
            shutdown,
            scaler,
        }
    }

    async fn fallback(&self) -> axum::response::Response {
        let req = Request::builder()
            .uri("/")
            .header("x-namespace", "default")
            .header("x-ingress-name", "grafana")
            .header("x-original-uri", "/d/home")
            .header("x-forwarded-proto", "https")
            .header("host", "grafana.example.com")
            .body(Body::empty())
            .unwrap();
        self.router.clone().oneshot(req).await.unwrap()
    }

    async fn admin_sleep(&self) -> StatusCode {
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/workloads/default/grafana/sleep")
            .body(Body::empty())
            .unwrap();
        self.admin.clone().oneshot(req).await.unwrap().status()
    }

    async fn stop(self) {
        self.shutdown.send(true).unwrap();
        self.scaler.await.unwrap();
    }
}

#[tokio::test]
async fn grafana_sleeps_and_wakes_on_demand() {
    let h = Harness::start(Duration::from_secs(5)).await;

    // Unrecorded: pass through, nothing woken.
    let resp = h.fallback().await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert!(h.orch.calls().is_empty());
    assert_eq!(h.store.get(&grafana()).await.unwrap(), None);

    // Sleep: scaled to zero and recorded.
    assert_eq!(h.admin_sleep().await, StatusCode::OK);
    assert_eq!(h.orch.calls(), vec![(grafana(), 0)]);
    assert_eq!(
        h.store.get(&grafana()).await.unwrap(),
        Some(LifecycleState::Asleep)
    );

    // Wake on request, then redirect back to the original URL.
    let resp = h.fallback().await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(resp.headers()[header::LOCATION], ORIGINAL_URL);
    assert_eq!(h.orch.calls(), vec![(grafana(), 0), (grafana(), 1)]);
    assert_eq!(
        h.store.get(&grafana()).await.unwrap(),
        Some(LifecycleState::Awake)
    );

    let snap = h.metrics.snapshot();
    assert_eq!(snap.wake_leaders, 1);
    assert_eq!(snap.wakes_became_awake, 1);
    assert_eq!(snap.scale_ups, 1);
    assert_eq!(h.coordinator.pending(), 0);

    // Already awake: straight redirect, no new wake.
    let resp = h.fallback().await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(h.metrics.snapshot().wake_leaders, 1);

    h.stop().await;
}

#[tokio::test]
async fn concurrent_requests_share_one_wake() {
    let h = Arc::new(Harness::start(Duration::from_secs(5)).await);
    assert_eq!(h.admin_sleep().await, StatusCode::OK);

    let mut handles = Vec::new();
    for _ in 0..10 {
        let h = h.clone();
        handles.push(tokio::spawn(async move { h.fallback().await.status() }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::SEE_OTHER);
    }

    // One scale-to-zero, one scale-up.
    assert_eq!(h.orch.calls(), vec![(grafana(), 0), (grafana(), 1)]);
    assert_eq!(h.metrics.snapshot().wake_leaders, 1);

    let h = Arc::into_inner(h).unwrap();
    h.stop().await;
}

#[tokio::test]
async fn stuck_wake_times_out_then_recovers() {
    let h = Arc::new(Harness::start(Duration::from_millis(300)).await);
    assert_eq!(h.admin_sleep().await, StatusCode::OK);
    h.orch
        .fail_with(&grafana(), OrchestrationError::Unavailable("apiserver down".into()));

    let mut handles = Vec::new();
    for _ in 0..5 {
        let h = h.clone();
        handles.push(tokio::spawn(async move {
            let resp = h.fallback().await;
            (resp.status(), resp.headers().contains_key(header::LOCATION))
        }));
    }
    for handle in handles {
        let (status, redirected) = handle.await.unwrap();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!redirected);
    }

    // The failed scale-up never advanced the record, and the group is gone.
    assert_eq!(
        h.store.get(&grafana()).await.unwrap(),
        Some(LifecycleState::WakingUp)
    );
    assert_eq!(h.coordinator.pending(), 0);
    assert_eq!(h.metrics.snapshot().wakes_timed_out, 1);

    // Once the API is back, the next request starts a fresh wake.
    h.orch.clear_failure(&grafana());
    let resp = h.fallback().await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(h.metrics.snapshot().wake_leaders, 2);

    let h = Arc::into_inner(h).unwrap();
    h.stop().await;
}

#[tokio::test]
async fn shutdown_answers_parked_requests_with_waiting_page() {
    let h = Arc::new(Harness::start(Duration::from_secs(60)).await);
    assert_eq!(h.admin_sleep().await, StatusCode::OK);
    h.orch
        .fail_with(&grafana(), OrchestrationError::Unavailable("apiserver down".into()));

    let parked = {
        let h = h.clone();
        tokio::spawn(async move { h.fallback().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.coordinator.is_pending(&grafana()));

    h.coordinator.shutdown();

    let resp = tokio::time::timeout(Duration::from_secs(1), parked)
        .await
        .expect("parked request released on shutdown")
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(resp.headers().contains_key(header::RETRY_AFTER));
    assert!(!resp.headers().contains_key(header::LOCATION));

    let h = Arc::into_inner(h).unwrap();
    h.stop().await;
}

//! Scale a workload to zero and record it as sleeping.

use std::sync::Arc;

use tracing::{info, warn};

use wakegate_core::WorkloadKey;
use wakegate_metrics::WakeMetrics;
use wakegate_orchestrator::Orchestrator;
use wakegate_state::{StateStore, Transition, next_on_sleep};

use crate::error::ScalerResult;

/// Puts workloads to sleep on demand.
///
/// Replicas go to zero first; the record is only written once the
/// orchestrator accepted the change. Repeating a sleep is harmless.
pub struct SleepTrigger {
    store: Arc<dyn StateStore>,
    orchestrator: Arc<dyn Orchestrator>,
    metrics: Arc<WakeMetrics>,
}

impl SleepTrigger {
    pub fn new(
        store: Arc<dyn StateStore>,
        orchestrator: Arc<dyn Orchestrator>,
        metrics: Arc<WakeMetrics>,
    ) -> Self {
        Self {
            store,
            orchestrator,
            metrics,
        }
    }

    /// Scale `key` to zero replicas and record `sleeping`.
    pub async fn sleep(&self, key: &WorkloadKey) -> ScalerResult<Transition> {
        if let Err(e) = self.orchestrator.set_replicas(key, 0).await {
            self.metrics.record_sleep(false);
            warn!(workload = %key, error = %e, "scale to zero failed");
            return Err(e.into());
        }

        let current = match self.store.get(key).await {
            Ok(state) => state,
            Err(e) => {
                warn!(workload = %key, error = %e, "could not read lifecycle record");
                None
            }
        };

        let transition = next_on_sleep(current);
        if let Some(invalid) = &transition.invalid {
            warn!(workload = %key, "{invalid}");
        }
        if transition.changes_record()
            && let Err(e) = self.store.set(key, transition.to).await
        {
            self.metrics.record_sleep(false);
            return Err(e.into());
        }

        self.metrics.record_sleep(true);
        info!(workload = %key, "workload put to sleep");
        Ok(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wakegate_core::KeyLayout;
    use wakegate_orchestrator::{MemoryOrchestrator, OrchestrationError};
    use wakegate_state::{EmbeddedStore, LifecycleState};

    fn grafana() -> WorkloadKey {
        WorkloadKey::new("default", "grafana")
    }

    fn setup() -> (EmbeddedStore, MemoryOrchestrator, Arc<WakeMetrics>, SleepTrigger) {
        let store = EmbeddedStore::open_in_memory(KeyLayout::default()).unwrap();
        let orch = MemoryOrchestrator::new();
        let metrics = Arc::new(WakeMetrics::new());
        let trigger = SleepTrigger::new(
            Arc::new(store.clone()),
            Arc::new(orch.clone()),
            metrics.clone(),
        );
        (store, orch, metrics, trigger)
    }

    #[tokio::test]
    async fn sleep_scales_to_zero_and_records() {
        let (store, orch, _, trigger) = setup();
        store.set(&grafana(), LifecycleState::Awake).await.unwrap();

        let transition = trigger.sleep(&grafana()).await.unwrap();

        assert!(transition.invalid.is_none());
        assert_eq!(orch.replicas(&grafana()), Some(0));
        assert_eq!(store.get(&grafana()).await.unwrap(), Some(LifecycleState::Asleep));
    }

    #[tokio::test]
    async fn first_sleep_of_unrecorded_workload() {
        let (store, _, _, trigger) = setup();

        let transition = trigger.sleep(&grafana()).await.unwrap();

        assert_eq!(transition.from, None);
        assert_eq!(store.get(&grafana()).await.unwrap(), Some(LifecycleState::Asleep));
    }

    #[tokio::test]
    async fn sleep_is_idempotent() {
        let (store, orch, metrics, trigger) = setup();

        trigger.sleep(&grafana()).await.unwrap();
        let again = trigger.sleep(&grafana()).await.unwrap();

        assert!(!again.changes_record());
        assert_eq!(orch.calls(), vec![(grafana(), 0), (grafana(), 0)]);
        assert_eq!(store.get(&grafana()).await.unwrap(), Some(LifecycleState::Asleep));
        assert_eq!(metrics.snapshot().sleeps, 2);
    }

    #[tokio::test]
    async fn sleep_during_wake_is_forced() {
        let (store, _, _, trigger) = setup();
        store.set(&grafana(), LifecycleState::WakingUp).await.unwrap();

        let transition = trigger.sleep(&grafana()).await.unwrap();

        assert!(transition.invalid.is_some());
        assert_eq!(store.get(&grafana()).await.unwrap(), Some(LifecycleState::Asleep));
    }

    #[tokio::test]
    async fn orchestration_failure_keeps_record() {
        let (store, orch, metrics, trigger) = setup();
        store.set(&grafana(), LifecycleState::Awake).await.unwrap();
        orch.fail_with(&grafana(), OrchestrationError::Conflict("resourceVersion".into()));

        assert!(trigger.sleep(&grafana()).await.is_err());
        assert_eq!(store.get(&grafana()).await.unwrap(), Some(LifecycleState::Awake));
        assert_eq!(metrics.snapshot().sleep_failures, 1);
    }
}

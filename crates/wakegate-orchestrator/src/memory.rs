//! In-memory orchestrator.
//!
//! Keeps replica counts in a map and records every call. Backs
//! `orchestrator.kind = "memory"` dry runs, and lets tests inject
//! per-workload failures.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use wakegate_core::WorkloadKey;

use crate::Orchestrator;
use crate::error::{OrchestrationError, OrchestrationResult};

#[derive(Default)]
struct Inner {
    replicas: HashMap<WorkloadKey, u32>,
    calls: Vec<(WorkloadKey, u32)>,
    failures: HashMap<WorkloadKey, OrchestrationError>,
    delays: HashMap<WorkloadKey, Duration>,
}

/// Records replica updates instead of applying them to a cluster.
#[derive(Clone, Default)]
pub struct MemoryOrchestrator {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every call for `key` fail with `error` until cleared.
    pub fn fail_with(&self, key: &WorkloadKey, error: OrchestrationError) {
        self.lock().failures.insert(key.clone(), error);
    }

    pub fn clear_failure(&self, key: &WorkloadKey) {
        self.lock().failures.remove(key);
    }

    /// Make every call for `key` take `delay` before it applies.
    pub fn delay(&self, key: &WorkloadKey, delay: Duration) {
        self.lock().delays.insert(key.clone(), delay);
    }

    /// Last replica count applied to `key`, if any.
    pub fn replicas(&self, key: &WorkloadKey) -> Option<u32> {
        self.lock().replicas.get(key).copied()
    }

    /// Every call received, in order, including failed ones.
    pub fn calls(&self) -> Vec<(WorkloadKey, u32)> {
        self.lock().calls.clone()
    }
}

#[async_trait]
impl Orchestrator for MemoryOrchestrator {
    async fn set_replicas(&self, key: &WorkloadKey, replicas: u32) -> OrchestrationResult<()> {
        let delay = {
            let mut inner = self.lock();
            inner.calls.push((key.clone(), replicas));
            if let Some(err) = inner.failures.get(key) {
                return Err(err.clone());
            }
            inner.delays.get(key).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.lock().replicas.insert(key.clone(), replicas);
        debug!(workload = %key, replicas, "replica count recorded");
        Ok(())
    }
}

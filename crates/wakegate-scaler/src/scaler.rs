//! Workload scaler: consumes wake events and restores replicas.
//!
//! Scale-ups for different workloads run concurrently, up to a bound.
//! Per workload they are serialized: an event that arrives while its
//! workload is being scaled is folded into one follow-up run, which finds
//! the record `awake` and is skipped. A burst of duplicates therefore
//! costs one orchestration call, and a slow workload never delays others.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use wakegate_core::{WakeEvent, WorkloadKey};
use wakegate_metrics::WakeMetrics;
use wakegate_orchestrator::Orchestrator;
use wakegate_state::{LifecycleState, StateStore, next_on_scale_complete};

use crate::error::ScalerResult;

/// Default delay before resubscribing after the wake subscription ends.
const RESUBSCRIBE_BACKOFF: Duration = Duration::from_secs(1);

/// Default bound on concurrent scale-ups.
const MAX_CONCURRENT: usize = 16;

/// What handling one wake event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleOutcome {
    /// The record was already `awake`; nothing was called.
    AlreadyAwake,
    /// Replicas were restored and the record set to `awake`.
    Scaled { replicas: u32 },
}

/// Subscribes to wake events and brings workloads back up.
#[derive(Clone)]
pub struct WorkloadScaler {
    store: Arc<dyn StateStore>,
    orchestrator: Arc<dyn Orchestrator>,
    running_replicas: u32,
    metrics: Arc<WakeMetrics>,
    resubscribe_backoff: Duration,
    max_concurrent: usize,
}

/// Scale-ups currently running, at most one per workload.
#[derive(Default)]
struct InFlight {
    tasks: JoinSet<WorkloadKey>,
    running: HashSet<WorkloadKey>,
    /// Workloads that got another event while their scale-up ran.
    rerun: HashSet<WorkloadKey>,
}

impl WorkloadScaler {
    pub fn new(
        store: Arc<dyn StateStore>,
        orchestrator: Arc<dyn Orchestrator>,
        running_replicas: u32,
        metrics: Arc<WakeMetrics>,
    ) -> Self {
        Self {
            store,
            orchestrator,
            running_replicas,
            metrics,
            resubscribe_backoff: RESUBSCRIBE_BACKOFF,
            max_concurrent: MAX_CONCURRENT,
        }
    }

    /// Override the delay between resubscription attempts.
    pub fn with_resubscribe_backoff(mut self, backoff: Duration) -> Self {
        self.resubscribe_backoff = backoff;
        self
    }

    /// Override the bound on concurrent scale-ups. Zero is read as one.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Handle a single wake event for `key`.
    ///
    /// An orchestration failure is returned without touching the record,
    /// so the workload stays `waking_up` and a later event retries.
    pub async fn handle_event(&self, key: &WorkloadKey) -> ScalerResult<ScaleOutcome> {
        let current = match self.store.get(key).await {
            Ok(state) => state,
            Err(e) => {
                // Unknown record: proceed as if a wake is in flight.
                warn!(workload = %key, error = %e, "could not read lifecycle record");
                Some(LifecycleState::WakingUp)
            }
        };

        if current == Some(LifecycleState::Awake) {
            self.metrics.record_event(true);
            debug!(workload = %key, "already awake, skipping duplicate wake event");
            return Ok(ScaleOutcome::AlreadyAwake);
        }
        self.metrics.record_event(false);

        if let Err(e) = self.orchestrator.set_replicas(key, self.running_replicas).await {
            self.metrics.record_scale_up(false);
            return Err(e.into());
        }
        self.metrics.record_scale_up(true);

        let transition = next_on_scale_complete(current);
        if let Some(invalid) = &transition.invalid {
            warn!(workload = %key, "{invalid}");
        }
        self.store.set(key, transition.to).await?;

        info!(workload = %key, replicas = self.running_replicas, "workload scaled up");
        Ok(ScaleOutcome::Scaled {
            replicas: self.running_replicas,
        })
    }

    fn handle_payload(&self, inflight: &mut InFlight, payload: &str) {
        match WakeEvent::decode(payload) {
            Ok(event) => self.dispatch(inflight, event.key),
            Err(e) => warn!(error = %e, "ignoring wake event"),
        }
    }

    /// Start a scale-up for `key`, or queue one behind the running one.
    fn dispatch(&self, inflight: &mut InFlight, key: WorkloadKey) {
        if inflight.running.contains(&key) {
            debug!(workload = %key, "scale-up in flight, queueing follow-up");
            inflight.rerun.insert(key);
            return;
        }

        inflight.running.insert(key.clone());
        let scaler = self.clone();
        inflight.tasks.spawn(async move {
            if let Err(e) = scaler.handle_event(&key).await {
                error!(workload = %key, error = %e, "wake event failed");
            }
            key
        });
    }

    fn complete(&self, inflight: &mut InFlight, joined: Result<WorkloadKey, JoinError>) {
        match joined {
            Ok(key) => {
                inflight.running.remove(&key);
                if inflight.rerun.remove(&key) {
                    self.dispatch(inflight, key);
                }
            }
            Err(e) => error!(error = %e, "scale-up task failed"),
        }
    }

    async fn drain(&self, inflight: &mut InFlight) {
        info!(in_flight = inflight.tasks.len(), "workload scaler shutting down");
        while let Some(joined) = inflight.tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "scale-up task failed");
            }
        }
    }

    /// Run the subscription loop until `shutdown` fires.
    ///
    /// Per-event failures are logged and never end the loop. If the
    /// subscription itself ends, the scaler resubscribes after a backoff;
    /// events published in between are lost and recovered by the next
    /// wake request for the workload. Running scale-ups finish before the
    /// loop returns.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            replicas = self.running_replicas,
            max_concurrent = self.max_concurrent,
            "workload scaler started"
        );
        let mut inflight = InFlight::default();

        loop {
            match self.store.subscribe_wakes().await {
                Ok(mut subscription) => {
                    debug!(topic = subscription.topic(), "subscribed to wake events");
                    loop {
                        tokio::select! {
                            payload = subscription.next(), if inflight.tasks.len() < self.max_concurrent => {
                                match payload {
                                    Some(payload) => self.handle_payload(&mut inflight, &payload),
                                    None => {
                                        warn!("wake subscription ended");
                                        break;
                                    }
                                }
                            }
                            Some(joined) = inflight.tasks.join_next() => self.complete(&mut inflight, joined),
                            _ = shutdown.changed() => {
                                self.drain(&mut inflight).await;
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "failed to subscribe to wake events");
                }
            }

            let backoff = tokio::time::sleep(self.resubscribe_backoff);
            tokio::pin!(backoff);
            loop {
                tokio::select! {
                    _ = &mut backoff => break,
                    Some(joined) = inflight.tasks.join_next() => self.complete(&mut inflight, joined),
                    _ = shutdown.changed() => {
                        self.drain(&mut inflight).await;
                        return;
                    }
                }
            }
        }
    }
}

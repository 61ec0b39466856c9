//! Activation gateway: decides what a fallback request gets.

use std::sync::Arc;

use tracing::{debug, warn};

use wakegate_coordinator::{WakeCoordinator, WakeOutcome};
use wakegate_core::WorkloadKey;
use wakegate_state::{LifecycleState, StateStore};

/// What the HTTP layer should do with a request for a workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    /// Nothing is known to be sleeping; answer as a plain default backend.
    PassThrough,
    /// The workload is serving; send the client back to this URL.
    Redirect(String),
    /// The wake did not finish in time; show a waiting page, never redirect.
    Waiting,
}

/// Turns lifecycle state into an activation decision, waking on demand.
pub struct ActivationGateway {
    store: Arc<dyn StateStore>,
    coordinator: Arc<WakeCoordinator>,
    wake_unrecorded: bool,
}

impl ActivationGateway {
    pub fn new(store: Arc<dyn StateStore>, coordinator: Arc<WakeCoordinator>) -> Self {
        Self {
            store,
            coordinator,
            wake_unrecorded: false,
        }
    }

    /// Also wake workloads that have no lifecycle record.
    pub fn with_wake_unrecorded(mut self, wake_unrecorded: bool) -> Self {
        self.wake_unrecorded = wake_unrecorded;
        self
    }

    pub fn coordinator(&self) -> &Arc<WakeCoordinator> {
        &self.coordinator
    }

    /// Decide the response for a request to `key` originally aimed at `url`.
    ///
    /// Suspends for the duration of a wake when the workload is dormant.
    /// A failed initial read passes through rather than blocking the
    /// request on store trouble.
    pub async fn activate(&self, key: &WorkloadKey, url: &str) -> Activation {
        let current = match self.store.get(key).await {
            Ok(state) => state,
            Err(e) => {
                warn!(workload = %key, error = %e, "lifecycle state unknown, passing through");
                return Activation::PassThrough;
            }
        };
        debug!(workload = %key, state = LifecycleState::label(current), "activation request");

        match current {
            None if !self.wake_unrecorded => Activation::PassThrough,
            Some(LifecycleState::Awake) => Activation::Redirect(url.to_string()),
            None | Some(LifecycleState::Asleep) | Some(LifecycleState::WakingUp) => {
                match self.coordinator.request_wake(key).await {
                    WakeOutcome::BecameAwake => Activation::Redirect(url.to_string()),
                    WakeOutcome::TimedOut => Activation::Waiting,
                }
            }
        }
    }
}

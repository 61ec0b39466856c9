//! Coalescing wake requests per workload.
//!
//! Exactly one wait group exists per workload at a time. The first
//! caller to find a workload dormant creates it and spawns a driver task
//! that owns the bounded wait; everyone else subscribes to the group's
//! `watch` channel. The driver outlives any individual caller, so a
//! dropped request never strands the callers that joined it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use wakegate_core::config::{ConfigResult, WakeSettings};
use wakegate_core::{WakeEvent, WorkloadKey};
use wakegate_metrics::WakeMetrics;
use wakegate_state::{LifecycleState, StateStore, next_on_wake};

/// Terminal outcome of a wake request, shared by every coalesced caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeOutcome {
    BecameAwake,
    TimedOut,
}

impl WakeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WakeOutcome::BecameAwake => "became_awake",
            WakeOutcome::TimedOut => "timed_out",
        }
    }
}

/// Timing of the bounded wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakePolicy {
    /// Interval between store polls while waiting for `awake`.
    pub poll_interval: Duration,
    /// Maximum time a wait group stays open.
    pub ceiling_timeout: Duration,
    /// Delay before answering a caller that found the workload already awake.
    pub settle_delay: Duration,
}

impl Default for WakePolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            ceiling_timeout: Duration::from_secs(15 * 60),
            settle_delay: Duration::ZERO,
        }
    }
}

impl WakePolicy {
    pub fn from_settings(settings: &WakeSettings) -> ConfigResult<Self> {
        Ok(Self {
            poll_interval: settings.poll_interval()?,
            ceiling_timeout: settings.ceiling_timeout()?,
            settle_delay: settings.settle_delay()?,
        })
    }
}

type OutcomeRx = watch::Receiver<Option<WakeOutcome>>;
type OutcomeTx = watch::Sender<Option<WakeOutcome>>;

/// Per-workload wait groups, keyed by workload.
type WaitGroups = Arc<Mutex<HashMap<WorkloadKey, OutcomeRx>>>;

/// Coordinates wake requests for one controller process.
///
/// Constructed once at startup and shared as `Arc<WakeCoordinator>`.
pub struct WakeCoordinator {
    store: Arc<dyn StateStore>,
    policy: WakePolicy,
    groups: WaitGroups,
    metrics: Arc<WakeMetrics>,
    closing: watch::Sender<bool>,
}

impl WakeCoordinator {
    pub fn new(store: Arc<dyn StateStore>, policy: WakePolicy, metrics: Arc<WakeMetrics>) -> Self {
        Self {
            store,
            policy,
            groups: Arc::new(Mutex::new(HashMap::new())),
            metrics,
            closing: watch::Sender::new(false),
        }
    }

    pub fn policy(&self) -> &WakePolicy {
        &self.policy
    }

    /// Wake `key` if needed and wait until it is awake or the ceiling
    /// timeout elapses.
    ///
    /// Concurrent calls for the same workload share one wake event and
    /// one outcome.
    pub async fn request_wake(&self, key: &WorkloadKey) -> WakeOutcome {
        self.metrics.record_wake_request();

        // A read slower than one poll interval counts as failed; the
        // driver re-reads under the group deadline anyway.
        let observed = match tokio::time::timeout(self.policy.poll_interval, self.store.get(key)).await
        {
            Ok(Ok(state)) => state,
            Ok(Err(e)) => {
                warn!(workload = %key, error = %e, "state read failed, treating workload as dormant");
                None
            }
            Err(_) => {
                warn!(workload = %key, "state read timed out, treating workload as dormant");
                None
            }
        };

        if observed == Some(LifecycleState::Awake) {
            self.metrics.record_fast_path();
            if !self.policy.settle_delay.is_zero() {
                tokio::time::sleep(self.policy.settle_delay).await;
            }
            debug!(workload = %key, "already awake");
            return WakeOutcome::BecameAwake;
        }

        let mut rx = self.join_or_lead(key);
        wait_for_outcome(&mut rx).await
    }

    /// Resolve every open wait group as timed out and make later groups
    /// resolve immediately.
    ///
    /// Lets in-flight requests answer with a waiting page while the
    /// server drains, instead of holding them until the ceiling.
    pub fn shutdown(&self) {
        let open = self.pending();
        self.closing.send_replace(true);
        info!(open_groups = open, "wake coordinator shutting down");
    }

    /// Number of wait groups currently open.
    pub fn pending(&self) -> usize {
        lock_groups(&self.groups).len()
    }

    /// Whether a wait group is open for `key`.
    pub fn is_pending(&self, key: &WorkloadKey) -> bool {
        lock_groups(&self.groups).contains_key(key)
    }

    /// Check-or-create the wait group for `key` in one critical section.
    fn join_or_lead(&self, key: &WorkloadKey) -> OutcomeRx {
        let mut groups = lock_groups(&self.groups);

        if let Some(rx) = groups.get(key) {
            // A closed channel means the driver died without resolving;
            // replace the group instead of joining a dead one.
            if rx.has_changed().is_ok() || rx.borrow().is_some() {
                self.metrics.record_joiner();
                debug!(workload = %key, "joined pending wake");
                return rx.clone();
            }
            warn!(workload = %key, "replacing abandoned wait group");
            self.metrics.record_resolved(false);
        }

        let (tx, rx) = watch::channel(None);
        groups.insert(key.clone(), rx.clone());
        self.metrics.record_leader();
        drop(groups);

        let driver = WakeDriver {
            store: self.store.clone(),
            policy: self.policy.clone(),
            groups: self.groups.clone(),
            metrics: self.metrics.clone(),
            closing: self.closing.subscribe(),
            key: key.clone(),
        };
        tokio::spawn(driver.run(tx));
        rx
    }
}

fn lock_groups(groups: &WaitGroups) -> MutexGuard<'_, HashMap<WorkloadKey, OutcomeRx>> {
    groups.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn wait_for_outcome(rx: &mut OutcomeRx) -> WakeOutcome {
    match rx.wait_for(Option::is_some).await {
        Ok(outcome) => (*outcome).unwrap_or(WakeOutcome::TimedOut),
        // Driver dropped without resolving; never report awake on that.
        Err(_) => WakeOutcome::TimedOut,
    }
}

/// Resolves once the coordinator starts shutting down.
async fn closed(closing: &mut watch::Receiver<bool>) {
    if closing.wait_for(|closing| *closing).await.is_err() {
        // Coordinator dropped without a shutdown: only the deadline ends the wait.
        std::future::pending::<()>().await;
    }
}

/// Owns one wait group from creation to teardown.
struct WakeDriver {
    store: Arc<dyn StateStore>,
    policy: WakePolicy,
    groups: WaitGroups,
    metrics: Arc<WakeMetrics>,
    closing: watch::Receiver<bool>,
    key: WorkloadKey,
}

impl WakeDriver {
    async fn run(self, tx: OutcomeTx) {
        let started = Instant::now();
        // Every store call of the group runs under this one deadline.
        let deadline = started + self.policy.ceiling_timeout;
        let mut closing = self.closing.clone();

        let outcome = tokio::select! {
            woke = tokio::time::timeout_at(deadline, self.wake_until_awake()) => match woke {
                Ok(()) => WakeOutcome::BecameAwake,
                Err(_) => WakeOutcome::TimedOut,
            },
            _ = closed(&mut closing) => {
                info!(workload = %self.key, "releasing waiters on shutdown");
                WakeOutcome::TimedOut
            }
        };

        // Release joiners and drop the group atomically, so a caller that
        // arrives afterwards starts a fresh wait.
        {
            let mut groups = lock_groups(&self.groups);
            self.metrics.record_resolved(outcome == WakeOutcome::BecameAwake);
            let _ = tx.send(Some(outcome));
            groups.remove(&self.key);
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            WakeOutcome::BecameAwake => {
                info!(workload = %self.key, elapsed_ms, "workload awake")
            }
            WakeOutcome::TimedOut => {
                warn!(workload = %self.key, elapsed_ms, "workload did not wake before ceiling timeout")
            }
        }
    }

    /// Record `waking_up`, publish the wake event, then poll until the
    /// workload is awake. Only returns once it is.
    async fn wake_until_awake(&self) {
        // The caller's observation may be stale or missing; decide the
        // write from a fresh read.
        match self.store.get(&self.key).await {
            Ok(Some(LifecycleState::Awake)) => {
                debug!(workload = %self.key, "awake before the wake was published");
                return;
            }
            Ok(current) => self.record_waking(current).await,
            Err(e) if e.is_unavailable() => {
                warn!(workload = %self.key, error = %e, "state unknown, publishing without recording waking_up");
            }
            // An unknown stored value is overwritten.
            Err(_) => self.record_waking(None).await,
        }

        if let Err(e) = self.store.publish_wake(&WakeEvent::new(self.key.clone())).await {
            warn!(workload = %self.key, error = %e, "failed to publish wake event");
        }

        self.poll_until_awake().await
    }

    /// Record `waking_up` before publishing so a fast scaler's `awake`
    /// write cannot be overwritten by ours.
    async fn record_waking(&self, current: Option<LifecycleState>) {
        info!(
            workload = %self.key,
            state = LifecycleState::label(current),
            "waking workload"
        );
        let transition = next_on_wake(current);
        if transition.changes_record()
            && let Err(e) = self.store.set(&self.key, transition.to).await
        {
            warn!(workload = %self.key, error = %e, "failed to record waking_up");
        }
    }

    /// Poll the store until `awake`. Read errors are missed ticks, never
    /// success.
    async fn poll_until_awake(&self) {
        let mut ticker = tokio::time::interval(self.policy.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.store.get(&self.key).await {
                Ok(Some(LifecycleState::Awake)) => return,
                Ok(state) => {
                    debug!(workload = %self.key, state = LifecycleState::label(state), "still waiting");
                }
                Err(e) => {
                    self.metrics.record_poll_error();
                    warn!(workload = %self.key, error = %e, "state poll failed");
                }
            }
        }
    }
}

//! The `StateStore` contract shared by every backend.
//!
//! Single-key get/set of lifecycle records plus topic-based
//! publish/subscribe. No multi-key transactions are offered or needed.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use wakegate_core::{KeyLayout, WakeEvent, WorkloadKey};

use crate::error::StateResult;
use crate::types::LifecycleState;

/// Buffered payloads per subscription before the forwarder backs off.
pub(crate) const SUBSCRIPTION_BUFFER: usize = 256;

/// Shared, externally visible store of lifecycle records.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Current lifecycle state; `Ok(None)` when no record exists.
    async fn get(&self, key: &WorkloadKey) -> StateResult<Option<LifecycleState>>;

    /// Overwrite the lifecycle record.
    async fn set(&self, key: &WorkloadKey, state: LifecycleState) -> StateResult<()>;

    /// Broadcast a payload to current subscribers of `topic`.
    async fn publish(&self, topic: &str, payload: &str) -> StateResult<()>;

    /// Start receiving payloads published to `topic` from now on.
    async fn subscribe(&self, topic: &str) -> StateResult<Subscription>;

    /// Record key and topic naming used by this store.
    fn layout(&self) -> &KeyLayout;

    /// Publish a wake event on the configured wake topic.
    async fn publish_wake(&self, event: &WakeEvent) -> StateResult<()> {
        let topic = self.layout().wake_topic.clone();
        self.publish(&topic, &event.encode()).await
    }

    /// Subscribe to the configured wake topic.
    async fn subscribe_wakes(&self) -> StateResult<Subscription> {
        let topic = self.layout().wake_topic.clone();
        self.subscribe(&topic).await
    }
}

/// A live stream of payloads for one topic.
///
/// Backed by a forwarding task owned by the subscription; dropping the
/// subscription cancels it. `next()` returns `None` once the backend
/// connection is gone and the caller should resubscribe.
pub struct Subscription {
    topic: String,
    rx: mpsc::Receiver<String>,
    forwarder: JoinHandle<()>,
}

impl Subscription {
    pub fn new(topic: &str, rx: mpsc::Receiver<String>, forwarder: JoinHandle<()>) -> Self {
        Self {
            topic: topic.to_string(),
            rx,
            forwarder,
        }
    }

    /// Wait for the next payload.
    pub async fn next(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

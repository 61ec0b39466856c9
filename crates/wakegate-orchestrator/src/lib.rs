//! wakegate-orchestrator — the replica-count boundary.
//!
//! The scaler and the sleep trigger only ever need one call from the
//! cluster: set a workload's replica count. [`Orchestrator`] is that
//! seam; [`KubeScaleClient`] implements it against the Kubernetes
//! `apps/v1` scale subresource and [`MemoryOrchestrator`] records calls
//! in memory for dry runs and tests.

pub mod error;
pub mod kube;
pub mod memory;

use async_trait::async_trait;
use wakegate_core::WorkloadKey;

pub use error::{OrchestrationError, OrchestrationResult};
pub use kube::KubeScaleClient;
pub use memory::MemoryOrchestrator;

/// Sets replica counts on cluster workloads.
///
/// Implementations must treat repeating the same count as a no-op.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn set_replicas(&self, key: &WorkloadKey, replicas: u32) -> OrchestrationResult<()>;
}

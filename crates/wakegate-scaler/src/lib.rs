//! wakegate-scaler — the side of the wake protocol that touches the cluster.
//!
//! - [`WorkloadScaler`]: a long-lived subscriber to the wake topic. For
//!   each event it restores the workload's running replica count and
//!   records `awake`. Duplicate events are expected and harmless.
//! - [`SleepTrigger`]: scales a workload to zero and records `sleeping`.
//!   Invoked externally (admin API, CLI); nothing here decides *when*.
//!
//! Orchestration failures never advance the lifecycle record, so the
//! next wake or sleep attempt retries the whole operation.

pub mod error;
pub mod scaler;
pub mod sleep;

pub use error::{ScalerError, ScalerResult};
pub use scaler::{ScaleOutcome, WorkloadScaler};
pub use sleep::SleepTrigger;

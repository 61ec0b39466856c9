//! wakegate-state — lifecycle records for scale-to-zero workloads.
//!
//! Holds the lifecycle state machine and the `StateStore` contract the
//! wake coordinator and the workload scaler coordinate through, plus two
//! backends:
//!
//! - [`EmbeddedStore`]: redb records and an in-process broadcast bus, for
//!   single-process deployments and tests.
//! - [`RedisStore`]: Redis/Valkey `GET`/`SET`/`PUBLISH`/`SUBSCRIBE`, for
//!   gateway and scaler running as separate processes or replicas.
//!
//! # Record layout
//!
//! ```text
//! sleeping:{namespace}:{name}  =  sleeping | waking_up | awake
//! wakeup (topic)               <- "{namespace}/{name}"
//! ```
//!
//! Stores are `Clone` + `Send` + `Sync` and are shared as
//! `Arc<dyn StateStore>`.

pub mod embedded;
pub mod error;
pub mod lifecycle;
pub mod redis_store;
pub mod store;
pub mod tables;
pub mod types;

pub use embedded::EmbeddedStore;
pub use error::{StateError, StateResult};
pub use lifecycle::{
    InvalidTransition, LifecycleEvent, Transition, next_on_scale_complete, next_on_sleep,
    next_on_wake,
};
pub use redis_store::RedisStore;
pub use store::{StateStore, Subscription};
pub use types::{LifecycleState, UnknownLifecycleValue};

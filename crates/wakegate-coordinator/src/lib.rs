//! wakegate-coordinator — turns many "is it sleeping?" requests into one
//! wake operation.
//!
//! # Protocol
//!
//! ```text
//! request_wake(key)
//!   state == awake          -> BecameAwake (after optional settle delay)
//!   wait group exists       -> join it, share its outcome
//!   otherwise (leader)      -> set waking_up, publish wake event,
//!                              poll every poll_interval until awake
//!                              or ceiling_timeout elapses,
//!                              release all joiners, drop the group
//! ```
//!
//! The wait group table is per process. Replicated gateways may each
//! publish a wake event for the same workload; the scaler tolerates that.

pub mod coordinator;

pub use coordinator::{WakeCoordinator, WakeOutcome, WakePolicy};

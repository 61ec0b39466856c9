//! Lifecycle states persisted per workload.
//!
//! The stored scalar values are the ones existing sleep tooling writes:
//! `sleeping`, `waking_up`, `awake`. A missing record is a fourth,
//! unnamed state (`None` throughout the API) meaning "not known to be
//! sleeping".

use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a scale-to-zero workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Asleep,
    WakingUp,
    Awake,
}

impl LifecycleState {
    /// Value written to the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Asleep => "sleeping",
            LifecycleState::WakingUp => "waking_up",
            LifecycleState::Awake => "awake",
        }
    }

    /// Human-facing label used in logs and the admin API.
    pub fn label(state: Option<LifecycleState>) -> &'static str {
        match state {
            None => "unrecorded",
            Some(s) => s.as_str(),
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored value outside the known set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownLifecycleValue(pub String);

impl FromStr for LifecycleState {
    type Err = UnknownLifecycleValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sleeping" => Ok(LifecycleState::Asleep),
            "waking_up" => Ok(LifecycleState::WakingUp),
            "awake" => Ok(LifecycleState::Awake),
            other => Err(UnknownLifecycleValue(other.to_string())),
        }
    }
}

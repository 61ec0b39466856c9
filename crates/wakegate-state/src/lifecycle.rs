//! Lifecycle state machine.
//!
//! Pure transition functions, no I/O. Valid transitions:
//!
//! ```text
//! Unrecorded | Asleep ──wake──▶ WakingUp ──scale complete──▶ Awake ──sleep──▶ Asleep
//! ```
//!
//! A transition requested from an unexpected state still yields the
//! requested target; the mismatch is reported as an `InvalidTransition`
//! for the caller to log. A stuck record is worse than a permissive one.

use thiserror::Error;

use crate::types::LifecycleState;

/// The event that drove a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Wake,
    ScaleComplete,
    Sleep,
}

/// A transition applied from a state that does not normally allow it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unexpected {event:?} transition from {} to {to}", from_label(.from))]
pub struct InvalidTransition {
    pub event: LifecycleEvent,
    pub from: Option<LifecycleState>,
    pub to: LifecycleState,
}

fn from_label(from: &Option<LifecycleState>) -> &'static str {
    LifecycleState::label(*from)
}

/// Outcome of applying one event to the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: Option<LifecycleState>,
    pub to: LifecycleState,
    /// Set when `from` does not normally allow this event.
    pub invalid: Option<InvalidTransition>,
}

impl Transition {
    fn valid(from: Option<LifecycleState>, to: LifecycleState) -> Self {
        Self { from, to, invalid: None }
    }

    fn forced(event: LifecycleEvent, from: Option<LifecycleState>, to: LifecycleState) -> Self {
        Self {
            from,
            to,
            invalid: Some(InvalidTransition { event, from, to }),
        }
    }

    /// Whether applying this transition changes the stored record.
    pub fn changes_record(&self) -> bool {
        self.from != Some(self.to)
    }
}

/// Wake trigger: anything short of `Awake` moves to `WakingUp`.
pub fn next_on_wake(current: Option<LifecycleState>) -> Transition {
    match current {
        Some(LifecycleState::Awake) => Transition::valid(current, LifecycleState::Awake),
        None | Some(LifecycleState::Asleep) | Some(LifecycleState::WakingUp) => {
            Transition::valid(current, LifecycleState::WakingUp)
        }
    }
}

/// Scaler success: `WakingUp` → `Awake`, idempotent from `Awake`.
pub fn next_on_scale_complete(current: Option<LifecycleState>) -> Transition {
    match current {
        Some(LifecycleState::WakingUp) | Some(LifecycleState::Awake) => {
            Transition::valid(current, LifecycleState::Awake)
        }
        None | Some(LifecycleState::Asleep) => {
            Transition::forced(LifecycleEvent::ScaleComplete, current, LifecycleState::Awake)
        }
    }
}

/// Sleep trigger: `Awake` → `Asleep`, idempotent from `Asleep`.
///
/// A missing record is the usual way a first sleep happens, so it is a
/// valid origin too.
pub fn next_on_sleep(current: Option<LifecycleState>) -> Transition {
    match current {
        None | Some(LifecycleState::Awake) | Some(LifecycleState::Asleep) => {
            Transition::valid(current, LifecycleState::Asleep)
        }
        Some(LifecycleState::WakingUp) => {
            Transition::forced(LifecycleEvent::Sleep, current, LifecycleState::Asleep)
        }
    }
}

//! Scaler and sleep trigger error types.

use thiserror::Error;

use wakegate_orchestrator::OrchestrationError;
use wakegate_state::StateError;

/// Errors from one scale-up or scale-to-zero attempt.
#[derive(Debug, Error)]
pub enum ScalerError {
    #[error("orchestration error: {0}")]
    Orchestration(#[from] OrchestrationError),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

pub type ScalerResult<T> = Result<T, ScalerError>;

//! Orchestration API errors.

use thiserror::Error;

pub type OrchestrationResult<T> = Result<T, OrchestrationError>;

/// Failure of a replica-count update.
///
/// None of these advance the workload's lifecycle record; the next wake
/// or sleep attempt retries the whole operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestrationError {
    #[error("workload not found: {0}")]
    NotFound(String),

    #[error("update conflict: {0}")]
    Conflict(String),

    #[error("orchestration API unavailable: {0}")]
    Unavailable(String),

    #[error("invalid workload: {0}")]
    InvalidWorkload(String),

    #[error("invalid orchestrator configuration: {0}")]
    Config(String),
}

use thiserror::Error;

use crate::role::AgentRole;

/// Failures with a defined meaning for the training run.
///
/// These travel inside [`anyhow::Error`] and can be recovered with
/// `downcast_ref::<TrainError>()`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrainError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("complete extinction of population {0}")]
    CompleteExtinction(AgentRole),

    #[error("no score was produced for {0}")]
    UndefinedScore(AgentRole),

    #[error("policy produced invalid output: {0}")]
    PolicyOutput(String),
}

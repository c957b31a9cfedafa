//! Error taxonomy for the scheduling, caching and knowledge core.
//!
//! Nothing here is process-fatal. The orchestrator records every variant as a
//! failed task and hands it back to the caller, who owns retry policy.

use thiserror::Error;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while validating, scheduling or executing a task.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("No agent capable of handling task '{task_id}'")]
    NoCapableAgent { task_id: String },

    #[error("Task '{task_id}' is invalid: {reason}")]
    InvalidTask { task_id: String, reason: String },

    #[error("Agent '{0}' not found in catalog")]
    UnknownAgent(String),

    #[error("Task '{task_id}' skipped: dependency '{dependency}' did not complete")]
    DependencyFailed { task_id: String, dependency: String },

    #[error("Task '{task_id}' execution failed: {message}")]
    Execution { task_id: String, message: String },

    #[error("Task '{task_id}' execution timed out")]
    Timeout { task_id: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    /// Id of the task this error concerns, if any.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::NoCapableAgent { task_id }
            | Self::InvalidTask { task_id, .. }
            | Self::DependencyFailed { task_id, .. }
            | Self::Execution { task_id, .. }
            | Self::Timeout { task_id } => Some(task_id),
            Self::UnknownAgent(_) | Self::InvalidConfig(_) => None,
        }
    }
}

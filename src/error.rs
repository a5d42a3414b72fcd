use std::time::Duration;

use thiserror::Error;

use crate::scheduler::JobHandle;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Job submission rejected: {0}")]
    Submission(String),

    #[error("Job status check failed: {0}")]
    Poll(String),

    #[error("Failed to cancel job {handle}: {reason}")]
    Cancellation { handle: JobHandle, reason: String },

    #[error("Driver job failed (exit code {exit_code:?})")]
    DriverFailure { exit_code: Option<i32> },

    #[error("Worker job {handle} finished before the pool was ready")]
    WorkerExited { handle: JobHandle },

    #[error("Timed out after {after:?} while {phase}")]
    Timeout { phase: &'static str, after: Duration },

    #[error("Run interrupted")]
    Interrupted,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl OrchestratorError {
    /// Process exit status for a run that ended with this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            OrchestratorError::DriverFailure { .. } => 1,
            OrchestratorError::Interrupted => 130,
            _ => 2,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

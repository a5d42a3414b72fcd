//! Scheduler adapters.
//!
//! Every backend realizes the same three operations against a batch
//! scheduler:
//!
//! - **submit**: enqueue one [`JobSpec`], returning its [`JobHandle`]
//! - **job_states**: report the current [`JobState`] of each handle
//! - **cancel**: request termination of one job
//!
//! [`Scheduler::are_running`] is derived from `job_states` and is vacuously
//! true for an empty handle set.
//!
//! The concrete backend is chosen once from [`SchedulerKind`] and wrapped in
//! [`SchedulerBackend`], a closed enum dispatched by `match`.

pub mod command;
pub mod job;
pub mod local;
pub mod lsf;
pub mod slurm;
pub mod tracked;

use std::sync::Arc;

use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

pub use command::{shell_quote, CommandOutput, CommandRunner, SystemRunner};
pub use job::{JobHandle, JobSpec, JobState};
pub use local::LocalScheduler;
pub use lsf::LsfScheduler;
pub use slurm::SlurmScheduler;
pub use tracked::{JobLedger, TrackingScheduler};

#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    async fn submit(&self, spec: &JobSpec) -> Result<JobHandle>;

    /// One state per handle, in the order given. Must not mutate scheduler state.
    async fn job_states(&self, handles: &[JobHandle]) -> Result<Vec<JobState>>;

    async fn cancel(&self, handle: &JobHandle) -> Result<()>;

    /// True only if every handle is running. A finished, failed, or unknown
    /// job counts as not running.
    async fn are_running(&self, handles: &[JobHandle]) -> Result<bool> {
        if handles.is_empty() {
            return Ok(true);
        }
        let states = self.job_states(handles).await?;
        Ok(states.len() == handles.len() && states.iter().all(JobState::is_running))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    Lsf,
    Slurm,
    Local,
}

impl std::fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerKind::Lsf => write!(f, "lsf"),
            SchedulerKind::Slurm => write!(f, "slurm"),
            SchedulerKind::Local => write!(f, "local"),
        }
    }
}

/// The scheduler selected for a run.
pub enum SchedulerBackend {
    Lsf(LsfScheduler),
    Slurm(SlurmScheduler),
    Local(LocalScheduler),
}

impl SchedulerBackend {
    pub fn from_kind(kind: SchedulerKind) -> Self {
        match kind {
            SchedulerKind::Lsf => {
                SchedulerBackend::Lsf(LsfScheduler::new(Arc::new(SystemRunner)))
            }
            SchedulerKind::Slurm => {
                SchedulerBackend::Slurm(SlurmScheduler::new(Arc::new(SystemRunner)))
            }
            SchedulerKind::Local => SchedulerBackend::Local(LocalScheduler::new()),
        }
    }

    /// Backend for querying or cancelling jobs submitted by an earlier run.
    ///
    /// Local jobs belong to the process that spawned them, so a fresh local
    /// backend has nothing to attach to.
    pub fn attach(kind: SchedulerKind) -> Result<Self> {
        match kind {
            SchedulerKind::Local => Err(OrchestratorError::Config(
                "the local backend cannot query or cancel jobs from another run; \
                 local jobs exit with the process that started them"
                    .to_string(),
            )),
            kind => Ok(Self::from_kind(kind)),
        }
    }

    pub fn kind(&self) -> SchedulerKind {
        match self {
            SchedulerBackend::Lsf(_) => SchedulerKind::Lsf,
            SchedulerBackend::Slurm(_) => SchedulerKind::Slurm,
            SchedulerBackend::Local(_) => SchedulerKind::Local,
        }
    }
}

#[async_trait]
impl Scheduler for SchedulerBackend {
    fn name(&self) -> &'static str {
        match self {
            SchedulerBackend::Lsf(s) => s.name(),
            SchedulerBackend::Slurm(s) => s.name(),
            SchedulerBackend::Local(s) => s.name(),
        }
    }

    async fn submit(&self, spec: &JobSpec) -> Result<JobHandle> {
        match self {
            SchedulerBackend::Lsf(s) => s.submit(spec).await,
            SchedulerBackend::Slurm(s) => s.submit(spec).await,
            SchedulerBackend::Local(s) => s.submit(spec).await,
        }
    }

    async fn job_states(&self, handles: &[JobHandle]) -> Result<Vec<JobState>> {
        match self {
            SchedulerBackend::Lsf(s) => s.job_states(handles).await,
            SchedulerBackend::Slurm(s) => s.job_states(handles).await,
            SchedulerBackend::Local(s) => s.job_states(handles).await,
        }
    }

    async fn cancel(&self, handle: &JobHandle) -> Result<()> {
        match self {
            SchedulerBackend::Lsf(s) => s.cancel(handle).await,
            SchedulerBackend::Slurm(s) => s.cancel(handle).await,
            SchedulerBackend::Local(s) => s.cancel(handle).await,
        }
    }
}

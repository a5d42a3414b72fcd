//! Worker fleet orchestration.
//!
//! One run walks the phases
//!
//! ```text
//! Init -> WorkersStarting -> WorkersReady -> DriverRunning -> DriverDone -> Cleanup -> Done
//! ```
//!
//! and jumps straight to `Cleanup` from any phase on error. Cleanup always
//! offers every submitted worker for cancellation exactly once, in submission
//! order, and never lets a cancellation failure replace the error that ended
//! the run.
//!
//! # Components
//!
//! - [`start_pool`]: submit N workers and wait until all are running
//! - [`run_driver`]: submit the driver and wait until it finishes
//! - [`WorkerPool`]: the submitted workers, released by [`WorkerPool::release`]
//! - [`Orchestrator`]: sequences the above and produces a [`RunReport`]

pub mod poll;
pub mod pool;
pub mod runner;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::scheduler::{JobHandle, Scheduler};

pub use poll::PollPolicy;
pub use pool::{cancel_all, start_pool, Cleanup, CleanupFailure, WorkerPool};
pub use runner::{run_driver, RunResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    WorkersStarting,
    WorkersReady,
    DriverRunning,
    DriverDone,
    Cleanup,
    Done,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Init => write!(f, "init"),
            Phase::WorkersStarting => write!(f, "workers_starting"),
            Phase::WorkersReady => write!(f, "workers_ready"),
            Phase::DriverRunning => write!(f, "driver_running"),
            Phase::DriverDone => write!(f, "driver_done"),
            Phase::Cleanup => write!(f, "cleanup"),
            Phase::Done => write!(f, "done"),
        }
    }
}

/// Phases entered during a run, in order.
#[derive(Debug, Clone)]
pub struct PhaseTrail(Vec<Phase>);

impl PhaseTrail {
    fn new() -> Self {
        Self(vec![Phase::Init])
    }

    fn enter(&mut self, phase: Phase) {
        tracing::debug!(from = %self.current(), to = %phase, "Phase transition");
        self.0.push(phase);
    }

    pub fn current(&self) -> Phase {
        self.0.last().copied().unwrap_or(Phase::Init)
    }

    pub fn phases(&self) -> &[Phase] {
        &self.0
    }
}

/// Everything known about a finished run.
#[derive(Debug)]
pub struct RunReport {
    /// None if the driver was never run.
    pub result: Option<RunResult>,
    /// The error that ended the run, if any.
    pub error: Option<OrchestratorError>,
    pub cleanup: Cleanup,
    pub phases: PhaseTrail,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// 0 on success. Cleanup failures never change the status.
    pub fn exit_code(&self) -> i32 {
        self.error.as_ref().map_or(0, OrchestratorError::exit_code)
    }

    pub fn cancelled_workers(&self) -> &[JobHandle] {
        &self.cleanup.attempted
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error {
            Some(error) => write!(f, "run failed: {}", error)?,
            None => write!(f, "run succeeded")?,
        }
        for failure in &self.cleanup.failures {
            write!(f, "\n  secondary: {}", failure)?;
        }
        Ok(())
    }
}

/// Runs the worker pool and the driver job against one scheduler.
pub struct Orchestrator<S> {
    scheduler: S,
    config: OrchestratorConfig,
}

impl<S: Scheduler> Orchestrator<S> {
    pub fn new(scheduler: S, config: OrchestratorConfig) -> Self {
        Self { scheduler, config }
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run workers and driver, then release the workers whatever happened.
    ///
    /// Cancelling `interrupt` aborts the current wait and moves to cleanup;
    /// cleanup itself is not interruptible.
    pub async fn run(&self, interrupt: &CancellationToken) -> RunReport {
        let started_at = Utc::now();
        let mut phases = PhaseTrail::new();
        let mut pool = WorkerPool::new();
        let mut result = None;

        let outcome = self
            .run_phases(&mut pool, &mut phases, &mut result, interrupt)
            .await;
        if let Err(e) = &outcome {
            tracing::error!(phase = %phases.current(), error = %e, "Run aborted, cleaning up");
        }

        phases.enter(Phase::Cleanup);
        let cleanup = pool.release(&self.scheduler).await;
        phases.enter(Phase::Done);

        let report = RunReport {
            result,
            error: outcome.err(),
            cleanup,
            phases,
            started_at,
            finished_at: Utc::now(),
        };
        tracing::info!(
            success = report.is_success(),
            exit_code = report.exit_code(),
            workers_cancelled = report.cleanup.attempted.len(),
            cleanup_failures = report.cleanup.failures.len(),
            "Run finished"
        );
        report
    }

    async fn run_phases(
        &self,
        pool: &mut WorkerPool,
        phases: &mut PhaseTrail,
        result: &mut Option<RunResult>,
        interrupt: &CancellationToken,
    ) -> Result<()> {
        let config = &self.config;

        phases.enter(Phase::WorkersStarting);
        start_pool(
            &self.scheduler,
            &config.worker,
            config.worker_count,
            &config.poll,
            config.start_timeout,
            pool,
            interrupt,
        )
        .await?;
        phases.enter(Phase::WorkersReady);

        phases.enter(Phase::DriverRunning);
        let outcome = run_driver(
            &self.scheduler,
            &config.driver,
            &config.poll,
            config.driver_timeout,
            interrupt,
        )
        .await?;
        *result = Some(outcome);
        phases.enter(Phase::DriverDone);

        match outcome {
            RunResult::Succeeded => Ok(()),
            RunResult::Failed { exit_code } => Err(OrchestratorError::DriverFailure { exit_code }),
            RunResult::Incomplete => Err(OrchestratorError::Interrupted),
        }
    }
}

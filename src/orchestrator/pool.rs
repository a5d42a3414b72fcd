use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::poll::{poll_until, Deadline, PollPolicy};
use crate::error::{OrchestratorError, Result};
use crate::scheduler::{JobHandle, JobSpec, JobState, Scheduler};

/// A cancellation attempt that failed and was suppressed.
#[derive(Debug)]
pub struct CleanupFailure {
    pub handle: JobHandle,
    pub error: OrchestratorError,
}

impl std::fmt::Display for CleanupFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cleanup of job {} failed: {}", self.handle, self.error)
    }
}

/// Outcome of one cleanup pass.
#[derive(Debug, Default)]
pub struct Cleanup {
    /// Every handle offered for cancellation, in order.
    pub attempted: Vec<JobHandle>,
    pub failures: Vec<CleanupFailure>,
}

/// Offer every handle to `cancel`, in order, suppressing failures.
///
/// Safe to call again on the same handles: jobs that are already gone only
/// produce more suppressed failures.
pub async fn cancel_all<S>(scheduler: &S, handles: &[JobHandle]) -> Cleanup
where
    S: Scheduler + ?Sized,
{
    let mut cleanup = Cleanup::default();
    for handle in handles {
        cleanup.attempted.push(handle.clone());
        match scheduler.cancel(handle).await {
            Ok(()) => tracing::debug!(job_id = %handle, "Cancelled job"),
            Err(error) => {
                tracing::warn!(job_id = %handle, error = %error, "Ignoring failed cancellation");
                cleanup.failures.push(CleanupFailure {
                    handle: handle.clone(),
                    error,
                });
            }
        }
    }
    cleanup
}

/// Worker jobs submitted during one run.
///
/// Handles are added as soon as each submission returns, so a pool that failed
/// to start still holds everything that must be torn down. [`release`] consumes
/// the pool, which makes the cancellation pass happen at most once.
///
/// [`release`]: WorkerPool::release
#[derive(Debug, Default)]
pub struct WorkerPool {
    handles: Vec<JobHandle>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handles(&self) -> &[JobHandle] {
        &self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Cancel every member in submission order.
    pub async fn release<S>(mut self, scheduler: &S) -> Cleanup
    where
        S: Scheduler + ?Sized,
    {
        let handles = std::mem::take(&mut self.handles);
        tracing::info!(count = handles.len(), scheduler = scheduler.name(), "Stopping workers");
        cancel_all(scheduler, &handles).await
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            let leaked: Vec<&str> = self.handles.iter().map(JobHandle::as_str).collect();
            tracing::error!(
                jobs = ?leaked,
                "Worker pool dropped without cleanup, jobs may be leaked"
            );
        }
    }
}

/// Submit `count` workers from `spec` into `pool`, then wait until all of
/// them are running.
///
/// A worker that finishes before the whole pool is running fails the start
/// with [`OrchestratorError::WorkerExited`] rather than waiting forever.
pub async fn start_pool<S>(
    scheduler: &S,
    spec: &JobSpec,
    count: usize,
    policy: &PollPolicy,
    timeout: Option<Duration>,
    pool: &mut WorkerPool,
    interrupt: &CancellationToken,
) -> Result<()>
where
    S: Scheduler + ?Sized,
{
    let deadline = Deadline::start("starting workers", timeout);

    tracing::info!(
        count,
        program = %spec.program,
        scheduler = scheduler.name(),
        "Submitting workers"
    );
    for _ in 0..count {
        if interrupt.is_cancelled() {
            return Err(OrchestratorError::Interrupted);
        }
        let handle = scheduler.submit(spec).await?;
        tracing::debug!(job_id = %handle, "Worker submitted");
        pool.handles.push(handle);
    }
    if pool.is_empty() {
        return Ok(());
    }

    let total = pool.len();
    poll_until(
        scheduler,
        &pool.handles,
        policy,
        deadline,
        interrupt,
        |states| {
            if let Some(i) = states.iter().position(JobState::is_terminal) {
                return Err(OrchestratorError::WorkerExited {
                    handle: pool.handles[i].clone(),
                });
            }
            let running = states.iter().filter(|s| s.is_running()).count();
            tracing::debug!(running, total, "Waiting for workers");
            Ok((running == total && states.len() == total).then_some(()))
        },
    )
    .await?;

    tracing::info!(count = total, "All workers running");
    Ok(())
}

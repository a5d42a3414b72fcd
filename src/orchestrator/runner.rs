use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::poll::{poll_until, Deadline, PollPolicy};
use crate::error::{OrchestratorError, Result};
use crate::scheduler::{JobHandle, JobSpec, JobState, Scheduler};

/// Terminal outcome of the driver job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunResult {
    Succeeded,
    Failed { exit_code: Option<i32> },
    /// The run was interrupted before the driver finished.
    Incomplete,
}

impl RunResult {
    fn from_final_state(handle: &JobHandle, state: JobState) -> Self {
        match state {
            JobState::Exited { exit_code } => RunResult::Failed { exit_code },
            JobState::Done => RunResult::Succeeded,
            other => {
                tracing::warn!(
                    job_id = %handle,
                    state = %other,
                    "Driver outcome not reported by scheduler, assuming success"
                );
                RunResult::Succeeded
            }
        }
    }
}

fn single(states: &[JobState]) -> JobState {
    states.first().copied().unwrap_or(JobState::Unknown)
}

/// Submit the driver job, wait for it to start, then wait for it to finish.
///
/// The driver is never retried. If the wait is abandoned (interrupt, status
/// error, timeout) the driver is cancelled on a best-effort basis.
pub async fn run_driver<S>(
    scheduler: &S,
    spec: &JobSpec,
    policy: &PollPolicy,
    timeout: Option<Duration>,
    interrupt: &CancellationToken,
) -> Result<RunResult>
where
    S: Scheduler + ?Sized,
{
    if interrupt.is_cancelled() {
        return Ok(RunResult::Incomplete);
    }

    let handle = scheduler.submit(spec).await?;
    tracing::info!(job_id = %handle, program = %spec.program, "Driver job submitted");

    match wait_for_driver(scheduler, &handle, policy, timeout, interrupt).await {
        Ok(state) => {
            let result = RunResult::from_final_state(&handle, state);
            tracing::info!(
                job_id = %handle,
                state = %state,
                result = ?result,
                "Driver job finished"
            );
            Ok(result)
        }
        Err(OrchestratorError::Interrupted) => {
            abandon(scheduler, &handle).await;
            Ok(RunResult::Incomplete)
        }
        Err(e) => {
            abandon(scheduler, &handle).await;
            Err(e)
        }
    }
}

async fn wait_for_driver<S>(
    scheduler: &S,
    handle: &JobHandle,
    policy: &PollPolicy,
    timeout: Option<Duration>,
    interrupt: &CancellationToken,
) -> Result<JobState>
where
    S: Scheduler + ?Sized,
{
    let deadline = Deadline::start("running the driver job", timeout);
    let handles = std::slice::from_ref(handle);

    // A driver that finished before it was ever seen running counts as started.
    let started = poll_until(scheduler, handles, policy, deadline, interrupt, |states| {
        let state = single(states);
        Ok((state.is_running() || state.is_terminal()).then_some(state))
    })
    .await?;
    if !started.is_running() {
        return Ok(started);
    }
    tracing::info!(job_id = %handle, "Driver job running");

    // Pending again means suspended or requeued, which is not completion.
    poll_until(scheduler, handles, policy, deadline, interrupt, |states| {
        let state = single(states);
        Ok((!matches!(state, JobState::Running | JobState::Pending)).then_some(state))
    })
    .await
}

async fn abandon<S>(scheduler: &S, handle: &JobHandle)
where
    S: Scheduler + ?Sized,
{
    tracing::warn!(job_id = %handle, "Abandoning driver job");
    if let Err(e) = scheduler.cancel(handle).await {
        tracing::warn!(job_id = %handle, error = %e, "Ignoring failed driver cancellation");
    }
}

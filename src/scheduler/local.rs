use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{JobHandle, JobSpec, JobState, Scheduler};
use crate::error::{OrchestratorError, Result};

struct LocalJob {
    /// None once the process has been reaped.
    child: Option<Child>,
    state: JobState,
}

/// Runs jobs as child processes of the orchestrator.
///
/// Scheduler arguments are ignored. A job is running from the moment it is
/// spawned until its process exits; children still alive when the scheduler
/// is dropped are killed.
#[derive(Default)]
pub struct LocalScheduler {
    jobs: Mutex<HashMap<JobHandle, LocalJob>>,
}

impl LocalScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn exit_state(status: std::process::ExitStatus) -> JobState {
        if status.success() {
            JobState::Done
        } else {
            JobState::Exited {
                exit_code: status.code(),
            }
        }
    }

    fn kill_failed(handle: &JobHandle, step: &str, error: std::io::Error) -> OrchestratorError {
        OrchestratorError::Cancellation {
            handle: handle.clone(),
            reason: format!("failed to {} process: {}", step, error),
        }
    }
}

#[async_trait]
impl Scheduler for LocalScheduler {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn submit(&self, spec: &JobSpec) -> Result<JobHandle> {
        let child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                OrchestratorError::Submission(format!("failed to spawn {}: {}", spec.program, e))
            })?;

        let handle = JobHandle::new(Uuid::new_v4().to_string());
        tracing::debug!(
            job_id = %handle,
            pid = ?child.id(),
            program = %spec.program,
            "Spawned local job"
        );

        self.jobs.lock().await.insert(
            handle.clone(),
            LocalJob {
                child: Some(child),
                state: JobState::Running,
            },
        );
        Ok(handle)
    }

    async fn job_states(&self, handles: &[JobHandle]) -> Result<Vec<JobState>> {
        let mut jobs = self.jobs.lock().await;
        let mut states = Vec::with_capacity(handles.len());

        for handle in handles {
            let Some(job) = jobs.get_mut(handle) else {
                states.push(JobState::Unknown);
                continue;
            };
            if let Some(child) = job.child.as_mut() {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        job.state = Self::exit_state(status);
                        job.child = None;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        return Err(OrchestratorError::Poll(format!(
                            "failed to check local job {}: {}",
                            handle, e
                        )))
                    }
                }
            }
            states.push(job.state);
        }
        Ok(states)
    }

    async fn cancel(&self, handle: &JobHandle) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(handle)
            .ok_or_else(|| OrchestratorError::Cancellation {
                handle: handle.clone(),
                reason: "unknown job".to_string(),
            })?;

        let Some(mut child) = job.child.take() else {
            return Err(OrchestratorError::Cancellation {
                handle: handle.clone(),
                reason: "job has already finished".to_string(),
            });
        };

        if let Ok(Some(status)) = child.try_wait() {
            job.state = Self::exit_state(status);
            return Err(OrchestratorError::Cancellation {
                handle: handle.clone(),
                reason: "job has already finished".to_string(),
            });
        }

        child
            .start_kill()
            .map_err(|e| Self::kill_failed(handle, "kill", e))?;
        let status = child
            .wait()
            .await
            .map_err(|e| Self::kill_failed(handle, "reap", e))?;
        job.state = Self::exit_state(status);
        tracing::debug!(job_id = %handle, "Killed local job");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn wait_for_state(scheduler: &LocalScheduler, handle: &JobHandle) -> JobState {
        for _ in 0..200 {
            let state = scheduler.job_states(std::slice::from_ref(handle)).await.unwrap()[0];
            if state.is_terminal() {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never finished", handle);
    }

    #[tokio::test]
    async fn successful_process_is_done() {
        let scheduler = LocalScheduler::new();
        let handle = scheduler.submit(&JobSpec::new("true")).await.unwrap();
        assert_eq!(wait_for_state(&scheduler, &handle).await, JobState::Done);
    }

    #[tokio::test]
    async fn failing_process_reports_exit_code() {
        let scheduler = LocalScheduler::new();
        let spec = JobSpec::new("sh").args(["-c", "exit 4"]);
        let handle = scheduler.submit(&spec).await.unwrap();
        assert_eq!(
            wait_for_state(&scheduler, &handle).await,
            JobState::Exited { exit_code: Some(4) }
        );
    }

    #[tokio::test]
    async fn long_running_process_can_be_cancelled() {
        let scheduler = LocalScheduler::new();
        let handle = scheduler
            .submit(&JobSpec::new("sleep").arg("30"))
            .await
            .unwrap();

        assert!(scheduler
            .are_running(std::slice::from_ref(&handle))
            .await
            .unwrap());
        scheduler.cancel(&handle).await.unwrap();

        let state = scheduler.job_states(&[handle.clone()]).await.unwrap()[0];
        assert!(matches!(state, JobState::Exited { .. }));

        // A second cancel finds nothing left to kill.
        assert!(matches!(
            scheduler.cancel(&handle).await,
            Err(OrchestratorError::Cancellation { .. })
        ));
    }

    #[tokio::test]
    async fn missing_program_is_submission_error() {
        let scheduler = LocalScheduler::new();
        assert!(matches!(
            scheduler.submit(&JobSpec::new("nonexistent_program_12345")).await,
            Err(OrchestratorError::Submission(_))
        ));
    }

    #[tokio::test]
    async fn unknown_handle() {
        let scheduler = LocalScheduler::new();
        let handle = JobHandle::new("nope");
        assert_eq!(
            scheduler.job_states(&[handle.clone()]).await.unwrap(),
            vec![JobState::Unknown]
        );
        assert!(scheduler.cancel(&handle).await.is_err());
    }

    #[test]
    fn kill_failure_is_cancellation_error() {
        let handle = JobHandle::new("local-1");
        let err = LocalScheduler::kill_failed(
            &handle,
            "reap",
            std::io::Error::new(std::io::ErrorKind::Other, "no child processes"),
        );

        match err {
            OrchestratorError::Cancellation { handle: h, reason } => {
                assert_eq!(h, handle);
                assert_eq!(reason, "failed to reap process: no child processes");
            }
            other => panic!("expected cancellation error, got {:?}", other),
        }
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{shell_quote, CommandRunner, JobHandle, JobSpec, JobState, Scheduler};
use crate::error::{OrchestratorError, Result};

/// SLURM backend driven through `sbatch`, `squeue`, `sacct` and `scancel`.
///
/// Live jobs are read from `squeue`. Jobs that have already left the queue
/// are looked up in accounting with `sacct`; if accounting has no record
/// either, the job is reported as [`JobState::Unknown`].
pub struct SlurmScheduler {
    runner: Arc<dyn CommandRunner>,
}

impl SlurmScheduler {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// `sbatch --parsable` prints `<jobid>` or `<jobid>;<cluster>`.
    fn parse_job_id(stdout: &str) -> Option<JobHandle> {
        let id = stdout.trim().split(';').next()?.trim();
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        Some(JobHandle::new(id))
    }

    fn parse_state(state: &str, exit_code: Option<i32>) -> Option<JobState> {
        // sacct reports e.g. "CANCELLED by 1000"
        let state = state.split_whitespace().next().unwrap_or("");
        let parsed = match state {
            "RUNNING" | "COMPLETING" | "SIGNALING" | "STAGE_OUT" => JobState::Running,
            "PENDING" | "CONFIGURING" | "SUSPENDED" | "REQUEUED" | "REQUEUE_HOLD"
            | "REQUEUE_FED" | "RESIZING" | "STOPPED" | "RESV_DEL_HOLD" => JobState::Pending,
            "COMPLETED" => JobState::Done,
            "FAILED" | "CANCELLED" | "TIMEOUT" | "OUT_OF_MEMORY" | "NODE_FAIL" | "PREEMPTED"
            | "BOOT_FAIL" | "DEADLINE" | "SPECIAL_EXIT" => JobState::Exited { exit_code },
            _ => return None,
        };
        Some(parsed)
    }

    /// Parse `squeue -h -o "%i %T"` output.
    fn parse_squeue(stdout: &str) -> Result<HashMap<String, JobState>> {
        let mut states = HashMap::new();
        for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (id, state) = line.split_once(char::is_whitespace).ok_or_else(|| {
                OrchestratorError::Poll(format!("malformed squeue line: {:?}", line))
            })?;
            let state = Self::parse_state(state.trim(), None).ok_or_else(|| {
                OrchestratorError::Poll(format!("unrecognized SLURM job state: {:?}", state))
            })?;
            states.insert(id.to_string(), state);
        }
        Ok(states)
    }

    /// Parse `sacct -n -X -P -o JobID,State,ExitCode` output. Unrecognized
    /// lines are skipped; accounting output varies between sites.
    fn parse_sacct(stdout: &str) -> HashMap<String, JobState> {
        stdout
            .lines()
            .filter_map(|line| {
                let mut fields = line.trim().split('|');
                let id = fields.next()?;
                let state = fields.next()?;
                let exit_code = fields
                    .next()
                    .and_then(|code| code.split(':').next())
                    .and_then(|code| code.parse().ok());
                Some((id.to_string(), Self::parse_state(state, exit_code)?))
            })
            .collect()
    }

    async fn queued_states(&self, handles: &[JobHandle]) -> Result<HashMap<String, JobState>> {
        let args = vec![
            "-h".to_string(),
            "-o".to_string(),
            "%i %T".to_string(),
            "-j".to_string(),
            join_ids(handles.iter()),
        ];
        let output = self
            .runner
            .run("squeue", &args)
            .await
            .map_err(|e| OrchestratorError::Poll(format!("failed to run squeue: {}", e)))?;

        if !output.success() {
            // Every requested job has already been purged from the queue.
            if output.stderr.contains("Invalid job id") {
                return Ok(HashMap::new());
            }
            return Err(OrchestratorError::Poll(output.failure_reason()));
        }
        Self::parse_squeue(&output.stdout)
    }

    async fn accounted_states(&self, handles: &[&JobHandle]) -> HashMap<String, JobState> {
        let args = vec![
            "-n".to_string(),
            "-X".to_string(),
            "-P".to_string(),
            "-o".to_string(),
            "JobID,State,ExitCode".to_string(),
            "-j".to_string(),
            join_ids(handles.iter().copied()),
        ];
        match self.runner.run("sacct", &args).await {
            Ok(output) if output.success() => Self::parse_sacct(&output.stdout),
            Ok(output) => {
                tracing::debug!(error = %output.failure_reason(), "sacct lookup failed");
                HashMap::new()
            }
            Err(e) => {
                tracing::debug!(error = %e, "sacct unavailable");
                HashMap::new()
            }
        }
    }
}

fn join_ids<'a>(handles: impl Iterator<Item = &'a JobHandle>) -> String {
    handles.map(JobHandle::as_str).collect::<Vec<_>>().join(",")
}

#[async_trait]
impl Scheduler for SlurmScheduler {
    fn name(&self) -> &'static str {
        "slurm"
    }

    async fn submit(&self, spec: &JobSpec) -> Result<JobHandle> {
        let mut args = vec!["--parsable".to_string()];
        args.extend(spec.scheduler_args.iter().cloned());
        args.push("--wrap".to_string());
        args.push(
            spec.command_line()
                .iter()
                .map(|w| shell_quote(w))
                .collect::<Vec<_>>()
                .join(" "),
        );

        let output = self
            .runner
            .run("sbatch", &args)
            .await
            .map_err(|e| OrchestratorError::Submission(format!("failed to run sbatch: {}", e)))?;
        if !output.success() {
            return Err(OrchestratorError::Submission(output.failure_reason()));
        }

        let handle = Self::parse_job_id(&output.stdout).ok_or_else(|| {
            OrchestratorError::Submission(format!(
                "no job id in sbatch output: {:?}",
                output.stdout.trim()
            ))
        })?;
        tracing::debug!(job_id = %handle, program = %spec.program, "Submitted SLURM job");
        Ok(handle)
    }

    async fn job_states(&self, handles: &[JobHandle]) -> Result<Vec<JobState>> {
        if handles.is_empty() {
            return Ok(Vec::new());
        }

        let mut states = self.queued_states(handles).await?;
        let missing: Vec<&JobHandle> = handles
            .iter()
            .filter(|h| !states.contains_key(h.as_str()))
            .collect();
        if !missing.is_empty() {
            states.extend(self.accounted_states(&missing).await);
        }

        Ok(handles
            .iter()
            .map(|h| states.get(h.as_str()).copied().unwrap_or(JobState::Unknown))
            .collect())
    }

    async fn cancel(&self, handle: &JobHandle) -> Result<()> {
        let output = self
            .runner
            .run("scancel", &[handle.to_string()])
            .await
            .map_err(|e| OrchestratorError::Cancellation {
                handle: handle.clone(),
                reason: format!("failed to run scancel: {}", e),
            })?;
        if !output.success() {
            return Err(OrchestratorError::Cancellation {
                handle: handle.clone(),
                reason: output.failure_reason(),
            });
        }
        Ok(())
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{shell_quote, CommandRunner, JobHandle, JobSpec, JobState, Scheduler};
use crate::error::{OrchestratorError, Result};

/// LSF backend driven through `bsub`, `bjobs` and `bkill`.
pub struct LsfScheduler {
    runner: Arc<dyn CommandRunner>,
}

impl LsfScheduler {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Extract the id from `Job <1234> is submitted to queue <normal>.`
    fn parse_job_id(stdout: &str) -> Option<JobHandle> {
        let start = stdout.find("Job <")? + "Job <".len();
        let len = stdout[start..].find('>')?;
        let id = &stdout[start..start + len];
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        Some(JobHandle::new(id))
    }

    fn parse_stat(stat: &str, exit_code: &str) -> Option<JobState> {
        let state = match stat {
            "RUN" => JobState::Running,
            "PEND" | "PSUSP" | "USUSP" | "SSUSP" | "WAIT" | "PROV" => JobState::Pending,
            "DONE" => JobState::Done,
            "EXIT" => JobState::Exited {
                exit_code: exit_code.parse().ok(),
            },
            "UNKWN" | "ZOMBI" => JobState::Unknown,
            _ => return None,
        };
        Some(state)
    }

    /// Parse `bjobs -noheader -o "jobid stat exit_code"` output.
    fn parse_bjobs(stdout: &str) -> Result<HashMap<String, JobState>> {
        let mut states = HashMap::new();
        for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 2 {
                return Err(OrchestratorError::Poll(format!(
                    "malformed bjobs line: {:?}",
                    line
                )));
            }
            let exit_code = parts.get(2).copied().unwrap_or("-");
            let state = Self::parse_stat(parts[1], exit_code).ok_or_else(|| {
                OrchestratorError::Poll(format!("unrecognized LSF job status: {:?}", parts[1]))
            })?;
            states.insert(parts[0].to_string(), state);
        }
        Ok(states)
    }
}

#[async_trait]
impl Scheduler for LsfScheduler {
    fn name(&self) -> &'static str {
        "lsf"
    }

    async fn submit(&self, spec: &JobSpec) -> Result<JobHandle> {
        let mut args = spec.scheduler_args.clone();
        args.extend(spec.command_line().iter().map(|w| shell_quote(w)));

        let output = self
            .runner
            .run("bsub", &args)
            .await
            .map_err(|e| OrchestratorError::Submission(format!("failed to run bsub: {}", e)))?;
        if !output.success() {
            return Err(OrchestratorError::Submission(output.failure_reason()));
        }

        let handle = Self::parse_job_id(&output.stdout).ok_or_else(|| {
            OrchestratorError::Submission(format!(
                "no job id in bsub output: {:?}",
                output.stdout.trim()
            ))
        })?;
        tracing::debug!(job_id = %handle, program = %spec.program, "Submitted LSF job");
        Ok(handle)
    }

    async fn job_states(&self, handles: &[JobHandle]) -> Result<Vec<JobState>> {
        if handles.is_empty() {
            return Ok(Vec::new());
        }

        let mut args = vec![
            "-noheader".to_string(),
            "-a".to_string(),
            "-o".to_string(),
            "jobid stat exit_code".to_string(),
        ];
        args.extend(handles.iter().map(|h| h.to_string()));

        let output = self
            .runner
            .run("bjobs", &args)
            .await
            .map_err(|e| OrchestratorError::Poll(format!("failed to run bjobs: {}", e)))?;

        let states = Self::parse_bjobs(&output.stdout)?;
        // bjobs exits non-zero when any requested job is unknown to it.
        if !output.success() && states.is_empty() && !output.stderr.contains("not found") {
            return Err(OrchestratorError::Poll(output.failure_reason()));
        }

        Ok(handles
            .iter()
            .map(|h| states.get(h.as_str()).copied().unwrap_or(JobState::Unknown))
            .collect())
    }

    async fn cancel(&self, handle: &JobHandle) -> Result<()> {
        let output = self
            .runner
            .run("bkill", &[handle.to_string()])
            .await
            .map_err(|e| OrchestratorError::Cancellation {
                handle: handle.clone(),
                reason: format!("failed to run bkill: {}", e),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::command::scripted::ScriptedRunner;

    fn lsf(runner: ScriptedRunner) -> (LsfScheduler, Arc<ScriptedRunner>) {
        let runner = Arc::new(runner);
        (LsfScheduler::new(runner.clone()), runner)
    }

    fn handles(ids: &[&str]) -> Vec<JobHandle> {
        ids.iter().map(|id| JobHandle::new(*id)).collect()
    }

    #[tokio::test]
    async fn submit_passes_scheduler_args_before_command() {
        let (lsf, runner) = lsf(ScriptedRunner::default().reply(
            0,
            "Job <8812> is submitted to queue <normal>.\n",
            "",
        ));
        let spec = JobSpec::new("driver.py")
            .args(["config.yaml", "/data/my run/run_info.yaml", "it's"])
            .scheduler_args(["-q", "normal"]);

        let handle = lsf.submit(&spec).await.unwrap();

        assert_eq!(handle, JobHandle::new("8812"));
        let (program, args) = runner.call(0);
        assert_eq!(program, "bsub");
        // bsub runs the command through the shell; each word stays one argument.
        assert_eq!(
            args,
            vec![
                "-q",
                "normal",
                "driver.py",
                "config.yaml",
                "'/data/my run/run_info.yaml'",
                r"'it'\''s'",
            ]
        );
    }

    #[tokio::test]
    async fn submit_rejected_by_scheduler() {
        let (lsf, _) = lsf(ScriptedRunner::default().reply(
            255,
            "",
            "Bad resource requirement syntax. Job not submitted.",
        ));

        let err = lsf.submit(&JobSpec::new("worker.py")).await.unwrap_err();
        match err {
            OrchestratorError::Submission(msg) => assert!(msg.contains("Bad resource")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn submit_without_job_id_is_error() {
        let (lsf, _) = lsf(ScriptedRunner::default().reply(0, "queue closed\n", ""));
        assert!(matches!(
            lsf.submit(&JobSpec::new("worker.py")).await,
            Err(OrchestratorError::Submission(_))
        ));
    }

    #[tokio::test]
    async fn submit_when_bsub_missing() {
        let (lsf, _) = lsf(ScriptedRunner::default().io_error());
        assert!(matches!(
            lsf.submit(&JobSpec::new("worker.py")).await,
            Err(OrchestratorError::Submission(_))
        ));
    }

    #[tokio::test]
    async fn job_states_maps_lsf_statuses() {
        let (lsf, runner) = lsf(ScriptedRunner::default().reply(
            0,
            "101 RUN -\n102 PEND -\n103 DONE 0\n104 EXIT 2\n105 SSUSP -\n",
            "",
        ));

        let states = lsf
            .job_states(&handles(&["101", "102", "103", "104", "105"]))
            .await
            .unwrap();

        assert_eq!(
            states,
            vec![
                JobState::Running,
                JobState::Pending,
                JobState::Done,
                JobState::Exited { exit_code: Some(2) },
                JobState::Pending,
            ]
        );
        let (program, args) = runner.call(0);
        assert_eq!(program, "bjobs");
        assert_eq!(&args[args.len() - 5..], ["101", "102", "103", "104", "105"]);
    }

    #[tokio::test]
    async fn unknown_jobs_are_not_running() {
        let (lsf, _) = lsf(ScriptedRunner::default().reply(
            255,
            "101 RUN -\n",
            "Job <102> is not found\n",
        ));

        let ids = handles(&["101", "102"]);
        let states = lsf.job_states(&ids).await.unwrap();
        assert_eq!(states, vec![JobState::Running, JobState::Unknown]);
    }

    #[tokio::test]
    async fn are_running_requires_every_job() {
        let (lsf, _) = lsf(ScriptedRunner::default()
            .reply(0, "1 RUN -\n2 PEND -\n", "")
            .reply(0, "1 RUN -\n2 RUN -\n", ""));
        let ids = handles(&["1", "2"]);

        assert!(!lsf.are_running(&ids).await.unwrap());
        assert!(lsf.are_running(&ids).await.unwrap());
    }

    #[tokio::test]
    async fn unreachable_cluster_is_poll_error() {
        let (lsf, _) = lsf(ScriptedRunner::default().reply(
            255,
            "",
            "LSF is down. Please wait ...",
        ));
        assert!(matches!(
            lsf.job_states(&handles(&["1"])).await,
            Err(OrchestratorError::Poll(_))
        ));
    }

    #[tokio::test]
    async fn malformed_output_is_poll_error() {
        let (lsf, _) = lsf(ScriptedRunner::default().reply(0, "1 BOGUS -\n", ""));
        assert!(matches!(
            lsf.job_states(&handles(&["1"])).await,
            Err(OrchestratorError::Poll(_))
        ));
    }

    #[tokio::test]
    async fn cancel_finished_job_is_cancellation_error() {
        let (lsf, runner) = lsf(ScriptedRunner::default()
            .reply(0, "Job <7> is being terminated\n", "")
            .reply(255, "", "Job <8>: Job has already finished"));

        lsf.cancel(&JobHandle::new("7")).await.unwrap();
        let err = lsf.cancel(&JobHandle::new("8")).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::Cancellation { .. }));
        assert_eq!(runner.call(1), ("bkill".to_string(), vec!["8".to_string()]));
    }

    #[test]
    fn parse_job_id_rejects_non_numeric() {
        assert!(LsfScheduler::parse_job_id("Job <abc> is submitted").is_none());
        assert!(LsfScheduler::parse_job_id("Job <> is submitted").is_none());
    }
}

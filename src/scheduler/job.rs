use serde::{Deserialize, Serialize};

/// Scheduler-assigned identifier for a submitted job.
///
/// Holds no job state; callers always re-query the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable description of one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Backend-specific placement/resource tokens, passed through verbatim.
    pub scheduler_args: Vec<String>,
}

impl JobSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            scheduler_args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn scheduler_args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.scheduler_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Program followed by its arguments.
    pub fn command_line(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Running,
    Done,
    Exited { exit_code: Option<i32> },
    /// The scheduler has no record of the job.
    Unknown,
}

impl JobState {
    pub fn is_running(&self) -> bool {
        matches!(self, JobState::Running)
    }

    /// Done or Exited. Unknown is not terminal: a job may not be visible yet.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Exited { .. })
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Running => write!(f, "running"),
            JobState::Done => write!(f, "done"),
            JobState::Exited {
                exit_code: Some(code),
            } => write!(f, "exited({})", code),
            JobState::Exited { exit_code: None } => write!(f, "exited"),
            JobState::Unknown => write!(f, "unknown"),
        }
    }
}

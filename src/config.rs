use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};
use crate::orchestrator::PollPolicy;
use crate::scheduler::{JobSpec, SchedulerKind};

/// Parallelization mode required for a distributed run.
pub const MESSAGING_CORES: &str = "messaging";

const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// The pipeline configuration file, as written on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub algorithm: AlgorithmConfig,
    pub analysis: AnalysisConfig,
    pub distributed: DistributedConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlgorithmConfig {
    /// Either a core count or "messaging".
    pub num_cores: serde_yaml::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    /// Program started once per worker job.
    pub worker_program: String,
    /// Program run as the driver job.
    pub process_program: String,
    /// Where per-run descriptors are stored, if anywhere.
    #[serde(default)]
    pub store_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DistributedConfig {
    pub cluster_platform: SchedulerKind,
    /// Whitespace-separated scheduler arguments shared by every job.
    #[serde(default)]
    pub platform_args: String,
    pub num_workers: usize,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub start_timeout_secs: Option<u64>,
    #[serde(default)]
    pub driver_timeout_secs: Option<u64>,
}

fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_yaml(&text)?;
        tracing::debug!(path = %path.display(), "Loaded pipeline configuration");
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.algorithm.num_cores.as_str() != Some(MESSAGING_CORES) {
            return Err(OrchestratorError::Config(format!(
                "algorithm.num_cores must be \"{}\" for a distributed run",
                MESSAGING_CORES
            )));
        }
        if self.analysis.worker_program.trim().is_empty() {
            return Err(OrchestratorError::Config(
                "analysis.worker_program is empty".to_string(),
            ));
        }
        if self.analysis.process_program.trim().is_empty() {
            return Err(OrchestratorError::Config(
                "analysis.process_program is empty".to_string(),
            ));
        }
        if self.distributed.poll_interval_secs == 0 {
            return Err(OrchestratorError::Config(
                "distributed.poll_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn scheduler_args(&self) -> Vec<String> {
        self.distributed
            .platform_args
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    /// Look for a run descriptor next to the stored run data.
    ///
    /// An explicit path always wins. Otherwise
    /// `<store_dir>/<basename(work_dir)>/run_info.yaml` is used if it exists.
    pub fn run_descriptor(&self, work_dir: &Path, explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        let store_dir = self.analysis.store_dir.as_ref()?;
        let candidate = store_dir.join(work_dir.file_name()?).join("run_info.yaml");
        candidate.is_file().then_some(candidate)
    }

    /// Build the orchestrator configuration for one run.
    pub fn resolve(
        &self,
        config_file: &Path,
        work_dir: &Path,
        run_info: Option<&Path>,
    ) -> OrchestratorConfig {
        let config_arg = config_file.display().to_string();
        let scheduler_args = self.scheduler_args();

        let worker = JobSpec::new(&self.analysis.worker_program)
            .arg(config_arg.clone())
            .scheduler_args(scheduler_args.clone());

        let mut driver = JobSpec::new(&self.analysis.process_program)
            .arg(config_arg)
            .arg(work_dir.display().to_string())
            .scheduler_args(scheduler_args);
        if let Some(run_info) = self.run_descriptor(work_dir, run_info) {
            driver = driver.arg(run_info.display().to_string());
        }

        let distributed = &self.distributed;
        OrchestratorConfig {
            scheduler: distributed.cluster_platform,
            worker,
            worker_count: distributed.num_workers,
            driver,
            poll: PollPolicy::new(Duration::from_secs(distributed.poll_interval_secs)),
            start_timeout: distributed.start_timeout_secs.map(Duration::from_secs),
            driver_timeout: distributed.driver_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Fully resolved settings for one orchestrator run.
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorConfig {
    pub scheduler: SchedulerKind,
    pub worker: JobSpec,
    pub worker_count: usize,
    pub driver: JobSpec,
    pub poll: PollPolicy,
    /// Upper bound on waiting for the pool to come up. None waits forever.
    pub start_timeout: Option<Duration>,
    /// Upper bound on the whole driver phase. None waits forever.
    pub driver_timeout: Option<Duration>,
}

impl OrchestratorConfig {
    pub fn new(worker: JobSpec, worker_count: usize, driver: JobSpec) -> Self {
        Self {
            scheduler: SchedulerKind::Local,
            worker,
            worker_count,
            driver,
            poll: PollPolicy::default(),
            start_timeout: None,
            driver_timeout: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll = PollPolicy::new(interval);
        self
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = Some(timeout);
        self
    }

    pub fn with_driver_timeout(mut self, timeout: Duration) -> Self {
        self.driver_timeout = Some(timeout);
        self
    }
}

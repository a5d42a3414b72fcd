use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use fleet_orchestrator::config::{OrchestratorConfig, PipelineConfig};
use fleet_orchestrator::orchestrator::{cancel_all, Orchestrator, PollPolicy};
use fleet_orchestrator::scheduler::{
    JobHandle, Scheduler, SchedulerBackend, SchedulerKind, TrackingScheduler,
};
use fleet_orchestrator::shutdown::install_interrupt_handler;

#[derive(Parser, Debug)]
#[command(name = "fleet-orchestrator")]
#[command(version)]
#[command(about = "Run a distributed analysis job against a fleet of cluster workers")]
#[command(propagate_version = true)]
struct Args {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start workers, run the driver job, then stop the workers
    Run(RunArgs),

    /// Load and validate a pipeline configuration
    CheckConfig {
        /// Pipeline configuration file (YAML)
        config: PathBuf,

        /// Working directory the driver would be given
        #[arg(default_value = ".")]
        work_dir: PathBuf,

        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },

    /// Show scheduler state of jobs (lsf and slurm only)
    Status {
        /// Pipeline configuration file (YAML)
        config: PathBuf,

        /// Scheduler job ids
        #[arg(required = true)]
        job_ids: Vec<String>,

        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },

    /// Cancel leftover jobs (lsf and slurm only), ignoring jobs that are already gone
    Cancel {
        /// Pipeline configuration file (YAML)
        config: PathBuf,

        /// Scheduler job ids
        #[arg(required = true)]
        job_ids: Vec<String>,
    },
}

// =============================================================================
// Run Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct RunArgs {
    /// Pipeline configuration file (YAML)
    config: PathBuf,

    /// Local directory holding the run's input data
    work_dir: PathBuf,

    /// Run descriptor (defaults to <store_dir>/<run>/run_info.yaml if present)
    run_info: Option<PathBuf>,

    /// Override the configured scheduler backend
    #[arg(long)]
    scheduler: Option<SchedulerKind>,

    /// Override the status poll interval, in seconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    poll_interval: Option<u64>,

    /// Override the configured number of workers
    #[arg(long)]
    workers: Option<usize>,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct JobStateOutput {
    job_id: String,
    state: String,
}

// =============================================================================
// Command Handlers
// =============================================================================

fn load_config(path: &Path) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    Ok(PipelineConfig::load(path)?)
}

fn resolve_run_config(args: &RunArgs) -> Result<OrchestratorConfig, Box<dyn std::error::Error>> {
    if !args.work_dir.is_dir() {
        return Err(format!("work directory {} does not exist", args.work_dir.display()).into());
    }

    let pipeline = load_config(&args.config)?;
    let mut config = pipeline.resolve(&args.config, &args.work_dir, args.run_info.as_deref());
    if let Some(kind) = args.scheduler {
        config.scheduler = kind;
    }
    if let Some(secs) = args.poll_interval {
        config.poll = PollPolicy::new(Duration::from_secs(secs));
    }
    if let Some(count) = args.workers {
        config.worker_count = count;
    }
    Ok(config)
}

async fn handle_run(args: RunArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let config = resolve_run_config(&args)?;
    let backend = TrackingScheduler::new(SchedulerBackend::from_kind(config.scheduler));
    let ledger = backend.ledger();
    let interrupt = install_interrupt_handler(move || {
        let leaked = ledger.outstanding();
        let jobs: Vec<&str> = leaked.iter().map(JobHandle::as_str).collect();
        tracing::error!(jobs = ?jobs, "Jobs may still be running; stop them with `cancel`");
        std::process::exit(130);
    })?;

    tracing::info!(
        scheduler = %config.scheduler,
        workers = config.worker_count,
        worker = %config.worker.program,
        driver = %config.driver.program,
        poll_interval = ?config.poll.interval,
        work_dir = %args.work_dir.display(),
        "Starting distributed run"
    );

    let orchestrator = Orchestrator::new(backend, config);
    let report = orchestrator.run(&interrupt).await;

    if !report.is_success() || !report.cleanup.failures.is_empty() {
        eprintln!("{}", report);
    }
    Ok(report.exit_code())
}

fn handle_check_config(
    config_path: PathBuf,
    work_dir: PathBuf,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = load_config(&config_path)?;
    let config = pipeline.resolve(&config_path, &work_dir, None);

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        OutputFormat::Table => {
            println!("Configuration OK");
            println!("{}", "=".repeat(40));
            println!("Scheduler:      {}", config.scheduler);
            println!("Workers:        {}", config.worker_count);
            println!("Worker command: {}", config.worker.command_line().join(" "));
            println!("Driver command: {}", config.driver.command_line().join(" "));
            if !config.worker.scheduler_args.is_empty() {
                println!("Scheduler args: {}", config.worker.scheduler_args.join(" "));
            }
            println!("Poll interval:  {:?}", config.poll.interval);
            match config.start_timeout {
                Some(t) => println!("Start timeout:  {:?}", t),
                None => println!("Start timeout:  none"),
            }
            match config.driver_timeout {
                Some(t) => println!("Driver timeout: {:?}", t),
                None => println!("Driver timeout: none"),
            }
        }
    }
    Ok(())
}

async fn handle_status(
    config_path: PathBuf,
    job_ids: Vec<String>,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = load_config(&config_path)?;
    let backend = SchedulerBackend::attach(pipeline.distributed.cluster_platform)?;
    let handles: Vec<JobHandle> = job_ids.into_iter().map(JobHandle::new).collect();
    let states = backend.job_states(&handles).await?;

    let rows: Vec<JobStateOutput> = handles
        .iter()
        .zip(states)
        .map(|(handle, state)| JobStateOutput {
            job_id: handle.to_string(),
            state: state.to_string(),
        })
        .collect();

    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Table => {
            println!("{:<20} STATE", "JOB ID");
            println!("{}", "-".repeat(32));
            for row in &rows {
                println!("{:<20} {}", row.job_id, row.state);
            }
        }
    }
    Ok(())
}

async fn handle_cancel(
    config_path: PathBuf,
    job_ids: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = load_config(&config_path)?;
    let backend = SchedulerBackend::attach(pipeline.distributed.cluster_platform)?;
    let handles: Vec<JobHandle> = job_ids.into_iter().map(JobHandle::new).collect();

    let cleanup = cancel_all(&backend, &handles).await;
    let failed = cleanup.failures.len();
    println!(
        "Cancelled {} of {} jobs",
        cleanup.attempted.len() - failed,
        cleanup.attempted.len()
    );
    for failure in &cleanup.failures {
        eprintln!("  {}", failure);
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Commands::Run(run_args) => {
            let code = handle_run(run_args).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::CheckConfig {
            config,
            work_dir,
            output,
        } => {
            handle_check_config(config, work_dir, &output)?;
        }
        Commands::Status {
            config,
            job_ids,
            output,
        } => {
            handle_status(config, job_ids, &output).await?;
        }
        Commands::Cancel { config, job_ids } => {
            handle_cancel(config, job_ids).await?;
        }
    }

    Ok(())
}

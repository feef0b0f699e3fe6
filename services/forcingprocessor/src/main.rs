//! NWM forcing processor.
//!
//! Reads a run configuration, extracts catchment-averaged forcings from the
//! listed NWM files and writes the per-catchment series to local disk or S3.
//! Extraction workers are child processes of this same binary, started
//! through the hidden `extract-worker` subcommand.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use forcing_common::{ForcingError, ForcingResult};
use forcing_processor::{run_extract_worker, ForcingProcessorConfig, Orchestrator, RunSummary};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "forcingprocessor")]
#[command(about = "Catchment forcing extraction from NWM grids for ngen")]
struct Args {
    /// Run configuration (JSON)
    #[arg(short, long, env = "FP_CONFIG")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Worker count, overrides run.nprocs
    #[arg(long)]
    nprocs: Option<usize>,

    /// Run extraction workers as threads of this process instead of child
    /// processes
    #[arg(long)]
    in_process: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one extraction task (started by the processor itself)
    #[command(name = "extract-worker", hide = true)]
    ExtractWorker {
        /// Task file written by the parent
        #[arg(long)]
        task: PathBuf,

        /// Where to write the reply
        #[arg(long)]
        reply: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")?;

    if let Some(Command::ExtractWorker { task, reply }) = &args.command {
        return run_extract_worker(task, reply)
            .await
            .with_context(|| format!("extract worker task {}", task.display()));
    }

    match run(&args).await {
        Ok(summary) => {
            info!(
                files = summary.n_files,
                catchments = summary.n_catchments,
                location = %summary.location,
                "Done"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, kind = e.kind(), "Forcing processor failed");
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(args: &Args) -> ForcingResult<RunSummary> {
    let path = args.config.as_ref().ok_or_else(|| {
        ForcingError::Configuration("no configuration given (--config or FP_CONFIG)".to_string())
    })?;
    info!(config = %path.display(), "Starting forcing processor");

    let mut config = ForcingProcessorConfig::from_file(path)?;
    config.apply_env_overrides();
    if let Some(nprocs) = args.nprocs {
        config.run.nprocs = Some(nprocs);
    }

    let run = config.validate()?;
    let orchestrator = Orchestrator::new(run)?;
    if args.in_process {
        return orchestrator.run().await;
    }
    let program = std::env::current_exe()?;
    orchestrator.with_worker_program(program).run().await
}

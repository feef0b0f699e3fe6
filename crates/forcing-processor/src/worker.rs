//! Extraction workers as child processes.
//!
//! The netcdf bindings hold one process-wide lock around every libnetcdf
//! call, so extraction threads inside one process take turns on the file
//! reads. Each extraction worker therefore runs in its own process: the parent
//! writes an [`ExtractTask`] to a scratch file, launches
//! `<program> extract-worker --task <file> --reply <file>` and reads the reply
//! back. Errors cross the process boundary as [`ErrorReport`]s and keep their
//! kind.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use forcing_common::{ErrorReport, ForcingError, ForcingResult, GridSpec, ValidTime};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use storage::{ForcingSource, SourceFetcher};
use tokio::process::Command;
use tracing::{debug, info};

use crate::extract::{extract_files, ExtractContext, ExtractOutput};
use crate::pool::WorkItem;
use crate::usage::ResourceUsage;
use crate::window::CatchmentIndex;

/// Subcommand a worker program answers to.
pub const EXTRACT_WORKER_COMMAND: &str = "extract-worker";

/// Everything one extraction worker process needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractTask {
    pub worker: usize,
    pub grid: GridSpec,
    pub index: CatchmentIndex,
    pub variables: Vec<String>,
    /// Identifiers of the worker's files, in order
    pub files: Vec<String>,
    pub request_timeout_secs: u64,
    pub verbose: bool,
}

impl ExtractTask {
    pub fn for_item(item: &WorkItem<ExtractContext>) -> Self {
        let ctx = &item.context;
        Self {
            worker: item.worker,
            grid: ctx.grid,
            index: ctx.index.clone(),
            variables: ctx.variables.clone(),
            files: ctx.files[item.slice.clone()].iter().map(|f| f.id()).collect(),
            request_timeout_secs: ctx.request_timeout.as_secs(),
            verbose: ctx.verbose,
        }
    }

    /// Rebuild the extraction context on the worker side.
    pub fn into_context(self) -> ForcingResult<ExtractContext> {
        let files = self
            .files
            .iter()
            .map(|id| ForcingSource::parse(id))
            .collect::<ForcingResult<Vec<_>>>()?;
        let request_timeout = Duration::from_secs(self.request_timeout_secs);
        Ok(ExtractContext {
            grid: self.grid,
            index: self.index,
            variables: self.variables,
            files,
            fetcher: SourceFetcher::new(request_timeout)?,
            request_timeout,
            verbose: self.verbose,
        })
    }
}

/// `ExtractOutput` in a JSON-safe shape: fill cells (NaN) travel as `null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireOutput {
    n_catchments: usize,
    n_variables: usize,
    /// Row-major `[catchment, variable]` block per file
    values: Vec<Vec<Option<f32>>>,
    times: Vec<ValidTime>,
    file_sizes: Vec<u64>,
    bytes_read: u64,
}

impl WireOutput {
    fn new(output: ExtractOutput, n_catchments: usize, n_variables: usize) -> Self {
        let values = output
            .values
            .iter()
            .map(|block| {
                block
                    .iter()
                    .map(|v| if v.is_nan() { None } else { Some(*v) })
                    .collect()
            })
            .collect();
        Self {
            n_catchments,
            n_variables,
            values,
            times: output.times,
            file_sizes: output.file_sizes,
            bytes_read: output.bytes_read,
        }
    }

    fn into_output(self) -> ForcingResult<ExtractOutput> {
        let shape = (self.n_catchments, self.n_variables);
        let values = self
            .values
            .into_iter()
            .map(|block| {
                let flat: Vec<f32> = block.into_iter().map(|v| v.unwrap_or(f32::NAN)).collect();
                Array2::from_shape_vec(shape, flat).map_err(|e| {
                    ForcingError::InvalidData(format!("worker reply block has wrong size: {}", e))
                })
            })
            .collect::<ForcingResult<Vec<_>>>()?;
        Ok(ExtractOutput {
            values,
            times: self.times,
            file_sizes: self.file_sizes,
            bytes_read: self.bytes_read,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum ExtractReply {
    Done {
        output: WireOutput,
        usage: ResourceUsage,
    },
    Failed {
        error: ErrorReport,
    },
}

/// Worker side: run the task stored at `task_path` and write the reply to
/// `reply_path`.
///
/// Extraction failures go into the reply. The returned error only covers
/// reading the task and writing the reply.
pub async fn run_extract_worker(task_path: &Path, reply_path: &Path) -> ForcingResult<()> {
    let task: ExtractTask = serde_json::from_slice(&tokio::fs::read(task_path).await?)?;
    let worker = task.worker;
    let n_catchments = task.index.len();
    let n_variables = task.variables.len();

    let reply = match execute(task).await {
        Ok(output) => ExtractReply::Done {
            output: WireOutput::new(output, n_catchments, n_variables),
            usage: ResourceUsage::current(),
        },
        Err(e) => {
            debug!(worker = worker, error = %e, "Extraction failed in worker process");
            ExtractReply::Failed {
                error: ErrorReport::from(&e),
            }
        }
    };
    tokio::fs::write(reply_path, serde_json::to_vec(&reply)?).await?;
    Ok(())
}

async fn execute(task: ExtractTask) -> ForcingResult<ExtractOutput> {
    let worker = task.worker;
    let n_files = task.files.len();
    let context = Arc::new(task.into_context()?);
    extract_files(WorkItem {
        worker,
        slice: 0..n_files,
        context,
    })
    .await
}

/// Parent side: run `item` in a child process of `program`.
///
/// The child is killed if this future is dropped, so an aborted stage does
/// not leave workers behind.
pub async fn extract_in_child(
    program: Arc<PathBuf>,
    item: WorkItem<ExtractContext>,
) -> ForcingResult<ExtractOutput> {
    let worker = item.worker;
    let verbose = item.context.verbose;
    let scratch = tempfile::Builder::new()
        .prefix("forcing-extract-")
        .tempdir()?;
    let task_path = scratch.path().join("task.json");
    let reply_path = scratch.path().join("reply.json");
    let task = ExtractTask::for_item(&item);
    let n_files = task.files.len();
    tokio::fs::write(&task_path, serde_json::to_vec(&task)?).await?;

    let started = Instant::now();
    let status = Command::new(program.as_path())
        .arg(EXTRACT_WORKER_COMMAND)
        .arg("--task")
        .arg(&task_path)
        .arg("--reply")
        .arg(&reply_path)
        .kill_on_drop(true)
        .status()
        .await
        .map_err(|e| {
            ForcingError::Worker(format!(
                "cannot launch extract worker {} ({}): {}",
                worker,
                program.display(),
                e
            ))
        })?;

    let data = match tokio::fs::read(&reply_path).await {
        Ok(data) => data,
        Err(_) => {
            return Err(ForcingError::Worker(format!(
                "extract worker {} exited with {} without a reply",
                worker, status
            )))
        }
    };

    match serde_json::from_slice::<ExtractReply>(&data)? {
        ExtractReply::Done { output, usage } => {
            let elapsed = started.elapsed().as_secs_f64();
            if verbose {
                info!(
                    worker = worker,
                    files = n_files,
                    elapsed_secs = format!("{:.1}", elapsed),
                    cpu_secs = format!("{:.1}", usage.cpu_secs()),
                    peak_rss_mb = format!("{:.1}", usage.peak_rss_mb()),
                    "Extraction worker finished"
                );
            } else {
                debug!(worker = worker, files = n_files, elapsed_secs = elapsed, "Extraction worker finished");
            }
            output.into_output()
        }
        ExtractReply::Failed { error } => Err(ForcingError::from(error)),
    }
}

//! Catchment forcing extraction for ngen.
//!
//! Turns gridded NWM forcing files into per-catchment time series:
//!
//! - [`weights`]: catchment to grid-cell coverage weights, per region
//! - [`window`]: the bounding window of all weighted cells and the
//!   window-local gather indices of every catchment
//! - [`partition`]: load-aware split of files or catchments across workers
//! - [`extract`]: windowed reads and coverage-weighted means per file
//! - [`writer`]: per-catchment CSV/Parquet, region NetCDF and tarball output
//! - [`worker`]: extraction workers as child processes
//! - [`orchestrator`]: chunked extract/write passes, metadata and profiling

pub mod config;
pub mod extract;
pub mod metadata;
pub mod orchestrator;
pub mod partition;
pub mod pool;
pub mod profile;
pub mod table;
pub mod usage;
pub mod weights;
pub mod window;
pub mod worker;
pub mod writer;

pub use config::{
    ForcingProcessorConfig, OutputFormat, RunConfig, WeightFormat, WeightSource,
};
pub use extract::{aggregate, weighted_mean, ExtractContext, ExtractOutput, ForcingCube};
pub use orchestrator::{parse_file_list, Orchestrator, RunSummary};
pub use partition::{CostModel, Partition, WorkPartitioner};
pub use pool::{run_pool, WorkItem};
pub use table::CatchmentTable;
pub use weights::{WeightEntry, WeightTable};
pub use usage::ResourceUsage;
pub use window::{compute_window, CatchmentIndex};
pub use worker::{run_extract_worker, ExtractTask, EXTRACT_WORKER_COMMAND};

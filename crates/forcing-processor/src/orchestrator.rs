//! Run sequencing: configuration, weights, chunked extract/write passes,
//! metadata and final archive.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use forcing_common::variables::ngen_names;
use forcing_common::{ForcingError, ForcingResult, ValidTime, FORCING_VARIABLES};
use metrics::counter;
use storage::{ForcingSource, ObjectStorage, SourceFetcher, StoragePath};
use tracing::{error, info, warn};

use crate::config::{OutputFormat, RunConfig};
use crate::extract::{extract_files, ExtractContext, ExtractOutput, ForcingCube};
use crate::metadata::{CatchmentSummary, MetadataTable, SampleStats, SAMPLE_SIZE};
use crate::partition::WorkPartitioner;
use crate::pool::run_pool;
use crate::profile::Profiler;
use crate::weights::WeightTable;
use crate::window::{compute_window, CatchmentIndex};
use crate::worker::extract_in_child;
use crate::writer::{build_tarball, write_catchments, write_region_netcdf, WriteContext, WriteOutput};

pub const CONFIG_COPY: &str = "conf_fp.json";
pub const PROFILE_LOG: &str = "profile_fp.txt";

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub n_files: usize,
    pub n_catchments: usize,
    pub n_chunks: usize,
    pub first_time: Option<ValidTime>,
    pub last_time: Option<ValidTime>,
    pub bytes_written: u64,
    /// Where outputs were written
    pub location: String,
}

/// Parse a newline-delimited file list. Blank lines and `#` comments are skipped.
pub fn parse_file_list(text: &str) -> ForcingResult<Vec<ForcingSource>> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ForcingSource::parse)
        .collect()
}

/// State carried across chunks.
#[derive(Debug, Default)]
struct RunState {
    files: Vec<ForcingSource>,
    table: WeightTable,
    index: Option<CatchmentIndex>,
    times: Vec<ValidTime>,
    file_sizes: Vec<u64>,
    /// Writer outputs of the latest chunk; they describe the full series
    written: Vec<WriteOutput>,
    extract_workers: usize,
    write_workers: usize,
    n_chunks: usize,
    bytes_written: u64,
}

/// Runs one forcing extraction end to end.
///
/// Extraction workers run as tokio tasks of this process unless a worker
/// program is set with [`Orchestrator::with_worker_program`], in which case
/// each one is a child process of that program.
pub struct Orchestrator {
    config: RunConfig,
    storage: ObjectStorage,
    fetcher: SourceFetcher,
    profiler: Profiler,
    worker_program: Option<Arc<PathBuf>>,
}

impl Orchestrator {
    pub fn new(config: RunConfig) -> ForcingResult<Self> {
        let storage = ObjectStorage::new(&config.storage)?;
        let fetcher = SourceFetcher::new(config.request_timeout)?;
        let profiler = Profiler::new(config.verbose);
        Ok(Self {
            config,
            storage,
            fetcher,
            profiler,
            worker_program: None,
        })
    }

    /// Run extraction workers as `<program> extract-worker` child processes.
    pub fn with_worker_program(mut self, program: PathBuf) -> Self {
        self.worker_program = Some(Arc::new(program));
        self
    }

    pub fn storage(&self) -> &ObjectStorage {
        &self.storage
    }

    /// Run every phase. The profile log is written whether or not the run
    /// succeeds; outputs of completed chunks are left in place on failure.
    pub async fn run(mut self) -> ForcingResult<RunSummary> {
        let result = self.run_phases().await;
        if let Err(e) = &result {
            error!(error = %e, kind = e.kind(), "Forcing run failed");
        }

        let profile = self.profiler.render();
        let key = StoragePath::metadata_file(PROFILE_LOG);
        if let Err(e) = self.storage.put(&key, Bytes::from(profile)).await {
            warn!(error = %e, "Failed to write profile log");
        }
        result
    }

    async fn run_phases(&mut self) -> ForcingResult<RunSummary> {
        let mut state = RunState::default();

        self.profiler.start("CONFIGURATION");
        self.init(&mut state).await?;
        self.profiler.end("CONFIGURATION");

        self.profiler.start("WEIGHTS");
        self.load_weights(&mut state).await?;
        self.profiler.end("WEIGHTS");

        let chunk_size = self.config.nfile_chunk;
        let n_chunks = state.files.len().div_ceil(chunk_size);
        for chunk in 0..n_chunks {
            let start = chunk * chunk_size;
            let end = (start + chunk_size).min(state.files.len());
            self.profiler.start("PROCESSING");
            self.process_chunk(&mut state, chunk, start..end).await?;
            self.profiler.end("PROCESSING");
        }
        state.n_chunks = n_chunks;

        let metadata = if self.config.collect_stats {
            self.profiler.start("METADATA");
            let tables = self.write_metadata(&state).await?;
            self.profiler.end("METADATA");
            tables
        } else {
            Vec::new()
        };

        self.profiler.start("FINALIZE");
        if self.config.wants(OutputFormat::Tar) {
            self.write_tarball(&mut state, metadata).await?;
        }
        self.profiler.end("FINALIZE");

        let summary = RunSummary {
            n_files: state.files.len(),
            n_catchments: state.table.len(),
            n_chunks,
            first_time: state.times.first().copied(),
            last_time: state.times.last().copied(),
            bytes_written: state.bytes_written,
            location: self.storage.display_location(StoragePath::FORCINGS_DIR),
        };
        info!(
            files = summary.n_files,
            catchments = summary.n_catchments,
            chunks = summary.n_chunks,
            bytes_written = summary.bytes_written,
            location = %summary.location,
            "Forcing run complete"
        );
        Ok(summary)
    }

    /// Resolve the file list, check chunking against the outputs and store a
    /// copy of the configuration.
    async fn init(&self, state: &mut RunState) -> ForcingResult<()> {
        let list = self.fetcher.fetch_bytes(&self.config.file_list).await?;
        let text = std::str::from_utf8(&list).map_err(|e| {
            ForcingError::Configuration(format!("file list is not UTF-8: {}", e))
        })?;
        state.files = parse_file_list(text)?;
        if state.files.is_empty() {
            return Err(ForcingError::Configuration(format!(
                "file list {} names no forcing files",
                self.config.file_list.id()
            )));
        }

        let chunked = state.files.len() > self.config.nfile_chunk;
        if chunked
            && !self.config.wants(OutputFormat::Csv)
            && !self.config.wants(OutputFormat::Parquet)
        {
            return Err(ForcingError::Configuration(
                "runs split into several file chunks need csv or parquet output".to_string(),
            ));
        }

        let document = serde_json::to_vec_pretty(&self.config.document)?;
        self.storage
            .put(&StoragePath::metadata_file(CONFIG_COPY), Bytes::from(document))
            .await?;

        info!(
            files = state.files.len(),
            nprocs = self.config.nprocs,
            nfile_chunk = self.config.nfile_chunk,
            outputs = ?self.config.output_formats.iter().map(|f| f.as_str()).collect::<Vec<_>>(),
            location = %self.storage.display_location(""),
            "Configuration validated"
        );
        Ok(())
    }

    async fn load_weights(&self, state: &mut RunState) -> ForcingResult<()> {
        let mut tables = Vec::with_capacity(self.config.weight_sources.len());
        for source in &self.config.weight_sources {
            tables.push(WeightTable::load(source, &self.fetcher).await?);
        }
        let table = WeightTable::merge(tables);

        let window = compute_window(&table, &self.config.grid)?;
        let index = CatchmentIndex::build(&table, &self.config.grid, window)?;
        info!(
            catchments = table.len(),
            regions = self.config.weight_sources.len(),
            x_min = window.x_min,
            x_max = window.x_max,
            y_min = window.y_min,
            y_max = window.y_max,
            "Weights loaded"
        );

        state.table = table;
        state.index = Some(index);
        Ok(())
    }

    async fn process_chunk(
        &self,
        state: &mut RunState,
        chunk: usize,
        files: std::ops::Range<usize>,
    ) -> ForcingResult<()> {
        let index = state
            .index
            .clone()
            .ok_or_else(|| ForcingError::Configuration("weights not loaded".to_string()))?;
        let n_catchments = index.len();
        let append = chunk > 0;
        info!(chunk = chunk, files = files.len(), append = append, "Processing chunk");

        // Extraction over contiguous file blocks keeps file order.
        let file_partition = WorkPartitioner::new(self.config.file_cost)
            .partition(files.len(), self.config.nprocs);
        let extract_ctx = Arc::new(ExtractContext {
            grid: self.config.grid,
            index,
            variables: FORCING_VARIABLES.iter().map(|v| v.nwm_name.to_string()).collect(),
            files: state.files[files].to_vec(),
            fetcher: self.fetcher.clone(),
            request_timeout: self.config.request_timeout,
            verbose: self.config.verbose,
        });
        let started = std::time::Instant::now();
        let outputs: Vec<ExtractOutput> = match &self.worker_program {
            Some(program) => {
                let program = program.clone();
                run_pool("extract", &file_partition, extract_ctx, move |item| {
                    extract_in_child(program.clone(), item)
                })
                .await?
            }
            None => run_pool("extract", &file_partition, extract_ctx, extract_files).await?,
        };

        let bytes_read = crate::extract::bytes_read(&outputs);
        let elapsed = started.elapsed().as_secs_f64();
        info!(
            chunk = chunk,
            workers = file_partition.n_workers(),
            bytes_read = bytes_read,
            mb_per_sec = format!("{:.2}", bytes_read as f64 / 1e6 / elapsed.max(1e-9)),
            elapsed_secs = format!("{:.1}", elapsed),
            "Extraction finished"
        );
        for output in &outputs {
            state.file_sizes.extend_from_slice(&output.file_sizes);
        }
        let cube = ForcingCube::from_outputs(outputs, n_catchments, FORCING_VARIABLES.len())?;
        state.times.extend_from_slice(&cube.times);

        let columns: Vec<String> = ngen_names().into_iter().map(String::from).collect();
        let catchment_partition = WorkPartitioner::new(self.config.catchment_cost)
            .partition(n_catchments, self.config.nprocs);
        let write_ctx = Arc::new(WriteContext {
            cube,
            ids: state.table.ids().to_vec(),
            columns: columns.clone(),
            storage: self.storage.clone(),
            formats: self.config.output_formats.clone(),
            append,
            verbose: self.config.verbose,
        });
        state.written =
            run_pool("write", &catchment_partition, write_ctx.clone(), write_catchments).await?;
        state.bytes_written += state.written.iter().map(|o| o.bytes_written).sum::<u64>();

        if self.config.wants(OutputFormat::Netcdf) {
            state.bytes_written += write_region_netcdf(
                &self.storage,
                &write_ctx.cube,
                state.table.ids(),
                &columns,
                &state.table.regions(),
                append,
            )
            .await?;
        }

        state.extract_workers = state.extract_workers.max(file_partition.n_workers());
        state.write_workers = state.write_workers.max(catchment_partition.n_workers());
        counter!("forcing_chunks_processed_total").increment(1);
        info!(
            chunk = chunk,
            workers = catchment_partition.n_workers(),
            catchments = n_catchments,
            "Chunk written"
        );
        Ok(())
    }

    /// Write the summary tables; returns them for the tarball.
    async fn write_metadata(&self, state: &RunState) -> ForcingResult<Vec<(String, Vec<u8>)>> {
        let n_catchments = state.table.len();
        let mut table = MetadataTable::new();
        table.push("files", state.files.len());
        table.push("catchments", n_catchments);
        table.push("chunks", state.n_chunks);
        table.push("times", state.times.len());
        if let (Some(first), Some(last)) = (state.times.first(), state.times.last()) {
            table.push("first_time", first);
            table.push("last_time", last);
        }
        table.push("extract_workers", state.extract_workers);
        table.push("write_workers", state.write_workers);

        let file_sizes: Vec<f64> = state
            .file_sizes
            .iter()
            .take(SAMPLE_SIZE)
            .map(|&s| s as f64)
            .collect();
        table.push_stats("forcing_file_bytes", SampleStats::of(&file_sizes));

        let samples: Vec<_> = state
            .written
            .iter()
            .flat_map(|o| o.samples.iter().copied())
            .collect();
        for format in [OutputFormat::Csv, OutputFormat::Parquet] {
            let of_format: Vec<_> = samples
                .iter()
                .filter(|s| s.format == format)
                .take(SAMPLE_SIZE)
                .collect();
            if of_format.is_empty() {
                continue;
            }
            let raw: Vec<f64> = of_format.iter().map(|s| s.bytes as f64).collect();
            let gzip: Vec<f64> = of_format.iter().map(|s| s.gzip_bytes as f64).collect();
            let raw_stats = SampleStats::of(&raw);
            let name = format.as_str();
            table.push_stats(&format!("{}_bytes", name), raw_stats);
            table.push_stats(&format!("{}_gzip_bytes", name), SampleStats::of(&gzip));
            table.push(
                &format!("{}_total_bytes_estimate", name),
                (raw_stats.mean * n_catchments as f64).round(),
            );
        }

        for phase in self.profiler.totals() {
            let key = phase.label.to_lowercase();
            table.push(&format!("{}_secs", key), format!("{:.3}", phase.elapsed_secs));
            table.push(&format!("{}_cpu_secs", key), format!("{:.3}", phase.usage.cpu_secs()));
            table.push(&format!("{}_peak_rss_mb", key), format!("{:.1}", phase.usage.peak_rss_mb()));
        }

        let columns: Vec<String> = ngen_names().into_iter().map(String::from).collect();
        let ids: Vec<String> = state.written.iter().flat_map(|o| o.ids.iter().cloned()).collect();
        let averages = CatchmentSummary {
            ids: ids.clone(),
            columns: columns.clone(),
            rows: state.written.iter().flat_map(|o| o.means.iter().cloned()).collect(),
        };
        let medians = CatchmentSummary {
            ids,
            columns,
            rows: state.written.iter().flat_map(|o| o.medians.iter().cloned()).collect(),
        };

        let mut files = vec![
            ("metadata.csv".to_string(), table.to_csv()?),
            ("catchments_avg.csv".to_string(), averages.to_csv()?),
            ("catchments_median.csv".to_string(), medians.to_csv()?),
        ];
        if self.config.wants(OutputFormat::Parquet) {
            files.push(("catchments_avg.parquet".to_string(), averages.to_parquet()?));
            files.push(("catchments_median.parquet".to_string(), medians.to_parquet()?));
        }

        for (name, data) in &files {
            self.storage
                .put(&StoragePath::metadata_file(name), Bytes::from(data.clone()))
                .await?;
        }
        info!(entries = table.rows().len(), "Metadata written");

        Ok(files
            .into_iter()
            .filter(|(name, _)| name.ends_with(".csv"))
            .collect())
    }

    async fn write_tarball(
        &self,
        state: &mut RunState,
        metadata: Vec<(String, Vec<u8>)>,
    ) -> ForcingResult<()> {
        let mut members: Vec<(String, Vec<u8>)> = state
            .written
            .iter_mut()
            .flat_map(|o| std::mem::take(&mut o.tar_members))
            .collect();
        members.extend(metadata);

        let archive = tokio::task::spawn_blocking(move || build_tarball(&members))
            .await
            .map_err(|e| ForcingError::Worker(format!("tar task failed: {}", e)))??;

        state.bytes_written += archive.len() as u64;
        let key = StoragePath::forcing_tarball();
        self.storage.put(&key, Bytes::from(archive)).await?;
        info!(key = %key, "Tarball written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_list() {
        let text = "# nwm forcing\n/data/a.nc\n\n  s3://noaa-nwm-pds/b.nc  \n#skip\nhttps://h/c.nc\n";
        let files = parse_file_list(text).unwrap();
        let ids: Vec<String> = files.iter().map(|f| f.id()).collect();
        assert_eq!(ids, vec!["/data/a.nc", "s3://noaa-nwm-pds/b.nc", "https://h/c.nc"]);
    }
}

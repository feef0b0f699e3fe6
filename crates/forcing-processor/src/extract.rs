//! Catchment aggregation of gridded forcing files.
//!
//! Each extraction worker walks its contiguous block of files in order. Per
//! file it fetches the bytes (local files are opened in place), reads the
//! catchment window of every forcing variable and reduces each catchment to
//! the coverage-weighted mean of its cells.

use std::time::{Duration, Instant};

use forcing_common::{ForcingError, ForcingResult, GridSpec, SpatialWindow, ValidTime};
use metrics::{counter, histogram};
use ndarray::{s, Array2, Array3, ArrayView2, Axis};
use netcdf_parser::{read_forcing_frame, read_forcing_frame_from_bytes, ForcingFrame};
use storage::{FetchedSource, ForcingSource, SourceFetcher};
use tracing::{debug, info};

use crate::pool::WorkItem;
use crate::window::{CatchmentCells, CatchmentIndex};

/// Read-only state of the extraction stage.
#[derive(Debug)]
pub struct ExtractContext {
    pub grid: GridSpec,
    pub index: CatchmentIndex,
    /// NWM variable read for every output column, in column order
    pub variables: Vec<String>,
    pub files: Vec<ForcingSource>,
    pub fetcher: SourceFetcher,
    /// Timeout the fetcher was built with
    pub request_timeout: Duration,
    pub verbose: bool,
}

impl ExtractContext {
    pub fn window(&self) -> &SpatialWindow {
        self.index.window()
    }
}

/// Result of one extraction worker, one entry per file in file order.
#[derive(Debug, Clone, Default)]
pub struct ExtractOutput {
    /// `[catchment, variable]` means per file
    pub values: Vec<Array2<f32>>,
    pub times: Vec<ValidTime>,
    /// Size of every input file
    pub file_sizes: Vec<u64>,
    /// Bytes read over the network
    pub bytes_read: u64,
}

/// Coverage-weighted mean of one catchment over a flat window field.
///
/// Accumulates in f64. Fill cells (NaN) propagate into the mean.
pub fn weighted_mean(field: &[f32], cells: &CatchmentCells) -> f32 {
    let sum: f64 = cells
        .local
        .iter()
        .zip(&cells.fractions)
        .map(|(&i, &f)| f * field[i] as f64)
        .sum();
    (sum / cells.total_fraction) as f32
}

/// Reduce a frame to `[catchment, variable]` means.
pub fn aggregate(frame: &ForcingFrame, index: &CatchmentIndex) -> Array2<f32> {
    let n_vars = frame.n_variables();
    let mut out = Array2::<f32>::zeros((index.len(), n_vars));
    for v in 0..n_vars {
        let field = flat_field(frame.field(v));
        for (c, cells) in index.catchments().iter().enumerate() {
            out[[c, v]] = weighted_mean(&field, cells);
        }
    }
    out
}

fn flat_field(field: ArrayView2<'_, f32>) -> std::borrow::Cow<'_, [f32]> {
    match field.to_slice() {
        Some(slice) => std::borrow::Cow::Borrowed(slice),
        None => std::borrow::Cow::Owned(field.iter().copied().collect()),
    }
}

/// Extraction worker: aggregate every file of `item.slice`.
pub async fn extract_files(item: WorkItem<ExtractContext>) -> ForcingResult<ExtractOutput> {
    let ctx = item.context;
    let started = Instant::now();
    let n_files = item.slice.len();
    let mut output = ExtractOutput {
        values: Vec::with_capacity(n_files),
        times: Vec::with_capacity(n_files),
        file_sizes: Vec::with_capacity(n_files),
        bytes_read: 0,
    };

    for (done, file_index) in item.slice.enumerate() {
        let source = &ctx.files[file_index];
        let fetched = ctx.fetcher.fetch(source).await?;
        output.bytes_read += fetched.remote_len() as u64;
        output.file_sizes.push(match &fetched {
            FetchedSource::Path(path) => tokio::fs::metadata(path).await?.len(),
            FetchedSource::Bytes(bytes) => bytes.len() as u64,
        });

        let job_ctx = ctx.clone();
        let source_id = source.id();
        let (values, time) = tokio::task::spawn_blocking(move || {
            let frame = read_frame(&job_ctx, &fetched, &source_id)?;
            Ok::<_, ForcingError>((aggregate(&frame, &job_ctx.index), frame.valid_time))
        })
        .await
        .map_err(|e| ForcingError::Worker(format!("extraction task failed: {}", e)))??;

        output.values.push(values);
        output.times.push(time);
        counter!("forcing_files_extracted_total").increment(1);

        let elapsed = started.elapsed().as_secs_f64();
        let mb_per_sec = output.bytes_read as f64 / 1e6 / elapsed.max(1e-9);
        if ctx.verbose {
            info!(
                worker = item.worker,
                progress = format!("{}/{}", done + 1, n_files),
                valid_time = %time,
                bytes_read = output.bytes_read,
                mb_per_sec = format!("{:.2}", mb_per_sec),
                elapsed_secs = format!("{:.1}", elapsed),
                "Extracted file"
            );
        } else {
            debug!(worker = item.worker, source = %source.id(), valid_time = %time, "Extracted file");
        }
    }

    histogram!("forcing_extract_worker_seconds").record(started.elapsed().as_secs_f64());
    Ok(output)
}

fn read_frame(
    ctx: &ExtractContext,
    fetched: &FetchedSource,
    source_id: &str,
) -> ForcingResult<ForcingFrame> {
    let variables: Vec<&str> = ctx.variables.iter().map(String::as_str).collect();
    let frame = match fetched {
        FetchedSource::Path(path) => {
            read_forcing_frame(path, source_id, &ctx.grid, ctx.window(), &variables)?
        }
        FetchedSource::Bytes(bytes) => {
            read_forcing_frame_from_bytes(bytes, source_id, &ctx.grid, ctx.window(), &variables)?
        }
    };
    Ok(frame)
}

/// Extracted series of every catchment over a run or chunk.
#[derive(Debug, Clone)]
pub struct ForcingCube {
    /// `[variable, time, catchment]`
    pub data: Array3<f32>,
    pub times: Vec<ValidTime>,
}

impl ForcingCube {
    /// Stack worker outputs in worker order.
    pub fn from_outputs(
        outputs: Vec<ExtractOutput>,
        n_catchments: usize,
        n_variables: usize,
    ) -> ForcingResult<Self> {
        let n_times: usize = outputs.iter().map(|o| o.values.len()).sum();
        let mut data = Array3::<f32>::zeros((n_variables, n_times, n_catchments));
        let mut times = Vec::with_capacity(n_times);

        let mut t = 0;
        for output in outputs {
            for (values, time) in output.values.into_iter().zip(output.times) {
                if values.dim() != (n_catchments, n_variables) {
                    return Err(ForcingError::InvalidData(format!(
                        "extracted block has shape {:?}, expected ({}, {})",
                        values.dim(),
                        n_catchments,
                        n_variables
                    )));
                }
                data.slice_mut(s![.., t, ..]).assign(&values.t());
                times.push(time);
                t += 1;
            }
        }
        Ok(Self { data, times })
    }

    pub fn n_variables(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn n_times(&self) -> usize {
        self.times.len()
    }

    pub fn n_catchments(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    /// `[time, variable]` series of one catchment.
    pub fn catchment(&self, index: usize) -> Array2<f32> {
        self.data.index_axis(Axis(2), index).t().to_owned()
    }
}

/// Total bytes read by a set of extraction outputs.
pub fn bytes_read(outputs: &[ExtractOutput]) -> u64 {
    outputs.iter().map(|o| o.bytes_read).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(local: Vec<usize>, fractions: Vec<f64>) -> CatchmentCells {
        let total_fraction = fractions.iter().sum();
        CatchmentCells {
            local,
            fractions,
            total_fraction,
        }
    }

    #[test]
    fn test_constant_field_mean_is_constant() {
        let field = vec![3.25f32; 12];
        for fractions in [vec![0.1, 0.9], vec![5.0, 0.0], vec![0.3, 0.3]] {
            let c = cells(vec![1, 7], fractions);
            assert_eq!(weighted_mean(&field, &c), 3.25);
        }
    }

    #[test]
    fn test_fractions_normalized_by_sum() {
        let field = vec![0.0, 10.0, 20.0, 30.0];
        // 0.2*10 + 0.2*30 over 0.4
        assert_eq!(weighted_mean(&field, &cells(vec![1, 3], vec![0.2, 0.2])), 20.0);
        assert_eq!(weighted_mean(&field, &cells(vec![0, 2], vec![0.25, 0.75])), 15.0);
    }

    #[test]
    fn test_cube_keeps_worker_then_file_order() {
        let block = |v: f32| Array2::from_elem((2, 3), v);
        let time = |h: u32| {
            ValidTime::new(
                chrono::NaiveDate::from_ymd_opt(2023, 1, 1)
                    .unwrap()
                    .and_hms_opt(h, 0, 0)
                    .unwrap(),
            )
        };
        let outputs = vec![
            ExtractOutput {
                values: vec![block(1.0), block(2.0)],
                times: vec![time(1), time(2)],
                file_sizes: vec![10, 0],
                bytes_read: 10,
            },
            ExtractOutput {
                values: vec![block(3.0)],
                times: vec![time(3)],
                file_sizes: vec![5],
                bytes_read: 5,
            },
        ];
        assert_eq!(bytes_read(&outputs), 15);

        let cube = ForcingCube::from_outputs(outputs, 2, 3).unwrap();
        assert_eq!(cube.data.dim(), (3, 3, 2));
        assert_eq!(cube.times, vec![time(1), time(2), time(3)]);
        assert_eq!(cube.catchment(1).column(0).to_vec(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_cube_rejects_wrong_block_shape() {
        let outputs = vec![ExtractOutput {
            values: vec![Array2::zeros((1, 3))],
            times: vec![ValidTime::parse("2023-01-01 00:00:00").unwrap()],
            file_sizes: vec![0],
            bytes_read: 0,
        }];
        assert!(ForcingCube::from_outputs(outputs, 2, 3).is_err());
    }
}

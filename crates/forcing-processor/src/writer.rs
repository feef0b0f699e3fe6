//! Persisting per-catchment series.
//!
//! Writer workers own a contiguous block of catchments and handle them in
//! table order. In append mode the series already in storage is read back and
//! the new rows are placed after it; the whole object is then rewritten.

use std::io::Write;
use std::time::Instant;

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use forcing_common::{ForcingError, ForcingResult};
use metrics::counter;
use ndarray::{Array3, Axis};
use netcdf_parser::{read_ngen_netcdf_from_bytes, write_ngen_netcdf_to_bytes, NgenForcingSet};
use storage::{ObjectStorage, StoragePath};
use tracing::{debug, info};

use crate::config::OutputFormat;
use crate::extract::ForcingCube;
use crate::metadata::gzip_size;
use crate::pool::WorkItem;
use crate::table::CatchmentTable;

/// Read-only state of the writer stage.
#[derive(Debug)]
pub struct WriteContext {
    pub cube: ForcingCube,
    /// Catchment ids in cube order
    pub ids: Vec<String>,
    /// Output column names in cube variable order
    pub columns: Vec<String>,
    pub storage: ObjectStorage,
    pub formats: Vec<OutputFormat>,
    /// Merge with the series written by earlier chunks
    pub append: bool,
    pub verbose: bool,
}

impl WriteContext {
    fn wants(&self, format: OutputFormat) -> bool {
        self.formats.contains(&format)
    }

    /// Format read back in append mode, Parquet first.
    fn append_source(&self) -> Option<OutputFormat> {
        [OutputFormat::Parquet, OutputFormat::Csv]
            .into_iter()
            .find(|f| self.wants(*f))
    }
}

/// Written size of a sampled artifact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArtifactSample {
    pub format: OutputFormat,
    pub bytes: u64,
    pub gzip_bytes: u64,
}

/// Result of one writer worker, catchments in assignment order.
#[derive(Debug, Clone, Default)]
pub struct WriteOutput {
    pub ids: Vec<String>,
    /// Per catchment column means over the full written series
    pub means: Vec<Vec<f64>>,
    pub medians: Vec<Vec<f64>>,
    pub samples: Vec<ArtifactSample>,
    /// CSV encodings of the full series, kept when a tarball is requested
    pub tar_members: Vec<(String, Vec<u8>)>,
    pub bytes_written: u64,
}

/// Writer worker: persist every catchment of `item.slice`.
pub async fn write_catchments(item: WorkItem<WriteContext>) -> ForcingResult<WriteOutput> {
    let ctx = item.context;
    let started = Instant::now();
    let mut output = WriteOutput::default();
    let n = item.slice.len();

    for (done, c) in item.slice.enumerate() {
        let id = &ctx.ids[c];
        let current =
            CatchmentTable::new(ctx.cube.times.clone(), ctx.columns.clone(), ctx.cube.catchment(c))?;
        let table = if ctx.append {
            read_previous(&ctx, id).await?.append(&current).map_err(|e| {
                ForcingError::AppendConsistency {
                    catchment: id.clone(),
                    message: e.to_string(),
                }
            })?
        } else {
            current
        };

        let csv = if ctx.wants(OutputFormat::Csv) || ctx.wants(OutputFormat::Tar) {
            Some(table.to_csv()?)
        } else {
            None
        };

        let mut written = Vec::new();
        if ctx.wants(OutputFormat::Csv) {
            if let Some(csv) = &csv {
                written.push((OutputFormat::Csv, csv.clone()));
            }
        }
        if ctx.wants(OutputFormat::Parquet) {
            written.push((OutputFormat::Parquet, table.to_parquet()?));
        }

        for (format, data) in &written {
            let key = StoragePath::catchment_file(id, format.as_str());
            ctx.storage.put(&key, Bytes::from(data.clone())).await?;
            output.bytes_written += data.len() as u64;

            if done == 0 {
                output.samples.push(ArtifactSample {
                    format: *format,
                    bytes: data.len() as u64,
                    gzip_bytes: gzip_size(data)?,
                });
            }
        }

        if ctx.wants(OutputFormat::Tar) {
            if let Some(csv) = csv {
                output
                    .tar_members
                    .push((format!("{}.csv", StoragePath::catchment_stem(id)), csv));
            }
        }

        output.means.push(table.column_means());
        output.medians.push(table.column_medians());
        output.ids.push(id.clone());
        counter!("forcing_catchments_written_total").increment(1);

        if ctx.verbose {
            info!(
                worker = item.worker,
                progress = format!("{}/{}", done + 1, n),
                catchment = %id,
                rows = table.n_rows(),
                elapsed_secs = format!("{:.1}", started.elapsed().as_secs_f64()),
                "Wrote catchment"
            );
        } else {
            debug!(worker = item.worker, catchment = %id, rows = table.n_rows(), "Wrote catchment");
        }
    }

    counter!("forcing_bytes_written_total").increment(output.bytes_written);
    Ok(output)
}

async fn read_previous(ctx: &WriteContext, id: &str) -> ForcingResult<CatchmentTable> {
    let consistency = |message: String| ForcingError::AppendConsistency {
        catchment: id.to_string(),
        message,
    };

    let format = ctx
        .append_source()
        .ok_or_else(|| consistency("no csv or parquet output to append to".to_string()))?;
    let key = StoragePath::catchment_file(id, format.as_str());
    let data = ctx
        .storage
        .get_opt(&key)
        .await?
        .ok_or_else(|| consistency(format!("previous chunk output {} is missing", key)))?;

    let previous = match format {
        OutputFormat::Parquet => CatchmentTable::from_parquet(data),
        _ => CatchmentTable::from_csv(&data),
    }
    .map_err(|e| consistency(format!("cannot read {}: {}", key, e)))?;

    if previous.columns != ctx.columns {
        return Err(consistency(format!(
            "{} has columns {:?}, expected {:?}",
            key, previous.columns, ctx.columns
        )));
    }
    Ok(previous)
}

/// Write one combined NetCDF per region, appending to earlier chunks.
pub async fn write_region_netcdf(
    storage: &ObjectStorage,
    cube: &ForcingCube,
    ids: &[String],
    columns: &[String],
    regions: &[(String, Vec<usize>)],
    append: bool,
) -> ForcingResult<u64> {
    let mut bytes_written = 0;
    for (region, members) in regions {
        let key = StoragePath::region_netcdf(region);

        // [var, time, catchment] -> [var, catchment, time] for the members
        let data: Array3<f32> = cube
            .data
            .select(Axis(2), members)
            .permuted_axes([0, 2, 1])
            .as_standard_layout()
            .into_owned();
        let set = NgenForcingSet::new(
            members.iter().map(|&i| ids[i].clone()).collect(),
            cube.times.clone(),
            columns.to_vec(),
            data,
        )?;

        let previous = if append {
            let data = storage.get_opt(&key).await?.ok_or_else(|| {
                ForcingError::AppendConsistency {
                    catchment: region.clone(),
                    message: format!("previous chunk output {} is missing", key),
                }
            })?;
            Some(data)
        } else {
            None
        };

        let encoded = tokio::task::spawn_blocking(move || {
            let set = match previous {
                Some(data) => {
                    let names: Vec<&str> = set.variables.iter().map(String::as_str).collect();
                    let mut combined = read_ngen_netcdf_from_bytes(&data, &names)?;
                    combined.append_times(&set)?;
                    combined
                }
                None => set,
            };
            write_ngen_netcdf_to_bytes(&set)
        })
        .await
        .map_err(|e| ForcingError::Worker(format!("NetCDF task failed: {}", e)))?
        .map_err(|e| {
            if append {
                ForcingError::AppendConsistency {
                    catchment: region.clone(),
                    message: e.to_string(),
                }
            } else {
                ForcingError::from(e)
            }
        })?;

        bytes_written += encoded.len() as u64;
        storage.put(&key, Bytes::from(encoded)).await?;
        info!(region = %region, catchments = members.len(), key = %key, "Wrote region NetCDF");
    }
    Ok(bytes_written)
}

/// Gzip tarball of `members` (`name`, contents).
pub fn build_tarball(members: &[(String, Vec<u8>)]) -> ForcingResult<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut archive = tar::Builder::new(encoder);
    let mtime = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    for (name, data) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(mtime);
        header.set_cksum();
        archive.append_data(&mut header, name, data.as_slice())?;
    }

    let mut encoder = archive.into_inner()?;
    encoder.flush()?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn test_tarball_members() {
        let members = vec![
            ("cat-1.csv".to_string(), b"time,a\n".to_vec()),
            ("metadata.csv".to_string(), b"key,value\n".to_vec()),
        ];
        let data = build_tarball(&members).unwrap();

        let mut archive = tar::Archive::new(GzDecoder::new(data.as_slice()));
        let mut seen = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().to_string();
            let mut body = String::new();
            entry.read_to_string(&mut body).unwrap();
            seen.push((name, body));
        }
        assert_eq!(
            seen,
            vec![
                ("cat-1.csv".to_string(), "time,a\n".to_string()),
                ("metadata.csv".to_string(), "key,value\n".to_string()),
            ]
        );
    }
}

//! Combined per-region forcing file in the ngen NetCDF layout.
//!
//! Layout:
//! - dimensions `catchment-id` and `time`
//! - `ids(catchment-id)`: catchment identifiers
//! - `Time(catchment-id, time)`: valid times in seconds since the epoch
//! - one `f32` variable per forcing column, dimensioned `(catchment-id, time)`

use std::path::Path;

use forcing_common::ValidTime;
use ndarray::{concatenate, Array3, Axis};
use tracing::debug;

use crate::error::{NetCdfError, NetCdfResult};
use crate::native::{silence_hdf5_errors, TempNetCdf};

const CATCHMENT_DIM: &str = "catchment-id";
const TIME_DIM: &str = "time";
const IDS_VAR: &str = "ids";
const TIME_VAR: &str = "Time";

/// All forcing values of a region.
#[derive(Debug, Clone, PartialEq)]
pub struct NgenForcingSet {
    pub ids: Vec<String>,
    pub times: Vec<ValidTime>,
    pub variables: Vec<String>,
    /// `[variable, catchment, time]`
    pub data: Array3<f32>,
}

impl NgenForcingSet {
    pub fn new(
        ids: Vec<String>,
        times: Vec<ValidTime>,
        variables: Vec<String>,
        data: Array3<f32>,
    ) -> NetCdfResult<Self> {
        let expected = [variables.len(), ids.len(), times.len()];
        if data.shape() != expected {
            return Err(NetCdfError::InvalidFormat(format!(
                "forcing data shape {:?} does not match {:?}",
                data.shape(),
                expected
            )));
        }
        Ok(Self {
            ids,
            times,
            variables,
            data,
        })
    }

    /// Extend with later times for the same catchments and variables.
    pub fn append_times(&mut self, later: &NgenForcingSet) -> NetCdfResult<()> {
        if later.ids != self.ids {
            return Err(NetCdfError::InvalidFormat(
                "catchment ids differ from the existing file".to_string(),
            ));
        }
        if later.variables != self.variables {
            return Err(NetCdfError::InvalidFormat(
                "variables differ from the existing file".to_string(),
            ));
        }
        self.data = concatenate(Axis(2), &[self.data.view(), later.data.view()])
            .map_err(|e| NetCdfError::InvalidFormat(e.to_string()))?;
        self.times.extend_from_slice(&later.times);
        Ok(())
    }
}

/// Write a forcing set to `path`, replacing any existing file.
pub fn write_ngen_netcdf(path: &Path, set: &NgenForcingSet) -> NetCdfResult<()> {
    silence_hdf5_errors();

    let n_catchments = set.ids.len();
    let n_times = set.times.len();

    let mut file = netcdf::create(path)?;
    file.add_dimension(CATCHMENT_DIM, n_catchments)?;
    file.add_dimension(TIME_DIM, n_times)?;

    {
        let mut ids = file.add_string_variable(IDS_VAR, &[CATCHMENT_DIM])?;
        for (i, id) in set.ids.iter().enumerate() {
            ids.put_string(id, [i])?;
        }
    }

    {
        let seconds: Vec<f64> = set.times.iter().map(|t| t.timestamp() as f64).collect();
        let mut tiled = Vec::with_capacity(n_catchments * n_times);
        for _ in 0..n_catchments {
            tiled.extend_from_slice(&seconds);
        }
        let mut time = file.add_variable::<f64>(TIME_VAR, &[CATCHMENT_DIM, TIME_DIM])?;
        time.put_attribute("units", "seconds since 1970-01-01 00:00:00")?;
        if !tiled.is_empty() {
            time.put_values(&tiled, ..)?;
        }
    }

    for (v, name) in set.variables.iter().enumerate() {
        let values: Vec<f32> = set.data.index_axis(Axis(0), v).iter().copied().collect();
        let mut var = file.add_variable::<f32>(name, &[CATCHMENT_DIM, TIME_DIM])?;
        if !values.is_empty() {
            var.put_values(&values, ..)?;
        }
    }

    debug!(
        path = %path.display(),
        catchments = n_catchments,
        times = n_times,
        "Wrote ngen forcing file"
    );
    Ok(())
}

/// Write a forcing set and return the encoded file.
pub fn write_ngen_netcdf_to_bytes(set: &NgenForcingSet) -> NetCdfResult<Vec<u8>> {
    let temp = TempNetCdf::reserve("ngen_forcing");
    write_ngen_netcdf(temp.path(), set)?;
    temp.read_bytes()
}

/// Read a forcing set written by [`write_ngen_netcdf`].
pub fn read_ngen_netcdf(path: &Path, variables: &[&str]) -> NetCdfResult<NgenForcingSet> {
    silence_hdf5_errors();

    let source_id = path.display().to_string();
    let file = netcdf::open(path)?;

    let n_catchments = file
        .dimension(CATCHMENT_DIM)
        .ok_or_else(|| NetCdfError::missing(CATCHMENT_DIM, &source_id))?
        .len();
    let n_times = file
        .dimension(TIME_DIM)
        .ok_or_else(|| NetCdfError::missing(TIME_DIM, &source_id))?
        .len();

    let ids_var = file
        .variable(IDS_VAR)
        .ok_or_else(|| NetCdfError::missing(IDS_VAR, &source_id))?;
    let mut ids = Vec::with_capacity(n_catchments);
    for i in 0..n_catchments {
        ids.push(ids_var.get_string([i])?);
    }

    let time_var = file
        .variable(TIME_VAR)
        .ok_or_else(|| NetCdfError::missing(TIME_VAR, &source_id))?;
    let mut times = Vec::with_capacity(n_times);
    if n_catchments > 0 && n_times > 0 {
        let seconds = time_var.get_values::<f64, _>((0usize, ..))?;
        for s in seconds {
            let time = ValidTime::from_timestamp(s as i64)
                .map_err(|e| NetCdfError::InvalidFormat(e.to_string()))?;
            times.push(time);
        }
    }

    let mut data = Array3::<f32>::zeros((variables.len(), n_catchments, n_times));
    for (v, name) in variables.iter().enumerate() {
        let var = file
            .variable(name)
            .ok_or_else(|| NetCdfError::missing(*name, &source_id))?;
        if n_catchments == 0 || n_times == 0 {
            continue;
        }
        let values = var.get_values::<f32, _>(..)?;
        for (i, value) in values.into_iter().enumerate() {
            data[[v, i / n_times, i % n_times]] = value;
        }
    }

    NgenForcingSet::new(
        ids,
        times,
        variables.iter().map(|s| s.to_string()).collect(),
        data,
    )
}

/// Read a forcing set from an in-memory file.
pub fn read_ngen_netcdf_from_bytes(bytes: &[u8], variables: &[&str]) -> NetCdfResult<NgenForcingSet> {
    let temp = TempNetCdf::from_bytes("ngen_forcing", bytes)?;
    read_ngen_netcdf(temp.path(), variables)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_set(start: &str, n_times: usize) -> NgenForcingSet {
        let t0 = ValidTime::parse(start).unwrap();
        let times = (0..n_times)
            .map(|i| ValidTime::from_timestamp(t0.timestamp() + 3600 * i as i64).unwrap())
            .collect();
        let data = Array3::from_shape_fn((2, 3, n_times), |(v, c, t)| {
            (v * 100 + c * 10 + t) as f32
        });
        NgenForcingSet::new(
            vec!["cat-1".into(), "cat-2".into(), "cat-3".into()],
            times,
            vec!["A".into(), "B".into()],
            data,
        )
        .unwrap()
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let result = NgenForcingSet::new(
            vec!["cat-1".into()],
            vec![],
            vec!["A".into()],
            Array3::zeros((1, 2, 0)),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_append_times() {
        let mut first = sample_set("2023-01-01 01:00:00", 2);
        let second = sample_set("2023-01-01 03:00:00", 1);
        first.append_times(&second).unwrap();

        assert_eq!(first.times.len(), 3);
        assert_eq!(first.data.shape(), &[2, 3, 3]);
        assert_eq!(first.times[2].to_string(), "2023-01-01 03:00:00");
        assert_eq!(first.data[[1, 2, 2]], 120.0);
    }

    #[test]
    fn test_append_rejects_different_ids() {
        let mut first = sample_set("2023-01-01 01:00:00", 1);
        let mut second = sample_set("2023-01-01 02:00:00", 1);
        second.ids[0] = "cat-9".into();
        assert!(first.append_times(&second).is_err());
    }

    #[test]
    fn test_write_read_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region_forcings.nc");
        let set = sample_set("2023-01-01 01:00:00", 4);

        write_ngen_netcdf(&path, &set).unwrap();
        let back = read_ngen_netcdf(&path, &["A", "B"]).unwrap();

        assert_eq!(back, set);
    }
}

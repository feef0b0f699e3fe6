//! Generators for synthetic NWM forcing files.
//!
//! Files are written with predictable, verifiable values so that aggregated
//! catchment means can be computed by hand in tests.

use std::fs;
use std::path::{Path, PathBuf};

use forcing_common::time::NWM_TIME_FORMAT;
use forcing_common::variables::distinct_nwm_names;
use forcing_common::{GridCell, GridSpec, ValidTime};

/// Valid time of the first synthetic file (`2023-01-01 01:00:00`).
pub const FIRST_VALID_TIME: &str = "2023-01-01 01:00:00";

/// Value of distinct NWM variable `var` at weight-space `cell` in file `step`.
///
/// Each cell value is calculated as: `(var + 1) * 100 + x * 10 + y + step / 2`
///
/// All values are exactly representable as `f32`.
pub fn pattern_value(var: usize, cell: GridCell, step: usize) -> f32 {
    ((var + 1) * 100 + cell.x * 10 + cell.y) as f32 + step as f32 * 0.5
}

/// Valid time of file `step`, one hour apart starting at [`FIRST_VALID_TIME`].
pub fn valid_time(step: usize) -> ValidTime {
    let start = ValidTime::parse(FIRST_VALID_TIME).map(|t| t.timestamp()).unwrap_or(0);
    ValidTime::from_timestamp(start + 3600 * step as i64)
        .unwrap_or_else(|_| panic!("valid time for step {} out of range", step))
}

/// Builder for one synthetic forcing file.
///
/// The file has `(time=1, y, x)` dimensions, the eight distinct NWM forcing
/// variables and the `model_output_valid_time` attribute. Values are given in
/// weight space; when `grid.flip_rows` is set they are stored in flipped row
/// order, as NWM files are.
#[derive(Debug, Clone)]
pub struct SyntheticForcingFile {
    pub grid: GridSpec,
    pub step: usize,
    /// Store values as packed `i32` with `scale_factor = 0.5`
    pub packed: bool,
    /// Leave out the valid-time attribute
    pub omit_valid_time: bool,
    /// Leave out one variable
    pub omit_variable: Option<&'static str>,
    /// Weight-space cell written as fill value
    pub fill_cell: Option<GridCell>,
}

impl SyntheticForcingFile {
    pub fn new(grid: GridSpec, step: usize) -> Self {
        Self {
            grid,
            step,
            packed: false,
            omit_valid_time: false,
            omit_variable: None,
            fill_cell: None,
        }
    }

    /// Write the file using [`pattern_value`].
    pub fn write(&self, path: &Path) -> Result<(), netcdf::Error> {
        let step = self.step;
        self.write_with(path, |var, cell| pattern_value(var, cell, step))
    }

    /// Write the file with values from `value(var_index, cell)`.
    pub fn write_with<F>(&self, path: &Path, value: F) -> Result<(), netcdf::Error>
    where
        F: Fn(usize, GridCell) -> f32,
    {
        const FILL: i32 = -9999;
        let (ny, nx) = (self.grid.ny, self.grid.nx);

        let mut file = netcdf::create(path)?;
        file.add_dimension("time", 1)?;
        file.add_dimension("y", ny)?;
        file.add_dimension("x", nx)?;

        if !self.omit_valid_time {
            let raw = valid_time(self.step).0.format(NWM_TIME_FORMAT).to_string();
            file.add_attribute("model_output_valid_time", raw.as_str())?;
        }

        for (v, name) in distinct_nwm_names().into_iter().enumerate() {
            if self.omit_variable == Some(name) {
                continue;
            }

            let mut values = vec![0f32; ny * nx];
            let mut is_fill = vec![false; ny * nx];
            for file_row in 0..ny {
                let y = if self.grid.flip_rows {
                    ny - 1 - file_row
                } else {
                    file_row
                };
                for x in 0..nx {
                    let cell = GridCell::new(x, y);
                    values[file_row * nx + x] = value(v, cell);
                    is_fill[file_row * nx + x] = self.fill_cell == Some(cell);
                }
            }

            if self.packed {
                let packed: Vec<i32> = values
                    .iter()
                    .zip(&is_fill)
                    .map(|(&val, &fill)| if fill { FILL } else { (val * 2.0).round() as i32 })
                    .collect();
                let mut var = file.add_variable::<i32>(name, &["time", "y", "x"])?;
                var.put_attribute("_FillValue", FILL)?;
                var.put_attribute("scale_factor", 0.5f32)?;
                var.put_attribute("add_offset", 0.0f32)?;
                var.put_values(&packed, ..)?;
            } else {
                let values: Vec<f32> = values
                    .iter()
                    .zip(&is_fill)
                    .map(|(&val, &fill)| if fill { FILL as f32 } else { val })
                    .collect();
                let mut var = file.add_variable::<f32>(name, &["time", "y", "x"])?;
                var.put_attribute("_FillValue", FILL as f32)?;
                var.put_values(&values, ..)?;
            }
        }

        Ok(())
    }
}

/// Write a forcing file whose every variable holds `native` as stored, in
/// file row order (`native[row * nx + col]`), with no row flip applied.
pub fn write_native_forcing_file(
    path: &Path,
    ny: usize,
    nx: usize,
    step: usize,
    native: &[f32],
) -> Result<(), netcdf::Error> {
    assert_eq!(native.len(), ny * nx, "native array must be ny * nx");
    let mut file = netcdf::create(path)?;
    file.add_dimension("time", 1)?;
    file.add_dimension("y", ny)?;
    file.add_dimension("x", nx)?;

    let raw = valid_time(step).0.format(NWM_TIME_FORMAT).to_string();
    file.add_attribute("model_output_valid_time", raw.as_str())?;
    for name in distinct_nwm_names() {
        let mut var = file.add_variable::<f32>(name, &["time", "y", "x"])?;
        var.put_values(native, ..)?;
    }
    Ok(())
}

/// Write `count` consecutive synthetic files into `dir`.
///
/// Returns the file paths in chronological order.
pub fn write_forcing_series(
    dir: &Path,
    grid: &GridSpec,
    first_step: usize,
    count: usize,
) -> Result<Vec<PathBuf>, netcdf::Error> {
    let mut paths = Vec::with_capacity(count);
    for step in first_step..first_step + count {
        let path = dir.join(format!("nwm.t00z.medium_range.forcing.f{:03}.conus.nc", step + 1));
        SyntheticForcingFile::new(*grid, step).write(&path)?;
        paths.push(path);
    }
    Ok(paths)
}

/// Write a newline-delimited file list.
pub fn write_file_list(path: &Path, files: &[PathBuf]) -> std::io::Result<()> {
    let mut body = String::from("# synthetic forcing files\n");
    for file in files {
        body.push_str(&file.display().to_string());
        body.push('\n');
    }
    fs::write(path, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_value() {
        assert_eq!(pattern_value(0, GridCell::new(0, 0), 0), 100.0);
        assert_eq!(pattern_value(1, GridCell::new(2, 3), 1), 223.5);
    }

    #[test]
    fn test_valid_time_steps() {
        assert_eq!(valid_time(0).to_string(), "2023-01-01 01:00:00");
        assert_eq!(valid_time(23).to_string(), "2023-01-02 00:00:00");
    }
}

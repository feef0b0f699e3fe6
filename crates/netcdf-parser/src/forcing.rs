//! Windowed reads of NWM forcing files.
//!
//! An NWM forcing file holds one valid time of gridded forcing fields on the
//! native grid, with either `(time, y, x)` or `(y, x)` dimensions. Only the
//! rows and columns covered by the catchment window are read.

use std::collections::HashMap;
use std::ops::Range;
use std::path::Path;

use forcing_common::{GridSpec, SpatialWindow, ValidTime};
use ndarray::{Array3, ArrayView2};
use tracing::debug;

use crate::error::{NetCdfError, NetCdfResult};
use crate::native::{get_f32_attr, get_global_str_attr, silence_hdf5_errors, TempNetCdf};

/// Global attribute holding the valid time of a forcing file.
pub const VALID_TIME_ATTR: &str = "model_output_valid_time";

/// Forcing fields of one file restricted to a spatial window.
#[derive(Debug, Clone)]
pub struct ForcingFrame {
    pub valid_time: ValidTime,
    pub window: SpatialWindow,
    /// `[variable, window_y, window_x]` with row 0 at `window.y_min`, in the
    /// order the variables were requested.
    pub data: Array3<f32>,
}

impl ForcingFrame {
    /// Window field of the `index`-th requested variable.
    pub fn field(&self, index: usize) -> ArrayView2<'_, f32> {
        self.data.index_axis(ndarray::Axis(0), index)
    }

    pub fn n_variables(&self) -> usize {
        self.data.shape()[0]
    }
}

/// Read the windowed fields of `variables` from a forcing file on disk.
///
/// Names may repeat; each distinct variable is read from the file once.
/// Packed values are unpacked with `scale_factor`/`add_offset` and fill
/// values become NaN. With `grid.flip_rows` the file rows are reversed so the
/// returned rows follow the weight row direction.
pub fn read_forcing_frame(
    path: &Path,
    source_id: &str,
    grid: &GridSpec,
    window: &SpatialWindow,
    variables: &[&str],
) -> NetCdfResult<ForcingFrame> {
    silence_hdf5_errors();

    if window.y_max >= grid.ny || window.x_max >= grid.nx {
        return Err(NetCdfError::InvalidFormat(format!(
            "window {:?} exceeds grid {}x{}",
            window, grid.ny, grid.nx
        )));
    }

    let file = netcdf::open(path)?;

    let raw_time = get_global_str_attr(&file, VALID_TIME_ATTR)
        .ok_or_else(|| NetCdfError::missing(VALID_TIME_ATTR, source_id))?;
    let valid_time = ValidTime::from_nwm_attribute(&raw_time)
        .map_err(|e| NetCdfError::InvalidFormat(format!("{}: {}", source_id, e)))?;

    let rows = grid.file_rows(window.y_min, window.y_max);
    let cols = window.columns();
    let (height, width) = (window.height(), window.width());

    let mut distinct: HashMap<&str, Vec<f32>> = HashMap::new();
    for name in variables {
        if !distinct.contains_key(name) {
            let values = read_window(&file, name, source_id, grid, rows.clone(), cols.clone())?;
            distinct.insert(*name, values);
        }
    }

    let mut data = Array3::<f32>::zeros((variables.len(), height, width));
    for (v, name) in variables.iter().enumerate() {
        let values = &distinct[name];
        for file_row in 0..height {
            let row = if grid.flip_rows {
                height - 1 - file_row
            } else {
                file_row
            };
            for col in 0..width {
                data[[v, row, col]] = values[file_row * width + col];
            }
        }
    }

    debug!(
        source = %source_id,
        valid_time = %valid_time,
        height = height,
        width = width,
        "Read forcing window"
    );

    Ok(ForcingFrame {
        valid_time,
        window: *window,
        data,
    })
}

/// Read a forcing frame from an in-memory file.
pub fn read_forcing_frame_from_bytes(
    bytes: &[u8],
    source_id: &str,
    grid: &GridSpec,
    window: &SpatialWindow,
    variables: &[&str],
) -> NetCdfResult<ForcingFrame> {
    let temp = TempNetCdf::from_bytes("nwm_forcing", bytes)?;
    read_forcing_frame(temp.path(), source_id, grid, window, variables)
}

fn read_window(
    file: &netcdf::File,
    name: &str,
    source_id: &str,
    grid: &GridSpec,
    rows: Range<usize>,
    cols: Range<usize>,
) -> NetCdfResult<Vec<f32>> {
    let var = file
        .variable(name)
        .ok_or_else(|| NetCdfError::missing(name, source_id))?;

    let dims = var.dimensions();
    let ndims = dims.len();
    if ndims < 2 {
        return Err(NetCdfError::InvalidFormat(format!(
            "{} in {} has {} dimensions",
            name, source_id, ndims
        )));
    }
    let (file_ny, file_nx) = (dims[ndims - 2].len(), dims[ndims - 1].len());
    if file_ny != grid.ny || file_nx != grid.nx {
        return Err(NetCdfError::InvalidFormat(format!(
            "{} in {} is {}x{}, expected {}x{}",
            name, source_id, file_ny, file_nx, grid.ny, grid.nx
        )));
    }

    let mut values: Vec<f32> = match ndims {
        2 => var.get_values::<f32, _>((rows, cols))?,
        3 => var.get_values::<f32, _>((0usize, rows, cols))?,
        _ => {
            return Err(NetCdfError::InvalidFormat(format!(
                "{} in {} has {} dimensions",
                name, source_id, ndims
            )))
        }
    };

    let scale_factor = get_f32_attr(&var, "scale_factor");
    let add_offset = get_f32_attr(&var, "add_offset");
    let fill_value = get_f32_attr(&var, "_FillValue").or_else(|| get_f32_attr(&var, "missing_value"));

    for value in values.iter_mut() {
        if fill_value.is_some_and(|fill| *value == fill) {
            *value = f32::NAN;
            continue;
        }
        if let Some(scale) = scale_factor {
            *value *= scale;
        }
        if let Some(offset) = add_offset {
            *value += offset;
        }
    }

    Ok(values)
}

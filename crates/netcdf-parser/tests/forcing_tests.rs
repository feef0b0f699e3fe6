//! Windowed reads of synthetic NWM forcing files.

use forcing_common::{GridCell, GridSpec, IndexOrder, SpatialWindow};
use netcdf_parser::{read_forcing_frame, read_forcing_frame_from_bytes, NetCdfError};
use test_utils::{pattern_value, SyntheticForcingFile};

const VARS: [&str; 3] = ["U2D", "RAINRATE", "RAINRATE"];

fn window(x_min: usize, x_max: usize, y_min: usize, y_max: usize) -> SpatialWindow {
    SpatialWindow {
        x_min,
        x_max,
        y_min,
        y_max,
    }
}

// ============================================================================
// Window placement
// ============================================================================

#[test]
fn test_flipped_rows_align_with_weight_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("f.nc");
    let grid = GridSpec::new(6, 5, IndexOrder::ColumnMajor, true);
    SyntheticForcingFile::new(grid, 0).write(&path).unwrap();

    let w = window(1, 3, 2, 4);
    let frame = read_forcing_frame(&path, "f.nc", &grid, &w, &VARS).unwrap();

    assert_eq!(frame.data.shape(), &[3, 3, 3]);
    for row in 0..3 {
        for col in 0..3 {
            let cell = GridCell::new(1 + col, 2 + row);
            assert_eq!(frame.data[[0, row, col]], pattern_value(0, cell, 0));
        }
    }
}

#[test]
fn test_unflipped_grid() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("f.nc");
    let grid = GridSpec::new(4, 4, IndexOrder::RowMajor, false);
    SyntheticForcingFile::new(grid, 2).write(&path).unwrap();

    let w = window(0, 3, 0, 3);
    let frame = read_forcing_frame(&path, "f.nc", &grid, &w, &["T2D"]).unwrap();
    // T2D is the sixth distinct variable (index 5)
    assert_eq!(frame.data[[0, 3, 1]], pattern_value(5, GridCell::new(1, 3), 2));
}

#[test]
fn test_duplicate_variable_read_into_both_slots() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("f.nc");
    let grid = GridSpec::new(4, 4, IndexOrder::ColumnMajor, true);
    SyntheticForcingFile::new(grid, 0).write(&path).unwrap();

    let frame = read_forcing_frame(&path, "f.nc", &grid, &window(0, 1, 0, 1), &VARS).unwrap();
    assert_eq!(frame.field(1), frame.field(2));
}

// ============================================================================
// Attributes and packing
// ============================================================================

#[test]
fn test_valid_time_parsed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("f.nc");
    let grid = GridSpec::new(4, 4, IndexOrder::ColumnMajor, true);
    SyntheticForcingFile::new(grid, 1).write(&path).unwrap();

    let frame = read_forcing_frame(&path, "f.nc", &grid, &window(0, 0, 0, 0), &VARS).unwrap();
    assert_eq!(frame.valid_time.to_string(), "2023-01-01 02:00:00");
}

#[test]
fn test_packed_values_unpacked_and_fill_is_nan() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("packed.nc");
    let grid = GridSpec::new(4, 4, IndexOrder::ColumnMajor, true);
    let mut file = SyntheticForcingFile::new(grid, 1);
    file.packed = true;
    file.fill_cell = Some(GridCell::new(2, 2));
    file.write(&path).unwrap();

    let frame = read_forcing_frame(&path, "packed.nc", &grid, &window(0, 3, 0, 3), &["U2D"]).unwrap();
    assert_eq!(frame.data[[0, 1, 3]], pattern_value(0, GridCell::new(3, 1), 1));
    assert!(frame.data[[0, 2, 2]].is_nan());
}

#[test]
fn test_from_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("f.nc");
    let grid = GridSpec::new(4, 4, IndexOrder::ColumnMajor, true);
    SyntheticForcingFile::new(grid, 0).write(&path).unwrap();
    let bytes = std::fs::read(&path).unwrap();

    let frame =
        read_forcing_frame_from_bytes(&bytes, "remote", &grid, &window(1, 2, 1, 2), &VARS).unwrap();
    assert_eq!(frame.data[[0, 0, 0]], pattern_value(0, GridCell::new(1, 1), 0));
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_missing_variable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("f.nc");
    let grid = GridSpec::new(4, 4, IndexOrder::ColumnMajor, true);
    let mut file = SyntheticForcingFile::new(grid, 0);
    file.omit_variable = Some("RAINRATE");
    file.write(&path).unwrap();

    match read_forcing_frame(&path, "f.nc", &grid, &window(0, 1, 0, 1), &VARS) {
        Err(NetCdfError::MissingData { name, .. }) => assert_eq!(name, "RAINRATE"),
        other => panic!("expected MissingData, got {:?}", other),
    }
}

#[test]
fn test_missing_valid_time() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("f.nc");
    let grid = GridSpec::new(4, 4, IndexOrder::ColumnMajor, true);
    let mut file = SyntheticForcingFile::new(grid, 0);
    file.omit_valid_time = true;
    file.write(&path).unwrap();

    match read_forcing_frame(&path, "f.nc", &grid, &window(0, 1, 0, 1), &VARS) {
        Err(NetCdfError::MissingData { name, .. }) => assert_eq!(name, "model_output_valid_time"),
        other => panic!("expected MissingData, got {:?}", other),
    }
}

#[test]
fn test_grid_shape_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("f.nc");
    SyntheticForcingFile::new(GridSpec::new(4, 4, IndexOrder::ColumnMajor, true), 0)
        .write(&path)
        .unwrap();

    let other = GridSpec::new(5, 4, IndexOrder::ColumnMajor, true);
    let result = read_forcing_frame(&path, "f.nc", &other, &window(0, 1, 0, 1), &VARS);
    assert!(matches!(result, Err(NetCdfError::InvalidFormat(_))));
}

#[test]
fn test_nonexistent_file() {
    let grid = GridSpec::new(4, 4, IndexOrder::ColumnMajor, true);
    let result = read_forcing_frame(
        std::path::Path::new("/nonexistent/f.nc"),
        "f.nc",
        &grid,
        &window(0, 1, 0, 1),
        &VARS,
    );
    assert!(result.is_err());
}

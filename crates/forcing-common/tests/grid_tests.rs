//! Flat index and window round trips on the native grid.

use forcing_common::{GridCell, GridSpec, IndexOrder, SpatialWindow};

#[test]
fn test_ravel_unravel_roundtrip_both_orders() {
    for order in [IndexOrder::ColumnMajor, IndexOrder::RowMajor] {
        let grid = GridSpec::new(7, 3, order, true);
        for index in 0..grid.len() as u64 {
            let cell = grid.unravel(index).unwrap();
            assert!(cell.x < 3 && cell.y < 7);
            assert_eq!(grid.ravel(cell), index);
        }
    }
}

#[test]
fn test_window_recovers_global_cells() {
    let cells = [GridCell::new(2, 3), GridCell::new(5, 7)];
    let mut window = SpatialWindow::around(cells[0]);
    window.include(cells[1]);

    assert_eq!(
        window,
        SpatialWindow {
            x_min: 2,
            x_max: 5,
            y_min: 3,
            y_max: 7
        }
    );
    for cell in cells {
        let local = window.local_index(cell).unwrap();
        assert_eq!(window.global_cell(local), Some(cell));
    }
}

#[test]
fn test_nwm_corner_indices() {
    let grid = GridSpec::nwm_conus();
    let last = grid.len() as u64 - 1;
    assert_eq!(grid.unravel(last).unwrap(), GridCell::new(4607, 3839));
    assert!(grid.unravel(last + 1).is_err());
}

#[test]
fn test_grid_spec_deserialize_defaults() {
    let grid: GridSpec = serde_json::from_str(r#"{"ny": 4, "nx": 4}"#).unwrap();
    assert_eq!(grid.index_order, IndexOrder::ColumnMajor);
    assert!(grid.flip_rows);

    let grid: GridSpec =
        serde_json::from_str(r#"{"ny": 4, "nx": 4, "index_order": "row_major", "flip_rows": false}"#)
            .unwrap();
    assert_eq!(grid.index_order, IndexOrder::RowMajor);
    assert!(!grid.flip_rows);
}

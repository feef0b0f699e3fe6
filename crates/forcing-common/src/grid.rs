//! Native grid geometry and flat-index handling.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::{ForcingError, ForcingResult};

/// Order in which a `(1, ny, nx)` grid is flattened into 1-D cell indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexOrder {
    /// C order: `x` varies fastest.
    RowMajor,
    /// Fortran order: `y` varies fastest.
    ColumnMajor,
}

impl Default for IndexOrder {
    fn default() -> Self {
        Self::ColumnMajor
    }
}

/// Specification of the native forcing grid the weights refer to.
///
/// The grid shape is `(1, ny, nx)`. Weight indices are flat indices into that
/// shape in `index_order`. When `flip_rows` is set, forcing files store their
/// rows in the opposite direction to the weight rows (south-up vs north-up).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSpec {
    /// Number of rows
    pub ny: usize,
    /// Number of columns
    pub nx: usize,
    /// Flat index order of the weight cell indices
    #[serde(default)]
    pub index_order: IndexOrder,
    /// Forcing file rows run opposite to weight rows
    #[serde(default = "default_flip_rows")]
    pub flip_rows: bool,
}

fn default_flip_rows() -> bool {
    true
}

/// A cell of the native grid in weight-space coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridCell {
    pub x: usize,
    pub y: usize,
}

impl GridCell {
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}

impl GridSpec {
    /// Create a new grid specification.
    pub fn new(ny: usize, nx: usize, index_order: IndexOrder, flip_rows: bool) -> Self {
        Self {
            ny,
            nx,
            index_order,
            flip_rows,
        }
    }

    /// NWM CONUS 1km forcing grid, `(1, 3840, 4608)`.
    pub fn nwm_conus() -> Self {
        Self::new(3840, 4608, IndexOrder::ColumnMajor, true)
    }

    /// Total number of grid cells.
    pub fn len(&self) -> usize {
        self.ny * self.nx
    }

    /// Check if grid is empty.
    pub fn is_empty(&self) -> bool {
        self.ny == 0 || self.nx == 0
    }

    /// Convert a flat cell index into a grid cell.
    pub fn unravel(&self, index: u64) -> ForcingResult<GridCell> {
        let size = self.len() as u64;
        if index >= size {
            return Err(ForcingError::IndexRange { index, size });
        }
        let index = index as usize;
        let cell = match self.index_order {
            IndexOrder::RowMajor => GridCell::new(index % self.nx, index / self.nx),
            IndexOrder::ColumnMajor => GridCell::new(index / self.ny, index % self.ny),
        };
        Ok(cell)
    }

    /// Convert a grid cell into its flat index.
    pub fn ravel(&self, cell: GridCell) -> u64 {
        let flat = match self.index_order {
            IndexOrder::RowMajor => cell.y * self.nx + cell.x,
            IndexOrder::ColumnMajor => cell.x * self.ny + cell.y,
        };
        flat as u64
    }

    /// Rows of the forcing file that hold weight rows `y_min..=y_max`.
    pub fn file_rows(&self, y_min: usize, y_max: usize) -> Range<usize> {
        if self.flip_rows {
            (self.ny - 1 - y_max)..(self.ny - y_min)
        } else {
            y_min..(y_max + 1)
        }
    }
}

impl Default for GridSpec {
    fn default() -> Self {
        Self::nwm_conus()
    }
}

/// Minimal bounding box of grid cells, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpatialWindow {
    pub x_min: usize,
    pub x_max: usize,
    pub y_min: usize,
    pub y_max: usize,
}

impl SpatialWindow {
    /// Window covering a single cell.
    pub fn around(cell: GridCell) -> Self {
        Self {
            x_min: cell.x,
            x_max: cell.x,
            y_min: cell.y,
            y_max: cell.y,
        }
    }

    /// Grow the window so it contains `cell`.
    pub fn include(&mut self, cell: GridCell) {
        self.x_min = self.x_min.min(cell.x);
        self.x_max = self.x_max.max(cell.x);
        self.y_min = self.y_min.min(cell.y);
        self.y_max = self.y_max.max(cell.y);
    }

    pub fn width(&self) -> usize {
        self.x_max - self.x_min + 1
    }

    pub fn height(&self) -> usize {
        self.y_max - self.y_min + 1
    }

    /// Number of cells in the window.
    pub fn len(&self) -> usize {
        self.width() * self.height()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, cell: GridCell) -> bool {
        (self.x_min..=self.x_max).contains(&cell.x) && (self.y_min..=self.y_max).contains(&cell.y)
    }

    /// Columns of the forcing file covered by the window.
    pub fn columns(&self) -> Range<usize> {
        self.x_min..(self.x_max + 1)
    }

    /// Flat window-local index of a global cell.
    ///
    /// Window arrays are row-major `[window_y, window_x]` with row 0 at `y_min`.
    pub fn local_index(&self, cell: GridCell) -> Option<usize> {
        if !self.contains(cell) {
            return None;
        }
        Some((cell.y - self.y_min) * self.width() + (cell.x - self.x_min))
    }

    /// Global cell of a flat window-local index.
    pub fn global_cell(&self, local: usize) -> Option<GridCell> {
        if local >= self.len() {
            return None;
        }
        let width = self.width();
        Some(GridCell::new(
            self.x_min + local % width,
            self.y_min + local / width,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nwm_grid_size() {
        let grid = GridSpec::nwm_conus();
        assert_eq!(grid.len(), 3840 * 4608);
        assert_eq!(grid.index_order, IndexOrder::ColumnMajor);
        assert!(grid.flip_rows);
    }

    #[test]
    fn test_column_major_unravel() {
        let grid = GridSpec::new(4, 5, IndexOrder::ColumnMajor, false);
        // y varies fastest
        assert_eq!(grid.unravel(0).unwrap(), GridCell::new(0, 0));
        assert_eq!(grid.unravel(1).unwrap(), GridCell::new(0, 1));
        assert_eq!(grid.unravel(4).unwrap(), GridCell::new(1, 0));
        assert_eq!(grid.unravel(19).unwrap(), GridCell::new(4, 3));
    }

    #[test]
    fn test_row_major_unravel() {
        let grid = GridSpec::new(4, 5, IndexOrder::RowMajor, false);
        assert_eq!(grid.unravel(1).unwrap(), GridCell::new(1, 0));
        assert_eq!(grid.unravel(5).unwrap(), GridCell::new(0, 1));
        assert_eq!(grid.ravel(GridCell::new(4, 3)), 19);
    }

    #[test]
    fn test_unravel_out_of_range() {
        let grid = GridSpec::new(4, 4, IndexOrder::ColumnMajor, true);
        match grid.unravel(16) {
            Err(ForcingError::IndexRange { index, size }) => {
                assert_eq!(index, 16);
                assert_eq!(size, 16);
            }
            other => panic!("expected IndexRange, got {:?}", other),
        }
    }

    #[test]
    fn test_file_rows_flipped() {
        let grid = GridSpec::new(10, 10, IndexOrder::ColumnMajor, true);
        assert_eq!(grid.file_rows(3, 7), 2..7);
        assert_eq!(grid.file_rows(0, 9), 0..10);

        let grid = GridSpec::new(10, 10, IndexOrder::ColumnMajor, false);
        assert_eq!(grid.file_rows(3, 7), 3..8);
    }

    #[test]
    fn test_window_local_index() {
        let mut window = SpatialWindow::around(GridCell::new(2, 3));
        window.include(GridCell::new(5, 7));
        assert_eq!(window.width(), 4);
        assert_eq!(window.height(), 5);
        assert_eq!(window.local_index(GridCell::new(2, 3)), Some(0));
        assert_eq!(window.local_index(GridCell::new(5, 7)), Some(19));
        assert_eq!(window.local_index(GridCell::new(1, 3)), None);
        assert_eq!(window.global_cell(19), Some(GridCell::new(5, 7)));
        assert_eq!(window.global_cell(20), None);
    }
}

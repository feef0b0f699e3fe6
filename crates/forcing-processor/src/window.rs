//! Catchment window and window-local gather indices.

use forcing_common::{ForcingError, ForcingResult, GridSpec, SpatialWindow};
use serde::{Deserialize, Serialize};

use crate::weights::WeightTable;

/// Minimal bounding window of every cell referenced by `table`.
///
/// Fails with `IndexRange` when a cell index lies outside the grid, and with
/// `Configuration` when the table is empty.
pub fn compute_window(table: &WeightTable, grid: &GridSpec) -> ForcingResult<SpatialWindow> {
    let mut window: Option<SpatialWindow> = None;
    for (_, entry) in table.iter() {
        for &index in &entry.cells {
            let cell = grid.unravel(index)?;
            match window.as_mut() {
                Some(w) => w.include(cell),
                None => window = Some(SpatialWindow::around(cell)),
            }
        }
    }
    window.ok_or_else(|| ForcingError::Configuration("weight table is empty".to_string()))
}

/// Gather plan of one catchment inside the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchmentCells {
    /// Flat row-major indices into a `[window_y, window_x]` field
    pub local: Vec<usize>,
    pub fractions: Vec<f64>,
    pub total_fraction: f64,
}

/// Window-local indices of every catchment, computed once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchmentIndex {
    window: SpatialWindow,
    catchments: Vec<CatchmentCells>,
}

impl CatchmentIndex {
    pub fn build(table: &WeightTable, grid: &GridSpec, window: SpatialWindow) -> ForcingResult<Self> {
        let mut catchments = Vec::with_capacity(table.len());
        for (id, entry) in table.iter() {
            let mut local = Vec::with_capacity(entry.len());
            for &index in &entry.cells {
                let cell = grid.unravel(index)?;
                let i = window.local_index(cell).ok_or_else(|| {
                    ForcingError::InvalidData(format!(
                        "cell {} of '{}' lies outside window {:?}",
                        index, id, window
                    ))
                })?;
                local.push(i);
            }
            catchments.push(CatchmentCells {
                local,
                fractions: entry.fractions.clone(),
                total_fraction: entry.total_fraction(),
            });
        }
        Ok(Self { window, catchments })
    }

    pub fn window(&self) -> &SpatialWindow {
        &self.window
    }

    pub fn len(&self) -> usize {
        self.catchments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catchments.is_empty()
    }

    pub fn catchments(&self) -> &[CatchmentCells] {
        &self.catchments
    }
}

//! Common test fixtures: small grids and weight tables with known means.

use std::path::Path;

use forcing_common::{GridCell, GridSpec, IndexOrder};
use serde_json::{Map, Value};

use crate::generators::pattern_value;

/// Scratch directory for one test run, removed on drop.
pub fn temp_run_dir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("forcing-test-")
        .tempdir()
        .expect("Failed to create temporary test directory")
}

/// 4x4 grid, column-major indices, rows flipped like NWM files.
pub fn small_grid() -> GridSpec {
    GridSpec::new(4, 4, IndexOrder::ColumnMajor, true)
}

/// One catchment of a weight fixture, described by grid cells.
#[derive(Debug, Clone)]
pub struct CatchmentFixture {
    pub id: &'static str,
    pub cells: Vec<GridCell>,
    pub fractions: Vec<f64>,
}

impl CatchmentFixture {
    /// Flat cell indices of the catchment on `grid`.
    pub fn indices(&self, grid: &GridSpec) -> Vec<u64> {
        self.cells.iter().map(|c| grid.ravel(*c)).collect()
    }

    /// Coverage-weighted mean of [`pattern_value`] over the catchment cells.
    pub fn expected_mean(&self, var: usize, step: usize) -> f64 {
        let total: f64 = self.fractions.iter().sum();
        let weighted: f64 = self
            .cells
            .iter()
            .zip(&self.fractions)
            .map(|(cell, frac)| pattern_value(var, *cell, step) as f64 * frac)
            .sum();
        weighted / total
    }
}

/// Two catchments, each covering two cells with fractions summing to 1.0.
pub fn two_catchments() -> Vec<CatchmentFixture> {
    vec![
        CatchmentFixture {
            id: "cat-1",
            cells: vec![GridCell::new(1, 1), GridCell::new(2, 1)],
            fractions: vec![0.25, 0.75],
        },
        CatchmentFixture {
            id: "cat-2",
            cells: vec![GridCell::new(0, 3), GridCell::new(3, 0)],
            fractions: vec![0.5, 0.5],
        },
    ]
}

/// Weight JSON `{id: [[cells], [fractions]]}` for the fixtures.
pub fn weights_json(grid: &GridSpec, catchments: &[CatchmentFixture]) -> String {
    let mut map = Map::new();
    for c in catchments {
        map.insert(
            c.id.to_string(),
            Value::Array(vec![
                Value::from(c.indices(grid)),
                Value::from(c.fractions.clone()),
            ]),
        );
    }
    Value::Object(map).to_string()
}

/// Write the fixtures as a JSON weight file.
pub fn write_weights_json(
    path: &Path,
    grid: &GridSpec,
    catchments: &[CatchmentFixture],
) -> std::io::Result<()> {
    std::fs::write(path, weights_json(grid, catchments))
}

/// Write the fixtures as a `divide_id,cell,coverage_fraction` CSV.
pub fn write_weights_csv(
    path: &Path,
    grid: &GridSpec,
    catchments: &[CatchmentFixture],
) -> std::io::Result<()> {
    let mut body = String::from("divide_id,cell,coverage_fraction\n");
    for c in catchments {
        for (index, frac) in c.indices(grid).iter().zip(&c.fractions) {
            body.push_str(&format!("{},{},{}\n", c.id, index, frac));
        }
    }
    std::fs::write(path, body)
}

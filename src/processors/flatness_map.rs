//! Binning of per-point values onto the detected sampling lattice.

use log::debug;
use serde::Serialize;

use super::grid::GridResult;

/// Which per-point quantity a map holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MapValue {
    /// Signed distance from the fitted plane.
    Residual,
    /// Raw measured Z.
    Height,
}

/// Mean value per lattice cell.
///
/// Cells are stored row-major by X: index `iy * nx + ix`. A cell that
/// received no samples holds `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatnessMap {
    pub nx: usize,
    pub ny: usize,
    pub x_min: f64,
    pub y_min: f64,
    pub dx: f64,
    pub dy: f64,
    pub source: MapValue,
    cells: Vec<Option<f64>>,
    counts: Vec<usize>,
    /// Samples whose nearest cell lay outside the lattice.
    pub outside: usize,
}

impl FlatnessMap {
    /// Mean value of cell (ix, iy), or `None` if unset or out of range.
    #[inline]
    pub fn get(&self, ix: usize, iy: usize) -> Option<f64> {
        if ix >= self.nx || iy >= self.ny {
            return None;
        }
        self.cells[iy * self.nx + ix]
    }

    /// Number of samples averaged into cell (ix, iy).
    #[inline]
    pub fn count(&self, ix: usize, iy: usize) -> usize {
        if ix >= self.nx || iy >= self.ny {
            return 0;
        }
        self.counts[iy * self.nx + ix]
    }

    /// Physical coordinates of the centre of cell (ix, iy).
    #[inline]
    pub fn cell_center(&self, ix: usize, iy: usize) -> (f64, f64) {
        (self.x_min + ix as f64 * self.dx, self.y_min + iy as f64 * self.dy)
    }

    /// Iterates over all cells as `(ix, iy, value)`, X fastest.
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize, Option<f64>)> + '_ {
        self.cells
            .iter()
            .enumerate()
            .map(move |(k, &v)| (k % self.nx, k / self.nx, v))
    }

    /// Number of cells holding a value.
    pub fn filled(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    /// Smallest and largest cell mean, or `None` if every cell is unset.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        self.cells.iter().flatten().fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }
}

/// Lattice cell of a coordinate, or `None` if it rounds outside `0..n`.
#[inline]
fn cell_index(v: f64, min: f64, step: f64, n: usize) -> Option<usize> {
    let idx = ((v - min) / step).round();
    if idx >= 0.0 && (idx as usize) < n {
        Some(idx as usize)
    } else {
        None
    }
}

/// Build the mean-per-cell map of `values` sampled at `xy`.
///
/// Returns `None` (map unavailable) unless both grid axes are regular.
/// Samples sharing a cell are averaged.
///
/// # Panics
///
/// Panics if `xy` and `values` differ in length.
pub fn build_flatness_map(
    grid: &GridResult,
    xy: &[(f64, f64)],
    values: &[f64],
    source: MapValue,
) -> Option<FlatnessMap> {
    assert_eq!(xy.len(), values.len(), "one value per sample");

    if !grid.is_regular() || grid.nx == 0 || grid.ny == 0 {
        debug!("flatness map unavailable: grid is not regular on both axes");
        return None;
    }

    let (nx, ny) = (grid.nx, grid.ny);
    let mut sums = vec![0.0; nx * ny];
    let mut counts = vec![0usize; nx * ny];
    let mut outside = 0;

    for (&(x, y), &v) in xy.iter().zip(values) {
        match (
            cell_index(x, grid.x_min, grid.dx, nx),
            cell_index(y, grid.y_min, grid.dy, ny),
        ) {
            (Some(ix), Some(iy)) => {
                sums[iy * nx + ix] += v;
                counts[iy * nx + ix] += 1;
            }
            _ => outside += 1,
        }
    }

    if outside > 0 {
        debug!("{} samples fell outside the {}x{} lattice", outside, nx, ny);
    }

    let cells = sums
        .iter()
        .zip(&counts)
        .map(|(&s, &c)| if c > 0 { Some(s / c as f64) } else { None })
        .collect();

    Some(FlatnessMap {
        nx,
        ny,
        x_min: grid.x_min,
        y_min: grid.y_min,
        dx: grid.dx,
        dy: grid.dy,
        source,
        cells,
        counts,
        outside,
    })
}

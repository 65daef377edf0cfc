//! Detection of regular rectangular sampling grids.
//!
//! Metrology machines usually measure a plate on an Nx×Ny lattice. This module
//! decides, per axis, whether a cloud of (X, Y) samples sits on such a
//! lattice, estimates the step, and counts lattice intersections that were
//! never measured.
//!
//! # Example
//!
//! ```
//! use flatness_scan::config::GridConfig;
//! use flatness_scan::processors::grid::analyze_grid;
//!
//! let xy = [(10.0, 10.0), (10.0, 30.0), (40.0, 10.0), (40.0, 30.0)];
//! let grid = analyze_grid(&xy, &GridConfig::default());
//!
//! assert!(grid.is_regular());
//! assert_eq!((grid.nx, grid.ny), (2, 2));
//! ```

use std::collections::HashMap;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::GridConfig;

/// Minimum number of samples for any grid analysis.
pub const MIN_GRID_POINTS: usize = 4;

/// Structure of the sampling lattice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GridResult {
    pub regular_x: bool,
    pub regular_y: bool,
    /// Mean step along X.
    pub dx: f64,
    /// Mean step along Y.
    pub dy: f64,
    /// Grid positions along X, derived from span and step.
    pub nx: usize,
    /// Grid positions along Y, derived from span and step.
    pub ny: usize,
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    /// Lattice intersections with no sample nearby.
    pub missing_points: usize,
    /// Distinct X values after merging near-duplicates.
    pub merged_x: usize,
    /// Distinct Y values after merging near-duplicates.
    pub merged_y: usize,
}

impl GridResult {
    /// True if both axes are regular.
    #[inline]
    pub fn is_regular(&self) -> bool {
        self.regular_x && self.regular_y
    }

    /// Number of lattice intersections, Nx·Ny.
    #[inline]
    pub fn intersections(&self) -> usize {
        self.nx.saturating_mul(self.ny)
    }
}

/// One axis of the lattice: merged coordinate values and their spacing.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct GridAxis {
    /// Sorted canonical grid lines.
    pub values: Vec<f64>,
    /// Mean consecutive step.
    pub step: f64,
    /// Mean absolute deviation of the steps from `step`.
    pub spread: f64,
    pub regular: bool,
}

impl GridAxis {
    /// Build an axis from raw coordinates.
    ///
    /// Returns `None` when fewer than two distinct lines survive merging.
    pub fn from_coords(mut coords: Vec<f64>, config: &GridConfig) -> Option<Self> {
        coords.sort_by(f64::total_cmp);

        let rough_step = mean_step(&coords);
        let values = merge_close(&coords, rough_step.abs() * config.merge_step_fraction);
        if values.len() < 2 {
            return None;
        }

        let (step, spread) = spacing_stats(&values);
        if step <= 0.0 {
            return None;
        }

        Some(Self {
            regular: spread / step < config.tolerance_fraction,
            values,
            step,
            spread,
        })
    }

    #[inline]
    pub fn min(&self) -> f64 {
        self.values[0]
    }

    #[inline]
    pub fn max(&self) -> f64 {
        self.values[self.values.len() - 1]
    }

    /// Grid positions implied by the physical span and the mean step.
    pub fn span_count(&self) -> usize {
        ((self.max() - self.min()) / self.step).round() as usize + 1
    }
}

/// Mean of consecutive differences of sorted values; 0 for fewer than two.
fn mean_step(sorted: &[f64]) -> f64 {
    if sorted.len() < 2 {
        return 0.0;
    }
    let total: f64 = sorted.windows(2).map(|w| w[1] - w[0]).sum();
    total / (sorted.len() - 1) as f64
}

/// Collapse sorted values closer than `eps` to the last kept value.
fn merge_close(sorted: &[f64], eps: f64) -> Vec<f64> {
    let mut merged: Vec<f64> = Vec::new();
    for &v in sorted {
        match merged.last() {
            Some(&last) if (v - last).abs() <= eps => {}
            _ => merged.push(v),
        }
    }
    merged
}

/// Mean step and mean absolute deviation of steps, for at least two values.
fn spacing_stats(values: &[f64]) -> (f64, f64) {
    let steps: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
    let mean = steps.iter().sum::<f64>() / steps.len() as f64;
    let spread = steps.iter().map(|d| (d - mean).abs()).sum::<f64>() / steps.len() as f64;
    (mean, spread)
}

/// Largest bucket coordinate magnitude the presence index accepts. Quotients
/// below this are exact to far better than a quarter bucket, so neighbouring
/// buckets stay adjacent after rounding.
const MAX_BUCKET_COORD: f64 = (1u64 << 50) as f64;

/// Spatial hash of sample positions on a `2·eps`-sized bucket grid.
///
/// A sample within `eps` of a query on both axes lies less than half a bucket
/// away, so it is always in one of the 3×3 buckets around the query's bucket.
struct PresenceIndex<'a> {
    points: &'a [(f64, f64)],
    eps: f64,
    buckets: HashMap<(i64, i64), Vec<usize>>,
}

impl<'a> PresenceIndex<'a> {
    /// Builds the index, or `None` if some coordinate is too large (or not
    /// finite) to bucket exactly at this `eps`.
    fn new(points: &'a [(f64, f64)], eps: f64) -> Option<Self> {
        let width = 2.0 * eps;
        if !points.iter().all(|&(x, y)| hashable(x, width) && hashable(y, width)) {
            return None;
        }

        let mut buckets: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        for (i, &(x, y)) in points.iter().enumerate() {
            buckets
                .entry((bucket(x, width), bucket(y, width)))
                .or_default()
                .push(i);
        }
        Some(Self {
            points,
            eps,
            buckets,
        })
    }

    /// True if some sample lies strictly within `eps` of (x, y) on both axes.
    ///
    /// The query must itself be hashable (see [`hashable`]).
    fn contains_near(&self, x: f64, y: f64) -> bool {
        let width = 2.0 * self.eps;
        let (bx, by) = (bucket(x, width), bucket(y, width));
        for ix in bx - 1..=bx + 1 {
            for iy in by - 1..=by + 1 {
                let Some(indices) = self.buckets.get(&(ix, iy)) else {
                    continue;
                };
                let hit = indices.iter().any(|&i| {
                    let (px, py) = self.points[i];
                    (px - x).abs() < self.eps && (py - y).abs() < self.eps
                });
                if hit {
                    return true;
                }
            }
        }
        false
    }
}

#[inline]
fn hashable(v: f64, width: f64) -> bool {
    (v / width).abs() < MAX_BUCKET_COORD
}

#[inline]
fn bucket(v: f64, width: f64) -> i64 {
    (v / width).floor() as i64
}

/// Count lattice intersections (every merged X × every merged Y) with no
/// sample strictly within `eps` on both axes.
///
/// Uses the hashed index when every coordinate can be bucketed exactly and
/// the direct scan otherwise; both give the same count.
fn count_missing(points: &[(f64, f64)], xs: &[f64], ys: &[f64], eps: f64) -> usize {
    if eps.is_nan() || eps <= 0.0 {
        return xs.len() * ys.len();
    }
    let width = 2.0 * eps;
    let lattice_hashable = xs.iter().chain(ys).all(|&v| hashable(v, width));
    let index = match PresenceIndex::new(points, eps) {
        Some(index) if lattice_hashable => index,
        _ => {
            debug!("coordinates too large to bucket at eps {}; scanning directly", eps);
            return count_missing_direct(points, xs, ys, eps);
        }
    };
    xs.iter()
        .flat_map(|&x| ys.iter().map(move |&y| (x, y)))
        .filter(|&(x, y)| !index.contains_near(x, y))
        .count()
}

/// O(Nx·Ny·N) form of [`count_missing`].
fn count_missing_direct(points: &[(f64, f64)], xs: &[f64], ys: &[f64], eps: f64) -> usize {
    xs.iter()
        .flat_map(|&x| ys.iter().map(move |&y| (x, y)))
        .filter(|&(x, y)| {
            !points
                .iter()
                .any(|p| (p.0 - x).abs() < eps && (p.1 - y).abs() < eps)
        })
        .count()
}

/// Analyze whether (X, Y) samples form a regular rectangular grid.
///
/// Pure function of its inputs. With fewer than [`MIN_GRID_POINTS`] samples
/// the default (not regular, all zero) result is returned. An axis whose
/// values collapse to a single line is reported as not regular with zero
/// step and count, and missing-point detection is skipped; the other axis is
/// still evaluated.
///
/// `nx`/`ny` come from `round(span / step) + 1`; the merged line counts are
/// reported alongside in `merged_x`/`merged_y`.
pub fn analyze_grid(points: &[(f64, f64)], config: &GridConfig) -> GridResult {
    let mut result = GridResult::default();
    if points.len() < MIN_GRID_POINTS {
        debug!("grid analysis skipped: only {} points", points.len());
        return result;
    }

    let x_axis = GridAxis::from_coords(points.iter().map(|p| p.0).collect(), config);
    let y_axis = GridAxis::from_coords(points.iter().map(|p| p.1).collect(), config);

    if let Some(axis) = &x_axis {
        result.regular_x = axis.regular;
        result.dx = axis.step;
        result.nx = axis.span_count();
        result.x_min = axis.min();
        result.x_max = axis.max();
        result.merged_x = axis.values.len();
        debug!(
            "X axis: {} lines, step {:.4}, spread {:.4}, regular {}",
            axis.values.len(),
            axis.step,
            axis.spread,
            axis.regular
        );
    }
    if let Some(axis) = &y_axis {
        result.regular_y = axis.regular;
        result.dy = axis.step;
        result.ny = axis.span_count();
        result.y_min = axis.min();
        result.y_max = axis.max();
        result.merged_y = axis.values.len();
        debug!(
            "Y axis: {} lines, step {:.4}, spread {:.4}, regular {}",
            axis.values.len(),
            axis.step,
            axis.spread,
            axis.regular
        );
    }

    let (Some(x_axis), Some(y_axis)) = (x_axis, y_axis) else {
        return result;
    };

    if result.nx != result.merged_x || result.ny != result.merged_y {
        warn!(
            "grid size from span/step is {}x{} but {}x{} distinct lines were found",
            result.nx, result.ny, result.merged_x, result.merged_y
        );
    }

    let eps = x_axis.step.min(y_axis.step) * config.presence_epsilon_fraction;
    result.missing_points = count_missing(points, &x_axis.values, &y_axis.values, eps);

    result
}

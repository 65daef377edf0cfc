//! One complete flatness analysis run: fit, grid detection and map.

use std::path::{Path, PathBuf};

use log::info;
use serde::Serialize;

use crate::config::FlatnessConfig;
use crate::core::histogram::Histogram;
use crate::core::loaders::{PointSet, X_COLUMN, Y_COLUMN, Z_COLUMN};

use super::flatness_map::{build_flatness_map, FlatnessMap, MapValue};
use super::grid::{analyze_grid, GridResult};
use super::minimizer::Minimizer;
use super::plane_fit::{fit_plane, FitError, PlaneFit};

/// Everything computed from one point set.
#[derive(Debug, Clone)]
pub struct FlatnessAnalysis {
    pub fit: PlaneFit,
    pub grid: GridResult,
    /// Present only when the samples lie on a regular grid.
    pub map: Option<FlatnessMap>,
}

/// Run the plane fit, the grid analysis and, when possible, the map build.
///
/// `map_source` selects whether the map bins residuals or raw heights.
///
/// # Errors
///
/// Returns the plane-fit error if the point set cannot be fitted. Grid and
/// map degeneracies are reported through [`GridResult`] flags and a `None`
/// map instead.
pub fn analyze<M: Minimizer + ?Sized>(
    points: &PointSet,
    config: &FlatnessConfig,
    minimizer: &M,
    map_source: MapValue,
) -> Result<FlatnessAnalysis, FitError> {
    let fit = fit_plane(points, &config.fit, minimizer)?;
    info!(
        "Plane fit: chi2={:.3e} sigma={:.4} {} converged={}",
        fit.plane.min_chi2,
        fit.sigma_scaled(config.output.unit_scale),
        config.output.unit_label,
        fit.plane.converged
    );

    let xy = points.xy();
    let grid = analyze_grid(&xy, &config.grid);
    info!(
        "Grid: {}x{} dx={:.4} dy={:.4} regular=({}, {}) missing={}",
        grid.nx, grid.ny, grid.dx, grid.dy, grid.regular_x, grid.regular_y, grid.missing_points
    );

    let map = match map_source {
        MapValue::Residual => build_flatness_map(&grid, &xy, &fit.residuals, map_source),
        MapValue::Height => build_flatness_map(&grid, &xy, &points.column(Z_COLUMN), map_source),
    };

    Ok(FlatnessAnalysis { fit, grid, map })
}

/// Histograms of X, Y, Z and of the deviations from the fitted plane.
pub fn build_histograms(points: &PointSet, fit: &PlaneFit, bin_width: f64) -> Vec<Histogram> {
    vec![
        Histogram::auto_range("x", &points.column(X_COLUMN), bin_width),
        Histogram::auto_range("y", &points.column(Y_COLUMN), bin_width),
        Histogram::auto_range("z", &points.column(Z_COLUMN), bin_width),
        Histogram::auto_range("deviations", &fit.residuals, bin_width),
    ]
}

/// Serializable summary of a run.
#[derive(Debug, Clone, Serialize)]
pub struct FlatnessReport {
    pub input: PathBuf,
    pub points: usize,
    pub fit: PlaneFit,
    /// |a| of the fitted plane.
    pub modulus: f64,
    /// Plane distance from the origin, 1/|a| (input units).
    pub origin_distance: f64,
    /// Aggregate flatness in reporting units.
    pub sigma_scaled: f64,
    pub unit_label: String,
    pub grid: GridResult,
    pub map_available: bool,
    pub map_source: Option<MapValue>,
    pub map_filled_cells: usize,
}

impl FlatnessReport {
    pub fn new(input: &Path, points: usize, analysis: &FlatnessAnalysis, config: &FlatnessConfig) -> Self {
        Self {
            input: input.to_path_buf(),
            points,
            fit: analysis.fit.clone(),
            modulus: analysis.fit.plane.modulus(),
            origin_distance: analysis.fit.plane.origin_distance(),
            sigma_scaled: analysis.fit.sigma_scaled(config.output.unit_scale),
            unit_label: config.output.unit_label.clone(),
            grid: analysis.grid,
            map_available: analysis.map.is_some(),
            map_source: analysis.map.as_ref().map(|m| m.source),
            map_filled_cells: analysis.map.as_ref().map_or(0, |m| m.filled()),
        }
    }
}

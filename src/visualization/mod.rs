//! Visualization of flatness results.
//!
//! This module renders PNG images with the plotters library: histogram bar
//! charts, an X/Y scatter of the sampled positions and a heat map of the
//! flatness map. No text is drawn since the bitmap backend has no fonts.

use std::path::Path;

use plotters::prelude::*;
use plotters_bitmap::BitMapBackend;
use thiserror::Error;

use crate::core::histogram::Histogram;
use crate::processors::flatness_map::FlatnessMap;

/// Errors that can occur during visualization.
#[derive(Error, Debug)]
pub enum VisualizationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Plotting error: {0}")]
    PlottingError(String),

    #[error("Nothing to plot")]
    EmptyData,
}

/// Result type for visualization operations.
pub type Result<T> = std::result::Result<T, VisualizationError>;

/// Default plot width in pixels.
const DEFAULT_WIDTH: u32 = 1280;

/// Default plot height in pixels.
const DEFAULT_HEIGHT: u32 = 960;

/// Bar fill for histograms.
const BAR_COLOR: RGBColor = RGBColor(55, 126, 184);

/// Marker fill for the scatter plot.
const POINT_COLOR: RGBColor = RGBColor(100, 149, 237);

/// Background of heat-map cells without samples.
const UNSET_COLOR: RGBColor = RGBColor(235, 235, 235);

fn plotting_error<E: std::fmt::Display>(e: E) -> VisualizationError {
    VisualizationError::PlottingError(e.to_string())
}

/// Plot the occupied bins of a histogram as a bar chart.
pub fn plot_histogram(output_path: &Path, hist: &Histogram) -> Result<()> {
    let bars: Vec<(f64, f64, u64)> = hist.occupied().collect();
    if bars.is_empty() {
        return Err(VisualizationError::EmptyData);
    }

    // Zoom on the occupied part; the auto range carries wide margins.
    let x_min = bars.first().map_or(hist.low, |b| b.0);
    let x_max = bars.last().map_or(hist.high, |b| b.1);
    let pad = (x_max - x_min) * 0.05;
    let y_max = bars.iter().map(|b| b.2).max().unwrap_or(1) as f64 * 1.05;

    let root = BitMapBackend::new(output_path, (DEFAULT_WIDTH, DEFAULT_HEIGHT)).into_drawing_area();
    root.fill(&WHITE).map_err(plotting_error)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .build_cartesian_2d((x_min - pad)..(x_max + pad), 0.0..y_max)
        .map_err(plotting_error)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .disable_y_mesh()
        .x_labels(0)
        .y_labels(0)
        .draw()
        .map_err(plotting_error)?;

    chart
        .draw_series(
            bars.iter()
                .map(|&(lo, hi, count)| Rectangle::new([(lo, 0.0), (hi, count as f64)], BAR_COLOR.filled())),
        )
        .map_err(plotting_error)?;

    root.present().map_err(plotting_error)?;

    Ok(())
}

/// Plot a 2D scatter plot (x vs y) of the sampled positions.
///
/// Subsamples to at most `max_points` markers.
pub fn plot_xy_scatter(output_path: &Path, xy: &[(f64, f64)], max_points: usize) -> Result<()> {
    if xy.is_empty() {
        return Err(VisualizationError::EmptyData);
    }

    let n = xy.len();
    let step = if n > max_points { n / max_points.max(1) } else { 1 };

    let (x_min, x_max, y_min, y_max) = compute_bounds(xy);
    let x_padding = (x_max - x_min) * 0.05;
    let y_padding = (y_max - y_min) * 0.05;

    let root = BitMapBackend::new(output_path, (DEFAULT_WIDTH, DEFAULT_HEIGHT)).into_drawing_area();
    root.fill(&WHITE).map_err(plotting_error)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .build_cartesian_2d(
            (x_min - x_padding)..(x_max + x_padding),
            (y_min - y_padding)..(y_max + y_padding),
        )
        .map_err(plotting_error)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .disable_y_mesh()
        .x_labels(0)
        .y_labels(0)
        .draw()
        .map_err(plotting_error)?;

    chart
        .draw_series(
            xy.iter()
                .step_by(step)
                .map(|&(x, y)| Circle::new((x, y), 3, POINT_COLOR.filled())),
        )
        .map_err(plotting_error)?;

    root.present().map_err(plotting_error)?;

    Ok(())
}

/// Plot the flatness map as a heat map, blue (low) to red (high).
///
/// Cells without samples are drawn in light gray.
pub fn plot_flatness_map(output_path: &Path, map: &FlatnessMap) -> Result<()> {
    let (lo, hi) = map.value_range().ok_or(VisualizationError::EmptyData)?;
    let span = if hi > lo { hi - lo } else { 1.0 };

    let root = BitMapBackend::new(output_path, (DEFAULT_WIDTH, DEFAULT_HEIGHT)).into_drawing_area();
    root.fill(&WHITE).map_err(plotting_error)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .build_cartesian_2d(0..map.nx as i32, 0..map.ny as i32)
        .map_err(plotting_error)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .disable_y_mesh()
        .x_labels(0)
        .y_labels(0)
        .draw()
        .map_err(plotting_error)?;

    chart
        .draw_series(map.cells().map(|(ix, iy, value)| {
            let color = match value {
                Some(v) => heat_color((v - lo) / span),
                None => UNSET_COLOR,
            };
            let (x, y) = (ix as i32, iy as i32);
            Rectangle::new([(x, y), (x + 1, y + 1)], color.filled())
        }))
        .map_err(plotting_error)?;

    root.present().map_err(plotting_error)?;

    Ok(())
}

/// Linear blue-white-red ramp for `t` in [0, 1].
fn heat_color(t: f64) -> RGBColor {
    let t = t.clamp(0.0, 1.0);
    if t < 0.5 {
        let s = t * 2.0;
        RGBColor((255.0 * s) as u8, (255.0 * s) as u8, 255)
    } else {
        let s = (1.0 - t) * 2.0;
        RGBColor(255, (255.0 * s) as u8, (255.0 * s) as u8)
    }
}

/// Compute the bounds (min/max) for x and y coordinates.
fn compute_bounds(points: &[(f64, f64)]) -> (f64, f64, f64, f64) {
    let mut x_min = f64::MAX;
    let mut x_max = f64::MIN;
    let mut y_min = f64::MAX;
    let mut y_max = f64::MIN;

    for &(x, y) in points {
        x_min = x_min.min(x);
        x_max = x_max.max(x);
        y_min = y_min.min(y);
        y_max = y_max.max(y);
    }

    if (x_max - x_min).abs() < f64::EPSILON {
        x_min -= 1.0;
        x_max += 1.0;
    }
    if (y_max - y_min).abs() < f64::EPSILON {
        y_min -= 1.0;
        y_max += 1.0;
    }

    (x_min, x_max, y_min, y_max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heat_color_ends() {
        assert_eq!(heat_color(0.0), RGBColor(0, 0, 255));
        assert_eq!(heat_color(1.0), RGBColor(255, 0, 0));
        assert_eq!(heat_color(0.5), RGBColor(255, 255, 255));
        assert_eq!(heat_color(-3.0), heat_color(0.0));
    }

    #[test]
    fn test_compute_bounds_degenerate() {
        let (x0, x1, y0, y1) = compute_bounds(&[(2.0, 5.0), (2.0, 7.0)]);
        assert_eq!((x0, x1), (1.0, 3.0));
        assert_eq!((y0, y1), (5.0, 7.0));
    }

    #[test]
    fn test_empty_inputs_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.png");

        let hist = Histogram::new("empty", 4, 0.0, 1.0);
        assert!(matches!(plot_histogram(&path, &hist), Err(VisualizationError::EmptyData)));
        assert!(matches!(plot_xy_scatter(&path, &[], 100), Err(VisualizationError::EmptyData)));
        assert!(!path.exists());
    }
}

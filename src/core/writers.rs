//! Writers for analysis results.
//!
//! This module provides functions for persisting a flatness run:
//! - CSV residual table, one row per input point
//! - CSV flatness map, one row per lattice cell
//! - CSV histogram table, occupied bins only
//! - YAML run summary

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use super::histogram::Histogram;
use super::loaders::PointSet;
use crate::processors::flatness_map::FlatnessMap;

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV writing error.
    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },

    /// YAML serialization error.
    #[error("YAML write error for '{path}': {source}")]
    YamlError {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// Mismatched array lengths.
    #[error("length mismatch: {points} points but {residuals} residuals")]
    LengthMismatch { points: usize, residuals: usize },
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Creates a CSV writer on a fresh file, creating parent directories first.
fn create_csv_writer(path: &Path) -> Result<csv::Writer<BufWriter<File>>> {
    ensure_parent_dirs(path)?;
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(csv::Writer::from_writer(BufWriter::new(file)))
}

fn finish_csv(mut writer: csv::Writer<BufWriter<File>>, path: &Path) -> Result<()> {
    writer.flush().map_err(|e| WriteError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })
}

/// Write the per-point residual table.
///
/// Creates a CSV file with headers "index,x,y,z,residual" in input order.
/// `index` is the first input column, which is the point index for
/// four-column scans.
///
/// # Errors
///
/// Returns an error if:
/// - `points` lacks X, Y, Z columns or its length differs from `residuals`
/// - Parent directories cannot be created
/// - File cannot be created or written to
///
/// # Example
///
/// ```no_run
/// use flatness_scan::core::loaders::PointSet;
/// use flatness_scan::core::writers::write_residuals_csv;
/// use std::path::Path;
///
/// let points = PointSet::from_xyz(&[[0.0, 0.0, 0.01]]);
/// write_residuals_csv(Path::new("residuals.csv"), &points, &[0.01]).unwrap();
/// ```
pub fn write_residuals_csv(path: &Path, points: &PointSet, residuals: &[f64]) -> Result<()> {
    if !points.has_xyz() || points.len() != residuals.len() {
        return Err(WriteError::LengthMismatch {
            points: points.len(),
            residuals: residuals.len(),
        });
    }

    let mut csv_writer = create_csv_writer(path)?;
    let path_str = path.display().to_string();

    csv_writer
        .write_record(["index", "x", "y", "z", "residual"])
        .map_err(|e| WriteError::CsvError {
            path: path_str.clone(),
            source: e,
        })?;

    for (i, residual) in residuals.iter().enumerate() {
        let [x, y, z] = points.xyz(i);
        let index = points.point(i)[0];
        csv_writer
            .write_record(&[
                format!("{}", index),
                format!("{:.6}", x),
                format!("{:.6}", y),
                format!("{:.6}", z),
                format!("{:.9}", residual),
            ])
            .map_err(|e| WriteError::CsvError {
                path: path_str.clone(),
                source: e,
            })?;
    }

    finish_csv(csv_writer, path)
}

/// Write a flatness map, one row per cell.
///
/// Headers are "ix,iy,x,y,mean,count"; `mean` is left empty for cells that
/// received no samples.
pub fn write_flatness_map_csv(path: &Path, map: &FlatnessMap) -> Result<()> {
    let mut csv_writer = create_csv_writer(path)?;
    let path_str = path.display().to_string();

    csv_writer
        .write_record(["ix", "iy", "x", "y", "mean", "count"])
        .map_err(|e| WriteError::CsvError {
            path: path_str.clone(),
            source: e,
        })?;

    for (ix, iy, value) in map.cells() {
        let (x, y) = map.cell_center(ix, iy);
        csv_writer
            .write_record(&[
                ix.to_string(),
                iy.to_string(),
                format!("{:.6}", x),
                format!("{:.6}", y),
                value.map(|v| format!("{:.9}", v)).unwrap_or_default(),
                map.count(ix, iy).to_string(),
            ])
            .map_err(|e| WriteError::CsvError {
                path: path_str.clone(),
                source: e,
            })?;
    }

    finish_csv(csv_writer, path)
}

/// Write the occupied bins of several histograms to one table.
///
/// Headers are "name,bin_low,bin_high,count".
pub fn write_histograms_csv(path: &Path, histograms: &[Histogram]) -> Result<()> {
    let mut csv_writer = create_csv_writer(path)?;
    let path_str = path.display().to_string();

    csv_writer
        .write_record(["name", "bin_low", "bin_high", "count"])
        .map_err(|e| WriteError::CsvError {
            path: path_str.clone(),
            source: e,
        })?;

    for hist in histograms {
        for (lo, hi, count) in hist.occupied() {
            csv_writer
                .write_record(&[
                    hist.name.clone(),
                    format!("{:.6}", lo),
                    format!("{:.6}", hi),
                    count.to_string(),
                ])
                .map_err(|e| WriteError::CsvError {
                    path: path_str.clone(),
                    source: e,
                })?;
        }
    }

    finish_csv(csv_writer, path)
}

/// Serialize any summary value to a YAML file.
pub fn write_summary_yaml<T: Serialize>(path: &Path, summary: &T) -> Result<()> {
    let path_str = path.display().to_string();
    let yaml = serde_yaml::to_string(summary).map_err(|e| WriteError::YamlError {
        path: path_str.clone(),
        source: e,
    })?;

    ensure_parent_dirs(path)?;
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path_str.clone(),
        source: e,
    })?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(yaml.as_bytes())
        .and_then(|_| writer.flush())
        .map_err(|e| WriteError::WriteFile {
            path: path_str,
            source: e,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::flatness_map::{build_flatness_map, MapValue};
    use crate::processors::grid::GridResult;
    use std::fs;
    use tempfile::tempdir;

    fn create_test_points() -> PointSet {
        PointSet::from_xyz(&[[0.0, 0.0, 0.1], [1.0, 0.0, 0.2], [0.0, 1.0, 0.3]])
    }

    fn create_test_map() -> FlatnessMap {
        let grid = GridResult {
            regular_x: true,
            regular_y: true,
            dx: 1.0,
            dy: 1.0,
            nx: 2,
            ny: 2,
            x_max: 1.0,
            y_max: 1.0,
            merged_x: 2,
            merged_y: 2,
            ..GridResult::default()
        };
        build_flatness_map(
            &grid,
            &[(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)],
            &[0.5, -0.5, 0.25],
            MapValue::Residual,
        )
        .unwrap()
    }

    #[test]
    fn test_write_residuals_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("residuals.csv");

        write_residuals_csv(&path, &create_test_points(), &[0.01, -0.02, 0.0]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(lines[0], "index,x,y,z,residual");
        assert_eq!(lines.len(), 4); // header + 3 data rows
        assert!(lines[1].starts_with("0,0.000000,0.000000,0.100000,"));
        assert!(lines[2].starts_with("1,1.000000,"));
        assert!(lines[2].ends_with("-0.020000000"));
    }

    #[test]
    fn test_write_residuals_length_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("residuals.csv");

        let result = write_residuals_csv(&path, &create_test_points(), &[0.0]);

        match result.unwrap_err() {
            WriteError::LengthMismatch { points, residuals } => {
                assert_eq!(points, 3);
                assert_eq!(residuals, 1);
            }
            _ => panic!("Expected LengthMismatch error"),
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_write_flatness_map_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("map.csv");

        write_flatness_map_csv(&path, &create_test_map()).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(lines[0], "ix,iy,x,y,mean,count");
        assert_eq!(lines.len(), 5); // header + 4 cells
        assert_eq!(lines[1], "0,0,0.000000,0.000000,0.500000000,1");
        // (1, 1) received no samples
        assert_eq!(lines[4], "1,1,1.000000,1.000000,,0");
    }

    #[test]
    fn test_write_histograms_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hist.csv");
        let mut a = Histogram::new("z", 4, 0.0, 4.0);
        a.fill_all(&[0.5, 0.6, 2.5]);
        let mut b = Histogram::new("deviations", 2, -1.0, 1.0);
        b.fill(0.1);

        write_histograms_csv(&path, &[a, b]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(lines[0], "name,bin_low,bin_high,count");
        assert_eq!(lines.len(), 4); // header + 3 occupied bins
        assert_eq!(lines[1], "z,0.000000,1.000000,2");
        assert!(lines[3].starts_with("deviations,0.000000,"));
    }

    #[test]
    fn test_write_summary_yaml_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("summary.yaml");

        write_summary_yaml(&path, &GridResult::default()).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("regular_x: false"));
        let back: GridResult = serde_yaml::from_str(&content).unwrap();
        assert_eq!(back, GridResult::default());
    }
}

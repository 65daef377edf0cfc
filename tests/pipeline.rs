use std::fs;
use std::io::Write;
use std::path::Path;

use flatness_scan::core::loaders::read_points;
use flatness_scan::core::writers::{
    write_flatness_map_csv, write_histograms_csv, write_residuals_csv, write_summary_yaml,
};
use flatness_scan::processors::{analyze, build_histograms, FlatnessReport, MapValue, NelderMead};
use flatness_scan::FlatnessConfig;
use tempfile::tempdir;

/// Writes a tilted 10 x 6 plate sampled every 20 x 12 mm, with two interior
/// samples left out. A Latin-1 header, a truncated line and an overflowing
/// value are mixed in; all three must be skipped.
fn write_plate(path: &Path) {
    let mut file = fs::File::create(path).unwrap();
    file.write_all(b"index,x [\xb5m],y [\xb5m],z [\xb5m]\n").unwrap();
    writeln!(file, "98 70 -18 1e400").unwrap();
    let mut index = 0;
    for i in 0..10 {
        for j in 0..6 {
            if (i, j) == (4, 2) || (i, j) == (6, 3) {
                continue;
            }
            let x = 50.0 + i as f64 * 20.0;
            let y = -30.0 + j as f64 * 12.0;
            let ripple = if (i + j) % 2 == 0 { 0.003 } else { -0.003 };
            let z = 0.2 + 2e-4 * x - 1e-4 * y + ripple;
            writeln!(file, "{} {:.6} {:.6} {:.9}", index, x, y, z).unwrap();
            index += 1;
        }
    }
    writeln!(file, "12 oops").unwrap();
}

#[test]
fn test_full_scan_on_synthetic_plate() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("plate.txt");
    write_plate(&input);

    let config = FlatnessConfig::default();
    let points = read_points(&input, config.input.arity).unwrap();
    assert_eq!(points.len(), 58);

    let analysis = analyze(&points, &config, &NelderMead, MapValue::Residual).unwrap();

    // Fit
    assert!(analysis.fit.plane.converged);
    assert!(analysis.fit.sigma > 0.002 && analysis.fit.sigma < 0.004, "sigma={}", analysis.fit.sigma);
    assert!(analysis.fit.peak_to_valley < 0.01);

    // Grid
    let grid = analysis.grid;
    assert!(grid.regular_x && grid.regular_y);
    assert_eq!((grid.nx, grid.ny), (10, 6));
    assert!((grid.dx - 20.0).abs() < 1e-6);
    assert!((grid.dy - 12.0).abs() < 1e-6);
    assert!((grid.x_min - 50.0).abs() < 1e-9);
    assert_eq!(grid.missing_points, 2);

    // Map
    let map = analysis.map.as_ref().unwrap();
    assert_eq!(map.filled(), 58);
    assert_eq!(map.get(4, 2), None);
    assert_eq!(map.get(6, 3), None);
    assert_eq!(map.outside, 0);

    // Outputs
    let residuals = dir.path().join("plate_flatness.csv");
    let map_csv = dir.path().join("plate_flatness_map.csv");
    let hist_csv = dir.path().join("plate_flatness_histograms.csv");
    let summary = dir.path().join("plate_flatness_summary.yaml");

    let histograms = build_histograms(&points, &analysis.fit, config.output.histogram_bin_width);
    let report = FlatnessReport::new(&input, points.len(), &analysis, &config);
    write_residuals_csv(&residuals, &points, &analysis.fit.residuals).unwrap();
    write_flatness_map_csv(&map_csv, map).unwrap();
    write_histograms_csv(&hist_csv, &histograms).unwrap();
    write_summary_yaml(&summary, &report).unwrap();

    let residual_lines = fs::read_to_string(&residuals).unwrap();
    assert_eq!(residual_lines.lines().count(), 59);

    let map_lines = fs::read_to_string(&map_csv).unwrap();
    assert_eq!(map_lines.lines().count(), 61);
    assert_eq!(map_lines.lines().filter(|l| l.ends_with(",,0")).count(), 2);

    let hist_lines = fs::read_to_string(&hist_csv).unwrap();
    assert!(hist_lines.lines().any(|l| l.starts_with("deviations,")));

    let yaml = fs::read_to_string(&summary).unwrap();
    assert!(yaml.contains("map_available: true"));
    assert!(yaml.contains("missing_points: 2"));
    assert!(yaml.contains("map_source: residual"));
}

#[test]
fn test_missing_input_is_an_error() {
    let dir = tempdir().unwrap();
    assert!(read_points(dir.path().join("absent.txt"), 4).is_err());
}

#[test]
fn test_file_without_points_is_an_error() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("empty.txt");
    fs::write(&input, "# nothing here\nx y z\n").unwrap();
    assert!(read_points(&input, 4).is_err());
}

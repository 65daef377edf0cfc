//! Command-line interface for flatness scans.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::ConfigError;
use crate::core::histogram::Histogram;
use crate::core::loaders::{self, PointSet};
use crate::core::writers;
use crate::processors::analysis::{analyze, build_histograms, FlatnessAnalysis, FlatnessReport};
use crate::processors::flatness_map::MapValue;
use crate::processors::grid::analyze_grid;
use crate::processors::minimizer::NelderMead;
use crate::visualization;
use crate::FlatnessConfig;

/// Most markers drawn in the X/Y scatter plot.
const SCATTER_MAX_POINTS: usize = 200_000;

#[derive(Parser)]
#[command(name = "flatness-scan")]
#[command(about = "Surface flatness analysis of measured point clouds", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a plane, detect the sampling grid and build the flatness map
    Scan {
        /// Input point file (index, X, Y, Z per line)
        input: PathBuf,
        /// Output CSV path (defaults to <input-stem>_flatness.csv next to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Z translation applied before fitting, in mm
        #[arg(long)]
        offset: Option<f64>,
        /// Map raw Z instead of plane residuals
        #[arg(long)]
        raw_z: bool,
        /// Skip PNG plots
        #[arg(long)]
        no_plots: bool,
    },

    /// Report grid regularity of the X/Y sample positions only
    Grid {
        /// Input point file
        input: PathBuf,
    },
}

/// Where the artifacts of one scan are written.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPaths {
    /// Residual table; always has a `.csv` extension.
    pub residuals: PathBuf,
    dir: PathBuf,
    stem: String,
}

impl OutputPaths {
    /// Resolve the output layout for `input`.
    ///
    /// Without an explicit output the table goes next to the input as
    /// `<stem>_flatness.csv`. An explicit output keeps its directory and stem
    /// but always gets a `.csv` extension.
    pub fn resolve(input: &Path, output: Option<&Path>) -> Self {
        let residuals = match output {
            Some(out) => out.with_extension("csv"),
            None => {
                let stem = input
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| "scan".to_string());
                input.with_file_name(format!("{}_flatness.csv", stem))
            }
        };
        let dir = residuals.parent().map(Path::to_path_buf).unwrap_or_default();
        let stem = residuals
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "flatness".to_string());

        Self { residuals, dir, stem }
    }

    /// Sibling artifact `<stem>_<suffix>` in the output directory.
    pub fn sibling(&self, suffix: &str) -> PathBuf {
        self.dir.join(format!("{}_{}", self.stem, suffix))
    }

    pub fn map(&self) -> PathBuf {
        self.sibling("map.csv")
    }

    pub fn histograms(&self) -> PathBuf {
        self.sibling("histograms.csv")
    }

    pub fn summary(&self) -> PathBuf {
        self.sibling("summary.yaml")
    }
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<60} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 38 {
            format!("{}...", value.chars().take(35).collect::<String>())
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<38} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    // Load config
    let config = match &cli.config {
        Some(path) => match FlatnessConfig::from_yaml(path) {
            Ok(cfg) => {
                info!("Loaded config from: {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("Failed to load config from {}: {}, using defaults", path.display(), e);
                FlatnessConfig::default()
            }
        },
        None => FlatnessConfig::default(),
    };

    match cli.command {
        Commands::Scan { input, output, offset, raw_z, no_plots } => {
            let config = match with_scan_overrides(config, offset, no_plots) {
                Ok(c) => c,
                Err(e) => {
                    error!("Invalid configuration: {}", e);
                    std::process::exit(1);
                }
            };
            let source = if raw_z { MapValue::Height } else { MapValue::Residual };
            cmd_scan(&input, output.as_deref(), source, &config);
        }
        Commands::Grid { input } => {
            cmd_grid(&input, &config);
        }
    }
}

/// Apply `scan` flags on top of the loaded config and re-check it.
fn with_scan_overrides(
    mut config: FlatnessConfig,
    offset: Option<f64>,
    no_plots: bool,
) -> std::result::Result<FlatnessConfig, ConfigError> {
    if let Some(offset) = offset {
        config.fit.offset = offset;
    }
    if no_plots {
        config.output.plots = false;
    }
    config.validate()?;
    Ok(config)
}

fn load_input(input: &Path, config: &FlatnessConfig) -> Result<PointSet> {
    loaders::read_points(input, config.input.arity)
        .with_context(|| format!("cannot load points from {}", input.display()))
}

fn cmd_scan(input: &Path, output: Option<&Path>, source: MapValue, config: &FlatnessConfig) {
    let start = Instant::now();
    let paths = OutputPaths::resolve(input, output);

    println!("Running flatness scan...");
    println!("Input: {}", input.display());
    println!("Output: {}", paths.residuals.display());
    println!("Offset: {} mm", config.fit.offset);

    let spinner = create_spinner("Loading points...");

    let result = load_input(input, config).and_then(|points| {
        spinner.set_message(format!("Fitting plane to {} points...", points.len()));
        let analysis = analyze(&points, config, &NelderMead, source).context("plane fit failed")?;

        spinner.set_message("Writing results...");
        let histograms = build_histograms(&points, &analysis.fit, config.output.histogram_bin_width);
        let report = FlatnessReport::new(input, points.len(), &analysis, config);
        write_outputs(&paths, &points, &analysis, &histograms, &report)?;

        if config.output.plots {
            spinner.set_message("Rendering plots...");
            write_plots(&paths, &points, &analysis, &histograms);
        }
        Ok(report)
    });

    spinner.finish_and_clear();

    match result {
        Ok(report) => {
            let fit = &report.fit;
            let errors = fit
                .plane
                .errors
                .map(|e| format!("{:.3e} {:.3e} {:.3e}", e[0], e[1], e[2]))
                .unwrap_or_else(|| "n/a".to_string());
            let map = if report.map_available {
                format!("{} / {} cells", report.map_filled_cells, report.grid.intersections())
            } else {
                "unavailable (irregular grid)".to_string()
            };

            print_summary(
                "Flatness Scan Complete",
                &[
                    ("Input file", input.display().to_string()),
                    ("Output CSV", paths.residuals.display().to_string()),
                    ("Points", report.points.to_string()),
                    ("ax ay az", format!("{:.4e} {:.4e} {:.4e}", fit.plane.ax, fit.plane.ay, fit.plane.az)),
                    ("Errors", errors),
                    ("Min chi2", format!("{:.6e}", fit.plane.min_chi2)),
                    ("Converged", fit.plane.converged.to_string()),
                    ("Flatness sigma", format!("{:.3} {}", report.sigma_scaled, report.unit_label)),
                    (
                        "Peak to valley",
                        format!("{:.3} {}", fit.peak_to_valley * config.output.unit_scale, report.unit_label),
                    ),
                    ("Grid", format!("{} x {}", report.grid.nx, report.grid.ny)),
                    ("Missing points", report.grid.missing_points.to_string()),
                    ("Flatness map", map),
                    ("Duration", format!("{:.2?}", start.elapsed())),
                ],
            );
        }
        Err(e) => {
            error!("Flatness scan failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn write_outputs(
    paths: &OutputPaths,
    points: &PointSet,
    analysis: &FlatnessAnalysis,
    histograms: &[Histogram],
    report: &FlatnessReport,
) -> Result<()> {
    writers::write_residuals_csv(&paths.residuals, points, &analysis.fit.residuals)?;
    if let Some(map) = &analysis.map {
        writers::write_flatness_map_csv(&paths.map(), map)?;
    }
    writers::write_histograms_csv(&paths.histograms(), histograms)?;
    writers::write_summary_yaml(&paths.summary(), report)?;
    info!("Wrote results next to {}", paths.residuals.display());
    Ok(())
}

/// Plot failures are logged and do not fail the scan.
fn write_plots(paths: &OutputPaths, points: &PointSet, analysis: &FlatnessAnalysis, histograms: &[Histogram]) {
    for hist in histograms {
        let path = paths.sibling(&format!("{}.png", hist.name));
        if let Err(e) = visualization::plot_histogram(&path, hist) {
            warn!("Could not plot {}: {}", path.display(), e);
        }
    }

    let path = paths.sibling("xy.png");
    if let Err(e) = visualization::plot_xy_scatter(&path, &points.xy(), SCATTER_MAX_POINTS) {
        warn!("Could not plot {}: {}", path.display(), e);
    }

    if let Some(map) = &analysis.map {
        let path = paths.sibling("map.png");
        if let Err(e) = visualization::plot_flatness_map(&path, map) {
            warn!("Could not plot {}: {}", path.display(), e);
        }
    }
}

fn cmd_grid(input: &Path, config: &FlatnessConfig) {
    let start = Instant::now();

    println!("Analyzing sampling grid...");
    println!("Input: {}", input.display());

    let spinner = create_spinner("Loading points...");

    let points = match load_input(input, config) {
        Ok(p) => p,
        Err(e) => {
            spinner.finish_and_clear();
            error!("Grid analysis failed: {:#}", e);
            std::process::exit(1);
        }
    };

    spinner.set_message("Detecting grid...");
    let grid = analyze_grid(&points.xy(), &config.grid);
    spinner.finish_and_clear();

    print_summary(
        "Grid Analysis Complete",
        &[
            ("Input file", input.display().to_string()),
            ("Points", points.len().to_string()),
            ("Regular X", grid.regular_x.to_string()),
            ("Regular Y", grid.regular_y.to_string()),
            ("dx", format!("{:.4}", grid.dx)),
            ("dy", format!("{:.4}", grid.dy)),
            ("Nx x Ny", format!("{} x {}", grid.nx, grid.ny)),
            ("Merged X / Y", format!("{} / {}", grid.merged_x, grid.merged_y)),
            ("X range", format!("{:.3} .. {:.3}", grid.x_min, grid.x_max)),
            ("Y range", format!("{:.3} .. {:.3}", grid.y_min, grid.y_max)),
            ("Missing points", grid.missing_points.to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
}

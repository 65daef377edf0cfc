//! Configuration types for the flatness analysis.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while loading or saving a configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn require_positive(field: &'static str, v: f64) -> Result<(), ConfigError> {
    if v.is_finite() && v > 0.0 {
        Ok(())
    } else {
        Err(invalid(field, format!("must be a finite positive number, got {}", v)))
    }
}

fn require_non_negative(field: &'static str, v: f64) -> Result<(), ConfigError> {
    if v.is_finite() && v >= 0.0 {
        Ok(())
    } else {
        Err(invalid(field, format!("must be a finite non-negative number, got {}", v)))
    }
}

/// Configuration for point ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Numbers expected on each line: point index followed by X, Y, Z
    #[serde(default = "default_arity")]
    pub arity: usize,
}

fn default_arity() -> usize {
    4
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            arity: default_arity(),
        }
    }
}

/// Configuration for the plane fit and its minimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitConfig {
    /// Translation added to Z so the fitted plane stays clear of the origin (mm)
    #[serde(default = "default_offset")]
    pub offset: f64,

    /// Initial simplex step for each plane coefficient
    #[serde(default = "default_initial_step")]
    pub initial_step: f64,

    /// Relative spread of the objective across the simplex at convergence
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,

    /// Absolute floor on the objective spread, in objective units (mm²)
    #[serde(default = "default_absolute_tolerance")]
    pub absolute_tolerance: f64,

    /// Maximum number of simplex iterations
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Maximum number of objective evaluations
    #[serde(default = "default_max_function_calls")]
    pub max_function_calls: usize,
}

fn default_offset() -> f64 {
    400.0
}

fn default_initial_step() -> f64 {
    0.001
}

fn default_tolerance() -> f64 {
    1e-10
}

fn default_absolute_tolerance() -> f64 {
    1e-24
}

fn default_max_iterations() -> usize {
    10_000
}

fn default_max_function_calls() -> usize {
    1_000_000
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            offset: default_offset(),
            initial_step: default_initial_step(),
            tolerance: default_tolerance(),
            absolute_tolerance: default_absolute_tolerance(),
            max_iterations: default_max_iterations(),
            max_function_calls: default_max_function_calls(),
        }
    }
}

/// Configuration for grid-regularity detection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GridConfig {
    /// Allowed relative spread of the grid step (0.05 = 5%)
    #[serde(default = "default_tolerance_fraction")]
    pub tolerance_fraction: f64,

    /// Presence radius for missing-intersection detection, as a fraction of the smaller step
    #[serde(default = "default_presence_epsilon_fraction")]
    pub presence_epsilon_fraction: f64,

    /// Merge radius for near-duplicate coordinates, as a fraction of the rough step
    #[serde(default = "default_merge_step_fraction")]
    pub merge_step_fraction: f64,
}

fn default_tolerance_fraction() -> f64 {
    0.05
}

fn default_presence_epsilon_fraction() -> f64 {
    0.2
}

fn default_merge_step_fraction() -> f64 {
    0.10
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            tolerance_fraction: default_tolerance_fraction(),
            presence_epsilon_fraction: default_presence_epsilon_fraction(),
            merge_step_fraction: default_merge_step_fraction(),
        }
    }
}

/// Configuration for reports, tables and plots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Factor converting input units to reporting units (mm -> µm)
    #[serde(default = "default_unit_scale")]
    pub unit_scale: f64,

    /// Label of the reporting unit
    #[serde(default = "default_unit_label")]
    pub unit_label: String,

    /// Histogram bin width in input units
    #[serde(default = "default_histogram_bin_width")]
    pub histogram_bin_width: f64,

    /// Render PNG plots next to the tables
    #[serde(default = "default_plots")]
    pub plots: bool,
}

fn default_unit_scale() -> f64 {
    1000.0
}

fn default_unit_label() -> String {
    "µm".to_string()
}

fn default_histogram_bin_width() -> f64 {
    0.001
}

fn default_plots() -> bool {
    true
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            unit_scale: default_unit_scale(),
            unit_label: default_unit_label(),
            histogram_bin_width: default_histogram_bin_width(),
            plots: default_plots(),
        }
    }
}

/// Main configuration combining all sub-configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlatnessConfig {
    #[serde(default)]
    pub input: InputConfig,

    #[serde(default)]
    pub fit: FitConfig,

    #[serde(default)]
    pub grid: GridConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

impl FlatnessConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: FlatnessConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every value is usable by the analysis.
    ///
    /// X, Y and Z are read from columns 1..=3, so `input.arity` must be at
    /// least 4.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input.arity < 4 {
            return Err(invalid(
                "input.arity",
                format!("X, Y, Z are read from columns 1..=3, got arity {}", self.input.arity),
            ));
        }

        let fit = &self.fit;
        if !fit.offset.is_finite() || fit.offset == 0.0 {
            return Err(invalid(
                "fit.offset",
                format!("must be finite and non-zero, got {}", fit.offset),
            ));
        }
        require_positive("fit.initial_step", fit.initial_step)?;
        require_non_negative("fit.tolerance", fit.tolerance)?;
        require_non_negative("fit.absolute_tolerance", fit.absolute_tolerance)?;

        require_positive("grid.tolerance_fraction", self.grid.tolerance_fraction)?;
        require_positive("grid.presence_epsilon_fraction", self.grid.presence_epsilon_fraction)?;
        require_non_negative("grid.merge_step_fraction", self.grid.merge_step_fraction)?;

        require_positive("output.unit_scale", self.output.unit_scale)?;
        require_positive("output.histogram_bin_width", self.output.histogram_bin_width)?;
        Ok(())
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

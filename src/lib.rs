//! Surface flatness analysis for metrology point clouds.
//!
//! This crate provides tools for:
//! - Loading delimited (index, X, Y, Z) point files
//! - Fitting a best plane by minimizing orthogonal chi-square distances
//! - Detecting a regular X/Y sampling lattice and its missing samples
//! - Binning residuals onto the lattice as a flatness map
//!
//! # Example
//!
//! ```no_run
//! use flatness_scan::core::loaders::read_points;
//! use flatness_scan::processors::{analyze, MapValue, NelderMead};
//! use flatness_scan::FlatnessConfig;
//!
//! let config = FlatnessConfig::default();
//! let points = read_points("plate.txt", config.input.arity).unwrap();
//! let analysis = analyze(&points, &config, &NelderMead, MapValue::Residual).unwrap();
//! println!("sigma = {} mm", analysis.fit.sigma);
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod processors;
pub mod visualization;

pub use config::{FitConfig, FlatnessConfig, GridConfig, InputConfig, OutputConfig};
pub use core::loaders::PointSet;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

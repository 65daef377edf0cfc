//! Core data types and I/O operations.

pub mod histogram;
pub mod loaders;
pub mod writers;

pub use histogram::Histogram;
pub use loaders::{LoaderError, PointSet};
pub use writers::{write_flatness_map_csv, write_histograms_csv, write_residuals_csv, write_summary_yaml, WriteError};

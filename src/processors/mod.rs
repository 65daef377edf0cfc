//! Flatness analysis modules.

pub mod analysis;
pub mod flatness_map;
pub mod grid;
pub mod minimizer;
pub mod plane_fit;

// Re-export key types for convenience
pub use analysis::{analyze, build_histograms, FlatnessAnalysis, FlatnessReport};
pub use flatness_map::{build_flatness_map, FlatnessMap, MapValue};
pub use grid::{analyze_grid, GridResult};
pub use minimizer::{Minimizer, MinimizerSettings, Minimum, NelderMead};
pub use plane_fit::{fit_plane, FitError, PlaneFit, PlaneParameters};

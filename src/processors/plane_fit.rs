//! Best-fit plane for a measured surface.
//!
//! The plane is written in reciprocal-normal form
//!
//! ```text
//! ax·X + ay·Y + az·(Z + offset) = 1
//! ```
//!
//! and found by minimizing
//!
//! ```text
//! chi2 = Σ (ax·X + ay·Y + az·(Z + offset) − 1)² / (ax² + ay² + az²)
//! ```
//!
//! Dividing by |a|² turns each algebraic residual into the orthogonal
//! distance from the plane. `offset` shifts the surface away from the origin
//! so the coefficients stay bounded.

use log::{info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::config::FitConfig;
use crate::core::loaders::PointSet;

use super::minimizer::{Minimizer, MinimizerSettings};

/// Number of free plane parameters.
pub const PLANE_PARAMETERS: usize = 3;

/// Value returned by the objective at the degenerate point a = (0, 0, 0).
pub const DEGENERATE_CHI2: f64 = f64::MAX;

/// Errors that can occur while fitting a plane.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("insufficient data: {points} points for {parameters} parameters")]
    InsufficientData { points: usize, parameters: usize },

    #[error("points have {arity} columns; X, Y, Z are read from columns 1..=3")]
    MissingCoordinates { arity: usize },
}

/// Result type for fit operations.
pub type Result<T> = std::result::Result<T, FitError>;

/// Fitted plane coefficients with their uncertainties.
#[derive(Debug, Clone, Serialize)]
pub struct PlaneParameters {
    pub ax: f64,
    pub ay: f64,
    pub az: f64,
    /// Standard errors of (ax, ay, az), when the minimizer could estimate them.
    pub errors: Option<[f64; 3]>,
    /// Minimized objective value (mm²).
    pub min_chi2: f64,
    /// Z translation the plane was fitted with.
    pub offset: f64,
    pub converged: bool,
    pub iterations: usize,
    pub function_calls: usize,
}

impl PlaneParameters {
    /// |a| = sqrt(ax² + ay² + az²).
    #[inline]
    pub fn modulus(&self) -> f64 {
        (self.ax * self.ax + self.ay * self.ay + self.az * self.az).sqrt()
    }

    /// Distance from the origin to the plane, 1/|a|.
    #[inline]
    pub fn origin_distance(&self) -> f64 {
        1.0 / self.modulus()
    }

    /// Signed orthogonal distance of a point from the plane.
    ///
    /// Positive on the side where ax·X + ay·Y + az·(Z+offset) > 1.
    #[inline]
    pub fn residual(&self, x: f64, y: f64, z: f64) -> f64 {
        (self.ax * x + self.ay * y + self.az * (z + self.offset) - 1.0) / self.modulus()
    }

    /// Unit normal of the plane, oriented toward positive residuals.
    pub fn unit_normal(&self) -> [f64; 3] {
        let m = self.modulus();
        [self.ax / m, self.ay / m, self.az / m]
    }
}

/// Plane fit together with derived flatness figures.
#[derive(Debug, Clone, Serialize)]
pub struct PlaneFit {
    pub plane: PlaneParameters,
    /// Per-point signed distances, in input order.
    #[serde(skip)]
    pub residuals: Vec<f64>,
    /// sqrt(min_chi2 / N), in input units.
    pub sigma: f64,
    /// Root mean square of the residuals.
    pub rms: f64,
    /// Largest minus smallest residual.
    pub peak_to_valley: f64,
}

impl PlaneFit {
    /// Aggregate flatness σ expressed in reporting units.
    #[inline]
    pub fn sigma_scaled(&self, unit_scale: f64) -> f64 {
        self.sigma * unit_scale
    }
}

/// Chi-square of plane `a` against the points, scale-normalized by |a|².
///
/// Returns [`DEGENERATE_CHI2`] at a = (0, 0, 0) instead of dividing by zero.
pub fn chi2(a: &[f64], xyz: &[[f64; 3]], offset: f64) -> f64 {
    let (ax, ay, az) = (a[0], a[1], a[2]);
    let norm2 = ax * ax + ay * ay + az * az;
    if norm2 == 0.0 {
        return DEGENERATE_CHI2;
    }

    let sum: f64 = xyz
        .iter()
        .map(|p| {
            let delta = ax * p[0] + ay * p[1] + az * (p[2] + offset) - 1.0;
            delta * delta
        })
        .sum();

    sum / norm2
}

/// Fit a plane to the X, Y, Z columns of `points`.
///
/// Starts from the horizontal plane `(0, 0, 1/offset)`, i.e. Z = 0.
///
/// # Errors
///
/// Returns an error if the set has no Z column or holds no more points than
/// there are plane parameters. Non-convergence is not an error: it is
/// reported through [`PlaneParameters::converged`].
pub fn fit_plane<M: Minimizer + ?Sized>(
    points: &PointSet,
    config: &FitConfig,
    minimizer: &M,
) -> Result<PlaneFit> {
    if !points.has_xyz() {
        return Err(FitError::MissingCoordinates {
            arity: points.arity(),
        });
    }
    if points.len() <= PLANE_PARAMETERS {
        return Err(FitError::InsufficientData {
            points: points.len(),
            parameters: PLANE_PARAMETERS,
        });
    }

    let xyz: Vec<[f64; 3]> = (0..points.len()).map(|i| points.xyz(i)).collect();
    let offset = config.offset;

    let objective = |a: &[f64]| chi2(a, &xyz, offset);
    let initial = [0.0, 0.0, 1.0 / offset];
    let steps = [config.initial_step; PLANE_PARAMETERS];
    let settings = MinimizerSettings {
        tolerance: config.tolerance,
        absolute_tolerance: config.absolute_tolerance,
        max_iterations: config.max_iterations,
        max_function_calls: config.max_function_calls,
    };

    info!("Fitting 3D plane to {} points (offset {} mm)", xyz.len(), offset);
    let minimum = minimizer.minimize(&objective, &initial, &steps, &settings);

    if !minimum.converged {
        warn!(
            "plane fit did not converge within {} iterations / {} calls; results are best effort",
            config.max_iterations, config.max_function_calls
        );
    }

    let plane = PlaneParameters {
        ax: minimum.x[0],
        ay: minimum.x[1],
        az: minimum.x[2],
        errors: minimum.errors.map(|e| [e[0], e[1], e[2]]),
        min_chi2: minimum.value,
        offset,
        converged: minimum.converged,
        iterations: minimum.iterations,
        function_calls: minimum.function_calls,
    };

    let residuals: Vec<f64> = xyz.iter().map(|p| plane.residual(p[0], p[1], p[2])).collect();

    let n = residuals.len() as f64;
    let sigma = (plane.min_chi2 / n).sqrt();
    let rms = (residuals.iter().map(|r| r * r).sum::<f64>() / n).sqrt();
    let (lo, hi) = residuals
        .iter()
        .fold((f64::MAX, f64::MIN), |(lo, hi), &r| (lo.min(r), hi.max(r)));

    Ok(PlaneFit {
        plane,
        residuals,
        sigma,
        rms,
        peak_to_valley: hi - lo,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::minimizer::NelderMead;

    /// Plate of `n`×`n` samples on z = sx·x + sy·y + z0 plus `noise(i, j)`.
    fn plate(n: usize, sx: f64, sy: f64, z0: f64, noise: impl Fn(usize, usize) -> f64) -> PointSet {
        let mut pts = Vec::with_capacity(n * n);
        for i in 0..n {
            for j in 0..n {
                let x = i as f64 * 31.1;
                let y = j as f64 * 19.4;
                pts.push([x, y, sx * x + sy * y + z0 + noise(i, j)]);
            }
        }
        PointSet::from_xyz(&pts)
    }

    /// Alternating ±amplitude on a checkerboard.
    fn checkerboard(amplitude: f64) -> impl Fn(usize, usize) -> f64 {
        move |i, j| if (i + j) % 2 == 0 { amplitude } else { -amplitude }
    }

    /// Reciprocal-normal coefficients of z = sx·x + sy·y + z0 for a given offset.
    fn expected_coefficients(sx: f64, sy: f64, z0: f64, offset: f64) -> [f64; 3] {
        // -sx·x - sy·y + (z + offset) = z0 + offset
        let d = z0 + offset;
        [-sx / d, -sy / d, 1.0 / d]
    }

    #[test]
    fn test_chi2_zero_on_plane() {
        let xyz = [[0.0, 0.0, 0.0], [10.0, 0.0, 0.0], [0.0, 10.0, 0.0]];
        let a = [0.0, 0.0, 1.0 / 400.0];
        assert!(chi2(&a, &xyz, 400.0) < 1e-20);
    }

    #[test]
    fn test_chi2_is_squared_distance() {
        // Plane Z = 0 and one point 0.5 above it.
        let xyz = [[3.0, 4.0, 0.5]];
        let a = [0.0, 0.0, 1.0 / 400.0];
        assert!((chi2(&a, &xyz, 400.0) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_chi2_degenerate_guard() {
        let xyz = [[1.0, 2.0, 3.0]];
        assert_eq!(chi2(&[0.0, 0.0, 0.0], &xyz, 400.0), DEGENERATE_CHI2);
    }

    #[test]
    fn test_insufficient_data() {
        let points = PointSet::from_xyz(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
        let err = fit_plane(&points, &FitConfig::default(), &NelderMead).unwrap_err();
        assert_eq!(
            err,
            FitError::InsufficientData {
                points: 3,
                parameters: 3
            }
        );
    }

    #[test]
    fn test_missing_coordinates() {
        let mut points = PointSet::new(3);
        for i in 0..5 {
            points.push(&[i as f64, 0.0, 1.0]);
        }
        let err = fit_plane(&points, &FitConfig::default(), &NelderMead).unwrap_err();
        assert_eq!(err, FitError::MissingCoordinates { arity: 3 });
    }

    #[test]
    fn test_exact_plane_recovered() {
        let (sx, sy, z0) = (2e-4, -1e-4, 0.05);
        let points = plate(10, sx, sy, z0, |_, _| 0.0);
        let config = FitConfig::default();
        let fit = fit_plane(&points, &config, &NelderMead).unwrap();

        assert!(fit.plane.converged);
        assert!(fit.plane.min_chi2 < 1e-12, "chi2={}", fit.plane.min_chi2);
        assert!(fit.sigma < 1e-6, "sigma={}", fit.sigma);

        let expected = expected_coefficients(sx, sy, z0, config.offset);
        let got = [fit.plane.ax, fit.plane.ay, fit.plane.az];
        for (g, e) in got.iter().zip(expected.iter()) {
            assert!((g - e).abs() < 1e-9, "got {} expected {}", g, e);
        }
        assert!(fit.residuals.iter().all(|r| r.abs() < 1e-6));
    }

    #[test]
    fn test_noise_shrinks_parameter_error() {
        let (sx, sy, z0) = (1e-4, 3e-4, -0.02);
        let config = FitConfig::default();
        let expected = expected_coefficients(sx, sy, z0, config.offset);

        let deviation = |noise: f64| {
            // Deterministic zero-mean pattern that is not orthogonal to the plane terms.
            let pattern = |i: usize, j: usize| noise * (1.7 * i as f64 + 0.3 * (j * j) as f64).sin();
            let fit = fit_plane(&plate(10, sx, sy, z0, pattern), &config, &NelderMead).unwrap();
            let got = [fit.plane.ax, fit.plane.ay, fit.plane.az];
            got.iter()
                .zip(expected.iter())
                .map(|(g, e)| (g - e).abs())
                .fold(0.0, f64::max)
        };

        let coarse = deviation(0.01);
        let fine = deviation(0.0001);
        assert!(fine < coarse, "fine={} coarse={}", fine, coarse);
        assert!(fine < 1e-8, "fine={}", fine);
    }

    #[test]
    fn test_iteration_cap_reports_best_effort() {
        let config = FitConfig {
            max_iterations: 1,
            ..FitConfig::default()
        };
        let fit = fit_plane(&plate(8, 3e-4, -2e-4, 0.1, |_, _| 0.0), &config, &NelderMead).unwrap();

        assert!(!fit.plane.converged);
        assert!(fit.plane.iterations <= 1);
        assert!(fit.plane.ax.is_finite() && fit.plane.ay.is_finite() && fit.plane.az.is_finite());
        assert!(fit.plane.min_chi2.is_finite());
        assert_eq!(fit.residuals.len(), 64);
        assert!(fit.residuals.iter().all(|r| r.is_finite()));
        assert!(fit.sigma.is_finite());
    }

    #[test]
    fn test_sigma_matches_noise() {
        let noise = 0.002;
        let fit = fit_plane(&plate(10, 0.0, 0.0, 0.0, checkerboard(noise)), &FitConfig::default(), &NelderMead)
            .unwrap();
        // Alternating ±noise on a checkerboard is orthogonal to any plane.
        assert!((fit.sigma - noise).abs() < 1e-6, "sigma={}", fit.sigma);
        assert!((fit.rms - noise).abs() < 1e-6, "rms={}", fit.rms);
        assert!((fit.peak_to_valley - 2.0 * noise).abs() < 1e-6);
        assert!((fit.sigma_scaled(1000.0) - 2.0).abs() < 1e-3);
        assert!(fit.plane.errors.is_some());
    }

    #[test]
    fn test_residual_sign_follows_normal() {
        let mut pts = Vec::new();
        for i in 0..6 {
            for j in 0..6 {
                let x = i as f64 * 10.0;
                let y = j as f64 * 10.0;
                let z = if (i + j) % 2 == 0 { 0.01 } else { -0.01 };
                pts.push([x, y, z]);
            }
        }
        let fit = fit_plane(&PointSet::from_xyz(&pts), &FitConfig::default(), &NelderMead).unwrap();

        // az > 0 here, so the normal points toward +Z.
        assert!(fit.plane.az > 0.0);
        assert!(fit.plane.unit_normal()[2] > 0.0);
        for (p, r) in pts.iter().zip(&fit.residuals) {
            if p[2] > 0.0 {
                assert!(*r > 0.0, "point {:?} residual {}", p, r);
            } else {
                assert!(*r < 0.0, "point {:?} residual {}", p, r);
            }
        }
    }

    #[test]
    fn test_origin_distance() {
        let plane = PlaneParameters {
            ax: 0.0,
            ay: 0.0,
            az: 1.0 / 400.0,
            errors: None,
            min_chi2: 0.0,
            offset: 400.0,
            converged: true,
            iterations: 0,
            function_calls: 0,
        };
        assert!((plane.modulus() - 0.0025).abs() < 1e-15);
        assert!((plane.origin_distance() - 400.0).abs() < 1e-9);
        assert!(plane.residual(5.0, 5.0, 0.1) > 0.0);
        assert!((plane.residual(5.0, 5.0, 0.1) - 0.1).abs() < 1e-12);
    }
}

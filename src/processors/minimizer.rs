//! Bounded local minimization of a scalar objective.
//!
//! The [`Minimizer`] trait is the seam between a model that defines an
//! objective (for example the plane fit) and the numerical search used to
//! minimize it. [`NelderMead`] is the in-crate implementation: a downhill
//! simplex search that never evaluates derivatives, followed by a
//! central-difference Hessian to estimate parameter uncertainties.
//!
//! # Example
//!
//! ```
//! use flatness_scan::processors::minimizer::{Minimizer, MinimizerSettings, NelderMead};
//!
//! let objective = |x: &[f64]| (x[0] - 3.0).powi(2) + 2.0 * (x[1] + 1.0).powi(2);
//! let settings = MinimizerSettings::default();
//! let minimum = NelderMead.minimize(&objective, &[0.0, 0.0], &[0.5, 0.5], &settings);
//!
//! assert!(minimum.converged);
//! assert!((minimum.x[0] - 3.0).abs() < 1e-6);
//! ```

use log::{debug, warn};
use nalgebra::DMatrix;

/// Convergence criteria and hard caps for a minimization.
#[derive(Debug, Clone, Copy)]
pub struct MinimizerSettings {
    /// Relative spread of the objective across the simplex at convergence.
    pub tolerance: f64,
    /// Absolute floor on that spread, in objective units.
    pub absolute_tolerance: f64,
    /// Maximum number of simplex iterations.
    pub max_iterations: usize,
    /// Maximum number of objective evaluations.
    pub max_function_calls: usize,
}

impl Default for MinimizerSettings {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            absolute_tolerance: 1e-24,
            max_iterations: 10_000,
            max_function_calls: 1_000_000,
        }
    }
}

/// Outcome of a minimization.
#[derive(Debug, Clone)]
pub struct Minimum {
    /// Best parameter vector found.
    pub x: Vec<f64>,
    /// Objective value at `x`.
    pub value: f64,
    /// Standard error per parameter, if the Hessian at `x` is usable.
    pub errors: Option<Vec<f64>>,
    /// False if the caps were hit before the convergence test passed.
    pub converged: bool,
    /// Simplex iterations performed.
    pub iterations: usize,
    /// Objective evaluations performed (including the Hessian estimate).
    pub function_calls: usize,
}

/// A local iterative minimizer.
///
/// Implementations must return within `settings.max_iterations` iterations
/// and `settings.max_function_calls` objective evaluations (plus whatever a
/// fixed-size post-processing step such as an error estimate needs).
pub trait Minimizer {
    fn minimize(
        &self,
        objective: &dyn Fn(&[f64]) -> f64,
        initial: &[f64],
        steps: &[f64],
        settings: &MinimizerSettings,
    ) -> Minimum;
}

/// Counts objective evaluations and treats NaN as +inf.
struct Counted<'a> {
    objective: &'a dyn Fn(&[f64]) -> f64,
    calls: usize,
}

impl Counted<'_> {
    fn eval(&mut self, x: &[f64]) -> f64 {
        self.calls += 1;
        let v = (self.objective)(x);
        if v.is_nan() {
            f64::INFINITY
        } else {
            v
        }
    }
}

/// Downhill simplex (Nelder–Mead) minimizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NelderMead;

const REFLECT: f64 = 1.0;
const EXPAND: f64 = 2.0;
const CONTRACT: f64 = 0.5;
const SHRINK: f64 = 0.5;

/// Error definition for a chi-square objective (one standard deviation).
const ERROR_DEF: f64 = 1.0;

impl NelderMead {
    /// Run simplex passes from `start` until converged or out of budget.
    ///
    /// Returns (best vertex, best value, converged), or `None` without
    /// evaluating anything when the call budget cannot cover a fresh simplex.
    fn search(
        f: &mut Counted<'_>,
        start: &[f64],
        steps: &[f64],
        settings: &MinimizerSettings,
        iterations: &mut usize,
    ) -> Option<(Vec<f64>, f64, bool)> {
        let n = start.len();
        if f.calls + n + 1 > settings.max_function_calls {
            return None;
        }

        let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
        simplex.push(start.to_vec());
        for i in 0..n {
            let mut v = start.to_vec();
            v[i] += steps[i];
            simplex.push(v);
        }
        let mut values: Vec<f64> = simplex.iter().map(|v| f.eval(v)).collect();

        loop {
            // Order vertices best to worst.
            let mut order: Vec<usize> = (0..=n).collect();
            order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
            simplex = order.iter().map(|&i| simplex[i].clone()).collect();
            values = order.iter().map(|&i| values[i]).collect();

            let best = values[0];
            let worst = values[n];
            let spread = worst - best;
            let threshold =
                settings.tolerance * 0.5 * (best.abs() + worst.abs()) + settings.absolute_tolerance;
            if spread.is_finite() && spread <= threshold {
                return Some((simplex[0].clone(), best, true));
            }

            if *iterations >= settings.max_iterations
                || f.calls + n + 2 > settings.max_function_calls
            {
                return Some((simplex[0].clone(), best, false));
            }
            *iterations += 1;

            let mut centroid = vec![0.0; n];
            for v in &simplex[..n] {
                for (c, &x) in centroid.iter_mut().zip(v) {
                    *c += x;
                }
            }
            for c in &mut centroid {
                *c /= n as f64;
            }

            let toward = |coef: f64, from: &[f64]| -> Vec<f64> {
                centroid
                    .iter()
                    .zip(from)
                    .map(|(&c, &w)| c + coef * (c - w))
                    .collect()
            };

            let reflected = toward(REFLECT, &simplex[n]);
            let f_reflected = f.eval(&reflected);

            if f_reflected < values[0] {
                let expanded = toward(EXPAND, &simplex[n]);
                let f_expanded = f.eval(&expanded);
                if f_expanded < f_reflected {
                    simplex[n] = expanded;
                    values[n] = f_expanded;
                } else {
                    simplex[n] = reflected;
                    values[n] = f_reflected;
                }
                continue;
            }

            if f_reflected < values[n - 1] {
                simplex[n] = reflected;
                values[n] = f_reflected;
                continue;
            }

            // Contract outside if the reflection beat the worst, inside otherwise.
            let (contracted, f_contracted) = if f_reflected < values[n] {
                let c = toward(CONTRACT, &simplex[n]);
                let fc = f.eval(&c);
                (c, fc)
            } else {
                let c = toward(-CONTRACT, &simplex[n]);
                let fc = f.eval(&c);
                (c, fc)
            };

            if f_contracted < values[n].min(f_reflected) {
                simplex[n] = contracted;
                values[n] = f_contracted;
                continue;
            }

            // Shrink toward the best vertex.
            let best_vertex = simplex[0].clone();
            for i in 1..=n {
                let shrunk: Vec<f64> = best_vertex
                    .iter()
                    .zip(&simplex[i])
                    .map(|(&b, &x)| b + SHRINK * (x - b))
                    .collect();
                values[i] = f.eval(&shrunk);
                simplex[i] = shrunk;
            }
        }
    }

    /// Standard errors from a central-difference Hessian at `x`.
    ///
    /// Uses `σ_i = sqrt(2·up·(H⁻¹)_ii)`; returns `None` if the Hessian is
    /// singular or a variance is not positive.
    fn standard_errors(f: &mut Counted<'_>, x: &[f64], fx: f64, steps: &[f64]) -> Option<Vec<f64>> {
        let n = x.len();
        let h: Vec<f64> = x
            .iter()
            .zip(steps)
            .map(|(&xi, &si)| (1e-4 * xi.abs()).max(1e-3 * si.abs()).max(f64::EPSILON))
            .collect();

        let mut hessian = DMatrix::<f64>::zeros(n, n);
        let mut shifted = x.to_vec();

        for i in 0..n {
            shifted[i] = x[i] + h[i];
            let f_plus = f.eval(&shifted);
            shifted[i] = x[i] - h[i];
            let f_minus = f.eval(&shifted);
            shifted[i] = x[i];
            hessian[(i, i)] = (f_plus - 2.0 * fx + f_minus) / (h[i] * h[i]);
        }

        for i in 0..n {
            for j in (i + 1)..n {
                let mut corner = |si: f64, sj: f64| {
                    shifted[i] = x[i] + si * h[i];
                    shifted[j] = x[j] + sj * h[j];
                    let v = f.eval(&shifted);
                    shifted[i] = x[i];
                    shifted[j] = x[j];
                    v
                };
                let fpp = corner(1.0, 1.0);
                let fpm = corner(1.0, -1.0);
                let fmp = corner(-1.0, 1.0);
                let fmm = corner(-1.0, -1.0);
                let hij = (fpp - fpm - fmp + fmm) / (4.0 * h[i] * h[j]);
                hessian[(i, j)] = hij;
                hessian[(j, i)] = hij;
            }
        }

        if hessian.iter().any(|v| !v.is_finite()) {
            warn!("Hessian at the minimum is not finite; parameter errors unavailable");
            return None;
        }

        let Some(inverse) = hessian.try_inverse() else {
            warn!("Hessian at the minimum is singular; parameter errors unavailable");
            return None;
        };

        let mut errors = Vec::with_capacity(n);
        for i in 0..n {
            let variance = 2.0 * ERROR_DEF * inverse[(i, i)];
            if variance.is_nan() || variance <= 0.0 {
                warn!("non-positive variance for parameter {}; parameter errors unavailable", i);
                return None;
            }
            errors.push(variance.sqrt());
        }
        Some(errors)
    }
}

impl Minimizer for NelderMead {
    fn minimize(
        &self,
        objective: &dyn Fn(&[f64]) -> f64,
        initial: &[f64],
        steps: &[f64],
        settings: &MinimizerSettings,
    ) -> Minimum {
        assert_eq!(initial.len(), steps.len(), "one step per parameter");

        let mut f = Counted {
            objective,
            calls: 0,
        };

        if initial.is_empty() {
            let value = f.eval(initial);
            return Minimum {
                x: Vec::new(),
                value,
                errors: Some(Vec::new()),
                converged: true,
                iterations: 0,
                function_calls: f.calls,
            };
        }

        let mut iterations = 0;
        let (mut x, mut value, mut converged) =
            match Self::search(&mut f, initial, steps, settings, &mut iterations) {
                Some(pass) => pass,
                None => {
                    let value = if settings.max_function_calls > 0 {
                        f.eval(initial)
                    } else {
                        f64::INFINITY
                    };
                    (initial.to_vec(), value, false)
                }
            };
        debug!(
            "simplex pass 1: value={:.6e} converged={} iterations={} calls={}",
            value, converged, iterations, f.calls
        );

        // Restart once around the best vertex; a collapsed simplex can report
        // convergence away from the true minimum.
        if converged {
            match Self::search(&mut f, &x, steps, settings, &mut iterations) {
                Some((x2, value2, converged2)) => {
                    debug!(
                        "simplex pass 2: value={:.6e} converged={} iterations={} calls={}",
                        value2, converged2, iterations, f.calls
                    );
                    if value2 <= value {
                        x = x2;
                        value = value2;
                    }
                    converged = converged2;
                }
                None => debug!("call budget exhausted; restart pass skipped"),
            }
        }

        if !converged {
            warn!(
                "minimizer stopped before convergence after {} iterations and {} calls",
                iterations, f.calls
            );
        }

        let errors = Self::standard_errors(&mut f, &x, value, steps);

        Minimum {
            x,
            value,
            errors,
            converged,
            iterations,
            function_calls: f.calls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quadratic(x: &[f64]) -> f64 {
        (x[0] - 1.0).powi(2) + 4.0 * (x[1] - 2.0).powi(2) + 0.5 * (x[2] + 3.0).powi(2)
    }

    #[test]
    fn test_quadratic_minimum() {
        let settings = MinimizerSettings::default();
        let m = NelderMead.minimize(&quadratic, &[0.0, 0.0, 0.0], &[0.1, 0.1, 0.1], &settings);

        assert!(m.converged);
        assert!((m.x[0] - 1.0).abs() < 1e-6, "x0={}", m.x[0]);
        assert!((m.x[1] - 2.0).abs() < 1e-6, "x1={}", m.x[1]);
        assert!((m.x[2] + 3.0).abs() < 1e-6, "x2={}", m.x[2]);
        assert!(m.value < 1e-12);
    }

    #[test]
    fn test_errors_follow_curvature() {
        // f = (x/σx)² + (y/σy)² gives σ = sqrt(2 / f'') = σx·1 for up = 1.
        let objective = |x: &[f64]| (x[0] / 2.0).powi(2) + (x[1] / 0.5).powi(2);
        let m = NelderMead.minimize(&objective, &[1.0, 1.0], &[0.1, 0.1], &MinimizerSettings::default());

        let errors = m.errors.expect("errors available");
        assert!((errors[0] - 2.0).abs() < 1e-3, "err0={}", errors[0]);
        assert!((errors[1] - 0.5).abs() < 1e-3, "err1={}", errors[1]);
    }

    #[test]
    fn test_respects_function_call_cap() {
        let settings = MinimizerSettings {
            max_function_calls: 20,
            ..Default::default()
        };
        let rosenbrock = |x: &[f64]| (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2);
        let m = NelderMead.minimize(&rosenbrock, &[-1.2, 1.0], &[0.1, 0.1], &settings);

        assert!(!m.converged);
        // Budget plus the fixed-size Hessian evaluations (2n + 4·n(n-1)/2 calls).
        assert!(m.function_calls <= 20 + 8, "calls={}", m.function_calls);
        assert!(m.value.is_finite());
    }

    #[test]
    fn test_call_cap_below_simplex_size() {
        // Three parameters need four calls for the first simplex.
        let settings = MinimizerSettings {
            max_function_calls: 2,
            ..Default::default()
        };
        let m = NelderMead.minimize(&quadratic, &[0.0, 0.0, 0.0], &[0.1, 0.1, 0.1], &settings);

        assert!(!m.converged);
        assert_eq!(m.iterations, 0);
        assert_eq!(m.x, vec![0.0, 0.0, 0.0]);
        assert!((m.value - quadratic(&[0.0, 0.0, 0.0])).abs() < 1e-12);
        // One evaluation of the start plus the Hessian evaluations (2n + 4·n(n-1)/2 = 18).
        assert_eq!(m.function_calls, 1 + 18);
    }

    #[test]
    fn test_zero_call_budget() {
        let settings = MinimizerSettings {
            max_function_calls: 0,
            ..Default::default()
        };
        let m = NelderMead.minimize(&quadratic, &[0.0, 0.0, 0.0], &[0.1, 0.1, 0.1], &settings);
        assert!(!m.converged);
        assert_eq!(m.iterations, 0);
        assert!(m.errors.is_none());
    }

    #[test]
    fn test_respects_iteration_cap() {
        let settings = MinimizerSettings {
            max_iterations: 5,
            ..Default::default()
        };
        let m = NelderMead.minimize(&quadratic, &[10.0, 10.0, 10.0], &[0.01, 0.01, 0.01], &settings);
        assert!(!m.converged);
        assert!(m.iterations <= 5);
    }

    #[test]
    fn test_nan_objective_is_repelled() {
        let objective = |x: &[f64]| if x[0] < 0.0 { f64::NAN } else { (x[0] - 0.5).powi(2) };
        let m = NelderMead.minimize(&objective, &[0.1], &[0.2], &MinimizerSettings::default());
        assert!((m.x[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_singular_hessian_reports_no_errors() {
        // Flat along x[1]: the Hessian has a zero row.
        let objective = |x: &[f64]| (x[0] - 1.0).powi(2);
        let m = NelderMead.minimize(&objective, &[0.0, 0.0], &[0.1, 0.1], &MinimizerSettings::default());
        assert!((m.x[0] - 1.0).abs() < 1e-6);
        assert!(m.errors.is_none());
    }
}

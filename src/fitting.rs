//! Least-squares fit of a one dimensional Gaussian.
//!
//! Model: `y = p[0] + p[1] * exp(-(x - p[2])^2 * p[3])`, i.e. baseline,
//! amplitude, center and inverse width squared. Solved with
//! Levenberg-Marquardt.

use nalgebra::{Matrix4, Vector4};
use tracing::debug;

const MAX_ITERATIONS: usize = 200;
const COST_TOLERANCE: f64 = 1e-12;
const STEP_TOLERANCE: f64 = 1e-12;

/// Outcome of a Gaussian fit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianFit {
    /// `[baseline, amplitude, center, inverse_width_squared]`
    pub params: [f64; 4],
    /// Whether the solver converged to finite parameters
    pub success: bool,
    pub iterations: usize,
}

impl GaussianFit {
    pub fn center(&self) -> f64 {
        self.params[2]
    }
}

pub fn gaussian(p: &Vector4<f64>, x: f64) -> f64 {
    let d = x - p[2];
    p[0] + p[1] * (-d * d * p[3]).exp()
}

fn jacobian_row(p: &Vector4<f64>, x: f64) -> Vector4<f64> {
    let d = x - p[2];
    let e = (-d * d * p[3]).exp();
    Vector4::new(1.0, e, 2.0 * p[1] * p[3] * d * e, -p[1] * d * d * e)
}

fn cost(p: &Vector4<f64>, x: &[f64], y: &[f64]) -> f64 {
    x.iter()
        .zip(y)
        .map(|(&xi, &yi)| {
            let r = gaussian(p, xi) - yi;
            r * r
        })
        .sum()
}

/// Fit `y(x)` starting from `initial`. Fewer than four samples, mismatched
/// inputs or a non-converging solve report `success == false` with the best
/// parameters seen.
pub fn fit_gaussian(x: &[f64], y: &[f64], initial: [f64; 4]) -> GaussianFit {
    let mut p = Vector4::from(initial);
    if x.len() != y.len() || x.len() < 4 {
        return GaussianFit {
            params: initial,
            success: false,
            iterations: 0,
        };
    }

    let mut lambda = 1e-3;
    let mut current = cost(&p, x, y);

    for iteration in 1..=MAX_ITERATIONS {
        let mut jtj = Matrix4::<f64>::zeros();
        let mut jtr = Vector4::<f64>::zeros();
        for (&xi, &yi) in x.iter().zip(y) {
            let row = jacobian_row(&p, xi);
            let r = gaussian(&p, xi) - yi;
            jtj += row * row.transpose();
            jtr += row * r;
        }

        // Marquardt scaling, kept positive when a column vanishes.
        let mut accepted = false;
        while lambda < 1e12 {
            let mut damped = jtj;
            for i in 0..4 {
                damped[(i, i)] += lambda * jtj[(i, i)].max(1e-9);
            }

            let step = match damped.lu().solve(&(-jtr)) {
                Some(step) => step,
                None => {
                    lambda *= 10.0;
                    continue;
                }
            };

            let candidate = p + step;
            let candidate_cost = cost(&candidate, x, y);
            if candidate_cost.is_finite() && candidate_cost <= current {
                let improvement = current - candidate_cost;
                let step_norm = step.norm();
                p = candidate;
                lambda = (lambda / 10.0).max(1e-12);
                accepted = true;

                if improvement <= COST_TOLERANCE * current.max(1e-300)
                    || step_norm <= STEP_TOLERANCE * (p.norm() + STEP_TOLERANCE)
                {
                    return finish(p, iteration);
                }
                current = candidate_cost;
                break;
            }
            lambda *= 10.0;
        }

        if !accepted {
            // No downhill step at any damping: already at a minimum.
            return finish(p, iteration);
        }
    }

    debug!("Gaussian fit hit the iteration limit");
    GaussianFit {
        params: p.into(),
        success: false,
        iterations: MAX_ITERATIONS,
    }
}

fn finish(p: Vector4<f64>, iterations: usize) -> GaussianFit {
    GaussianFit {
        success: p.iter().all(|v| v.is_finite()),
        params: p.into(),
        iterations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(params: [f64; 4], xs: &[f64]) -> Vec<f64> {
        let p = Vector4::from(params);
        xs.iter().map(|&x| gaussian(&p, x)).collect()
    }

    #[test]
    fn test_recovers_exact_gaussian() {
        let xs: Vec<f64> = (0..41).map(|i| 49.0 + 0.05 * i as f64).collect();
        let ys = samples([10.0, 100.0, 50.03, 4.0], &xs);

        let fit = fit_gaussian(&xs, &ys, [10.0, 100.0, 50.0, 9.0]);
        assert!(fit.success);
        assert!((fit.center() - 50.03).abs() < 1e-4, "center {}", fit.center());
        assert!((fit.params[3] - 4.0).abs() < 1e-3);
    }

    #[test]
    fn test_too_few_samples_fails() {
        let fit = fit_gaussian(&[1.0, 2.0], &[1.0, 2.0], [0.0, 1.0, 1.5, 9.0]);
        assert!(!fit.success);
        assert_eq!(fit.center(), 1.5);
    }

    #[test]
    fn test_mismatched_lengths_fail() {
        let fit = fit_gaussian(&[1.0, 2.0, 3.0, 4.0], &[1.0], [0.0, 1.0, 2.0, 9.0]);
        assert!(!fit.success);
    }
}

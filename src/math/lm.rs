//! Bounded nonlinear least-squares minimizer.
//!
//! This is the solver capability behind every fit round: damped normal
//! equations (Levenberg-Marquardt) with a forward-difference Jacobian whose
//! columns are evaluated in parallel, bounds enforced by step clamping, and a
//! derivative-free bounded coordinate scan as the `brute` alternative.
//!
//! Design points that matter to the fit core:
//!
//! - the evaluation counter drives a periodic progress callback (roughly
//!   every `progress_every` model evaluations, checked between steps)
//! - covariance is the scaled inverse of `J^T J` at the optimum; when that
//!   matrix is singular the minimizer flags exactly the coefficients that
//!   participate in its null space with an undefined standard error instead
//!   of failing, which is what the refinement controller prunes on
//! - an evaluation budget of 1 yields a pure single evaluation (used for
//!   re-creation passes)

use std::sync::atomic::{AtomicUsize, Ordering};

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::domain::{LossKind, SolverMethod};
use crate::error::AppError;
use crate::math::solve::solve_symmetric;
use crate::math::stats::{chi_square, reduced_chi_square};

/// Box bounds for one free parameter.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bound {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Bound {
    pub fn clamp(&self, v: f64) -> f64 {
        let mut v = v;
        if let Some(lo) = self.min {
            v = v.max(lo);
        }
        if let Some(hi) = self.max {
            v = v.min(hi);
        }
        v
    }

    pub fn is_finite_interval(&self) -> bool {
        matches!((self.min, self.max), (Some(lo), Some(hi)) if lo.is_finite() && hi.is_finite() && hi > lo)
    }
}

/// Solver options for one invocation.
#[derive(Debug, Clone)]
pub struct MinimizeOptions {
    pub method: SolverMethod,
    pub ftol: f64,
    pub gtol: f64,
    pub loss: LossKind,
    pub max_iters: usize,
    /// Model-evaluation budget; 1 forces a single evaluation pass.
    pub max_evals: usize,
    pub verbose: bool,
    /// Progress callback cadence in evaluations.
    pub progress_every: usize,
}

impl Default for MinimizeOptions {
    fn default() -> Self {
        Self {
            method: SolverMethod::Leastsq,
            ftol: 1e-8,
            gtol: 1e-8,
            loss: LossKind::Linear,
            max_iters: 200,
            max_evals: usize::MAX,
            verbose: false,
            progress_every: 1000,
        }
    }
}

/// Result of one solver invocation.
#[derive(Debug, Clone)]
pub struct MinimizeResult {
    /// Free parameters at the optimum, in input order.
    pub params: Vec<f64>,
    /// Model predictions at the optimum.
    pub predictions: Vec<f64>,
    /// Weighted residuals at the optimum.
    pub residuals: Vec<f64>,
    /// Scaled covariance of the free parameters; absent when the fit had no
    /// free parameters or the evaluation budget did not allow computing it.
    pub covariance: Option<DMatrix<f64>>,
    /// Per-parameter standard error; `None` marks an unidentifiable
    /// coefficient (null-space participation or non-finite variance).
    pub stderr: Vec<Option<f64>>,
    pub chisqr: f64,
    pub redchi: f64,
    pub n_evals: usize,
}

/// Minimize the weighted residual between `target` and `eval_fn` output.
///
/// `eval_fn` maps a free-parameter vector to model predictions of the same
/// length as `target`; it must be thread-safe because Jacobian columns are
/// evaluated in parallel. `weights` has one entry per residual element.
pub fn minimize(
    eval_fn: &(dyn Fn(&[f64]) -> Result<Vec<f64>, AppError> + Sync),
    target: &[f64],
    weights: &[f64],
    init: &[f64],
    bounds: &[Bound],
    opts: &MinimizeOptions,
    progress: &mut dyn FnMut(usize, f64),
) -> Result<MinimizeResult, AppError> {
    if weights.len() != target.len() {
        return Err(AppError::new(4, "Weight vector length mismatch."));
    }
    if bounds.len() != init.len() {
        return Err(AppError::new(4, "Bounds vector length mismatch."));
    }

    let evals = AtomicUsize::new(0);
    let evaluate = |x: &[f64]| -> Result<(Vec<f64>, Vec<f64>), AppError> {
        evals.fetch_add(1, Ordering::Relaxed);
        let pred = eval_fn(x)?;
        if pred.len() != target.len() {
            return Err(AppError::new(4, "Model prediction length mismatch."));
        }
        let res: Vec<f64> = pred
            .iter()
            .zip(target.iter())
            .zip(weights.iter())
            .map(|((&p, &t), &w)| w * (t - p))
            .collect();
        Ok((pred, res))
    };

    let x0: Vec<f64> = init
        .iter()
        .zip(bounds.iter())
        .map(|(&v, b)| b.clamp(v))
        .collect();
    let (pred0, res0) = evaluate(&x0)?;

    // No free parameters, or a forced single-pass budget: pure evaluation.
    if x0.is_empty() || opts.max_evals <= 1 {
        let chisqr = chi_square(&res0);
        return Ok(MinimizeResult {
            params: x0,
            predictions: pred0,
            residuals: res0,
            covariance: None,
            stderr: Vec::new(),
            chisqr,
            redchi: reduced_chi_square(chisqr, target.len(), 0),
            n_evals: evals.load(Ordering::Relaxed),
        });
    }

    let x_opt = match opts.method {
        SolverMethod::Leastsq | SolverMethod::LeastSquares => {
            lm_drive(&evaluate, x0, res0, bounds, opts, &evals, progress)?
        }
        SolverMethod::Brute => brute_drive(&evaluate, x0, res0, bounds, opts, &evals, progress)?,
    };

    // Final state and covariance at the optimum.
    let (pred, res) = evaluate(&x_opt)?;
    let chisqr = chi_square(&res);
    let redchi = reduced_chi_square(chisqr, target.len(), x_opt.len());

    let (covariance, stderr) = if evals.load(Ordering::Relaxed) + x_opt.len() <= opts.max_evals {
        let jac = jacobian(&evaluate, &x_opt, &res)?;
        covariance_and_stderr(&jac, redchi, x_opt.len())
    } else {
        (None, vec![None; x_opt.len()])
    };

    Ok(MinimizeResult {
        params: x_opt,
        predictions: pred,
        residuals: res,
        covariance,
        stderr,
        chisqr,
        redchi,
        n_evals: evals.load(Ordering::Relaxed),
    })
}

type Evaluation = (Vec<f64>, Vec<f64>);

/// Levenberg-Marquardt driver with optional robust reweighting.
///
/// Robust losses are handled as a small number of outer IRLS passes: fit with
/// the current robust weights, recompute them from the residuals, refit.
fn lm_drive(
    evaluate: &(dyn Fn(&[f64]) -> Result<Evaluation, AppError> + Sync),
    mut x: Vec<f64>,
    mut res: Vec<f64>,
    bounds: &[Bound],
    opts: &MinimizeOptions,
    evals: &AtomicUsize,
    progress: &mut dyn FnMut(usize, f64),
) -> Result<Vec<f64>, AppError> {
    let n_refits = match opts.loss {
        LossKind::Linear => 1,
        LossKind::Huber | LossKind::SoftL1 => 3,
    };

    let mut robust_w = vec![1.0; res.len()];
    let mut next_progress = opts.progress_every;

    for pass in 0..n_refits {
        if pass > 0 {
            robust_w = robust_weights(&res, opts.loss);
        }

        let mut lambda = 1e-3;
        let mut cost = robust_cost(&res, &robust_w);

        for iter in 0..opts.max_iters {
            if evals.load(Ordering::Relaxed) >= opts.max_evals {
                return Ok(x);
            }

            let jac = jacobian(evaluate, &x, &res)?;
            let p = x.len();
            let m = res.len();

            // Apply sqrt robust weights to rows of J and r.
            let mut jw = jac.clone();
            let mut rw = DVector::from_column_slice(&res);
            for i in 0..m {
                let sw = robust_w[i].sqrt();
                rw[i] *= sw;
                for j in 0..p {
                    jw[(i, j)] *= sw;
                }
            }

            // The Jacobian differentiates the residual, so the descent
            // direction is the negated gradient of the cost.
            let grad = -(jw.transpose() * &rw);
            if grad.amax() < opts.gtol {
                break;
            }
            let a = jw.transpose() * &jw;

            // Damped step with accept/reject on the robust cost.
            let mut stepped = false;
            let mut converged = false;
            while lambda < 1e12 {
                let mut damped = a.clone();
                for j in 0..p {
                    let d = a[(j, j)];
                    damped[(j, j)] = d + lambda * d.max(1e-12);
                }
                let Some(delta) = solve_symmetric(&damped, &grad) else {
                    lambda *= 10.0;
                    continue;
                };

                let trial: Vec<f64> = x
                    .iter()
                    .zip(delta.iter())
                    .zip(bounds.iter())
                    .map(|((&xv, &dv), b)| b.clamp(xv + dv))
                    .collect();
                let (_, trial_res) = evaluate(&trial)?;
                let trial_cost = robust_cost(&trial_res, &robust_w);

                let count = evals.load(Ordering::Relaxed);
                if count >= next_progress {
                    progress(count, chi_square(&trial_res));
                    next_progress += opts.progress_every;
                }

                if trial_cost < cost {
                    let rel_drop = (cost - trial_cost) / cost.max(f64::MIN_POSITIVE);
                    x = trial;
                    res = trial_res;
                    lambda = (lambda * 0.1).max(1e-12);
                    stepped = true;
                    converged = rel_drop < opts.ftol;
                    if opts.verbose {
                        println!("  iter {iter}: cost {trial_cost:.6e}, lambda {lambda:.1e}");
                    }
                    cost = trial_cost;
                    break;
                }
                lambda *= 10.0;
                if evals.load(Ordering::Relaxed) >= opts.max_evals {
                    return Ok(x);
                }
            }

            if !stepped || converged {
                break;
            }
        }
    }

    Ok(x)
}

/// Forward-difference Jacobian of the weighted residual, columns in parallel.
///
/// Column `j` is `d(residual)/d(x_j)`; the step scales with the parameter
/// magnitude.
fn jacobian(
    evaluate: &(dyn Fn(&[f64]) -> Result<Evaluation, AppError> + Sync),
    x: &[f64],
    res: &[f64],
) -> Result<DMatrix<f64>, AppError> {
    let p = x.len();
    let m = res.len();

    let columns: Vec<Result<Vec<f64>, AppError>> = (0..p)
        .into_par_iter()
        .map(|j| {
            let h = 1e-7 * x[j].abs().max(1.0);
            let mut xh = x.to_vec();
            xh[j] += h;
            let (_, res_h) = evaluate(&xh)?;
            Ok(res_h
                .iter()
                .zip(res.iter())
                .map(|(&a, &b)| (a - b) / h)
                .collect())
        })
        .collect();

    let mut jac = DMatrix::zeros(m, p);
    for (j, col) in columns.into_iter().enumerate() {
        let col = col?;
        for i in 0..m {
            jac[(i, j)] = col[i];
        }
    }
    Ok(jac)
}

/// Derivative-free bounded coordinate scan.
///
/// Sweeps each coordinate over a uniform grid inside its bounds, keeping the
/// best candidate (ties broken by lowest grid index), until a full sweep
/// makes no improvement. All free parameters must carry finite bounds.
fn brute_drive(
    evaluate: &(dyn Fn(&[f64]) -> Result<Evaluation, AppError> + Sync),
    mut x: Vec<f64>,
    res0: Vec<f64>,
    bounds: &[Bound],
    opts: &MinimizeOptions,
    evals: &AtomicUsize,
    progress: &mut dyn FnMut(usize, f64),
) -> Result<Vec<f64>, AppError> {
    if let Some(j) = bounds.iter().position(|b| !b.is_finite_interval()) {
        return Err(AppError::new(
            2,
            format!("Method 'brute' requires finite bounds on every free coefficient (parameter index {j})."),
        ));
    }

    const GRID: usize = 21;
    const MAX_SWEEPS: usize = 8;

    let mut best_cost = chi_square(&res0);
    let mut next_progress = opts.progress_every;

    for _ in 0..MAX_SWEEPS {
        let mut improved = false;

        for j in 0..x.len() {
            if evals.load(Ordering::Relaxed) + GRID > opts.max_evals {
                return Ok(x);
            }
            let (lo, hi) = (bounds[j].min.unwrap_or(0.0), bounds[j].max.unwrap_or(0.0));

            let candidates: Vec<(usize, f64, f64)> = (0..GRID)
                .into_par_iter()
                .map(|g| {
                    let u = g as f64 / (GRID - 1) as f64;
                    let v = lo + u * (hi - lo);
                    let mut trial = x.clone();
                    trial[j] = v;
                    let cost = match evaluate(&trial) {
                        Ok((_, r)) => chi_square(&r),
                        Err(_) => f64::INFINITY,
                    };
                    (g, v, cost)
                })
                .collect();

            let mut best = &candidates[0];
            for c in &candidates[1..] {
                if c.2 < best.2 || (c.2 == best.2 && c.0 < best.0) {
                    best = c;
                }
            }

            if best.2 < best_cost {
                x[j] = best.1;
                best_cost = best.2;
                improved = true;
            }

            let count = evals.load(Ordering::Relaxed);
            if count >= next_progress {
                progress(count, best_cost);
                next_progress += opts.progress_every;
            }
        }

        if !improved {
            break;
        }
    }

    Ok(x)
}

/// Robust IRLS weights from the current residuals.
///
/// The scale is MAD-based so a handful of outliers cannot inflate it.
fn robust_weights(residuals: &[f64], loss: LossKind) -> Vec<f64> {
    let mut abs: Vec<f64> = residuals
        .iter()
        .map(|r| r.abs())
        .filter(|v| v.is_finite())
        .collect();
    let mad = median_mut(&mut abs).unwrap_or(0.0);
    let scale = (mad / 0.6745).max(1e-12);
    let delta = 1.345 * scale;

    residuals
        .iter()
        .map(|&r| {
            let ar = r.abs();
            if !ar.is_finite() {
                return 1.0;
            }
            match loss {
                LossKind::Linear => 1.0,
                LossKind::Huber => {
                    if ar <= delta { 1.0 } else { delta / ar }
                }
                LossKind::SoftL1 => {
                    let z = (ar / delta) * (ar / delta);
                    1.0 / (1.0 + z).sqrt()
                }
            }
        })
        .collect()
}

fn robust_cost(residuals: &[f64], robust_w: &[f64]) -> f64 {
    residuals
        .iter()
        .zip(robust_w.iter())
        .map(|(&r, &w)| w * r * r)
        .sum()
}

fn median_mut(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

/// Covariance and per-parameter standard errors at the optimum.
///
/// Covariance is `(J^T J)^-1` scaled by the reduced chi-square. A singular
/// `J^T J` does not fail the fit: the pseudo-inverse is used and every
/// parameter with significant null-space participation gets an undefined
/// standard error.
fn covariance_and_stderr(
    jac: &DMatrix<f64>,
    redchi: f64,
    p: usize,
) -> (Option<DMatrix<f64>>, Vec<Option<f64>>) {
    let a = jac.transpose() * jac;

    if let Some(chol) = a.clone().cholesky() {
        let cov = chol.inverse() * redchi;
        let stderr = (0..p)
            .map(|j| {
                let v = cov[(j, j)];
                if v.is_finite() && v >= 0.0 { Some(v.sqrt()) } else { None }
            })
            .collect();
        return (Some(cov), stderr);
    }

    // Singular normal matrix: pseudo-invert and flag the null space.
    let svd = a.svd(true, true);
    let (Some(u), Some(vt)) = (svd.u.as_ref(), svd.v_t.as_ref()) else {
        return (None, vec![None; p]);
    };
    let smax = svd.singular_values.amax();
    let tol = smax * 1e-12;

    let mut unidentifiable = vec![false; p];
    let mut sinv = DMatrix::zeros(p, p);
    for k in 0..svd.singular_values.len() {
        let s = svd.singular_values[k];
        if s > tol {
            sinv[(k, k)] = 1.0 / s;
        } else {
            // Null-space direction: every parameter it loads on is
            // unconstrained by the data.
            for j in 0..p {
                if vt[(k, j)].abs() > 1e-3 {
                    unidentifiable[j] = true;
                }
            }
        }
    }

    let cov = vt.transpose() * sinv * u.transpose() * redchi;
    let stderr = (0..p)
        .map(|j| {
            if unidentifiable[j] {
                return None;
            }
            let v = cov[(j, j)];
            if v.is_finite() && v >= 0.0 { Some(v.sqrt()) } else { None }
        })
        .collect();
    (Some(cov), stderr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_eval(x: &[f64]) -> Result<Vec<f64>, AppError> {
        // Model: y = a + b * t over t = 0..10
        Ok((0..10).map(|t| x[0] + x[1] * t as f64).collect())
    }

    #[test]
    fn lm_recovers_linear_coefficients() {
        let target: Vec<f64> = (0..10).map(|t| 2.0 + 0.5 * t as f64).collect();
        let weights = vec![1.0; 10];
        let bounds = vec![Bound::default(); 2];
        let mut progress = |_: usize, _: f64| {};

        let result = minimize(
            &line_eval,
            &target,
            &weights,
            &[0.0, 0.0],
            &bounds,
            &MinimizeOptions::default(),
            &mut progress,
        )
        .unwrap();

        assert!((result.params[0] - 2.0).abs() < 1e-5);
        assert!((result.params[1] - 0.5).abs() < 1e-5);
        assert!(result.redchi < 1e-10);
        assert!(result.stderr.iter().all(|s| s.is_some()));
    }

    #[test]
    fn zero_free_parameters_is_a_single_evaluation() {
        let target = vec![1.0; 10];
        let weights = vec![1.0; 10];
        let eval = |_: &[f64]| -> Result<Vec<f64>, AppError> { Ok(vec![0.5; 10]) };
        let mut progress = |_: usize, _: f64| {};

        let result = minimize(
            &eval,
            &target,
            &weights,
            &[],
            &[],
            &MinimizeOptions::default(),
            &mut progress,
        )
        .unwrap();

        assert_eq!(result.n_evals, 1);
        assert!(result.covariance.is_none());
        assert!((result.chisqr - 10.0 * 0.25).abs() < 1e-12);
    }

    #[test]
    fn eval_budget_of_one_never_optimizes() {
        let target: Vec<f64> = (0..10).map(|t| 2.0 + 0.5 * t as f64).collect();
        let weights = vec![1.0; 10];
        let bounds = vec![Bound::default(); 2];
        let opts = MinimizeOptions {
            max_evals: 1,
            ..MinimizeOptions::default()
        };
        let mut progress = |_: usize, _: f64| {};

        let result = minimize(&line_eval, &target, &weights, &[0.1, 0.2], &bounds, &opts, &mut progress).unwrap();
        assert_eq!(result.n_evals, 1);
        assert!((result.params[0] - 0.1).abs() < 1e-15);
        assert!((result.params[1] - 0.2).abs() < 1e-15);
    }

    #[test]
    fn insensitive_parameter_gets_undefined_stderr() {
        // Second parameter never enters the model: its Jacobian column is
        // zero, the normal matrix is singular, and it must be flagged.
        let eval = |x: &[f64]| -> Result<Vec<f64>, AppError> {
            Ok((0..10).map(|t| x[0] * t as f64).collect())
        };
        let target: Vec<f64> = (0..10).map(|t| 1.5 * t as f64).collect();
        let weights = vec![1.0; 10];
        let bounds = vec![Bound::default(); 2];
        let mut progress = |_: usize, _: f64| {};

        let result = minimize(
            &eval,
            &target,
            &weights,
            &[0.0, 0.3],
            &bounds,
            &MinimizeOptions::default(),
            &mut progress,
        )
        .unwrap();

        assert!((result.params[0] - 1.5).abs() < 1e-5);
        assert!(result.stderr[0].is_some());
        assert!(result.stderr[1].is_none());
    }

    #[test]
    fn bounds_are_respected() {
        let target: Vec<f64> = (0..10).map(|t| 2.0 + 0.5 * t as f64).collect();
        let weights = vec![1.0; 10];
        let bounds = vec![
            Bound { min: Some(0.0), max: Some(1.0) },
            Bound { min: Some(0.0), max: Some(1.0) },
        ];
        let mut progress = |_: usize, _: f64| {};

        let result = minimize(
            &line_eval,
            &target,
            &weights,
            &[0.5, 0.5],
            &bounds,
            &MinimizeOptions::default(),
            &mut progress,
        )
        .unwrap();

        // True intercept 2.0 lies outside the box; the solution pins to it.
        assert!(result.params[0] <= 1.0 + 1e-12);
        assert!((result.params[1] - 0.5).abs() < 0.2);
    }

    #[test]
    fn brute_requires_finite_bounds() {
        let target = vec![0.0; 10];
        let weights = vec![1.0; 10];
        let bounds = vec![Bound::default()];
        let opts = MinimizeOptions {
            method: SolverMethod::Brute,
            ..MinimizeOptions::default()
        };
        let mut progress = |_: usize, _: f64| {};

        let eval = |x: &[f64]| -> Result<Vec<f64>, AppError> { Ok(vec![x[0]; 10]) };
        let err = minimize(&eval, &target, &weights, &[0.5], &bounds, &opts, &mut progress).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn brute_scan_finds_the_grid_optimum() {
        let target: Vec<f64> = vec![0.75; 10];
        let weights = vec![1.0; 10];
        let bounds = vec![Bound { min: Some(0.0), max: Some(1.0) }];
        let opts = MinimizeOptions {
            method: SolverMethod::Brute,
            ..MinimizeOptions::default()
        };
        let mut progress = |_: usize, _: f64| {};

        let eval = |x: &[f64]| -> Result<Vec<f64>, AppError> { Ok(vec![x[0]; 10]) };
        let result = minimize(&eval, &target, &weights, &[0.0], &bounds, &opts, &mut progress).unwrap();
        // 21-point grid over [0, 1] contains 0.75 exactly.
        assert!((result.params[0] - 0.75).abs() < 1e-12);
    }

    #[test]
    fn weights_scale_residuals() {
        let target = vec![1.0, 1.0];
        let weights = vec![10.0, 1.0];
        let eval = |_: &[f64]| -> Result<Vec<f64>, AppError> { Ok(vec![0.0, 0.0]) };
        let mut progress = |_: usize, _: f64| {};

        let result = minimize(
            &eval,
            &target,
            &weights,
            &[],
            &[],
            &MinimizeOptions::default(),
            &mut progress,
        )
        .unwrap();
        assert!((result.chisqr - (100.0 + 1.0)).abs() < 1e-12);
    }
}

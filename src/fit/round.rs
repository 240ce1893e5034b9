//! Single fit-round execution.
//!
//! One round takes the registry as it stands, hands the free coefficients to
//! the minimizer against the concatenated Br|Bz|Bphi observation vector, and
//! writes the optimized values and standard errors back. A recreation round
//! freezes everything and spends a single model evaluation, reproducing a
//! stored fit without moving it.

use std::time::Instant;

use nalgebra::DMatrix;

use crate::domain::{FitSessionConfig, LossKind, ScanTable, SolverMethod};
use crate::error::AppError;
use crate::math::lm::{minimize, Bound, MinimizeOptions};
use crate::model::eval::FieldModel;
use crate::params::{ParamKey, Registry};

/// Outcome of one fit round.
#[derive(Debug, Clone)]
pub struct FitOutput {
    /// Deep snapshot of the registry after write-back.
    pub params: Registry,
    /// Free coefficients the solver varied, in registry order.
    pub var_names: Vec<ParamKey>,
    /// Weighted residuals at the optimum.
    pub residuals: Vec<f64>,
    /// Model predictions at the optimum (concatenated Br|Bz|Bphi).
    pub predictions: Vec<f64>,
    pub covariance: Option<DMatrix<f64>>,
    pub chisqr: f64,
    pub redchi: f64,
    pub n_evals: usize,
    /// Wall-clock seconds spent in the solver.
    pub elapsed: f64,
}

/// Run one fit round over the current registry.
///
/// With `recreate` set the round works on an all-frozen copy and the caller's
/// registry is left untouched.
pub fn run_round(
    registry: &mut Registry,
    model: &dyn FieldModel,
    table: &ScanTable,
    config: &FitSessionConfig,
    recreate: bool,
) -> Result<FitOutput, AppError> {
    if table.is_empty() {
        return Err(AppError::new(3, "Scan table is empty; nothing to fit."));
    }

    let mut working = registry.clone();
    if recreate {
        let keys: Vec<ParamKey> = working.free_keys();
        for key in &keys {
            if let Some(rec) = working.get_mut(key) {
                rec.vary = false;
            }
        }
    }

    let target = table.observed_vector();
    let weight = config.noise.map(|s| 1.0 / s).unwrap_or(1.0);
    let weights = vec![weight; target.len()];

    let keys = working.free_keys();
    let mut init = Vec::with_capacity(keys.len());
    let mut bounds = Vec::with_capacity(keys.len());
    for key in &keys {
        let rec = working
            .get(key)
            .ok_or_else(|| AppError::new(4, format!("Missing coefficient '{key}'.")))?;
        init.push(rec.value);
        bounds.push(Bound {
            min: rec.min,
            max: rec.max,
        });
    }

    let opts = solver_options(config, recreate);

    let base = working.clone();
    let eval = |x: &[f64]| -> Result<Vec<f64>, AppError> {
        let mut scratch = base.clone();
        scratch.set_free_values(&keys, x)?;
        model.predict(&scratch)
    };

    let started = Instant::now();
    let mut progress = |n_evals: usize, chisqr: f64| {
        println!("  {n_evals} evaluations, chi-square {chisqr:.6e}");
    };
    let result = minimize(&eval, &target, &weights, &init, &bounds, &opts, &mut progress)?;
    let elapsed = started.elapsed().as_secs_f64();

    // Write back values and standard errors.
    working.set_free_values(&keys, &result.params)?;
    for (j, key) in keys.iter().enumerate() {
        if let Some(rec) = working.get_mut(key) {
            rec.stderr = result.stderr.get(j).copied().flatten();
        }
    }
    if !recreate {
        *registry = working.clone();
    }

    Ok(FitOutput {
        params: working,
        var_names: keys,
        residuals: result.residuals,
        predictions: result.predictions,
        covariance: result.covariance,
        chisqr: result.chisqr,
        redchi: result.redchi,
        n_evals: result.n_evals,
        elapsed,
    })
}

/// Map session settings onto solver options.
///
/// `leastsq` and `brute` run with default tolerances; `least_squares` is the
/// variant that honors the configured tolerances, robust loss, and verbose
/// iteration reporting.
fn solver_options(config: &FitSessionConfig, recreate: bool) -> MinimizeOptions {
    let mut opts = match config.method {
        SolverMethod::Leastsq | SolverMethod::Brute => MinimizeOptions {
            method: config.method,
            loss: LossKind::Linear,
            ..MinimizeOptions::default()
        },
        SolverMethod::LeastSquares => MinimizeOptions {
            method: config.method,
            ftol: config.ftol,
            gtol: config.gtol,
            loss: config.loss,
            verbose: true,
            ..MinimizeOptions::default()
        },
    };
    if recreate {
        opts.max_evals = 1;
    }
    opts
}

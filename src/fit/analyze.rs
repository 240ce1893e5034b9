//! Post-fit analysis: derived columns and the correlation artifact.
//!
//! The analyzer never re-fits. It splits the solver's concatenated prediction
//! vector back into per-component columns, attaches them to the scan table,
//! optionally derives cartesian components and per-sample prediction
//! uncertainty, and condenses the covariance into a correlation artifact for
//! persistence.

use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::{FieldColumns, ScanTable};
use crate::error::AppError;
use crate::fit::round::FitOutput;
use crate::math::stats::correlation_from_covariance;
use crate::model::eval::FieldModel;

/// Split a concatenated Br|Bz|Bphi vector into component columns.
pub fn split_components(flat: &[f64]) -> Result<FieldColumns, AppError> {
    if flat.len() % 3 != 0 {
        return Err(AppError::new(
            4,
            "Component vector length is not divisible by three.",
        ));
    }
    let n = flat.len() / 3;
    Ok(FieldColumns {
        br: flat[..n].to_vec(),
        bz: flat[n..2 * n].to_vec(),
        bphi: flat[2 * n..].to_vec(),
    })
}

/// Attach fitted columns to the scan table.
///
/// For cartesian-native scans the horizontal components are also derived by
/// rotating the fitted cylindrical components at each sample's azimuth.
pub fn merge_fit_columns(
    table: &mut ScanTable,
    output: &FitOutput,
    cartesian: bool,
) -> Result<(), AppError> {
    let fit = split_components(&output.predictions)?;
    if fit.br.len() != table.len() {
        return Err(AppError::new(
            4,
            "Fitted columns do not match the scan length.",
        ));
    }

    if cartesian {
        let mut bx = Vec::with_capacity(table.len());
        let mut by = Vec::with_capacity(table.len());
        for (i, s) in table.samples.iter().enumerate() {
            let (c, si) = (s.phi.cos(), s.phi.sin());
            bx.push(fit.br[i] * c - fit.bphi[i] * si);
            by.push(fit.br[i] * si + fit.bphi[i] * c);
        }
        table.cart_fit = Some((bx, by));
    }

    table.fit = Some(fit);
    Ok(())
}

/// Per-sample prediction uncertainty from the parameter covariance.
///
/// For each fitted coefficient a forward-difference sensitivity column is
/// built around the optimum; the prediction variance is the quadratic form
/// of those sensitivities with the covariance. Returns `None` when the round
/// produced no covariance (nothing varied, or the budget ran out).
pub fn prediction_uncertainty(
    model: &dyn FieldModel,
    output: &FitOutput,
) -> Result<Option<FieldColumns>, AppError> {
    let Some(ref cov) = output.covariance else {
        return Ok(None);
    };
    let p = output.var_names.len();
    let m = output.predictions.len();
    if p == 0 {
        return Ok(None);
    }

    let columns: Vec<Result<Vec<f64>, AppError>> = output
        .var_names
        .par_iter()
        .map(|key| {
            let mut scratch = output.params.clone();
            let rec = scratch
                .get_mut(key)
                .ok_or_else(|| AppError::new(4, format!("Missing coefficient '{key}'.")))?;
            let h = 1e-7 * rec.value.abs().max(1.0);
            rec.value += h;
            let perturbed = model.predict(&scratch)?;
            Ok(perturbed
                .iter()
                .zip(output.predictions.iter())
                .map(|(&a, &b)| (a - b) / h)
                .collect())
        })
        .collect();

    let mut g = DMatrix::zeros(m, p);
    for (j, col) in columns.into_iter().enumerate() {
        let col = col?;
        for i in 0..m {
            g[(i, j)] = col[i];
        }
    }

    // var_i = (G cov G^T)_ii, computed row by row.
    let gc = &g * cov;
    let mut unc = Vec::with_capacity(m);
    for i in 0..m {
        let mut v = 0.0;
        for j in 0..p {
            v += gc[(i, j)] * g[(i, j)];
        }
        unc.push(if v.is_finite() && v >= 0.0 { v.sqrt() } else { f64::NAN });
    }
    split_components(&unc).map(Some)
}

/// Persisted correlation artifact: the fitted coefficient names with their
/// covariance and correlation matrices, unit diagonal guaranteed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationArtifact {
    pub variable_names: Vec<String>,
    pub covariance: Vec<Vec<f64>>,
    pub correlation: Vec<Vec<f64>>,
}

/// Build the correlation artifact for a completed round.
///
/// Fails with a human-readable reason when the round carries no covariance or
/// the covariance cannot be normalized; the persistence layer decides what to
/// do with the failure.
pub fn correlation_artifact(output: &FitOutput) -> Result<CorrelationArtifact, String> {
    let cov = output
        .covariance
        .as_ref()
        .ok_or_else(|| "the fit produced no covariance estimate".to_string())?;
    let correl = correlation_from_covariance(cov)?;

    let to_rows = |mat: &DMatrix<f64>| -> Vec<Vec<f64>> {
        (0..mat.nrows())
            .map(|i| (0..mat.ncols()).map(|j| mat[(i, j)]).collect())
            .collect()
    };

    Ok(CorrelationArtifact {
        variable_names: output.var_names.iter().map(|k| k.name()).collect(),
        covariance: to_rows(cov),
        correlation: to_rows(&correl),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Sample;
    use crate::params::Registry;

    fn output_with(predictions: Vec<f64>, covariance: Option<DMatrix<f64>>) -> FitOutput {
        FitOutput {
            params: Registry::new(),
            var_names: vec![],
            residuals: vec![],
            predictions,
            covariance,
            chisqr: 0.0,
            redchi: 0.0,
            n_evals: 1,
            elapsed: 0.0,
        }
    }

    #[test]
    fn split_round_trips_the_concatenation() {
        let flat = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let cols = split_components(&flat).unwrap();
        assert_eq!(cols.br, vec![1.0, 2.0]);
        assert_eq!(cols.bz, vec![3.0, 4.0]);
        assert_eq!(cols.bphi, vec![5.0, 6.0]);

        let mut back = cols.br.clone();
        back.extend(cols.bz.clone());
        back.extend(cols.bphi.clone());
        assert_eq!(back, flat);
    }

    #[test]
    fn split_rejects_misshapen_vectors() {
        let err = split_components(&[1.0, 2.0]).unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn merge_derives_cartesian_components() {
        let phi = std::f64::consts::FRAC_PI_2;
        let samples = vec![Sample {
            z: 0.0,
            r: 1.0,
            phi,
            x: 0.0,
            y: 1.0,
            br: 0.0,
            bz: 0.0,
            bphi: 0.0,
        }];
        let mut table = crate::domain::ScanTable::new(samples);

        // Br = 1, Bphi = 0 at phi = pi/2 rotates to Bx = 0, By = 1.
        let out = output_with(vec![1.0, 0.0, 0.0], None);
        merge_fit_columns(&mut table, &out, true).unwrap();

        let (bx, by) = table.cart_fit.as_ref().unwrap();
        assert!(bx[0].abs() < 1e-12);
        assert!((by[0] - 1.0).abs() < 1e-12);
        assert!(table.fit.is_some());
    }

    #[test]
    fn correlation_artifact_requires_a_covariance() {
        let out = output_with(vec![0.0, 0.0, 0.0], None);
        let err = correlation_artifact(&out).unwrap_err();
        assert!(err.contains("no covariance"));
    }

    #[test]
    fn correlation_artifact_has_unit_diagonal() {
        use crate::params::{ParamKey, ParamRecord};
        let mut params = Registry::new();
        params.add(ParamKey::Cart { index: 1 }, ParamRecord::free(1.0));
        params.add(ParamKey::Cart { index: 2 }, ParamRecord::free(2.0));

        let mut out = output_with(vec![0.0; 3], Some(DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 9.0])));
        out.params = params;
        out.var_names = vec![ParamKey::Cart { index: 1 }, ParamKey::Cart { index: 2 }];

        let art = correlation_artifact(&out).unwrap();
        assert_eq!(art.variable_names, vec!["k1", "k2"]);
        assert!((art.correlation[0][0] - 1.0).abs() < 1e-12);
        assert!((art.correlation[1][1] - 1.0).abs() < 1e-12);
        assert!((art.correlation[0][1] - 1.0 / 6.0).abs() < 1e-12);
    }
}

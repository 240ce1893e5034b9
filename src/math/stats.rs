//! Fit-quality statistics and covariance post-processing.

use nalgebra::DMatrix;

/// Sum of squared (weighted) residuals.
pub fn chi_square(residuals: &[f64]) -> f64 {
    residuals.iter().map(|r| r * r).sum()
}

/// Chi-square normalized by degrees of freedom. With no remaining degrees of
/// freedom the chi-square itself is returned.
pub fn reduced_chi_square(chisqr: f64, n_data: usize, n_free: usize) -> f64 {
    let dof = n_data.saturating_sub(n_free);
    if dof == 0 { chisqr } else { chisqr / dof as f64 }
}

/// Derive the correlation matrix from a covariance matrix.
///
/// Fails with a reason when any diagonal entry is non-positive or non-finite
/// (singular covariance); the caller decides how to surface that. The result
/// has a unit diagonal by construction.
pub fn correlation_from_covariance(cov: &DMatrix<f64>) -> Result<DMatrix<f64>, String> {
    let n = cov.nrows();
    if n == 0 || cov.ncols() != n {
        return Err("covariance matrix is empty or not square".to_string());
    }

    let mut sigma = Vec::with_capacity(n);
    for i in 0..n {
        let d = cov[(i, i)];
        if !d.is_finite() || d <= 0.0 {
            return Err(format!("covariance diagonal entry {i} is not positive ({d})"));
        }
        sigma.push(d.sqrt());
    }

    let mut correl = DMatrix::identity(n, n);
    for i in 0..n {
        for j in 0..n {
            if i != j {
                let c = cov[(i, j)] / (sigma[i] * sigma[j]);
                if !c.is_finite() {
                    return Err(format!("correlation entry ({i}, {j}) is not finite"));
                }
                correl[(i, j)] = c;
            }
        }
    }
    Ok(correl)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chi_square_sums_squares() {
        assert!((chi_square(&[1.0, -2.0, 3.0]) - 14.0).abs() < 1e-12);
    }

    #[test]
    fn reduced_chi_square_divides_by_dof() {
        assert!((reduced_chi_square(10.0, 7, 2) - 2.0).abs() < 1e-12);
        // No remaining degrees of freedom: fall back to chi-square itself.
        assert!((reduced_chi_square(10.0, 2, 2) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn correlation_has_unit_diagonal() {
        let cov = DMatrix::from_row_slice(2, 2, &[4.0, 2.0, 2.0, 9.0]);
        let c = correlation_from_covariance(&cov).unwrap();
        assert!((c[(0, 0)] - 1.0).abs() < 1e-12);
        assert!((c[(1, 1)] - 1.0).abs() < 1e-12);
        assert!((c[(0, 1)] - 2.0 / 6.0).abs() < 1e-12);
        assert!((c[(0, 1)] - c[(1, 0)]).abs() < 1e-12);
    }

    #[test]
    fn singular_covariance_is_rejected_with_reason() {
        let cov = DMatrix::from_row_slice(2, 2, &[4.0, 0.0, 0.0, 0.0]);
        let err = correlation_from_covariance(&cov).unwrap_err();
        assert!(err.contains("not positive"));
    }
}

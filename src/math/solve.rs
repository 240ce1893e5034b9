//! Linear solves for the minimizer's normal equations.
//!
//! The damped system `(J^T J + lambda diag(J^T J)) delta = J^T r` is symmetric
//! positive semi-definite, so we try Cholesky first and fall back to an SVD
//! solve with progressively looser tolerances when the matrix is too
//! ill-conditioned. High-order harmonic expansions routinely produce nearly
//! collinear columns, so the fallback path is exercised in practice.

use nalgebra::{DMatrix, DVector};

/// Solve a symmetric system, Cholesky first, SVD tolerance ladder second.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_symmetric(a: &DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    if let Some(chol) = a.clone().cholesky() {
        let x = chol.solve(b);
        if x.iter().all(|v| v.is_finite()) {
            return Some(x);
        }
    }

    let svd = a.clone().svd(true, true);
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(x) = svd.solve(b, tol) {
            if x.iter().all(|v| v.is_finite()) {
                return Some(x);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solves_well_conditioned_system() {
        // A = [[2, 0], [0, 3]], b = [4, 9] -> x = [2, 3]
        let a = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 3.0]);
        let b = DVector::from_row_slice(&[4.0, 9.0]);
        let x = solve_symmetric(&a, &b).unwrap();
        assert!((x[0] - 2.0).abs() < 1e-12);
        assert!((x[1] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn singular_system_falls_back_to_svd() {
        // Rank-1 matrix; Cholesky fails, SVD finds the least-norm solution.
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let b = DVector::from_row_slice(&[2.0, 2.0]);
        let x = solve_symmetric(&a, &b).unwrap();
        assert!((x[0] + x[1] - 2.0).abs() < 1e-8);
    }
}

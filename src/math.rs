// src/math.rs

//! Dense matrix helpers shared by the optimizer components.

use crate::error::{IcaError, Result};
use crate::faer_ndarray::{FaerEigh, FaerInverse};
use faer::Side;
use ndarray::{Array1, Array2};

/// Relative eigenvalue floor of `W·Wᵀ` below which `W` is treated as singular.
pub const SINGULARITY_RATIO: f64 = 1e-12;

/// Symmetric decorrelation: W <- (W · W^T)^{-1/2} · W
///
/// This is the polar retraction onto the orthogonal group: the rows of the
/// result are orthonormal.
pub fn sym_decorrelation(w: &Array2<f64>) -> Result<Array2<f64>> {
    let ww_t = w.dot(&w.t());
    let (eigenvalues, eigenvectors) = ww_t.eigh(Side::Lower)?;

    let min_eigenvalue = eigenvalues.iter().cloned().fold(f64::INFINITY, f64::min);
    if min_eigenvalue < 1e-10 {
        return Err(IcaError::degenerate(format!(
            "symmetric decorrelation of a rank-deficient matrix (min eigenvalue {min_eigenvalue:.3e})"
        )));
    }

    let s_inv_sqrt = eigenvalues.mapv(|v| 1.0 / v.sqrt());

    // (U · diag(1/sqrt(s)) · U^T) · W
    let scaled = &eigenvectors * &s_inv_sqrt;
    Ok(scaled.dot(&eigenvectors.t()).dot(w))
}

/// Compute matrix exponential using a scaled Taylor series.
///
/// Applied to skew-symmetric matrices this yields the exact rotation used by
/// the orthogonal updates.
pub fn matrix_exp(a: &Array2<f64>) -> Array2<f64> {
    let n = a.nrows();

    // Infinity norm bounds the spectral radius.
    let norm = a
        .rows()
        .into_iter()
        .map(|row| row.iter().map(|x| x.abs()).sum::<f64>())
        .fold(0.0, f64::max);
    if norm < 1e-15 {
        return Array2::eye(n);
    }

    let s = norm.log2().ceil().max(0.0) as i32;
    let a_scaled = a / 2.0_f64.powi(s);

    let mut result = Array2::eye(n);
    let mut term = Array2::eye(n);
    for k in 1..=30 {
        term = term.dot(&a_scaled) / (k as f64);
        result = &result + &term;

        if max_abs(&term) < 1e-17 {
            break;
        }
    }

    // Undo scaling by repeated squaring.
    for _ in 0..s {
        result = result.dot(&result);
    }

    result
}

/// Make a matrix skew-symmetric: A <- (A - A^T) / 2
pub fn skew_symmetric(a: &Array2<f64>) -> Array2<f64> {
    (a - &a.t()) / 2.0
}

/// Eigenvalues of `W·Wᵀ` (ascending), failing when `W` is numerically singular.
fn gram_spectrum(w: &Array2<f64>) -> Result<Array1<f64>> {
    if w.iter().any(|v| !v.is_finite()) {
        return Err(IcaError::degenerate("non-finite entry in unmixing matrix"));
    }
    let (eigenvalues, _) = w.dot(&w.t()).eigh(Side::Lower)?;
    let largest = eigenvalues.iter().cloned().fold(0.0, f64::max);
    let smallest = eigenvalues.iter().cloned().fold(f64::INFINITY, f64::min);
    if largest <= 0.0 || smallest <= SINGULARITY_RATIO * largest {
        return Err(IcaError::degenerate(format!(
            "unmixing matrix is near singular (gram eigenvalues {smallest:.3e} / {largest:.3e})"
        )));
    }
    Ok(eigenvalues)
}

/// `log|det W|`, computed as `½ Σ ln λ(W·Wᵀ)` so it never over- or underflows.
pub fn log_abs_det(w: &Array2<f64>) -> Result<f64> {
    let eigenvalues = gram_spectrum(w)?;
    Ok(0.5 * eigenvalues.iter().map(|v| v.ln()).sum::<f64>())
}

/// Inverse of a square matrix.
///
/// Numerically singular matrices are `Degenerate`; the inverse itself comes
/// from an LU solve, so its accuracy follows `cond(W)` and not `cond(W)²`.
pub fn inverse(w: &Array2<f64>) -> Result<Array2<f64>> {
    if w.nrows() != w.ncols() {
        return Err(IcaError::InvalidDimensions {
            message: format!("cannot invert a {}x{} matrix", w.nrows(), w.ncols()),
        });
    }
    gram_spectrum(w)?;
    Ok(w.lu_inverse()?)
}

/// `max |W·Wᵀ − I|`, the drift of `W` away from the orthogonal group.
pub fn orthogonality_error(w: &Array2<f64>) -> f64 {
    let ww_t = w.dot(&w.t());
    let eye = Array2::<f64>::eye(w.nrows());
    max_abs(&(&ww_t - &eye))
}

/// Frobenius inner product `Σ a_ij b_ij`.
pub fn frobenius_inner(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Largest absolute entry.
pub fn max_abs(a: &Array2<f64>) -> f64 {
    a.iter().fold(0.0f64, |acc, &x| acc.max(x.abs()))
}

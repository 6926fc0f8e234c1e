// src/faer_ndarray.rs

//! Bridge between `ndarray` containers and faer's dense decompositions.

use faer::diag::DiagRef;
use faer::linalg::solvers::Solve;
use faer::{Mat, MatRef, Side};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum FaerLinalgError {
    #[error("Self-adjoint eigendecomposition failed: {0}")]
    SelfAdjointEigen(String),
    #[error("Matrix contains non-finite entries")]
    NonFinite,
    #[error("Expected a square matrix, got {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },
    #[error("LU solve produced non-finite entries; the matrix is singular")]
    Singular,
}

fn array_to_mat<S: Data<Elem = f64>>(array: &ArrayBase<S, Ix2>) -> Mat<f64> {
    Mat::from_fn(array.nrows(), array.ncols(), |i, j| array[[i, j]])
}

fn mat_to_array(mat: MatRef<'_, f64>) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros((mat.nrows(), mat.ncols()));
    for j in 0..mat.ncols() {
        for i in 0..mat.nrows() {
            out[[i, j]] = mat[(i, j)];
        }
    }
    out
}

fn diag_to_array(diag: DiagRef<'_, f64>) -> Array1<f64> {
    let mat = diag.column_vector().as_mat();
    let mut out = Array1::<f64>::zeros(mat.nrows());
    for i in 0..mat.nrows() {
        out[i] = mat[(i, 0)];
    }
    out
}

/// Symmetric eigendecomposition of an ndarray matrix.
///
/// Eigenvalues come back in ascending order, eigenvectors as columns.
pub trait FaerEigh {
    fn eigh(&self, side: Side) -> Result<(Array1<f64>, Array2<f64>), FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerEigh for ArrayBase<S, Ix2> {
    fn eigh(&self, side: Side) -> Result<(Array1<f64>, Array2<f64>), FaerLinalgError> {
        // faer does not guard against NaN input; reject it up front.
        if self.iter().any(|v| !v.is_finite()) {
            return Err(FaerLinalgError::NonFinite);
        }
        let mat = array_to_mat(self);
        let eigen = mat
            .as_ref()
            .self_adjoint_eigen(side)
            .map_err(|e| FaerLinalgError::SelfAdjointEigen(format!("{e:?}")))?;
        let values = diag_to_array(eigen.S());
        let vectors = mat_to_array(eigen.U());
        Ok((values, vectors))
    }
}

/// Inverse of a square ndarray matrix from a partially pivoted LU factorization.
pub trait FaerInverse {
    fn lu_inverse(&self) -> Result<Array2<f64>, FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerInverse for ArrayBase<S, Ix2> {
    fn lu_inverse(&self) -> Result<Array2<f64>, FaerLinalgError> {
        let (rows, cols) = self.dim();
        if rows != cols {
            return Err(FaerLinalgError::NotSquare { rows, cols });
        }
        if self.iter().any(|v| !v.is_finite()) {
            return Err(FaerLinalgError::NonFinite);
        }
        let mat = array_to_mat(self);
        let lu = mat.as_ref().partial_piv_lu();
        let identity = Mat::<f64>::identity(rows, rows);
        let solved = lu.solve(identity.as_ref());
        let inverse = mat_to_array(solved.as_ref());
        if inverse.iter().any(|v| !v.is_finite()) {
            return Err(FaerLinalgError::Singular);
        }
        Ok(inverse)
    }
}

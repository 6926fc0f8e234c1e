// src/whitening.rs

//! Data preprocessing: centering and whitening.

use crate::error::{IcaError, Result};
use crate::faer_ndarray::FaerEigh;
use crate::math::max_abs;
use faer::Side;
use ndarray::{Array1, Array2, Axis};

/// Distance from the identity below which a covariance counts as already white.
const WHITE_TOL: f64 = 1e-10;

/// Result of whitening transformation.
#[derive(Debug, Clone)]
pub struct Whitening {
    /// Whitened data matrix (n_components × n_samples).
    pub data: Array2<f64>,
    /// Whitening matrix K (n_components × n_features).
    pub matrix: Array2<f64>,
    /// Pseudo-inverse of K (n_features × n_components).
    pub dewhitening: Array2<f64>,
    /// Retained covariance eigenvalues, in descending order.
    pub eigenvalues: Array1<f64>,
}

/// Center the data by subtracting the mean of each row.
///
/// # Arguments
/// * `x` - Data matrix of shape (n_features, n_samples)
///
/// # Returns
/// * Tuple of (centered_data, mean_vector)
pub fn center(x: &Array2<f64>) -> (Array2<f64>, Array1<f64>) {
    let mean = x
        .mean_axis(Axis(1))
        .unwrap_or_else(|| Array1::zeros(x.nrows()));
    let centered = x - &mean.view().insert_axis(Axis(1));
    (centered, mean)
}

/// Whiten centered data with PCA.
///
/// Builds `K = D^{-1/2}·Vᵀ` from the covariance eigenpairs `(V, D)` sorted by
/// descending eigenvalue, keeping the leading `n_components`.
///
/// # Errors
/// * `RankDeficiency` when the smallest retained eigenvalue is below
///   `rank_tol` times the largest one.
pub fn whiten(x: &Array2<f64>, n_components: usize, rank_tol: f64) -> Result<Whitening> {
    let (n_features, n_samples) = x.dim();

    if n_components == 0 || n_components > n_features {
        return Err(IcaError::InvalidDimensions {
            message: format!(
                "n_components ({}) must be between 1 and n_features ({})",
                n_components, n_features
            ),
        });
    }
    if n_samples < n_features {
        return Err(IcaError::InvalidDimensions {
            message: format!(
                "need at least as many samples ({}) as channels ({})",
                n_samples, n_features
            ),
        });
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(IcaError::InvalidDimensions {
            message: "input contains non-finite values".into(),
        });
    }

    let covariance = x.dot(&x.t()) / n_samples as f64;

    if n_components == n_features
        && max_abs(&(&covariance - &Array2::<f64>::eye(n_features))) < WHITE_TOL
    {
        log::debug!("[lbfgs-ica] input is already white; using the identity transform");
        return Ok(Whitening {
            data: x.clone(),
            matrix: Array2::eye(n_features),
            dewhitening: Array2::eye(n_features),
            eigenvalues: Array1::ones(n_features),
        });
    }

    let (values, vectors) = covariance.eigh(Side::Lower)?;

    // faer returns ascending eigenvalues
    let order: Vec<usize> = (0..n_features).rev().take(n_components).collect();
    let largest = values[order[0]];
    let smallest = values[order[n_components - 1]];
    if !(largest > 0.0) || smallest < rank_tol * largest {
        return Err(IcaError::RankDeficiency { smallest, largest });
    }

    let mut k = Array2::zeros((n_components, n_features));
    let mut dewhitening = Array2::zeros((n_features, n_components));
    let mut eigenvalues = Array1::zeros(n_components);
    for (row, &idx) in order.iter().enumerate() {
        let d = values[idx];
        eigenvalues[row] = d;
        let inv_sqrt = 1.0 / d.sqrt();
        let sqrt = d.sqrt();

        // Enforce a fixed sign: the largest-magnitude entry of each row is positive.
        let column = vectors.column(idx);
        let pivot = column
            .iter()
            .cloned()
            .fold(0.0f64, |acc, v| if v.abs() > acc.abs() { v } else { acc });
        let flip = if pivot < 0.0 { -1.0 } else { 1.0 };

        for j in 0..n_features {
            k[[row, j]] = flip * column[j] * inv_sqrt;
            dewhitening[[j, row]] = flip * column[j] * sqrt;
        }
    }

    let data = k.dot(x);

    Ok(Whitening {
        data,
        matrix: k,
        dewhitening,
        eigenvalues,
    })
}

// src/objective.rs

//! ICA loss and its relative gradient.
//!
//! The unmixing matrix is updated multiplicatively, `W <- (I + E)·W` (or
//! `expm(E)·W` on the orthogonal group), so gradients are taken with respect
//! to `E` at `E = 0`: the relative gradient `E[ψ(Y)·Yᵀ] − I`. The Euclidean
//! gradient with respect to `W` is `G_rel·W^{-T}`.

use crate::density::{Density, Nonlinearity};
use crate::error::{IcaError, Result};
use crate::math::{log_abs_det, max_abs, skew_symmetric};
use ndarray::{Array1, Array2, Axis};

/// Raw density statistics of the current sources, before sign handling.
pub struct ScoreStats {
    /// `ψ'(Y)`, same shape as `Y`.
    pub score_der: Array2<f64>,
    /// Unsigned `E[ψ(Y)·Yᵀ]`.
    pub relative: Array2<f64>,
    /// `E[ψ'(y_i)]` per component.
    pub score_der_mean: Array1<f64>,
    /// `E[y_i²]` per component.
    pub second_moment: Array1<f64>,
}

impl ScoreStats {
    /// `E[ψ(y_i)·y_i]` per component.
    pub fn score_moment(&self) -> Array1<f64> {
        self.relative.diag().to_owned()
    }
}

/// Second-order statistics handed to the preconditioner.
#[derive(Debug, Clone)]
pub struct CurvatureStats {
    /// Signed `E[ψ'(y_i)]`.
    pub score_der_mean: Array1<f64>,
    /// Signed `E[ψ'(y_i)·y_j²]`; only computed for the general (non-orthogonal) problem.
    pub score_der_cross: Option<Array2<f64>>,
    /// `E[y_i²]`.
    pub second_moment: Array1<f64>,
    /// Diagonal of the signed relative gradient, `E[s_i·ψ(y_i)·y_i]`.
    pub gradient_diag: Array1<f64>,
}

/// Projected relative gradient at the current iterate.
pub struct Gradient {
    /// Skew part (orthogonal problem) or `G − I` (general problem).
    pub projected: Array2<f64>,
    /// Max-abs entry of `projected`.
    pub norm: f64,
    pub curvature: CurvatureStats,
}

/// Loss and gradient evaluator for a fixed nonlinearity and problem geometry.
#[derive(Clone)]
pub struct Objective<'a> {
    density: &'a Nonlinearity,
    ortho: bool,
    extended: bool,
}

impl<'a> Objective<'a> {
    pub fn new(density: &'a Nonlinearity, ortho: bool, extended: bool) -> Self {
        Self {
            density,
            ortho,
            extended,
        }
    }

    pub fn ortho(&self) -> bool {
        self.ortho
    }

    /// Negative log-likelihood of `Y = W·X`.
    ///
    /// `Σ_i s_i·E[G(y_i)]`, plus `½E[y_i²]` per component for the extended
    /// general problem, minus `log|det W|` for the general problem.
    pub fn loss(&self, y: &Array2<f64>, w: &Array2<f64>, signs: &Array1<f64>) -> Result<f64> {
        let mut loss = if self.ortho { 0.0 } else { -log_abs_det(w)? };

        let t = y.ncols() as f64;
        for (i, row) in y.rows().into_iter().enumerate() {
            loss += signs[i] * self.density.mean_log_lik(row);
            if self.extended && !self.ortho {
                loss += 0.5 * row.iter().map(|v| v * v).sum::<f64>() / t;
            }
        }

        if !loss.is_finite() {
            return Err(IcaError::degenerate("non-finite loss"));
        }
        Ok(loss)
    }

    /// Density statistics of `Y`.
    pub fn score_stats(&self, y: &Array2<f64>) -> Result<ScoreStats> {
        let t = y.ncols() as f64;
        let (score, score_der) = self.density.score_and_der_matrix(y);
        let relative = score.dot(&y.t()) / t;
        let score_der_mean = score_der.sum_axis(Axis(1)) / t;
        let second_moment = y.mapv(|v| v * v).sum_axis(Axis(1)) / t;

        let finite = relative.iter().all(|v| v.is_finite())
            && score_der_mean.iter().all(|v| v.is_finite())
            && second_moment.iter().all(|v| v.is_finite());
        if !finite {
            return Err(IcaError::degenerate("non-finite density statistics"));
        }

        Ok(ScoreStats {
            score_der,
            relative,
            score_der_mean,
            second_moment,
        })
    }

    /// Signed, projected relative gradient and the curvature statistics.
    pub fn gradient(
        &self,
        y: &Array2<f64>,
        stats: ScoreStats,
        signs: &Array1<f64>,
    ) -> Result<Gradient> {
        let n = y.nrows();
        let t = y.ncols() as f64;
        let ScoreStats {
            mut score_der,
            mut relative,
            second_moment,
            ..
        } = stats;

        for (i, &s) in signs.iter().enumerate() {
            relative.row_mut(i).mapv_inplace(|v| v * s);
            score_der.row_mut(i).mapv_inplace(|v| v * s);
        }

        if self.extended && !self.ortho {
            relative = relative + y.dot(&y.t()) / t;
            score_der.mapv_inplace(|v| v + 1.0);
        }

        let score_der_mean = score_der.sum_axis(Axis(1)) / t;
        let score_der_cross = if self.ortho {
            None
        } else {
            Some(score_der.dot(&y.mapv(|v| v * v).t()) / t)
        };
        let gradient_diag = relative.diag().to_owned();

        let projected = if self.ortho {
            skew_symmetric(&relative)
        } else {
            relative - Array2::<f64>::eye(n)
        };

        if projected.iter().any(|v| !v.is_finite()) {
            return Err(IcaError::degenerate("non-finite gradient"));
        }

        Ok(Gradient {
            norm: max_abs(&projected),
            projected,
            curvature: CurvatureStats {
                score_der_mean,
                score_der_cross,
                second_moment,
                gradient_diag,
            },
        })
    }
}

// src/line_search.rs

//! Backtracking line search on the unmixing matrix.

use crate::error::{IcaError, Result};
use crate::math::{matrix_exp, orthogonality_error, sym_decorrelation};
use crate::objective::Objective;
use ndarray::{Array1, Array2};

/// Orthogonality drift above which an accepted rotation is re-projected.
const RETRACTION_TOL: f64 = 1e-10;

/// Armijo sufficient-decrease constant.
const ARMIJO_C1: f64 = 1e-4;

/// An accepted step.
#[derive(Debug, Clone)]
pub struct LineSearchOutcome {
    /// Accepted step length.
    pub alpha: f64,
    /// Step taken in relative coordinates, `alpha · direction`.
    pub step: Array2<f64>,
    /// Updated unmixing matrix.
    pub w: Array2<f64>,
    /// Updated sources `w · x`.
    pub y: Array2<f64>,
    /// Loss at the new point.
    pub loss: f64,
    /// Number of trial points evaluated.
    pub tries: usize,
}

/// Backtracking search starting from a full quasi-Newton step.
#[derive(Debug, Clone)]
pub struct LineSearch {
    max_tries: usize,
}

impl LineSearch {
    pub fn new(max_tries: usize) -> Self {
        Self {
            max_tries: max_tries.max(1),
        }
    }

    /// Move `w` along `direction` in relative coordinates.
    ///
    /// Orthogonal problems use the rotation `expm(α·D)·W`, general ones the
    /// additive update `(I + α·D)·W`.
    pub fn retract(
        w: &Array2<f64>,
        direction: &Array2<f64>,
        alpha: f64,
        ortho: bool,
    ) -> Result<Array2<f64>> {
        let scaled = direction * alpha;
        if ortho {
            let w_new = matrix_exp(&scaled).dot(w);
            if orthogonality_error(&w_new) > RETRACTION_TOL {
                return sym_decorrelation(&w_new);
            }
            Ok(w_new)
        } else {
            let mut transform = scaled;
            for i in 0..transform.nrows() {
                transform[[i, i]] += 1.0;
            }
            Ok(transform.dot(w))
        }
    }

    /// Halve the step from `initial_step` until the Armijo condition holds.
    ///
    /// `slope` is the directional derivative `⟨G, D⟩` and must be negative.
    /// Trial points where the objective is degenerate count as rejections.
    #[allow(clippy::too_many_arguments)]
    pub fn search(
        &self,
        objective: &Objective<'_>,
        x: &Array2<f64>,
        w: &Array2<f64>,
        signs: &Array1<f64>,
        direction: &Array2<f64>,
        current_loss: f64,
        slope: f64,
        initial_step: f64,
    ) -> Result<LineSearchOutcome> {
        if !(slope < 0.0) {
            return Err(IcaError::LineSearchFailure { tries: 0 });
        }

        let mut alpha = initial_step;
        for attempt in 1..=self.max_tries {
            let trial = Self::retract(w, direction, alpha, objective.ortho()).and_then(|w_new| {
                let y_new = w_new.dot(x);
                let loss = objective.loss(&y_new, &w_new, signs)?;
                Ok((w_new, y_new, loss))
            });

            match trial {
                Ok((w_new, y_new, loss)) if loss <= current_loss + ARMIJO_C1 * alpha * slope => {
                    return Ok(LineSearchOutcome {
                        alpha,
                        step: direction * alpha,
                        w: w_new,
                        y: y_new,
                        loss,
                        tries: attempt,
                    });
                }
                Ok(_) => {}
                Err(e) if e.is_recoverable() => {
                    log::debug!("[lbfgs-ica] line search trial at alpha={alpha:.3e} rejected: {e}");
                }
                Err(e) => return Err(e),
            }

            alpha /= 2.0;
        }

        Err(IcaError::LineSearchFailure {
            tries: self.max_tries,
        })
    }
}

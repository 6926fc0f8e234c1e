// src/result.rs

//! Result types for a fitted ICA model.

use crate::optimizer::{IterationRecord, TerminationReason};
use ndarray::{Array1, Array2};

/// Result of fitting an ICA model.
#[derive(Debug, Clone)]
pub struct FitResult {
    /// Unmixing matrix U acting on whitened data (n_components × n_components).
    pub unmixing_matrix: Array2<f64>,

    /// Whitening matrix K (n_components × n_features).
    pub whitening_matrix: Array2<f64>,

    /// Mixing matrix `pinv(K)·U⁻¹` (n_features × n_components).
    ///
    /// Column `j` is the spatial pattern of source `j`.
    pub mixing_matrix: Array2<f64>,

    /// Estimated independent sources `U·K·X` (n_components × n_samples).
    pub sources: Array2<f64>,

    /// Number of iterations performed by the retained run.
    pub n_iter: usize,

    /// Why the retained run stopped.
    pub termination_reason: TerminationReason,

    /// Loss at the returned unmixing matrix.
    pub final_loss: f64,

    /// Final gradient norm.
    pub gradient_norm: f64,

    /// Mean of input features (n_features,).
    /// None if centering was disabled.
    pub mean: Option<Array1<f64>>,

    /// Signs for extended ICA (+1 super-Gaussian, -1 sub-Gaussian per component).
    pub signs: Option<Array1<f64>>,

    /// Loss at the initial point and after every accepted step.
    pub loss_history: Vec<f64>,

    /// Per-iteration record of the retained run.
    pub trace: Vec<IterationRecord>,
}

impl FitResult {
    /// Get the full unmixing matrix `U·K` that maps centered data to sources.
    pub fn full_unmixing(&self) -> Array2<f64> {
        self.unmixing_matrix.dot(&self.whitening_matrix)
    }

    /// Whether the retained run met the gradient tolerance.
    pub fn converged(&self) -> bool {
        self.termination_reason == TerminationReason::Converged
    }
}

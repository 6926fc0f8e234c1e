// src/error.rs

//! Error types for the lbfgs-ica crate.

use crate::faer_ndarray::FaerLinalgError;
use thiserror::Error;

/// Errors that can occur while fitting an ICA model.
#[derive(Debug, Clone, Error)]
pub enum IcaError {
    /// The whitening input does not have enough numerical rank.
    ///
    /// Some channels are (nearly) collinear. Reduce `n_components` or drop
    /// redundant channels before retrying.
    #[error(
        "Rank deficiency: smallest retained covariance eigenvalue {smallest:.4e} \
         is negligible next to the largest {largest:.4e}; reduce n_components"
    )]
    RankDeficiency {
        /// Smallest retained eigenvalue of the sample covariance.
        smallest: f64,
        /// Largest eigenvalue of the sample covariance.
        largest: f64,
    },

    /// The unmixing matrix collapsed toward a singular matrix, or a
    /// non-finite value appeared while evaluating the objective.
    #[error("Degenerate unmixing matrix: {context}")]
    Degenerate {
        /// Where the degeneracy was detected.
        context: String,
    },

    /// No acceptable step was found within the backtracking budget.
    #[error("Line search failed after {tries} backtracking steps")]
    LineSearchFailure {
        /// Number of trial steps evaluated.
        tries: usize,
    },

    /// Input dimensions are invalid.
    #[error("Invalid dimensions: {message}")]
    InvalidDimensions {
        /// Description of the dimension error.
        message: String,
    },

    /// Invalid configuration parameter.
    #[error("Invalid configuration for '{parameter}': {message}")]
    InvalidConfig {
        /// Name of the invalid parameter.
        parameter: String,
        /// Description of why it's invalid.
        message: String,
    },

    /// A dense decomposition failed inside faer.
    #[error("Linear algebra failure: {0}")]
    Linalg(#[from] FaerLinalgError),
}

impl IcaError {
    pub(crate) fn degenerate(context: impl Into<String>) -> Self {
        IcaError::Degenerate {
            context: context.into(),
        }
    }

    /// Whether the optimizer may recover from this error by shrinking its step.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            IcaError::Degenerate { .. } | IcaError::LineSearchFailure { .. }
        )
    }
}

/// Convenience type alias for Results with IcaError.
pub type Result<T> = std::result::Result<T, IcaError>;

// src/lib.rs

//! # lbfgs-ica
//!
//! Independent Component Analysis by maximum likelihood, optimized with a
//! limited-memory quasi-Newton method preconditioned by a block-diagonal
//! Hessian approximation.
//!
//! The signals are centered and whitened, then an unmixing matrix is found
//! on the whitened data either over all invertible matrices or over the
//! orthogonal group (`ortho`). The extended density model lets each
//! component switch between a super-Gaussian and a sub-Gaussian density.
//!
//! ## Example
//!
//! ```rust,no_run
//! use lbfgs_ica::{DensityModel, Ica, IcaConfig};
//! use ndarray::Array2;
//!
//! # fn main() -> Result<(), lbfgs_ica::IcaError> {
//! // Signals as (n_channels x n_samples)
//! let x = Array2::<f64>::zeros((10, 1000));
//!
//! // Fit ICA with default settings
//! let result = Ica::fit(&x)?;
//!
//! // Or with custom configuration
//! let config = IcaConfig::builder()
//!     .n_components(5)
//!     .density(DensityModel::Extended)
//!     .max_iter(200)
//!     .ortho(false)
//!     .random_state(0)
//!     .build();
//! let result = Ica::fit_with_config(&x, &config)?;
//!
//! // Access results
//! let sources = &result.sources;
//! let mixing = &result.mixing_matrix;
//! println!("{} after {} iterations", result.termination_reason, result.n_iter);
//! # Ok(())
//! # }
//! ```

mod config;
mod density;
mod error;
mod faer_ndarray;
mod lbfgs;
mod line_search;
mod math;
mod objective;
mod optimizer;
mod preconditioner;
mod result;
mod solver;
mod whitening;

pub use config::{ConfigBuilder, IcaConfig};
pub use density::{Cube, Density, DensityModel, Exp, Nonlinearity, Tanh};
pub use error::{IcaError, Result};
pub use faer_ndarray::FaerLinalgError;
pub use optimizer::{IterationRecord, StepEvent, TerminationReason};
pub use preconditioner::HessianApprox;
pub use result::FitResult;
pub use solver::{fit, Ica};
pub use whitening::{center, whiten, Whitening};

// Utility functions
pub mod utils;

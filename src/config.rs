// src/config.rs

//! Configuration for the ICA solver.

use crate::density::{DensityModel, Nonlinearity};
use crate::error::{IcaError, Result};
use crate::preconditioner::HessianApprox;
use ndarray::Array2;
use std::time::Duration;

/// Configuration parameters for fitting an ICA model.
#[derive(Clone, Debug)]
pub struct IcaConfig {
    /// Fixed or sign-adaptive (extended) source density model.
    pub density: DensityModel,

    /// Nonlinearity used for the super-Gaussian assumption.
    pub nonlinearity: Nonlinearity,

    /// Number of components to extract. If None, uses the number of channels.
    pub n_components: Option<usize>,

    /// If true, the unmixing matrix is constrained to be orthogonal.
    pub ortho: bool,

    /// If true, center the data before processing.
    pub centering: bool,

    /// Maximum number of iterations.
    pub max_iter: usize,

    /// Convergence tolerance on the max-abs entry of the projected gradient.
    pub tol: f64,

    /// Size of the L-BFGS memory.
    pub memory: usize,

    /// Maximum line search attempts.
    pub ls_tries: usize,

    /// Minimum eigenvalue for Hessian regularization.
    pub lambda_min: f64,

    /// Hessian approximation used by the preconditioner of the general problem.
    pub hessian: HessianApprox,

    /// Re-estimate the extended-model signs every `sign_refresh` iterations.
    pub sign_refresh: usize,

    /// Gradient norm below which the extended-model signs are frozen.
    pub sign_freeze_tol: f64,

    /// Relative eigenvalue threshold for the whitening rank check.
    pub rank_tol: f64,

    /// Initial unmixing matrix. If None, uses random initialization.
    pub w_init: Option<Array2<f64>>,

    /// Random seed for reproducibility.
    pub random_state: Option<u64>,

    /// Number of independent random restarts; the lowest final loss wins.
    pub n_runs: usize,

    /// Wall-clock budget, checked between iterations.
    pub timeout: Option<Duration>,

    /// If true, log progress at info level instead of debug.
    pub verbose: bool,
}

impl Default for IcaConfig {
    fn default() -> Self {
        Self {
            density: DensityModel::default(),
            nonlinearity: Nonlinearity::default(),
            n_components: None,
            ortho: true,
            centering: true,
            max_iter: 500,
            tol: 1e-7,
            memory: 7,
            ls_tries: 10,
            lambda_min: 0.01,
            hessian: HessianApprox::default(),
            sign_refresh: 1,
            sign_freeze_tol: 1e-3,
            rank_tol: 1e-10,
            w_init: None,
            random_state: None,
            n_runs: 1,
            timeout: None,
            verbose: false,
        }
    }
}

fn invalid(parameter: &str, message: &str) -> IcaError {
    IcaError::InvalidConfig {
        parameter: parameter.into(),
        message: message.into(),
    }
}

impl IcaConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for constructing a configuration.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_iter == 0 {
            return Err(invalid("max_iter", "must be greater than 0"));
        }
        if !(self.tol > 0.0) {
            return Err(invalid("tol", "must be positive"));
        }
        if !(self.lambda_min > 0.0) {
            return Err(invalid("lambda_min", "must be positive"));
        }
        if self.memory == 0 {
            return Err(invalid("memory", "L-BFGS memory size must be at least 1"));
        }
        if self.ls_tries == 0 {
            return Err(invalid("ls_tries", "must be at least 1"));
        }
        if self.sign_refresh == 0 {
            return Err(invalid("sign_refresh", "must be at least 1"));
        }
        if !(self.sign_freeze_tol >= 0.0) {
            return Err(invalid("sign_freeze_tol", "must be non-negative"));
        }
        if !(self.rank_tol > 0.0 && self.rank_tol < 1.0) {
            return Err(invalid("rank_tol", "must lie in (0, 1)"));
        }
        if self.n_components == Some(0) {
            return Err(invalid("n_components", "must be at least 1"));
        }
        if self.n_runs == 0 {
            return Err(invalid("n_runs", "must be at least 1"));
        }
        if self.w_init.is_some() && self.n_runs > 1 {
            return Err(invalid(
                "n_runs",
                "restarts need random initializations; remove w_init or set n_runs to 1",
            ));
        }
        if let Some(alpha) = self.nonlinearity.alpha() {
            if !(alpha > 0.0) {
                return Err(invalid("nonlinearity", "alpha must be positive"));
            }
        }
        // The sub-Gaussian loss `-G(y) + y²/2` is only bounded below when G
        // grows at most linearly; whitening keeps it bounded in ortho mode.
        if self.density.is_extended()
            && !self.ortho
            && !matches!(self.nonlinearity, Nonlinearity::Tanh(_))
        {
            return Err(invalid(
                "nonlinearity",
                "the extended density model with ortho = false requires tanh",
            ));
        }
        Ok(())
    }
}

/// Builder for constructing `IcaConfig` with a fluent API.
#[derive(Default)]
pub struct ConfigBuilder {
    config: IcaConfig,
}

impl ConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            config: IcaConfig::default(),
        }
    }

    /// Set the density model.
    pub fn density(mut self, density: DensityModel) -> Self {
        self.config.density = density;
        self
    }

    /// Set the nonlinearity.
    pub fn nonlinearity(mut self, nonlinearity: Nonlinearity) -> Self {
        self.config.nonlinearity = nonlinearity;
        self
    }

    /// Set the number of components to extract.
    pub fn n_components(mut self, n: usize) -> Self {
        self.config.n_components = Some(n);
        self
    }

    /// Enable or disable the orthogonal constraint.
    pub fn ortho(mut self, ortho: bool) -> Self {
        self.config.ortho = ortho;
        self
    }

    /// Enable or disable centering.
    pub fn centering(mut self, centering: bool) -> Self {
        self.config.centering = centering;
        self
    }

    /// Set the maximum number of iterations.
    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.config.max_iter = max_iter;
        self
    }

    /// Set the convergence tolerance.
    pub fn tol(mut self, tol: f64) -> Self {
        self.config.tol = tol;
        self
    }

    /// Set the L-BFGS memory size.
    pub fn memory(mut self, memory: usize) -> Self {
        self.config.memory = memory;
        self
    }

    /// Set the maximum line search attempts.
    pub fn ls_tries(mut self, ls_tries: usize) -> Self {
        self.config.ls_tries = ls_tries;
        self
    }

    /// Set the minimum eigenvalue for Hessian regularization.
    pub fn lambda_min(mut self, lambda_min: f64) -> Self {
        self.config.lambda_min = lambda_min;
        self
    }

    /// Select the Hessian approximation for the general problem.
    pub fn hessian(mut self, hessian: HessianApprox) -> Self {
        self.config.hessian = hessian;
        self
    }

    /// Set how often the extended-model signs are re-estimated.
    pub fn sign_refresh(mut self, every: usize) -> Self {
        self.config.sign_refresh = every;
        self
    }

    /// Set the gradient norm below which signs stop changing.
    pub fn sign_freeze_tol(mut self, tol: f64) -> Self {
        self.config.sign_freeze_tol = tol;
        self
    }

    /// Set the relative eigenvalue threshold of the whitening rank check.
    pub fn rank_tol(mut self, tol: f64) -> Self {
        self.config.rank_tol = tol;
        self
    }

    /// Set the initial unmixing matrix.
    pub fn w_init(mut self, w_init: Array2<f64>) -> Self {
        self.config.w_init = Some(w_init);
        self
    }

    /// Set the random seed.
    pub fn random_state(mut self, seed: u64) -> Self {
        self.config.random_state = Some(seed);
        self
    }

    /// Set the number of random restarts.
    pub fn n_runs(mut self, n_runs: usize) -> Self {
        self.config.n_runs = n_runs;
        self
    }

    /// Set a wall-clock budget for each optimization run.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Enable or disable verbose output.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> IcaConfig {
        self.config
    }

    /// Build and validate the configuration.
    pub fn build_validated(self) -> Result<IcaConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// src/density.rs

//! Density models for ICA.
//!
//! A density supplies the elementwise log-likelihood `G`, the score `ψ = G'`
//! and its derivative `ψ'`. Minimizing `mean(G(y))` over rotations of
//! whitened data drives the projections towards non-Gaussianity.

use ndarray::{Array1, Array2, ArrayView1, Zip};

/// Trait for density functions used in ICA.
///
/// Implementors only provide the scalar functions; the matrix helpers are
/// derived from them.
pub trait Density: Clone + Send + Sync {
    /// Negative log-likelihood contribution `G(y)` of one sample.
    fn log_lik(&self, y: f64) -> f64;

    /// Score `ψ(y)` and its derivative `ψ'(y)`.
    fn score_and_der(&self, y: f64) -> (f64, f64);

    /// Mean of `G` over one component's samples.
    fn mean_log_lik(&self, y: ArrayView1<'_, f64>) -> f64 {
        let t = y.len() as f64;
        y.iter().map(|&v| self.log_lik(v)).sum::<f64>() / t
    }

    /// Score and score derivative for a whole signal matrix.
    fn score_and_der_matrix(&self, y: &Array2<f64>) -> (Array2<f64>, Array2<f64>) {
        let mut score = Array2::zeros(y.raw_dim());
        let mut score_der = Array2::zeros(y.raw_dim());
        Zip::from(&mut score)
            .and(&mut score_der)
            .and(y)
            .for_each(|s, d, &v| {
                let (psi, psi_der) = self.score_and_der(v);
                *s = psi;
                *d = psi_der;
            });
        (score, score_der)
    }
}

/// Hyperbolic tangent density.
///
/// Smoothed absolute value (log-cosh) family, suited for super-Gaussian
/// sources such as speech or sparse signals.
///
/// The log-likelihood is: `|y| + log(1 + exp(-2α|y|)) / α`
#[derive(Clone, Debug)]
pub struct Tanh {
    /// Scaling parameter (default: 1.0).
    pub alpha: f64,
}

impl Default for Tanh {
    fn default() -> Self {
        Self { alpha: 1.0 }
    }
}

impl Tanh {
    /// Create a new Tanh density with the given alpha parameter.
    pub fn new(alpha: f64) -> Self {
        Self { alpha }
    }
}

impl Density for Tanh {
    fn log_lik(&self, y: f64) -> f64 {
        let abs_y = y.abs();
        abs_y + (-2.0 * self.alpha * abs_y).exp().ln_1p() / self.alpha
    }

    fn score_and_der(&self, y: f64) -> (f64, f64) {
        let score = (self.alpha * y).tanh();
        (score, self.alpha * (1.0 - score * score))
    }
}

/// Exponential density.
///
/// Suited for super-Gaussian sources with heavy tails.
///
/// The log-likelihood is: `-exp(-αy²/2) / α`
#[derive(Clone, Debug)]
pub struct Exp {
    /// Scaling parameter (default: 1.0).
    pub alpha: f64,
}

impl Default for Exp {
    fn default() -> Self {
        Self { alpha: 1.0 }
    }
}

impl Exp {
    /// Create a new Exp density with the given alpha parameter.
    pub fn new(alpha: f64) -> Self {
        Self { alpha }
    }
}

impl Density for Exp {
    fn log_lik(&self, y: f64) -> f64 {
        -(-self.alpha * y * y / 2.0).exp() / self.alpha
    }

    fn score_and_der(&self, y: f64) -> (f64, f64) {
        let y_sq = y * y;
        let k = (-self.alpha / 2.0 * y_sq).exp();
        (y * k, (1.0 - self.alpha * y_sq) * k)
    }
}

/// Cubic density.
///
/// Quartic log-likelihood suited for sub-Gaussian sources (e.g. uniform).
///
/// The log-likelihood is: `y⁴/4`
#[derive(Clone, Debug, Default)]
pub struct Cube;

impl Cube {
    /// Create a new Cube density.
    pub fn new() -> Self {
        Self
    }
}

impl Density for Cube {
    fn log_lik(&self, y: f64) -> f64 {
        y.powi(4) / 4.0
    }

    fn score_and_der(&self, y: f64) -> (f64, f64) {
        (y.powi(3), 3.0 * y * y)
    }
}

/// Enumeration of built-in nonlinearities.
#[derive(Clone, Debug)]
pub enum Nonlinearity {
    /// Hyperbolic tangent density.
    Tanh(Tanh),
    /// Exponential density.
    Exp(Exp),
    /// Cubic density.
    Cube(Cube),
}

impl Default for Nonlinearity {
    fn default() -> Self {
        Nonlinearity::Tanh(Tanh::default())
    }
}

impl Nonlinearity {
    /// Create a Tanh density with default parameters.
    pub fn tanh() -> Self {
        Nonlinearity::Tanh(Tanh::default())
    }

    /// Create a Tanh density with custom alpha.
    pub fn tanh_with_alpha(alpha: f64) -> Self {
        Nonlinearity::Tanh(Tanh::new(alpha))
    }

    /// Create an Exp density with default parameters.
    pub fn exp() -> Self {
        Nonlinearity::Exp(Exp::default())
    }

    /// Create an Exp density with custom alpha.
    pub fn exp_with_alpha(alpha: f64) -> Self {
        Nonlinearity::Exp(Exp::new(alpha))
    }

    /// Create a Cube density.
    pub fn cube() -> Self {
        Nonlinearity::Cube(Cube::new())
    }

    /// Scale parameter, if the nonlinearity has one.
    pub fn alpha(&self) -> Option<f64> {
        match self {
            Nonlinearity::Tanh(d) => Some(d.alpha),
            Nonlinearity::Exp(d) => Some(d.alpha),
            Nonlinearity::Cube(_) => None,
        }
    }
}

impl Density for Nonlinearity {
    fn log_lik(&self, y: f64) -> f64 {
        match self {
            Nonlinearity::Tanh(d) => d.log_lik(y),
            Nonlinearity::Exp(d) => d.log_lik(y),
            Nonlinearity::Cube(d) => d.log_lik(y),
        }
    }

    fn score_and_der(&self, y: f64) -> (f64, f64) {
        match self {
            Nonlinearity::Tanh(d) => d.score_and_der(y),
            Nonlinearity::Exp(d) => d.score_and_der(y),
            Nonlinearity::Cube(d) => d.score_and_der(y),
        }
    }
}

/// How the per-component source density is chosen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DensityModel {
    /// Every component uses the nonlinearity as is.
    Fixed,
    /// Each component switches between the super-Gaussian nonlinearity and
    /// its sub-Gaussian mirror according to an online kurtosis estimate.
    #[default]
    Extended,
}

impl DensityModel {
    pub fn is_extended(self) -> bool {
        matches!(self, DensityModel::Extended)
    }
}

/// Fraction of `|E[ψ']·E[y²]| + |E[ψ·y]|` the kurtosis proxy must exceed
/// before an established sign is flipped.
const SIGN_DEAD_BAND: f64 = 0.02;

/// Flips a component may make after its first estimate; its sign is locked
/// afterwards.
const MAX_SIGN_FLIPS: usize = 3;

/// Per-component sign state of the extended density model.
///
/// `signs[i] = +1` assumes a super-Gaussian source, `-1` a sub-Gaussian one.
/// The state belongs to a single optimization run.
///
/// Flips are damped: a proxy inside the dead band around zero keeps the
/// current sign, and a component that already flipped `MAX_SIGN_FLIPS` times
/// keeps its last sign. A near-Gaussian component therefore cannot keep
/// alternating between the two densities.
#[derive(Clone, Debug)]
pub struct ComponentSignStats {
    signs: Array1<f64>,
    kurtosis: Array1<f64>,
    flips: Vec<usize>,
    refresh_every: usize,
    freeze_tol: f64,
    frozen: bool,
}

impl ComponentSignStats {
    pub fn new(n: usize, refresh_every: usize, freeze_tol: f64) -> Self {
        Self {
            signs: Array1::ones(n),
            kurtosis: Array1::zeros(n),
            flips: vec![0; n],
            refresh_every: refresh_every.max(1),
            freeze_tol,
            frozen: false,
        }
    }

    /// All-positive signs that never change (fixed density model).
    pub fn fixed(n: usize) -> Self {
        Self {
            frozen: true,
            ..Self::new(n, 1, 0.0)
        }
    }

    pub fn signs(&self) -> &Array1<f64> {
        &self.signs
    }

    /// Last kurtosis proxy `E[ψ'(y)]·E[y²] − E[ψ(y)·y]` per component.
    pub fn kurtosis(&self) -> &Array1<f64> {
        &self.kurtosis
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Sign flips per component since the first estimate.
    pub fn flips(&self) -> &[usize] {
        &self.flips
    }

    /// Re-estimate the signs.
    ///
    /// `gradient_norm` is the norm observed at the previous iteration; once it
    /// drops below the freeze tolerance the signs never change again.
    /// Returns `true` when at least one sign flipped.
    pub fn refresh(
        &mut self,
        iteration: usize,
        gradient_norm: f64,
        score_der_mean: &Array1<f64>,
        second_moment: &Array1<f64>,
        score_moment: &Array1<f64>,
    ) -> bool {
        if self.frozen {
            return false;
        }
        if iteration > 0 && gradient_norm < self.freeze_tol {
            log::debug!(
                "[lbfgs-ica] freezing component signs at iteration {} (gradient norm {:.3e})",
                iteration,
                gradient_norm
            );
            self.frozen = true;
            return false;
        }
        if iteration % self.refresh_every != 0 {
            return false;
        }

        // The first estimate replaces the all-positive placeholder.
        if iteration == 0 {
            for i in 0..self.signs.len() {
                let k = score_der_mean[i] * second_moment[i] - score_moment[i];
                self.kurtosis[i] = k;
                if k != 0.0 && k.is_finite() {
                    self.signs[i] = k.signum();
                }
            }
            return false;
        }

        let mut changed = false;
        for i in 0..self.signs.len() {
            let curvature = score_der_mean[i] * second_moment[i];
            let k = curvature - score_moment[i];
            self.kurtosis[i] = k;
            if !k.is_finite() || k.signum() == self.signs[i] || self.flips[i] >= MAX_SIGN_FLIPS {
                continue;
            }
            let band = SIGN_DEAD_BAND * (curvature.abs() + score_moment[i].abs());
            if k.abs() <= band {
                continue;
            }
            self.signs[i] = k.signum();
            self.flips[i] += 1;
            if self.flips[i] == MAX_SIGN_FLIPS {
                log::debug!(
                    "[lbfgs-ica] locking the sign of component {} after {} flips",
                    i,
                    MAX_SIGN_FLIPS
                );
            }
            changed = true;
        }
        changed
    }
}

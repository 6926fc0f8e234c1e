// src/solver.rs

//! Main ICA solver interface.

use crate::config::IcaConfig;
use crate::density::DensityModel;
use crate::error::{IcaError, Result};
use crate::math::{inverse, log_abs_det, sym_decorrelation};
use crate::optimizer::{LimitedMemoryOptimizer, OptimizerOutcome, TerminationReason};
use crate::result::FitResult;
use crate::utils::random_orthogonal;
use crate::whitening::{center, whiten};

use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

/// Independent Component Analysis by preconditioned L-BFGS.
///
/// This struct provides static methods for fitting ICA models.
pub struct Ica;

impl Ica {
    /// Fit ICA model with default configuration.
    ///
    /// # Arguments
    /// * `x` - Data matrix of shape (n_features, n_samples)
    ///
    /// # Returns
    /// * `FitResult` containing unmixing matrix, sources, etc.
    pub fn fit(x: &Array2<f64>) -> Result<FitResult> {
        Self::fit_with_config(x, &IcaConfig::default())
    }

    /// Fit ICA model with custom configuration.
    ///
    /// # Arguments
    /// * `x` - Data matrix of shape (n_features, n_samples)
    /// * `config` - Algorithm configuration
    ///
    /// # Returns
    /// * `FitResult` containing unmixing matrix, sources, etc.
    pub fn fit_with_config(x: &Array2<f64>, config: &IcaConfig) -> Result<FitResult> {
        config.validate()?;

        let (n, t) = x.dim();
        if n == 0 || t == 0 {
            return Err(IcaError::InvalidDimensions {
                message: "Input matrix cannot be empty".into(),
            });
        }

        let n_components = config.n_components.unwrap_or(n);

        let (x1, mean) = if config.centering {
            let (centered, mean) = center(x);
            (centered, Some(mean))
        } else {
            (x.clone(), None)
        };

        let whitening = whiten(&x1, n_components, config.rank_tol)?;
        let starts = initial_matrices(config, whitening.data.nrows())?;

        let optimizer = LimitedMemoryOptimizer::new(config);
        let runs: Vec<OptimizerOutcome> = if starts.len() > 1 {
            starts
                .into_par_iter()
                .map(|w0| optimizer.run(&whitening.data, w0))
                .collect::<Result<_>>()?
        } else {
            starts
                .into_iter()
                .map(|w0| optimizer.run(&whitening.data, w0))
                .collect::<Result<_>>()?
        };
        let n_runs = runs.len();
        let outcome = select_run(runs)?;

        if n_runs > 1 {
            log::debug!(
                "[lbfgs-ica] kept best of {} runs: loss {:.6e}, {}",
                n_runs,
                outcome.final_loss,
                outcome.termination
            );
        }

        let mixing_matrix = whitening.dewhitening.dot(&inverse(&outcome.unmixing)?);

        Ok(FitResult {
            unmixing_matrix: outcome.unmixing,
            whitening_matrix: whitening.matrix,
            mixing_matrix,
            sources: outcome.sources,
            n_iter: outcome.n_iter,
            termination_reason: outcome.termination,
            final_loss: outcome.final_loss,
            gradient_norm: outcome.gradient_norm,
            mean,
            signs: outcome.signs,
            loss_history: outcome.loss_history,
            trace: outcome.trace,
        })
    }

    /// Transform new data using a fitted model.
    ///
    /// # Arguments
    /// * `x` - New data matrix (n_features, n_samples)
    /// * `result` - Result from a previous fit
    ///
    /// # Returns
    /// * Transformed data (n_components, n_samples)
    pub fn transform(x: &Array2<f64>, result: &FitResult) -> Result<Array2<f64>> {
        let n_features = result.whitening_matrix.ncols();
        if x.nrows() != n_features {
            return Err(IcaError::InvalidDimensions {
                message: format!(
                    "expected {} features, got {}",
                    n_features,
                    x.nrows()
                ),
            });
        }

        let w = result.full_unmixing();
        match &result.mean {
            Some(mean) => Ok(w.dot(&(x - &mean.view().insert_axis(Axis(1))))),
            None => Ok(w.dot(x)),
        }
    }
}

/// Fit ICA with the most common options and defaults for the rest.
///
/// `n_components = None` keeps every channel.
pub fn fit(
    signals: &Array2<f64>,
    n_components: Option<usize>,
    density: DensityModel,
    max_iter: usize,
    tol: f64,
    ortho: bool,
    memory: usize,
) -> Result<FitResult> {
    let mut config = IcaConfig::builder()
        .density(density)
        .max_iter(max_iter)
        .tol(tol)
        .ortho(ortho)
        .memory(memory)
        .build();
    config.n_components = n_components;
    Ica::fit_with_config(signals, &config)
}

/// Starting unmixing matrices, one per run.
fn initial_matrices(config: &IcaConfig, n: usize) -> Result<Vec<Array2<f64>>> {
    if let Some(w) = &config.w_init {
        if w.dim() != (n, n) {
            return Err(IcaError::InvalidDimensions {
                message: format!(
                    "w_init shape {:?} doesn't match expected ({}, {})",
                    w.shape(),
                    n,
                    n
                ),
            });
        }
        if w.iter().any(|v| !v.is_finite()) {
            return Err(IcaError::InvalidDimensions {
                message: "w_init contains non-finite values".into(),
            });
        }
        log_abs_det(w).map_err(singular_w_init)?;
        let w0 = if config.ortho {
            sym_decorrelation(w).map_err(singular_w_init)?
        } else {
            w.clone()
        };
        return Ok(vec![w0]);
    }

    let mut rng = match config.random_state {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    };
    (0..config.n_runs)
        .map(|_| random_orthogonal(n, &mut rng))
        .collect()
}

fn singular_w_init(err: IcaError) -> IcaError {
    match err {
        IcaError::Degenerate { context } => IcaError::InvalidConfig {
            parameter: "w_init".into(),
            message: format!("initial unmixing matrix must be invertible ({context})"),
        },
        other => other,
    }
}

/// Lowest final loss wins; diverged runs only when nothing else finished.
///
/// Runs whose starting matrix could not even be evaluated have no iterate to
/// report and are dropped.
fn select_run(runs: Vec<OptimizerOutcome>) -> Result<OptimizerOutcome> {
    let n_runs = runs.len();
    runs.into_iter()
        .filter(|run| {
            let evaluated = !run.loss_history.is_empty();
            if !evaluated {
                log::warn!("[lbfgs-ica] dropping a run whose starting matrix was degenerate");
            }
            evaluated
        })
        .min_by(|a, b| {
            let diverged = |o: &OptimizerOutcome| o.termination == TerminationReason::Diverged;
            diverged(a)
                .cmp(&diverged(b))
                .then(a.final_loss.total_cmp(&b.final_loss))
        })
        .ok_or_else(|| IcaError::InvalidConfig {
            parameter: "n_runs".into(),
            message: format!("none of the {n_runs} starting matrices could be evaluated"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::amari_distance;
    use rand::Rng;
    use rand_distr::StandardNormal;

    fn generate_test_data(
        n: usize,
        t: usize,
        seed: u64,
    ) -> (Array2<f64>, Array2<f64>, Array2<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);

        // Laplacian sources
        let s = Array2::from_shape_fn((n, t), |_| {
            let u: f64 = rng.random_range(f64::EPSILON..1.0);
            let sign = if rng.random::<bool>() { 1.0 } else { -1.0 };
            sign * (-u.ln())
        });

        let mut a: Array2<f64> = Array2::from_shape_fn((n, n), |_| rng.sample(StandardNormal));
        for i in 0..n {
            a[[i, i]] += 2.0;
        }

        let x = a.dot(&s);
        (s, a, x)
    }

    #[test]
    fn test_fit_default() {
        let (_, a, x) = generate_test_data(3, 2000, 42);

        let result = Ica::fit(&x).unwrap();

        assert_eq!(result.sources.dim(), (3, 2000));
        assert_eq!(result.unmixing_matrix.dim(), (3, 3));
        assert_eq!(result.mixing_matrix.dim(), (3, 3));
        assert!(result.converged());
        assert!(amari_distance(&result.full_unmixing(), &a) < 0.1);
    }

    #[test]
    fn test_fit_with_config() {
        let (_, _, x) = generate_test_data(3, 1000, 42);

        let config = IcaConfig::builder()
            .max_iter(100)
            .random_state(42)
            .verbose(false)
            .build();

        let result = Ica::fit_with_config(&x, &config).unwrap();

        assert!(result.n_iter <= 100);
        assert!(result.loss_history.len() <= 1 + result.trace.len());
        assert_eq!(result.trace.len(), result.n_iter);
    }

    #[test]
    fn test_n_components() {
        let (_, _, x) = generate_test_data(5, 1000, 42);

        let config = IcaConfig::builder()
            .n_components(3)
            .random_state(42)
            .build();

        let result = Ica::fit_with_config(&x, &config).unwrap();

        assert_eq!(result.sources.nrows(), 3);
        assert_eq!(result.unmixing_matrix.nrows(), 3);
        assert_eq!(result.whitening_matrix.dim(), (3, 5));
        assert_eq!(result.mixing_matrix.dim(), (5, 3));
    }

    #[test]
    fn test_transform() {
        let (_, _, x) = generate_test_data(3, 1000, 42);

        let config = IcaConfig::builder().random_state(42).build();

        let result = Ica::fit_with_config(&x, &config).unwrap();

        let transformed = Ica::transform(&x, &result).unwrap();

        assert_eq!(transformed.shape(), result.sources.shape());
        let diff = (&transformed - &result.sources).mapv(f64::abs);
        assert!(diff.iter().all(|&d| d < 1e-8));

        let wrong = Array2::zeros((2, 10));
        assert!(Ica::transform(&wrong, &result).is_err());
    }

    #[test]
    fn test_mixing_reconstructs_centered_data() {
        let (_, _, x) = generate_test_data(3, 1000, 7);

        let config = IcaConfig::builder().random_state(1).build();
        let result = Ica::fit_with_config(&x, &config).unwrap();

        let (centered, _) = center(&x);
        let reconstructed = result.mixing_matrix.dot(&result.sources);
        let err = (&reconstructed - &centered).mapv(f64::abs);
        assert!(err.iter().all(|&d| d < 1e-8));
    }

    #[test]
    fn test_w_init_shape_is_checked() {
        let (_, _, x) = generate_test_data(3, 500, 42);

        let config = IcaConfig::builder().w_init(Array2::eye(2)).build();

        assert!(matches!(
            Ica::fit_with_config(&x, &config),
            Err(IcaError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn test_singular_w_init_is_a_config_error() {
        let (_, _, x) = generate_test_data(2, 500, 4);
        let singular = Array2::from_shape_vec((2, 2), vec![1.0, 2.0, 2.0, 4.0]).unwrap();

        for ortho in [true, false] {
            let config = IcaConfig::builder()
                .w_init(singular.clone())
                .ortho(ortho)
                .build();
            match Ica::fit_with_config(&x, &config) {
                Err(IcaError::InvalidConfig { parameter, .. }) => assert_eq!(parameter, "w_init"),
                other => panic!("ortho = {ortho}: unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_unevaluated_runs_are_not_selected() {
        let outcome = |loss_history: Vec<f64>, termination, final_loss| OptimizerOutcome {
            unmixing: Array2::eye(2),
            sources: Array2::zeros((2, 4)),
            termination,
            n_iter: 0,
            loss_history,
            trace: Vec::new(),
            final_loss,
            gradient_norm: f64::INFINITY,
            signs: None,
        };

        let never_evaluated = outcome(Vec::new(), TerminationReason::Diverged, f64::INFINITY);
        assert!(matches!(
            select_run(vec![never_evaluated.clone()]),
            Err(IcaError::InvalidConfig { .. })
        ));

        let diverged = outcome(vec![1.0, 0.5], TerminationReason::Diverged, 0.5);
        let converged = outcome(vec![1.0, 0.9], TerminationReason::Converged, 0.9);
        let best = select_run(vec![never_evaluated, diverged.clone(), converged]).unwrap();
        assert_eq!(best.termination, TerminationReason::Converged);

        let best = select_run(vec![diverged]).unwrap();
        assert_eq!(best.final_loss, 0.5);
    }

    #[test]
    fn test_multi_start_is_reproducible() {
        let (_, _, x) = generate_test_data(3, 1000, 9);

        let config = IcaConfig::builder().n_runs(3).random_state(5).build();

        let first = Ica::fit_with_config(&x, &config).unwrap();
        let second = Ica::fit_with_config(&x, &config).unwrap();

        assert_eq!(first.final_loss, second.final_loss);
        assert_eq!(first.unmixing_matrix, second.unmixing_matrix);
    }

    #[test]
    fn test_free_function() {
        let (_, a, x) = generate_test_data(2, 2000, 3);

        let result = fit(&x, None, DensityModel::Fixed, 200, 1e-7, false, 5).unwrap();

        assert!(result.signs.is_none());
        assert!(amari_distance(&result.full_unmixing(), &a) < 0.1);
    }

    #[test]
    fn test_empty_input() {
        let x = Array2::<f64>::zeros((0, 10));
        assert!(matches!(
            Ica::fit(&x),
            Err(IcaError::InvalidDimensions { .. })
        ));
    }
}

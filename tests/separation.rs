mod common;

use approx::assert_abs_diff_eq;
use common::*;
use lbfgs_ica::utils::{amari_distance, correlation_matrix};
use lbfgs_ica::{center, whiten, DensityModel, HessianApprox, Ica, IcaConfig, StepEvent};
use ndarray::{array, Array2};

fn mixed_laplace(seed: u64, n: usize, t: usize) -> (Array2<f64>, Array2<f64>, Array2<f64>) {
    let mut rng = rng(seed);
    let s = laplace(&mut rng, n, t);
    let a = well_conditioned_mixing(&mut rng, n);
    let x = a.dot(&s);
    (s, a, x)
}

#[test]
fn recovers_mixing_on_the_orthogonal_group() {
    let (_, a, x) = mixed_laplace(1, 3, 5000);
    let config = IcaConfig::builder().random_state(0).build();

    let result = Ica::fit_with_config(&x, &config).unwrap();

    assert!(result.converged(), "{}", result.termination_reason);
    let distance = amari_distance(&result.full_unmixing(), &a);
    assert!(distance < 0.1, "Amari distance {distance}");
}

#[test]
fn recovers_mixing_over_all_invertible_matrices() {
    let (_, a, x) = mixed_laplace(2, 3, 5000);
    for hessian in [HessianApprox::H1, HessianApprox::H2] {
        let config = IcaConfig::builder()
            .ortho(false)
            .hessian(hessian)
            .random_state(0)
            .build();

        let result = Ica::fit_with_config(&x, &config).unwrap();

        assert!(result.converged(), "{:?}: {}", hessian, result.termination_reason);
        let distance = amari_distance(&result.full_unmixing(), &a);
        assert!(distance < 0.1, "{:?}: Amari distance {distance}", hessian);
    }
}

#[test]
fn separates_sub_and_super_gaussian_sources() {
    let mut rng = rng(3);
    let s = stack(&[laplace(&mut rng, 2, 5000), uniform(&mut rng, 2, 5000)]);
    let a = well_conditioned_mixing(&mut rng, 4);
    let x = a.dot(&s);

    let config = IcaConfig::builder()
        .density(DensityModel::Extended)
        .random_state(4)
        .build();
    let result = Ica::fit_with_config(&x, &config).unwrap();

    assert!(amari_distance(&result.full_unmixing(), &a) < 0.1);
    let signs = result.signs.unwrap();
    assert_eq!(signs.iter().filter(|&&v| v < 0.0).count(), 2);
}

#[test]
fn every_accepted_rotation_stays_orthogonal() {
    let (_, _, x) = mixed_laplace(5, 4, 3000);
    let config = IcaConfig::builder().ortho(true).random_state(1).build();

    let result = Ica::fit_with_config(&x, &config).unwrap();

    assert!(!result.trace.is_empty());
    for record in &result.trace {
        assert!(
            record.orthogonality_error < 1e-8,
            "iteration {}: {:.3e}",
            record.iteration,
            record.orthogonality_error
        );
    }
    let u = &result.unmixing_matrix;
    assert_abs_diff_eq!(u.dot(&u.t()), Array2::<f64>::eye(4), epsilon = 1e-8);
}

#[test]
fn accepted_steps_never_increase_the_loss() {
    let (_, _, x) = mixed_laplace(6, 3, 4000);
    for ortho in [true, false] {
        let config = IcaConfig::builder().ortho(ortho).random_state(2).build();
        let result = Ica::fit_with_config(&x, &config).unwrap();

        let mut previous = result.loss_history[0];
        for record in &result.trace {
            if matches!(record.event, StepEvent::Accepted | StepEvent::Recovered) {
                assert!(
                    record.loss <= previous + 1e-12,
                    "ortho={ortho}, iteration {}: {} > {}",
                    record.iteration,
                    record.loss,
                    previous
                );
            }
            previous = record.loss;
        }
    }
}

#[test]
fn whitening_twice_is_the_identity() {
    let (_, _, x) = mixed_laplace(7, 3, 2000);
    let (centered, _) = center(&x);

    let first = whiten(&centered, 3, 1e-10).unwrap();
    let cov = first.data.dot(&first.data.t()) / first.data.ncols() as f64;
    assert_abs_diff_eq!(cov, Array2::<f64>::eye(3), epsilon = 1e-10);

    let second = whiten(&first.data, 3, 1e-10).unwrap();
    assert_eq!(second.matrix, Array2::<f64>::eye(3));
    assert_abs_diff_eq!(second.data, first.data, epsilon = 1e-12);
}

#[test]
fn channel_permutation_and_scaling_do_not_change_the_sources() {
    let (_, _, x) = mixed_laplace(8, 3, 5000);
    let ps = array![[0.0, -2.0, 0.0], [0.0, 0.0, 0.5], [3.0, 0.0, 0.0]];
    let x_ps = ps.dot(&x);
    let config = IcaConfig::builder().random_state(3).build();

    let original = Ica::fit_with_config(&x, &config).unwrap();
    let transformed = Ica::fit_with_config(&x_ps, &config).unwrap();

    let corr = correlation_matrix(&original.sources, &transformed.sources);
    let matches = best_matches(&corr);
    for (i, &(_, value)) in matches.iter().enumerate() {
        assert!(value > 0.99, "source {i} best |corr| {value}");
    }
    let mut targets: Vec<usize> = matches.iter().map(|&(j, _)| j).collect();
    targets.sort_unstable();
    assert_eq!(targets, vec![0, 1, 2]);
}

#[test]
fn component_reduction_keeps_the_leading_subspace() {
    let mut rng = rng(9);
    let s = laplace(&mut rng, 2, 4000);
    // Four channels spanned by two sources plus a little noise.
    let a = array![[1.0, 0.4], [0.3, 1.0], [0.8, -0.5], [-0.2, 0.9]];
    let x = a.dot(&s) + gaussian(&mut rng, 4, 4000) * 1e-3;

    let config = IcaConfig::builder().n_components(2).random_state(0).build();
    let result = Ica::fit_with_config(&x, &config).unwrap();

    assert_eq!(result.sources.nrows(), 2);
    let corr = correlation_matrix(&s, &result.sources);
    assert!(best_matches(&corr).iter().all(|&(_, v)| v > 0.99));
}

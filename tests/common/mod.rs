#![allow(dead_code)]

use lbfgs_ica::utils::random_orthogonal;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

pub fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Unit-variance Laplace samples.
pub fn laplace(rng: &mut StdRng, n: usize, t: usize) -> Array2<f64> {
    Array2::from_shape_fn((n, t), |_| {
        let u: f64 = rng.random_range(-0.4999..0.4999);
        -u.signum() * (1.0 - 2.0 * u.abs()).ln() / std::f64::consts::SQRT_2
    })
}

pub fn gaussian(rng: &mut StdRng, n: usize, t: usize) -> Array2<f64> {
    Array2::from_shape_fn((n, t), |_| rng.sample(StandardNormal))
}

/// Unit-variance uniform samples.
pub fn uniform(rng: &mut StdRng, n: usize, t: usize) -> Array2<f64> {
    let half_width = 3f64.sqrt();
    Array2::from_shape_fn((n, t), |_| rng.random_range(-half_width..half_width))
}

/// `Q1·diag(1, 2, …, n)·Q2`, condition number `n`.
pub fn well_conditioned_mixing(rng: &mut StdRng, n: usize) -> Array2<f64> {
    let q1 = random_orthogonal(n, rng).unwrap();
    let q2 = random_orthogonal(n, rng).unwrap();
    let d = Array2::from_diag(&Array1::from_iter((1..=n).map(|k| k as f64)));
    q1.dot(&d).dot(&q2)
}

/// Stack source blocks row-wise.
pub fn stack(blocks: &[Array2<f64>]) -> Array2<f64> {
    let views: Vec<_> = blocks.iter().map(|b| b.view()).collect();
    ndarray::concatenate(ndarray::Axis(0), &views).unwrap()
}

/// Index and value of the largest absolute correlation in each row.
pub fn best_matches(corr: &Array2<f64>) -> Vec<(usize, f64)> {
    corr.rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .map(|v| v.abs())
                .enumerate()
                .fold((0, 0.0), |best, (j, v)| if v > best.1 { (j, v) } else { best })
        })
        .collect()
}

/// Sample excess kurtosis of a row.
pub fn excess_kurtosis(row: ndarray::ArrayView1<'_, f64>) -> f64 {
    let t = row.len() as f64;
    let mean = row.sum() / t;
    let var = row.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / t;
    let m4 = row.iter().map(|v| (v - mean).powi(4)).sum::<f64>() / t;
    m4 / (var * var) - 3.0
}

//! Helpers for evaluating a separation against known sources.

use crate::error::Result;
use crate::math::sym_decorrelation;
use ndarray::{s, Array2, ArrayView2, Axis, Zip};
use rand::Rng;
use rand_distr::StandardNormal;

/// Permute and scale the rows of a square matrix to bring it close to identity.
///
/// Typically applied to the global system `W·A`; for a good separation the
/// result is near-diagonal, with unit diagonal when `scale` is set.
pub fn permute(a: &Array2<f64>, scale: bool) -> Array2<f64> {
    let n = a.nrows();
    let mut a = a.clone();

    // Swap row pairs while that increases diagonal energy
    let mut done = false;
    while !done {
        done = true;
        for i in 0..n {
            for j in 0..i {
                let diag_sq = a[[i, i]].powi(2) + a[[j, j]].powi(2);
                let off_sq = a[[i, j]].powi(2) + a[[j, i]].powi(2);
                if diag_sq < off_sq {
                    let (upper, lower) = a.multi_slice_mut((s![j, ..], s![i, ..]));
                    Zip::from(upper).and(lower).for_each(std::mem::swap);
                    done = false;
                }
            }
        }
    }

    if scale {
        for (i, mut row) in a.axis_iter_mut(Axis(0)).enumerate() {
            let diag = row[i];
            if diag.abs() > 1e-10 {
                row.mapv_inplace(|v| v / diag);
            }
        }
    }

    a
}

/// Amari distance between an unmixing matrix and the true mixing matrix.
///
/// Zero exactly when `W·A` is a scaled permutation; grows toward 1 as the
/// global system spreads its energy across columns.
pub fn amari_distance(w: &Array2<f64>, a: &Array2<f64>) -> f64 {
    let p = w.dot(a).mapv(|x| x * x);
    let n = p.nrows() as f64;

    let spread = |m: ArrayView2<'_, f64>| -> f64 {
        m.rows()
            .into_iter()
            .map(|row| {
                let total: f64 = row.sum();
                let peak = row.iter().cloned().fold(0.0, f64::max);
                if peak > 1e-15 {
                    total / peak - 1.0
                } else {
                    0.0
                }
            })
            .sum()
    };

    (spread(p.view()) + spread(p.t())) / (2.0 * n)
}

/// Random `n × n` orthogonal matrix: a Gaussian matrix after symmetric
/// decorrelation.
pub fn random_orthogonal<R: Rng>(n: usize, rng: &mut R) -> Result<Array2<f64>> {
    let w = Array2::from_shape_fn((n, n), |_| rng.sample::<f64, _>(StandardNormal));
    sym_decorrelation(&w)
}

/// Pearson correlation between every row of `a` and every row of `b`.
///
/// Entry `(i, j)` correlates `a[i]` with `b[j]`; both inputs need the same
/// number of columns. Constant rows correlate as 0.
pub fn correlation_matrix(a: &Array2<f64>, b: &Array2<f64>) -> Array2<f64> {
    let standardize = |m: &Array2<f64>| -> Array2<f64> {
        let t = m.ncols() as f64;
        let mut out = m.clone();
        for mut row in out.axis_iter_mut(Axis(0)) {
            let mean = row.sum() / t;
            row.mapv_inplace(|v| v - mean);
            let norm = row.dot(&row).sqrt();
            if norm > 0.0 {
                row.mapv_inplace(|v| v / norm);
            }
        }
        out
    };

    standardize(a).dot(&standardize(b).t())
}

/// Numerically check that the score is the derivative of the log-likelihood
/// and that the score derivative is the derivative of the score.
#[cfg(test)]
pub fn check_density<D: crate::density::Density>(density: &D, tol: f64) -> bool {
    let eps = 1e-6;

    [-2.0, -1.0, -0.5, 0.0, 0.5, 1.0, 2.0].iter().all(|&y| {
        let numerical_score = (density.log_lik(y + eps) - density.log_lik(y - eps)) / (2.0 * eps);
        let numerical_der =
            (density.score_and_der(y + eps).0 - density.score_and_der(y - eps).0) / (2.0 * eps);
        let (score, der) = density.score_and_der(y);
        (numerical_score - score).abs() < tol && (numerical_der - der).abs() < tol
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::density::{Cube, Exp, Nonlinearity, Tanh};
    use crate::math::{inverse, orthogonality_error};
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_amari_distance_perfect() {
        let a = array![[1.0, 0.5, 0.2], [0.3, 1.0, 0.4], [0.1, 0.2, 1.0]];

        let w = inverse(&a).unwrap();
        let dist = amari_distance(&w, &a);

        assert!(dist < 1e-10, "Amari distance should be ~0, got {}", dist);
    }

    #[test]
    fn test_amari_distance_permutation() {
        let a = array![[1.0, 0.5], [0.3, 1.0]];
        let w_inv = inverse(&a).unwrap();

        // Swap rows and rescale one of them
        let w = array![
            [w_inv[[1, 0]], w_inv[[1, 1]]],
            [-3.0 * w_inv[[0, 0]], -3.0 * w_inv[[0, 1]]]
        ];

        let dist = amari_distance(&w, &a);
        assert!(dist < 1e-10, "Amari distance should be ~0, got {}", dist);
    }

    #[test]
    fn test_amari_distance_of_mixed_system_is_positive() {
        let a = array![[1.0, 1.0], [1.0, -1.0]];
        assert!(amari_distance(&Array2::eye(2), &a) > 0.5);
    }

    #[test]
    fn test_permute() {
        let a = array![[0.1, 0.9], [0.95, 0.05]];

        let p = permute(&a, true);

        assert!((p[[0, 0]] - 1.0).abs() < 1e-6, "Diagonal should be 1, got {}", p[[0, 0]]);
        assert!((p[[1, 1]] - 1.0).abs() < 1e-6, "Diagonal should be 1, got {}", p[[1, 1]]);
        assert!(p[[0, 1]].abs() < 0.1);
    }

    #[test]
    fn test_random_orthogonal() {
        let mut rng = StdRng::seed_from_u64(0);
        let q = random_orthogonal(4, &mut rng).unwrap();
        assert!(orthogonality_error(&q) < 1e-10);
    }

    #[test]
    fn test_correlation_matrix() {
        let a = array![[1.0, 2.0, 3.0, 4.0], [1.0, -1.0, 1.0, -1.0]];
        let b = array![[-2.0, -4.0, -6.0, -8.0]];
        let c = correlation_matrix(&a, &b);
        assert_eq!(c.dim(), (2, 1));
        assert!((c[[0, 0]] + 1.0).abs() < 1e-12);
        assert!(c[[1, 0]].abs() < 0.5);
    }

    #[test]
    fn test_density_tanh() {
        assert!(check_density(&Tanh::default(), 1e-5));
        assert!(check_density(&Tanh::new(2.0), 1e-5));
    }

    #[test]
    fn test_density_exp() {
        assert!(check_density(&Exp::new(0.1), 1e-5));
    }

    #[test]
    fn test_density_cube() {
        assert!(check_density(&Cube::new(), 1e-5));
    }

    #[test]
    fn test_density_enum_dispatch() {
        assert!(check_density(&Nonlinearity::exp(), 1e-5));
    }
}

// src/preconditioner.rs

//! Block-diagonal Hessian approximation used as the base preconditioner.
//!
//! In relative coordinates the ICA Hessian is close to block diagonal: each
//! unordered component pair `(i, j)` couples only the two entries `E_ij` and
//! `E_ji`. The approximation stores one 2×2 block per pair in a flat array,
//! indexed by [`pair_index`], plus one scalar per diagonal entry. Blocks are
//! regularized to be positive definite and stored already inverted.

use crate::objective::CurvatureStats;
use ndarray::Array2;

/// Which Hessian approximation to build for the general problem.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HessianApprox {
    /// `ĥ_ij = E[ψ'(y_i)]·E[y_j²]`: cheap, exact when sources are independent.
    H1,
    /// `ĥ_ij = E[ψ'(y_i)·y_j²]`: one extra product per iteration, usually
    /// converges in fewer iterations.
    #[default]
    H2,
}

type Block = [[f64; 2]; 2];

/// Flat index of the unordered pair `i < j` among `n` components.
#[inline]
pub fn pair_index(n: usize, i: usize, j: usize) -> usize {
    debug_assert!(i < j && j < n);
    i * n - i * (i + 1) / 2 + (j - i - 1)
}

/// Smallest eigenvalue of a symmetric 2×2 block.
#[inline]
fn min_eigenvalue(block: &Block) -> f64 {
    let [[a, b], [_, d]] = *block;
    0.5 * (a + d - ((a - d) * (a - d) + 4.0 * b * b).sqrt())
}

/// Shift the diagonal so the smallest eigenvalue is at least `lambda_min`.
///
/// Returns whether a shift was applied.
fn regularize_block(block: &mut Block, lambda_min: f64) -> bool {
    let lowest = min_eigenvalue(block);
    if lowest.is_nan() {
        *block = [[lambda_min, 0.0], [0.0, lambda_min]];
        return true;
    }
    if lowest < lambda_min {
        let shift = lambda_min - lowest;
        block[0][0] += shift;
        block[1][1] += shift;
        return true;
    }
    false
}

/// Closed-form inverse of a positive definite 2×2 block.
#[inline]
fn invert_block(block: &Block) -> Block {
    let [[a, b], [c, d]] = *block;
    let det = a * d - b * c;
    [[d / det, -b / det], [-c / det, a / det]]
}

/// Inverse of the block-diagonal Hessian approximation.
#[derive(Debug, Clone)]
pub struct BlockPreconditioner {
    n: usize,
    /// Inverse blocks acting on `(E_ij, E_ji)` for `i < j`.
    blocks: Vec<Block>,
    /// Inverse diagonal curvatures acting on `E_ii`.
    diagonal: Vec<f64>,
    regularized: usize,
}

impl BlockPreconditioner {
    /// Preconditioner for the orthogonal problem.
    ///
    /// On skew-symmetric directions each pair has a single degree of freedom
    /// with curvature `½(E[ψ'_i] + E[ψ'_j] − ĝ_ii − ĝ_jj)`.
    pub fn orthogonal(stats: &CurvatureStats, lambda_min: f64) -> Self {
        let n = stats.score_der_mean.len();
        let mut blocks = vec![[[0.0; 2]; 2]; n * n.saturating_sub(1) / 2];
        let mut regularized = 0;

        for i in 0..n {
            for j in (i + 1)..n {
                let mut h = 0.5
                    * (stats.score_der_mean[i] + stats.score_der_mean[j]
                        - stats.gradient_diag[i]
                        - stats.gradient_diag[j]);
                if !(h >= lambda_min) {
                    h = lambda_min;
                    regularized += 1;
                }
                blocks[pair_index(n, i, j)] = [[1.0 / h, 0.0], [0.0, 1.0 / h]];
            }
        }

        Self {
            n,
            blocks,
            diagonal: vec![0.0; n],
            regularized,
        }
    }

    /// Preconditioner for the general problem.
    ///
    /// Block for pair `(i, j)` is `[[ĥ_ij, 1], [1, ĥ_ji]]` and the diagonal
    /// curvature is `ĥ_ii + 1`.
    pub fn general(stats: &CurvatureStats, approx: HessianApprox, lambda_min: f64) -> Self {
        let n = stats.score_der_mean.len();
        let h = Self::curvature_matrix(stats, approx);

        let mut blocks = vec![[[0.0; 2]; 2]; n * n.saturating_sub(1) / 2];
        let mut regularized = 0;
        for i in 0..n {
            for j in (i + 1)..n {
                let mut block = [[h[[i, j]], 1.0], [1.0, h[[j, i]]]];
                if regularize_block(&mut block, lambda_min) {
                    regularized += 1;
                }
                blocks[pair_index(n, i, j)] = invert_block(&block);
            }
        }

        let diagonal = (0..n)
            .map(|i| {
                let d = h[[i, i]] + 1.0;
                if d >= lambda_min {
                    1.0 / d
                } else {
                    regularized += 1;
                    1.0 / lambda_min
                }
            })
            .collect();

        Self {
            n,
            blocks,
            diagonal,
            regularized,
        }
    }

    fn curvature_matrix(stats: &CurvatureStats, approx: HessianApprox) -> Array2<f64> {
        let n = stats.score_der_mean.len();
        let cross = stats.score_der_cross.as_ref();
        match (approx, cross) {
            (HessianApprox::H2, Some(cross)) => cross.clone(),
            (_, cross) => Array2::from_shape_fn((n, n), |(i, j)| {
                if i == j {
                    cross
                        .map(|c| c[[i, i]])
                        .unwrap_or(stats.score_der_mean[i] * stats.second_moment[i])
                } else {
                    stats.score_der_mean[i] * stats.second_moment[j]
                }
            }),
        }
    }

    /// Number of blocks (and diagonal entries) that needed regularization.
    pub fn regularized_blocks(&self) -> usize {
        self.regularized
    }

    /// Apply the inverse Hessian approximation to `g`.
    pub fn apply(&self, g: &Array2<f64>) -> Array2<f64> {
        let mut out = Array2::zeros((self.n, self.n));
        self.apply_into(g, &mut out);
        out
    }

    /// Apply the inverse Hessian approximation to `g`, writing into `out`.
    pub fn apply_into(&self, g: &Array2<f64>, out: &mut Array2<f64>) {
        let n = self.n;
        debug_assert_eq!(g.dim(), (n, n));
        debug_assert_eq!(out.dim(), (n, n));

        for i in 0..n {
            out[[i, i]] = self.diagonal[i] * g[[i, i]];
            for j in (i + 1)..n {
                let [[a, b], [c, d]] = self.blocks[pair_index(n, i, j)];
                let (e, f) = (g[[i, j]], g[[j, i]]);
                out[[i, j]] = a * e + b * f;
                out[[j, i]] = c * e + d * f;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    fn stats(n: usize) -> CurvatureStats {
        CurvatureStats {
            score_der_mean: Array1::from_elem(n, 0.6),
            score_der_cross: Some(Array2::from_shape_fn((n, n), |(i, j)| {
                1.5 + 0.1 * i as f64 + 0.05 * j as f64
            })),
            second_moment: Array1::ones(n),
            gradient_diag: Array1::from_elem(n, 0.4),
        }
    }

    #[test]
    fn pair_index_is_dense_and_unique() {
        let n = 5;
        let mut seen = vec![false; n * (n - 1) / 2];
        for i in 0..n {
            for j in (i + 1)..n {
                let k = pair_index(n, i, j);
                assert!(!seen[k]);
                seen[k] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn general_blocks_solve_pair_systems() {
        let s = stats(3);
        let precon = BlockPreconditioner::general(&s, HessianApprox::H2, 1e-6);
        let g = array![[0.2, -0.3, 0.1], [0.4, -0.1, 0.25], [-0.2, 0.05, 0.3]];
        let z = precon.apply(&g);
        let h = s.score_der_cross.as_ref().unwrap();

        for i in 0..3 {
            assert!((z[[i, i]] * (h[[i, i]] + 1.0) - g[[i, i]]).abs() < 1e-12);
            for j in (i + 1)..3 {
                let r1 = h[[i, j]] * z[[i, j]] + z[[j, i]];
                let r2 = z[[i, j]] + h[[j, i]] * z[[j, i]];
                assert!((r1 - g[[i, j]]).abs() < 1e-12);
                assert!((r2 - g[[j, i]]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn indefinite_blocks_are_regularized() {
        let mut s = stats(2);
        // [[0.1, 1], [1, 0.1]] has eigenvalues 1.1 and -0.9.
        s.score_der_cross = Some(array![[0.5, 0.1], [0.1, 0.5]]);
        let lambda_min = 0.01;
        let precon = BlockPreconditioner::general(&s, HessianApprox::H2, lambda_min);
        assert_eq!(precon.regularized_blocks(), 1);

        // The regularized block is [[0.1 + 0.91, 1], [1, 0.1 + 0.91]].
        let g = array![[0.0, 1.0], [1.0, 0.0]];
        let z = precon.apply(&g);
        let expected = 1.0 / (1.01 + 1.0);
        assert!((z[[0, 1]] - expected).abs() < 1e-12);
        assert!(z.iter().all(|v| v.is_finite()));

        // Positive definite: <g, P g> > 0 for any g.
        let g = array![[0.3, -1.0], [0.7, -0.2]];
        let z = precon.apply(&g);
        let inner: f64 = g.iter().zip(z.iter()).map(|(a, b)| a * b).sum();
        assert!(inner > 0.0);
    }

    #[test]
    fn h1_uses_separable_curvature() {
        let s = stats(3);
        let h = BlockPreconditioner::curvature_matrix(&s, HessianApprox::H1);
        assert!((h[[0, 1]] - 0.6).abs() < 1e-12);
        assert!((h[[1, 1]] - s.score_der_cross.as_ref().unwrap()[[1, 1]]).abs() < 1e-12);
    }

    #[test]
    fn orthogonal_preconditioner_keeps_skew_symmetry() {
        let s = stats(3);
        let precon = BlockPreconditioner::orthogonal(&s, 0.01);
        let g = array![[0.0, 0.2, -0.1], [-0.2, 0.0, 0.3], [0.1, -0.3, 0.0]];
        let z = precon.apply(&g);
        for i in 0..3 {
            assert_eq!(z[[i, i]], 0.0);
            for j in 0..3 {
                assert!((z[[i, j]] + z[[j, i]]).abs() < 1e-15);
            }
        }
        // h = 0.5 * (0.6 + 0.6 - 0.4 - 0.4) = 0.2
        assert!((z[[0, 1]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn orthogonal_preconditioner_clamps_negative_curvature() {
        let mut s = stats(2);
        s.gradient_diag = Array1::from_elem(2, 2.0);
        let precon = BlockPreconditioner::orthogonal(&s, 0.5);
        assert_eq!(precon.regularized_blocks(), 1);
        let z = precon.apply(&array![[0.0, 1.0], [-1.0, 0.0]]);
        assert!((z[[0, 1]] - 2.0).abs() < 1e-12);
    }
}

// src/lbfgs.rs

//! L-BFGS curvature memory and two-loop recursion.

use crate::math::{frobenius_inner, skew_symmetric};
use crate::preconditioner::BlockPreconditioner;
use ndarray::Array2;

/// Minimum `⟨s, y⟩` for a pair to enter the memory.
const CURVATURE_EPS: f64 = 1e-10;

/// One stored curvature pair.
#[derive(Debug, Clone)]
pub struct CurvaturePair {
    /// Step difference (s_k = x_{k+1} - x_k).
    pub step: Array2<f64>,
    /// Gradient difference (y_k = g_{k+1} - g_k).
    pub grad_diff: Array2<f64>,
    /// Curvature estimate (r_k = 1 / (s_k · y_k)).
    pub rho: f64,
}

/// Fixed-capacity ring buffer of curvature pairs.
///
/// Slots are allocated once; pushing into a full buffer overwrites the
/// oldest pair.
pub struct CurvaturePairHistory {
    slots: Vec<CurvaturePair>,
    /// Index of the oldest pair.
    head: usize,
    len: usize,
}

impl CurvaturePairHistory {
    /// Create a history holding at most `capacity` pairs of `n × n` matrices.
    pub fn new(capacity: usize, n: usize) -> Self {
        let slots = (0..capacity.max(1))
            .map(|_| CurvaturePair {
                step: Array2::zeros((n, n)),
                grad_diff: Array2::zeros((n, n)),
                rho: 0.0,
            })
            .collect();
        Self {
            slots,
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Get the number of stored pairs.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Clear all stored memory.
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    /// Record a new pair, evicting the oldest one when full.
    ///
    /// Pairs violating the curvature condition `⟨s, y⟩ > 0` are skipped;
    /// returns whether the pair was stored.
    pub fn push(&mut self, step: &Array2<f64>, grad_diff: &Array2<f64>) -> bool {
        let sy = frobenius_inner(step, grad_diff);
        if !(sy > CURVATURE_EPS) {
            return false;
        }

        let capacity = self.capacity();
        let slot = if self.len < capacity {
            self.len += 1;
            (self.head + self.len - 1) % capacity
        } else {
            let oldest = self.head;
            self.head = (self.head + 1) % capacity;
            oldest
        };

        let pair = &mut self.slots[slot];
        pair.step.assign(step);
        pair.grad_diff.assign(grad_diff);
        pair.rho = 1.0 / sy;
        true
    }

    /// Stored pairs, oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &CurvaturePair> + '_ {
        let capacity = self.capacity();
        (0..self.len).map(move |k| &self.slots[(self.head + k) % capacity])
    }

    /// Compute the L-BFGS search direction.
    ///
    /// Two-loop recursion whose base case is the block preconditioner
    /// instead of a scaled identity. Returns the negated product, i.e. a
    /// descent direction when the implied inverse Hessian is positive definite.
    pub fn direction(
        &self,
        g: &Array2<f64>,
        preconditioner: &BlockPreconditioner,
        ortho: bool,
    ) -> Array2<f64> {
        let mut q = g.clone();
        let mut alphas = Vec::with_capacity(self.len);

        // First loop: backward through memory
        for pair in self.iter().rev() {
            let alpha = pair.rho * frobenius_inner(&pair.step, &q);
            q.scaled_add(-alpha, &pair.grad_diff);
            alphas.push(alpha);
        }
        alphas.reverse();

        let mut z = preconditioner.apply(&q);

        // Second loop: forward through memory
        for (pair, &alpha) in self.iter().zip(alphas.iter()) {
            let beta = pair.rho * frobenius_inner(&pair.grad_diff, &z);
            z.scaled_add(alpha - beta, &pair.step);
        }

        if ortho {
            z = skew_symmetric(&z);
        }
        -z
    }
}

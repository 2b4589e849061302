use std::collections::VecDeque;

use crate::math::dot;

/// Curvature pairs with `yᵗs` at or below this are rejected.
const MIN_CURVATURE: f64 = 1e-10;

/// Bounded L-BFGS memory of `(s, y)` pairs, oldest first.
#[derive(Debug, Clone)]
pub(crate) struct LbfgsHistory {
    capacity: usize,
    pairs: VecDeque<CorrectionPair>,
    h_diag: f64,
}

#[derive(Debug, Clone)]
struct CorrectionPair {
    s: Vec<f64>,
    y: Vec<f64>,
    /// `1 / yᵗs`
    rho: f64,
}

impl LbfgsHistory {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "L-BFGS history needs at least one correction");
        Self {
            capacity,
            pairs: VecDeque::with_capacity(capacity.min(64)),
            h_diag: 1.0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[inline]
    pub fn h_diag(&self) -> f64 {
        self.h_diag
    }

    /// Records the step `s` and gradient change `y`.
    ///
    /// Returns `false` and leaves the memory untouched when the curvature condition fails.
    pub fn push(&mut self, s: Vec<f64>, y: Vec<f64>) -> bool {
        let ys = dot(&y, &s);
        if ys <= MIN_CURVATURE {
            return false;
        }

        if self.pairs.len() == self.capacity {
            self.pairs.pop_front();
        }
        self.h_diag = ys / dot(&y, &y);
        self.pairs.push_back(CorrectionPair { s, y, rho: 1.0 / ys });
        true
    }

    /// Writes `-H·g` into `direction` using the two-loop recursion.
    pub fn direction(&self, g: &[f64], direction: &mut [f64]) {
        debug_assert_eq!(g.len(), direction.len());
        direction
            .iter_mut()
            .zip(g)
            .for_each(|(d, &gi)| *d = -gi);

        let mut alpha = vec![0.0; self.pairs.len()];
        for (i, pair) in self.pairs.iter().enumerate().rev() {
            alpha[i] = pair.rho * dot(&pair.s, direction);
            axpy(-alpha[i], &pair.y, direction);
        }

        direction.iter_mut().for_each(|d| *d *= self.h_diag);

        for (i, pair) in self.pairs.iter().enumerate() {
            let beta = pair.rho * dot(&pair.y, direction);
            axpy(alpha[i] - beta, &pair.s, direction);
        }
    }
}

/// `out += a * x`
#[inline]
fn axpy(a: f64, x: &[f64], out: &mut [f64]) {
    out.iter_mut().zip(x).for_each(|(o, &xi)| *o += a * xi);
}

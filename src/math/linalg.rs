//! Dense linear-algebra helpers on top of nalgebra.
//!
//! The latent models in this crate have a few hundred to a few thousand
//! coordinates, so dense Cholesky factorisations are fast enough and keep the
//! code simple. Symmetric positive definite solves go through
//! [`factorize_spd`], which retries with a growing diagonal jitter before giving
//! up.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

/// Cholesky factor of an SPD matrix, plus the jitter that was needed.
pub struct SpdFactor {
    pub cholesky: Cholesky<f64, Dyn>,
    pub jitter: f64,
}

impl SpdFactor {
    /// `ln |A|` from the Cholesky diagonal.
    pub fn ln_det(&self) -> f64 {
        2.0 * self
            .cholesky
            .l_dirty()
            .diagonal()
            .iter()
            .map(|d| d.ln())
            .sum::<f64>()
    }

    pub fn solve(&self, b: &DVector<f64>) -> DVector<f64> {
        self.cholesky.solve(b)
    }

    pub fn inverse(&self) -> DMatrix<f64> {
        self.cholesky.inverse()
    }
}

/// Factorize a symmetric positive definite matrix.
///
/// Returns `None` when the matrix stays indefinite even after jitter.
pub fn factorize_spd(a: &DMatrix<f64>) -> Option<SpdFactor> {
    if let Some(cholesky) = Cholesky::new(a.clone()) {
        return Some(SpdFactor {
            cholesky,
            jitter: 0.0,
        });
    }

    let scale = a
        .diagonal()
        .iter()
        .fold(0.0_f64, |acc, d| acc.max(d.abs()))
        .max(1.0);
    for &rel in &[1e-10, 1e-8, 1e-6] {
        let jitter = rel * scale;
        let mut m = a.clone();
        for i in 0..m.nrows() {
            m[(i, i)] += jitter;
        }
        if let Some(cholesky) = Cholesky::new(m) {
            return Some(SpdFactor { cholesky, jitter });
        }
    }

    None
}

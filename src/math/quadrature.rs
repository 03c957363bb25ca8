//! Gauss–Hermite quadrature for expectations under a normal marginal.
//!
//! Nodes and weights come from the Golub–Welsch eigen-decomposition of the
//! Jacobi matrix of the probabilists' Hermite polynomials, so
//!
//! ```text
//! E[f(m + s Z)] ≈ Σ_k w_k f(m + s z_k),   Z ~ N(0, 1),   Σ_k w_k = 1
//! ```

use nalgebra::{DMatrix, SymmetricEigen};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Default number of nodes; exact for polynomials up to degree 47.
pub const DEFAULT_NODES: usize = 24;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaussHermite {
    nodes: Vec<f64>,
    weights: Vec<f64>,
}

impl GaussHermite {
    pub fn new(n: usize) -> Result<Self, AppError> {
        if n == 0 {
            return Err(AppError::input("Quadrature needs at least one node."));
        }

        let mut jacobi = DMatrix::<f64>::zeros(n, n);
        for k in 1..n {
            let off = (k as f64).sqrt();
            jacobi[(k - 1, k)] = off;
            jacobi[(k, k - 1)] = off;
        }

        let eigen = SymmetricEigen::new(jacobi);
        let mut pairs: Vec<(f64, f64)> = (0..n)
            .map(|k| {
                let v0 = eigen.eigenvectors[(0, k)];
                (eigen.eigenvalues[k], v0 * v0)
            })
            .collect();
        pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let total: f64 = pairs.iter().map(|p| p.1).sum();
        if !(total.is_finite() && total > 0.0) {
            return Err(AppError::numeric("Gauss–Hermite weights did not normalise."));
        }

        Ok(Self {
            nodes: pairs.iter().map(|p| p.0).collect(),
            weights: pairs.iter().map(|p| p.1 / total).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Abscissae `m + s z_k` with their weights.
    pub fn points(&self, mean: f64, sd: f64) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.nodes
            .iter()
            .zip(self.weights.iter())
            .map(move |(&z, &w)| (mean + sd * z, w))
    }

    /// `E[f(X)]` for `X ~ N(mean, sd²)`.
    pub fn expect(&self, mean: f64, sd: f64, f: impl Fn(f64) -> f64) -> f64 {
        self.points(mean, sd).map(|(x, w)| w * f(x)).sum()
    }
}

impl Default for GaussHermite {
    fn default() -> Self {
        // DEFAULT_NODES is a valid size, so construction cannot fail.
        Self::new(DEFAULT_NODES).unwrap_or(Self {
            nodes: vec![0.0],
            weights: vec![1.0],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reproduces_normal_moments() {
        let gh = GaussHermite::new(20).unwrap();
        let m = 1.5;
        let s = 0.7;
        assert!((gh.expect(m, s, |_| 1.0) - 1.0).abs() < 1e-12);
        assert!((gh.expect(m, s, |x| x) - m).abs() < 1e-12);
        assert!((gh.expect(m, s, |x| (x - m).powi(2)) - s * s).abs() < 1e-12);
        assert!((gh.expect(m, s, |x| (x - m).powi(4)) - 3.0 * s.powi(4)).abs() < 1e-10);
    }

    #[test]
    fn lognormal_mean_is_exact_enough() {
        let gh = GaussHermite::default();
        let m: f64 = -0.3;
        let s: f64 = 0.4;
        let expected = (m + 0.5 * s * s).exp();
        assert!((gh.expect(m, s, f64::exp) - expected).abs() < 1e-12);
    }

    #[test]
    fn nodes_are_symmetric() {
        let gh = GaussHermite::new(7).unwrap();
        let pts: Vec<(f64, f64)> = gh.points(0.0, 1.0).collect();
        for k in 0..pts.len() {
            let j = pts.len() - 1 - k;
            assert!((pts[k].0 + pts[j].0).abs() < 1e-10);
            assert!((pts[k].1 - pts[j].1).abs() < 1e-12);
        }
    }
}

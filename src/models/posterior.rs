//! Fitted-model outputs.
//!
//! `FitResult` is created once by an engine. Cross-validation scores are the
//! only later addition and go through `with_cross_validation`, which returns a
//! new value.
//!
//! `LinearPredictorPosterior` is the Gaussian approximation of the linear
//! predictor `η` plus the likelihood curvature at the mode. It is all that is
//! needed for information criteria and leave-group-out predictive densities,
//! independent of the engine that produced it.

use nalgebra::{DMatrix, DVector};
use serde::Serialize;

use crate::math::{GaussHermite, factorize_spd, normal_quantile, poisson_ln_pmf};
use crate::models::PriorConfig;

/// Correlations closer than this fall in the same level set.
const LEVEL_TOL: f64 = 1e-10;

/// Largest predictive sd on the η scale the quadrature rule can integrate a
/// Poisson likelihood against.
const MAX_PREDICTIVE_SD: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FixedEffectSummary {
    pub name: String,
    pub mean: f64,
    pub sd: f64,
    pub q025: f64,
    pub q500: f64,
    pub q975: f64,
}

impl FixedEffectSummary {
    /// Summary of a Gaussian marginal.
    pub fn gaussian(name: impl Into<String>, mean: f64, sd: f64) -> Self {
        let z = normal_quantile(0.975);
        Self {
            name: name.into(),
            mean,
            sd,
            q025: mean - z * sd,
            q500: mean,
            q975: mean + z * sd,
        }
    }
}

/// Precision hyperparameter at the posterior mode of `θ = log τ`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HyperSummary {
    pub name: String,
    pub log_precision: f64,
    /// Curvature-based sd of `log τ`; `None` if the curvature is not negative.
    pub log_precision_sd: Option<f64>,
    pub precision: f64,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl HyperSummary {
    pub fn new(name: impl Into<String>, theta: f64, theta_sd: Option<f64>) -> Self {
        let z = normal_quantile(0.975);
        Self {
            name: name.into(),
            log_precision: theta,
            log_precision_sd: theta_sd,
            precision: theta.exp(),
            lower: theta_sd.map(|s| (theta - z * s).exp()),
            upper: theta_sd.map(|s| (theta + z * s).exp()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FitStatistics {
    /// `D̄ = E[-2 log p(y | η)]`.
    pub mean_deviance: f64,
    /// `D(η̄)`.
    pub deviance_at_mean: f64,
    /// `pD = D̄ - D(η̄)`.
    pub p_d: f64,
    pub dic: f64,
    pub lppd: f64,
    pub p_waic: f64,
    pub waic: f64,
}

/// Per-observation fitted relative risk `exp(η - log E)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FittedValue {
    pub area_id: String,
    pub year: i32,
    pub observed: u64,
    pub expected: f64,
    pub eta_mean: f64,
    pub eta_sd: f64,
    pub rr_mean: f64,
    pub rr_lower: f64,
    pub rr_upper: f64,
}

/// Area-level spatial relative risk `exp(u + v)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AreaEffect {
    pub area_id: String,
    pub mean: f64,
    pub sd: f64,
    pub rr_mean: f64,
    /// `P(exp(u + v) > 1 | y)`.
    pub prob_excess: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossValidation {
    /// Mean negative log CPO.
    pub loocv: Option<f64>,
    /// `(level sets, mean negative log score)` per grouped variant.
    pub group: Vec<(usize, Option<f64>)>,
}

impl CrossValidation {
    pub fn group_score(&self, level_sets: usize) -> Option<f64> {
        self.group
            .iter()
            .find(|(k, _)| *k == level_sets)
            .and_then(|(_, s)| *s)
    }
}

/// Gaussian approximation of the linear predictor.
#[derive(Debug, Clone)]
pub struct LinearPredictorPosterior {
    pub observed: Vec<u64>,
    /// Posterior mean of `η` (offset included).
    pub mean: Vec<f64>,
    /// Posterior covariance of `η`.
    pub covariance: DMatrix<f64>,
    /// `-∂² log p(y_i | η_i)` at the mode.
    pub curvature: Vec<f64>,
    /// `∂ log p(y_i | η_i)` at the mode.
    pub gradient: Vec<f64>,
    pub quadrature: GaussHermite,
}

impl LinearPredictorPosterior {
    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    pub fn sd(&self, i: usize) -> f64 {
        self.covariance[(i, i)].max(0.0).sqrt()
    }

    /// DIC and WAIC by quadrature over each marginal.
    pub fn statistics(&self) -> FitStatistics {
        let mut mean_deviance = 0.0;
        let mut deviance_at_mean = 0.0;
        let mut lppd = 0.0;
        let mut p_waic = 0.0;

        for i in 0..self.len() {
            let y = self.observed[i];
            let (m, s) = (self.mean[i], self.sd(i));

            let e_log = self.quadrature.expect(m, s, |eta| poisson_ln_pmf(y, eta));
            let e_log2 = self.quadrature.expect(m, s, |eta| poisson_ln_pmf(y, eta).powi(2));
            let e_lik = self.quadrature.expect(m, s, |eta| poisson_ln_pmf(y, eta).exp());

            mean_deviance += -2.0 * e_log;
            deviance_at_mean += -2.0 * poisson_ln_pmf(y, m);
            lppd += e_lik.ln();
            p_waic += (e_log2 - e_log * e_log).max(0.0);
        }

        let p_d = mean_deviance - deviance_at_mean;
        FitStatistics {
            mean_deviance,
            deviance_at_mean,
            p_d,
            dic: mean_deviance + p_d,
            lppd,
            p_waic,
            waic: -2.0 * (lppd - p_waic),
        }
    }

    /// Predictive density of `y_i` with the likelihood terms of `group`
    /// removed (`group` must contain `i`).
    ///
    /// The Gaussian approximation is downdated by the curvature of the removed
    /// terms:
    ///
    /// ```text
    /// M     = W_G⁻¹ - Σ_GG
    /// var_i = Σ_ii + Σ_iG M⁻¹ Σ_Gi
    /// m_i   = η̂_i - Σ_iG M⁻¹ (g_G / w_G)
    /// ```
    ///
    /// `None` when `M` is not positive definite, or when the downdated
    /// marginal is too wide to integrate (removing the group left `η_i`
    /// identified by its vague prior alone).
    pub fn predictive_density(&self, i: usize, group: &[usize]) -> Option<f64> {
        let k = group.len();
        if k == 0 || i >= self.len() {
            return None;
        }

        let mut m = DMatrix::zeros(k, k);
        for (a, &ga) in group.iter().enumerate() {
            let w = self.curvature[ga];
            if !(w.is_finite() && w > 0.0) {
                return None;
            }
            for (b, &gb) in group.iter().enumerate() {
                m[(a, b)] = -self.covariance[(ga, gb)];
            }
            m[(a, a)] += 1.0 / w;
        }
        let factor = factorize_spd(&m)?;

        let cross = DVector::from_iterator(k, group.iter().map(|&g| self.covariance[(i, g)]));
        let shift = DVector::from_iterator(k, group.iter().map(|&g| self.gradient[g] / self.curvature[g]));

        let solved = factor.solve(&cross);
        let var = self.covariance[(i, i)] + cross.dot(&solved);
        let mean = self.mean[i] - solved.dot(&shift);
        if !(var.is_finite() && var > 0.0 && mean.is_finite()) {
            return None;
        }
        if var.sqrt() > MAX_PREDICTIVE_SD {
            return None;
        }

        let y = self.observed[i];
        let density = self
            .quadrature
            .expect(mean, var.sqrt(), |eta| poisson_ln_pmf(y, eta).exp());
        density.is_finite().then_some(density)
    }

    /// Conditional predictive ordinates (leave-one-out densities).
    pub fn cpo(&self) -> Vec<Option<f64>> {
        (0..self.len()).map(|i| self.predictive_density(i, &[i])).collect()
    }

    /// Group of `i`: observations whose |correlation| with `i` lies in the
    /// `level_sets` highest level sets (`i` itself is the first).
    pub fn correlation_group(&self, i: usize, level_sets: usize) -> Vec<usize> {
        let n = self.len();
        let si = self.sd(i);
        let corr: Vec<f64> = (0..n)
            .map(|j| {
                if j == i {
                    return 1.0;
                }
                let denom = si * self.sd(j);
                if denom > 0.0 {
                    (self.covariance[(i, j)] / denom).abs().min(1.0)
                } else {
                    0.0
                }
            })
            .collect();

        let mut levels: Vec<f64> = corr.clone();
        levels.sort_by(|a, b| b.total_cmp(a));
        levels.dedup_by(|a, b| (*a - *b).abs() <= LEVEL_TOL);

        let Some(&threshold) = levels.get(level_sets.max(1) - 1).or(levels.last()) else {
            return vec![i];
        };
        let mut group: Vec<usize> = (0..n).filter(|&j| corr[j] >= threshold - LEVEL_TOL).collect();
        if !group.contains(&i) {
            group.push(i);
        }
        group
    }
}

/// One fitted model.
#[derive(Debug, Clone, Serialize)]
pub struct FitResult {
    pub model_id: String,
    pub display_name: String,
    pub formula: String,
    pub engine: String,
    pub priors: PriorConfig,
    pub fixed: Vec<FixedEffectSummary>,
    pub hyper: Vec<HyperSummary>,
    pub statistics: FitStatistics,
    pub cpo: Vec<Option<f64>>,
    pub fitted: Vec<FittedValue>,
    pub area_effects: Vec<AreaEffect>,
    /// Laplace approximation of `log p(y | θ̂)` plus the hyperprior.
    pub log_marginal: f64,
    #[serde(skip)]
    pub predictor: LinearPredictorPosterior,
    pub cross_validation: Option<CrossValidation>,
}

impl FitResult {
    pub fn with_cross_validation(self, cross_validation: CrossValidation) -> Self {
        Self {
            cross_validation: Some(cross_validation),
            ..self
        }
    }

    pub fn fixed_effect(&self, name: &str) -> Option<&FixedEffectSummary> {
        self.fixed.iter().find(|f| f.name == name)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Independent observations with a proper Gaussian posterior.
    pub(crate) fn independent(observed: Vec<u64>, mean: Vec<f64>, var: f64) -> LinearPredictorPosterior {
        let n = observed.len();
        let curvature: Vec<f64> = mean.iter().map(|m: &f64| m.exp()).collect();
        let gradient = observed
            .iter()
            .zip(&curvature)
            .map(|(&y, &mu)| y as f64 - mu)
            .collect();
        LinearPredictorPosterior {
            observed,
            mean,
            covariance: DMatrix::from_diagonal_element(n, n, var),
            curvature,
            gradient,
            quadrature: GaussHermite::default(),
        }
    }

    #[test]
    fn waic_and_dic_are_non_negative() {
        let post = independent(vec![3, 5, 0, 8], vec![1.1, 1.6, -0.5, 2.0], 0.05);
        let s = post.statistics();
        assert!(s.mean_deviance >= 0.0);
        assert!(s.waic >= 0.0);
        assert!(s.dic.is_finite());
        assert!(s.p_waic >= 0.0);
    }

    #[test]
    fn cpo_below_full_posterior_predictive() {
        // Removing an observation widens its marginal.
        let post = independent(vec![4], vec![4f64.ln()], 0.02);
        let cpo = post.cpo()[0].unwrap();
        let full = post
            .quadrature
            .expect(post.mean[0], post.sd(0), |eta| poisson_ln_pmf(4, eta).exp());
        assert!(cpo > 0.0);
        assert!(cpo <= full + 1e-12);
    }

    #[test]
    fn over_removed_group_is_none() {
        // Variance larger than the likelihood alone allows -> M not SPD.
        let post = independent(vec![4], vec![4f64.ln()], 1.0);
        assert!(post.predictive_density(0, &[0]).is_none());
    }

    #[test]
    fn marginal_too_wide_to_integrate_is_none() {
        // var / (1 - wΣ) with w = 1: Σ = 0.99 leaves sd ≈ 10.
        let post = independent(vec![1], vec![0.0], 0.99);
        assert!(post.predictive_density(0, &[0]).is_none());
        let post = independent(vec![1], vec![0.0], 0.5);
        assert!(post.predictive_density(0, &[0]).is_some_and(|d| d > 0.0));
    }

    #[test]
    fn groups_follow_correlation_levels() {
        let mut post = independent(vec![1, 2, 3, 4], vec![0.0; 4], 0.1);
        post.covariance[(0, 1)] = 0.08;
        post.covariance[(1, 0)] = 0.08;
        post.covariance[(0, 2)] = 0.05;
        post.covariance[(2, 0)] = 0.05;

        assert_eq!(post.correlation_group(0, 1), vec![0]);
        assert_eq!(post.correlation_group(0, 2), vec![0, 1]);
        assert_eq!(post.correlation_group(0, 3), vec![0, 1, 2]);
        // More levels than distinct values: everything.
        assert_eq!(post.correlation_group(0, 10), vec![0, 1, 2, 3]);
    }
}

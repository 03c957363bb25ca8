//! Built-in Laplace-approximation engine.
//!
//! Latent Gaussian model:
//!
//! ```text
//! y_i ~ Poisson(exp(η_i))
//! η   = log E + A x
//! x   = [β, block_1, ..., block_B]
//! Q(θ) = Q_fixed + Σ_b exp(θ_b) R_b + κ Σ_c 1_c 1_cᵀ + ε I
//! ```
//!
//! For fixed `θ` the latent mode comes from Newton–Raphson with step halving.
//! The Laplace approximation of the hyperparameter posterior is
//!
//! ```text
//! log p(θ | y) ≈ f(x̂) - ½ log |H| + Σ_b (½ rank_b θ_b + log p(θ_b))
//! f(x)         = Σ_i (y_i η_i - e^{η_i}) - ½ xᵀ Q x
//! H            = Q + Aᵀ diag(e^{η̂}) A
//! ```
//!
//! `θ` is set at its mode by coordinate sweeps over shrinking grids (each grid
//! evaluated in parallel), and the latent posterior is Gaussian `N(x̂, H⁻¹)`
//! at that mode. This is an empirical-Bayes plug-in: there is no integration
//! over `θ`.

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::domain::PreparedTable;
use crate::error::AppError;
use crate::math::{GaussHermite, SpdFactor, factorize_spd, normal_cdf, normal_quantile};
use crate::models::hyper_grid::sweep_candidates;
use crate::models::{
    AreaEffect, BlockIndex, EffectBlock, FitOptions, FitResult, FittedValue, FixedEffectSummary,
    HyperSummary, InferenceEngine, LinearPredictorPosterior, ModelSpec, PriorConfig, latent_blocks,
};
use crate::spatial::AdjacencyGraph;

/// Prior precision of the intercept.
const INTERCEPT_PRECISION: f64 = 1e-5;
/// Prior precision of covariate coefficients.
const COVARIATE_PRECISION: f64 = 1e-3;

#[derive(Debug, Clone)]
pub struct LaplaceEngine {
    /// Grid points per coordinate sweep.
    pub grid_points: usize,
    /// Half-widths (in `log τ`) of the successive sweeps.
    pub sweep_widths: Vec<f64>,
    pub initial_log_precision: f64,
    pub log_precision_bounds: (f64, f64),
    /// Finite-difference step for the `log τ` curvature.
    pub curvature_step: f64,
    pub max_newton_iter: usize,
    pub newton_tolerance: f64,
    /// Weight `κ` of the soft sum-to-zero constraints.
    pub constraint_weight: f64,
    /// Ridge `ε` keeping intrinsic blocks proper.
    pub ridge: f64,
}

impl Default for LaplaceEngine {
    fn default() -> Self {
        Self {
            grid_points: 9,
            sweep_widths: vec![4.0, 4.0, 2.0, 1.0, 0.5, 0.25],
            initial_log_precision: 4.0,
            log_precision_bounds: (-8.0, 16.0),
            curvature_step: 0.1,
            max_newton_iter: 100,
            newton_tolerance: 1e-10,
            constraint_weight: 1e3,
            ridge: 1e-6,
        }
    }
}

/// The assembled latent model of one fit.
struct LatentModel {
    fixed_names: Vec<String>,
    blocks: Vec<EffectBlock>,
    /// First latent coordinate of each block.
    starts: Vec<usize>,
    dim: usize,
    /// Sparse design rows `(latent index, value)`.
    design: Vec<Vec<(usize, f64)>>,
    observed: Vec<f64>,
    offset: Vec<f64>,
    /// The part of `Q` that does not depend on `θ`.
    base_precision: DMatrix<f64>,
}

/// Latent mode for one `θ`.
struct Mode {
    x: DVector<f64>,
    objective: f64,
    factor: SpdFactor,
    iterations: usize,
}

struct Evaluation {
    theta: Vec<f64>,
    log_marginal: f64,
    mode: Mode,
}

impl LatentModel {
    fn build(
        spec: &ModelSpec,
        table: &PreparedTable,
        graph: &AdjacencyGraph,
        offset: &[f64],
        engine: &LaplaceEngine,
    ) -> Result<Self, AppError> {
        if table.is_empty() {
            return Err(AppError::data("Cannot fit a model to an empty table."));
        }
        if offset.len() != table.len() {
            return Err(AppError::input(format!(
                "Offset has {} entries for {} observations.",
                offset.len(),
                table.len()
            )));
        }
        if let Some(i) = offset.iter().position(|o| !o.is_finite()) {
            let r = &table.rows[i];
            return Err(AppError::data(format!(
                "Expected count for area '{}' in {} must be positive.",
                r.area_id, r.year
            )));
        }

        let n_years = table.n_years();
        let blocks = latent_blocks(spec, graph, n_years)?;

        let mut fixed_names = vec!["(Intercept)".to_string()];
        fixed_names.extend(spec.covariates.iter().map(|c| c.name().to_string()));
        let n_fixed = fixed_names.len();

        let mut starts = Vec::with_capacity(blocks.len());
        let mut dim = n_fixed;
        for b in &blocks {
            starts.push(dim);
            dim += b.size();
        }

        let mut design = Vec::with_capacity(table.len());
        for r in &table.rows {
            let area = graph.index_of(&r.area_id).ok_or_else(|| {
                AppError::data(format!("Area '{}' is not a node of the adjacency graph.", r.area_id))
            })?;

            let mut row = Vec::with_capacity(n_fixed + blocks.len());
            row.push((0, 1.0));
            for (k, c) in spec.covariates.iter().enumerate() {
                row.push((1 + k, c.value(r)));
            }
            for (b, start) in blocks.iter().zip(&starts) {
                let local = match b.index {
                    BlockIndex::Area => area,
                    BlockIndex::Time => r.time_idx,
                    BlockIndex::AreaTime => area * n_years + r.time_idx,
                };
                row.push((start + local, 1.0));
            }
            design.push(row);
        }

        let mut base_precision = DMatrix::zeros(dim, dim);
        base_precision[(0, 0)] = INTERCEPT_PRECISION;
        for k in 1..n_fixed {
            base_precision[(k, k)] = COVARIATE_PRECISION;
        }
        for (b, &start) in blocks.iter().zip(&starts) {
            for i in 0..b.size() {
                base_precision[(start + i, start + i)] += engine.ridge;
            }
            for set in &b.constraints {
                for &i in set {
                    for &j in set {
                        base_precision[(start + i, start + j)] += engine.constraint_weight;
                    }
                }
            }
        }

        Ok(Self {
            fixed_names,
            blocks,
            starts,
            dim,
            design,
            observed: table.rows.iter().map(|r| r.observed as f64).collect(),
            offset: offset.to_vec(),
            base_precision,
        })
    }

    fn precision(&self, theta: &[f64]) -> DMatrix<f64> {
        let mut q = self.base_precision.clone();
        for ((b, &start), &th) in self.blocks.iter().zip(&self.starts).zip(theta) {
            let tau = th.exp();
            let n = b.size();
            for i in 0..n {
                for j in 0..n {
                    let r = b.structure[(i, j)];
                    if r != 0.0 {
                        q[(start + i, start + j)] += tau * r;
                    }
                }
            }
        }
        q
    }

    fn eta(&self, x: &DVector<f64>) -> Vec<f64> {
        self.design
            .iter()
            .zip(&self.offset)
            .map(|(row, off)| off + row.iter().map(|&(j, v)| v * x[j]).sum::<f64>())
            .collect()
    }

    fn objective(&self, x: &DVector<f64>, q: &DMatrix<f64>) -> f64 {
        let loglik: f64 = self
            .eta(x)
            .iter()
            .zip(&self.observed)
            .map(|(&e, &y)| y * e - e.exp())
            .sum();
        loglik - 0.5 * x.dot(&(q * x))
    }

    /// Starting point: intercept at the crude log SMR.
    fn initial_state(&self) -> DVector<f64> {
        let cases: f64 = self.observed.iter().sum();
        let expected: f64 = self.offset.iter().map(|o| o.exp()).sum();
        let mut x = DVector::zeros(self.dim);
        x[0] = (cases.max(0.5) / expected).ln();
        x
    }

    fn find_mode(&self, q: &DMatrix<f64>, start: &DVector<f64>, engine: &LaplaceEngine) -> Result<Mode, AppError> {
        let mut x = start.clone();
        let mut objective = self.objective(&x, q);
        if !objective.is_finite() {
            x = self.initial_state();
            objective = self.objective(&x, q);
        }
        let mut iterations = 0;

        for iter in 0..engine.max_newton_iter {
            iterations = iter + 1;
            let eta = self.eta(&x);
            let mu: Vec<f64> = eta.iter().map(|e| e.exp()).collect();

            let mut gradient = -(q * &x);
            let mut hessian = q.clone();
            for (i, row) in self.design.iter().enumerate() {
                let residual = self.observed[i] - mu[i];
                for &(a, va) in row {
                    gradient[a] += va * residual;
                    for &(b, vb) in row {
                        hessian[(a, b)] += mu[i] * va * vb;
                    }
                }
            }

            let factor = factorize_spd(&hessian)
                .ok_or_else(|| AppError::numeric("Newton step: Hessian is not positive definite."))?;
            let step = factor.solve(&gradient);

            let mut scale = 1.0;
            let mut accepted = None;
            for _ in 0..40 {
                let candidate = &x + &step * scale;
                let value = self.objective(&candidate, q);
                if value.is_finite() && value >= objective - 1e-12 * objective.abs() {
                    accepted = Some((candidate, value));
                    break;
                }
                scale *= 0.5;
            }

            let Some((next, value)) = accepted else {
                break;
            };
            let gain = value - objective;
            let moved = step.amax() * scale;
            x = next;
            objective = value;

            if gain.abs() <= engine.newton_tolerance * (1.0 + objective.abs()) && moved < 1e-6 {
                break;
            }
        }

        if !objective.is_finite() {
            return Err(AppError::numeric("Latent mode search diverged."));
        }

        let factor = factorize_spd(&self.hessian(&x, q))
            .ok_or_else(|| AppError::numeric("Posterior precision is not positive definite."))?;

        Ok(Mode {
            x,
            objective,
            factor,
            iterations,
        })
    }

    fn hessian(&self, x: &DVector<f64>, q: &DMatrix<f64>) -> DMatrix<f64> {
        let mut h = q.clone();
        for (row, eta) in self.design.iter().zip(self.eta(x)) {
            let mu = eta.exp();
            for &(a, va) in row {
                for &(b, vb) in row {
                    h[(a, b)] += mu * va * vb;
                }
            }
        }
        h
    }

    fn evaluate(
        &self,
        theta: &[f64],
        start: &DVector<f64>,
        priors: &PriorConfig,
        engine: &LaplaceEngine,
    ) -> Result<Evaluation, AppError> {
        let q = self.precision(theta);
        let mode = self.find_mode(&q, start, engine)?;

        let hyper: f64 = self
            .blocks
            .iter()
            .zip(theta)
            .map(|(b, &th)| 0.5 * b.rank as f64 * th + priors.precision.ln_density_log_precision(th))
            .sum();
        let log_marginal = mode.objective - 0.5 * mode.factor.ln_det() + hyper;

        if !log_marginal.is_finite() {
            return Err(AppError::numeric("Non-finite Laplace approximation."));
        }

        Ok(Evaluation {
            theta: theta.to_vec(),
            log_marginal,
            mode,
        })
    }
}

impl LaplaceEngine {
    fn optimise(&self, model: &LatentModel, priors: &PriorConfig) -> Result<Evaluation, AppError> {
        let theta0 = vec![self.initial_log_precision; model.blocks.len()];
        let mut best = model.evaluate(&theta0, &model.initial_state(), priors, self)?;

        for (sweep, &width) in self.sweep_widths.iter().enumerate() {
            for b in 0..model.blocks.len() {
                let candidates =
                    sweep_candidates(best.theta[b], width, self.grid_points, self.log_precision_bounds);

                let start = best.mode.x.clone();
                let evaluations: Vec<Option<Evaluation>> = candidates
                    .par_iter()
                    .map(|&value| {
                        let mut theta = best.theta.clone();
                        theta[b] = value;
                        match model.evaluate(&theta, &start, priors, self) {
                            Ok(e) => Some(e),
                            Err(err) => {
                                log::debug!("θ[{b}]={value:.3} skipped: {err}");
                                None
                            }
                        }
                    })
                    .collect();

                // First strict maximum wins, so ties resolve by grid position.
                let mut winner: Option<Evaluation> = None;
                for e in evaluations.into_iter().flatten() {
                    let better = winner.as_ref().is_none_or(|w| e.log_marginal > w.log_marginal);
                    if better {
                        winner = Some(e);
                    }
                }

                if let Some(w) = winner {
                    if w.log_marginal > best.log_marginal {
                        best = w;
                    }
                }
            }
            log::debug!(
                "Sweep {} (±{width}): log p(θ|y) ≈ {:.4}, θ = {:?}",
                sweep + 1,
                best.log_marginal,
                best.theta
            );
        }

        Ok(best)
    }

    /// Curvature-based sd of each `θ_b`.
    fn theta_sd(&self, model: &LatentModel, best: &Evaluation, priors: &PriorConfig) -> Vec<Option<f64>> {
        let h = self.curvature_step;
        (0..best.theta.len())
            .into_par_iter()
            .map(|b| {
                let shifted = |delta: f64| {
                    let mut theta = best.theta.clone();
                    theta[b] += delta;
                    model
                        .evaluate(&theta, &best.mode.x, priors, self)
                        .ok()
                        .map(|e| e.log_marginal)
                };
                let (plus, minus) = (shifted(h)?, shifted(-h)?);
                let second = (plus - 2.0 * best.log_marginal + minus) / (h * h);
                (second < 0.0).then(|| (-1.0 / second).sqrt())
            })
            .collect()
    }
}

impl InferenceEngine for LaplaceEngine {
    fn name(&self) -> &str {
        "laplace"
    }

    fn fit(
        &self,
        spec: &ModelSpec,
        table: &PreparedTable,
        graph: &AdjacencyGraph,
        offset: &[f64],
        options: &FitOptions,
    ) -> Result<FitResult, AppError> {
        options.priors.validate()?;
        if self.grid_points < 2 || self.sweep_widths.is_empty() {
            return Err(AppError::input("Laplace engine needs >= 2 grid points and one sweep."));
        }
        let quadrature = GaussHermite::new(options.quadrature_nodes)?;

        let model = LatentModel::build(spec, table, graph, offset, self)?;
        log::info!(
            "Fitting {} ({} observations, {} latent, {} hyperparameters)",
            spec,
            table.len(),
            model.dim,
            model.blocks.len()
        );

        let best = self.optimise(&model, &options.priors)?;
        let theta_sd = self.theta_sd(&model, &best, &options.priors);
        log::debug!("Final mode after {} Newton iterations", best.mode.iterations);

        let x = &best.mode.x;
        let cov_x = best.mode.factor.inverse();

        // Linear predictor posterior: mean and A Σ Aᵀ.
        let eta = model.eta(x);
        let n = eta.len();
        let mut cov_eta = DMatrix::zeros(n, n);
        for i in 0..n {
            for j in i..n {
                let mut c = 0.0;
                for &(a, va) in &model.design[i] {
                    for &(b, vb) in &model.design[j] {
                        c += va * vb * cov_x[(a, b)];
                    }
                }
                cov_eta[(i, j)] = c;
                cov_eta[(j, i)] = c;
            }
        }

        let curvature: Vec<f64> = eta.iter().map(|e| e.exp()).collect();
        let gradient = model
            .observed
            .iter()
            .zip(&curvature)
            .map(|(y, mu)| y - mu)
            .collect();
        let predictor = LinearPredictorPosterior {
            observed: table.rows.iter().map(|r| r.observed).collect(),
            mean: eta,
            covariance: cov_eta,
            curvature,
            gradient,
            quadrature,
        };

        let fixed = model
            .fixed_names
            .iter()
            .enumerate()
            .map(|(k, name)| FixedEffectSummary::gaussian(name.clone(), x[k], cov_x[(k, k)].max(0.0).sqrt()))
            .collect();

        let hyper = model
            .blocks
            .iter()
            .zip(&best.theta)
            .zip(&theta_sd)
            .map(|((b, &th), &sd)| HyperSummary::new(format!("Precision for {}", b.name), th, sd))
            .collect();

        let z = normal_quantile(0.975);
        let fitted = table
            .rows
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let m = predictor.mean[i] - offset[i];
                let s = predictor.sd(i);
                FittedValue {
                    area_id: r.area_id.clone(),
                    year: r.year,
                    observed: r.observed,
                    expected: r.expected,
                    eta_mean: predictor.mean[i],
                    eta_sd: s,
                    rr_mean: (m + 0.5 * s * s).exp(),
                    rr_lower: (m - z * s).exp(),
                    rr_upper: (m + z * s).exp(),
                }
            })
            .collect();

        // Blocks 0 and 1 are the BYM pair.
        let (su, sv) = (model.starts[0], model.starts[1]);
        let area_effects = graph
            .area_ids()
            .iter()
            .enumerate()
            .map(|(a, id)| {
                let (iu, iv) = (su + a, sv + a);
                let mean = x[iu] + x[iv];
                let var = (cov_x[(iu, iu)] + cov_x[(iv, iv)] + 2.0 * cov_x[(iu, iv)]).max(0.0);
                let sd = var.sqrt();
                AreaEffect {
                    area_id: id.clone(),
                    mean,
                    sd,
                    rr_mean: (mean + 0.5 * var).exp(),
                    prob_excess: if sd > 0.0 {
                        normal_cdf(mean / sd)
                    } else if mean > 0.0 {
                        1.0
                    } else {
                        0.0
                    },
                }
            })
            .collect();

        let statistics = predictor.statistics();
        let cpo = predictor.cpo();

        log::info!(
            "{}: DIC {:.2}, WAIC {:.2}, log p(θ|y) ≈ {:.3}",
            spec.id,
            statistics.dic,
            statistics.waic,
            best.log_marginal
        );

        Ok(FitResult {
            model_id: spec.id.clone(),
            display_name: spec.display_name.clone(),
            formula: spec.formula(),
            engine: self.name().to_string(),
            priors: options.priors.clone(),
            fixed,
            hyper,
            statistics,
            cpo,
            fitted,
            area_effects,
            log_marginal: best.log_marginal,
            predictor,
            cross_validation: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Observation;

    fn toy_table(years: &[i32], counts: &[&[u64]]) -> PreparedTable {
        let area_ids: Vec<String> = (0..counts.len()).map(|a| format!("A{a}")).collect();
        let mut rows = Vec::new();
        for (a, area_counts) in counts.iter().enumerate() {
            for (t, &year) in years.iter().enumerate() {
                rows.push(Observation {
                    area_id: area_ids[a].clone(),
                    year,
                    observed: area_counts[t],
                    expected: 5.0,
                    population: 10_000.0,
                    pop_density: 1.0 + a as f64,
                    poverty: 10.0 + 3.0 * t as f64,
                    area_idx: a,
                    time_idx: t,
                    interaction_idx: rows.len(),
                });
            }
        }
        PreparedTable {
            rows,
            area_ids,
            years: years.to_vec(),
        }
    }

    fn fast_engine() -> LaplaceEngine {
        LaplaceEngine {
            sweep_widths: vec![4.0, 1.0],
            ..LaplaceEngine::default()
        }
    }

    #[test]
    fn bym_on_toy_data_is_finite() {
        let table = toy_table(&[2015, 2016], &[&[3, 5], &[8, 6], &[2, 4], &[7, 9]]);
        let graph = AdjacencyGraph::complete(table.area_ids.clone()).unwrap();
        let spec = ModelSpec::by_id("bym").unwrap();

        let fit = fast_engine()
            .fit(&spec, &table, &graph, &table.log_expected(), &FitOptions::default())
            .unwrap();

        let s = &fit.statistics;
        for v in [s.mean_deviance, s.p_d, s.dic, s.waic, s.p_waic] {
            assert!(v.is_finite());
        }
        assert_eq!(fit.fixed.len(), 1);
        assert_eq!(fit.hyper.len(), 2);
        assert_eq!(fit.cpo.len(), 8);
        assert_eq!(fit.area_effects.len(), 4);
        // Crude overall SMR is 44/40.
        let intercept = fit.fixed_effect("(Intercept)").unwrap().mean;
        assert!((intercept - (44.0f64 / 40.0).ln()).abs() < 0.3);
    }

    #[test]
    fn refit_is_deterministic() {
        let table = toy_table(&[2015, 2016, 2017], &[&[3, 5, 4], &[8, 6, 9], &[2, 4, 1], &[7, 9, 12]]);
        let graph = AdjacencyGraph::complete(table.area_ids.clone()).unwrap();
        let spec = ModelSpec::by_id("bym_rw2_cov").unwrap();
        let engine = fast_engine();
        let offset = table.log_expected();

        let a = engine.fit(&spec, &table, &graph, &offset, &FitOptions::default()).unwrap();
        let b = engine.fit(&spec, &table, &graph, &offset, &FitOptions::default()).unwrap();
        let means = |f: &FitResult| f.fixed.iter().map(|e| e.mean.to_bits()).collect::<Vec<_>>();
        assert_eq!(means(&a), means(&b));
        assert_eq!(a.fixed.len(), 3);
    }

    #[test]
    fn offset_length_is_checked() {
        let table = toy_table(&[2015], &[&[3], &[4], &[5]]);
        let graph = AdjacencyGraph::complete(table.area_ids.clone()).unwrap();
        let err = fast_engine()
            .fit(&ModelSpec::by_id("bym").unwrap(), &table, &graph, &[0.0], &FitOptions::default())
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn area_missing_from_graph_is_a_data_error() {
        let table = toy_table(&[2015], &[&[3], &[4], &[5]]);
        let graph = AdjacencyGraph::complete(vec!["A0".into(), "A1".into(), "B".into()]).unwrap();
        let err = fast_engine()
            .fit(&ModelSpec::by_id("bym").unwrap(), &table, &graph, &table.log_expected(), &FitOptions::default())
            .unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}

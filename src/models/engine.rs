//! The inference-engine seam.
//!
//! The pipeline only needs `fit(spec, table, graph, offset, options)`; how the
//! posterior is approximated is the engine's business. `LaplaceEngine` is the
//! built-in implementation.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::domain::PreparedTable;
use crate::error::AppError;
use crate::math::DEFAULT_NODES;
use crate::models::{FitResult, ModelSpec};
use crate::spatial::AdjacencyGraph;

/// `τ ~ Gamma(shape, rate)` on a precision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GammaPrior {
    pub shape: f64,
    pub rate: f64,
}

impl GammaPrior {
    /// Log density of `θ = log τ`, up to a constant (Jacobian included).
    pub fn ln_density_log_precision(&self, theta: f64) -> f64 {
        self.shape * theta - self.rate * theta.exp()
    }
}

/// Priors on every precision hyperparameter of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorConfig {
    pub name: String,
    pub precision: GammaPrior,
}

impl PriorConfig {
    pub fn default_inla() -> Self {
        Self {
            name: "default".to_string(),
            precision: GammaPrior {
                shape: 1.0,
                rate: 5e-5,
            },
        }
    }

    pub fn weakly_informative() -> Self {
        Self {
            name: "weakly informative".to_string(),
            precision: GammaPrior {
                shape: 1.0,
                rate: 0.01,
            },
        }
    }

    pub fn informative() -> Self {
        Self {
            name: "informative".to_string(),
            precision: GammaPrior {
                shape: 2.0,
                rate: 0.5,
            },
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let GammaPrior { shape, rate } = self.precision;
        if !(shape.is_finite() && shape > 0.0 && rate.is_finite() && rate > 0.0) {
            return Err(AppError::input(format!(
                "Invalid Gamma prior '{}': shape={shape}, rate={rate}.",
                self.name
            )));
        }
        Ok(())
    }
}

impl Default for PriorConfig {
    fn default() -> Self {
        Self::default_inla()
    }
}

/// Named prior presets for the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PriorPreset {
    Default,
    Weak,
    Informative,
}

impl PriorPreset {
    pub fn config(self) -> PriorConfig {
        match self {
            PriorPreset::Default => PriorConfig::default_inla(),
            PriorPreset::Weak => PriorConfig::weakly_informative(),
            PriorPreset::Informative => PriorConfig::informative(),
        }
    }
}

/// Fit options shared by every engine.
#[derive(Debug, Clone)]
pub struct FitOptions {
    pub priors: PriorConfig,
    /// Gauss–Hermite nodes for DIC/WAIC/CPO integrals.
    pub quadrature_nodes: usize,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            priors: PriorConfig::default(),
            quadrature_nodes: DEFAULT_NODES,
        }
    }
}

pub trait InferenceEngine: Sync {
    /// Engine label recorded in each fit.
    fn name(&self) -> &str;

    /// Fit one model. `offset` is `log(expected)`, one entry per table row.
    fn fit(
        &self,
        spec: &ModelSpec,
        table: &PreparedTable,
        graph: &AdjacencyGraph,
        offset: &[f64],
        options: &FitOptions,
    ) -> Result<FitResult, AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid_and_distinct() {
        let all = [
            PriorConfig::default_inla(),
            PriorConfig::weakly_informative(),
            PriorConfig::informative(),
        ];
        for p in &all {
            p.validate().unwrap();
        }
        assert_ne!(all[0], all[1]);
        assert_eq!(PriorPreset::Informative.config(), all[2]);
    }

    #[test]
    fn gamma_log_precision_density_peaks_at_mode() {
        let prior = PriorConfig::informative().precision;
        let mode = (prior.shape / prior.rate).ln();
        let at = prior.ln_density_log_precision(mode);
        assert!(at > prior.ln_density_log_precision(mode - 0.1));
        assert!(at > prior.ln_density_log_precision(mode + 0.1));
    }

    #[test]
    fn invalid_prior_is_an_input_error() {
        let bad = PriorConfig {
            name: "bad".into(),
            precision: GammaPrior { shape: 0.0, rate: 1.0 },
        };
        assert_eq!(bad.validate().unwrap_err().exit_code(), 2);
    }
}

//! Prior sensitivity: re-fit one model under several precision priors.

use serde::Serialize;

use crate::domain::PreparedTable;
use crate::error::AppError;
use crate::fit::{ComparisonTable, comparison_table, cross_validate};
use crate::models::{FitOptions, FitResult, InferenceEngine, ModelSpec, PriorConfig};
use crate::spatial::AdjacencyGraph;

#[derive(Debug, Clone, Serialize)]
pub struct SensitivityRun {
    pub priors: PriorConfig,
    pub fit: FitResult,
}

/// Fit `spec` once per prior configuration, same data and options otherwise.
pub fn run_sensitivity(
    engine: &dyn InferenceEngine,
    spec: &ModelSpec,
    table: &PreparedTable,
    graph: &AdjacencyGraph,
    options: &FitOptions,
    priors: &[PriorConfig],
    level_sets: &[usize],
) -> Result<Vec<SensitivityRun>, AppError> {
    if priors.is_empty() {
        return Err(AppError::input("Sensitivity analysis needs at least one prior configuration."));
    }

    let offset = table.log_expected();
    let mut runs = Vec::with_capacity(priors.len());
    for p in priors {
        log::info!("Sensitivity: {} under '{}' priors", spec.id, p.name);
        let opts = FitOptions {
            priors: p.clone(),
            ..options.clone()
        };
        let fit = engine.fit(spec, table, graph, &offset, &opts)?;
        let cv = cross_validate(&fit, level_sets);
        runs.push(SensitivityRun {
            priors: p.clone(),
            fit: fit.with_cross_validation(cv),
        });
    }
    Ok(runs)
}

/// Comparison rows of the runs, labelled by prior name.
pub fn sensitivity_table(runs: &[SensitivityRun]) -> ComparisonTable {
    let fits: Vec<FitResult> = runs.iter().map(|r| r.fit.clone()).collect();
    let mut table = comparison_table(&fits);
    for (row, run) in table.rows.iter_mut().zip(runs) {
        row.display_name = format!("{} [{}]", row.display_name, run.priors.name);
    }
    table
}

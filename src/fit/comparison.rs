//! Fit a list of models and tabulate their fit statistics.
//!
//! Models are fitted one after another against the same table and graph; the
//! first failure aborts the whole comparison. The table keeps the input order
//! and does not rank anything.

use serde::Serialize;

use crate::domain::PreparedTable;
use crate::error::AppError;
use crate::fit::cross_validate;
use crate::models::{FitOptions, FitResult, InferenceEngine, ModelSpec};
use crate::spatial::AdjacencyGraph;

/// Fit every model and attach its cross-validation scores.
pub fn fit_suite(
    engine: &dyn InferenceEngine,
    specs: &[ModelSpec],
    table: &PreparedTable,
    graph: &AdjacencyGraph,
    options: &FitOptions,
    level_sets: &[usize],
) -> Result<Vec<FitResult>, AppError> {
    let offset = table.log_expected();
    let mut fits = Vec::with_capacity(specs.len());
    for (k, spec) in specs.iter().enumerate() {
        log::info!("[{}/{}] {}", k + 1, specs.len(), spec);
        let fit = engine.fit(spec, table, graph, &offset, options)?;
        let cv = cross_validate(&fit, level_sets);
        fits.push(fit.with_cross_validation(cv));
    }
    Ok(fits)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonRow {
    pub model_id: String,
    pub display_name: String,
    pub mean_deviance: f64,
    pub p_d: f64,
    pub dic: f64,
    pub waic: f64,
    pub p_waic: f64,
    pub loocv: Option<f64>,
    pub lcv3: Option<f64>,
    pub lcv5: Option<f64>,
    pub lcv10: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComparisonTable {
    pub rows: Vec<ComparisonRow>,
}

impl ComparisonTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One row per fit, in input order.
pub fn comparison_table(fits: &[FitResult]) -> ComparisonTable {
    let rows = fits
        .iter()
        .map(|f| {
            let cv = f.cross_validation.as_ref();
            ComparisonRow {
                model_id: f.model_id.clone(),
                display_name: f.display_name.clone(),
                mean_deviance: f.statistics.mean_deviance,
                p_d: f.statistics.p_d,
                dic: f.statistics.dic,
                waic: f.statistics.waic,
                p_waic: f.statistics.p_waic,
                loocv: cv.and_then(|c| c.loocv),
                lcv3: cv.and_then(|c| c.group_score(3)),
                lcv5: cv.and_then(|c| c.group_score(5)),
                lcv10: cv.and_then(|c| c.group_score(10)),
            }
        })
        .collect();
    ComparisonTable { rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Observation;
    use crate::models::LaplaceEngine;

    fn table() -> PreparedTable {
        let counts = [[4u64, 6, 5], [9, 7, 10], [1, 3, 2], [6, 8, 11]];
        let area_ids: Vec<String> = (0..4).map(|a| format!("R{a}")).collect();
        let mut rows = Vec::new();
        for (a, c) in counts.iter().enumerate() {
            for (t, &y) in c.iter().enumerate() {
                rows.push(Observation {
                    area_id: area_ids[a].clone(),
                    year: 2018 + t as i32,
                    observed: y,
                    expected: 6.0,
                    population: 20_000.0,
                    pop_density: 0.5 * (a + 1) as f64,
                    poverty: 12.0 + a as f64,
                    area_idx: a,
                    time_idx: t,
                    interaction_idx: rows.len(),
                });
            }
        }
        PreparedTable {
            rows,
            area_ids,
            years: vec![2018, 2019, 2020],
        }
    }

    #[test]
    fn one_row_per_model_in_order() {
        let table = table();
        let ids = table.area_ids.clone();
        // Square: R0-R1, R1-R3, R3-R2, R2-R0.
        let graph = AdjacencyGraph::new(ids, vec![vec![1, 2], vec![3], vec![3], vec![]]).unwrap();
        let engine = LaplaceEngine {
            sweep_widths: vec![4.0, 1.0],
            ..LaplaceEngine::default()
        };
        let specs: Vec<ModelSpec> = ["bym", "bym_rw2", "type1"]
            .iter()
            .filter_map(|id| ModelSpec::by_id(id))
            .collect();

        let fits = fit_suite(&engine, &specs, &table, &graph, &FitOptions::default(), &[3, 5, 10]).unwrap();
        let comparison = comparison_table(&fits);

        assert_eq!(comparison.len(), 3);
        let ids: Vec<&str> = comparison.rows.iter().map(|r| r.model_id.as_str()).collect();
        assert_eq!(ids, vec!["bym", "bym_rw2", "type1"]);
        for row in &comparison.rows {
            assert!(row.dic >= 0.0 && row.dic.is_finite());
            assert!(row.waic >= 0.0 && row.waic.is_finite());
            assert!(row.loocv.is_some());
        }
    }
}

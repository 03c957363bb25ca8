//! Global and local Moran's I with row-standardised contiguity weights.
//!
//! Moments follow the randomisation assumption. For the global statistic
//!
//! ```text
//! I    = (n / S0) Σ_ij w_ij z_i z_j / Σ_i z_i²
//! E[I] = -1 / (n - 1)
//! ```
//!
//! with the kurtosis-corrected variance. The local statistic is
//! `I_i = z_i / m2 · Σ_j w_ij z_j` with `m2 = Σ z² / n`.

use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::domain::{SmrTable, YearOutcome};
use crate::error::AppError;
use crate::math::{normal_cdf, normal_sf};
use crate::spatial::AdjacencyGraph;

/// Default significance threshold for LISA classes.
pub const DEFAULT_ALPHA: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Alternative {
    /// Positive autocorrelation.
    #[default]
    Greater,
    Less,
    TwoSided,
}

impl Alternative {
    fn p_value(self, z: f64) -> f64 {
        match self {
            Alternative::Greater => normal_sf(z),
            Alternative::Less => normal_cdf(z),
            Alternative::TwoSided => (2.0 * normal_sf(z.abs())).min(1.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoranStatistic {
    pub statistic: f64,
    pub expectation: f64,
    pub variance: f64,
    pub z_score: f64,
    pub p_value: f64,
    pub alternative: Alternative,
    pub n: usize,
}

/// Global Moran's I of `values`, indexed like the graph nodes.
pub fn global_moran(
    values: &[f64],
    graph: &AdjacencyGraph,
    alternative: Alternative,
) -> Result<MoranStatistic, AppError> {
    let n = values.len();
    if n != graph.len() {
        return Err(AppError::data(format!(
            "Moran's I: {n} values for {} graph nodes.",
            graph.len()
        )));
    }
    if n < 4 {
        return Err(AppError::data("Moran's I needs at least 4 areas."));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(AppError::data("Moran's I: non-finite value."));
    }

    let nf = n as f64;
    let mean = values.iter().sum::<f64>() / nf;
    let z: Vec<f64> = values.iter().map(|v| v - mean).collect();
    let m2: f64 = z.iter().map(|d| d * d).sum();
    let m4: f64 = z.iter().map(|d| d.powi(4)).sum();
    if m2 <= f64::EPSILON * nf * mean.abs().max(1.0) {
        return Err(AppError::data("Moran's I: values are constant."));
    }

    let weights = graph.row_standardized_weights();
    let mut dense = vec![0.0; n * n];
    for (i, row) in weights.iter().enumerate() {
        for &(j, w) in row {
            dense[i * n + j] = w;
        }
    }

    let s0: f64 = dense.iter().sum();
    if s0 <= 0.0 {
        return Err(AppError::data("Moran's I: the graph has no links."));
    }

    let mut cross = 0.0;
    let mut s1 = 0.0;
    let mut s2 = 0.0;
    for i in 0..n {
        let mut row_sum = 0.0;
        let mut col_sum = 0.0;
        for j in 0..n {
            let wij = dense[i * n + j];
            let wji = dense[j * n + i];
            cross += wij * z[i] * z[j];
            s1 += (wij + wji).powi(2);
            row_sum += wij;
            col_sum += wji;
        }
        s2 += (row_sum + col_sum).powi(2);
    }
    s1 *= 0.5;

    let statistic = nf / s0 * cross / m2;
    let expectation = -1.0 / (nf - 1.0);
    let k = nf * m4 / (m2 * m2);
    let numerator = nf * ((nf * nf - 3.0 * nf + 3.0) * s1 - nf * s2 + 3.0 * s0 * s0)
        - k * (nf * (nf - 1.0) * s1 - 2.0 * nf * s2 + 6.0 * s0 * s0);
    let denominator = (nf - 1.0) * (nf - 2.0) * (nf - 3.0) * s0 * s0;
    let variance = numerator / denominator - expectation * expectation;

    if !(variance.is_finite() && variance > 0.0) {
        return Err(AppError::data(format!(
            "Moran's I: non-positive variance ({variance})."
        )));
    }

    let z_score = (statistic - expectation) / variance.sqrt();

    Ok(MoranStatistic {
        statistic,
        expectation,
        variance,
        z_score,
        p_value: alternative.p_value(z_score),
        alternative,
        n,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearMoran {
    pub year: i32,
    pub outcome: YearOutcome<MoranStatistic>,
}

/// SMR values of one year in graph node order, missing SMR as 0.
///
/// `NoData` when the year has no rows; `Mismatch` when the rows do not cover
/// the graph nodes one to one.
pub fn year_values(table: &SmrTable, graph: &AdjacencyGraph, year: i32) -> YearOutcome<Vec<f64>> {
    let by_area = table.smr_by_area(year);
    if by_area.is_empty() {
        return YearOutcome::NoData;
    }
    if by_area.len() != graph.len() {
        return YearOutcome::Mismatch {
            expected: graph.len(),
            actual: by_area.len(),
        };
    }

    let mut values = vec![0.0; graph.len()];
    let mut matched = 0;
    for (area_id, smr) in by_area {
        if let Some(i) = graph.index_of(area_id) {
            values[i] = smr.unwrap_or(0.0);
            matched += 1;
        }
    }
    if matched != graph.len() {
        return YearOutcome::Mismatch {
            expected: graph.len(),
            actual: matched,
        };
    }
    YearOutcome::Computed(values)
}

/// Global Moran's I of the SMR for every year of the table.
///
/// Years without data or misaligned with the graph are reported, not fatal.
pub fn global_moran_by_year(
    table: &SmrTable,
    graph: &AdjacencyGraph,
    alternative: Alternative,
) -> Vec<YearMoran> {
    table
        .years
        .iter()
        .map(|&year| {
            let outcome = match year_values(table, graph, year) {
                YearOutcome::Computed(values) => match global_moran(&values, graph, alternative) {
                    Ok(stat) => YearOutcome::Computed(stat),
                    Err(err) => {
                        log::warn!("Moran's I for {year}: {err}");
                        YearOutcome::Degenerate {
                            reason: err.message().to_string(),
                        }
                    }
                },
                other => {
                    log_sentinel("Moran's I", year, &other);
                    other.map_failure()
                }
            };
            YearMoran { year, outcome }
        })
        .collect()
}

fn log_sentinel<T>(what: &str, year: i32, outcome: &YearOutcome<T>) {
    match outcome {
        YearOutcome::NoData => log::warn!("{what} for {year}: no data"),
        YearOutcome::Mismatch { expected, actual } => {
            log::warn!("{what} for {year}: {actual} values for {expected} graph nodes")
        }
        _ => {}
    }
}

/// Local Moran's I of one area.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalMoran {
    pub statistic: f64,
    pub expectation: f64,
    pub variance: f64,
    /// `None` for isolated areas (zero variance).
    pub z_score: Option<f64>,
    /// Two-sided normal p-value.
    pub p_value: Option<f64>,
    /// Row-standardised spatial lag `Σ_j w_ij x_j`.
    pub lag: f64,
}

/// Local Moran's I for every node.
pub fn local_moran(values: &[f64], graph: &AdjacencyGraph) -> Result<Vec<LocalMoran>, AppError> {
    let n = values.len();
    if n != graph.len() {
        return Err(AppError::data(format!(
            "Local Moran: {n} values for {} graph nodes.",
            graph.len()
        )));
    }
    if n < 3 {
        return Err(AppError::data("Local Moran needs at least 3 areas."));
    }

    let nf = n as f64;
    let mean = values.iter().sum::<f64>() / nf;
    let z: Vec<f64> = values.iter().map(|v| v - mean).collect();
    let m2 = z.iter().map(|d| d * d).sum::<f64>() / nf;
    if m2 <= 0.0 {
        return Err(AppError::data("Local Moran: values are constant."));
    }
    let m4 = z.iter().map(|d| d.powi(4)).sum::<f64>() / nf;
    let b2 = m4 / (m2 * m2);

    let weights = graph.row_standardized_weights();
    let out = weights
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let wi: f64 = row.iter().map(|&(_, w)| w).sum();
            let wi2: f64 = row.iter().map(|&(_, w)| w * w).sum();
            let z_lag: f64 = row.iter().map(|&(j, w)| w * z[j]).sum();
            let lag: f64 = row.iter().map(|&(j, w)| w * values[j]).sum();

            let statistic = z[i] / m2 * z_lag;
            let expectation = -wi / (nf - 1.0);
            let variance = wi2 * (nf - b2) / (nf - 1.0)
                + (wi * wi - wi2) * (2.0 * b2 - nf) / ((nf - 1.0) * (nf - 2.0))
                - expectation * expectation;

            let z_score = (variance > 0.0).then(|| (statistic - expectation) / variance.sqrt());
            LocalMoran {
                statistic,
                expectation,
                variance,
                z_score,
                p_value: z_score.map(|z| Alternative::TwoSided.p_value(z)),
                lag,
            }
        })
        .collect();
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LisaClass {
    HighHigh,
    HighLow,
    LowHigh,
    LowLow,
    NotSignificant,
}

impl LisaClass {
    pub const ALL: [LisaClass; 5] = [
        LisaClass::HighHigh,
        LisaClass::HighLow,
        LisaClass::LowHigh,
        LisaClass::LowLow,
        LisaClass::NotSignificant,
    ];

    /// Quadrant of (value, lag) against `mean`, or not significant.
    pub fn classify(value: f64, lag: f64, mean: f64, p_value: Option<f64>, alpha: f64) -> Self {
        match p_value {
            Some(p) if p < alpha => match (value > mean, lag > mean) {
                (true, true) => LisaClass::HighHigh,
                (true, false) => LisaClass::HighLow,
                (false, true) => LisaClass::LowHigh,
                (false, false) => LisaClass::LowLow,
            },
            _ => LisaClass::NotSignificant,
        }
    }
}

impl fmt::Display for LisaClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LisaClass::HighHigh => "High-High",
            LisaClass::HighLow => "High-Low",
            LisaClass::LowHigh => "Low-High",
            LisaClass::LowLow => "Low-Low",
            LisaClass::NotSignificant => "Not significant",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LisaRow {
    pub area_id: String,
    pub year: i32,
    /// SMR with missing values replaced by 0.
    pub value: f64,
    pub local: LocalMoran,
    pub class: LisaClass,
}

/// LISA classes for every area-year. Misaligned years contribute no rows.
pub fn lisa_by_year(table: &SmrTable, graph: &AdjacencyGraph, alpha: f64) -> Vec<LisaRow> {
    let mut rows = Vec::new();
    for &year in &table.years {
        let values = match year_values(table, graph, year) {
            YearOutcome::Computed(values) => values,
            other => {
                log_sentinel("LISA", year, &other);
                continue;
            }
        };

        let locals = match local_moran(&values, graph) {
            Ok(locals) => locals,
            Err(err) => {
                log::warn!("LISA for {year}: {err}");
                continue;
            }
        };

        let mean = values.iter().sum::<f64>() / values.len() as f64;
        for (i, local) in locals.into_iter().enumerate() {
            let class = LisaClass::classify(values[i], local.lag, mean, local.p_value, alpha);
            rows.push(LisaRow {
                area_id: graph.area_ids()[i].clone(),
                year,
                value: values[i],
                local,
                class,
            });
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SmrRecord;
    use crate::stats::descriptive::tests::obs;

    fn path4() -> AdjacencyGraph {
        let ids = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        AdjacencyGraph::new(ids, vec![vec![1], vec![2], vec![3], vec![]]).unwrap()
    }

    fn smr_table(values: &[(&str, i32, Option<f64>)], years: Vec<i32>) -> SmrTable {
        let rows = values
            .iter()
            .map(|&(area, year, smr)| SmrRecord {
                observation: obs(area, 0, year, 0, 1, 1.0),
                smr,
            })
            .collect();
        SmrTable {
            rows,
            area_ids: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            years,
        }
    }

    #[test]
    fn global_moran_on_a_gradient() {
        let stat = global_moran(&[1.0, 2.0, 3.0, 4.0], &path4(), Alternative::Greater).unwrap();
        assert!((stat.statistic - 0.4).abs() < 1e-12);
        assert!((stat.expectation + 1.0 / 3.0).abs() < 1e-12);
        assert!(stat.variance > 0.0);
        assert!(stat.p_value < 0.5);

        let two = global_moran(&[1.0, 2.0, 3.0, 4.0], &path4(), Alternative::TwoSided).unwrap();
        assert!((two.p_value - 2.0 * stat.p_value).abs() < 1e-12);
    }

    #[test]
    fn constant_values_are_rejected() {
        assert!(global_moran(&[2.0; 4], &path4(), Alternative::Greater).is_err());
    }

    #[test]
    fn empty_year_and_mismatch_are_sentinels() {
        let table = smr_table(
            &[
                ("a", 2015, Some(1.0)),
                ("b", 2015, Some(2.0)),
                ("c", 2015, Some(3.0)),
                ("d", 2015, Some(4.0)),
                ("a", 2017, Some(1.0)),
                ("b", 2017, Some(2.0)),
            ],
            vec![2015, 2016, 2017],
        );
        let out = global_moran_by_year(&table, &path4(), Alternative::Greater);
        assert_eq!(out.len(), 3);
        assert!(out[0].outcome.computed().is_some());
        assert_eq!(out[1].outcome, YearOutcome::NoData);
        assert_eq!(
            out[2].outcome,
            YearOutcome::Mismatch {
                expected: 4,
                actual: 2
            }
        );
    }

    #[test]
    fn local_statistics_sum_to_scaled_global() {
        let values = [1.0, 2.0, 3.0, 4.0];
        let locals = local_moran(&values, &path4()).unwrap();
        let total: f64 = locals.iter().map(|l| l.statistic).sum();
        // Σ I_i = S0 · I with S0 = 4 for row-standardised weights.
        assert!((total - 1.6).abs() < 1e-12);
        assert!((locals[1].lag - 2.0).abs() < 1e-12);
    }

    #[test]
    fn lisa_classes_are_exhaustive_and_respect_alpha() {
        let table = smr_table(
            &[
                ("a", 2015, Some(1.0)),
                ("b", 2015, None),
                ("c", 2015, Some(3.0)),
                ("d", 2015, Some(4.0)),
            ],
            vec![2015],
        );

        let all = lisa_by_year(&table, &path4(), 1.0);
        assert_eq!(all.len(), 4);
        assert_eq!(all[1].value, 0.0);
        assert!(all.iter().all(|r| LisaClass::ALL.contains(&r.class)));
        assert_eq!(all[3].class, LisaClass::HighHigh);

        let none = lisa_by_year(&table, &path4(), 0.0);
        assert!(none.iter().all(|r| r.class == LisaClass::NotSignificant));
    }

    #[test]
    fn classify_quadrants() {
        assert_eq!(LisaClass::classify(2.0, 0.5, 1.0, Some(0.01), 0.05), LisaClass::HighLow);
        assert_eq!(LisaClass::classify(0.5, 2.0, 1.0, Some(0.01), 0.05), LisaClass::LowHigh);
        assert_eq!(LisaClass::classify(0.5, 0.5, 1.0, Some(0.05), 0.05), LisaClass::NotSignificant);
        assert_eq!(LisaClass::classify(2.0, 2.0, 1.0, None, 0.05), LisaClass::NotSignificant);
    }
}

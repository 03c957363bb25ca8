//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the statistics/fitting code stays clean and testable
//! - output changes are localized

use std::collections::BTreeMap;

use crate::app::pipeline::{DescriptiveOutput, RunOutput};
use crate::domain::YearOutcome;
use crate::fit::{ComparisonTable, SensitivityRun, sensitivity_table};
use crate::models::FitResult;
use crate::stats::{LisaClass, LisaRow, YearMoran, YearRate, YearSummary};

/// Dataset, graph and descriptive tables.
pub fn format_descriptive(d: &DescriptiveOutput) -> String {
    let mut out = String::new();

    out.push_str("=== tbst - spatio-temporal TB analysis ===\n");
    out.push_str(&format!("Source: {}\n", d.info.source.display()));
    out.push_str(&format!(
        "Features: {} read, {} rejected | rows={} areas={} years={}\n",
        d.info.features_read,
        d.info.features_rejected,
        d.table.len(),
        d.table.n_areas(),
        d.table.n_years()
    ));
    out.push_str(&format!(
        "Graph: {} areas, {} links, {} isolated, {} components (reference year {}){}\n",
        d.graph.len(),
        d.graph.n_links(),
        d.graph.isolated().len(),
        d.graph.components().len(),
        d.info.reference_year,
        d.info
            .graph_path
            .as_ref()
            .map(|p| format!(" -> {}", p.display()))
            .unwrap_or_default()
    ));

    out.push_str("\nNotification rate (per 100 000):\n");
    out.push_str(&format_rates(&d.rates, &d.summaries));
    out.push_str("\nGlobal Moran's I (SMR):\n");
    out.push_str(&format_moran(&d.moran));
    out.push_str("\nLISA clusters:\n");
    out.push_str(&format_lisa_counts(&d.lisa));
    out
}

pub fn format_rates(rates: &[YearRate], summaries: &[YearSummary]) -> String {
    let mut out = header(
        &format!(
            "{:<6} {:>8} {:>12} {:>10} {:>10} {:>8} {:>8} {:>8}",
            "year", "cases", "population", "rate", "expected", "smr_avg", "smr_min", "smr_max"
        ),
        &[6, 8, 12, 10, 10, 8, 8, 8],
    );

    for r in rates {
        let s = summaries.iter().find(|s| s.year == r.year);
        out.push_str(
            format!(
                "{:<6} {:>8} {:>12.0} {:>10} {:>10} {:>8} {:>8} {:>8}",
                r.year,
                r.cases,
                r.population,
                fmt_opt(r.rate, 2),
                s.map(|s| format!("{:.1}", s.expected)).unwrap_or_default(),
                fmt_opt(s.and_then(|s| s.smr_mean), 3),
                fmt_opt(s.and_then(|s| s.smr_min), 3),
                fmt_opt(s.and_then(|s| s.smr_max), 3),
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

pub fn format_moran(rows: &[YearMoran]) -> String {
    let mut out = header(
        &format!(
            "{:<6} {:<10} {:>9} {:>9} {:>9} {:>8} {:>8}",
            "year", "status", "I", "E[I]", "var", "z", "p"
        ),
        &[6, 10, 9, 9, 9, 8, 8],
    );

    for r in rows {
        let line = match &r.outcome {
            YearOutcome::Computed(m) => format!(
                "{:<6} {:<10} {:>9.4} {:>9.4} {:>9.5} {:>8.3} {:>8.4}",
                r.year,
                r.outcome.label(),
                m.statistic,
                m.expectation,
                m.variance,
                m.z_score,
                m.p_value
            ),
            YearOutcome::Mismatch { expected, actual } => format!(
                "{:<6} {:<10} ({actual} values for {expected} graph nodes)",
                r.year,
                r.outcome.label()
            ),
            YearOutcome::Degenerate { reason } => {
                format!("{:<6} {:<10} ({reason})", r.year, r.outcome.label())
            }
            YearOutcome::NoData => format!("{:<6} {:<10}", r.year, r.outcome.label()),
        };
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

/// Count of areas per LISA class and year.
pub fn format_lisa_counts(rows: &[LisaRow]) -> String {
    let mut counts: BTreeMap<i32, [usize; 5]> = BTreeMap::new();
    for r in rows {
        let slot = LisaClass::ALL.iter().position(|c| *c == r.class).unwrap_or(4);
        counts.entry(r.year).or_default()[slot] += 1;
    }

    let mut out = header(
        &format!(
            "{:<6} {:>10} {:>10} {:>10} {:>10} {:>16}",
            "year", "High-High", "High-Low", "Low-High", "Low-Low", "Not significant"
        ),
        &[6, 10, 10, 10, 10, 16],
    );
    if counts.is_empty() {
        out.push_str("(no year aligned with the graph)\n");
    }
    for (year, c) in counts {
        out.push_str(&format!(
            "{:<6} {:>10} {:>10} {:>10} {:>10} {:>16}\n",
            year, c[0], c[1], c[2], c[3], c[4]
        ));
    }
    out
}

pub fn format_comparison(table: &ComparisonTable) -> String {
    let mut out = header(
        &format!(
            "{:<14} {:>10} {:>8} {:>10} {:>10} {:>8} {:>8} {:>8} {:>8} {:>8}",
            "model", "mean_dev", "pD", "DIC", "WAIC", "p_waic", "LOOCV", "LCV3", "LCV5", "LCV10"
        ),
        &[14, 10, 8, 10, 10, 8, 8, 8, 8, 8],
    );

    for r in &table.rows {
        out.push_str(
            format!(
                "{:<14} {:>10.2} {:>8.2} {:>10.2} {:>10.2} {:>8.2} {:>8} {:>8} {:>8} {:>8}",
                truncate(&r.model_id, 14),
                r.mean_deviance,
                r.p_d,
                r.dic,
                r.waic,
                r.p_waic,
                fmt_opt(r.loocv, 3),
                fmt_opt(r.lcv3, 3),
                fmt_opt(r.lcv5, 3),
                fmt_opt(r.lcv10, 3),
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

/// Posterior summary of one fit.
pub fn format_fit(fit: &FitResult) -> String {
    let mut out = String::new();
    out.push_str(&format!("{} [{}] priors={}\n", fit.display_name, fit.model_id, fit.priors.name));
    out.push_str(&format!("  {}\n", fit.formula));

    out.push_str(&header(
        &format!(
            "{:<24} {:>10} {:>10} {:>10} {:>10} {:>10}",
            "fixed effect", "mean", "sd", "2.5%", "50%", "97.5%"
        ),
        &[24, 10, 10, 10, 10, 10],
    ));
    for f in &fit.fixed {
        out.push_str(&format!(
            "{:<24} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>10.4}\n",
            truncate(&f.name, 24),
            f.mean,
            f.sd,
            f.q025,
            f.q500,
            f.q975
        ));
    }

    out.push_str(&header(
        &format!(
            "{:<40} {:>12} {:>12} {:>12}",
            "hyperparameter", "mode", "2.5%", "97.5%"
        ),
        &[40, 12, 12, 12],
    ));
    for h in &fit.hyper {
        out.push_str(
            format!(
                "{:<40} {:>12.3} {:>12} {:>12}",
                truncate(&h.name, 40),
                h.precision,
                fmt_opt(h.lower, 3),
                fmt_opt(h.upper, 3)
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

/// Side-by-side sensitivity rows plus the fixed-effect means per prior.
pub fn format_sensitivity(runs: &[SensitivityRun]) -> String {
    let mut out = format_comparison(&sensitivity_table(runs));
    out.push('\n');
    for run in runs {
        out.push_str(&format!("[{}] ", run.priors.name));
        let parts: Vec<String> = run
            .fit
            .fixed
            .iter()
            .map(|f| format!("{}={:.4}", f.name, f.mean))
            .collect();
        out.push_str(&parts.join(" "));
        out.push('\n');
    }
    out
}

/// Everything a full run prints.
pub fn format_run(run: &RunOutput) -> String {
    let mut out = format_descriptive(&run.descriptive);
    if !run.comparison.is_empty() {
        out.push_str("\nModel comparison (no ranking applied):\n");
        out.push_str(&format_comparison(&run.comparison));
    }
    if let Some(last) = run.fits.last() {
        out.push('\n');
        out.push_str(&format_fit(last));
    }
    if !run.sensitivity.is_empty() {
        out.push_str("\nPrior sensitivity:\n");
        out.push_str(&format_sensitivity(&run.sensitivity));
    }
    out
}

fn header(title: &str, widths: &[usize]) -> String {
    let dashes: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    format!("{}\n{}\n", title.trim_end(), dashes.join(" "))
}

pub(crate) fn fmt_opt(v: Option<f64>, decimals: usize) -> String {
    match v {
        Some(x) if x.is_finite() => format!("{x:.decimals$}"),
        _ => "NA".to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::ComparisonRow;
    use crate::stats::MoranStatistic;

    #[test]
    fn moran_table_shows_sentinels() {
        let rows = vec![
            YearMoran {
                year: 2015,
                outcome: YearOutcome::Computed(MoranStatistic {
                    statistic: 0.4,
                    expectation: -0.333,
                    variance: 0.2,
                    z_score: 1.6,
                    p_value: 0.05,
                    alternative: crate::stats::Alternative::Greater,
                    n: 4,
                }),
            },
            YearMoran {
                year: 2016,
                outcome: YearOutcome::NoData,
            },
            YearMoran {
                year: 2017,
                outcome: YearOutcome::Mismatch { expected: 4, actual: 2 },
            },
        ];
        let text = format_moran(&rows);
        assert!(text.contains("0.4000"));
        assert!(text.contains("2016   no data"));
        assert!(text.contains("2 values for 4 graph nodes"));
    }

    #[test]
    fn comparison_prints_na_for_missing_scores() {
        let table = ComparisonTable {
            rows: vec![ComparisonRow {
                model_id: "bym".into(),
                display_name: "BYM".into(),
                mean_deviance: 1.0,
                p_d: 1.0,
                dic: 2.0,
                waic: 2.0,
                p_waic: 1.0,
                loocv: None,
                lcv3: Some(1.5),
                lcv5: None,
                lcv10: None,
            }],
        };
        let text = format_comparison(&table);
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().nth(2).unwrap().contains("NA"));
        assert!(text.contains("1.500"));
    }

    #[test]
    fn truncate_marks_cut() {
        assert_eq!(truncate("abcdef", 4), "abc.");
        assert_eq!(truncate("abc", 4), "abc");
    }
}

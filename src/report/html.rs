//! Self-contained HTML report.
//!
//! `write_report` creates `<dir>/report.html` and a `<dir>/plots/` folder with
//! the SVG figures the page links to. Tables are written as plain HTML; the
//! page has no scripts and no external resources.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::app::pipeline::{DescriptiveOutput, RunOutput};
use crate::domain::YearOutcome;
use crate::error::AppError;
use crate::fit::{ComparisonTable, sensitivity_table};
use crate::models::FitResult;
use crate::plot::{
    LegendEntry, fit_densities, lisa_map, observed_map, relative_risk_map, write_density_plot,
};
use crate::report::format::fmt_opt;
use crate::stats::LisaClass;

const PLOTS_DIR: &str = "plots";

#[derive(Debug, Clone, Default)]
pub struct ReportOptions {
    /// Model whose area effects are mapped; `None` = the last fitted model.
    pub map_model: Option<String>,
    /// Year of the maps; `None` = the graph reference year.
    pub map_year: Option<i32>,
}

/// Write the report with default options.
pub fn write_report(dir: &Path, run: &RunOutput) -> Result<PathBuf, AppError> {
    write_report_with(dir, run, &ReportOptions::default())
}

pub fn write_report_with(dir: &Path, run: &RunOutput, options: &ReportOptions) -> Result<PathBuf, AppError> {
    let plots = dir.join(PLOTS_DIR);
    std::fs::create_dir_all(&plots)
        .map_err(|e| AppError::input(format!("Failed to create report directory '{}': {e}", plots.display())))?;

    let d = &run.descriptive;
    let year = map_year(d, options.map_year)?;
    let map_fit = select_map_fit(&run.fits, options.map_model.as_deref())?;

    let mut body = String::new();
    body.push_str(&dataset_section(d));
    body.push_str(&rates_section(d));
    body.push_str(&moran_section(d));
    body.push_str(&maps_section(&plots, d, map_fit, year)?);

    if !run.comparison.is_empty() {
        body.push_str("<h2>Model comparison</h2>\n<p>Lower is better for every column. No ranking is applied.</p>\n");
        body.push_str(&comparison_html(&run.comparison));
    }
    for fit in &run.fits {
        body.push_str(&fit_section(&plots, fit, "")?);
    }
    if !run.sensitivity.is_empty() {
        body.push_str("<h2>Prior sensitivity</h2>\n");
        body.push_str(&comparison_html(&sensitivity_table(&run.sensitivity)));
        for s in &run.sensitivity {
            let suffix = format!("_{}", slug(&s.priors.name));
            body.push_str(&fit_section(&plots, &s.fit, &suffix)?);
        }
    }

    let html = page(&body);
    let path = dir.join("report.html");
    std::fs::write(&path, html)
        .map_err(|e| AppError::input(format!("Failed to write report '{}': {e}", path.display())))?;
    log::info!("Wrote report '{}'", path.display());
    Ok(path)
}

fn map_year(d: &DescriptiveOutput, requested: Option<i32>) -> Result<i32, AppError> {
    match requested {
        Some(y) if d.table.years.contains(&y) => Ok(y),
        Some(y) => Err(AppError::input(format!("Map year {y} is not in the data."))),
        None if d.table.years.contains(&d.info.reference_year) => Ok(d.info.reference_year),
        None => d
            .table
            .years
            .last()
            .copied()
            .ok_or_else(|| AppError::data("No years to map.")),
    }
}

fn select_map_fit<'a>(fits: &'a [FitResult], id: Option<&str>) -> Result<Option<&'a FitResult>, AppError> {
    match id {
        Some(id) => fits
            .iter()
            .find(|f| f.model_id == id)
            .map(Some)
            .ok_or_else(|| AppError::input(format!("Map model '{id}' was not fitted in this run."))),
        None => Ok(fits.last()),
    }
}

fn page(body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>Spatio-temporal TB analysis</title>\n<style>\n{STYLE}</style>\n</head>\n<body>\n\
         <h1>Spatio-temporal TB analysis</h1>\n<p class=\"meta\">Generated {}</p>\n{body}</body>\n</html>\n",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    )
}

const STYLE: &str = "body { font-family: sans-serif; margin: 2em; max-width: 1100px; }
table { border-collapse: collapse; margin: 0.5em 0 1.5em; }
th, td { border: 1px solid #ccc; padding: 0.2em 0.6em; text-align: right; }
th:first-child, td:first-child { text-align: left; }
.meta { color: #666; }
.figures { display: flex; flex-wrap: wrap; gap: 1.5em; }
figure { margin: 0; }
.swatch { display: inline-block; width: 1em; height: 1em; border: 1px solid #555; vertical-align: middle; margin: 0 0.3em 0 0.8em; }
";

fn dataset_section(d: &DescriptiveOutput) -> String {
    format!(
        "<h2>Dataset</h2>\n<ul>\n<li>Source: {}</li>\n<li>Features: {} read, {} rejected</li>\n\
         <li>Rows: {}, areas: {}, years: {}</li>\n\
         <li>Graph: {} areas, {} links, {} isolated, {} components (reference year {})</li>\n</ul>\n",
        escape(&d.info.source.display().to_string()),
        d.info.features_read,
        d.info.features_rejected,
        d.table.len(),
        d.table.n_areas(),
        d.table.n_years(),
        d.graph.len(),
        d.graph.n_links(),
        d.graph.isolated().len(),
        d.graph.components().len(),
        d.info.reference_year
    )
}

fn rates_section(d: &DescriptiveOutput) -> String {
    let mut rows = Vec::new();
    for r in &d.rates {
        let s = d.summaries.iter().find(|s| s.year == r.year);
        rows.push(vec![
            r.year.to_string(),
            r.cases.to_string(),
            format!("{:.0}", r.population),
            fmt_opt(r.rate, 2),
            s.map(|s| format!("{:.1}", s.expected)).unwrap_or_default(),
            fmt_opt(s.and_then(|s| s.smr_mean), 3),
            fmt_opt(s.and_then(|s| s.smr_min), 3),
            fmt_opt(s.and_then(|s| s.smr_max), 3),
            s.map(|s| s.smr_missing.to_string()).unwrap_or_default(),
        ]);
    }
    let mut out = String::from("<h2>Notification rate and SMR</h2>\n");
    out.push_str(&table(
        &[
            "year",
            "cases",
            "population",
            "rate / 100 000",
            "expected",
            "mean SMR",
            "min SMR",
            "max SMR",
            "missing SMR",
        ],
        &rows,
    ));
    out
}

fn moran_section(d: &DescriptiveOutput) -> String {
    let rows: Vec<Vec<String>> = d
        .moran
        .iter()
        .map(|m| match &m.outcome {
            YearOutcome::Computed(s) => vec![
                m.year.to_string(),
                m.outcome.label().to_string(),
                format!("{:.4}", s.statistic),
                format!("{:.4}", s.expectation),
                format!("{:.5}", s.variance),
                format!("{:.3}", s.z_score),
                format!("{:.4}", s.p_value),
            ],
            other => {
                let detail = match other {
                    YearOutcome::Mismatch { expected, actual } => {
                        format!("{actual} values for {expected} graph nodes")
                    }
                    YearOutcome::Degenerate { reason } => reason.clone(),
                    _ => String::new(),
                };
                vec![
                    m.year.to_string(),
                    other.label().to_string(),
                    detail,
                    String::new(),
                    String::new(),
                    String::new(),
                    String::new(),
                ]
            }
        })
        .collect();

    let mut counts: BTreeMap<i32, [usize; 5]> = BTreeMap::new();
    for r in &d.lisa {
        let slot = LisaClass::ALL.iter().position(|c| *c == r.class).unwrap_or(4);
        counts.entry(r.year).or_default()[slot] += 1;
    }
    let lisa_rows: Vec<Vec<String>> = counts
        .into_iter()
        .map(|(year, c)| {
            std::iter::once(year.to_string())
                .chain(c.iter().map(|n| n.to_string()))
                .collect()
        })
        .collect();

    let mut out = String::from("<h2>Spatial autocorrelation of SMR</h2>\n<h3>Global Moran's I</h3>\n");
    out.push_str(&table(&["year", "status", "I", "E[I]", "variance", "z", "p"], &rows));
    out.push_str("<h3>LISA clusters (areas per class)</h3>\n");
    let mut header = vec!["year".to_string()];
    header.extend(LisaClass::ALL.iter().map(|c| c.to_string()));
    let header: Vec<&str> = header.iter().map(String::as_str).collect();
    out.push_str(&table(&header, &lisa_rows));
    out
}

fn maps_section(
    plots: &Path,
    d: &DescriptiveOutput,
    map_fit: Option<&FitResult>,
    year: i32,
) -> Result<String, AppError> {
    let mut figures = Vec::new();

    let file = format!("lisa_{year}.svg");
    let legend = lisa_map(&plots.join(&file), &d.geometries, &d.lisa, year)?;
    figures.push(figure(&file, &format!("LISA clusters, {year}"), &legend));

    let file = format!("observed_{year}.svg");
    let legend = observed_map(&plots.join(&file), &d.geometries, &d.table, year)?;
    figures.push(figure(&file, &format!("Observed cases, {year}"), &legend));

    if let Some(fit) = map_fit {
        let file = format!("rr_{}.svg", slug(&fit.model_id));
        let legend = relative_risk_map(&plots.join(&file), &d.geometries, &fit.area_effects)?;
        figures.push(figure(
            &file,
            &format!("Area relative risk, {}", fit.display_name),
            &legend,
        ));
    }

    let mut out = String::from("<h2>Maps</h2>\n<div class=\"figures\">\n");
    for f in figures {
        out.push_str(&f);
    }
    out.push_str("</div>\n");
    Ok(out)
}

fn comparison_html(t: &ComparisonTable) -> String {
    let rows: Vec<Vec<String>> = t
        .rows
        .iter()
        .map(|r| {
            vec![
                r.model_id.clone(),
                r.display_name.clone(),
                format!("{:.2}", r.mean_deviance),
                format!("{:.2}", r.p_d),
                format!("{:.2}", r.dic),
                format!("{:.2}", r.waic),
                format!("{:.2}", r.p_waic),
                fmt_opt(r.loocv, 3),
                fmt_opt(r.lcv3, 3),
                fmt_opt(r.lcv5, 3),
                fmt_opt(r.lcv10, 3),
            ]
        })
        .collect();
    table(
        &[
            "model",
            "name",
            "mean deviance",
            "pD",
            "DIC",
            "WAIC",
            "p_WAIC",
            "LOOCV",
            "LCV3",
            "LCV5",
            "LCV10",
        ],
        &rows,
    )
}

fn fit_section(plots: &Path, fit: &FitResult, suffix: &str) -> Result<String, AppError> {
    let mut out = format!(
        "<h2>{} <small>({}, {} priors)</small></h2>\n<p><code>{}</code></p>\n",
        escape(&fit.display_name),
        escape(&fit.model_id),
        escape(&fit.priors.name),
        escape(&fit.formula)
    );

    let fixed: Vec<Vec<String>> = fit
        .fixed
        .iter()
        .map(|f| {
            vec![
                f.name.clone(),
                format!("{:.4}", f.mean),
                format!("{:.4}", f.sd),
                format!("{:.4}", f.q025),
                format!("{:.4}", f.q500),
                format!("{:.4}", f.q975),
            ]
        })
        .collect();
    out.push_str(&table(&["fixed effect", "mean", "sd", "2.5%", "50%", "97.5%"], &fixed));

    let hyper: Vec<Vec<String>> = fit
        .hyper
        .iter()
        .map(|h| {
            vec![
                h.name.clone(),
                format!("{:.3}", h.precision),
                fmt_opt(h.lower, 3),
                fmt_opt(h.upper, 3),
            ]
        })
        .collect();
    out.push_str(&table(&["precision", "mode", "2.5%", "97.5%"], &hyper));

    let mut figures = Vec::new();
    for (k, curve) in fit_densities(fit).iter().enumerate() {
        let file = format!("density_{}{}_{k}.svg", slug(&fit.model_id), suffix);
        write_density_plot(&plots.join(&file), curve)?;
        figures.push(figure(&file, &curve.name, &[]));
    }
    if !figures.is_empty() {
        out.push_str("<div class=\"figures\">\n");
        for f in figures {
            out.push_str(&f);
        }
        out.push_str("</div>\n");
    }
    Ok(out)
}

fn figure(file: &str, caption: &str, legend: &[LegendEntry]) -> String {
    let mut out = format!(
        "<figure>\n<img src=\"{PLOTS_DIR}/{}\" alt=\"{}\">\n<figcaption>{}",
        escape(file),
        escape(caption),
        escape(caption)
    );
    if !legend.is_empty() {
        out.push_str("<br>");
        for e in legend {
            out.push_str(&format!(
                "<span class=\"swatch\" style=\"background:{}\"></span>{}",
                e.hex(),
                escape(&e.label)
            ));
        }
    }
    out.push_str("</figcaption>\n</figure>\n");
    out
}

fn table(header: &[&str], rows: &[Vec<String>]) -> String {
    let mut out = String::from("<table>\n<tr>");
    for h in header {
        out.push_str(&format!("<th>{}</th>", escape(h)));
    }
    out.push_str("</tr>\n");
    for row in rows {
        out.push_str("<tr>");
        for cell in row {
            out.push_str(&format!("<td>{}</td>", escape(cell)));
        }
        out.push_str("</tr>\n");
    }
    out.push_str("</table>\n");
    out
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// File-name-safe form of an id or label.
fn slug(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

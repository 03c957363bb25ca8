//! Shared analysis pipeline used by every subcommand.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! load -> prepare -> graph (write + re-read) -> descriptive -> Moran/LISA ->
//! fits -> cross-validation -> comparison -> optional sensitivity
//!
//! Subcommands then only decide what to print or write.

use std::path::PathBuf;

use crate::data::{PrepareConfig, prepare};
use crate::domain::{AreaGeometry, PreparedTable, SmrTable};
use crate::error::AppError;
use crate::fit::{ComparisonTable, DEFAULT_LEVEL_SETS, SensitivityRun, comparison_table, fit_suite, run_sensitivity};
use crate::io::{IngestConfig, load_dataset, read_graph, write_graph};
use crate::models::{FitOptions, FitResult, InferenceEngine, LaplaceEngine, ModelSpec, PriorConfig};
use crate::spatial::{AdjacencyGraph, Contiguity, build_contiguity_graph};
use crate::stats::{
    Alternative, LisaRow, SmrConfig, YearMoran, YearRate, YearSummary, global_moran_by_year, lisa_by_year,
    notification_rates, with_smr, year_summaries,
};

/// Prior sensitivity request.
#[derive(Debug, Clone)]
pub struct SensitivityConfig {
    pub model: ModelSpec,
    pub priors: Vec<PriorConfig>,
}

#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub ingest: IngestConfig,
    pub prepare: PrepareConfig,
    pub smr: SmrConfig,
    pub contiguity: Contiguity,
    pub snap: f64,
    /// Where the graph artifact goes; `None` = a temp file removed after reading.
    pub graph_path: Option<PathBuf>,
    pub alternative: Alternative,
    pub alpha: f64,
    /// Models to fit, in order. Empty = descriptive stages only.
    pub models: Vec<ModelSpec>,
    pub fit: FitOptions,
    pub level_sets: Vec<usize>,
    pub sensitivity: Option<SensitivityConfig>,
}

/// Input bookkeeping for the run summary.
#[derive(Debug, Clone)]
pub struct DatasetInfo {
    pub source: PathBuf,
    pub features_read: usize,
    pub features_rejected: usize,
    pub reference_year: i32,
    /// Kept graph artifact, if one was requested.
    pub graph_path: Option<PathBuf>,
}

/// Outputs of the stages before model fitting.
#[derive(Debug, Clone)]
pub struct DescriptiveOutput {
    pub info: DatasetInfo,
    pub table: PreparedTable,
    pub smr: SmrTable,
    pub geometries: Vec<AreaGeometry>,
    pub graph: AdjacencyGraph,
    pub rates: Vec<YearRate>,
    pub summaries: Vec<YearSummary>,
    pub moran: Vec<YearMoran>,
    pub lisa: Vec<LisaRow>,
}

/// All computed outputs of one run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub descriptive: DescriptiveOutput,
    pub fits: Vec<FitResult>,
    pub comparison: ComparisonTable,
    pub sensitivity: Vec<SensitivityRun>,
}

fn validate(config: &AnalysisConfig) -> Result<(), AppError> {
    if !(config.alpha > 0.0 && config.alpha < 1.0) {
        return Err(AppError::input(format!(
            "Significance level must be in (0, 1), got {}.",
            config.alpha
        )));
    }
    if let Some(k) = config.level_sets.iter().find(|k| !DEFAULT_LEVEL_SETS.contains(k)) {
        return Err(AppError::input(format!(
            "Group CV level sets must be among {DEFAULT_LEVEL_SETS:?}, got {k}."
        )));
    }
    config.fit.priors.validate()
}

/// Load, prepare, build the graph and compute every descriptive statistic.
pub fn run_descriptive(config: &AnalysisConfig) -> Result<DescriptiveOutput, AppError> {
    validate(config)?;

    let dataset = load_dataset(&config.ingest)?;
    let table = prepare(&dataset.records, &config.prepare)?;

    let built = build_contiguity_graph(&dataset.geometries, config.contiguity, config.snap)?;
    let graph = match &config.graph_path {
        Some(path) => {
            write_graph(path, &built, config.contiguity, dataset.reference_year)?;
            read_graph(path)?.graph
        }
        None => {
            let scratch = tempfile::Builder::new()
                .prefix("tbst_graph_")
                .suffix(".json")
                .tempfile()
                .map_err(|e| AppError::input(format!("Failed to create temporary graph file: {e}")))?;
            write_graph(scratch.path(), &built, config.contiguity, dataset.reference_year)?;
            read_graph(scratch.path())?.graph
        }
    };

    if graph.area_ids() != table.area_ids.as_slice() {
        log::warn!(
            "Graph has {} areas but the table has {}; areas missing from the reference year cannot be modelled",
            graph.len(),
            table.n_areas()
        );
    }
    if !graph.isolated().is_empty() {
        log::warn!("{} areas have no neighbours", graph.isolated().len());
    }

    let smr = with_smr(&table, &config.smr);
    let rates = notification_rates(&table);
    let summaries = year_summaries(&smr);
    let moran = global_moran_by_year(&smr, &graph, config.alternative);
    let lisa = lisa_by_year(&smr, &graph, config.alpha);

    Ok(DescriptiveOutput {
        info: DatasetInfo {
            source: config.ingest.path.clone(),
            features_read: dataset.features_read,
            features_rejected: dataset.row_errors.len(),
            reference_year: dataset.reference_year,
            graph_path: config.graph_path.clone(),
        },
        table,
        smr,
        geometries: dataset.geometries,
        graph,
        rates,
        summaries,
        moran,
        lisa,
    })
}

/// The full pipeline with the built-in Laplace engine.
pub fn run_analysis(config: &AnalysisConfig) -> Result<RunOutput, AppError> {
    run_analysis_with(config, &LaplaceEngine::default())
}

/// The full pipeline with any engine.
pub fn run_analysis_with(config: &AnalysisConfig, engine: &dyn InferenceEngine) -> Result<RunOutput, AppError> {
    let descriptive = run_descriptive(config)?;
    let d = &descriptive;

    let fits = fit_suite(engine, &config.models, &d.table, &d.graph, &config.fit, &config.level_sets)?;
    let comparison = comparison_table(&fits);

    let sensitivity = match &config.sensitivity {
        Some(s) => run_sensitivity(
            engine,
            &s.model,
            &d.table,
            &d.graph,
            &config.fit,
            &s.priors,
            &config.level_sets,
        )?,
        None => Vec::new(),
    };

    Ok(RunOutput {
        descriptive,
        fits,
        comparison,
        sensitivity,
    })
}

//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - turns them into plain config structs
//! - runs the shared pipeline
//! - prints reports and writes optional exports

use clap::Parser;

use crate::cli::{
    Command, FitArgs, GeometryArgs, GraphArgs, InputArgs, ModelArgs, ReportArgs, SampleArgs, SensitivityArgs,
};
use crate::data::{PrepareConfig, SampleConfig, write_sample};
use crate::domain::ColumnNames;
use crate::error::AppError;
use crate::io::IngestConfig;
use crate::models::{FitOptions, ModelSpec, PriorPreset};
use crate::report::ReportOptions;
use crate::stats::SmrConfig;

pub mod pipeline;

use pipeline::{AnalysisConfig, SensitivityConfig};

/// Entry point for the `tbst` binary.
pub fn run() -> Result<(), AppError> {
    let cli = crate::cli::Cli::parse();

    match cli.command {
        Command::Describe(args) => handle_describe(args),
        Command::Fit(args) => handle_fit(args),
        Command::Sensitivity(args) => handle_sensitivity(args),
        Command::Report(args) => handle_report(args),
        Command::Graph(args) => handle_graph(args),
        Command::Sample(args) => handle_sample(args),
    }
}

fn handle_describe(args: InputArgs) -> Result<(), AppError> {
    let config = analysis_config_from_args(&args, None)?;
    let d = pipeline::run_descriptive(&config)?;
    println!("{}", crate::report::format_descriptive(&d));
    Ok(())
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let config = analysis_config_from_args(&args.input, Some(&args.model))?;
    let run = pipeline::run_analysis(&config)?;

    println!("{}", crate::report::format_run(&run));

    if let Some(path) = &args.export {
        crate::io::write_comparison_csv(path, &run.comparison)?;
    }
    if let Some(path) = &args.json {
        crate::io::write_fits_json(path, &run.fits)?;
    }
    Ok(())
}

fn handle_sensitivity(args: SensitivityArgs) -> Result<(), AppError> {
    let mut config = analysis_config_from_args(&args.input, Some(&args.model))?;
    config.models.clear();
    config.sensitivity = Some(sensitivity_config(&args.target, &args.presets)?);
    let run = pipeline::run_analysis(&config)?;

    println!("{}", crate::report::format_run(&run));

    if let Some(path) = &args.export {
        crate::io::write_comparison_csv(path, &crate::fit::sensitivity_table(&run.sensitivity))?;
    }
    Ok(())
}

fn handle_report(args: ReportArgs) -> Result<(), AppError> {
    let mut config = analysis_config_from_args(&args.input, Some(&args.model))?;
    if let Some(id) = &args.sensitivity_model {
        config.sensitivity = Some(sensitivity_config(
            id,
            &[PriorPreset::Default, PriorPreset::Weak, PriorPreset::Informative],
        )?);
    }
    let run = pipeline::run_analysis(&config)?;

    println!("{}", crate::report::format_run(&run));

    let options = ReportOptions {
        map_model: args.map_model.clone(),
        map_year: args.map_year,
    };
    let path = crate::report::write_report_with(&args.out, &run, &options)?;
    println!("Report: {}", path.display());
    Ok(())
}

fn handle_graph(args: GraphArgs) -> Result<(), AppError> {
    let ingest = ingest_config_from_args(&args.geometry);
    let dataset = crate::io::load_dataset(&ingest)?;
    let graph = crate::spatial::build_contiguity_graph(&dataset.geometries, args.geometry.contiguity, args.geometry.snap)?;
    crate::io::write_graph(&args.out, &graph, args.geometry.contiguity, dataset.reference_year)?;

    println!(
        "Graph: {} areas, {} links, {} isolated, {} components -> {}",
        graph.len(),
        graph.n_links(),
        graph.isolated().len(),
        graph.components().len(),
        args.out.display()
    );
    Ok(())
}

fn handle_sample(args: SampleArgs) -> Result<(), AppError> {
    let config = SampleConfig {
        cols: args.cols,
        rows: args.rows,
        first_year: args.first_year,
        n_years: args.years,
        seed: args.seed,
        ..SampleConfig::default()
    };
    write_sample(&args.out, &config)?;
    println!(
        "Sample: {} areas x {} years -> {}",
        config.cols * config.rows,
        config.n_years,
        args.out.display()
    );
    Ok(())
}

pub fn ingest_config_from_args(args: &GeometryArgs) -> IngestConfig {
    let c = &args.columns;
    IngestConfig {
        path: args.input.clone(),
        columns: ColumnNames {
            area_id: c.id_col.clone(),
            year: c.year_col.clone(),
            observed: c.observed_col.clone(),
            expected: c.expected_col.clone(),
            population: c.population_col.clone(),
            pop_density: c.density_col.clone(),
            poverty: c.poverty_col.clone(),
        },
        reference_year: args.reference_year,
    }
}

/// Build the pipeline config. Without `model`, no models are fitted.
pub fn analysis_config_from_args(
    input: &InputArgs,
    model: Option<&ModelArgs>,
) -> Result<AnalysisConfig, AppError> {
    let (models, fit, level_sets) = match model {
        Some(m) => (
            models_from_ids(&m.models)?,
            FitOptions {
                priors: m.priors.config(),
                quadrature_nodes: m.quadrature_nodes,
            },
            m.level_sets.clone(),
        ),
        None => (Vec::new(), FitOptions::default(), crate::fit::DEFAULT_LEVEL_SETS.to_vec()),
    };

    Ok(AnalysisConfig {
        ingest: ingest_config_from_args(&input.geometry),
        prepare: PrepareConfig {
            zero_sentinel: (!input.no_sentinel).then_some(input.zero_sentinel),
            ..PrepareConfig::default()
        },
        smr: SmrConfig {
            zero_as_missing: input.zero_as_missing,
        },
        contiguity: input.geometry.contiguity,
        snap: input.geometry.snap,
        graph_path: input.graph_out.clone(),
        alternative: input.alternative,
        alpha: input.alpha,
        models,
        fit,
        level_sets,
        sensitivity: None,
    })
}

/// Resolve model ids in the given order; empty = the full suite.
pub fn models_from_ids(ids: &[String]) -> Result<Vec<ModelSpec>, AppError> {
    if ids.is_empty() {
        return Ok(ModelSpec::standard_suite());
    }
    ids.iter().map(|id| model_by_id(id)).collect()
}

fn model_by_id(id: &str) -> Result<ModelSpec, AppError> {
    ModelSpec::by_id(id.trim()).ok_or_else(|| {
        let known: Vec<String> = ModelSpec::standard_suite().into_iter().map(|m| m.id).collect();
        AppError::input(format!("Unknown model '{id}'. Known models: {}.", known.join(", ")))
    })
}

fn sensitivity_config(id: &str, presets: &[PriorPreset]) -> Result<SensitivityConfig, AppError> {
    Ok(SensitivityConfig {
        model: model_by_id(id)?,
        priors: presets.iter().map(|p| p.config()).collect(),
    })
}

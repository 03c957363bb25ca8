//! Command-line parsing for `tbst`.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the statistics/modeling code.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::data::prepare::DEFAULT_ZERO_SENTINEL;
use crate::fit::DEFAULT_LEVEL_SETS;
use crate::math::DEFAULT_NODES;
use crate::models::PriorPreset;
use crate::spatial::{Contiguity, DEFAULT_SNAP};
use crate::stats::{Alternative, DEFAULT_ALPHA};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "tbst",
    version,
    about = "Spatio-temporal TB analysis: Moran diagnostics and Bayesian disease mapping"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Notification rates, SMR summaries, global Moran's I and LISA counts.
    Describe(InputArgs),
    /// Fit the model suite and print the comparison table.
    Fit(FitArgs),
    /// Re-fit one model under several precision priors.
    Sensitivity(SensitivityArgs),
    /// Full run plus an HTML report with SVG maps and density plots.
    Report(ReportArgs),
    /// Build the adjacency graph and write it as JSON.
    Graph(GraphArgs),
    /// Write a synthetic GeoJSON dataset.
    Sample(SampleArgs),
}

/// GeoJSON property names.
#[derive(Debug, Args, Clone)]
pub struct ColumnArgs {
    #[arg(long, default_value = "area_id")]
    pub id_col: String,

    #[arg(long, default_value = "year")]
    pub year_col: String,

    /// Observed case counts.
    #[arg(long, default_value = "cases")]
    pub observed_col: String,

    #[arg(long, default_value = "expected")]
    pub expected_col: String,

    #[arg(long, default_value = "population")]
    pub population_col: String,

    /// Population density (divided by 1000 during preparation).
    #[arg(long, default_value = "pop_density")]
    pub density_col: String,

    #[arg(long, default_value = "poverty")]
    pub poverty_col: String,
}

/// Where the areas come from and how they are joined.
#[derive(Debug, Args, Clone)]
pub struct GeometryArgs {
    /// GeoJSON FeatureCollection with one feature per area and year.
    #[arg(value_name = "GEOJSON")]
    pub input: PathBuf,

    #[command(flatten)]
    pub columns: ColumnArgs,

    /// Year whose polygons define the areas (default: earliest year).
    #[arg(long)]
    pub reference_year: Option<i32>,

    #[arg(long, value_enum, default_value_t = Contiguity::Queen)]
    pub contiguity: Contiguity,

    /// Vertex snapping distance, in input coordinate units.
    #[arg(long, default_value_t = DEFAULT_SNAP)]
    pub snap: f64,
}

/// Options shared by every analysis subcommand.
#[derive(Debug, Args, Clone)]
pub struct InputArgs {
    #[command(flatten)]
    pub geometry: GeometryArgs,

    /// Case counts equal to this value are read as 0.
    #[arg(long, default_value_t = DEFAULT_ZERO_SENTINEL)]
    pub zero_sentinel: f64,

    /// Keep case counts exactly as read.
    #[arg(long)]
    pub no_sentinel: bool,

    /// Treat zero case counts as missing SMR.
    #[arg(long)]
    pub zero_as_missing: bool,

    /// Keep the adjacency graph JSON at this path (default: temp file).
    #[arg(long, value_name = "JSON")]
    pub graph_out: Option<PathBuf>,

    /// Significance level for LISA classes.
    #[arg(long, default_value_t = DEFAULT_ALPHA)]
    pub alpha: f64,

    /// Alternative hypothesis for the global Moran test.
    #[arg(long, value_enum, default_value_t = Alternative::Greater)]
    pub alternative: Alternative,
}

/// Model and inference options.
#[derive(Debug, Args, Clone)]
pub struct ModelArgs {
    /// Comma-separated model ids (default: all ten).
    #[arg(long, value_delimiter = ',')]
    pub models: Vec<String>,

    #[arg(long, value_enum, default_value_t = PriorPreset::Default)]
    pub priors: PriorPreset,

    /// Gauss-Hermite nodes for DIC/WAIC/CPO integrals.
    #[arg(long, default_value_t = DEFAULT_NODES)]
    pub quadrature_nodes: usize,

    /// Level-set counts for grouped cross-validation (any of 3, 5, 10).
    #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_LEVEL_SETS)]
    pub level_sets: Vec<usize>,
}

#[derive(Debug, Args, Clone)]
pub struct FitArgs {
    #[command(flatten)]
    pub input: InputArgs,

    #[command(flatten)]
    pub model: ModelArgs,

    /// Export the comparison table to CSV.
    #[arg(long, value_name = "CSV")]
    pub export: Option<PathBuf>,

    /// Export posterior summaries of every fit to JSON.
    #[arg(long, value_name = "JSON")]
    pub json: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct SensitivityArgs {
    #[command(flatten)]
    pub input: InputArgs,

    #[command(flatten)]
    pub model: ModelArgs,

    /// Model id to re-fit.
    #[arg(long = "model", value_name = "ID")]
    pub target: String,

    /// Prior presets to compare.
    #[arg(
        long,
        value_enum,
        value_delimiter = ',',
        default_values_t = [PriorPreset::Default, PriorPreset::Weak, PriorPreset::Informative]
    )]
    pub presets: Vec<PriorPreset>,

    #[arg(long, value_name = "CSV")]
    pub export: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct ReportArgs {
    #[command(flatten)]
    pub input: InputArgs,

    #[command(flatten)]
    pub model: ModelArgs,

    /// Output directory for report.html and plots/.
    #[arg(long, value_name = "DIR")]
    pub out: PathBuf,

    /// Model whose area relative risks are mapped (default: last fitted).
    #[arg(long, value_name = "ID")]
    pub map_model: Option<String>,

    /// Year of the maps (default: reference year).
    #[arg(long)]
    pub map_year: Option<i32>,

    /// Also run the prior sensitivity analysis for this model.
    #[arg(long, value_name = "ID")]
    pub sensitivity_model: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct GraphArgs {
    #[command(flatten)]
    pub geometry: GeometryArgs,

    #[arg(long, value_name = "JSON")]
    pub out: PathBuf,
}

#[derive(Debug, Args, Clone)]
pub struct SampleArgs {
    #[arg(long, value_name = "GEOJSON")]
    pub out: PathBuf,

    #[arg(long, default_value_t = 5)]
    pub cols: usize,

    #[arg(long, default_value_t = 4)]
    pub rows: usize,

    #[arg(long, default_value_t = 2015)]
    pub first_year: i32,

    #[arg(long, default_value_t = 5)]
    pub years: usize,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

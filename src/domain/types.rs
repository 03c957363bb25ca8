//! Shared domain types.
//!
//! The working data flows through explicit stages. Each stage returns a new
//! table carrying the extra fields it derives instead of mutating the previous
//! one:
//!
//! `RawRecord` (ingest) -> `Observation` (prepare) -> `SmrRecord` (descriptive)

use std::collections::BTreeMap;

use geo::MultiPolygon;
use serde::{Deserialize, Serialize};

/// GeoJSON property names for the per-area-year attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnNames {
    pub area_id: String,
    pub year: String,
    pub observed: String,
    pub expected: String,
    pub population: String,
    pub pop_density: String,
    pub poverty: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            area_id: "area_id".to_string(),
            year: "year".to_string(),
            observed: "cases".to_string(),
            expected: "expected".to_string(),
            population: "population".to_string(),
            pop_density: "pop_density".to_string(),
            poverty: "poverty".to_string(),
        }
    }
}

/// One feature of the input file, as read (no unit or sentinel handling yet).
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub area_id: String,
    pub year: i32,
    pub observed: f64,
    pub expected: f64,
    pub population: f64,
    pub pop_density: f64,
    pub poverty: f64,
}

/// Boundary of one area (taken from the reference year).
#[derive(Debug, Clone)]
pub struct AreaGeometry {
    pub area_id: String,
    pub geometry: MultiPolygon<f64>,
}

/// A cleaned (area, year) observation ready for modelling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub area_id: String,
    pub year: i32,
    /// Observed case count.
    pub observed: u64,
    /// Expected case count from indirect standardization.
    pub expected: f64,
    pub population: f64,
    /// Population density, per 1000 inhabitants per unit area.
    pub pop_density: f64,
    pub poverty: f64,
    /// Position of `area_id` in the sorted list of areas.
    pub area_idx: usize,
    /// Position of `year` in the sorted list of years.
    pub time_idx: usize,
    /// Space-time interaction identifier (row index of the sorted table).
    pub interaction_idx: usize,
}

/// Prepared table: rows sorted by (area, year), one row per pair.
#[derive(Debug, Clone, Default)]
pub struct PreparedTable {
    pub rows: Vec<Observation>,
    pub area_ids: Vec<String>,
    pub years: Vec<i32>,
}

impl PreparedTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn n_areas(&self) -> usize {
        self.area_ids.len()
    }

    pub fn n_years(&self) -> usize {
        self.years.len()
    }

    /// Rows for one year, in table (area) order.
    pub fn rows_for_year(&self, year: i32) -> impl Iterator<Item = &Observation> {
        self.rows.iter().filter(move |r| r.year == year)
    }

    /// `log(expected)` per row, the model offset.
    pub fn log_expected(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.expected.ln()).collect()
    }
}

/// An observation plus its standardized morbidity ratio.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SmrRecord {
    pub observation: Observation,
    /// `observed / expected`; `None` when undefined.
    pub smr: Option<f64>,
}

/// Stage-two table: SMR attached to every row.
#[derive(Debug, Clone, Default)]
pub struct SmrTable {
    pub rows: Vec<SmrRecord>,
    pub area_ids: Vec<String>,
    pub years: Vec<i32>,
}

impl SmrTable {
    /// SMR values of one year keyed by area id.
    pub fn smr_by_area(&self, year: i32) -> BTreeMap<&str, Option<f64>> {
        self.rows
            .iter()
            .filter(|r| r.observation.year == year)
            .map(|r| (r.observation.area_id.as_str(), r.smr))
            .collect()
    }
}

/// Outcome of a per-year computation.
///
/// The two data problems the per-year loop must survive are explicit variants
/// rather than missing values hidden in the statistic.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum YearOutcome<T> {
    Computed(T),
    /// The year has no rows.
    NoData,
    /// The year's value vector does not line up with the graph nodes.
    Mismatch { expected: usize, actual: usize },
    /// The statistic is undefined for this input (e.g. constant values).
    Degenerate { reason: String },
}

impl<T> YearOutcome<T> {
    pub fn computed(&self) -> Option<&T> {
        match self {
            YearOutcome::Computed(v) => Some(v),
            _ => None,
        }
    }

    /// Carry a non-computed outcome over to another payload type.
    pub fn map_failure<U>(self) -> YearOutcome<U> {
        match self {
            YearOutcome::Computed(_) => YearOutcome::Degenerate {
                reason: "unexpected value".to_string(),
            },
            YearOutcome::NoData => YearOutcome::NoData,
            YearOutcome::Mismatch { expected, actual } => YearOutcome::Mismatch { expected, actual },
            YearOutcome::Degenerate { reason } => YearOutcome::Degenerate { reason },
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            YearOutcome::Computed(_) => "ok",
            YearOutcome::NoData => "no data",
            YearOutcome::Mismatch { .. } => "mismatch",
            YearOutcome::Degenerate { .. } => "degenerate",
        }
    }
}

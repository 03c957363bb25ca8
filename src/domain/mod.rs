//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - raw input rows and area geometries (`RawRecord`, `AreaGeometry`)
//! - the prepared observation table (`Observation`, `PreparedTable`)
//! - the SMR stage (`SmrRecord`, `SmrTable`)
//! - the per-year result-or-diagnostic type (`YearOutcome`)

pub mod types;

pub use types::*;

//! Descriptive and spatial-autocorrelation statistics.
//!
//! Responsibilities:
//!
//! - notification rates, SMR and per-year summaries
//! - global Moran's I per year, with explicit no-data / mismatch outcomes
//! - local Moran's I and LISA cluster classes

pub mod descriptive;
pub mod moran;

pub use descriptive::*;
pub use moran::*;

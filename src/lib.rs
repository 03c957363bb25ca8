//! `tb-spacetime` library crate.
//!
//! The binary (`tbst`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the inference engine can be swapped behind `models::InferenceEngine`
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod plot;
pub mod report;
pub mod spatial;
pub mod stats;

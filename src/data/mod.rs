//! Data sources: preparation of ingested records and synthetic samples.

pub mod prepare;
pub mod sample;

pub use prepare::{prepare, PrepareConfig};
pub use sample::{generate_sample, write_sample, SampleConfig};

//! Input/output helpers.
//!
//! - GeoJSON ingest + row validation (`ingest`)
//! - adjacency-graph artifact read/write (`graph`)
//! - comparison CSV and summary JSON exports (`export`)

pub mod export;
pub mod graph;
pub mod ingest;

pub use export::*;
pub use graph::*;
pub use ingest::*;

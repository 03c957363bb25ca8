//! Spatial structure: the adjacency graph and contiguity construction.

pub mod contiguity;
pub mod graph;

pub use contiguity::*;
pub use graph::*;

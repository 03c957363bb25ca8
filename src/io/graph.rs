//! Read/write the adjacency graph artifact.
//!
//! The graph is built once per run and written to disk so the modelling stage
//! reads back exactly what was inspected. The schema is `GraphFile`:
//! - tool name and contiguity rule
//! - node order (area ids)
//! - zero-based neighbour lists

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::spatial::{AdjacencyGraph, Contiguity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphFile {
    pub tool: String,
    pub contiguity: Contiguity,
    pub reference_year: i32,
    pub graph: AdjacencyGraph,
}

/// Write a graph JSON file.
pub fn write_graph(
    path: &Path,
    graph: &AdjacencyGraph,
    contiguity: Contiguity,
    reference_year: i32,
) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::input(format!("Failed to create graph file '{}': {e}", path.display())))?;

    let payload = GraphFile {
        tool: "tbst".to_string(),
        contiguity,
        reference_year,
        graph: graph.clone(),
    };

    serde_json::to_writer_pretty(BufWriter::new(file), &payload)
        .map_err(|e| AppError::input(format!("Failed to write graph file: {e}")))?;

    log::debug!("Wrote adjacency graph to '{}'", path.display());
    Ok(())
}

/// Read a graph JSON file and validate it.
pub fn read_graph(path: &Path) -> Result<GraphFile, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::input(format!("Failed to open graph file '{}': {e}", path.display())))?;
    let payload: GraphFile = serde_json::from_reader(std::io::BufReader::new(file))
        .map_err(|e| AppError::input(format!("Invalid graph file '{}': {e}", path.display())))?;

    Ok(GraphFile {
        graph: payload.graph.reindexed()?,
        ..payload
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_survives_disk_round_trip() {
        let ids = vec!["x".to_string(), "y".to_string(), "z".to_string()];
        let graph = AdjacencyGraph::new(ids, vec![vec![1], vec![2], vec![]]).unwrap();
        let file = tempfile::NamedTempFile::new().unwrap();

        write_graph(file.path(), &graph, Contiguity::Queen, 2016).unwrap();
        let back = read_graph(file.path()).unwrap();

        assert_eq!(back.reference_year, 2016);
        assert_eq!(back.graph, graph);
        assert_eq!(back.graph.index_of("z"), Some(2));
    }
}

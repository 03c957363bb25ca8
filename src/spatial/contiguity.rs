//! Contiguity neighbours from area polygons.
//!
//! Two areas are queen neighbours when any boundary vertex of one lies within
//! `snap` of a boundary vertex of the other; rook neighbours need at least two
//! distinct shared points (a shared edge rather than a corner).
//!
//! Vertices are bucketed on a grid of cell size `snap`. Two points closer than
//! `snap` always fall in the same or adjacent cells, so each vertex only has to
//! be compared against its 3×3 cell block.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use clap::ValueEnum;
use geo::CoordsIter;
use serde::{Deserialize, Serialize};

use crate::domain::AreaGeometry;
use crate::error::AppError;
use crate::spatial::AdjacencyGraph;

/// Default snapping distance, in the input coordinate units.
pub const DEFAULT_SNAP: f64 = 1e-7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Contiguity {
    /// Shared boundary point (edge or corner).
    Queen,
    /// Shared edge (at least two boundary points).
    Rook,
}

impl Contiguity {
    fn min_shared_points(self) -> usize {
        match self {
            Contiguity::Queen => 1,
            Contiguity::Rook => 2,
        }
    }
}

type Cell = (i64, i64);

struct Vertex {
    area: usize,
    x: f64,
    y: f64,
}

/// Queen contiguity graph, the rule every model uses.
pub fn build_queen_graph(areas: &[AreaGeometry], snap: f64) -> Result<AdjacencyGraph, AppError> {
    build_contiguity_graph(areas, Contiguity::Queen, snap)
}

/// Build a contiguity graph. Nodes are ordered by area id.
pub fn build_contiguity_graph(
    areas: &[AreaGeometry],
    contiguity: Contiguity,
    snap: f64,
) -> Result<AdjacencyGraph, AppError> {
    if !(snap.is_finite() && snap > 0.0) {
        return Err(AppError::input(format!("Invalid snap distance: {snap}.")));
    }

    let mut ordered: Vec<&AreaGeometry> = areas.iter().collect();
    ordered.sort_by(|a, b| a.area_id.cmp(&b.area_id));

    let cell_of = |x: f64, y: f64| -> Cell { ((x / snap).floor() as i64, (y / snap).floor() as i64) };

    let mut grid: HashMap<Cell, Vec<Vertex>> = HashMap::new();
    for (area, geom) in ordered.iter().enumerate() {
        for c in geom.geometry.coords_iter() {
            if !(c.x.is_finite() && c.y.is_finite()) {
                return Err(AppError::input(format!(
                    "Non-finite coordinate in geometry of area '{}'.",
                    geom.area_id
                )));
            }
            grid.entry(cell_of(c.x, c.y)).or_default().push(Vertex { area, x: c.x, y: c.y });
        }
    }

    // (a, b) with a < b -> distinct snapped points of `a` touching `b`.
    let mut shared: BTreeMap<(usize, usize), BTreeSet<Cell>> = BTreeMap::new();
    let snap2 = snap * snap;

    for (&(cx, cy), vertices) in &grid {
        for v in vertices {
            for dx in -1..=1 {
                for dy in -1..=1 {
                    let Some(others) = grid.get(&(cx + dx, cy + dy)) else {
                        continue;
                    };
                    for o in others {
                        if o.area <= v.area {
                            continue;
                        }
                        let ddx = o.x - v.x;
                        let ddy = o.y - v.y;
                        if ddx * ddx + ddy * ddy <= snap2 {
                            shared
                                .entry((v.area, o.area))
                                .or_default()
                                .insert(cell_of(v.x, v.y));
                        }
                    }
                }
            }
        }
    }

    let min_shared = contiguity.min_shared_points();
    let mut neighbors = vec![Vec::new(); ordered.len()];
    for ((a, b), points) in shared {
        if points.len() >= min_shared {
            neighbors[a].push(b);
        }
    }

    let area_ids = ordered.iter().map(|g| g.area_id.clone()).collect();
    let graph = AdjacencyGraph::new(area_ids, neighbors)?;

    log::info!(
        "Built {:?} contiguity graph: {} areas, {} links, {} isolated",
        contiguity,
        graph.len(),
        graph.n_links(),
        graph.isolated().len()
    );

    Ok(graph)
}

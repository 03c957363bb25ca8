//! Undirected adjacency graph over areas.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Neighbour relation between areas.
///
/// Node `i` is `area_ids[i]`; `neighbors[i]` is sorted, contains no `i` and
/// is mirrored in every neighbour's own list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjacencyGraph {
    area_ids: Vec<String>,
    neighbors: Vec<Vec<usize>>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl AdjacencyGraph {
    /// Build a graph from explicit neighbour lists, symmetrising them.
    pub fn new(area_ids: Vec<String>, neighbors: Vec<Vec<usize>>) -> Result<Self, AppError> {
        let n = area_ids.len();
        if neighbors.len() != n {
            return Err(AppError::data(format!(
                "Neighbour list has {} entries for {n} areas.",
                neighbors.len()
            )));
        }

        let mut sets: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
        for (i, list) in neighbors.iter().enumerate() {
            for &j in list {
                if j >= n {
                    return Err(AppError::data(format!(
                        "Neighbour index {j} out of range for area '{}'.",
                        area_ids[i]
                    )));
                }
                if j != i {
                    sets[i].insert(j);
                    sets[j].insert(i);
                }
            }
        }

        let mut index = HashMap::with_capacity(n);
        for (i, id) in area_ids.iter().enumerate() {
            if index.insert(id.clone(), i).is_some() {
                return Err(AppError::data(format!("Duplicate area id '{id}' in graph.")));
            }
        }

        Ok(Self {
            area_ids,
            neighbors: sets.into_iter().map(|s| s.into_iter().collect()).collect(),
            index,
        })
    }

    /// Every area adjacent to every other one.
    pub fn complete(area_ids: Vec<String>) -> Result<Self, AppError> {
        let n = area_ids.len();
        let neighbors = (0..n).map(|i| (0..n).filter(|&j| j != i).collect()).collect();
        Self::new(area_ids, neighbors)
    }

    /// Rebuild the lookup index after deserialisation.
    pub fn reindexed(self) -> Result<Self, AppError> {
        Self::new(self.area_ids, self.neighbors)
    }

    pub fn len(&self) -> usize {
        self.area_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.area_ids.is_empty()
    }

    pub fn area_ids(&self) -> &[String] {
        &self.area_ids
    }

    pub fn neighbors(&self, i: usize) -> &[usize] {
        &self.neighbors[i]
    }

    pub fn degree(&self, i: usize) -> usize {
        self.neighbors[i].len()
    }

    pub fn index_of(&self, area_id: &str) -> Option<usize> {
        self.index.get(area_id).copied()
    }

    /// Number of undirected links.
    pub fn n_links(&self) -> usize {
        self.neighbors.iter().map(Vec::len).sum::<usize>() / 2
    }

    /// Areas without any neighbour.
    pub fn isolated(&self) -> Vec<usize> {
        (0..self.len()).filter(|&i| self.neighbors[i].is_empty()).collect()
    }

    /// Connected components, each sorted, ordered by smallest member.
    pub fn components(&self) -> Vec<Vec<usize>> {
        let n = self.len();
        let mut seen = vec![false; n];
        let mut out = Vec::new();
        for start in 0..n {
            if seen[start] {
                continue;
            }
            seen[start] = true;
            let mut stack = vec![start];
            let mut comp = Vec::new();
            while let Some(i) = stack.pop() {
                comp.push(i);
                for &j in &self.neighbors[i] {
                    if !seen[j] {
                        seen[j] = true;
                        stack.push(j);
                    }
                }
            }
            comp.sort_unstable();
            out.push(comp);
        }
        out
    }

    /// Row-standardised ("W" style) weights: `w_ij = 1 / degree(i)`.
    ///
    /// Isolated areas get an empty row.
    pub fn row_standardized_weights(&self) -> Vec<Vec<(usize, f64)>> {
        self.neighbors
            .iter()
            .map(|list| {
                if list.is_empty() {
                    return Vec::new();
                }
                let w = 1.0 / list.len() as f64;
                list.iter().map(|&j| (j, w)).collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("A{i}")).collect()
    }

    #[test]
    fn new_symmetrises_and_drops_self_loops() {
        let g = AdjacencyGraph::new(ids(3), vec![vec![1, 0], vec![], vec![1]]).unwrap();
        assert_eq!(g.neighbors(0), &[1]);
        assert_eq!(g.neighbors(1), &[0, 2]);
        assert_eq!(g.neighbors(2), &[1]);
        assert_eq!(g.n_links(), 2);
    }

    #[test]
    fn components_and_isolates() {
        let g = AdjacencyGraph::new(ids(4), vec![vec![1], vec![], vec![], vec![]]).unwrap();
        assert_eq!(g.components(), vec![vec![0, 1], vec![2], vec![3]]);
        assert_eq!(g.isolated(), vec![2, 3]);
    }

    #[test]
    fn complete_graph_weights_sum_to_one() {
        let g = AdjacencyGraph::complete(ids(4)).unwrap();
        for row in g.row_standardized_weights() {
            let total: f64 = row.iter().map(|(_, w)| w).sum();
            assert!((total - 1.0).abs() < 1e-12);
        }
        assert_eq!(g.n_links(), 6);
    }

    #[test]
    fn out_of_range_neighbor_is_rejected() {
        let err = AdjacencyGraph::new(ids(2), vec![vec![5], vec![]]).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}

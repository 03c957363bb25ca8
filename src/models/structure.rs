//! Latent random-effect blocks and their structure matrices.
//!
//! Each block contributes `τ_b R_b` to the prior precision, where `R_b` may be
//! rank deficient (intrinsic). The null space of an intrinsic block is pinned
//! by sum-to-zero constraints over index sets, applied softly by the engine.
//!
//! Interaction blocks use the index `area * n_years + time`, so Kronecker
//! products are written `R_area ⊗ R_time`.

use nalgebra::DMatrix;

use crate::error::AppError;
use crate::models::{InteractionType, ModelSpec};
use crate::spatial::AdjacencyGraph;

/// How an observation selects the element of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockIndex {
    Area,
    Time,
    AreaTime,
}

#[derive(Debug, Clone)]
pub struct EffectBlock {
    /// Hyperparameter label, e.g. "area (ICAR)".
    pub name: String,
    pub index: BlockIndex,
    pub structure: DMatrix<f64>,
    pub rank: usize,
    /// Index sets whose elements must sum to zero.
    pub constraints: Vec<Vec<usize>>,
}

impl EffectBlock {
    pub fn size(&self) -> usize {
        self.structure.nrows()
    }
}

/// Intrinsic CAR structure: degree on the diagonal, -1 per link.
pub fn icar_structure(graph: &AdjacencyGraph) -> DMatrix<f64> {
    let n = graph.len();
    let mut r = DMatrix::zeros(n, n);
    for i in 0..n {
        r[(i, i)] = graph.degree(i) as f64;
        for &j in graph.neighbors(i) {
            r[(i, j)] = -1.0;
        }
    }
    r
}

/// Second-order random walk structure `D'D` with `D` the second differences.
pub fn rw2_structure(n: usize) -> DMatrix<f64> {
    let mut r = DMatrix::zeros(n, n);
    if n < 3 {
        return r;
    }
    for k in 0..n - 2 {
        let idx = [k, k + 1, k + 2];
        let coef = [1.0, -2.0, 1.0];
        for a in 0..3 {
            for b in 0..3 {
                r[(idx[a], idx[b])] += coef[a] * coef[b];
            }
        }
    }
    r
}

/// Latent blocks of a model, in a fixed order:
/// area ICAR, area iid, [time RW2, time iid], [interaction].
pub fn latent_blocks(
    spec: &ModelSpec,
    graph: &AdjacencyGraph,
    n_years: usize,
) -> Result<Vec<EffectBlock>, AppError> {
    let n_areas = graph.len();
    if n_areas == 0 {
        return Err(AppError::data("The adjacency graph has no areas."));
    }
    if spec.needs_time_series() && n_years < 3 {
        return Err(AppError::data(format!(
            "Model '{}' has a second-order random walk and needs at least 3 years ({n_years} given).",
            spec.id
        )));
    }

    let components = graph.components();
    let icar = icar_structure(graph);
    let icar_rank = n_areas - components.len();

    let mut blocks = vec![
        EffectBlock {
            name: "area (ICAR)".to_string(),
            index: BlockIndex::Area,
            structure: icar.clone(),
            rank: icar_rank,
            constraints: components.clone(),
        },
        EffectBlock {
            name: "area (iid)".to_string(),
            index: BlockIndex::Area,
            structure: DMatrix::identity(n_areas, n_areas),
            rank: n_areas,
            constraints: Vec::new(),
        },
    ];

    if spec.temporal {
        blocks.push(EffectBlock {
            name: "year (RW2)".to_string(),
            index: BlockIndex::Time,
            structure: rw2_structure(n_years),
            rank: n_years - 2,
            constraints: vec![(0..n_years).collect()],
        });
        blocks.push(EffectBlock {
            name: "year (iid)".to_string(),
            index: BlockIndex::Time,
            structure: DMatrix::identity(n_years, n_years),
            rank: n_years,
            constraints: Vec::new(),
        });
    }

    if let Some(kind) = spec.interaction {
        let n = n_areas * n_years;
        let block = match kind {
            InteractionType::TypeI => EffectBlock {
                name: "area x year (iid)".to_string(),
                index: BlockIndex::AreaTime,
                structure: DMatrix::identity(n, n),
                rank: n,
                constraints: Vec::new(),
            },
            InteractionType::TypeII => EffectBlock {
                name: "area x year (type II)".to_string(),
                index: BlockIndex::AreaTime,
                structure: DMatrix::<f64>::identity(n_areas, n_areas).kronecker(&rw2_structure(n_years)),
                rank: n_areas * (n_years - 2),
                constraints: (0..n_areas)
                    .map(|a| (0..n_years).map(|t| a * n_years + t).collect())
                    .collect(),
            },
            InteractionType::TypeIII => EffectBlock {
                name: "area x year (type III)".to_string(),
                index: BlockIndex::AreaTime,
                structure: icar.kronecker(&DMatrix::<f64>::identity(n_years, n_years)),
                rank: icar_rank * n_years,
                constraints: per_year_components(&components, n_years),
            },
        };
        blocks.push(block);
    }

    Ok(blocks)
}

/// One constraint per (year, connected component).
fn per_year_components(components: &[Vec<usize>], n_years: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::with_capacity(components.len() * n_years);
    for t in 0..n_years {
        for comp in components {
            out.push(comp.iter().map(|&a| a * n_years + t).collect());
        }
    }
    out
}

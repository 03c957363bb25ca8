//! Bayesian hierarchical Poisson models.
//!
//! Responsibilities:
//!
//! - declare the ten model variants (`ModelSpec`)
//! - build latent structure blocks (ICAR, RW2, iid, Kronecker interactions)
//! - define the inference seam (`InferenceEngine`) and its built-in
//!   Laplace implementation
//! - hold fitted outputs (`FitResult`) and the linear-predictor posterior

pub mod engine;
pub mod hyper_grid;
pub mod laplace;
pub mod posterior;
pub mod spec;
pub mod structure;

pub use engine::*;
pub use laplace::*;
pub use posterior::*;
pub use spec::*;
pub use structure::*;

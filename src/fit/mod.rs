//! Model comparison orchestration.
//!
//! Responsibilities:
//!
//! - fit the requested models in order (`fit_suite`)
//! - leave-one-out and grouped cross-validation scores
//! - assemble the comparison table (no ranking)
//! - re-fit one model under alternative priors

pub mod comparison;
pub mod cv;
pub mod sensitivity;

pub use comparison::*;
pub use cv::*;
pub use sensitivity::*;

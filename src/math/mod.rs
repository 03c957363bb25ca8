//! Mathematical utilities: special functions, quadrature and dense SPD solves.

pub mod linalg;
pub mod quadrature;
pub mod special;

pub use linalg::*;
pub use quadrature::*;
pub use special::*;

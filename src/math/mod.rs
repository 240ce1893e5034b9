//! Numerical utilities: damped linear solves, the bounded minimizer, and
//! fit-quality statistics.

pub mod lm;
pub mod solve;
pub mod stats;

pub use lm::*;
pub use solve::*;
pub use stats::*;

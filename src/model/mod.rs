//! Field-model evaluation.
//!
//! - pure basis helpers (`harmonics`)
//! - the per-version policy table (`version`)
//! - the concrete evaluator over a parameter registry (`eval`)

pub mod eval;
pub mod harmonics;
pub mod version;

pub use eval::*;
pub use harmonics::*;
pub use version::*;

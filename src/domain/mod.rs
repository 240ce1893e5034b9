//! Domain types used throughout the fit pipeline.
//!
//! This module defines:
//!
//! - configuration enums (`ModelVersion`, `SolverMethod`, `LossKind`)
//! - the measurement table (`Sample`, `ScanTable`)
//! - the session configuration bundle (`FitSessionConfig`, `StoreConfig`)

pub mod types;

pub use types::*;

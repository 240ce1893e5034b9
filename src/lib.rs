//! `bfield-fit` library crate.
//!
//! The binary (`bfit`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - modules are reusable (notebooks, downstream analysis tools)
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod model;
pub mod params;
pub mod report;

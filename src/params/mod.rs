//! Coefficient identity and the ordered parameter registry.

pub mod key;
pub mod registry;

pub use key::*;
pub use registry::*;

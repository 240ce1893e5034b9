//! File input/output: scan ingest, registry persistence, table export.

pub mod export;
pub mod ingest;
pub mod store;

pub use export::*;
pub use ingest::*;
pub use store::*;

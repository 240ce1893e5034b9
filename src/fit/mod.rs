//! The fit core: parameter-space construction, round execution, iterative
//! refinement, and post-fit analysis.

pub mod analyze;
pub mod refine;
pub mod round;
pub mod space;

pub use analyze::*;
pub use refine::*;
pub use round::*;
pub use space::*;

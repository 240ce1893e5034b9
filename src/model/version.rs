//! Per-version policy table.
//!
//! Each model version maps to one `VersionSpec` selected once at session
//! start. Everything version-dependent in parameter-space construction lives
//! here; the builder and the evaluator consult the spec instead of branching
//! on the version id.

use std::f64::consts::PI;

use rand::prelude::*;
use rand::rngs::StdRng;

use crate::domain::ModelVersion;

/// Seeding policy for the per-`n` cylindrical phase coefficients (`n > 0`).
#[derive(Debug, Clone, Copy)]
pub enum PhaseSeed {
    /// All phases start at the same value.
    Fixed(f64),
    /// Phases drawn uniformly from `[0, pi)` with a fixed RNG seed, one draw
    /// per mode index.
    SeededUniform { seed: u64 },
}

impl PhaseSeed {
    /// Seed values for modes `0..count`. Index by `n`.
    pub fn values(&self, count: usize) -> Vec<f64> {
        match *self {
            PhaseSeed::Fixed(v) => vec![v; count],
            PhaseSeed::SeededUniform { seed } => {
                let mut rng = StdRng::seed_from_u64(seed);
                (0..count).map(|_| rng.gen_range(0.0..PI)).collect()
            }
        }
    }
}

/// How the flat cartesian terms are constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartPolicy {
    /// Seeded terms are always free; `k3` gets a zero lower bound.
    AlwaysFree,
    /// Each seed carries its own fixed/free flag and terms are bounded to
    /// `[-k_lim, +k_lim]` when a limit is configured.
    Fixable,
}

/// Policy bundle for one model version.
#[derive(Debug, Clone, Copy)]
pub struct VersionSpec {
    pub version: ModelVersion,
    /// The evaluator adds the calculated-reference field; it must be present.
    pub needs_calc_data: bool,
    /// Seed for cylindrical phases with `n > 0`.
    pub phase_seed: PhaseSeed,
    /// Fixed value of the axisymmetric (`n == 0`) phase.
    pub phase_n0: f64,
    /// Bound cylindrical amplitude pairs to `[-ab_lim, +ab_lim]`.
    pub amp_bounded: bool,
    pub cart_policy: CartPolicy,
    /// The version carries a global axial offset `z0`.
    pub has_axis_offset: bool,
}

impl VersionSpec {
    /// The policy bundle for a version. Total over the supported set; version
    /// validation happens when the `ModelVersion` is parsed.
    pub fn lookup(version: ModelVersion) -> VersionSpec {
        match version {
            ModelVersion::V1000 => VersionSpec {
                version,
                needs_calc_data: true,
                phase_seed: PhaseSeed::Fixed(PI / 2.0),
                phase_n0: 0.0,
                amp_bounded: false,
                cart_policy: CartPolicy::AlwaysFree,
                has_axis_offset: false,
            },
            ModelVersion::V1004 => VersionSpec {
                version,
                needs_calc_data: false,
                phase_seed: PhaseSeed::SeededUniform { seed: 0 },
                phase_n0: 0.0,
                amp_bounded: false,
                cart_policy: CartPolicy::AlwaysFree,
                has_axis_offset: false,
            },
            ModelVersion::V1005 => VersionSpec {
                version,
                needs_calc_data: true,
                phase_seed: PhaseSeed::Fixed(PI / 4.0),
                phase_n0: PI / 2.0,
                amp_bounded: false,
                cart_policy: CartPolicy::AlwaysFree,
                has_axis_offset: false,
            },
            ModelVersion::V1006 => VersionSpec {
                version,
                needs_calc_data: true,
                phase_seed: PhaseSeed::Fixed(PI / 4.0),
                phase_n0: PI / 2.0,
                amp_bounded: true,
                cart_policy: CartPolicy::Fixable,
                has_axis_offset: true,
            },
        }
    }
}

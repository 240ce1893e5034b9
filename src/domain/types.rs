//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting
//! - exported to JSON/CSV
//! - reloaded later for recreation runs or comparisons

use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Supported field-model versions.
///
/// Each version selects a policy bundle (reference-data requirement, phase
/// seeding, cartesian-term handling, axis offset) via `model::version`.
/// Versions 1001-1003 of the historical taxonomy are not carried and are
/// rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum ModelVersion {
    #[serde(rename = "1000")]
    #[value(name = "1000")]
    V1000,
    #[serde(rename = "1004")]
    #[value(name = "1004")]
    V1004,
    #[serde(rename = "1005")]
    #[value(name = "1005")]
    V1005,
    #[serde(rename = "1006")]
    #[value(name = "1006")]
    V1006,
}

impl ModelVersion {
    /// Parse a numeric version identifier.
    ///
    /// Unknown identifiers are configuration errors and must fail before any
    /// registry mutation.
    pub fn from_id(id: u32) -> Result<Self, AppError> {
        match id {
            1000 => Ok(ModelVersion::V1000),
            1004 => Ok(ModelVersion::V1004),
            1005 => Ok(ModelVersion::V1005),
            1006 => Ok(ModelVersion::V1006),
            other => Err(AppError::new(2, format!("Unsupported model version {other}."))),
        }
    }

    pub fn id(self) -> u32 {
        match self {
            ModelVersion::V1000 => 1000,
            ModelVersion::V1004 => 1004,
            ModelVersion::V1005 => 1005,
            ModelVersion::V1006 => 1006,
        }
    }
}

/// Solver algorithm selection.
///
/// `Leastsq` (Levenberg-Marquardt) and `Brute` (bounded coordinate scan) run
/// with default tolerances; `LeastSquares` is the trust-region-flavored
/// variant that accepts explicit tolerances, a robust loss, and verbose
/// iteration reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum SolverMethod {
    #[serde(rename = "leastsq")]
    #[value(name = "leastsq")]
    Leastsq,
    #[serde(rename = "least_squares")]
    #[value(name = "least_squares")]
    LeastSquares,
    #[serde(rename = "brute")]
    #[value(name = "brute")]
    Brute,
}

impl SolverMethod {
    /// Parse a method name from a config file.
    pub fn parse(name: &str) -> Result<Self, AppError> {
        match name {
            "leastsq" => Ok(SolverMethod::Leastsq),
            "least_squares" => Ok(SolverMethod::LeastSquares),
            "brute" => Ok(SolverMethod::Brute),
            other => Err(AppError::new(
                2,
                format!("Unsupported solver method '{other}'. Supported: leastsq, least_squares, brute."),
            )),
        }
    }
}

/// Robust loss applied to weighted residuals (least_squares method only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    /// Plain squared residuals.
    Linear,
    /// Huber M-estimator via iterative reweighting.
    Huber,
    /// Smooth L1 approximation via iterative reweighting.
    SoftL1,
}

/// One measured field sample: position in both coordinate systems plus the
/// observed cylindrical field components. Immutable once loaded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Sample {
    pub z: f64,
    pub r: f64,
    pub phi: f64,
    pub x: f64,
    pub y: f64,
    pub br: f64,
    pub bz: f64,
    pub bphi: f64,
}

/// Derived per-sample columns in the fixed component order (radial, axial,
/// azimuthal).
#[derive(Debug, Clone, Default)]
pub struct FieldColumns {
    pub br: Vec<f64>,
    pub bz: Vec<f64>,
    pub bphi: Vec<f64>,
}

/// The measurement table: read-only samples plus appended derived columns.
#[derive(Debug, Clone)]
pub struct ScanTable {
    pub samples: Vec<Sample>,
    /// `*_fit` columns, filled by the post-fit analyzer.
    pub fit: Option<FieldColumns>,
    /// `*_unc` columns (per-sample prediction uncertainty), optional.
    pub unc: Option<FieldColumns>,
    /// Cartesian-derived `Bx_fit`/`By_fit`, present for cartesian-native scans.
    pub cart_fit: Option<(Vec<f64>, Vec<f64>)>,
}

impl ScanTable {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self {
            samples,
            fit: None,
            unc: None,
            cart_fit: None,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Observed components concatenated as Br|Bz|Bphi (the residual target).
    pub fn observed_vector(&self) -> Vec<f64> {
        let n = self.samples.len();
        let mut out = Vec::with_capacity(3 * n);
        out.extend(self.samples.iter().map(|s| s.br));
        out.extend(self.samples.iter().map(|s| s.bz));
        out.extend(self.samples.iter().map(|s| s.bphi));
        out
    }
}

/// Optional calculated-reference field, added componentwise to the model
/// prediction for versions that require it.
#[derive(Debug, Clone)]
pub struct CalcData {
    pub br: Vec<f64>,
    pub bz: Vec<f64>,
    pub bphi: Vec<f64>,
}

/// Seed for one flat cartesian term `k1..k10`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CartSeed {
    /// 1-based index into `k1..k10`.
    pub index: u8,
    pub value: f64,
    /// Explicit fixed/free flag, honored only by versions with the per-term
    /// fixable cartesian policy. Earlier versions treat seeded terms as free.
    #[serde(default)]
    pub vary: Option<bool>,
}

/// Seed for one discrete external point-dipole source.
///
/// With `moment` supplied all six coefficients are fixed; position-only seeds
/// make all six vary with bounds derived from `SourceBounds`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SourceSeed {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub moment: Option<[f64; 3]>,
}

/// Per-axis-family tolerances for source coefficient bounds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SourceBounds {
    /// Position tolerance for the x/y axes.
    pub horizontal: f64,
    /// Position tolerance for the z axis.
    pub axial: f64,
    /// Absolute symmetric bound for moment components.
    pub moment: f64,
}

impl Default for SourceBounds {
    fn default() -> Self {
        Self {
            horizontal: 0.1,
            axial: 0.1,
            moment: 5.0,
        }
    }
}

/// The full configuration bundle for one fit session.
#[derive(Debug, Clone)]
pub struct FitSessionConfig {
    pub version: ModelVersion,

    // Layer-1 shape parameters: coil geometry and term counts.
    pub pitch1: f64,
    pub ms_h1: usize,
    pub ns_h1: usize,
    pub pitch2: f64,
    pub ms_h2: usize,
    pub ns_h2: usize,
    pub length1: f64,
    pub ms_c1: usize,
    pub ns_c1: usize,
    pub length2: f64,
    pub ms_c2: usize,
    pub ns_c2: usize,

    /// Maximum angular order for non-axisymmetric cylindrical terms; negative
    /// means unlimited.
    pub ms_asym_max: i64,

    /// Symmetric bound applied to cylindrical amplitude pairs by versions
    /// that support it.
    pub ab_lim: Option<f64>,
    /// Symmetric bound applied to cartesian terms by the fixable policy.
    pub k_lim: Option<f64>,
    /// Cartesian term seeds; terms without a seed are added fixed at zero.
    pub ks: Vec<CartSeed>,
    /// External point-source seeds.
    pub sources: Vec<SourceSeed>,
    pub source_bounds: SourceBounds,
    /// Axis offset for versions carrying `z0`.
    pub z0: Option<f64>,

    /// Uniform noise scale; when set every residual element gets weight
    /// `1/noise`.
    pub noise: Option<f64>,
    pub method: SolverMethod,
    pub loss: LossKind,
    pub ftol: f64,
    pub gtol: f64,
    /// The scan is cartesian-native; derive `Bx_fit`/`By_fit` after the fit.
    pub cartesian: bool,
    /// Attach per-sample prediction uncertainty after the fit.
    pub save_unc: bool,
    /// Run exactly one fit round instead of the refinement loop.
    pub single_shot: bool,
}

/// Persistence flags for one session.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Load a previously saved registry as the starting point.
    pub use_existing: bool,
    /// Re-evaluate a saved registry without fitting.
    pub recreate: bool,
    /// Save the final registry (and correlation artifact) on success.
    pub save: bool,
    pub load_name: String,
    pub save_name: String,
    pub dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_version_is_a_config_error() {
        let err = ModelVersion::from_id(1003).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(ModelVersion::from_id(1006).is_ok());
    }

    #[test]
    fn solver_method_parse_rejects_unknown_names() {
        assert_eq!(SolverMethod::parse("leastsq").unwrap(), SolverMethod::Leastsq);
        let err = SolverMethod::parse("nelder").unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn observed_vector_is_concatenated_in_component_order() {
        let samples = vec![
            Sample { z: 0.0, r: 0.0, phi: 0.0, x: 0.0, y: 0.0, br: 1.0, bz: 2.0, bphi: 3.0 },
            Sample { z: 1.0, r: 0.0, phi: 0.0, x: 0.0, y: 0.0, br: 4.0, bz: 5.0, bphi: 6.0 },
        ];
        let table = ScanTable::new(samples);
        assert_eq!(table.observed_vector(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }
}

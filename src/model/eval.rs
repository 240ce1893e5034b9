//! Concrete field-model evaluator.
//!
//! The fit core only needs one capability from the model: given a registry of
//! coefficients, produce the predicted field components for every sample,
//! concatenated as Br|Bz|Bphi. `SolenoidHarmonics` implements that capability
//! for the cylindrical-harmonic surrogate: two nested helical windings, two
//! cylindrical expansions, flat cartesian terms, discrete point-dipole
//! sources, an optional axis offset, and an optional additive
//! calculated-reference field.

use std::collections::BTreeMap;

use crate::domain::{CalcData, ScanTable};
use crate::error::AppError;
use crate::model::harmonics::{
    dipole_field, effective_wavenumber, helical_wavenumber, radial_profile, radial_profile_deriv,
};
use crate::model::version::VersionSpec;
use crate::params::{AmpTerm, HelTerm, ParamKey, Registry, ShapeKind, SourceAxis};

/// Model-evaluation capability: coefficients in, concatenated predictions out.
pub trait FieldModel: Sync {
    /// Predicted components for every sample, concatenated Br|Bz|Bphi
    /// (length three times the sample count).
    fn predict(&self, registry: &Registry) -> Result<Vec<f64>, AppError>;
}

/// The cylindrical-harmonic surrogate evaluator.
///
/// Positions are flattened once at construction; the registry is re-read on
/// every call so the solver can evaluate trial coefficient vectors through a
/// scratch registry.
#[derive(Debug)]
pub struct SolenoidHarmonics {
    spec: VersionSpec,
    zz: Vec<f64>,
    rr: Vec<f64>,
    pp: Vec<f64>,
    xx: Vec<f64>,
    yy: Vec<f64>,
    calc: Option<CalcData>,
}

impl SolenoidHarmonics {
    /// Build the evaluator for a scan.
    ///
    /// Versions whose policy requires the calculated-reference field fail
    /// here, before any registry mutation, when it is absent or misshapen.
    pub fn new(spec: VersionSpec, table: &ScanTable, calc: Option<CalcData>) -> Result<Self, AppError> {
        if spec.needs_calc_data {
            let Some(ref c) = calc else {
                return Err(AppError::new(
                    2,
                    format!(
                        "Model version {} requires a calculated-reference dataset, but none was supplied.",
                        spec.version.id()
                    ),
                ));
            };
            let n = table.len();
            if c.br.len() != n || c.bz.len() != n || c.bphi.len() != n {
                return Err(AppError::new(
                    2,
                    "Calculated-reference dataset length does not match the scan.",
                ));
            }
        }

        Ok(Self {
            spec,
            zz: table.samples.iter().map(|s| s.z).collect(),
            rr: table.samples.iter().map(|s| s.r).collect(),
            pp: table.samples.iter().map(|s| s.phi).collect(),
            xx: table.samples.iter().map(|s| s.x).collect(),
            yy: table.samples.iter().map(|s| s.y).collect(),
            calc,
        })
    }
}

/// Coefficient values gathered out of the registry into flat lists, so the
/// per-sample loop never touches the key index.
struct TermView {
    pitch: [f64; 2],
    length: [f64; 2],
    hel: Vec<(usize, HelTerm, u16, u16, f64)>,
    cyl: Vec<(usize, AmpTerm, u16, u16, f64)>,
    /// Phase per (coil, n).
    phases: BTreeMap<(u8, u16), f64>,
    ks: [f64; 10],
    /// Six-tuples (x, y, z, vx, vy, vz) per source, in source-index order.
    sources: Vec<[f64; 6]>,
    z0: f64,
}

impl TermView {
    fn gather(registry: &Registry) -> Result<Self, AppError> {
        let pitch = [
            registry.shape_value(ShapeKind::Pitch(1))?,
            registry.shape_value(ShapeKind::Pitch(2))?,
        ];
        let length = [
            registry.shape_value(ShapeKind::Length(1))?,
            registry.shape_value(ShapeKind::Length(2))?,
        ];

        let mut hel = Vec::new();
        let mut cyl = Vec::new();
        let mut phases = BTreeMap::new();
        let mut ks = [0.0; 10];
        let mut sources: BTreeMap<u8, [f64; 6]> = BTreeMap::new();
        let mut z0 = 0.0;

        for (key, rec) in registry.iter() {
            match *key {
                ParamKey::Hel { coil, term, m, n } => {
                    hel.push((coil as usize - 1, term, m, n, rec.value));
                }
                ParamKey::CylAmp { coil, term, m, n } => {
                    cyl.push((coil as usize - 1, term, m, n, rec.value));
                }
                ParamKey::CylPhase { coil, n } => {
                    phases.insert((coil, n), rec.value);
                }
                ParamKey::Cart { index } => {
                    ks[index as usize - 1] = rec.value;
                }
                ParamKey::Source { source, axis } => {
                    let slot = sources.entry(source).or_insert([0.0; 6]);
                    slot[source_slot(axis)] = rec.value;
                }
                ParamKey::AxisOffset => z0 = rec.value,
                ParamKey::Shape(_) => {}
            }
        }

        Ok(Self {
            pitch,
            length,
            hel,
            cyl,
            phases,
            ks,
            sources: sources.into_values().collect(),
            z0,
        })
    }
}

fn source_slot(axis: SourceAxis) -> usize {
    match axis {
        SourceAxis::X => 0,
        SourceAxis::Y => 1,
        SourceAxis::Z => 2,
        SourceAxis::MomentX => 3,
        SourceAxis::MomentY => 4,
        SourceAxis::MomentZ => 5,
    }
}

impl FieldModel for SolenoidHarmonics {
    fn predict(&self, registry: &Registry) -> Result<Vec<f64>, AppError> {
        let view = TermView::gather(registry)?;
        let n = self.zz.len();

        let mut br = vec![0.0; n];
        let mut bz = vec![0.0; n];
        let mut bphi = vec![0.0; n];

        for i in 0..n {
            let z = self.zz[i] - view.z0;
            let r = self.rr[i];
            let phi = self.pp[i];
            let x = self.xx[i];
            let y = self.yy[i];

            // Helical windings: the A/B pair is one handedness, C/D the
            // conjugate. Which pair is free per coil is the builder's job.
            for &(coil, term, m, n_idx, v) in &view.hel {
                if v == 0.0 {
                    continue;
                }
                let k = helical_wavenumber(n_idx, view.pitch[coil]);
                let rho = radial_profile(m, k * r);
                let rho_d = radial_profile_deriv(m, k * r);
                let mf = m as f64;
                let (theta, sign) = match term {
                    HelTerm::A | HelTerm::B => (mf * phi - k * z, 1.0),
                    HelTerm::C | HelTerm::D => (mf * phi + k * z, -1.0),
                };
                match term {
                    HelTerm::A | HelTerm::C => {
                        br[i] += v * rho_d * theta.cos();
                        bz[i] += sign * v * rho * theta.sin();
                        bphi[i] -= v * rho * theta.sin();
                    }
                    HelTerm::B | HelTerm::D => {
                        br[i] += v * rho_d * theta.sin();
                        bz[i] -= sign * v * rho * theta.cos();
                        bphi[i] += v * rho * theta.cos();
                    }
                }
            }

            // Cylindrical expansions: amplitude pair per (m, n), shared phi
            // phase per n.
            for &(coil, term, m, n_idx, v) in &view.cyl {
                if v == 0.0 {
                    continue;
                }
                let length = view.length[coil];
                let kz = crate::model::harmonics::axial_wavenumber(n_idx, length) * z;
                let kr = effective_wavenumber(n_idx, length) * r;
                let rho = radial_profile(m, kr);
                let rho_d = radial_profile_deriv(m, kr);
                let d = view
                    .phases
                    .get(&(coil as u8 + 1, n_idx))
                    .copied()
                    .unwrap_or(0.0);
                let ang = (m as f64 * phi - d).cos();
                let ang_s = (m as f64 * phi - d).sin();
                match term {
                    AmpTerm::A => {
                        bz[i] += v * rho * kz.cos() * ang;
                        br[i] += v * rho_d * kz.sin() * ang;
                        bphi[i] += v * rho * kz.sin() * ang_s;
                    }
                    AmpTerm::B => {
                        bz[i] += v * rho * kz.sin() * ang;
                        br[i] += v * rho_d * kz.cos() * ang;
                        bphi[i] += v * rho * kz.cos() * ang_s;
                    }
                }
            }

            // Flat cartesian terms: uniform offsets (k1..k3) plus first-order
            // gradients (k4..k10), rotated into cylindrical components.
            let (cphi, sphi) = (phi.cos(), phi.sin());
            let bx_cart = view.ks[0] + view.ks[3] * x + view.ks[6] * z;
            let by_cart = view.ks[1] + view.ks[4] * y + view.ks[7] * z;
            let bz_cart = view.ks[2] + view.ks[5] * z + view.ks[8] * x + view.ks[9] * y;
            br[i] += bx_cart * cphi + by_cart * sphi;
            bphi[i] += -bx_cart * sphi + by_cart * cphi;
            bz[i] += bz_cart;

            // External point-dipole sources.
            for s in &view.sources {
                let b = dipole_field([x - s[0], y - s[1], z - s[2]], [s[3], s[4], s[5]]);
                br[i] += b[0] * cphi + b[1] * sphi;
                bphi[i] += -b[0] * sphi + b[1] * cphi;
                bz[i] += b[2];
            }

            if let Some(ref c) = self.calc {
                br[i] += c.br[i];
                bz[i] += c.bz[i];
                bphi[i] += c.bphi[i];
            }
        }

        let mut out = br;
        out.extend(bz);
        out.extend(bphi);
        Ok(out)
    }
}

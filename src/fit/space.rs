//! Parameter-space construction.
//!
//! `build_space` populates the registry in layers, in a fixed order: shape
//! hyper-parameters, helical families for both coils, cylindrical expansions
//! (amplitudes plus per-mode phases), flat cartesian terms, external
//! point-dipole sources, and the axial offset for versions that carry one.
//! Each layer is add-if-missing: rebuilding over an existing registry (a
//! reloaded fit, or a later refinement round) never resurrects a coefficient
//! that was frozen, so pruning decisions survive the rebuild.

use crate::domain::{CartSeed, FitSessionConfig, SourceSeed};
use crate::error::AppError;
use crate::model::version::{CartPolicy, VersionSpec};
use crate::params::{AmpTerm, HelTerm, ParamKey, ParamRecord, Registry, ShapeKind, SourceAxis};

/// Magnitude of the small symmetric seed for free helical terms. Zero seeds
/// would start the solver on a stationary point of the winding families.
pub const HEL_SEED: f64 = 1e-6;

/// Populate the registry for one session.
///
/// `recreate` suppresses value refreshes on existing entries so a reloaded
/// registry is re-evaluated exactly as stored.
pub fn build_space(
    registry: &mut Registry,
    config: &FitSessionConfig,
    spec: &VersionSpec,
    recreate: bool,
) -> Result<(), AppError> {
    add_shape_defaults(registry, config);
    add_helical(registry, config);
    add_cylindrical(registry, config, spec)?;
    add_cartesian(registry, &config.ks, config.k_lim, spec.cart_policy);
    add_sources(registry, &config.sources, config, recreate);
    if spec.has_axis_offset {
        add_axis_offset(registry, config.z0.unwrap_or(0.0), recreate);
    }
    Ok(())
}

/// Layer 1: fixed shape hyper-parameters. Values always track the config.
fn add_shape_defaults(registry: &mut Registry, config: &FitSessionConfig) {
    let shapes = [
        (ShapeKind::Pitch(1), config.pitch1),
        (ShapeKind::HelOrders(1), config.ms_h1 as f64),
        (ShapeKind::HelModes(1), config.ns_h1 as f64),
        (ShapeKind::Pitch(2), config.pitch2),
        (ShapeKind::HelOrders(2), config.ms_h2 as f64),
        (ShapeKind::HelModes(2), config.ns_h2 as f64),
        (ShapeKind::Length(1), config.length1),
        (ShapeKind::CylOrders(1), config.ms_c1 as f64),
        (ShapeKind::CylModes(1), config.ns_c1 as f64),
        (ShapeKind::Length(2), config.length2),
        (ShapeKind::CylOrders(2), config.ms_c2 as f64),
        (ShapeKind::CylModes(2), config.ns_c2 as f64),
        (ShapeKind::AsymLimit, config.ms_asym_max as f64),
    ];
    for (kind, value) in shapes {
        let key = ParamKey::Shape(kind);
        if !registry.add(key, ParamRecord::fixed(value)) {
            if let Some(rec) = registry.get_mut(&key) {
                rec.value = value;
            }
        }
    }
}

/// Layer 2: helical winding families.
///
/// Coil 1 fits the conjugate pair (C, D) with the other pair pinned at zero;
/// coil 2 fits (A, B). The free seeds are small and antisymmetric on coil 2.
/// Coefficients already present are frozen, never re-freed.
fn add_helical(registry: &mut Registry, config: &FitSessionConfig) {
    let coils = [
        (1u8, config.ms_h1, config.ns_h1),
        (2u8, config.ms_h2, config.ns_h2),
    ];
    for (coil, ms, ns) in coils {
        for m in 0..ms as u16 {
            for n in 0..ns as u16 {
                for term in HelTerm::ALL {
                    let key = ParamKey::Hel { coil, term, m, n };
                    if registry.contains(&key) {
                        if let Some(rec) = registry.get_mut(&key) {
                            rec.vary = false;
                        }
                        continue;
                    }
                    let record = match (coil, term) {
                        (1, HelTerm::C) | (1, HelTerm::D) => ParamRecord::free(-HEL_SEED),
                        (2, HelTerm::A) => ParamRecord::free(-HEL_SEED),
                        (2, HelTerm::B) => ParamRecord::free(HEL_SEED),
                        _ => ParamRecord::fixed(0.0),
                    };
                    registry.add(key, record);
                }
            }
        }
    }
}

/// Layer 3: cylindrical expansions.
///
/// Amplitude pairs per `(m, n)`, optionally bounded; non-axisymmetric terms
/// above the asymmetry order limit are pinned. One phase per axial mode,
/// seeded by the version policy and bounded to `[0, pi]` when free; the
/// axisymmetric phase is fixed. Existing amplitudes may only be frozen
/// further by the limit, never re-freed; existing phases keep their values
/// and get a bounds refresh.
fn add_cylindrical(
    registry: &mut Registry,
    config: &FitSessionConfig,
    spec: &VersionSpec,
) -> Result<(), AppError> {
    let amp_bounds = if spec.amp_bounded {
        config.ab_lim.map(|l| (Some(-l), Some(l)))
    } else {
        None
    };

    let coils = [
        (1u8, config.ms_c1, config.ns_c1),
        (2u8, config.ms_c2, config.ns_c2),
    ];
    for (coil, ms, ns) in coils {
        for m in 0..ms as u16 {
            for n in 0..ns as u16 {
                let within_limit =
                    config.ms_asym_max < 0 || !(m as i64 > config.ms_asym_max && n > 0);
                for term in AmpTerm::ALL {
                    let key = ParamKey::CylAmp { coil, term, m, n };
                    if registry.contains(&key) {
                        if !within_limit {
                            if let Some(rec) = registry.get_mut(&key) {
                                rec.vary = false;
                            }
                        }
                        continue;
                    }
                    let mut record = if within_limit {
                        ParamRecord::free(0.0)
                    } else {
                        ParamRecord::fixed(0.0)
                    };
                    if let Some((lo, hi)) = amp_bounds {
                        record = record.with_bounds(lo, hi);
                    }
                    registry.add(key, record);
                }
            }
        }

        let phase_seeds = spec.phase_seed.values(ns);
        for n in 0..ns as u16 {
            let key = ParamKey::CylPhase { coil, n };
            let (record, bounds) = if n == 0 {
                (ParamRecord::fixed(spec.phase_n0), (None, None))
            } else {
                let bounds = (Some(0.0), Some(std::f64::consts::PI));
                (
                    ParamRecord::free(phase_seeds[n as usize]).with_bounds(bounds.0, bounds.1),
                    bounds,
                )
            };
            if !registry.add(key, record) {
                if let Some(rec) = registry.get_mut(&key) {
                    rec.min = bounds.0;
                    rec.max = bounds.1;
                }
            }
        }
    }
    Ok(())
}

/// Layer 4: flat cartesian terms `k1..k10`.
///
/// Unseeded terms are pinned at zero. Seeded terms are free under the
/// always-free policy (`k3` keeps a zero lower bound so the main axial offset
/// cannot flip sign); the fixable policy honors each seed's own flag and the
/// configured symmetric limit. Existing entries only get a bounds refresh.
fn add_cartesian(
    registry: &mut Registry,
    seeds: &[CartSeed],
    k_lim: Option<f64>,
    policy: CartPolicy,
) {
    for index in 1..=10u8 {
        let key = ParamKey::Cart { index };
        let seed = seeds.iter().find(|s| s.index == index);

        let bounds = match policy {
            CartPolicy::AlwaysFree => {
                // k3 keeps its zero floor whether or not this session seeds
                // it, so a bounds refresh over a loaded registry cannot let
                // the main axial term flip sign.
                if index == 3 {
                    (Some(0.0), None)
                } else {
                    (None, None)
                }
            }
            CartPolicy::Fixable => match k_lim {
                Some(l) if seed.is_some() => (Some(-l), Some(l)),
                _ => (None, None),
            },
        };

        if registry.contains(&key) {
            if let Some(rec) = registry.get_mut(&key) {
                rec.min = bounds.0;
                rec.max = bounds.1;
            }
            continue;
        }

        let record = match seed {
            None => ParamRecord::fixed(0.0),
            Some(s) => {
                let vary = match policy {
                    CartPolicy::AlwaysFree => true,
                    CartPolicy::Fixable => s.vary.unwrap_or(true),
                };
                ParamRecord {
                    value: s.value,
                    vary,
                    min: bounds.0,
                    max: bounds.1,
                    stderr: None,
                }
            }
        };
        registry.add(key, record);
    }
}

/// Layer 5: external point-dipole sources, six coefficients each.
///
/// A seed with an explicit moment pins all six coefficients. A position-only
/// seed frees all six: positions bounded to a tolerance window around the
/// seed, moments starting at zero inside the symmetric moment bound.
/// Existing coefficients are refreshed (value and bounds) on a normal run and
/// left untouched on a recreation run.
fn add_sources(
    registry: &mut Registry,
    seeds: &[SourceSeed],
    config: &FitSessionConfig,
    recreate: bool,
) {
    let tol = config.source_bounds;
    for (i, seed) in seeds.iter().enumerate() {
        let source = (i + 1) as u8;
        for axis in SourceAxis::ALL {
            let key = ParamKey::Source { source, axis };

            let record = match seed.moment {
                Some(moment) => {
                    let value = match axis {
                        SourceAxis::X => seed.x,
                        SourceAxis::Y => seed.y,
                        SourceAxis::Z => seed.z,
                        SourceAxis::MomentX => moment[0],
                        SourceAxis::MomentY => moment[1],
                        SourceAxis::MomentZ => moment[2],
                    };
                    ParamRecord::fixed(value)
                }
                None => {
                    let (value, lo, hi) = match axis {
                        SourceAxis::X => (seed.x, seed.x - tol.horizontal, seed.x + tol.horizontal),
                        SourceAxis::Y => (seed.y, seed.y - tol.horizontal, seed.y + tol.horizontal),
                        SourceAxis::Z => (seed.z, seed.z - tol.axial, seed.z + tol.axial),
                        SourceAxis::MomentX | SourceAxis::MomentY | SourceAxis::MomentZ => {
                            (0.0, -tol.moment, tol.moment)
                        }
                    };
                    ParamRecord::free(value).with_bounds(Some(lo), Some(hi))
                }
            };

            if !registry.add(key, record) && !recreate {
                if let Some(rec) = registry.get_mut(&key) {
                    rec.value = record.value;
                    rec.min = record.min;
                    rec.max = record.max;
                }
            }
        }
    }
}

/// Layer 6: the global axial offset. Held fixed at the configured survey
/// value; a recreation run keeps the stored value.
fn add_axis_offset(registry: &mut Registry, z0: f64, recreate: bool) {
    let key = ParamKey::AxisOffset;
    if !registry.add(key, ParamRecord::fixed(z0)) && !recreate {
        if let Some(rec) = registry.get_mut(&key) {
            rec.value = z0;
        }
    }
}

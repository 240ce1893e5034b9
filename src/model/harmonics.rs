//! Basis helpers for the cylindrical-harmonic field surrogate.
//!
//! The production field expansion uses modified Bessel factors `I_m(kr)` for
//! the radial dependence. We keep that qualitative shape with a truncated
//! series: exact limits at the axis (`1` for `m=0`, `~r^m` growth otherwise),
//! monotone in `r`, smooth everywhere.

use std::f64::consts::PI;

/// Guard against zero-length coil geometry in wavenumber computation.
const LENGTH_EPS: f64 = 1e-9;

/// Guard distance for the point-dipole kernel.
const DIPOLE_EPS: f64 = 1e-6;

/// Series terms kept in the radial profile. Six terms hold ~1e-9 relative
/// accuracy for the `kr` range of a typical scan volume.
const PROFILE_TERMS: usize = 6;

/// Radial profile standing in for `I_m(kr)`, via its power series truncated
/// at `PROFILE_TERMS` terms.
pub fn radial_profile(m: u16, kr: f64) -> f64 {
    let half = kr / 2.0;
    let m = m as usize;

    // First term: (kr/2)^m / m!
    let mut term = 1.0;
    for j in 1..=m {
        term *= half / j as f64;
    }

    let mut sum = term;
    for j in 1..=PROFILE_TERMS {
        term *= (half * half) / (j as f64 * (j + m) as f64);
        sum += term;
    }
    sum
}

/// Derivative-flavored radial factor. For true Bessel functions `I_m'`
/// involves `I_{m+1}`; the surrogate uses the next-order profile directly.
pub fn radial_profile_deriv(m: u16, kr: f64) -> f64 {
    radial_profile(m + 1, kr)
}

/// Axial wavenumber of harmonic mode `n` over a coil scale.
///
/// Mode 0 has no axial variation (`k = 0`); the radial argument uses
/// `effective_wavenumber` instead so the radial structure stays nonzero.
pub fn axial_wavenumber(n: u16, scale: f64) -> f64 {
    n as f64 * PI / scale.max(LENGTH_EPS)
}

/// Wavenumber used for the radial argument, shifted so mode 0 still carries
/// radial structure.
pub fn effective_wavenumber(n: u16, scale: f64) -> f64 {
    (n as f64 + 1.0) * PI / scale.max(LENGTH_EPS)
}

/// Helical wavenumber: one full turn per pitch length, mode `n` winding
/// `n + 1` times.
pub fn helical_wavenumber(n: u16, pitch: f64) -> f64 {
    (n as f64 + 1.0) * 2.0 * PI / pitch.max(LENGTH_EPS)
}

/// Unit-free point-dipole field at displacement `d` from the source, for
/// moment `mom`: `(3 (m.rhat) rhat - m) / |d|^3`, with a distance guard so a
/// sample sitting on the seed position cannot blow up the fit.
pub fn dipole_field(d: [f64; 3], mom: [f64; 3]) -> [f64; 3] {
    let r2 = d[0] * d[0] + d[1] * d[1] + d[2] * d[2];
    let r = r2.sqrt().max(DIPOLE_EPS);
    let inv_r3 = 1.0 / (r * r * r);
    let rhat = [d[0] / r, d[1] / r, d[2] / r];
    let mdotr = mom[0] * rhat[0] + mom[1] * rhat[1] + mom[2] * rhat[2];
    [
        (3.0 * mdotr * rhat[0] - mom[0]) * inv_r3,
        (3.0 * mdotr * rhat[1] - mom[1]) * inv_r3,
        (3.0 * mdotr * rhat[2] - mom[2]) * inv_r3,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radial_profile_axis_limits() {
        // m=0 profile is 1 on the axis, higher orders vanish there.
        assert!((radial_profile(0, 0.0) - 1.0).abs() < 1e-15);
        assert!(radial_profile(1, 0.0).abs() < 1e-15);
        assert!(radial_profile(3, 0.0).abs() < 1e-15);
    }

    #[test]
    fn radial_profile_monotone_in_r() {
        for m in 0..4u16 {
            let mut prev = radial_profile(m, 0.0);
            for i in 1..20 {
                let v = radial_profile(m, i as f64 * 0.1);
                assert!(v >= prev, "profile must grow with kr (m={m})");
                prev = v;
            }
        }
    }

    #[test]
    fn radial_profile_matches_bessel_small_argument() {
        // I_0(x) = 1 + x^2/4 + x^4/64 + ...
        let x = 0.3_f64;
        let i0 = 1.0 + x * x / 4.0 + x.powi(4) / 64.0;
        assert!((radial_profile(0, x) - i0).abs() < 1e-8);
    }

    #[test]
    fn wavenumbers_guard_degenerate_scales() {
        assert!(axial_wavenumber(1, 0.0).is_finite());
        assert!(helical_wavenumber(0, 0.0).is_finite());
        assert!(axial_wavenumber(0, 5.0).abs() < 1e-15);
        assert!(effective_wavenumber(0, 5.0) > 0.0);
    }

    #[test]
    fn dipole_field_along_moment_axis() {
        // On the moment axis the field is 2m/r^3 and parallel to the moment.
        let b = dipole_field([0.0, 0.0, 2.0], [0.0, 0.0, 1.0]);
        assert!(b[0].abs() < 1e-12 && b[1].abs() < 1e-12);
        assert!((b[2] - 2.0 / 8.0).abs() < 1e-12);
    }

    #[test]
    fn dipole_field_guards_zero_distance() {
        let b = dipole_field([0.0, 0.0, 0.0], [1.0, 1.0, 1.0]);
        assert!(b.iter().all(|v| v.is_finite()));
    }
}

//! Structured coefficient identity.
//!
//! Every coefficient in the field model is addressed by a `ParamKey`: a
//! `(family, instance, m, n)` tuple rather than an ad-hoc string. The display
//! name (`Ch1_0_2`, `Dc2_4`, `k3`, `vx1`, ...) is derived from the key and is
//! used for persistence and reports only; nothing parses names back.

use serde::{Deserialize, Serialize};

/// One conjugate term of a helical family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HelTerm {
    A,
    B,
    C,
    D,
}

impl HelTerm {
    pub const ALL: [HelTerm; 4] = [HelTerm::A, HelTerm::B, HelTerm::C, HelTerm::D];

    fn letter(self) -> char {
        match self {
            HelTerm::A => 'A',
            HelTerm::B => 'B',
            HelTerm::C => 'C',
            HelTerm::D => 'D',
        }
    }
}

/// One term of a cylindrical amplitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AmpTerm {
    A,
    B,
}

impl AmpTerm {
    pub const ALL: [AmpTerm; 2] = [AmpTerm::A, AmpTerm::B];

    fn letter(self) -> char {
        match self {
            AmpTerm::A => 'A',
            AmpTerm::B => 'B',
        }
    }
}

/// Coordinate axis of an external point source: position or moment component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceAxis {
    X,
    Y,
    Z,
    MomentX,
    MomentY,
    MomentZ,
}

impl SourceAxis {
    pub const ALL: [SourceAxis; 6] = [
        SourceAxis::X,
        SourceAxis::Y,
        SourceAxis::Z,
        SourceAxis::MomentX,
        SourceAxis::MomentY,
        SourceAxis::MomentZ,
    ];

    fn label(self) -> &'static str {
        match self {
            SourceAxis::X => "x",
            SourceAxis::Y => "y",
            SourceAxis::Z => "z",
            SourceAxis::MomentX => "vx",
            SourceAxis::MomentY => "vy",
            SourceAxis::MomentZ => "vz",
        }
    }

    /// Position components get per-axis tolerance bounds; moments get
    /// absolute symmetric bounds.
    pub fn is_position(self) -> bool {
        matches!(self, SourceAxis::X | SourceAxis::Y | SourceAxis::Z)
    }
}

/// Fixed shape hyper-parameters (layer 1 of the registry).
///
/// The `u8` is the 1-based coil instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShapeKind {
    Pitch(u8),
    HelOrders(u8),
    HelModes(u8),
    Length(u8),
    CylOrders(u8),
    CylModes(u8),
    AsymLimit,
}

/// Structured identity of one model coefficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamKey {
    /// Fixed shape hyper-parameter.
    Shape(ShapeKind),
    /// Helical family term for a coil, harmonic order `(m, n)`.
    Hel { coil: u8, term: HelTerm, m: u16, n: u16 },
    /// Cylindrical amplitude term for a coil, harmonic order `(m, n)`.
    CylAmp { coil: u8, term: AmpTerm, m: u16, n: u16 },
    /// Cylindrical phase term for a coil, one per axial mode `n`.
    CylPhase { coil: u8, n: u16 },
    /// Flat cartesian term `k1..k10`.
    Cart { index: u8 },
    /// External point-source coefficient (1-based source index).
    Source { source: u8, axis: SourceAxis },
    /// Global axial offset `z0`.
    AxisOffset,
}

impl ParamKey {
    /// Derived display name, stable across runs.
    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for ParamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            ParamKey::Shape(kind) => match kind {
                ShapeKind::Pitch(c) => write!(f, "pitch{c}"),
                ShapeKind::HelOrders(c) => write!(f, "ms_h{c}"),
                ShapeKind::HelModes(c) => write!(f, "ns_h{c}"),
                ShapeKind::Length(c) => write!(f, "length{c}"),
                ShapeKind::CylOrders(c) => write!(f, "ms_c{c}"),
                ShapeKind::CylModes(c) => write!(f, "ns_c{c}"),
                ShapeKind::AsymLimit => write!(f, "ms_asym_max"),
            },
            ParamKey::Hel { coil, term, m, n } => {
                write!(f, "{}h{coil}_{m}_{n}", term.letter())
            }
            ParamKey::CylAmp { coil, term, m, n } => {
                write!(f, "{}c{coil}_{m}_{n}", term.letter())
            }
            ParamKey::CylPhase { coil, n } => write!(f, "Dc{coil}_{n}"),
            ParamKey::Cart { index } => write!(f, "k{index}"),
            ParamKey::Source { source, axis } => write!(f, "{}{source}", axis.label()),
            ParamKey::AxisOffset => write!(f, "z0"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn display_names_match_conventions() {
        assert_eq!(ParamKey::Shape(ShapeKind::Pitch(1)).name(), "pitch1");
        assert_eq!(ParamKey::Shape(ShapeKind::HelOrders(2)).name(), "ms_h2");
        assert_eq!(ParamKey::Shape(ShapeKind::AsymLimit).name(), "ms_asym_max");
        assert_eq!(
            ParamKey::Hel {
                coil: 1,
                term: HelTerm::C,
                m: 0,
                n: 2
            }
            .name(),
            "Ch1_0_2"
        );
        assert_eq!(
            ParamKey::CylAmp {
                coil: 2,
                term: AmpTerm::B,
                m: 3,
                n: 1
            }
            .name(),
            "Bc2_3_1"
        );
        assert_eq!(ParamKey::CylPhase { coil: 1, n: 4 }.name(), "Dc1_4");
        assert_eq!(ParamKey::Cart { index: 3 }.name(), "k3");
        assert_eq!(
            ParamKey::Source {
                source: 1,
                axis: SourceAxis::MomentX
            }
            .name(),
            "vx1"
        );
        assert_eq!(ParamKey::AxisOffset.name(), "z0");
    }

    #[test]
    fn keys_are_usable_as_map_keys() {
        let mut map = HashMap::new();
        let a = ParamKey::Hel {
            coil: 1,
            term: HelTerm::A,
            m: 0,
            n: 0,
        };
        let b = ParamKey::Hel {
            coil: 1,
            term: HelTerm::A,
            m: 0,
            n: 1,
        };
        map.insert(a, 1usize);
        map.insert(b, 2usize);
        assert_eq!(map.len(), 2);
        assert_eq!(map[&a], 1);
    }

    #[test]
    fn keys_round_trip_through_json() {
        let key = ParamKey::Source {
            source: 2,
            axis: SourceAxis::Z,
        };
        let text = serde_json::to_string(&key).unwrap();
        let back: ParamKey = serde_json::from_str(&text).unwrap();
        assert_eq!(back, key);
    }
}

//! Ordered coefficient registry.
//!
//! The registry is the single mutable resource of a fit session: an ordered
//! mapping from `ParamKey` to its record. Insertion order is the solver's
//! stable iteration order for the free-parameter vector. Deep-copy snapshots
//! (plain `Clone`) are how the refinement controller keeps "current" and
//! "best-known" state from aliasing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::params::key::{ParamKey, ShapeKind};

/// One coefficient record. Bounds are optional on either side; the standard
/// error is absent until a fit produces one (and stays absent when the solver
/// could not estimate it).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamRecord {
    pub value: f64,
    pub vary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<f64>,
}

impl ParamRecord {
    pub fn fixed(value: f64) -> Self {
        Self {
            value,
            vary: false,
            min: None,
            max: None,
            stderr: None,
        }
    }

    pub fn free(value: f64) -> Self {
        Self {
            value,
            vary: true,
            min: None,
            max: None,
            stderr: None,
        }
    }

    pub fn with_bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Clamp a value into this record's bounds.
    pub fn clamp(&self, v: f64) -> f64 {
        let mut v = v;
        if let Some(lo) = self.min {
            v = v.max(lo);
        }
        if let Some(hi) = self.max {
            v = v.min(hi);
        }
        v
    }
}

/// Ordered mapping from coefficient key to record. No duplicate keys.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: Vec<(ParamKey, ParamRecord)>,
    index: HashMap<ParamKey, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &ParamKey) -> bool {
        self.index.contains_key(key)
    }

    /// Insert a record if the key is absent. Returns true when inserted.
    ///
    /// Builder steps use this for their "add if missing, refresh otherwise"
    /// idiom; refreshing is done through `get_mut` so the policy of what may
    /// change on an existing entry stays at the call site.
    pub fn add(&mut self, key: ParamKey, record: ParamRecord) -> bool {
        if self.index.contains_key(&key) {
            return false;
        }
        self.index.insert(key, self.entries.len());
        self.entries.push((key, record));
        true
    }

    pub fn get(&self, key: &ParamKey) -> Option<&ParamRecord> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn get_mut(&mut self, key: &ParamKey) -> Option<&mut ParamRecord> {
        let i = *self.index.get(key)?;
        Some(&mut self.entries[i].1)
    }

    /// Ordered iteration over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&ParamKey, &ParamRecord)> {
        self.entries.iter().map(|(k, r)| (k, r))
    }

    /// Keys of the free (varying) coefficients, in registry order.
    pub fn free_keys(&self) -> Vec<ParamKey> {
        self.entries
            .iter()
            .filter(|(_, r)| r.vary)
            .map(|(k, _)| *k)
            .collect()
    }

    pub fn n_free(&self) -> usize {
        self.entries.iter().filter(|(_, r)| r.vary).count()
    }

    /// Value of a layer-1 shape parameter.
    pub fn shape_value(&self, kind: ShapeKind) -> Result<f64, AppError> {
        self.get(&ParamKey::Shape(kind))
            .map(|r| r.value)
            .ok_or_else(|| {
                AppError::new(2, format!("Missing shape parameter '{}'.", ParamKey::Shape(kind)))
            })
    }

    /// A shape parameter interpreted as a term count.
    pub fn shape_count(&self, kind: ShapeKind) -> Result<usize, AppError> {
        let v = self.shape_value(kind)?;
        if !v.is_finite() || v < 0.0 {
            return Err(AppError::new(
                2,
                format!("Shape parameter '{}' must be a non-negative count.", ParamKey::Shape(kind)),
            ));
        }
        Ok(v as usize)
    }

    /// Overwrite the values of the free coefficients from a solver vector.
    ///
    /// `keys` must be the free-key list the vector was built from. Values are
    /// clamped into each record's bounds, so a stored registry never carries
    /// an out-of-bounds coefficient.
    pub fn set_free_values(&mut self, keys: &[ParamKey], values: &[f64]) -> Result<(), AppError> {
        if keys.len() != values.len() {
            return Err(AppError::new(4, "Free-parameter vector length mismatch."));
        }
        for (key, &v) in keys.iter().zip(values.iter()) {
            let rec = self
                .get_mut(key)
                .ok_or_else(|| AppError::new(4, format!("Unknown coefficient '{key}' in solver result.")))?;
            rec.value = rec.clamp(v);
        }
        Ok(())
    }
}

/// One persisted coefficient: the structured key plus its derived display
/// name, so stored files stay readable without any name parsing on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedParam {
    pub name: String,
    pub key: ParamKey,
    #[serde(flatten)]
    pub record: ParamRecord,
}

impl Registry {
    pub fn to_saved(&self) -> Vec<SavedParam> {
        self.iter()
            .map(|(k, r)| SavedParam {
                name: k.name(),
                key: *k,
                record: *r,
            })
            .collect()
    }

    pub fn from_saved(saved: Vec<SavedParam>) -> Result<Self, AppError> {
        let mut reg = Registry::new();
        for p in saved {
            if !reg.add(p.key, p.record) {
                return Err(AppError::new(
                    3,
                    format!("Duplicate coefficient '{}' in saved registry.", p.name),
                ));
            }
        }
        Ok(reg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::key::{HelTerm, ShapeKind};

    fn hel(m: u16, n: u16) -> ParamKey {
        ParamKey::Hel {
            coil: 1,
            term: HelTerm::C,
            m,
            n,
        }
    }

    #[test]
    fn add_preserves_insertion_order_and_rejects_duplicates() {
        let mut reg = Registry::new();
        assert!(reg.add(hel(0, 0), ParamRecord::free(1.0)));
        assert!(reg.add(hel(0, 1), ParamRecord::fixed(2.0)));
        assert!(reg.add(hel(1, 0), ParamRecord::free(3.0)));
        assert!(!reg.add(hel(0, 0), ParamRecord::free(9.0)));

        let keys: Vec<_> = reg.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![hel(0, 0), hel(0, 1), hel(1, 0)]);
        assert!((reg.get(&hel(0, 0)).unwrap().value - 1.0).abs() < 1e-15);
    }

    #[test]
    fn free_keys_follow_registry_order() {
        let mut reg = Registry::new();
        reg.add(hel(0, 0), ParamRecord::free(0.0));
        reg.add(hel(0, 1), ParamRecord::fixed(0.0));
        reg.add(hel(1, 0), ParamRecord::free(0.0));
        assert_eq!(reg.free_keys(), vec![hel(0, 0), hel(1, 0)]);
        assert_eq!(reg.n_free(), 2);
    }

    #[test]
    fn snapshots_do_not_alias() {
        let mut reg = Registry::new();
        reg.add(hel(0, 0), ParamRecord::free(1.0));
        let snap = reg.clone();
        reg.get_mut(&hel(0, 0)).unwrap().value = 42.0;
        assert!((snap.get(&hel(0, 0)).unwrap().value - 1.0).abs() < 1e-15);
    }

    #[test]
    fn shape_count_validates() {
        let mut reg = Registry::new();
        reg.add(
            ParamKey::Shape(ShapeKind::HelOrders(1)),
            ParamRecord::fixed(3.0),
        );
        assert_eq!(reg.shape_count(ShapeKind::HelOrders(1)).unwrap(), 3);
        assert!(reg.shape_count(ShapeKind::HelOrders(2)).is_err());
    }

    #[test]
    fn saved_round_trip_preserves_order() {
        let mut reg = Registry::new();
        reg.add(hel(0, 0), ParamRecord::free(1.5).with_bounds(Some(-2.0), Some(2.0)));
        reg.add(hel(0, 1), ParamRecord::fixed(0.0));

        let saved = reg.to_saved();
        let text = serde_json::to_string(&saved).unwrap();
        let back: Vec<SavedParam> = serde_json::from_str(&text).unwrap();
        let reg2 = Registry::from_saved(back).unwrap();

        let a: Vec<_> = reg.iter().collect();
        let b: Vec<_> = reg2.iter().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn clamp_respects_bounds() {
        let rec = ParamRecord::free(0.0).with_bounds(Some(-1.0), Some(1.0));
        assert!((rec.clamp(5.0) - 1.0).abs() < 1e-15);
        assert!((rec.clamp(-5.0) + 1.0).abs() < 1e-15);
        assert!((rec.clamp(0.5) - 0.5).abs() < 1e-15);
    }

    #[test]
    fn set_free_values_clamps_into_bounds() {
        let mut reg = Registry::new();
        let key = ParamKey::Cart { index: 3 };
        reg.add(key, ParamRecord::free(0.5).with_bounds(Some(0.0), Some(1.0)));

        reg.set_free_values(&[key], &[4.0]).unwrap();
        assert!((reg.get(&key).unwrap().value - 1.0).abs() < 1e-15);
        reg.set_free_values(&[key], &[-2.0]).unwrap();
        assert!(reg.get(&key).unwrap().value == 0.0);
    }
}

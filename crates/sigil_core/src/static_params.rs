//! Static Parameter Sets
//!
//! Static parameters are compile-time switches of a shading description.
//! Unlike dynamic parameters they select code paths, so every value takes
//! part in the shader map identity.
//!
//! # Ordering
//!
//! Entries are kept sorted by the *string* name of the parameter (not by the
//! interned [`Symbol`] value), so two sets built in different insertion
//! orders, or in different processes, hash identically.
//!
//! ```rust,ignore
//! use sigil_core::StaticParameterSet;
//!
//! let mut params = StaticParameterSet::new();
//! params.set_switch("UseDetailNormal", true);
//! params.set_choice("BlendLayers", "Two");
//!
//! let hash = params.stable_hash();
//! ```

use crate::hash::StableHasher;
use crate::interner::{self, Symbol};

/// Value of one static parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StaticValue {
    /// Boolean static switch.
    Switch(bool),
    /// Named choice out of an enumerated static selector.
    Choice(Symbol),
    /// RGBA channel mask (bit 0 = R .. bit 3 = A).
    ComponentMask(u8),
}

impl StaticValue {
    fn hash_into(self, hasher: &mut StableHasher) {
        match self {
            Self::Switch(v) => {
                hasher.write_u8(0).write_bool(v);
            }
            Self::Choice(sym) => {
                hasher.write_u8(1).write_str(interner::resolve(sym));
            }
            Self::ComponentMask(mask) => {
                hasher.write_u8(2).write_u8(mask & 0xF);
            }
        }
    }
}

/// Sorted collection of static parameter values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct StaticParameterSet {
    entries: Vec<(Symbol, StaticValue)>,
}

impl StaticParameterSet {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn search(&self, name: &str) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|(k, _)| interner::resolve(*k).cmp(name))
    }

    /// Sets a value, replacing any previous value with the same name.
    pub fn set(&mut self, name: &str, value: StaticValue) {
        match self.search(name) {
            Ok(idx) => self.entries[idx].1 = value,
            Err(idx) => self.entries.insert(idx, (interner::intern(name), value)),
        }
    }

    #[inline]
    pub fn set_switch(&mut self, name: &str, value: bool) {
        self.set(name, StaticValue::Switch(value));
    }

    #[inline]
    pub fn set_choice(&mut self, name: &str, choice: &str) {
        self.set(name, StaticValue::Choice(interner::intern(choice)));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<StaticValue> {
        self.search(name).ok().map(|idx| self.entries[idx].1)
    }

    /// Returns the switch value, or `None` if unset or not a switch.
    #[must_use]
    pub fn switch(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            StaticValue::Switch(v) => Some(v),
            _ => None,
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        if let Ok(idx) = self.search(name) {
            self.entries.remove(idx);
            true
        } else {
            false
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates `(name, value)` in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, StaticValue)> + '_ {
        self.entries
            .iter()
            .map(|&(k, v)| (interner::resolve(k), v))
    }

    /// Overrides values in `self` with the values in `other`.
    pub fn merge(&mut self, other: &StaticParameterSet) {
        for (name, value) in other.iter() {
            self.set(name, value);
        }
    }

    #[must_use]
    pub fn merged_with(&self, other: &StaticParameterSet) -> StaticParameterSet {
        let mut result = self.clone();
        result.merge(other);
        result
    }

    /// Feeds every entry into `hasher` using the stable encoding.
    pub fn hash_into(&self, hasher: &mut StableHasher) {
        hasher.write_u64(self.entries.len() as u64);
        for &(k, v) in &self.entries {
            hasher.write_str(interner::resolve(k));
            v.hash_into(hasher);
        }
    }

    /// Process-independent content hash.
    #[must_use]
    pub fn stable_hash(&self) -> u128 {
        let mut hasher = StableHasher::new();
        self.hash_into(&mut hasher);
        hasher.finish128()
    }

    /// Human-readable `name=value` list.
    #[must_use]
    pub fn describe(&self) -> String {
        self.iter()
            .map(|(name, value)| match value {
                StaticValue::Switch(v) => format!("{name}={v}"),
                StaticValue::Choice(c) => format!("{name}={}", interner::resolve(c)),
                StaticValue::ComponentMask(m) => format!("{name}=mask({m:04b})"),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl From<&[(&str, bool)]> for StaticParameterSet {
    fn from(switches: &[(&str, bool)]) -> Self {
        let mut result = Self::new();
        for (name, value) in switches {
            result.set_switch(name, *value);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut params = StaticParameterSet::new();
        params.set_switch("UseDetail", true);
        params.set_choice("Layers", "Two");

        assert_eq!(params.switch("UseDetail"), Some(true));
        assert_eq!(params.switch("Layers"), None);
        assert!(params.get("Missing").is_none());
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_sorted_by_name_not_symbol() {
        // Intern in reverse order so symbol order disagrees with name order.
        interner::intern("zz_static_order");
        interner::intern("aa_static_order");

        let mut params = StaticParameterSet::new();
        params.set_switch("zz_static_order", true);
        params.set_switch("aa_static_order", false);

        let names: Vec<_> = params.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["aa_static_order", "zz_static_order"]);
    }

    #[test]
    fn test_hash_independent_of_insertion_order() {
        let mut a = StaticParameterSet::new();
        a.set_switch("A", true);
        a.set_switch("B", false);

        let mut b = StaticParameterSet::new();
        b.set_switch("B", false);
        b.set_switch("A", true);

        assert_eq!(a.stable_hash(), b.stable_hash());
        assert_eq!(a, b);
    }

    #[test]
    fn test_merge_overrides() {
        let mut base = StaticParameterSet::from(&[("A", true), ("B", true)][..]);
        let overrides = StaticParameterSet::from(&[("B", false), ("C", true)][..]);
        base.merge(&overrides);

        assert_eq!(base.switch("A"), Some(true));
        assert_eq!(base.switch("B"), Some(false));
        assert_eq!(base.switch("C"), Some(true));
    }

    #[test]
    fn test_value_changes_hash() {
        let a = StaticParameterSet::from(&[("A", true)][..]);
        let b = StaticParameterSet::from(&[("A", false)][..]);
        assert_ne!(a.stable_hash(), b.stable_hash());
    }
}

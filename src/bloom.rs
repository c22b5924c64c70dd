//! Fixed-parameter bloom filter for archetype masks.
//!
//! Parametrised at compile time the way the spec pins it down: `HASH_COUNT`
//! hash probes, a target false-positive rate, and a capacity sized for "a
//! small number of distinct component types" (§4.2). The mask width is
//! derived from those constants, not chosen ad hoc, so every `Bloom` in the
//! process agrees on a bit width without needing to coordinate.
//!
//! The term hashed for a component type is `(alias, events)` — the
//! registered handler contract, not the component record's layout or memory
//! address. Two component types that declare the same alias and events
//! collide in the bloom filter even if their data differs; this is
//! intentional (see `spec.md` §9's open question) and must not be swapped
//! for an address-based or property-based hash, because `search` depends on
//! this exact determinism holding across runs.

use std::hash::{Hash, Hasher};
use std::collections::hash_map::DefaultHasher;

use fixedbitset::FixedBitSet;

/// Number of hash probes per inserted term.
pub const HASH_COUNT: usize = 6;
/// Target false-positive rate used to size the filter.
pub const TARGET_RATE: f64 = 0.01;
/// Assumed upper bound on distinct component types.
pub const CAPACITY: usize = 100;

/// Number of bits in a mask sized for `n` expected elements at
/// [`TARGET_RATE`] with [`HASH_COUNT`] probes:
/// `bits(n) = ceil(-HASH_COUNT * n / ln(1 - TARGET_RATE^(1/HASH_COUNT)))`.
pub fn bits(n: usize) -> usize {
    let k = HASH_COUNT as f64;
    let denom = (1.0 - TARGET_RATE.powf(1.0 / k)).ln();
    (-(k * n as f64) / denom).ceil() as usize
}

/// The bit width shared by every mask in this process, sized for
/// [`CAPACITY`] component types.
pub fn mask_bits() -> usize {
    bits(CAPACITY)
}

/// An archetype bloom mask: the OR of every registered component type's
/// individual term mask that an entity currently carries.
#[derive(Clone, Debug)]
pub struct Mask(FixedBitSet);

impl Mask {
    /// The empty mask (archetype with no components).
    pub fn empty() -> Self {
        Mask(FixedBitSet::with_capacity(mask_bits()))
    }

    /// The mask for a single component type, identified by its registered
    /// `(alias, events)` contract.
    pub fn term(alias: &str, events: &[&str]) -> Self {
        let bits_len = mask_bits();
        let mut set = FixedBitSet::with_capacity(bits_len);
        for i in 0..HASH_COUNT {
            let h = stable_hash(alias, events, i as u64);
            set.insert((h as usize) % bits_len);
        }
        Mask(set)
    }

    /// `self | other`, in place.
    pub fn merge(&mut self, other: &Mask) {
        self.0.union_with(&other.0);
    }

    /// `self & other == other` — "self's mask contains all the bits set in
    /// `other`", used by `all_of`/`none_of` style filtering.
    pub fn contains_all(&self, other: &Mask) -> bool {
        other.0.is_subset(&self.0)
    }

    /// `self & other != 0`
    pub fn intersects(&self, other: &Mask) -> bool {
        !self.0.is_disjoint(&other.0)
    }

    /// `self & other == 0`
    pub fn disjoint(&self, other: &Mask) -> bool {
        self.0.is_disjoint(&other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.count_ones(..) == 0
    }
}

impl Default for Mask {
    fn default() -> Self {
        Mask::empty()
    }
}

impl PartialEq for Mask {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

/// A stable, non-cryptographic hash over `(alias, events, probe index)`.
/// `DefaultHasher` (SipHash with the fixed all-zero keys `Hasher::new()`
/// seeds with) is deterministic across runs for a given input, which is the
/// only contract this needs — not a specific algorithm.
fn stable_hash(alias: &str, events: &[&str], probe: u64) -> u64 {
    let mut hasher = DefaultHasher::new();
    alias.hash(&mut hasher);
    events.hash(&mut hasher);
    probe.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_for_capacity_100_is_about_962() {
        // Given / When
        let n = bits(CAPACITY);

        // Then
        assert!((950..=975).contains(&n), "got {n}");
    }

    #[test]
    fn term_is_deterministic() {
        // Given
        let events = ["check", "damage"];

        // When
        let m1 = Mask::term("health", &events);
        let m2 = Mask::term("health", &events);

        // Then
        assert_eq!(m1, m2);
    }

    #[test]
    fn different_terms_are_usually_distinguishable() {
        // Given
        let m1 = Mask::term("health", &["check"]);
        let m2 = Mask::term("position", &["check"]);

        // Then
        assert_ne!(m1, m2);
    }

    #[test]
    fn merge_is_union_and_no_false_negatives() {
        // Given
        let mut combined = Mask::empty();
        let health = Mask::term("health", &["check"]);
        let position = Mask::term("position", &[]);

        // When
        combined.merge(&health);
        combined.merge(&position);

        // Then - both original terms must still test positive (no false negatives)
        assert!(combined.contains_all(&health));
        assert!(combined.contains_all(&position));
    }

    #[test]
    fn empty_mask_is_disjoint_from_everything() {
        let empty = Mask::empty();
        let health = Mask::term("health", &["check"]);
        assert!(empty.disjoint(&health));
        assert!(!empty.intersects(&health));
    }
}

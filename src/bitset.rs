//! Compact bitset keys for clades.
//!
//! # Overview
//! A clade is a set of tips; each bit position corresponds to a taxon index,
//! so bit *i* set means taxon *i* belongs to the clade. Within one analysis
//! every bitset has the same width (the taxon count), so two clades are equal
//! iff their bit vectors are equal, and the bitset can serve directly as a
//! hash key.
//!
//! # Example
//! For taxa [A, B, C, D] mapped to indices [0, 1, 2, 3]:
//! - Clade {A, C} → bitset `0b0101` (bits 0 and 2 set)
//! - Clade {B, C, D} → bitset `0b1110` (bits 1, 2, 3 set)

/// A compact bitset identifying a clade by its member taxa.
///
/// Internally stores bits in `Vec<u64>` words to support arbitrarily large
/// taxon sets. Value equality and hashing operate on the words, never on
/// object identity.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Bitset(pub Vec<u64>);

impl Bitset {
    /// Creates a new bitset with all bits set to 0.
    ///
    /// `words` is the number of u64 words, i.e. `(num_taxa + 63) / 64`.
    pub fn zeros(words: usize) -> Self {
        Bitset(vec![0u64; words])
    }

    /// An all-zero bitset sized for `num_taxa` tips.
    pub fn for_taxa(num_taxa: usize) -> Self {
        Bitset::zeros(num_taxa.div_ceil(64))
    }

    /// A bitset with exactly one tip present.
    ///
    /// # Example
    /// ```
    /// # use rust_tree_annotator::bitset::Bitset;
    /// let bs = Bitset::singleton(4, 2);
    /// assert_eq!(bs.0[0], 0b0100);
    /// ```
    pub fn singleton(num_taxa: usize, idx: usize) -> Self {
        let mut bs = Bitset::for_taxa(num_taxa);
        bs.set(idx);
        bs
    }

    /// The full taxon set: bits `0..num_taxa` all set.
    ///
    /// This is the key of the root clade, which is present in every rooted
    /// tree over the taxon set.
    pub fn full(num_taxa: usize) -> Self {
        let mut bs = Bitset::for_taxa(num_taxa);
        for i in 0..num_taxa {
            bs.set(i);
        }
        bs
    }

    /// Sets the bit at the given taxon index.
    #[inline]
    pub fn set(&mut self, idx: usize) {
        let word = idx >> 6;
        let bit = idx & 63;
        self.0[word] |= 1u64 << bit;
    }

    /// Returns whether the bit at the given taxon index is set.
    #[inline]
    pub fn get(&self, idx: usize) -> bool {
        let word = idx >> 6;
        let bit = idx & 63;
        (self.0[word] >> bit) & 1 == 1
    }

    /// Bitwise OR with another bitset: `self` becomes `self ∪ other`.
    ///
    /// Used bottom-up during traversal, merging child clades into the parent.
    #[inline]
    pub fn or_assign(&mut self, other: &Bitset) {
        for (a, b) in self.0.iter_mut().zip(&other.0) {
            *a |= *b;
        }
    }

    /// Counts the number of set bits, i.e. the clade size.
    #[inline]
    pub fn count_ones(&self) -> usize {
        self.0.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Subset test: `self ⊆ other` iff `self AND other == self`.
    #[inline]
    pub fn is_subset_of(&self, other: &Bitset) -> bool {
        self.0.iter().zip(&other.0).all(|(a, b)| a & b == *a)
    }

    /// Iterates the indices of set bits in ascending order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().enumerate().flat_map(|(w, &word)| {
            (0..64).filter_map(move |b| {
                if (word >> b) & 1 == 1 {
                    Some(w * 64 + b)
                } else {
                    None
                }
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitset_basic() {
        let mut bs = Bitset::zeros(1);
        bs.set(0);
        bs.set(2);
        assert_eq!(bs.0[0], 0b0101);
        assert!(bs.get(0));
        assert!(!bs.get(1));
        assert!(bs.get(2));
    }

    #[test]
    fn test_bitset_or() {
        let mut bs1 = Bitset::zeros(1);
        bs1.set(0);
        bs1.set(1);

        let mut bs2 = Bitset::zeros(1);
        bs2.set(2);
        bs2.set(3);

        bs1.or_assign(&bs2);
        assert_eq!(bs1.0[0], 0b1111);
    }

    #[test]
    fn test_count_ones() {
        let mut bs = Bitset::zeros(1);
        bs.set(0);
        bs.set(2);
        bs.set(5);
        assert_eq!(bs.count_ones(), 3);
    }

    #[test]
    fn test_full_and_singleton() {
        let full = Bitset::full(5);
        assert_eq!(full.0[0], 0b11111);
        assert_eq!(full.count_ones(), 5);

        let tip = Bitset::singleton(5, 4);
        assert_eq!(tip.count_ones(), 1);
        assert!(tip.is_subset_of(&full));
    }

    #[test]
    fn test_subset() {
        // {1,3} ⊆ {1,2,3,4} but {1,5} ⊄ {1,2,3,4}
        let mut sup = Bitset::zeros(1);
        for i in [1, 2, 3, 4] {
            sup.set(i);
        }

        let mut a = Bitset::zeros(1);
        a.set(1);
        a.set(3);
        assert!(a.is_subset_of(&sup));

        let mut b = Bitset::zeros(1);
        b.set(1);
        b.set(5);
        assert!(!b.is_subset_of(&sup));
    }

    #[test]
    fn test_iter_ones() {
        let mut bs = Bitset::zeros(2);
        bs.set(0);
        bs.set(63);
        bs.set(64);
        bs.set(100);
        let ones: Vec<usize> = bs.iter_ones().collect();
        assert_eq!(ones, vec![0, 63, 64, 100]);
    }

    #[test]
    fn test_large_taxon_set() {
        // More than 64 taxa needs multiple words
        let mut bs = Bitset::for_taxa(128);
        bs.set(0);
        bs.set(63);
        bs.set(64);
        bs.set(127);

        assert_eq!(bs.count_ones(), 4);
        assert_eq!(bs.0[0], 1u64 | (1u64 << 63));
        assert_eq!(bs.0[1], 1u64 | (1u64 << 63));
    }
}

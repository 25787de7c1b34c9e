//! Growable bit vector.
//!
//! Used for visibility-region membership sets, harvest output and the
//! per-tree "enabled leaf" cache. Bits beyond the stored words read as zero,
//! so vectors of different lengths compare and combine naturally.

use serde::{Deserialize, Serialize};

const WORD_BITS: usize = u32::BITS as usize;

/// A set of small non-negative integers stored as packed bits.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BitVector {
    words: Vec<u32>,
}

impl PartialEq for BitVector {
    fn eq(&self, other: &Self) -> bool {
        let len = self.words.len().max(other.words.len());
        (0..len).all(|i| self.word(i) == other.word(i))
    }
}

impl Eq for BitVector {}

impl BitVector {
    /// Create an empty bit vector.
    #[must_use]
    pub const fn new() -> Self {
        Self { words: Vec::new() }
    }

    /// Create an empty bit vector with room for `bits` bits.
    #[must_use]
    pub fn with_capacity(bits: usize) -> Self {
        Self {
            words: Vec::with_capacity(bits.div_ceil(WORD_BITS)),
        }
    }

    /// Build a vector with the given bits set.
    pub fn from_bits(bits: impl IntoIterator<Item = usize>) -> Self {
        let mut vector = Self::new();
        for bit in bits {
            vector.set_bit(bit, true);
        }
        vector
    }

    #[inline]
    fn word(&self, i: usize) -> u32 {
        self.words.get(i).copied().unwrap_or(0)
    }

    /// Set or clear a bit, growing the storage as needed.
    #[inline]
    pub fn set_bit(&mut self, bit: usize, on: bool) {
        let word = bit / WORD_BITS;
        let mask = 1u32 << (bit % WORD_BITS);
        if on {
            if word >= self.words.len() {
                self.words.resize(word + 1, 0);
            }
            self.words[word] |= mask;
        } else if let Some(w) = self.words.get_mut(word) {
            *w &= !mask;
        }
    }

    /// Clear a single bit.
    #[inline]
    pub fn clear_bit(&mut self, bit: usize) {
        self.set_bit(bit, false);
    }

    /// Check whether a bit is set.
    #[inline]
    pub fn is_bit_set(&self, bit: usize) -> bool {
        self.word(bit / WORD_BITS) & (1u32 << (bit % WORD_BITS)) != 0
    }

    /// Clear every bit, keeping the allocation.
    #[inline]
    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    /// Returns true if no bit is set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Returns true if the two sets share at least one bit.
    #[inline]
    pub fn overlap(&self, other: &Self) -> bool {
        self.words
            .iter()
            .zip(&other.words)
            .any(|(a, b)| a & b != 0)
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// `self ^= other`
    pub fn xor_assign(&mut self, other: &Self) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a ^= b;
        }
    }

    /// `self &= other`
    pub fn and_assign(&mut self, other: &Self) {
        for (i, a) in self.words.iter_mut().enumerate() {
            *a &= other.word(i);
        }
    }

    /// `self |= other`
    pub fn or_assign(&mut self, other: &Self) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a |= b;
        }
    }

    /// Copy `other` into `self`, reusing the allocation.
    pub fn assign(&mut self, other: &Self) {
        self.words.clear();
        self.words.extend_from_slice(&other.words);
    }

    /// Iterate the indices of set bits in ascending order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let bit = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(i * WORD_BITS + bit)
            })
        })
    }
}

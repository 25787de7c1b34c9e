//! Byte-wise LSD radix sort over 32-bit keys.
//!
//! One sorter is shared by every ordering decision in the render path:
//! triangles by depth, drawables by render level, spans and occluders by
//! distance. Keys are raw 32-bit patterns whose interpretation (float,
//! signed, unsigned) is chosen per call by [`SortFlags`].
//!
//! The sorter produces a permutation rather than moving payloads, and keeps
//! its working arrays between calls so steady-state frames do not allocate.

use bitflags::bitflags;

bitflags! {
    /// Key interpretation and direction.
    ///
    /// With neither `SIGNED` nor `UNSIGNED` set, keys are IEEE-754 floats.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct SortFlags: u32 {
        /// Keys are two's complement `i32`
        const SIGNED = 0x1;
        /// Keys are `u32`
        const UNSIGNED = 0x2;
        /// Largest key first
        const REVERSE = 0x4;
    }
}

/// Raw 32-bit sort key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SortKey(pub u32);

impl SortKey {
    /// Key from a float. NaN has no defined position.
    #[inline]
    pub const fn from_f32(value: f32) -> Self {
        Self(value.to_bits())
    }

    /// Key from a signed integer.
    #[inline]
    #[allow(clippy::cast_sign_loss)]
    pub const fn from_i32(value: i32) -> Self {
        Self(value as u32)
    }

    /// Key from an unsigned integer.
    #[inline]
    pub const fn from_u32(value: u32) -> Self {
        Self(value)
    }

    /// Map the key onto an unsigned value with the same ordering.
    #[inline]
    const fn normalized(self, flags: SortFlags) -> u32 {
        let bits = self.0;
        let key = if flags.contains(SortFlags::UNSIGNED) {
            bits
        } else if flags.contains(SortFlags::SIGNED) {
            bits ^ 0x8000_0000
        } else if bits & 0x8000_0000 != 0 {
            // Negative floats order backwards by magnitude
            !bits
        } else {
            bits | 0x8000_0000
        };
        if flags.contains(SortFlags::REVERSE) {
            !key
        } else {
            key
        }
    }
}

const RADIX_PASSES: u32 = 4;
const BUCKETS: usize = 256;

/// Reusable stable radix sorter.
///
/// ```
/// use cullforge_core::{RadixSort, SortFlags, SortKey};
///
/// let keys = [3.5, -1.0, 2.0].map(SortKey::from_f32);
/// let mut sorter = RadixSort::new();
/// assert_eq!(sorter.sort(&keys, SortFlags::empty()), &[1, 2, 0]);
/// ```
#[derive(Debug, Default)]
pub struct RadixSort {
    keys: Vec<u32>,
    order: Vec<u32>,
    swap: Vec<u32>,
}

impl RadixSort {
    /// Create a sorter with no preallocated storage.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            keys: Vec::new(),
            order: Vec::new(),
            swap: Vec::new(),
        }
    }

    /// Create a sorter able to sort `n` keys without reallocating.
    #[must_use]
    pub fn with_capacity(n: usize) -> Self {
        Self {
            keys: Vec::with_capacity(n),
            order: Vec::with_capacity(n),
            swap: Vec::with_capacity(n),
        }
    }

    /// Sort `keys` and return the permutation that orders them.
    ///
    /// Element `i` of the result is the input position of the `i`-th
    /// smallest key (largest under [`SortFlags::REVERSE`]). Equal keys keep
    /// their input order.
    ///
    /// # Panics
    ///
    /// Panics if more than `u32::MAX` keys are supplied.
    #[allow(clippy::cast_possible_truncation)]
    pub fn sort(&mut self, keys: &[SortKey], flags: SortFlags) -> &[u32] {
        let n = keys.len();
        assert!(u32::try_from(n).is_ok(), "too many sort keys: {n}");

        self.keys.clear();
        self.keys.extend(keys.iter().map(|k| k.normalized(flags)));
        self.order.clear();
        self.order.extend(0..n as u32);
        self.swap.clear();
        self.swap.resize(n, 0);

        if n < 2 {
            return &self.order;
        }

        let mut counts = [0usize; BUCKETS];
        for pass in 0..RADIX_PASSES {
            let shift = pass * 8;
            counts.fill(0);
            for &key in &self.keys {
                counts[((key >> shift) & 0xFF) as usize] += 1;
            }

            // Every key shares this byte
            if counts.iter().any(|&c| c == n) {
                continue;
            }

            let mut offset = 0;
            for count in &mut counts {
                let c = *count;
                *count = offset;
                offset += c;
            }

            for &idx in &self.order {
                let byte = ((self.keys[idx as usize] >> shift) & 0xFF) as usize;
                self.swap[counts[byte]] = idx;
                counts[byte] += 1;
            }
            std::mem::swap(&mut self.order, &mut self.swap);
        }

        &self.order
    }
}

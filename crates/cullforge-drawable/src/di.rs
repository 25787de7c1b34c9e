//! Draw-interface index groups.
//!
//! A DI group lists the span positions (or, for matrix-only groups, the
//! palette slots) one scene object owns in a drawable. Span positions are
//! plain array indices, so every insertion or removal in the span array
//! must be mirrored here with [`DiTable::shift_from`] or
//! [`DiTable::close_gap`].

use serde::{Deserialize, Serialize};

use crate::flags::DiFlags;

/// One DI group.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiIndex {
    /// Group flags
    pub flags: DiFlags,
    /// Span positions, or palette slots for matrix-only groups
    pub indices: Vec<u32>,
}

impl DiIndex {
    /// Returns true if entries are palette slots.
    #[inline]
    pub const fn is_matrix_only(&self) -> bool {
        self.flags.contains(DiFlags::MATRIX_ONLY)
    }

    /// Returns true if transforms through this group are ignored.
    #[inline]
    pub const fn dont_transform(&self) -> bool {
        self.flags.contains(DiFlags::DONT_TRANSFORM)
    }

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Returns true if the group holds nothing.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Drop all entries and flags.
    pub fn reset(&mut self) {
        self.flags = DiFlags::empty();
        self.indices.clear();
    }
}

/// All DI groups of a drawable.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiTable {
    groups: Vec<DiIndex>,
}

impl DiTable {
    /// Create an empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self { groups: Vec::new() }
    }

    /// Number of groups, including empty ones.
    #[inline]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Returns true if there are no groups.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Group `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is out of range.
    #[inline]
    pub fn get(&self, idx: u32) -> &DiIndex {
        assert!((idx as usize) < self.groups.len(), "DI index {idx} out of range");
        &self.groups[idx as usize]
    }

    /// Group `idx`, mutably.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is out of range.
    #[inline]
    pub fn get_mut(&mut self, idx: u32) -> &mut DiIndex {
        assert!((idx as usize) < self.groups.len(), "DI index {idx} out of range");
        &mut self.groups[idx as usize]
    }

    /// Reuse the first empty group or append a new one, with `flags` set.
    #[allow(clippy::cast_possible_truncation)]
    pub fn new_group(&mut self, flags: DiFlags) -> u32 {
        let idx = if let Some(i) = self.groups.iter().position(DiIndex::is_empty) {
            i
        } else {
            self.groups.push(DiIndex::default());
            self.groups.len() - 1
        };
        self.groups[idx].flags = flags;
        idx as u32
    }

    /// `idx` if given, else a fresh group with no flags.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is out of range.
    pub fn find_or_create(&mut self, idx: Option<u32>) -> u32 {
        match idx {
            Some(i) => {
                assert!((i as usize) < self.groups.len(), "DI index {i} out of range");
                i
            }
            None => self.new_group(DiFlags::empty()),
        }
    }

    /// Add `count` to every span entry at or above `at`.
    pub fn shift_from(&mut self, at: u32, count: u32) {
        for group in self.groups.iter_mut().filter(|g| !g.is_matrix_only()) {
            for idx in group.indices.iter_mut().filter(|i| **i >= at) {
                *idx += count;
            }
        }
    }

    /// Subtract one from every span entry above `removed`.
    pub fn close_gap(&mut self, removed: u32) {
        for group in self.groups.iter_mut().filter(|g| !g.is_matrix_only()) {
            for idx in group.indices.iter_mut().filter(|i| **i > removed) {
                *idx -= 1;
            }
        }
    }

    /// Iterate over all groups.
    pub fn iter(&self) -> impl Iterator<Item = &DiIndex> + '_ {
        self.groups.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_groups_are_reused() {
        let mut t = DiTable::new();
        let a = t.new_group(DiFlags::empty());
        t.get_mut(a).indices.push(0);
        let b = t.new_group(DiFlags::MATRIX_ONLY);
        assert_eq!((a, b), (0, 1));
        // b is still empty, so it is handed out again
        assert_eq!(t.new_group(DiFlags::empty()), 1);
        assert!(!t.get(1).is_matrix_only());
    }

    #[test]
    fn shifts_skip_matrix_groups() {
        let mut t = DiTable::new();
        let spans = t.new_group(DiFlags::empty());
        t.get_mut(spans).indices = vec![0, 2, 5];
        let mats = t.new_group(DiFlags::MATRIX_ONLY);
        t.get_mut(mats).indices = vec![2, 3];

        t.shift_from(2, 3);
        assert_eq!(t.get(spans).indices, [0, 5, 8]);
        assert_eq!(t.get(mats).indices, [2, 3]);

        t.close_gap(5);
        assert_eq!(t.get(spans).indices, [0, 5, 7]);
        assert_eq!(t.get(mats).indices, [2, 3]);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn bad_index_panics() {
        let _ = DiTable::new().get(3);
    }
}

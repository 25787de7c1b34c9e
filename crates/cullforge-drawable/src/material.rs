//! Material slot table.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Handle to an externally owned material.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MaterialKey(pub u32);

/// Slots of materials referenced by a drawable's spans.
///
/// Spans store slot indices, so a released slot is left empty rather than
/// removed, and later materials fill the hole.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialSlots {
    slots: Vec<Option<MaterialKey>>,
}

impl MaterialSlots {
    /// Create an empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Slot index for `key`: an existing slot holding it, else the first
    /// empty slot, else a new one.
    #[allow(clippy::cast_possible_truncation)]
    pub fn add(&mut self, key: MaterialKey) -> u32 {
        if let Some(i) = self.slots.iter().position(|s| *s == Some(key)) {
            return i as u32;
        }
        let idx = if let Some(i) = self.slots.iter().position(Option::is_none) {
            self.slots[i] = Some(key);
            i
        } else {
            self.slots.push(Some(key));
            self.slots.len() - 1
        };
        debug!(material = key.0, slot = idx, "material ref");
        idx as u32
    }

    /// Empty a slot.
    pub fn release(&mut self, slot: u32) {
        if let Some(key) = self.slots.get_mut(slot as usize).and_then(Option::take) {
            debug!(material = key.0, slot, "material release");
        }
    }

    /// Material in `slot`.
    #[inline]
    pub fn get(&self, slot: u32) -> Option<MaterialKey> {
        self.slots.get(slot as usize).copied().flatten()
    }

    /// Number of slots, including empty ones.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if there are no slots.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of occupied slots.
    pub fn num_in_use(&self) -> usize {
        self.slots.iter().flatten().count()
    }
}

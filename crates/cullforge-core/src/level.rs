//! Render levels.

use serde::{Deserialize, Serialize};

/// Draw-order key for a drawable. Lower levels draw first.
///
/// The major part occupies the top four bits and the minor part the rest,
/// so sorting the raw value as an unsigned integer orders by major then
/// minor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RenderLevel(u32);

impl RenderLevel {
    /// Bit position of the major level.
    pub const MAJOR_SHIFT: u32 = 28;
    /// Mask of the minor level.
    pub const MINOR_MASK: u32 = (1 << Self::MAJOR_SHIFT) - 1;

    /// Opaque geometry
    pub const OPAQUE_MAJOR: u32 = 0x0;
    /// Geometry that reads the frame buffer
    pub const FB_MAJOR: u32 = 0x1;
    /// Default level for new drawables
    pub const DEFAULT_MAJOR: u32 = 0x2;
    /// Alpha-blended geometry
    pub const BLEND_MAJOR: u32 = 0x4;
    /// Drawn after everything else
    pub const LATE_MAJOR: u32 = 0x8;

    /// Level `major`, sub-ordered by `minor`.
    #[inline]
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self((major << Self::MAJOR_SHIFT) | (minor & Self::MINOR_MASK))
    }

    /// Level from its raw packed value.
    #[inline]
    #[must_use]
    pub const fn from_raw(level: u32) -> Self {
        Self(level)
    }

    /// Packed value, suitable as an unsigned sort key.
    #[inline]
    pub const fn level(self) -> u32 {
        self.0
    }

    /// Major component.
    #[inline]
    pub const fn major(self) -> u32 {
        self.0 >> Self::MAJOR_SHIFT
    }

    /// Minor component.
    #[inline]
    pub const fn minor(self) -> u32 {
        self.0 & Self::MINOR_MASK
    }

    /// True for any level at or above the blend major.
    #[inline]
    pub const fn is_blended(self) -> bool {
        self.major() >= Self::BLEND_MAJOR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_major_over_minor() {
        let level = RenderLevel::new(RenderLevel::BLEND_MAJOR, 7);
        assert_eq!(level.major(), RenderLevel::BLEND_MAJOR);
        assert_eq!(level.minor(), 7);
        assert!(level.is_blended());
        assert_eq!(RenderLevel::from_raw(level.level()), level);
    }

    #[test]
    fn majors_order_before_minors() {
        let opaque_late = RenderLevel::new(RenderLevel::OPAQUE_MAJOR, RenderLevel::MINOR_MASK);
        let fb = RenderLevel::new(RenderLevel::FB_MAJOR, 0);
        let blend = RenderLevel::new(RenderLevel::BLEND_MAJOR, 0);
        assert!(opaque_late < fb);
        assert!(fb.level() < blend.level());
        assert!(!fb.is_blended());
    }
}

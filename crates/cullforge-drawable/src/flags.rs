//! Property and criteria flags for drawables, spans and DI groups.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Per-span properties.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SpanProps: u32 {
        /// Skipped by harvests; the span's tree leaf is disabled
        const NO_DRAW = 0x0001;
        /// Per-triangle sort records exist
        const FACES_SORTABLE = 0x0002;
        /// Fill sorted triangles back to front within the span's range
        const REVERSE_SORT = 0x0004;
        /// Sorted jointly with other spans; always kept at the end
        const PARTIAL_SORT = 0x0008;
        /// Lit at run time rather than preshaded
        const RUN_TIME_LIGHT = 0x0010;
        /// Casts no shadows
        const NO_SHADOW_CAST = 0x0020;
        /// Receives no shadows
        const NO_SHADOW = 0x0040;
        /// Always receives shadows
        const FORCE_SHADOW = 0x0080;
        /// Material has a specular layer
        const MAT_HAS_SPECULAR = 0x0100;
        /// Used for line-of-sight tests
        const VIS_LOS = 0x0200;
        /// Vertex colours already carry lighting
        const LITE_VTX_PRESHADED = 0x0400;
    }
}

bitflags! {
    /// Drawable-wide properties.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct DrawableProps: u32 {
        /// Nothing in the drawable is drawn
        const NO_DRAW = 0x01;
        /// Visible spans are ordered by distance each frame
        const SORT_SPANS = 0x02;
        /// Triangles within spans are ordered by distance each frame
        const SORT_FACES = 0x04;
        /// Vertex data changes every frame
        const VOLATILE = 0x08;
        /// Holds a player character
        const CHARACTER = 0x10;
        /// Spans sort as a single unit around the drawable centre
        const SORT_AS_ONE = 0x20;
        /// At least one span is flagged [`SpanProps::VIS_LOS`]
        const HAS_VIS_LOS = 0x40;
    }
}

bitflags! {
    /// Batching criteria an owner uses to pick a drawable for new geometry.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Criteria: u32 {
        /// Needs span sorting
        const SORT_SPANS = 0x1;
        /// Needs face sorting
        const SORT_FACES = 0x2;
        /// Holds a character
        const CHARACTER = 0x4;
    }
}

impl Criteria {
    /// The drawable properties these criteria imply.
    #[must_use]
    pub fn to_props(self) -> DrawableProps {
        let mut props = DrawableProps::empty();
        props.set(DrawableProps::SORT_SPANS, self.contains(Self::SORT_SPANS));
        props.set(DrawableProps::SORT_FACES, self.contains(Self::SORT_FACES));
        props.set(DrawableProps::CHARACTER, self.contains(Self::CHARACTER));
        props
    }
}

bitflags! {
    /// Flags on a DI index group.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct DiFlags: u8 {
        /// Entries index the matrix palette, not spans
        const MATRIX_ONLY = 0x1;
        /// Transforms applied through the group are ignored
        const DONT_TRANSFORM = 0x2;
    }
}

/// Span props copied across when geometry is converted into a span.
pub const CONVERTED_SPAN_PROPS: SpanProps = SpanProps::RUN_TIME_LIGHT
    .union(SpanProps::NO_SHADOW_CAST)
    .union(SpanProps::NO_SHADOW)
    .union(SpanProps::FORCE_SHADOW)
    .union(SpanProps::REVERSE_SORT)
    .union(SpanProps::PARTIAL_SORT)
    .union(SpanProps::VIS_LOS)
    .union(SpanProps::LITE_VTX_PRESHADED);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn criteria_map_to_props() {
        let props = (Criteria::SORT_FACES | Criteria::CHARACTER).to_props();
        assert_eq!(props, DrawableProps::SORT_FACES | DrawableProps::CHARACTER);
        assert!(Criteria::empty().to_props().is_empty());
    }

    #[test]
    fn converted_props_exclude_runtime_state() {
        assert!(!CONVERTED_SPAN_PROPS.contains(SpanProps::NO_DRAW));
        assert!(!CONVERTED_SPAN_PROPS.contains(SpanProps::FACES_SORTABLE));
        assert!(CONVERTED_SPAN_PROPS.contains(SpanProps::PARTIAL_SORT));
    }
}

//! Popup placement rules of `xdg_positioner`

use std::cmp::min;

use crate::utils::{Logical, Point, Rectangle, Serial, Size};

use super::ShellVariant;

bitflags::bitflags! {
    /// Edges of a rectangle
    ///
    /// Used for both the anchor and the gravity of a positioner. An empty set designates the
    /// center of the rectangle, a single edge the middle of that edge and two edges a corner.
    /// The bit values match the bitmask used by the v6 shell.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Edges: u32 {
        /// The top edge
        const TOP = 1;
        /// The bottom edge
        const BOTTOM = 2;
        /// The left edge
        const LEFT = 4;
        /// The right edge
        const RIGHT = 8;
    }
}

impl Edges {
    /// Decode an anchor or gravity value as sent by a client of the given shell variant
    ///
    /// The stable shell sends an enumeration, the v6 shell a bitmask in which opposite edges
    /// are mutually exclusive.
    pub fn decode(variant: ShellVariant, raw: u32) -> Result<Edges, PositionerError> {
        match variant {
            ShellVariant::Stable => match raw {
                0 => Ok(Edges::empty()),
                1 => Ok(Edges::TOP),
                2 => Ok(Edges::BOTTOM),
                3 => Ok(Edges::LEFT),
                4 => Ok(Edges::RIGHT),
                5 => Ok(Edges::TOP | Edges::LEFT),
                6 => Ok(Edges::BOTTOM | Edges::LEFT),
                7 => Ok(Edges::TOP | Edges::RIGHT),
                8 => Ok(Edges::BOTTOM | Edges::RIGHT),
                _ => Err(PositionerError::InvalidEdges(raw)),
            },
            ShellVariant::V6 => {
                let edges = Edges::from_bits(raw).ok_or(PositionerError::InvalidEdges(raw))?;
                if edges.contains(Edges::TOP | Edges::BOTTOM) || edges.contains(Edges::LEFT | Edges::RIGHT) {
                    return Err(PositionerError::ConflictingEdges(edges));
                }
                Ok(edges)
            }
        }
    }

    fn flip_x(self) -> Edges {
        let mut flipped = self - (Edges::LEFT | Edges::RIGHT);
        if self.contains(Edges::LEFT) {
            flipped |= Edges::RIGHT;
        }
        if self.contains(Edges::RIGHT) {
            flipped |= Edges::LEFT;
        }
        flipped
    }

    fn flip_y(self) -> Edges {
        let mut flipped = self - (Edges::TOP | Edges::BOTTOM);
        if self.contains(Edges::TOP) {
            flipped |= Edges::BOTTOM;
        }
        if self.contains(Edges::BOTTOM) {
            flipped |= Edges::TOP;
        }
        flipped
    }
}

bitflags::bitflags! {
    /// Adjustments the compositor may apply to a popup that does not fit its target area
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ConstraintAdjustment: u32 {
        /// Move the popup horizontally
        const SLIDE_X = 1;
        /// Move the popup vertically
        const SLIDE_Y = 2;
        /// Mirror the anchor and gravity horizontally
        const FLIP_X = 4;
        /// Mirror the anchor and gravity vertically
        const FLIP_Y = 8;
        /// Shrink the popup horizontally
        const RESIZE_X = 16;
        /// Shrink the popup vertically
        const RESIZE_Y = 32;
    }
}

/// Errors raised by invalid positioner requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PositionerError {
    /// The anchor or gravity is not a known value
    #[error("invalid anchor or gravity value {0}")]
    InvalidEdges(u32),
    /// The anchor or gravity contains two opposite edges
    #[error("edges {0:?} contain opposite edges")]
    ConflictingEdges(Edges),
    /// A size or anchor rectangle with an invalid size
    #[error("invalid size {width}x{height}")]
    InvalidSize {
        /// Requested width
        width: i32,
        /// Requested height
        height: i32,
    },
}

/// The state of a positioner, as set by the client
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PositionerState {
    /// Size of the rectangle that needs to be positioned
    pub rect_size: Size<i32, Logical>,
    /// Anchor rectangle in the parent surface coordinates relative to which the surface must be
    /// positioned
    pub anchor_rect: Rectangle<i32, Logical>,
    /// Edges defining the anchor point
    pub anchor_edges: Edges,
    /// Gravity direction for positioning the child surface relative to its anchor point
    pub gravity: Edges,
    /// Adjustments to do if previous criteria constrain the surface
    pub constraint_adjustment: ConstraintAdjustment,
    /// Offset placement relative to the anchor point
    pub offset: Point<i32, Logical>,
    /// Whether the popup should be repositioned when its parent moves
    pub reactive: bool,
    /// Size of the parent surface the positioner was computed against
    pub parent_size: Option<Size<i32, Logical>>,
    /// Serial of the parent configure the positioner was computed against
    pub parent_configure: Option<Serial>,
}

impl PositionerState {
    /// Whether a size was set on this positioner
    ///
    /// Popups can only be created from complete positioners.
    pub fn is_complete(&self) -> bool {
        self.rect_size.w > 0 && self.rect_size.h > 0
    }

    /// Get the anchor point on the anchor rectangle
    pub fn get_anchor_point(&self) -> Point<i32, Logical> {
        let rect = self.anchor_rect;
        let x = rect.loc.x
            + if self.anchor_edges.contains(Edges::LEFT) {
                0
            } else if self.anchor_edges.contains(Edges::RIGHT) {
                rect.size.w
            } else {
                rect.size.w / 2
            };
        let y = rect.loc.y
            + if self.anchor_edges.contains(Edges::TOP) {
                0
            } else if self.anchor_edges.contains(Edges::BOTTOM) {
                rect.size.h
            } else {
                rect.size.h / 2
            };
        (x, y).into()
    }

    /// Get the geometry of the popup, ignoring the constraint adjustments
    ///
    /// The location is relative to the window geometry of the parent surface.
    pub fn get_geometry(&self) -> Rectangle<i32, Logical> {
        let size = self.rect_size;
        let mut loc = self.get_anchor_point() + self.offset;

        if self.gravity.contains(Edges::LEFT) {
            loc.x -= size.w;
        } else if !self.gravity.contains(Edges::RIGHT) {
            loc.x -= size.w / 2;
        }
        if self.gravity.contains(Edges::TOP) {
            loc.y -= size.h;
        } else if !self.gravity.contains(Edges::BOTTOM) {
            loc.y -= size.h / 2;
        }

        Rectangle::new(loc, size)
    }

    /// Get the geometry of the popup after trying to fit it into `target`
    ///
    /// `target` is in the same coordinate space as the returned rectangle. Adjustments are
    /// applied per axis in the order flip, slide, resize. A flip is reverted if it does not
    /// remove the constraint.
    pub fn get_unconstrained_geometry(mut self, target: Rectangle<i32, Logical>) -> Rectangle<i32, Logical> {
        let mut geo = self.get_geometry();
        let (mut off_left, mut off_right, mut off_top, mut off_bottom) = compute_offsets(target, geo);

        if (off_left > 0 || off_right > 0) && self.constraint_adjustment.contains(ConstraintAdjustment::FLIP_X) {
            let mut flipped = self;
            flipped.anchor_edges = flipped.anchor_edges.flip_x();
            flipped.gravity = flipped.gravity.flip_x();
            let flipped_geo = flipped.get_geometry();
            let (new_left, new_right, _, _) = compute_offsets(target, flipped_geo);
            if new_left <= 0 && new_right <= 0 {
                self = flipped;
                geo = flipped_geo;
                off_left = 0;
                off_right = 0;
            }
        }

        if (off_top > 0 || off_bottom > 0) && self.constraint_adjustment.contains(ConstraintAdjustment::FLIP_Y) {
            let mut flipped = self;
            flipped.anchor_edges = flipped.anchor_edges.flip_y();
            flipped.gravity = flipped.gravity.flip_y();
            let flipped_geo = flipped.get_geometry();
            let (_, _, new_top, new_bottom) = compute_offsets(target, flipped_geo);
            if new_top <= 0 && new_bottom <= 0 {
                geo = flipped_geo;
                off_top = 0;
                off_bottom = 0;
            }
        }

        if (off_left > 0 || off_right > 0) && self.constraint_adjustment.contains(ConstraintAdjustment::SLIDE_X) {
            // keep the left edge visible, a resize can then fix the right one
            if off_left > 0 {
                geo.loc.x += off_left;
            } else if off_right > 0 {
                geo.loc.x -= min(off_right, -off_left);
            }
            (_, off_right, _, _) = compute_offsets(target, geo);
        }

        if (off_top > 0 || off_bottom > 0) && self.constraint_adjustment.contains(ConstraintAdjustment::SLIDE_Y) {
            if off_top > 0 {
                geo.loc.y += off_top;
            } else if off_bottom > 0 {
                geo.loc.y -= min(off_bottom, -off_top);
            }
            (_, _, _, off_bottom) = compute_offsets(target, geo);
        }

        if off_right > 0 && off_right < geo.size.w && self.constraint_adjustment.contains(ConstraintAdjustment::RESIZE_X)
        {
            geo.size.w -= off_right;
        }

        if off_bottom > 0
            && off_bottom < geo.size.h
            && self.constraint_adjustment.contains(ConstraintAdjustment::RESIZE_Y)
        {
            geo.size.h -= off_bottom;
        }

        geo
    }
}

// How far `popup` overflows each edge of `target`, positive values being outside
fn compute_offsets(target: Rectangle<i32, Logical>, popup: Rectangle<i32, Logical>) -> (i32, i32, i32, i32) {
    let off_left = target.loc.x - popup.loc.x;
    let off_right = (popup.loc.x + popup.size.w) - (target.loc.x + target.size.w);
    let off_top = target.loc.y - popup.loc.y;
    let off_bottom = (popup.loc.y + popup.size.h) - (target.loc.y + target.size.h);
    (off_left, off_right, off_top, off_bottom)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positioner(anchor: Edges, gravity: Edges, adjustment: ConstraintAdjustment) -> PositionerState {
        PositionerState {
            rect_size: (100, 50).into(),
            anchor_rect: Rectangle::new((10, 10).into(), (20, 20).into()),
            anchor_edges: anchor,
            gravity,
            constraint_adjustment: adjustment,
            ..Default::default()
        }
    }

    #[test]
    fn stable_edges_are_an_enumeration() {
        assert_eq!(Edges::decode(ShellVariant::Stable, 0), Ok(Edges::empty()));
        assert_eq!(Edges::decode(ShellVariant::Stable, 3), Ok(Edges::LEFT));
        assert_eq!(
            Edges::decode(ShellVariant::Stable, 8),
            Ok(Edges::BOTTOM | Edges::RIGHT)
        );
        assert_eq!(
            Edges::decode(ShellVariant::Stable, 9),
            Err(PositionerError::InvalidEdges(9))
        );
    }

    #[test]
    fn v6_edges_are_a_bitmask() {
        assert_eq!(
            Edges::decode(ShellVariant::V6, 1 | 8),
            Ok(Edges::TOP | Edges::RIGHT)
        );
        assert_eq!(
            Edges::decode(ShellVariant::V6, 1 | 2),
            Err(PositionerError::ConflictingEdges(Edges::TOP | Edges::BOTTOM))
        );
        assert_eq!(
            Edges::decode(ShellVariant::V6, 4 | 8),
            Err(PositionerError::ConflictingEdges(Edges::LEFT | Edges::RIGHT))
        );
        assert_eq!(
            Edges::decode(ShellVariant::V6, 16),
            Err(PositionerError::InvalidEdges(16))
        );
    }

    #[test]
    fn flipping_swaps_opposite_edges() {
        assert_eq!((Edges::TOP | Edges::LEFT).flip_x(), Edges::TOP | Edges::RIGHT);
        assert_eq!((Edges::TOP | Edges::LEFT).flip_y(), Edges::BOTTOM | Edges::LEFT);
        assert_eq!(Edges::empty().flip_x(), Edges::empty());
    }

    #[test]
    fn anchor_point_follows_edges() {
        let state = positioner(Edges::empty(), Edges::empty(), ConstraintAdjustment::empty());
        assert_eq!(state.get_anchor_point(), (20, 20).into());
        let state = positioner(Edges::BOTTOM | Edges::RIGHT, Edges::empty(), ConstraintAdjustment::empty());
        assert_eq!(state.get_anchor_point(), (30, 30).into());
        let state = positioner(Edges::TOP, Edges::empty(), ConstraintAdjustment::empty());
        assert_eq!(state.get_anchor_point(), (20, 10).into());
    }

    #[test]
    fn geometry_follows_gravity_and_offset() {
        let mut state = positioner(Edges::BOTTOM | Edges::LEFT, Edges::BOTTOM | Edges::RIGHT, ConstraintAdjustment::empty());
        assert_eq!(state.get_geometry(), Rectangle::new((10, 30).into(), (100, 50).into()));

        state.gravity = Edges::TOP | Edges::LEFT;
        state.offset = (5, -5).into();
        assert_eq!(state.get_geometry(), Rectangle::new((-85, -25).into(), (100, 50).into()));

        state.gravity = Edges::empty();
        state.offset = (0, 0).into();
        assert_eq!(state.get_geometry(), Rectangle::new((-40, 5).into(), (100, 50).into()));
    }

    #[test]
    fn unconstrained_geometry_flips_when_it_helps() {
        // a popup growing right from the right edge of a 200 wide area overflows
        let mut state = positioner(Edges::RIGHT, Edges::RIGHT, ConstraintAdjustment::FLIP_X);
        state.anchor_rect = Rectangle::new((150, 10).into(), (20, 20).into());
        let target = Rectangle::new((0, 0).into(), (200, 200).into());
        assert_eq!(state.get_geometry().loc.x, 170);
        assert_eq!(
            state.get_unconstrained_geometry(target),
            Rectangle::new((50, -5).into(), (100, 50).into())
        );
    }

    #[test]
    fn unconstrained_geometry_reverts_useless_flips() {
        let mut state = positioner(Edges::RIGHT, Edges::RIGHT, ConstraintAdjustment::FLIP_X);
        state.anchor_rect = Rectangle::new((50, 10).into(), (20, 20).into());
        let target = Rectangle::new((0, 0).into(), (120, 200).into());
        // flipped it would start at -50, still constrained
        assert_eq!(state.get_unconstrained_geometry(target), state.get_geometry());
    }

    #[test]
    fn unconstrained_geometry_slides_then_resizes() {
        let state = positioner(
            Edges::BOTTOM | Edges::RIGHT,
            Edges::BOTTOM | Edges::RIGHT,
            ConstraintAdjustment::SLIDE_X | ConstraintAdjustment::RESIZE_Y,
        );
        let target = Rectangle::new((0, 0).into(), (110, 60).into());
        // (30, 30) 100x50 overflows right by 20 and bottom by 20
        assert_eq!(
            state.get_unconstrained_geometry(target),
            Rectangle::new((10, 30).into(), (100, 30).into())
        );
    }

    #[test]
    fn unconstrained_geometry_slides_left_edge_into_view() {
        let state = positioner(Edges::LEFT, Edges::LEFT, ConstraintAdjustment::SLIDE_X);
        let target = Rectangle::new((0, 0).into(), (300, 300).into());
        let geo = state.get_unconstrained_geometry(target);
        assert_eq!(geo.loc.x, 0);
        assert_eq!(geo.size, (100, 50).into());
    }

    #[test]
    fn completeness_requires_a_size() {
        assert!(!PositionerState::default().is_complete());
        let state = positioner(Edges::empty(), Edges::empty(), ConstraintAdjustment::empty());
        assert!(state.is_complete());
    }
}

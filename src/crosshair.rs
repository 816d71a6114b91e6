//! Crosshair overlays: on each view, where the other two views are slicing.

use glam::Vec2;

use crate::enums::Orientation;
use crate::volume::Dimensions;

/// RGB colour per orientation; a line takes the colour of the view it stands for.
pub const fn orientation_color(orientation: Orientation) -> [u8; 3] {
    match orientation {
        Orientation::Axial => [230, 60, 60],
        Orientation::Sagittal => [230, 210, 60],
        Orientation::Coronal => [60, 200, 90],
    }
}

/// Map a slice index to plane-local [-1, 1].
pub fn normalized_position(index: usize, axis_size: usize) -> f32 {
    if axis_size <= 1 {
        return 0.0;
    }
    let index = index.min(axis_size - 1);
    2.0 * index as f32 / (axis_size - 1) as f32 - 1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineDirection {
    /// Constant x, spans the plane's height.
    Vertical,
    /// Constant y, spans the plane's width.
    Horizontal,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrosshairLine {
    /// The view whose slice this line marks.
    pub source: Orientation,
    pub direction: LineDirection,
    pub start: Vec2,
    pub end: Vec2,
    pub color: [u8; 3],
}

impl CrosshairLine {
    /// Plane-local endpoints scaled by the plane's half extents.
    pub fn to_world(&self, half_extent: Vec2) -> (Vec2, Vec2) {
        (self.start * half_extent, self.end * half_extent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crosshair {
    pub view: Orientation,
    pub lines: [CrosshairLine; 2],
}

/// Compute the overlay for `view` from scratch.
///
/// `slice_indices` is indexed by [`Orientation::index`].
pub fn crosshair_for(view: Orientation, slice_indices: [usize; 3], dims: Dimensions) -> Crosshair {
    let (width_axis, height_axis) = view.plane_axes();
    let lines = view.others().map(|source| {
        let depth_axis = source.depth_axis();
        let position = normalized_position(
            slice_indices[source.index()],
            dims.axis(depth_axis),
        );
        let (direction, start, end) = if depth_axis == width_axis {
            (
                LineDirection::Vertical,
                Vec2::new(position, -1.0),
                Vec2::new(position, 1.0),
            )
        } else {
            debug_assert_eq!(depth_axis, height_axis);
            (
                LineDirection::Horizontal,
                Vec2::new(-1.0, position),
                Vec2::new(1.0, position),
            )
        };
        CrosshairLine {
            source,
            direction,
            start,
            end,
            color: orientation_color(source),
        }
    });
    Crosshair { view, lines }
}

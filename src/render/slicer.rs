//! View-aligned slice generation.
//!
//! The volume is drawn as a stack of axis-aligned quads perpendicular to the
//! axis most parallel to the view direction, ordered back to front.

use glam::Vec3;

use super::backend::{DrawCall, Vertex};
use super::texture::TextureMediator;

/// Slices for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceGeometry {
    pub axis: usize,
    /// Slices run from low to high coordinates along `axis`.
    pub ascending: bool,
    pub draws: Vec<DrawCall>,
}

/// Index of the largest `|view[i]|`. Ties go to the lower axis.
pub fn principal_axis(view: Vec3) -> usize {
    let abs = view.abs();
    let mut axis = 0;
    for i in 1..3 {
        if abs[i] > abs[axis] {
            axis = i;
        }
    }
    axis
}

/// Number of voxel-centered slices along an axis of `extent` micrometers.
pub fn slice_count(extent: f32, voxel: f32) -> usize {
    if voxel.is_nan() || voxel <= 0.0 || !extent.is_finite() {
        return 1;
    }
    ((extent / voxel).round() as usize).max(1)
}

/// Build the slice stack for `view`, the unit vector from focus toward eye.
///
/// Quads extend one voxel past the volume on both in-plane axes. Their
/// texture coordinates are the linear mapping from `mediator`, so they fall
/// outside `[0, 1]` on the overhang and the sampler clamps them to the edge.
pub fn build_slices(view: Vec3, mediator: &TextureMediator) -> SliceGeometry {
    let axis = principal_axis(view);
    // The eye sits on the positive side when view[axis] > 0, so the far
    // slices are the low ones.
    let ascending = view[axis] > 0.0;

    let Some(buffer) = mediator.buffer() else {
        return SliceGeometry {
            axis,
            ascending,
            draws: Vec::new(),
        };
    };

    let extent = Vec3::from(buffer.volume_micrometers());
    let voxel = Vec3::from(buffer.voxel_micrometers());
    let b = (axis + 1) % 3;
    let c = (axis + 2) % 3;
    let (b0, b1) = (-voxel[b], extent[b] + voxel[b]);
    let (c0, c1) = (-voxel[c], extent[c] + voxel[c]);

    let count = slice_count(extent[axis], voxel[axis]);
    let mut draws = Vec::with_capacity(count);
    for step in 0..count {
        let index = if ascending { step } else { count - 1 - step };
        let depth = (index as f32 + 0.5) * voxel[axis];

        let corner = |u: f32, v: f32| {
            let mut p = Vec3::ZERO;
            p[axis] = depth;
            p[b] = u;
            p[c] = v;
            Vertex {
                position: p.to_array(),
                tex_coord: mediator.linear_coordinate(p).to_array(),
            }
        };
        draws.push(DrawCall {
            vertices: [corner(b0, c0), corner(b1, c0), corner(b0, c1), corner(b1, c1)],
        });
    }

    SliceGeometry {
        axis,
        ascending,
        draws,
    }
}

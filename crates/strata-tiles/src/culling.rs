//! View-frustum culling with hierarchical plane masks.
//!
//! The six planes are extracted from the camera's view-projection matrix.
//! A child tile is tested only against planes its parent straddled: once a
//! parent is fully inside a plane, every descendant is too.

use glam::{DMat4, DVec4};

use crate::bounds::{BoundingVolume, Intersect};

const LEFT: usize = 0;
const RIGHT: usize = 1;
const BOTTOM: usize = 2;
const TOP: usize = 3;
const NEAR: usize = 4;
const FAR: usize = 5;

/// Bit set of culling planes a volume still straddles.
///
/// Bit `k` set means plane `k` must still be tested for descendants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PlaneMask(pub u32);

impl PlaneMask {
    /// The volume is entirely outside.
    pub const OUTSIDE: Self = Self(u32::MAX);
    /// The volume is entirely inside every plane.
    pub const INSIDE: Self = Self(0);
    /// Nothing is known yet; every plane must be tested.
    pub const INDETERMINATE: Self = Self(0x7fff_ffff);

    /// The volume is outside at least one plane.
    pub fn is_outside(self) -> bool {
        self == Self::OUTSIDE
    }
}

/// Six inward-facing planes bounding the visible region.
#[derive(Clone, Debug)]
pub struct CullingVolume {
    /// Each `Vec4(a, b, c, d)` has a unit inward normal `(a, b, c)`.
    planes: [DVec4; 6],
}

impl CullingVolume {
    /// Extract planes from a view-projection matrix with a `[0, 1]` clip
    /// depth range (Griggs-Hartmann).
    pub fn from_view_projection(vp: &DMat4) -> Self {
        let rows = [vp.row(0), vp.row(1), vp.row(2), vp.row(3)];

        let mut planes = [DVec4::ZERO; 6];
        planes[LEFT] = rows[3] + rows[0];
        planes[RIGHT] = rows[3] - rows[0];
        planes[BOTTOM] = rows[3] + rows[1];
        planes[TOP] = rows[3] - rows[1];
        planes[NEAR] = rows[2];
        planes[FAR] = rows[3] - rows[2];

        for plane in &mut planes {
            let len = plane.truncate().length();
            if len > 0.0 {
                *plane /= len;
            }
        }

        Self { planes }
    }

    /// Build from explicit planes (normals pointing inward).
    pub fn from_planes(planes: [DVec4; 6]) -> Self {
        Self { planes }
    }

    /// Classify a volume against all planes.
    pub fn visibility(&self, volume: &BoundingVolume) -> Intersect {
        let mut intersecting = false;
        for plane in &self.planes {
            match volume.intersect_plane(*plane) {
                Intersect::Outside => return Intersect::Outside,
                Intersect::Intersecting => intersecting = true,
                Intersect::Inside => {}
            }
        }
        if intersecting {
            Intersect::Intersecting
        } else {
            Intersect::Inside
        }
    }

    /// Classify a volume, skipping planes the parent was already inside.
    pub fn visibility_with_plane_mask(
        &self,
        volume: &BoundingVolume,
        parent_mask: PlaneMask,
    ) -> PlaneMask {
        if parent_mask == PlaneMask::OUTSIDE || parent_mask == PlaneMask::INSIDE {
            return parent_mask;
        }

        let mut mask = PlaneMask::INSIDE.0;
        for (k, plane) in self.planes.iter().enumerate() {
            let flag = 1u32 << k;
            if parent_mask.0 & flag == 0 {
                continue;
            }
            match volume.intersect_plane(*plane) {
                Intersect::Outside => return PlaneMask::OUTSIDE,
                Intersect::Intersecting => mask |= flag,
                Intersect::Inside => {}
            }
        }
        PlaneMask(mask)
    }
}

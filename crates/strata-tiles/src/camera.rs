//! Per-frame camera description consumed by traversal.

use glam::{DMat4, DVec3};

use crate::culling::CullingVolume;

/// Projection used to turn geometric error into pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Projection {
    /// Perspective projection.
    Perspective {
        /// Vertical field of view in radians.
        fov_y: f64,
    },
    /// Orthographic projection.
    Orthographic {
        /// Width of the view volume in world units.
        width: f64,
    },
}

/// Camera state for one frame, in the tileset's world frame.
#[derive(Clone, Debug)]
pub struct FrameCamera {
    /// Eye position.
    pub position: DVec3,
    /// Unit view direction.
    pub direction: DVec3,
    /// Unit up vector.
    pub up: DVec3,
    pub projection: Projection,
    /// Near clip distance (positive).
    pub near: f64,
    /// Far clip distance (positive, > near).
    pub far: f64,
    /// Drawing buffer width in pixels.
    pub viewport_width: u32,
    /// Drawing buffer height in pixels.
    pub viewport_height: u32,
}

impl FrameCamera {
    /// Perspective camera at `position` looking at `target`.
    pub fn look_at(
        position: DVec3,
        target: DVec3,
        up: DVec3,
        fov_y: f64,
        viewport_width: u32,
        viewport_height: u32,
    ) -> Self {
        let direction = (target - position).normalize_or_zero();
        let right = direction.cross(up).normalize_or_zero();
        let up = right.cross(direction).normalize_or_zero();
        Self {
            position,
            direction,
            up,
            projection: Projection::Perspective { fov_y },
            near: 1.0,
            far: 1.0e9,
            viewport_width,
            viewport_height,
        }
    }

    /// Viewport width over height.
    pub fn aspect_ratio(&self) -> f64 {
        self.viewport_width.max(1) as f64 / self.viewport_height.max(1) as f64
    }

    /// World-to-eye transform.
    pub fn view_matrix(&self) -> DMat4 {
        DMat4::look_to_rh(self.position, self.direction, self.up)
    }

    /// Eye-to-clip transform for the configured projection.
    pub fn projection_matrix(&self) -> DMat4 {
        match self.projection {
            Projection::Perspective { fov_y } => {
                DMat4::perspective_rh(fov_y, self.aspect_ratio(), self.near, self.far)
            }
            Projection::Orthographic { width } => {
                let half_w = 0.5 * width;
                let half_h = half_w / self.aspect_ratio();
                DMat4::orthographic_rh(-half_w, half_w, -half_h, half_h, self.near, self.far)
            }
        }
    }

    /// World-to-clip transform.
    pub fn view_projection(&self) -> DMat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Frustum planes for this frame.
    pub fn culling_volume(&self) -> CullingVolume {
        CullingVolume::from_view_projection(&self.view_projection())
    }

    /// `2 * tan(fov_y / 2)`, the perspective SSE denominator.
    pub fn sse_denominator(&self) -> f64 {
        match self.projection {
            Projection::Perspective { fov_y } => 2.0 * (0.5 * fov_y).tan(),
            Projection::Orthographic { .. } => 0.0,
        }
    }

    /// Project a world-space error at `distance` into pixels.
    pub fn project_error(&self, geometric_error: f64, distance: f64) -> f64 {
        match self.projection {
            Projection::Perspective { .. } => {
                let distance = distance.max(1e-7);
                geometric_error * self.viewport_height as f64 / (distance * self.sse_denominator())
            }
            Projection::Orthographic { width } => {
                let height = width / self.aspect_ratio();
                let pixel_size = width.max(height)
                    / self.viewport_width.max(self.viewport_height).max(1) as f64;
                geometric_error / pixel_size
            }
        }
    }
}

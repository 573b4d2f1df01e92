//! Horizon-dependent relaxation of the screen-space-error target.
//!
//! When the camera sits low over the tileset and looks towards the horizon,
//! distant tiles are mostly hidden by nearer ones. A fog-like density term
//! grows with distance and is subtracted from each tile's projected error,
//! so far tiles refine less. Looking straight down, or flying high above the
//! tileset, disables the effect.

use glam::{DMat4, DVec3};

use crate::bounds::BoundingVolume;
use crate::camera::FrameCamera;
use crate::ellipsoid::{Cartographic, WGS84_B};

/// User-facing knobs for the dynamic term.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DynamicSseSettings {
    /// Fog density at full strength.
    pub density: f64,
    /// Pixels of error removed at full fog.
    pub factor: f64,
    /// Fraction of the height band below which the effect is at full strength.
    pub height_falloff: f64,
}

impl Default for DynamicSseSettings {
    fn default() -> Self {
        Self {
            density: 2.0e-4,
            factor: 4.0,
            height_falloff: 0.25,
        }
    }
}

/// The per-frame term consumed by the screen-space-error test.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DynamicSseTerm {
    /// Density after the horizon and height attenuation.
    pub density: f64,
    pub factor: f64,
}

impl DynamicSseTerm {
    /// Pixels to subtract from the projected error of a tile at `distance`.
    pub fn reduction(&self, distance: f64) -> f64 {
        fog(distance, self.density) * self.factor
    }
}

/// `1 - exp(-(distance * density)^2)`, in `[0, 1)`.
pub fn fog(distance: f64, density: f64) -> f64 {
    let scalar = distance * density;
    1.0 - (-(scalar * scalar)).exp()
}

/// Up axis, camera height and height band in which pitch and altitude are measured.
#[derive(Clone, Copy, Debug, PartialEq)]
struct HeightFrame {
    up: DVec3,
    direction: DVec3,
    height: f64,
    minimum_height: f64,
    maximum_height: f64,
}

/// Compute the density term for this frame from the root's local bounds and
/// world transform.
pub fn compute_term(
    root_local_volume: &BoundingVolume,
    root_transform: &DMat4,
    camera: &FrameCamera,
    settings: &DynamicSseSettings,
) -> DynamicSseTerm {
    let frame = height_frame(root_local_volume, root_transform, camera);

    let height_close =
        frame.minimum_height + (frame.maximum_height - frame.minimum_height) * settings.height_falloff;
    let height_far = frame.maximum_height;
    let span = height_far - height_close;
    let t = if span > 0.0 {
        ((frame.height - height_close) / span).clamp(0.0, 1.0)
    } else if frame.height > height_far {
        1.0
    } else {
        0.0
    };

    let horizon_factor = (1.0 - frame.direction.dot(frame.up).abs()) * (1.0 - t);
    DynamicSseTerm {
        density: settings.density * horizon_factor,
        factor: settings.factor,
    }
}

fn height_frame(volume: &BoundingVolume, transform: &DMat4, camera: &FrameCamera) -> HeightFrame {
    let geocentric = |minimum_height: f64, maximum_height: f64| HeightFrame {
        up: camera.position.normalize_or_zero(),
        direction: camera.direction,
        height: Cartographic::from_cartesian(camera.position).map_or(0.0, |c| c.height),
        minimum_height,
        maximum_height,
    };

    if let BoundingVolume::Region(region) = volume {
        return geocentric(region.minimum_height, region.maximum_height);
    }

    let center = volume.center();
    if center.length() > WGS84_B {
        // Earth-fixed coordinates; approximate the band from the centre height.
        let center_height = Cartographic::from_cartesian(center).map_or(0.0, |c| c.height);
        return geocentric(0.0, center_height * 2.0);
    }

    // Local z-up coordinates.
    let to_local = transform.inverse();
    let position = to_local.transform_point3(camera.position);
    let direction = to_local.transform_vector3(camera.direction).normalize_or_zero();
    let half_height = match volume {
        BoundingVolume::Box(b) => b.half_axes.z_axis.z.abs(),
        _ => volume.radius(),
    };
    HeightFrame {
        up: DVec3::Z,
        direction,
        height: position.z,
        minimum_height: center.z - half_height,
        maximum_height: center.z + half_height,
    }
}

//! Scripted descent toward the tileset used to drive the frame loop.

use glam::DVec3;
use strata_config::ViewConfig;
use strata_tiles::FrameCamera;

/// Positions farther than this from the origin are treated as geocentric.
const GEOCENTRIC_THRESHOLD_M: f64 = 1.0e6;

/// Straight descent onto `target`, looking down, with the distance
/// shrinking geometrically from start to end.
#[derive(Clone, Debug)]
pub struct CameraFlight {
    target: DVec3,
    up: DVec3,
    start_distance: f64,
    end_distance: f64,
    frames: u32,
    fov_y: f64,
    width: u32,
    height: u32,
}

impl CameraFlight {
    pub fn new(target: DVec3, view: &ViewConfig) -> Self {
        // Local tilesets are Z-up; geocentric ones use the radial direction.
        let up = if target.length() > GEOCENTRIC_THRESHOLD_M {
            target.normalize()
        } else {
            DVec3::Z
        };
        Self {
            target,
            up,
            start_distance: view.start_distance_m.max(1.0),
            end_distance: view.end_distance_m.max(1.0),
            frames: view.flight_frames,
            fov_y: view.fov_y_degrees.to_radians(),
            width: view.width,
            height: view.height,
        }
    }

    /// Distance from the target at `frame`.
    pub fn distance_at(&self, frame: u32) -> f64 {
        let t = if self.frames > 1 {
            f64::from(frame.min(self.frames - 1)) / f64::from(self.frames - 1)
        } else {
            0.0
        };
        self.start_distance * (self.end_distance / self.start_distance).powf(t)
    }

    pub fn camera_at(&self, frame: u32) -> FrameCamera {
        let position = self.target + self.up * self.distance_at(frame);
        // Any axis not parallel to the view direction works as screen-up.
        let screen_up = if self.up.dot(DVec3::Z).abs() > 0.99 {
            DVec3::Y
        } else {
            DVec3::Z
        };
        FrameCamera::look_at(position, self.target, screen_up, self.fov_y, self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(frames: u32) -> ViewConfig {
        ViewConfig {
            flight_frames: frames,
            start_distance_m: 1000.0,
            end_distance_m: 10.0,
            ..ViewConfig::default()
        }
    }

    /// The flight starts and ends at the configured distances.
    #[test]
    fn test_distance_endpoints() {
        let flight = CameraFlight::new(DVec3::ZERO, &view(3));
        assert!((flight.distance_at(0) - 1000.0).abs() < 1e-9);
        assert!((flight.distance_at(1) - 100.0).abs() < 1e-9);
        assert!((flight.distance_at(2) - 10.0).abs() < 1e-9);
        assert!((flight.distance_at(50) - 10.0).abs() < 1e-9);
    }

    /// A single-frame flight stays at the start distance.
    #[test]
    fn test_single_frame() {
        let flight = CameraFlight::new(DVec3::ZERO, &view(1));
        assert_eq!(flight.distance_at(0), 1000.0);
    }

    /// Local targets are approached from +Z, geocentric ones radially.
    #[test]
    fn test_camera_looks_at_target() {
        let flight = CameraFlight::new(DVec3::ZERO, &view(2));
        let camera = flight.camera_at(0);
        assert!((camera.position - DVec3::new(0.0, 0.0, 1000.0)).length() < 1e-9);
        assert!((camera.direction + DVec3::Z).length() < 1e-9);

        let target = DVec3::new(6_378_137.0, 0.0, 0.0);
        let flight = CameraFlight::new(target, &view(2));
        let camera = flight.camera_at(0);
        assert!((camera.position - target - DVec3::new(1000.0, 0.0, 0.0)).length() < 1e-6);
        assert!((camera.direction + DVec3::X).length() < 1e-9);
    }
}

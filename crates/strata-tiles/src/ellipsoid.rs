//! WGS84 ellipsoid helpers used by geographic bounding regions and the
//! dynamic screen-space-error height band.

use glam::{DMat3, DVec3};

/// WGS84 semi-major axis in metres.
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS84 semi-minor axis in metres.
pub const WGS84_B: f64 = 6_356_752.314_245_179;
/// First eccentricity squared.
const E2: f64 = 0.006_694_379_990_14;

/// Geodetic coordinates: longitude/latitude in radians, height in metres.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cartographic {
    pub longitude: f64,
    pub latitude: f64,
    pub height: f64,
}

impl Cartographic {
    pub fn new(longitude: f64, latitude: f64, height: f64) -> Self {
        Self {
            longitude,
            latitude,
            height,
        }
    }

    /// Earth-centred, earth-fixed position of these coordinates.
    pub fn to_cartesian(&self) -> DVec3 {
        let (sin_lat, cos_lat) = self.latitude.sin_cos();
        let (sin_lon, cos_lon) = self.longitude.sin_cos();
        let n = WGS84_A / (1.0 - E2 * sin_lat * sin_lat).sqrt();
        DVec3::new(
            (n + self.height) * cos_lat * cos_lon,
            (n + self.height) * cos_lat * sin_lon,
            (n * (1.0 - E2) + self.height) * sin_lat,
        )
    }

    /// Convert an ECEF position back to geodetic coordinates.
    ///
    /// Returns `None` near the centre of the ellipsoid, where the
    /// conversion is undefined.
    pub fn from_cartesian(p: DVec3) -> Option<Self> {
        let horizontal = (p.x * p.x + p.y * p.y).sqrt();
        if horizontal < 1e-3 && p.z.abs() < 1e-3 {
            return None;
        }
        let longitude = p.y.atan2(p.x);
        let mut latitude = p.z.atan2(horizontal * (1.0 - E2));
        let mut height = 0.0;
        // Fixed-point iteration converges to millimetres within a few steps.
        for _ in 0..6 {
            let sin_lat = latitude.sin();
            let n = WGS84_A / (1.0 - E2 * sin_lat * sin_lat).sqrt();
            let cos_lat = latitude.cos();
            height = if cos_lat.abs() > 1e-10 {
                horizontal / cos_lat - n
            } else {
                p.z.abs() - WGS84_B
            };
            latitude = p.z.atan2(horizontal * (1.0 - E2 * n / (n + height)));
        }
        Some(Self {
            longitude,
            latitude,
            height,
        })
    }
}

/// Unit normal of the ellipsoid surface below `p`.
pub fn geodetic_surface_normal(p: DVec3) -> DVec3 {
    let inv_a2 = 1.0 / (WGS84_A * WGS84_A);
    let inv_b2 = 1.0 / (WGS84_B * WGS84_B);
    DVec3::new(p.x * inv_a2, p.y * inv_a2, p.z * inv_b2).normalize_or_zero()
}

/// Rotation whose columns are the east, north and up axes at `origin`.
pub fn east_north_up(origin: DVec3) -> DMat3 {
    let up = geodetic_surface_normal(origin);
    if up == DVec3::ZERO {
        return DMat3::IDENTITY;
    }
    let mut east = DVec3::new(-origin.y, origin.x, 0.0).normalize_or_zero();
    if east == DVec3::ZERO {
        // At a pole the east direction is arbitrary.
        east = DVec3::Y;
    }
    let north = up.cross(east);
    DMat3::from_cols(east, north, up)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Converting to ECEF and back preserves the coordinates.
    #[test]
    fn test_cartographic_round_trip() {
        let c = Cartographic::new(0.3, 0.7, 1234.5);
        let back = Cartographic::from_cartesian(c.to_cartesian()).unwrap();
        assert!((back.longitude - c.longitude).abs() < 1e-9);
        assert!((back.latitude - c.latitude).abs() < 1e-9);
        assert!((back.height - c.height).abs() < 1e-3, "height {}", back.height);
    }

    /// A point on the equator at zero height lies at the semi-major axis.
    #[test]
    fn test_equator_position() {
        let p = Cartographic::new(0.0, 0.0, 0.0).to_cartesian();
        assert!((p.x - WGS84_A).abs() < 1e-6);
        assert!(p.y.abs() < 1e-6 && p.z.abs() < 1e-6);
    }

    /// The ENU frame is orthonormal and `up` matches the surface normal.
    #[test]
    fn test_enu_frame_orthonormal() {
        let origin = Cartographic::new(1.0, -0.4, 0.0).to_cartesian();
        let enu = east_north_up(origin);
        assert!(enu.x_axis.dot(enu.y_axis).abs() < 1e-12);
        assert!(enu.y_axis.dot(enu.z_axis).abs() < 1e-12);
        assert!((enu.z_axis - geodetic_surface_normal(origin)).length() < 1e-12);
    }

    /// The centre of the earth has no geodetic coordinates.
    #[test]
    fn test_center_has_no_cartographic() {
        assert!(Cartographic::from_cartesian(DVec3::ZERO).is_none());
    }
}

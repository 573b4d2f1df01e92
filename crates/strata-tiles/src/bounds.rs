//! World-space bounding volumes for tiles: oriented boxes, spheres, and
//! geographic regions.
//!
//! Every volume answers the three questions traversal asks of it: how far
//! is a point, which side of a culling plane is it on, and what does it
//! look like after a transform.

use glam::{DMat3, DMat4, DVec3, DVec4};

use crate::ellipsoid::{Cartographic, east_north_up};

/// Result of classifying a volume against a plane or a culling volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intersect {
    /// Entirely on the inner side.
    Inside,
    /// Entirely on the outer side.
    Outside,
    /// Straddles the plane.
    Intersecting,
}

/// Sphere given by centre and radius.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingSphere {
    pub center: DVec3,
    pub radius: f64,
}

/// Box given by a centre and three half-axis vectors (the matrix columns).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrientedBox {
    pub center: DVec3,
    pub half_axes: DMat3,
}

/// Geographic region on the WGS84 ellipsoid, with a precomputed enclosing
/// oriented box used for distance and culling.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingRegion {
    /// West longitude in radians.
    pub west: f64,
    /// South latitude in radians.
    pub south: f64,
    /// East longitude in radians.
    pub east: f64,
    /// North latitude in radians.
    pub north: f64,
    /// Minimum height above the ellipsoid, metres.
    pub minimum_height: f64,
    /// Maximum height above the ellipsoid, metres.
    pub maximum_height: f64,
    enclosing: OrientedBox,
}

/// Any of the three bounding volume shapes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BoundingVolume {
    Box(OrientedBox),
    Sphere(BoundingSphere),
    Region(BoundingRegion),
}

impl BoundingSphere {
    pub fn new(center: DVec3, radius: f64) -> Self {
        Self { center, radius }
    }

    fn distance_to_point(&self, p: DVec3) -> f64 {
        ((p - self.center).length() - self.radius).max(0.0)
    }

    fn intersect_plane(&self, plane: DVec4) -> Intersect {
        let d = plane.truncate().dot(self.center) + plane.w;
        if d < -self.radius {
            Intersect::Outside
        } else if d < self.radius {
            Intersect::Intersecting
        } else {
            Intersect::Inside
        }
    }
}

impl OrientedBox {
    pub fn new(center: DVec3, half_axes: DMat3) -> Self {
        Self { center, half_axes }
    }

    /// Axis-aligned box from a centre and half extents.
    pub fn from_extents(center: DVec3, half_extents: DVec3) -> Self {
        Self {
            center,
            half_axes: DMat3::from_diagonal(half_extents),
        }
    }

    /// Radius of the sphere enclosing the box.
    pub fn bounding_radius(&self) -> f64 {
        let (x, y, z) = (
            self.half_axes.x_axis,
            self.half_axes.y_axis,
            self.half_axes.z_axis,
        );
        [x + y + z, x + y - z, x - y + z, x - y - z]
            .iter()
            .map(|v| v.length())
            .fold(0.0, f64::max)
    }

    fn distance_to_point(&self, p: DVec3) -> f64 {
        let offset = p - self.center;
        let mut distance_squared = 0.0;
        for axis in [
            self.half_axes.x_axis,
            self.half_axes.y_axis,
            self.half_axes.z_axis,
        ] {
            let half_length = axis.length();
            if half_length == 0.0 {
                continue;
            }
            let projected = offset.dot(axis / half_length);
            let excess = projected.abs() - half_length;
            if excess > 0.0 {
                distance_squared += excess * excess;
            }
        }
        // A flat box (one zero axis) still has extent zero along its normal.
        if let Some(normal) = self.flat_normal() {
            let d = offset.dot(normal);
            distance_squared += d * d;
        }
        distance_squared.sqrt()
    }

    fn flat_normal(&self) -> Option<DVec3> {
        let (x, y, z) = (
            self.half_axes.x_axis,
            self.half_axes.y_axis,
            self.half_axes.z_axis,
        );
        match (x == DVec3::ZERO, y == DVec3::ZERO, z == DVec3::ZERO) {
            (true, false, false) => Some(y.cross(z).normalize()),
            (false, true, false) => Some(z.cross(x).normalize()),
            (false, false, true) => Some(x.cross(y).normalize()),
            _ => None,
        }
    }

    fn intersect_plane(&self, plane: DVec4) -> Intersect {
        let normal = plane.truncate();
        let effective_radius = normal.dot(self.half_axes.x_axis).abs()
            + normal.dot(self.half_axes.y_axis).abs()
            + normal.dot(self.half_axes.z_axis).abs();
        let d = normal.dot(self.center) + plane.w;
        if d <= -effective_radius {
            Intersect::Outside
        } else if d >= effective_radius {
            Intersect::Inside
        } else {
            Intersect::Intersecting
        }
    }

    fn transform(&self, m: &DMat4) -> Self {
        Self {
            center: m.transform_point3(self.center),
            half_axes: DMat3::from_mat4(*m) * self.half_axes,
        }
    }

    fn corners(&self) -> [DVec3; 8] {
        let (x, y, z) = (
            self.half_axes.x_axis,
            self.half_axes.y_axis,
            self.half_axes.z_axis,
        );
        let c = self.center;
        [
            c - x - y - z,
            c + x - y - z,
            c - x + y - z,
            c + x + y - z,
            c - x - y + z,
            c + x - y + z,
            c - x + y + z,
            c + x + y + z,
        ]
    }
}

impl BoundingRegion {
    /// Build a region from `[west, south, east, north, min_height, max_height]`.
    pub fn new(
        west: f64,
        south: f64,
        east: f64,
        north: f64,
        minimum_height: f64,
        maximum_height: f64,
    ) -> Self {
        let enclosing = enclosing_box(west, south, east, north, minimum_height, maximum_height);
        Self {
            west,
            south,
            east,
            north,
            minimum_height,
            maximum_height,
            enclosing,
        }
    }

    /// The oriented box that encloses the region.
    pub fn enclosing_box(&self) -> &OrientedBox {
        &self.enclosing
    }
}

/// Sample the region's corners and edge midpoints and fit a box in the
/// east-north-up frame at its centre.
fn enclosing_box(west: f64, south: f64, mut east: f64, north: f64, min_h: f64, max_h: f64) -> OrientedBox {
    if east < west {
        east += std::f64::consts::TAU;
    }
    let mid_lon = 0.5 * (west + east);
    let mid_lat = 0.5 * (south + north);
    let origin = Cartographic::new(mid_lon, mid_lat, 0.5 * (min_h + max_h)).to_cartesian();
    let frame = east_north_up(origin);
    let inverse = frame.transpose();

    let mut lo = DVec3::splat(f64::MAX);
    let mut hi = DVec3::splat(f64::MIN);
    for lon in [west, mid_lon, east] {
        for lat in [south, mid_lat, north] {
            for h in [min_h, max_h] {
                let local = inverse * (Cartographic::new(lon, lat, h).to_cartesian() - origin);
                lo = lo.min(local);
                hi = hi.max(local);
            }
        }
    }
    let local_center = 0.5 * (lo + hi);
    let half = 0.5 * (hi - lo);
    OrientedBox {
        center: origin + frame * local_center,
        half_axes: frame * DMat3::from_diagonal(half),
    }
}

impl BoundingVolume {
    /// Centre of the volume.
    pub fn center(&self) -> DVec3 {
        match self {
            Self::Box(b) => b.center,
            Self::Sphere(s) => s.center,
            Self::Region(r) => r.enclosing.center,
        }
    }

    /// Radius of a sphere enclosing the volume.
    pub fn radius(&self) -> f64 {
        match self {
            Self::Box(b) => b.bounding_radius(),
            Self::Sphere(s) => s.radius,
            Self::Region(r) => r.enclosing.bounding_radius(),
        }
    }

    /// Distance from `p` to the closest point of the volume; zero inside.
    pub fn distance_to_point(&self, p: DVec3) -> f64 {
        match self {
            Self::Box(b) => b.distance_to_point(p),
            Self::Sphere(s) => s.distance_to_point(p),
            Self::Region(r) => r.enclosing.distance_to_point(p),
        }
    }

    /// Whether `p` lies inside the volume.
    pub fn contains_point(&self, p: DVec3) -> bool {
        self.distance_to_point(p) == 0.0
    }

    /// Classify against a plane `(normal, d)` whose normal points inward.
    pub fn intersect_plane(&self, plane: DVec4) -> Intersect {
        match self {
            Self::Box(b) => b.intersect_plane(plane),
            Self::Sphere(s) => s.intersect_plane(plane),
            Self::Region(r) => r.enclosing.intersect_plane(plane),
        }
    }

    /// Apply an affine transform. Regions are absolute and are returned unchanged.
    pub fn transform(&self, m: &DMat4) -> Self {
        match self {
            Self::Box(b) => Self::Box(b.transform(m)),
            Self::Sphere(s) => {
                let scale = DMat3::from_mat4(*m);
                let max_scale = scale
                    .x_axis
                    .length()
                    .max(scale.y_axis.length())
                    .max(scale.z_axis.length());
                Self::Sphere(BoundingSphere {
                    center: m.transform_point3(s.center),
                    radius: s.radius * max_scale,
                })
            }
            Self::Region(_) => *self,
        }
    }

    /// Minimum and maximum height above the ellipsoid spanned by the volume.
    ///
    /// Regions report their declared band; other shapes use the height of
    /// their centre plus and minus their radius.
    pub fn height_band(&self) -> Option<(f64, f64)> {
        match self {
            Self::Region(r) => Some((r.minimum_height, r.maximum_height)),
            _ => {
                let center = Cartographic::from_cartesian(self.center())?;
                let radius = self.radius();
                Some((center.height - radius, center.height + radius))
            }
        }
    }

    /// Smallest axis-aligned box containing both volumes, as a new volume.
    pub fn union(&self, other: &BoundingVolume) -> BoundingVolume {
        let (lo_a, hi_a) = self.aabb();
        let (lo_b, hi_b) = other.aabb();
        let lo = lo_a.min(lo_b);
        let hi = hi_a.max(hi_b);
        BoundingVolume::Box(OrientedBox::from_extents(0.5 * (lo + hi), 0.5 * (hi - lo)))
    }

    /// Whether this volume lies inside `other`, tested on its extreme points.
    pub fn is_within(&self, other: &BoundingVolume) -> bool {
        let tolerance = 1e-6 * other.radius().max(1.0);
        let within = |p: &DVec3| other.distance_to_point(*p) <= tolerance;
        match self {
            Self::Sphere(s) => {
                let r = s.radius;
                [DVec3::X, DVec3::NEG_X, DVec3::Y, DVec3::NEG_Y, DVec3::Z, DVec3::NEG_Z]
                    .iter()
                    .all(|axis| within(&(s.center + *axis * r)))
            }
            Self::Box(b) => b.corners().iter().all(within),
            Self::Region(r) => r.enclosing.corners().iter().all(within),
        }
    }

    fn aabb(&self) -> (DVec3, DVec3) {
        match self {
            Self::Sphere(s) => (
                s.center - DVec3::splat(s.radius),
                s.center + DVec3::splat(s.radius),
            ),
            Self::Box(b) => corners_aabb(&b.corners()),
            Self::Region(r) => corners_aabb(&r.enclosing.corners()),
        }
    }
}

fn corners_aabb(corners: &[DVec3; 8]) -> (DVec3, DVec3) {
    corners.iter().fold(
        (DVec3::splat(f64::MAX), DVec3::splat(f64::MIN)),
        |(lo, hi), c| (lo.min(*c), hi.max(*c)),
    )
}

//! Spherical Web Mercator projection and the session-local frame.
//!
//! Tiles are addressed in Web Mercator. Rendering happens in a local frame
//! whose origin is a reference point picked once per session, so that
//! coordinates near the camera stay small enough for f32 shader math:
//!
//! - local `x` grows east
//! - local `y` is elevation
//! - local `z` grows south (the same direction as tile rows)

use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::tile::{TileRange, tiles_per_side};

/// WGS84 semi-major axis in meters, used as the sphere radius.
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Equatorial circumference of the Web Mercator sphere in meters.
pub const WORLD_CIRCUMFERENCE: f64 = 2.0 * std::f64::consts::PI * EARTH_RADIUS;

/// Latitude at which Web Mercator becomes square.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_6;

/// Convert longitude/latitude in degrees to mercator meters.
#[must_use]
pub fn lon_lat_to_mercator(lon_deg: f64, lat_deg: f64) -> DVec2 {
    let lat = lat_deg.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    DVec2::new(
        EARTH_RADIUS * lon_deg.to_radians(),
        EARTH_RADIUS * (std::f64::consts::FRAC_PI_4 + lat / 2.0).tan().ln(),
    )
}

/// Convert mercator meters to longitude/latitude in degrees.
#[must_use]
pub fn mercator_to_lon_lat(mercator: DVec2) -> (f64, f64) {
    let lon = (mercator.x / EARTH_RADIUS).to_degrees();
    let lat = (2.0 * (mercator.y / EARTH_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2)
        .to_degrees();
    (lon, lat)
}

/// Edge length of a tile at `zoom` in mercator meters.
#[must_use]
pub fn tile_size_meters(zoom: u8) -> f64 {
    WORLD_CIRCUMFERENCE / f64::from(tiles_per_side(zoom))
}

/// The session reference point that anchors the local frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectionReference {
    /// Reference point in mercator meters.
    pub origin: DVec2,
    /// Local units per mercator meter.
    pub units_per_meter: f64,
}

impl ProjectionReference {
    /// Anchor the local frame at a geographic position, one unit per meter.
    #[must_use]
    pub fn from_lon_lat(lon_deg: f64, lat_deg: f64) -> Self {
        Self {
            origin: lon_lat_to_mercator(lon_deg, lat_deg),
            units_per_meter: 1.0,
        }
    }
}

/// Axis-aligned rectangle on the local ground plane (`x`/`z`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalRect {
    /// North-west corner (smallest `x` and `z`).
    pub min: DVec2,
    /// South-east corner.
    pub max: DVec2,
}

impl LocalRect {
    #[must_use]
    pub fn center(&self) -> DVec2 {
        (self.min + self.max) * 0.5
    }

    /// Distance from `point` to the nearest point of the rectangle.
    #[must_use]
    pub fn distance_to(&self, point: DVec2) -> f64 {
        point.clamp(self.min, self.max).distance(point)
    }

    /// Distance from `point` to the farthest corner of the rectangle.
    #[must_use]
    pub fn farthest_distance(&self, point: DVec2) -> f64 {
        let dx = (point.x - self.min.x).abs().max((point.x - self.max.x).abs());
        let dz = (point.y - self.min.y).abs().max((point.y - self.max.y).abs());
        DVec2::new(dx, dz).length()
    }
}

/// Conversions between tiles, mercator meters and local units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    reference: ProjectionReference,
}

impl Projection {
    #[must_use]
    pub fn new(reference: ProjectionReference) -> Self {
        Self { reference }
    }

    #[must_use]
    pub fn reference(&self) -> ProjectionReference {
        self.reference
    }

    /// Mercator meters to local ground coordinates (`x`, `z`).
    #[must_use]
    pub fn mercator_to_local(&self, mercator: DVec2) -> DVec2 {
        let scale = self.reference.units_per_meter;
        DVec2::new(
            (mercator.x - self.reference.origin.x) * scale,
            (self.reference.origin.y - mercator.y) * scale,
        )
    }

    /// Local ground coordinates (`x`, `z`) to mercator meters.
    #[must_use]
    pub fn local_to_mercator(&self, local: DVec2) -> DVec2 {
        let scale = self.reference.units_per_meter;
        DVec2::new(
            local.x / scale + self.reference.origin.x,
            self.reference.origin.y - local.y / scale,
        )
    }

    /// Edge length of a tile at `zoom` in local units.
    #[must_use]
    pub fn tile_size_local(&self, zoom: u8) -> f64 {
        tile_size_meters(zoom) * self.reference.units_per_meter
    }

    /// Local ground position of the north-west corner of tile `(x, y)`.
    ///
    /// Evaluated entirely in f64 relative to the session reference; callers
    /// narrow to f32 only after this subtraction.
    #[must_use]
    pub fn tile_origin_local(&self, zoom: u8, x: u32, y: u32) -> DVec2 {
        let size = tile_size_meters(zoom);
        let half = WORLD_CIRCUMFERENCE / 2.0;
        self.mercator_to_local(DVec2::new(
            -half + f64::from(x) * size,
            half - f64::from(y) * size,
        ))
    }

    /// Local footprint of tile `(x, y)` at `zoom`.
    #[must_use]
    pub fn tile_footprint(&self, zoom: u8, x: u32, y: u32) -> LocalRect {
        let min = self.tile_origin_local(zoom, x, y);
        let size = self.tile_size_local(zoom);
        LocalRect {
            min,
            max: min + DVec2::splat(size),
        }
    }

    /// Fractional tile coordinates of a local ground position.
    #[must_use]
    pub fn local_to_tile(&self, zoom: u8, local: DVec2) -> DVec2 {
        let mercator = self.local_to_mercator(local);
        let size = tile_size_meters(zoom);
        let half = WORLD_CIRCUMFERENCE / 2.0;
        DVec2::new((mercator.x + half) / size, (half - mercator.y) / size)
    }

    /// Tile containing a local ground position, clamped into the pyramid.
    #[must_use]
    pub fn tile_at(&self, zoom: u8, local: DVec2) -> (u32, u32) {
        let tile = self.local_to_tile(zoom, local);
        (clamp_index(tile.x, zoom), clamp_index(tile.y, zoom))
    }

    /// Tiles overlapping a local rectangle.
    #[must_use]
    pub fn tile_range_for_rect(&self, zoom: u8, rect: LocalRect) -> TileRange {
        let (min_x, min_y) = self.tile_at(zoom, rect.min);
        let (max_x, max_y) = self.tile_at(zoom, rect.max);
        TileRange::new(min_x, min_y, max_x, max_y)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp_index(value: f64, zoom: u8) -> u32 {
    let last = f64::from(tiles_per_side(zoom) - 1);
    value.floor().clamp(0.0, last) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mercator_roundtrip_point() {
        let m = lon_lat_to_mercator(-74.0, 40.7);
        let (lon, lat) = mercator_to_lon_lat(m);
        assert!((lon + 74.0).abs() < 1e-9);
        assert!((lat - 40.7).abs() < 1e-9);
    }

    #[test]
    fn test_world_circumference() {
        assert!((WORLD_CIRCUMFERENCE - 40_075_016.686).abs() < 0.01);
        assert!((tile_size_meters(0) - WORLD_CIRCUMFERENCE).abs() < 1e-6);
        assert!((tile_size_meters(1) * 2.0 - WORLD_CIRCUMFERENCE).abs() < 1e-6);
    }

    #[test]
    fn test_local_frame_orientation() {
        let projection = Projection::new(ProjectionReference::from_lon_lat(0.0, 0.0));
        // North of the reference is negative z, east is positive x.
        let north = projection.mercator_to_local(DVec2::new(0.0, 1000.0));
        assert!((north.y + 1000.0).abs() < 1e-9);
        let east = projection.mercator_to_local(DVec2::new(1000.0, 0.0));
        assert!((east.x - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_tile_lookup_matches_footprint() {
        let projection = Projection::new(ProjectionReference::from_lon_lat(13.4, 52.5));
        let zoom = 14;
        let (x, y) = projection.tile_at(zoom, DVec2::ZERO);
        let footprint = projection.tile_footprint(zoom, x, y);
        assert!(footprint.min.x <= 0.0 && footprint.max.x > 0.0);
        assert!(footprint.min.y <= 0.0 && footprint.max.y > 0.0);
        // Reference is near the footprint, so local values are small.
        assert!(footprint.min.length() < projection.tile_size_local(zoom) * 2.0);
    }

    #[test]
    fn test_rect_distances() {
        let rect = LocalRect {
            min: DVec2::new(0.0, 0.0),
            max: DVec2::new(10.0, 10.0),
        };
        assert_eq!(rect.distance_to(DVec2::new(5.0, 5.0)), 0.0);
        assert!((rect.distance_to(DVec2::new(13.0, 14.0)) - 5.0).abs() < 1e-12);
        assert!((rect.farthest_distance(DVec2::new(0.0, 0.0)) - 200f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_tile_range_for_rect_clamps() {
        let projection = Projection::new(ProjectionReference::from_lon_lat(0.0, 0.0));
        let huge = LocalRect {
            min: DVec2::splat(-1.0e9),
            max: DVec2::splat(1.0e9),
        };
        let range = projection.tile_range_for_rect(2, huge);
        assert_eq!(range, TileRange::new(0, 0, 3, 3));
    }
}

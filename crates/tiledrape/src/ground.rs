//! Ground elevation sampling and the camera's ground footprint.

use glam::{DVec2, DVec3, DVec4};

use crate::camera::FrameInputs;
use crate::error::FrameRejection;
use crate::projection::LocalRect;

/// Source of ground elevation for 3D distance queries.
pub trait GroundSampler {
    /// Elevation (local `y`) at a ground position, if known.
    fn elevation(&self, xz: DVec2) -> Option<f64>;
}

/// A ground plane at constant elevation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FlatGround(pub f64);

impl GroundSampler for FlatGround {
    fn elevation(&self, _xz: DVec2) -> Option<f64> {
        Some(self.0)
    }
}

/// Screen corners in normalized device coordinates, counter-clockwise.
const NDC_CORNERS: [(f64, f64); 4] = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];

/// The quadrilateral of ground visible through the viewport.
#[derive(Debug, Clone, Copy)]
pub struct GroundFootprint {
    /// Ground points under the four screen corners (`x`, `z`).
    pub corners: [DVec2; 4],
    /// Camera position projected onto the ground.
    pub camera_ground: DVec2,
    /// Ground elevation under the camera.
    pub ground_elevation: f64,
    /// Camera height above the ground under it.
    pub camera_height: f64,
}

impl GroundFootprint {
    /// Intersect the corner rays of the view with the ground plane under the
    /// camera.
    ///
    /// Rays that miss (above the horizon) are clamped to `reach` along their
    /// horizontal heading. Fails when no ray reaches the ground at all.
    pub fn compute(
        frame: &FrameInputs,
        ground: &dyn GroundSampler,
        reach: f64,
    ) -> Result<Self, FrameRejection> {
        let camera = frame.pose.position;
        let camera_ground = DVec2::new(camera.x, camera.z);
        let ground_elevation = ground
            .elevation(camera_ground)
            .ok_or(FrameRejection::NoGroundIntersection)?;
        let camera_height = camera.y - ground_elevation;
        if camera_height <= 0.0 {
            return Err(FrameRejection::NoGroundIntersection);
        }

        let inverse = frame.view_projection().inverse();
        let unproject = |x: f64, y: f64, z: f64| {
            let p = inverse * DVec4::new(x, y, z, 1.0);
            p.truncate() / p.w
        };

        let mut any_hit = false;
        let mut corners = [DVec2::ZERO; 4];
        for (corner, &(x, y)) in corners.iter_mut().zip(NDC_CORNERS.iter()) {
            let near = unproject(x, y, 0.0);
            let far = unproject(x, y, 1.0);
            let (point, hit) = intersect_ground(near, far, ground_elevation, camera_ground, reach);
            any_hit |= hit;
            *corner = point;
        }
        if !any_hit {
            let near = unproject(0.0, 0.0, 0.0);
            let far = unproject(0.0, 0.0, 1.0);
            any_hit = intersect_ground(near, far, ground_elevation, camera_ground, reach).1;
        }
        if !any_hit {
            return Err(FrameRejection::NoGroundIntersection);
        }

        Ok(Self {
            corners,
            camera_ground,
            ground_elevation,
            camera_height,
        })
    }

    /// Axis-aligned bounds of the footprint.
    #[must_use]
    pub fn bounds(&self) -> LocalRect {
        let mut min = self.corners[0];
        let mut max = self.corners[0];
        for corner in &self.corners[1..] {
            min = min.min(*corner);
            max = max.max(*corner);
        }
        LocalRect { min, max }
    }

    /// Whether the ground point lies inside the footprint quadrilateral.
    #[must_use]
    pub fn contains(&self, point: DVec2) -> bool {
        let mut sign = 0.0_f64;
        for i in 0..4 {
            let a = self.corners[i];
            let b = self.corners[(i + 1) % 4];
            let cross = (b - a).perp_dot(point - a);
            if cross.abs() < f64::EPSILON {
                continue;
            }
            if sign == 0.0 {
                sign = cross.signum();
            } else if cross.signum() != sign {
                return false;
            }
        }
        true
    }

    /// Whether a ground rectangle overlaps the footprint quadrilateral.
    ///
    /// Separating-axis test against the rectangle's axes and the normals of
    /// the footprint edges.
    #[must_use]
    pub fn overlaps(&self, rect: &LocalRect) -> bool {
        let rect_corners = [
            rect.min,
            DVec2::new(rect.max.x, rect.min.y),
            rect.max,
            DVec2::new(rect.min.x, rect.max.y),
        ];
        let edge_normals = (0..4).map(|i| (self.corners[(i + 1) % 4] - self.corners[i]).perp());
        [DVec2::X, DVec2::Y]
            .into_iter()
            .chain(edge_normals)
            .filter(|axis| axis.length_squared() > f64::EPSILON)
            .all(|axis| {
                let (a_min, a_max) = project_onto(&self.corners, axis);
                let (b_min, b_max) = project_onto(&rect_corners, axis);
                a_min <= b_max && b_min <= a_max
            })
    }

    /// Horizontal distance from the camera's ground point to the nearest
    /// visible ground.
    #[must_use]
    pub fn nearest_ground_distance(&self) -> f64 {
        if self.contains(self.camera_ground) {
            return 0.0;
        }
        (0..4)
            .map(|i| {
                distance_to_segment(
                    self.camera_ground,
                    self.corners[i],
                    self.corners[(i + 1) % 4],
                )
            })
            .fold(f64::INFINITY, f64::min)
    }

    /// Horizontal distance from the camera's ground point to the farthest
    /// footprint corner.
    #[must_use]
    pub fn farthest_ground_distance(&self) -> f64 {
        self.corners
            .iter()
            .map(|c| c.distance(self.camera_ground))
            .fold(0.0, f64::max)
    }

    /// Convert a horizontal ground distance into a 3D distance from the camera.
    #[must_use]
    pub fn slant_distance(&self, horizontal: f64) -> f64 {
        horizontal.hypot(self.camera_height)
    }

    /// Convert a 3D distance from the camera into a horizontal ground radius.
    #[must_use]
    pub fn ground_radius(&self, slant: f64) -> f64 {
        if slant.is_infinite() {
            return f64::INFINITY;
        }
        (slant * slant - self.camera_height * self.camera_height)
            .max(0.0)
            .sqrt()
    }
}

/// Intersect the segment `near → far` with the plane `y = elevation`.
///
/// Returns the ground point and whether the ray actually hit.
fn intersect_ground(
    near: DVec3,
    far: DVec3,
    elevation: f64,
    camera_ground: DVec2,
    reach: f64,
) -> (DVec2, bool) {
    let dir = far - near;
    if dir.y < 0.0 {
        let t = (elevation - near.y) / dir.y;
        if t >= 0.0 {
            let hit = near + dir * t;
            let hit_xz = DVec2::new(hit.x, hit.z);
            let offset = hit_xz - camera_ground;
            if offset.length() <= reach {
                return (hit_xz, true);
            }
            return (camera_ground + offset.normalize_or_zero() * reach, true);
        }
    }
    let heading = DVec2::new(dir.x, dir.z).normalize_or_zero();
    (camera_ground + heading * reach, false)
}

fn project_onto(points: &[DVec2; 4], axis: DVec2) -> (f64, f64) {
    points.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
        let d = p.dot(axis);
        (lo.min(d), hi.max(d))
    })
}

fn distance_to_segment(point: DVec2, a: DVec2, b: DVec2) -> f64 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq <= f64::EPSILON {
        return point.distance(a);
    }
    let t = ((point - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    point.distance(a + ab * t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::test_support::perspective_frame;

    #[test]
    fn test_flat_ground() {
        assert_eq!(FlatGround(12.0).elevation(DVec2::new(5.0, 5.0)), Some(12.0));
    }

    #[test]
    fn test_near_nadir_view_contains_camera() {
        let frame = perspective_frame(
            DVec3::new(100.0, 1000.0, 50.0),
            DVec3::new(0.0, -1.0, -0.01),
        );
        let footprint = GroundFootprint::compute(&frame, &FlatGround(0.0), 1.0e6).unwrap();
        assert!((footprint.camera_height - 1000.0).abs() < 1e-9);
        assert!(footprint.contains(footprint.camera_ground));
        assert_eq!(footprint.nearest_ground_distance(), 0.0);
        let bounds = footprint.bounds();
        assert!(bounds.min.x < 100.0 && bounds.max.x > 100.0);
    }

    #[test]
    fn test_horizon_rays_clamped_to_reach() {
        // Looking level: the upper corners never reach the ground.
        let frame = perspective_frame(DVec3::new(0.0, 100.0, 0.0), DVec3::NEG_Z);
        let footprint = GroundFootprint::compute(&frame, &FlatGround(0.0), 5000.0).unwrap();
        assert!((footprint.farthest_ground_distance() - 5000.0).abs() < 1e-6);
        assert!(footprint.nearest_ground_distance() > 0.0);
    }

    #[test]
    fn test_overlaps_follows_quadrilateral_not_bounds() {
        let footprint = GroundFootprint {
            corners: [
                DVec2::new(-10.0, 0.0),
                DVec2::new(10.0, 0.0),
                DVec2::new(100.0, -100.0),
                DVec2::new(-100.0, -100.0),
            ],
            camera_ground: DVec2::ZERO,
            ground_elevation: 0.0,
            camera_height: 50.0,
        };
        let rect = |x0: f64, z0: f64, x1: f64, z1: f64| LocalRect {
            min: DVec2::new(x0, z0),
            max: DVec2::new(x1, z1),
        };
        // Straddles the narrow near edge.
        assert!(footprint.overlaps(&rect(-5.0, -5.0, 5.0, 5.0)));
        // Fully inside the far end.
        assert!(footprint.overlaps(&rect(-20.0, -90.0, 20.0, -80.0)));
        // Contains the whole footprint.
        assert!(footprint.overlaps(&rect(-500.0, -500.0, 500.0, 500.0)));
        // Inside the bounds but beside the slanted edge.
        assert!(!footprint.overlaps(&rect(-100.0, -15.0, -80.0, -5.0)));
        // Behind the camera.
        assert!(!footprint.overlaps(&rect(-5.0, 5.0, 5.0, 15.0)));
    }

    #[test]
    fn test_looking_up_has_no_ground() {
        let frame = perspective_frame(DVec3::new(0.0, 100.0, 0.0), DVec3::new(0.0, 1.0, -0.1));
        let result = GroundFootprint::compute(&frame, &FlatGround(0.0), 5000.0);
        assert_eq!(result.err(), Some(FrameRejection::NoGroundIntersection));
    }

    #[test]
    fn test_camera_below_ground_rejected() {
        let frame = perspective_frame(DVec3::new(0.0, 5.0, 0.0), DVec3::new(0.0, -1.0, -1.0));
        let result = GroundFootprint::compute(&frame, &FlatGround(10.0), 5000.0);
        assert_eq!(result.err(), Some(FrameRejection::NoGroundIntersection));
    }

    #[test]
    fn test_radius_conversions() {
        let frame = perspective_frame(
            DVec3::new(0.0, 300.0, 0.0),
            DVec3::new(0.0, -1.0, -0.01),
        );
        let footprint = GroundFootprint::compute(&frame, &FlatGround(0.0), 1.0e6).unwrap();
        assert!((footprint.slant_distance(400.0) - 500.0).abs() < 1e-9);
        assert!((footprint.ground_radius(500.0) - 400.0).abs() < 1e-9);
        assert_eq!(footprint.ground_radius(100.0), 0.0);
    }
}

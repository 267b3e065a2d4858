//! View frustum for culling tile footprints.

use glam::{DMat4, DVec3};

/// A frustum for culling tiles based on their bounding boxes.
#[derive(Debug, Clone, Copy)]
pub struct Frustum {
    /// Frustum planes (left, right, bottom, top, near, far).
    /// Each plane is represented as (normal, distance) with inward normals.
    planes: [(DVec3, f64); 6],
}

impl Frustum {
    /// Create a frustum from a view-projection matrix.
    ///
    /// Expects a `[0, 1]` clip depth range, as produced by glam's `*_rh`
    /// projection constructors.
    #[must_use]
    pub fn from_matrix(vp: DMat4) -> Self {
        let m = vp.to_cols_array_2d();
        let row = |i: usize| [m[0][i], m[1][i], m[2][i], m[3][i]];
        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));
        let combine = |a: [f64; 4], b: [f64; 4], sign: f64| {
            Self::normalize_plane(
                a[0] + sign * b[0],
                a[1] + sign * b[1],
                a[2] + sign * b[2],
                a[3] + sign * b[3],
            )
        };

        let planes = [
            combine(r3, r0, 1.0),
            combine(r3, r0, -1.0),
            combine(r3, r1, 1.0),
            combine(r3, r1, -1.0),
            // Depth is [0, 1], so the near plane is the third row alone.
            Self::normalize_plane(r2[0], r2[1], r2[2], r2[3]),
            combine(r3, r2, -1.0),
        ];

        Self { planes }
    }

    fn normalize_plane(a: f64, b: f64, c: f64, d: f64) -> (DVec3, f64) {
        let normal = DVec3::new(a, b, c);
        let length = normal.length();
        if length > 0.0 {
            (normal / length, d / length)
        } else {
            (DVec3::ZERO, 0.0)
        }
    }

    /// Test if an axis-aligned box intersects the frustum.
    ///
    /// Conservative: boxes near frustum corners may pass.
    #[must_use]
    pub fn intersects_aabb(&self, min: DVec3, max: DVec3) -> bool {
        let center = (min + max) * 0.5;
        let extents = (max - min) * 0.5;
        for &(normal, distance) in &self.planes {
            let r = extents.x * normal.x.abs()
                + extents.y * normal.y.abs()
                + extents.z * normal.z.abs();
            let d = normal.dot(center) + distance;

            // Entirely behind this plane.
            if d < -r {
                return false;
            }
        }
        true
    }

    /// Test if a point is inside the frustum.
    #[must_use]
    pub fn contains_point(&self, point: DVec3) -> bool {
        self.planes
            .iter()
            .all(|&(normal, distance)| normal.dot(point) + distance >= 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn looking_down_negative_z() -> Frustum {
        let view = DMat4::look_to_rh(DVec3::ZERO, DVec3::NEG_Z, DVec3::Y);
        let proj = DMat4::perspective_rh(std::f64::consts::FRAC_PI_2, 1.0, 1.0, 1000.0);
        Frustum::from_matrix(proj * view)
    }

    #[test]
    fn test_point_containment() {
        let frustum = looking_down_negative_z();
        assert!(frustum.contains_point(DVec3::new(0.0, 0.0, -10.0)));
        assert!(!frustum.contains_point(DVec3::new(0.0, 0.0, 10.0)));
        assert!(!frustum.contains_point(DVec3::new(0.0, 0.0, -2000.0)));
        // 90° fov: x = 20 at depth 10 is outside.
        assert!(!frustum.contains_point(DVec3::new(20.0, 0.0, -10.0)));
    }

    #[test]
    fn test_aabb_intersection() {
        let frustum = looking_down_negative_z();
        assert!(frustum.intersects_aabb(DVec3::new(-1.0, -1.0, -11.0), DVec3::new(1.0, 1.0, -9.0)));
        // Straddling the left plane still counts.
        assert!(frustum.intersects_aabb(
            DVec3::new(-15.0, -1.0, -11.0),
            DVec3::new(-5.0, 1.0, -9.0)
        ));
        // Behind the camera.
        assert!(!frustum.intersects_aabb(DVec3::new(-1.0, -1.0, 5.0), DVec3::new(1.0, 1.0, 9.0)));
    }
}

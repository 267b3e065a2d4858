//! Screen-resolution metrics that map camera distance to a tile zoom level.
//!
//! A zoom level is "desired" when one tile pixel covers roughly one screen
//! pixel: `desiredZoom = ceil(log2(C / (256 * metersPerPixel)))`.

use crate::camera::{CameraProjection, FrameInputs};
use crate::projection::WORLD_CIRCUMFERENCE;
use crate::tile::MAX_ZOOM;

/// Nominal tile edge length in pixels the zoom formula is calibrated for.
pub const TILE_PIXELS: f64 = 256.0;

/// Distance-to-zoom mapping for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomMetrics {
    projection: CameraProjection,
    viewport_height_px: f64,
    /// World units per meter; distances are divided by this before use.
    units_per_meter: f64,
    min_zoom: u8,
    max_zoom: u8,
    bias: f64,
}

impl ZoomMetrics {
    /// Create metrics from camera parameters. Zoom bounds are clamped to the
    /// addressable pyramid.
    #[must_use]
    pub fn new(
        projection: CameraProjection,
        viewport_height_px: f64,
        units_per_meter: f64,
        min_zoom: u8,
        max_zoom: u8,
        bias: f64,
    ) -> Self {
        let max_zoom = max_zoom.max(min_zoom).min(MAX_ZOOM);
        Self {
            projection,
            viewport_height_px,
            units_per_meter,
            min_zoom: min_zoom.min(max_zoom),
            max_zoom,
            bias,
        }
    }

    /// Metrics for a frame with the given zoom bounds.
    #[must_use]
    pub fn for_frame(
        frame: &FrameInputs,
        units_per_meter: f64,
        min_zoom: u8,
        max_zoom: u8,
        bias: f64,
    ) -> Self {
        Self::new(
            frame.projection,
            frame.viewport.physical_height(),
            units_per_meter,
            min_zoom,
            max_zoom,
            bias,
        )
    }

    #[must_use]
    pub fn min_zoom(&self) -> u8 {
        self.min_zoom
    }

    #[must_use]
    pub fn max_zoom(&self) -> u8 {
        self.max_zoom
    }

    /// Ground meters covered by one screen pixel at `distance` local units.
    #[must_use]
    pub fn meters_per_pixel(&self, distance: f64) -> f64 {
        let depth = distance / self.units_per_meter;
        match self.projection {
            CameraProjection::Perspective { fov_y, .. } => {
                2.0 * depth * (fov_y / 2.0).tan() / self.viewport_height_px
            }
            CameraProjection::Orthographic { frustum_height, .. } => {
                frustum_height / self.units_per_meter / self.viewport_height_px
            }
        }
    }

    /// Unrounded, unclamped zoom level for `distance`.
    #[must_use]
    pub fn continuous_zoom(&self, distance: f64) -> f64 {
        let mpp = self.meters_per_pixel(distance);
        if mpp <= 0.0 {
            return f64::INFINITY;
        }
        (WORLD_CIRCUMFERENCE / (TILE_PIXELS * mpp)).log2() + self.bias
    }

    /// Zoom level whose texel density best matches the screen at `distance`.
    ///
    /// Non-increasing in `distance`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn desired_zoom(&self, distance: f64) -> u8 {
        let zoom = self.continuous_zoom(distance).ceil();
        if zoom.is_nan() {
            return self.min_zoom;
        }
        zoom.clamp(f64::from(self.min_zoom), f64::from(self.max_zoom)) as u8
    }

    /// Largest distance at which the unclamped desired zoom is still at least
    /// `zoom`. Strictly decreasing in `zoom` for perspective cameras.
    #[must_use]
    pub fn max_distance_for_zoom(&self, zoom: u8) -> f64 {
        // ceil(c) >= zoom  <=>  c > zoom - 1
        let threshold = f64::from(zoom) - 1.0 - self.bias;
        let mpp_limit = WORLD_CIRCUMFERENCE / (TILE_PIXELS * threshold.exp2());
        match self.projection {
            CameraProjection::Perspective { fov_y, .. } => {
                mpp_limit * self.viewport_height_px / (2.0 * (fov_y / 2.0).tan())
                    * self.units_per_meter
            }
            CameraProjection::Orthographic { .. } => {
                if self.meters_per_pixel(1.0) < mpp_limit {
                    f64::INFINITY
                } else {
                    0.0
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn metrics(min_zoom: u8, max_zoom: u8) -> ZoomMetrics {
        ZoomMetrics::new(
            CameraProjection::Perspective {
                fov_y: 60f64.to_radians(),
                near: 1.0,
                far: 1.0e7,
            },
            720.0,
            1.0,
            min_zoom,
            max_zoom,
            0.0,
        )
    }

    #[test]
    fn test_meters_per_pixel_at_5000m() {
        let m = metrics(0, 22);
        let mpp = m.meters_per_pixel(5000.0);
        assert!((mpp - 8.0188).abs() < 1e-3, "mpp = {mpp}");
    }

    #[test]
    fn test_desired_zoom_at_5000m() {
        let m = metrics(0, 22);
        let continuous = m.continuous_zoom(5000.0);
        // log2(40075017 / (256 * 8.02)) = 14.25, which the ceiling rounds up.
        assert!((continuous - 14.25).abs() < 0.01, "continuous = {continuous}");
        assert_eq!(m.desired_zoom(5000.0), 15);
    }

    #[test]
    fn test_desired_zoom_clamped() {
        let m = metrics(3, 12);
        assert_eq!(m.desired_zoom(1.0), 12);
        assert_eq!(m.desired_zoom(1.0e9), 3);
        assert_eq!(m.desired_zoom(0.0), 12);
    }

    #[test]
    fn test_zoom_bounds_clamped_to_pyramid() {
        let m = metrics(2, 40);
        assert_eq!(m.max_zoom(), MAX_ZOOM);
        assert_eq!(m.desired_zoom(1.0e-6), MAX_ZOOM);

        let m = metrics(35, 40);
        assert_eq!((m.min_zoom(), m.max_zoom()), (MAX_ZOOM, MAX_ZOOM));
    }

    #[test]
    fn test_orthographic_is_distance_independent() {
        let m = ZoomMetrics::new(
            CameraProjection::Orthographic {
                frustum_height: 7200.0,
                near: 0.0,
                far: 1.0e6,
            },
            720.0,
            1.0,
            0,
            22,
            0.0,
        );
        assert!((m.meters_per_pixel(10.0) - 10.0).abs() < 1e-12);
        assert_eq!(m.desired_zoom(10.0), m.desired_zoom(100_000.0));
    }

    #[test]
    fn test_max_distance_matches_desired_zoom() {
        let m = metrics(0, 22);
        for zoom in 5..20 {
            let limit = m.max_distance_for_zoom(zoom);
            assert!(m.desired_zoom(limit * 0.999) >= zoom);
            assert!(m.desired_zoom(limit * 1.001) < zoom);
            assert!(m.max_distance_for_zoom(zoom + 1) < limit);
        }
    }

    proptest! {
        #[test]
        fn prop_desired_zoom_non_increasing(a in 1.0f64..1.0e7, b in 1.0f64..1.0e7) {
            let m = metrics(0, 22);
            let (near, far) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(m.desired_zoom(near) >= m.desired_zoom(far));
        }
    }
}

//! Per-frame camera and viewport inputs supplied by the terrain host.

use glam::{DMat4, DVec3};

use crate::error::FrameRejection;

/// Camera pose in the session-local frame (`y` up).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    pub position: DVec3,
    /// View direction. Need not be normalized.
    pub forward: DVec3,
    pub up: DVec3,
}

/// How the camera projects the scene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CameraProjection {
    Perspective {
        /// Vertical field of view in radians.
        fov_y: f64,
        near: f64,
        far: f64,
    },
    Orthographic {
        /// Height of the view volume in local units.
        frustum_height: f64,
        near: f64,
        far: f64,
    },
}

impl CameraProjection {
    /// Far clip distance.
    #[must_use]
    pub fn far(&self) -> f64 {
        match *self {
            CameraProjection::Perspective { far, .. }
            | CameraProjection::Orthographic { far, .. } => far,
        }
    }
}

/// Output surface dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Logical width.
    pub width: f64,
    /// Logical height.
    pub height: f64,
    /// Physical pixels per logical pixel.
    pub pixel_ratio: f64,
}

impl Viewport {
    /// Height in physical pixels, which determines texel density on screen.
    #[must_use]
    pub fn physical_height(&self) -> f64 {
        self.height * self.pixel_ratio
    }

    #[must_use]
    pub fn aspect_ratio(&self) -> f64 {
        self.width / self.height
    }
}

/// Everything the engine reads from the host each frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInputs {
    /// Monotonic host time in seconds.
    pub time_seconds: f64,
    pub pose: CameraPose,
    pub projection: CameraProjection,
    pub viewport: Viewport,
    /// Largest texture edge the GPU accepts, in pixels.
    pub max_texture_size: u32,
}

impl FrameInputs {
    /// Reject inputs the selector cannot work with.
    pub fn validate(&self) -> Result<(), FrameRejection> {
        let pose = &self.pose;
        if !(pose.position.is_finite() && pose.forward.is_finite() && pose.up.is_finite())
            || !self.time_seconds.is_finite()
        {
            return Err(FrameRejection::NonFiniteCamera);
        }
        if pose.forward.length_squared() <= f64::EPSILON
            || pose.forward.normalize().cross(pose.up).length_squared() <= f64::EPSILON
        {
            return Err(FrameRejection::NonFiniteCamera);
        }

        let viewport = &self.viewport;
        if !(viewport.width.is_finite() && viewport.height.is_finite())
            || viewport.width < 1.0
            || viewport.height < 1.0
            || viewport.pixel_ratio <= 0.0
            || self.max_texture_size == 0
        {
            return Err(FrameRejection::DegenerateViewport);
        }

        let projection_ok = match self.projection {
            CameraProjection::Perspective { fov_y, near, far } => {
                fov_y > 0.0 && fov_y < std::f64::consts::PI && near > 0.0 && far > near
            }
            CameraProjection::Orthographic {
                frustum_height,
                near,
                far,
            } => frustum_height > 0.0 && far > near,
        };
        if !projection_ok {
            return Err(FrameRejection::DegenerateViewport);
        }
        Ok(())
    }

    /// World-to-clip transform for this frame.
    #[must_use]
    pub fn view_projection(&self) -> DMat4 {
        let view = DMat4::look_to_rh(
            self.pose.position,
            self.pose.forward.normalize(),
            self.pose.up,
        );
        let aspect = self.viewport.aspect_ratio();
        let projection = match self.projection {
            CameraProjection::Perspective { fov_y, near, far } => {
                DMat4::perspective_rh(fov_y, aspect, near, far)
            }
            CameraProjection::Orthographic {
                frustum_height,
                near,
                far,
            } => {
                let half_h = frustum_height / 2.0;
                let half_w = half_h * aspect;
                DMat4::orthographic_rh(-half_w, half_w, -half_h, half_h, near, far)
            }
        };
        projection * view
    }
}

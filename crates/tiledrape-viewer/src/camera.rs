//! Demo camera that circles the session origin.
//!
//! Arrow keys change the orbit radius and height; space pauses the orbit.

use bevy::prelude::*;

/// Plugin for the orbiting demo camera.
pub struct OrbitCameraPlugin;

impl Plugin for OrbitCameraPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Update, (orbit_input, orbit_camera).chain());
    }
}

/// Keeps a camera on a circle around `center`, looking at it.
#[derive(Component, Debug, Clone)]
pub struct OrbitCamera {
    pub center: Vec3,
    /// Horizontal distance from the center in meters.
    pub radius: f32,
    /// Height above the center in meters.
    pub height: f32,
    /// Angular speed in radians per second.
    pub speed: f32,
    pub angle: f32,
    pub paused: bool,
}

impl OrbitCamera {
    #[must_use]
    pub fn new(height: f32) -> Self {
        Self {
            center: Vec3::ZERO,
            radius: height * 1.5,
            height,
            speed: 0.05,
            angle: 0.0,
            paused: false,
        }
    }

    /// Camera position for the current angle.
    #[must_use]
    pub fn position(&self) -> Vec3 {
        self.center
            + Vec3::new(
                self.angle.cos() * self.radius,
                self.height,
                self.angle.sin() * self.radius,
            )
    }
}

/// Adjust the orbit from the keyboard.
#[allow(clippy::needless_pass_by_value)]
fn orbit_input(
    keys: Res<ButtonInput<KeyCode>>,
    time: Res<Time>,
    mut cameras: Query<&mut OrbitCamera>,
) {
    let dt = time.delta_secs();
    for mut orbit in &mut cameras {
        // Scale changes with distance so they feel the same at any altitude.
        let rate = 0.8 * dt;
        if keys.pressed(KeyCode::ArrowUp) {
            orbit.height *= 1.0 + rate;
        }
        if keys.pressed(KeyCode::ArrowDown) {
            orbit.height = (orbit.height * (1.0 - rate)).max(20.0);
        }
        if keys.pressed(KeyCode::ArrowRight) {
            orbit.radius *= 1.0 + rate;
        }
        if keys.pressed(KeyCode::ArrowLeft) {
            orbit.radius = (orbit.radius * (1.0 - rate)).max(10.0);
        }
        if keys.just_pressed(KeyCode::Space) {
            orbit.paused = !orbit.paused;
        }
    }
}

#[allow(clippy::needless_pass_by_value)]
fn orbit_camera(time: Res<Time>, mut cameras: Query<(&mut OrbitCamera, &mut Transform)>) {
    for (mut orbit, mut transform) in &mut cameras {
        if !orbit.paused {
            orbit.angle += orbit.speed * time.delta_secs();
        }
        *transform = Transform::from_translation(orbit.position()).looking_at(orbit.center, Vec3::Y);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_on_circle() {
        let mut orbit = OrbitCamera::new(100.0);
        assert_eq!(orbit.position(), Vec3::new(150.0, 100.0, 0.0));
        orbit.angle = std::f32::consts::FRAC_PI_2;
        let p = orbit.position();
        assert!(p.x.abs() < 1e-3);
        assert!((p.z - 150.0).abs() < 1e-3);
    }
}

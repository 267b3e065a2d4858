//! Bevy viewer that drapes streamed map tiles over a terrain plane.
//!
//! The camera orbits the starting location so the tile selector and the
//! atlas compositor are continuously exercised. Tiles come from any
//! `{z}/{x}/{y}` raster tile server.

mod async_runtime;
mod camera;
mod http_source;
mod image_backend;
mod launch_params;
mod material;
mod plugin;

use async_runtime::AsyncRuntimePlugin;
use bevy::prelude::*;
use camera::{OrbitCamera, OrbitCameraPlugin};
use launch_params::LaunchParams;
use plugin::DrapePlugin;

/// Plugin for the main application.
pub struct AppPlugin;

impl Plugin for AppPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins((OrbitCameraPlugin, DrapePlugin))
            .add_systems(Startup, setup_scene);
    }
}

/// Set up the camera and lighting.
#[allow(clippy::needless_pass_by_value)]
fn setup_scene(mut commands: Commands, params: Res<LaunchParams>) {
    #[allow(clippy::cast_possible_truncation)]
    let orbit = OrbitCamera::new(params.altitude as f32);
    let start = orbit.position();

    commands.spawn((
        Camera3d::default(),
        Transform::from_translation(start).looking_at(orbit.center, Vec3::Y),
        Projection::Perspective(PerspectiveProjection {
            fov: std::f32::consts::FRAC_PI_4,
            near: 1.0,
            far: 250_000.0,
            ..Default::default()
        }),
        orbit,
    ));

    commands.spawn((
        DirectionalLight {
            illuminance: 8_000.0,
            ..default()
        },
        Transform::from_xyz(1.0, 3.0, 2.0).looking_at(Vec3::ZERO, Vec3::Y),
    ));

    tracing::info!(
        "Scene setup complete - arrows change the orbit, space pauses, B/L/T toggle settings"
    );
}

fn main() {
    // Initialize tracing for native platforms.
    #[cfg(not(target_family = "wasm"))]
    {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    // Initialize tracing for WASM (logs to browser console).
    #[cfg(target_family = "wasm")]
    {
        console_error_panic_hook::set_once();
        tracing_wasm::set_as_global_default();
    }

    let params = launch_params::parse();

    let mut app = App::new();

    #[allow(unused_mut)]
    let mut window = Window {
        title: "tiledrape-viewer".to_string(),
        resolution: (1600, 900).into(),
        position: WindowPosition::Centered(MonitorSelection::Primary),
        ..Default::default()
    };

    // WASM: Fit canvas to parent element and prevent browser event handling.
    #[cfg(target_family = "wasm")]
    {
        window.fit_canvas_to_parent = true;
        window.prevent_default_event_handling = true;
    }

    app.add_plugins(DefaultPlugins.set(WindowPlugin {
        primary_window: Some(window),
        ..Default::default()
    }));

    // Add async runtime (Tokio on native, no-op on WASM).
    app.add_plugins(AsyncRuntimePlugin);

    app.insert_resource(params).add_plugins(AppPlugin).run();
}

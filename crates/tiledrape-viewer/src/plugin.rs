//! Bevy integration of the tile atlas engine.
//!
//! Owns the [`TileDrape`] engine as a resource, feeds it the main camera
//! every frame and copies its uniforms and atlas images into the terrain
//! material.

use bevy::prelude::*;
use bevy::render::renderer::RenderDevice;
use bevy::window::PrimaryWindow;
use tiledrape::{
    AtlasConfig, CameraPose, CameraProjection, FlatGround, FrameHost, FrameInputs, LodStrategy,
    ProjectionReference, SchemeId, TileDrape, UpdateOutcome, Viewport,
};

use crate::async_runtime::TaskSpawner;
use crate::http_source::{HttpTileSource, TileImage};
use crate::image_backend::ImageAtlasBackend;
use crate::launch_params::LaunchParams;
use crate::material::{DrapeExtension, DrapeMaterial, DrapeMaterialPlugin, DrapeUniformsGpu};

/// Edge length of the demo terrain plane in meters.
const TERRAIN_SIZE: f32 = 400_000.0;

/// Used when the render device is not available yet.
const FALLBACK_MAX_TEXTURE_SIZE: u32 = 4096;

/// Plugin that streams tiles onto the terrain.
pub struct DrapePlugin;

impl Plugin for DrapePlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(DrapeMaterialPlugin)
            .add_systems(Startup, setup_drape)
            .add_systems(
                Update,
                (toggle_settings, update_drape, apply_drape_material).chain(),
            );
    }
}

/// The engine, specialized to decoded tiles and `Image` atlases.
#[derive(Resource)]
pub struct DrapeEngine(pub TileDrape<TileImage, Handle<Image>>);

/// Live atlas configuration, read by the engine every frame.
#[derive(Resource, Debug, Clone)]
pub struct DrapeSettings(pub AtlasConfig);

/// Material of the terrain plane.
#[derive(Resource)]
pub struct DrapeTerrain {
    pub material: Handle<DrapeMaterial>,
}

#[allow(clippy::needless_pass_by_value)]
fn setup_drape(
    mut commands: Commands,
    params: Res<LaunchParams>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<DrapeMaterial>>,
) {
    let mut engine = TileDrape::new(SchemeId::DEFAULT);
    engine.set_reference(ProjectionReference::from_lon_lat(params.lon, params.lat));
    commands.insert_resource(DrapeEngine(engine));
    commands.insert_resource(DrapeSettings(params.config.clone()));
    commands.insert_resource(HttpTileSource::new(&params.tile_url));

    let material = materials.add(DrapeMaterial {
        base: StandardMaterial {
            base_color: Color::srgb(0.32, 0.36, 0.3),
            perceptual_roughness: 1.0,
            ..default()
        },
        extension: DrapeExtension::default(),
    });
    commands.spawn((
        Mesh3d(meshes.add(Plane3d::default().mesh().size(TERRAIN_SIZE, TERRAIN_SIZE))),
        MeshMaterial3d(material.clone()),
        Transform::default(),
    ));
    commands.insert_resource(DrapeTerrain { material });

    tracing::info!(
        "Draping {} at ({:.4}, {:.4})",
        params.tile_url,
        params.lat,
        params.lon
    );
}

/// B switches the LOD strategy, L toggles lookahead, T toggles telemetry.
#[allow(clippy::needless_pass_by_value)]
fn toggle_settings(keys: Res<ButtonInput<KeyCode>>, mut settings: ResMut<DrapeSettings>) {
    if keys.just_pressed(KeyCode::KeyB) {
        settings.0.strategy = match settings.0.strategy {
            LodStrategy::Trapezoid => LodStrategy::Bands,
            LodStrategy::Bands => LodStrategy::Trapezoid,
        };
        tracing::info!("LOD strategy: {:?}", settings.0.strategy);
    }
    if keys.just_pressed(KeyCode::KeyL) {
        settings.0.lookahead = !settings.0.lookahead;
        tracing::info!("Lookahead: {}", settings.0.lookahead);
    }
    if keys.just_pressed(KeyCode::KeyT) {
        settings.0.telemetry.enabled = !settings.0.telemetry.enabled;
    }
}

/// Build the engine's frame inputs from a Bevy camera.
///
/// Returns `None` for projections the engine does not model.
#[must_use]
pub fn frame_inputs(
    time_seconds: f64,
    transform: &GlobalTransform,
    projection: &Projection,
    window: &Window,
    max_texture_size: u32,
) -> Option<FrameInputs> {
    let projection = match projection {
        Projection::Perspective(p) => CameraProjection::Perspective {
            fov_y: f64::from(p.fov),
            near: f64::from(p.near),
            far: f64::from(p.far),
        },
        Projection::Orthographic(o) => CameraProjection::Orthographic {
            frustum_height: f64::from(o.area.height()),
            near: f64::from(o.near),
            far: f64::from(o.far),
        },
        Projection::Custom(_) => return None,
    };
    Some(FrameInputs {
        time_seconds,
        pose: CameraPose {
            position: transform.translation().as_dvec3(),
            forward: transform.forward().as_vec3().as_dvec3(),
            up: transform.up().as_vec3().as_dvec3(),
        },
        projection,
        viewport: Viewport {
            width: f64::from(window.width()),
            height: f64::from(window.height()),
            pixel_ratio: f64::from(window.scale_factor()),
        },
        max_texture_size,
    })
}

#[allow(clippy::needless_pass_by_value, clippy::too_many_arguments)]
fn update_drape(
    mut engine: ResMut<DrapeEngine>,
    settings: Res<DrapeSettings>,
    source: Res<HttpTileSource>,
    spawner: TaskSpawner,
    mut images: ResMut<Assets<Image>>,
    time: Res<Time>,
    cameras: Query<(&GlobalTransform, &Projection), With<Camera3d>>,
    windows: Query<&Window, With<PrimaryWindow>>,
    device: Option<Res<RenderDevice>>,
) {
    let Ok((transform, projection)) = cameras.single() else {
        return;
    };
    let Ok(window) = windows.single() else {
        return;
    };
    let max_texture_size = device.map_or(FALLBACK_MAX_TEXTURE_SIZE, |d| {
        d.limits().max_texture_dimension_2d
    });
    let Some(frame) = frame_inputs(
        time.elapsed_secs_f64(),
        transform,
        projection,
        window,
        max_texture_size,
    ) else {
        return;
    };

    let mut backend = ImageAtlasBackend::new(&mut images);
    let outcome = engine.0.update(
        &frame,
        &settings.0,
        FrameHost {
            source: &*source,
            spawner: &spawner,
            backend: &mut backend,
            ground: &FlatGround(0.0),
        },
    );
    if let UpdateOutcome::Skipped(reason) = outcome {
        tracing::trace!("Drape update skipped: {reason}");
    }
}

/// Copy uniforms and atlas handles into the terrain material when they change.
#[allow(clippy::needless_pass_by_value)]
fn apply_drape_material(
    engine: Res<DrapeEngine>,
    terrain: Option<Res<DrapeTerrain>>,
    mut materials: ResMut<Assets<DrapeMaterial>>,
) {
    let Some(terrain) = terrain else {
        return;
    };
    let uniforms = DrapeUniformsGpu::from(engine.0.uniforms());
    let atlases: Vec<Handle<Image>> = engine
        .0
        .active_slots()
        .iter()
        .map(|slot| slot.target.clone())
        .collect();

    let unchanged = materials.get(&terrain.material).is_some_and(|material| {
        let ext = &material.extension;
        let bound = [&ext.atlas_0, &ext.atlas_1, &ext.atlas_2, &ext.atlas_3];
        ext.drape == uniforms
            && bound
                .iter()
                .enumerate()
                .all(|(i, handle)| handle.as_ref() == atlases.get(i))
    });
    if unchanged {
        return;
    }
    if let Some(material) = materials.get_mut(&terrain.material) {
        material.extension.drape = uniforms;
        material.extension.set_atlases(atlases);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_inputs_from_camera() {
        let transform = GlobalTransform::from(
            Transform::from_xyz(0.0, 2000.0, 0.0).looking_to(Vec3::new(0.0, -1.0, -1.0), Vec3::Y),
        );
        let projection = Projection::Perspective(PerspectiveProjection {
            fov: 1.0,
            near: 0.5,
            far: 50_000.0,
            ..default()
        });
        let window = Window::default();
        let frame = frame_inputs(3.0, &transform, &projection, &window, 8192).unwrap();

        assert_eq!(frame.time_seconds, 3.0);
        assert!((frame.pose.position.y - 2000.0).abs() < 1e-3);
        let forward = frame.pose.forward.normalize();
        assert!((forward.y + std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-5);
        assert!(matches!(
            frame.projection,
            CameraProjection::Perspective { far, .. } if (far - 50_000.0).abs() < 1e-6
        ));
        assert_eq!(frame.max_texture_size, 8192);
        assert!(frame.validate().is_ok());
    }
}

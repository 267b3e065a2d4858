//! Terrain material that samples the tile atlases.
//!
//! Extends `StandardMaterial` with the atlas uniform block and four
//! texture/sampler pairs. The fragment shader is compiled by
//! [`ShaderProgram`] from `drape_terrain.wgsl` plus the atlas steps and
//! registered under a fixed handle.

use std::marker::PhantomData;

use bevy::asset::uuid::Uuid;
use bevy::pbr::{ExtendedMaterial, MaterialExtension};
use bevy::prelude::*;
use bevy::render::render_resource::{AsBindGroup, ShaderType};
use bevy::shader::ShaderRef;
use tiledrape::{AtlasBindings, AtlasUniforms, MAX_SLOTS, ShaderProgram, SlotUniform};

/// UUID for the compiled terrain shader asset.
const DRAPE_SHADER_UUID: Uuid = Uuid::from_u128(0x5d1e_7a90_c3b4_4f12_9e6d_0b8a_2c47_e1f3);

const DRAPE_SHADER_HANDLE: Handle<Shader> = Handle::Uuid(DRAPE_SHADER_UUID, PhantomData);

/// Binding of the uniform block; the atlas pairs follow it.
const UNIFORM_BINDING: u32 = 100;

/// Plugin that registers the drape material and keeps its shader installed.
pub struct DrapeMaterialPlugin;

impl Plugin for DrapeMaterialPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(TerrainShader(ShaderProgram::new(include_str!(
            "drape_terrain.wgsl"
        ))))
        .add_plugins(MaterialPlugin::<DrapeMaterial>::default())
        .add_systems(PreUpdate, install_drape_shader);
    }
}

/// The terrain shader and its installed steps.
#[derive(Resource)]
pub struct TerrainShader(pub ShaderProgram);

/// Terrain material: `StandardMaterial` extended with atlas sampling.
pub type DrapeMaterial = ExtendedMaterial<StandardMaterial, DrapeExtension>;

/// GPU layout of one atlas slot. Mirrors `DrapeSlot` in the shader.
#[derive(ShaderType, Debug, Clone, Copy, Default, PartialEq)]
pub struct DrapeSlotGpu {
    pub origin: Vec2,
    pub tile_size: f32,
    pub grid_size: f32,
    pub texel_size: f32,
    pub zoom: f32,
    pub enabled: f32,
    pub _padding: f32,
}

impl From<&SlotUniform> for DrapeSlotGpu {
    fn from(slot: &SlotUniform) -> Self {
        Self {
            origin: slot.origin,
            tile_size: slot.tile_size,
            grid_size: slot.grid_size,
            texel_size: slot.texel_size,
            zoom: slot.zoom,
            enabled: slot.enabled,
            _padding: 0.0,
        }
    }
}

/// GPU layout of the uniform block. Mirrors `DrapeUniforms` in the shader.
#[derive(ShaderType, Debug, Clone, Default, PartialEq)]
pub struct DrapeUniformsGpu {
    pub slots: [DrapeSlotGpu; MAX_SLOTS],
    pub alpha_cutoff: f32,
    pub smoothing_factor: f32,
    pub smoothing_radius: f32,
    pub slot_count: u32,
}

impl From<&AtlasUniforms> for DrapeUniformsGpu {
    fn from(uniforms: &AtlasUniforms) -> Self {
        Self {
            slots: uniforms.slots.each_ref().map(DrapeSlotGpu::from),
            alpha_cutoff: uniforms.alpha_cutoff,
            smoothing_factor: uniforms.smoothing_factor,
            smoothing_radius: uniforms.smoothing_radius,
            slot_count: uniforms.slot_count,
        }
    }
}

/// Extension to `StandardMaterial` holding the atlas bindings.
#[derive(Asset, AsBindGroup, TypePath, Debug, Clone, Default)]
pub struct DrapeExtension {
    #[uniform(100)]
    pub drape: DrapeUniformsGpu,
    #[texture(101)]
    #[sampler(102)]
    pub atlas_0: Option<Handle<Image>>,
    #[texture(103)]
    #[sampler(104)]
    pub atlas_1: Option<Handle<Image>>,
    #[texture(105)]
    #[sampler(106)]
    pub atlas_2: Option<Handle<Image>>,
    #[texture(107)]
    #[sampler(108)]
    pub atlas_3: Option<Handle<Image>>,
}

impl DrapeExtension {
    /// Bind atlases to slots, highest zoom first. Unused slots are cleared.
    pub fn set_atlases(&mut self, atlases: impl IntoIterator<Item = Handle<Image>>) {
        let mut atlases = atlases.into_iter();
        for slot in [
            &mut self.atlas_0,
            &mut self.atlas_1,
            &mut self.atlas_2,
            &mut self.atlas_3,
        ] {
            *slot = atlases.next();
        }
    }
}

impl MaterialExtension for DrapeExtension {
    fn fragment_shader() -> ShaderRef {
        ShaderRef::Handle(DRAPE_SHADER_HANDLE)
    }
}

/// Atlas bindings as laid out in [`DrapeExtension`].
fn atlas_bindings() -> AtlasBindings {
    AtlasBindings {
        group: "#{MATERIAL_BIND_GROUP}".to_string(),
        uniform_binding: UNIFORM_BINDING,
        first_texture_binding: UNIFORM_BINDING + 1,
    }
}

/// Install the atlas steps and (re)register the shader when it changes.
fn install_drape_shader(
    mut program: ResMut<TerrainShader>,
    mut shaders: ResMut<Assets<Shader>>,
    mut registered: Local<Option<u64>>,
) {
    if let Err(e) = program.0.install_atlas(&atlas_bindings()) {
        tracing::error!("Failed to install atlas shader: {e}");
        return;
    }
    let revision = program.0.revision();
    if *registered == Some(revision) {
        return;
    }
    let shader = Shader::from_wgsl(
        program.0.compiled().to_string(),
        "tiledrape/drape_terrain.wgsl",
    );
    if let Err(e) = shaders.insert(DRAPE_SHADER_HANDLE.id(), shader) {
        tracing::warn!("Failed to register terrain shader revision {revision}: {e}");
        return;
    }
    *registered = Some(revision);
    tracing::info!("Registered terrain shader revision {revision}");
}

//! Atlas sampling for the terrain shader, and the uniforms that drive it.
//!
//! The terrain's fragment shader is built from a base WGSL template and an
//! ordered list of [`ShaderStep`]s. Each step rewrites the source, usually
//! by inserting code in front of one of the insertion markers. Host
//! customizations are plain steps too; the atlas steps are appended after
//! whatever the host installed first and are replaced as a group when their
//! version changes.
//!
//! The base template must contain [`DECLARATIONS_MARKER`] at module scope and
//! [`BASE_COLOR_MARKER`] inside the fragment entry point, where a mutable
//! `base_color: vec4<f32>` and the fragment's local ground position
//! `drape_local: vec2<f32>` are in scope.

use std::fmt;

use glam::Vec2;
use serde::Serialize;

use crate::config::SmoothingConfig;
use crate::error::{Error, Result};
use crate::grid::GridLayout;
use crate::lod::MAX_SLOTS;
use crate::projection::Projection;

/// Module-scope insertion point for declarations.
pub const DECLARATIONS_MARKER: &str = "//#drape:declarations";
/// Insertion point inside the fragment shader, after the base color is known.
pub const BASE_COLOR_MARKER: &str = "//#drape:base_color";
/// Insertion point after an atlas sample is taken, before the alpha test.
pub const POST_SAMPLE_MARKER: &str = "//#drape:post_sample";

/// Version of the built-in atlas steps.
pub const ATLAS_SHADER_VERSION: u32 = 1;

/// Samples with less coverage than this count as missing. Keeps the bilinear
/// fringe at tile borders from showing up as seams.
pub const ALPHA_CUTOFF: f32 = 0.25;

/// One rewrite of the shader source.
pub trait ShaderStep: Send + Sync + fmt::Debug {
    /// Stable identifier, used in errors and diagnostics.
    fn id(&self) -> &'static str;

    fn version(&self) -> u32 {
        0
    }

    /// Rewrite `source`.
    fn apply(&self, source: &str) -> Result<String>;
}

/// Insert `snippet` in front of `marker`, keeping the marker so later steps
/// can insert after this one.
pub fn insert_before_marker(
    step: &'static str,
    source: &str,
    marker: &str,
    snippet: &str,
) -> Result<String> {
    let Some(at) = source.find(marker) else {
        return Err(Error::Shader {
            step,
            message: format!("marker `{marker}` not found"),
        });
    };
    // Insert at the start of the marker's line so indentation is kept.
    let line_start = source[..at].rfind('\n').map_or(0, |i| i + 1);
    let mut out = String::with_capacity(source.len() + snippet.len() + 1);
    out.push_str(&source[..line_start]);
    out.push_str(snippet);
    if !snippet.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&source[line_start..]);
    Ok(out)
}

/// Where the atlas resources live in the material's bind group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtlasBindings {
    /// Bind group expression, e.g. `#{MATERIAL_BIND_GROUP}`.
    pub group: String,
    /// Binding of the uniform block.
    pub uniform_binding: u32,
    /// Binding of slot 0's texture. Slot `i` uses `first + 2i` for the
    /// texture and `first + 2i + 1` for the sampler.
    pub first_texture_binding: u32,
}

impl Default for AtlasBindings {
    fn default() -> Self {
        Self {
            group: "2".to_string(),
            uniform_binding: 100,
            first_texture_binding: 101,
        }
    }
}

/// Uniform block, texture bindings and the per-slot sampling helper.
#[derive(Debug, Clone)]
pub struct AtlasDeclarations {
    pub bindings: AtlasBindings,
}

impl ShaderStep for AtlasDeclarations {
    fn id(&self) -> &'static str {
        "drape.declarations"
    }

    fn version(&self) -> u32 {
        ATLAS_SHADER_VERSION
    }

    fn apply(&self, source: &str) -> Result<String> {
        let b = &self.bindings;
        let group = &b.group;
        let mut code = format!(
            "struct DrapeSlot {{
    origin: vec2<f32>,
    tile_size: f32,
    grid_size: f32,
    texel_size: f32,
    zoom: f32,
    enabled: f32,
    _padding: f32,
}};

struct DrapeUniforms {{
    slots: array<DrapeSlot, {MAX_SLOTS}>,
    alpha_cutoff: f32,
    smoothing_factor: f32,
    smoothing_radius: f32,
    slot_count: u32,
}};

@group({group}) @binding({}) var<uniform> drape: DrapeUniforms;
",
            b.uniform_binding
        );
        for slot in 0..MAX_SLOTS {
            #[allow(clippy::cast_possible_truncation)]
            let texture = b.first_texture_binding + 2 * slot as u32;
            code.push_str(&format!(
                "@group({group}) @binding({texture}) var drape_atlas_{slot}: texture_2d<f32>;\n\
                 @group({group}) @binding({}) var drape_sampler_{slot}: sampler;\n",
                texture + 1
            ));
        }
        code.push_str("\nfn drape_sample_slot(i: u32, uv: vec2<f32>) -> vec4<f32> {\n    switch i {\n");
        for slot in 0..MAX_SLOTS {
            code.push_str(&format!(
                "        case {slot}u: {{ return textureSampleLevel(drape_atlas_{slot}, drape_sampler_{slot}, uv, 0.0); }}\n"
            ));
        }
        code.push_str("        default: { return vec4<f32>(0.0); }\n    }\n}\n");
        insert_before_marker(self.id(), source, DECLARATIONS_MARKER, &code)
    }
}

/// Picks the finest slot with a usable sample and blends it over the base
/// color.
#[derive(Debug, Clone, Copy)]
pub struct AtlasSampling;

const SAMPLING_FUNCTIONS: &str = "fn drape_slot_uv(slot: DrapeSlot, local_xz: vec2<f32>) -> vec2<f32> {
    // Origin is relative to the session reference, so the subtraction stays
    // small even at high zoom.
    return (local_xz - slot.origin) / (slot.tile_size * slot.grid_size);
}

fn drape_sample(local_xz: vec2<f32>) -> vec4<f32> {
    for (var i = 0u; i < drape.slot_count; i = i + 1u) {
        let slot = drape.slots[i];
        if slot.enabled < 0.5 {
            continue;
        }
        let uv = drape_slot_uv(slot, local_xz);
        if any(uv < vec2<f32>(0.0)) || any(uv > vec2<f32>(1.0)) {
            continue;
        }
        var color = drape_sample_slot(i, uv);
        //#drape:post_sample
        if color.a >= drape.alpha_cutoff {
            return vec4<f32>(color.rgb, 1.0);
        }
    }
    return vec4<f32>(0.0);
}
";

const SAMPLING_BLEND: &str = "    let drape_color = drape_sample(drape_local);
    base_color = vec4<f32>(mix(base_color.rgb, drape_color.rgb, drape_color.a), base_color.a);
";

impl ShaderStep for AtlasSampling {
    fn id(&self) -> &'static str {
        "drape.sampling"
    }

    fn version(&self) -> u32 {
        ATLAS_SHADER_VERSION
    }

    fn apply(&self, source: &str) -> Result<String> {
        let source = insert_before_marker(self.id(), source, DECLARATIONS_MARKER, SAMPLING_FUNCTIONS)?;
        insert_before_marker(self.id(), &source, BASE_COLOR_MARKER, SAMPLING_BLEND)
    }
}

/// Edge-aware 3×3 blur of samples from magnified (coarser than finest) slots.
///
/// Neighbors are weighted by color similarity to the center so that edges
/// in the imagery stay sharp. A zero smoothing factor returns early.
#[derive(Debug, Clone, Copy)]
pub struct AtlasSmoothing;

const SMOOTHING_FUNCTION: &str = "fn drape_smooth(i: u32, slot: DrapeSlot, uv: vec2<f32>, center: vec4<f32>) -> vec4<f32> {
    if drape.smoothing_factor <= 0.0 || i == 0u {
        return center;
    }
    let reach = slot.texel_size * drape.smoothing_radius;
    var sum = vec4<f32>(0.0);
    var total = 0.0;
    for (var dy = -1; dy <= 1; dy = dy + 1) {
        for (var dx = -1; dx <= 1; dx = dx + 1) {
            let offset = vec2<f32>(f32(dx), f32(dy)) * reach;
            let s = drape_sample_slot(i, clamp(uv + offset, vec2<f32>(0.0), vec2<f32>(1.0)));
            let diff = length(s.rgb - center.rgb);
            let w = exp(-16.0 * diff * diff) * step(drape.alpha_cutoff, s.a);
            sum = sum + s * w;
            total = total + w;
        }
    }
    if total <= 0.0 {
        return center;
    }
    return mix(center, sum / total, drape.smoothing_factor);
}
";

impl ShaderStep for AtlasSmoothing {
    fn id(&self) -> &'static str {
        "drape.smoothing"
    }

    fn version(&self) -> u32 {
        ATLAS_SHADER_VERSION
    }

    fn apply(&self, source: &str) -> Result<String> {
        let source =
            insert_before_marker(self.id(), source, DECLARATIONS_MARKER, SMOOTHING_FUNCTION)?;
        insert_before_marker(
            self.id(),
            &source,
            POST_SAMPLE_MARKER,
            "        color = drape_smooth(i, slot, uv, color);\n",
        )
    }
}

/// The built-in atlas steps, in application order.
#[must_use]
pub fn atlas_steps(bindings: &AtlasBindings) -> Vec<Box<dyn ShaderStep>> {
    vec![
        Box::new(AtlasDeclarations {
            bindings: bindings.clone(),
        }),
        Box::new(AtlasSampling),
        Box::new(AtlasSmoothing),
    ]
}

#[derive(Debug)]
struct InstalledStep {
    step: Box<dyn ShaderStep>,
    atlas: bool,
}

/// A shader source plus the ordered steps that produce its final form.
#[derive(Debug)]
pub struct ShaderProgram {
    base: String,
    steps: Vec<InstalledStep>,
    compiled: String,
    /// Version of the installed atlas steps.
    installed: Option<(u32, AtlasBindings)>,
    /// Bumped on every successful recompile.
    revision: u64,
}

impl ShaderProgram {
    #[must_use]
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            compiled: base.clone(),
            base,
            steps: Vec::new(),
            installed: None,
            revision: 0,
        }
    }

    #[must_use]
    pub fn compiled(&self) -> &str {
        &self.compiled
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    #[must_use]
    pub fn installed_version(&self) -> Option<u32> {
        self.installed.as_ref().map(|(version, _)| *version)
    }

    pub fn step_ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.steps.iter().map(|s| s.step.id())
    }

    /// Add a host customization step after the existing host steps.
    ///
    /// Host steps always run before the atlas steps, so the compiled source
    /// does not depend on whether the atlas was installed first. On failure
    /// the program is left unchanged.
    pub fn push_step(&mut self, step: Box<dyn ShaderStep>) -> Result<()> {
        let split = self
            .steps
            .iter()
            .position(|s| s.atlas)
            .unwrap_or(self.steps.len());
        let mut compiled = self.base.clone();
        for installed in &self.steps[..split] {
            compiled = installed.step.apply(&compiled)?;
        }
        compiled = step.apply(&compiled)?;
        for installed in &self.steps[split..] {
            compiled = installed.step.apply(&compiled)?;
        }
        self.steps.insert(split, InstalledStep { step, atlas: false });
        self.compiled = compiled;
        self.revision += 1;
        Ok(())
    }

    /// Install the built-in atlas steps.
    ///
    /// Returns `Ok(false)` when this version is already installed.
    pub fn install_atlas(&mut self, bindings: &AtlasBindings) -> Result<bool> {
        self.install_atlas_steps(ATLAS_SHADER_VERSION, bindings, atlas_steps(bindings))
    }

    /// Install a set of atlas steps under `version`, replacing any atlas
    /// steps of another version while keeping every host step in place.
    ///
    /// On failure the program is left unchanged.
    pub fn install_atlas_steps(
        &mut self,
        version: u32,
        bindings: &AtlasBindings,
        steps: Vec<Box<dyn ShaderStep>>,
    ) -> Result<bool> {
        if self
            .installed
            .as_ref()
            .is_some_and(|(v, b)| *v == version && b == bindings)
        {
            return Ok(false);
        }

        let mut compiled = self.base.clone();
        for installed in self.steps.iter().filter(|s| !s.atlas) {
            compiled = installed.step.apply(&compiled)?;
        }
        for step in &steps {
            compiled = step.apply(&compiled)?;
        }

        self.steps.retain(|s| !s.atlas);
        self.steps
            .extend(steps.into_iter().map(|step| InstalledStep { step, atlas: true }));
        self.compiled = compiled;
        self.installed = Some((version, bindings.clone()));
        self.revision += 1;
        tracing::info!(
            "Installed atlas shader v{version} ({} steps)",
            self.steps.len()
        );
        Ok(true)
    }
}

/// Per-slot uniform data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SlotUniform {
    /// Local ground position of the grid's north-west corner.
    pub origin: Vec2,
    /// Tile edge length in local units.
    pub tile_size: f32,
    /// Cells per side.
    pub grid_size: f32,
    /// One texel in atlas UV units.
    pub texel_size: f32,
    pub zoom: f32,
    /// 1.0 when bound.
    pub enabled: f32,
}

impl SlotUniform {
    /// Uniform data for an atlas grid.
    ///
    /// The grid origin is resolved in f64 relative to the session reference
    /// before narrowing, so precision does not degrade with zoom.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn for_layout(layout: &GridLayout, projection: &Projection) -> Self {
        let origin = projection.tile_origin_local(layout.zoom, layout.origin_x, layout.origin_y);
        Self {
            origin: origin.as_vec2(),
            tile_size: projection.tile_size_local(layout.zoom) as f32,
            grid_size: layout.size as f32,
            texel_size: 1.0 / layout.texture_px().max(1) as f32,
            zoom: f32::from(layout.zoom),
            enabled: 1.0,
        }
    }
}

/// Everything the atlas shader reads from its uniform block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AtlasUniforms {
    /// Highest zoom first.
    pub slots: [SlotUniform; MAX_SLOTS],
    pub alpha_cutoff: f32,
    pub smoothing_factor: f32,
    pub smoothing_radius: f32,
    pub slot_count: u32,
}

impl Default for AtlasUniforms {
    fn default() -> Self {
        Self {
            slots: [SlotUniform::default(); MAX_SLOTS],
            alpha_cutoff: ALPHA_CUTOFF,
            smoothing_factor: 0.0,
            smoothing_radius: 1.0,
            slot_count: 0,
        }
    }
}

impl AtlasUniforms {
    /// Pack up to [`MAX_SLOTS`] layouts, which must already be ordered by
    /// descending zoom.
    #[must_use]
    pub fn new<'a>(
        layouts: impl IntoIterator<Item = &'a GridLayout>,
        projection: &Projection,
        smoothing: &SmoothingConfig,
    ) -> Self {
        let mut uniforms = Self {
            smoothing_factor: smoothing.factor.clamp(0.0, 1.0),
            smoothing_radius: smoothing.radius.max(0.0),
            ..Self::default()
        };
        for (slot, layout) in uniforms.slots.iter_mut().zip(layouts) {
            *slot = SlotUniform::for_layout(layout, projection);
            uniforms.slot_count += 1;
        }
        uniforms
    }
}

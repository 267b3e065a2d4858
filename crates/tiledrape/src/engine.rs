//! The per-frame entry point tying selection, compositing and the shader
//! uniforms together.

use crate::backend::AtlasBackend;
use crate::camera::FrameInputs;
use crate::compositor::{ActiveSlot, AtlasCompositor};
use crate::config::{AtlasConfig, DebounceConfig};
use crate::debounce::{DebounceGate, GateDecision};
use crate::error::FrameRejection;
use crate::frustum::Frustum;
use crate::ground::{GroundFootprint, GroundSampler};
use crate::lod::{LodSelector, Selection, SelectionContext, TileSelector, ZoomRange};
use crate::metrics::ZoomMetrics;
use crate::projection::{Projection, ProjectionReference};
use crate::shader::AtlasUniforms;
use crate::source::{TaskSpawn, TileSource};
use crate::telemetry::{Telemetry, TelemetrySnapshot, ZoomTelemetry};
use crate::tile::SchemeId;

/// How a call to [`TileDrape::update`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The frame's inputs were unusable; nothing but completions changed.
    Skipped(FrameRejection),
    /// The selection was kept; loads and compositing still progressed.
    Debounced,
    /// A new selection was computed and reconciled.
    Recomputed,
}

/// Host services borrowed for one update.
pub struct FrameHost<'a, S, P: ?Sized, B> {
    pub source: &'a S,
    pub spawner: &'a P,
    pub backend: &'a mut B,
    pub ground: &'a dyn GroundSampler,
}

/// Streams map tiles into per-zoom atlases that follow the camera.
///
/// `T` is the source's texture handle and `G` the backend's render target
/// handle.
#[derive(Debug)]
pub struct TileDrape<T, G> {
    scheme: SchemeId,
    projection: Option<Projection>,
    selector: LodSelector,
    gate: DebounceGate,
    compositor: AtlasCompositor<T, G>,
    last_config: Option<AtlasConfig>,
    last_selection: Option<Selection>,
    slots: Vec<ActiveSlot<G>>,
    uniforms: AtlasUniforms,
    telemetry: Telemetry,
}

impl<T, G> TileDrape<T, G>
where
    T: Clone + Send + 'static,
    G: Clone,
{
    #[must_use]
    pub fn new(scheme: SchemeId) -> Self {
        Self {
            scheme,
            projection: None,
            selector: LodSelector::new(),
            gate: DebounceGate::new(),
            compositor: AtlasCompositor::new(),
            last_config: None,
            last_selection: None,
            slots: Vec::new(),
            uniforms: AtlasUniforms::default(),
            telemetry: Telemetry::new(),
        }
    }

    /// Anchor the local frame. Until this is called every frame is skipped.
    pub fn set_reference(&mut self, reference: ProjectionReference) {
        if self.projection.map(|p| p.reference()) == Some(reference) {
            return;
        }
        tracing::info!(
            "Projection reference at mercator ({:.1}, {:.1}), {} units/m",
            reference.origin.x,
            reference.origin.y,
            reference.units_per_meter
        );
        self.projection = Some(Projection::new(reference));
        self.gate.reset();
    }

    #[must_use]
    pub fn projection(&self) -> Option<&Projection> {
        self.projection.as_ref()
    }

    #[must_use]
    pub fn scheme(&self) -> SchemeId {
        self.scheme
    }

    /// Uniforms for the terrain shader as of the last update.
    #[must_use]
    pub fn uniforms(&self) -> &AtlasUniforms {
        &self.uniforms
    }

    /// Render targets bound to the shader slots, highest zoom first.
    #[must_use]
    pub fn active_slots(&self) -> &[ActiveSlot<G>] {
        &self.slots
    }

    #[must_use]
    pub fn compositor(&self) -> &AtlasCompositor<T, G> {
        &self.compositor
    }

    #[must_use]
    pub fn last_selection(&self) -> Option<&Selection> {
        self.last_selection.as_ref()
    }

    #[must_use]
    pub fn selector(&self) -> &LodSelector {
        &self.selector
    }

    /// Advance the atlas by one frame.
    pub fn update<S, P, B>(
        &mut self,
        frame: &FrameInputs,
        config: &AtlasConfig,
        host: FrameHost<'_, S, P, B>,
    ) -> UpdateOutcome
    where
        S: TileSource<Texture = T>,
        P: TaskSpawn + ?Sized,
        B: AtlasBackend<T, Target = G>,
    {
        let FrameHost {
            source,
            spawner,
            backend,
            ground,
        } = host;

        self.compositor.drain_completions();

        let outcome = match self.select_and_reconcile(frame, config, source, backend, ground) {
            Ok(outcome) => outcome,
            Err(rejection) => {
                tracing::debug!("Skipping frame: {rejection}");
                self.telemetry.record_skipped();
                return UpdateOutcome::Skipped(rejection);
            }
        };
        match outcome {
            UpdateOutcome::Recomputed => self.telemetry.record_recomputed(),
            _ => self.telemetry.record_debounced(),
        }

        self.compositor
            .issue_fetches(config.max_new_loads_per_frame, source, spawner);
        self.compositor.composite_dirty(backend);

        self.slots = self.compositor.active_slots();
        if let Some(projection) = &self.projection {
            self.uniforms = AtlasUniforms::new(
                self.slots.iter().map(|slot| &slot.layout),
                projection,
                &config.smoothing,
            );
        }

        if self.telemetry.is_due(frame.time_seconds, &config.telemetry) {
            let snapshot = self.snapshot(frame.time_seconds, config);
            self.telemetry.emit(&snapshot);
        }
        outcome
    }

    fn select_and_reconcile<S, B>(
        &mut self,
        frame: &FrameInputs,
        config: &AtlasConfig,
        source: &S,
        backend: &mut B,
        ground: &dyn GroundSampler,
    ) -> Result<UpdateOutcome, FrameRejection>
    where
        S: TileSource<Texture = T>,
        B: AtlasBackend<T, Target = G>,
    {
        frame.validate()?;
        let projection = self.projection.ok_or(FrameRejection::MissingReference)?;
        let units_per_meter = projection.reference().units_per_meter;

        let config_changed = self.last_config.as_ref() != Some(config);
        let thresholds = DebounceConfig {
            move_meters: config.debounce.move_meters * units_per_meter,
            height_meters: config.debounce.height_meters * units_per_meter,
            ..config.debounce
        };
        match self
            .gate
            .check(&frame.pose, frame.time_seconds, config_changed, &thresholds)
        {
            GateDecision::Hold => return Ok(UpdateOutcome::Debounced),
            GateDecision::Throttled => {
                tracing::debug!("Recomputation throttled");
                return Ok(UpdateOutcome::Debounced);
            }
            GateDecision::Recompute(reason) => {
                tracing::debug!("Recomputing selection: {reason:?}");
            }
        }

        let footprint = GroundFootprint::compute(frame, ground, frame.projection.far())?;
        let metrics = ZoomMetrics::for_frame(
            frame,
            units_per_meter,
            config.min_zoom,
            config.max_zoom,
            config.zoom_bias,
        );
        let ctx = SelectionContext {
            scheme: self.scheme,
            projection: &projection,
            frame,
            config,
            ground,
            metrics,
            frustum: Frustum::from_matrix(frame.view_projection()),
            zoom_range: ZoomRange::for_footprint(&footprint, &metrics),
            footprint,
        };
        let selection = self.selector.select(&ctx);
        self.compositor
            .reconcile(&selection, config, frame.max_texture_size, source, backend);

        self.gate.commit(&frame.pose, frame.time_seconds);
        self.last_config = Some(config.clone());
        self.last_selection = Some(selection);
        Ok(UpdateOutcome::Recomputed)
    }

    /// Current diagnostics, regardless of the telemetry settings.
    #[must_use]
    pub fn snapshot(&self, time_seconds: f64, config: &AtlasConfig) -> TelemetrySnapshot {
        let selection = self.last_selection.as_ref();
        let zooms = self
            .compositor
            .summaries()
            .into_iter()
            .map(|state| ZoomTelemetry {
                candidates: selection
                    .and_then(|s| s.per_zoom.get(&state.zoom))
                    .map_or(0, Vec::len),
                active: self.slots.iter().any(|slot| slot.layout.zoom == state.zoom),
                state,
            })
            .collect();
        TelemetrySnapshot {
            time_seconds,
            strategy: config.strategy,
            zoom_range: selection.map(|s| s.zoom_range),
            frames: self.telemetry.counters(),
            selection: selection.map(|s| s.stats),
            zooms,
            compositor: *self.compositor.stats(),
            bands: self.selector.last_bands().map(|layout| layout.bands.clone()),
        }
    }

    /// Release every atlas and pin. The engine starts over on the next
    /// update.
    pub fn dispose<S, B>(&mut self, source: &S, backend: &mut B)
    where
        S: TileSource<Texture = T>,
        B: AtlasBackend<T, Target = G>,
    {
        self.compositor.dispose(source, backend);
        self.slots.clear();
        self.uniforms = AtlasUniforms::default();
        self.last_selection = None;
        self.last_config = None;
        self.gate.reset();
    }
}

//! Multi-resolution map tile atlases draped over large terrain surfaces.
//!
//! Each frame the engine decides which Web Mercator tiles the camera needs
//! at which zoom levels, streams them through a host-provided
//! [`TileSource`], composites them into one render target per zoom and
//! publishes the [`AtlasUniforms`] a terrain shader needs to sample up to
//! four zooms at once.
//!
//! The crate is free of any rendering framework. A host supplies:
//!
//! - a [`TileSource`] that fetches, decodes and pins tile textures,
//! - a [`TaskSpawn`] implementation that runs fetch futures,
//! - an [`AtlasBackend`] that allocates render targets and draws into them,
//! - a [`GroundSampler`] describing terrain elevation,
//!
//! and calls [`TileDrape::update`] once per frame.
//!
//! # Example
//!
//! ```ignore
//! let mut drape = TileDrape::new(SchemeId::DEFAULT);
//! drape.set_reference(ProjectionReference::from_lon_lat(13.4, 52.5));
//!
//! // Every frame:
//! let outcome = drape.update(&frame, &config, FrameHost {
//!     source: &source,
//!     spawner: &spawner,
//!     backend: &mut backend,
//!     ground: &FlatGround(0.0),
//! });
//! bind_uniforms(drape.uniforms(), drape.active_slots());
//! ```

pub mod backend;
pub mod cache;
pub mod camera;
pub mod compositor;
pub mod config;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod frustum;
pub mod grid;
pub mod ground;
pub mod lod;
pub mod metrics;
pub mod projection;
pub mod shader;
pub mod source;
pub mod telemetry;
pub mod tile;
pub mod zoom_state;

pub use backend::{AtlasBackend, AtlasCell};
pub use cache::PinnedCache;
pub use camera::{CameraPose, CameraProjection, FrameInputs, Viewport};
pub use compositor::{ActiveSlot, AtlasCompositor, CompositorStats, FetchTicket, ZoomSummary};
pub use config::{
    AtlasConfig, CoverageMode, DebounceConfig, LodStrategy, SmoothingConfig, TelemetryConfig,
};
pub use engine::{FrameHost, TileDrape, UpdateOutcome};
pub use error::{Error, FrameRejection, Result};
pub use grid::GridLayout;
pub use ground::{FlatGround, GroundSampler};
pub use lod::{CandidateTile, MAX_SLOTS, Selection, ZoomRange};
pub use projection::{Projection, ProjectionReference};
pub use shader::{AtlasBindings, AtlasUniforms, ShaderProgram, ShaderStep, SlotUniform};
pub use source::{TaskFuture, TaskSpawn, TileFuture, TileSource};
pub use telemetry::TelemetrySnapshot;
pub use tile::{SchemeId, TileKey, TileRange};

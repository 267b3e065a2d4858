//! Level of detail selection: which tiles, at which zooms, for this frame.
//!
//! Two interchangeable strategies implement [`TileSelector`]:
//!
//! - [`TrapezoidSelector`]: quad-tree refinement starting from a coarse ring
//!   of tiles under the view footprint.
//! - [`BandSelector`]: one coverage region per zoom, trimmed into distance
//!   annuli so consecutive zooms neither overlap nor leave gaps.
//!
//! Both share the distance→zoom metrics, frustum culling and tile distance
//! logic in [`SelectionContext`], and both produce a [`Selection`]: per zoom,
//! candidates ordered nearest first and capped at `max_tiles_per_zoom`.

mod bands;
mod trapezoid;

use std::collections::BTreeMap;

use glam::{DVec2, DVec3};
use serde::Serialize;

pub use bands::{Band, BandLayout, BandSelector};
pub use trapezoid::TrapezoidSelector;

use crate::camera::FrameInputs;
use crate::config::{AtlasConfig, LodStrategy};
use crate::frustum::Frustum;
use crate::ground::{GroundFootprint, GroundSampler};
use crate::metrics::ZoomMetrics;
use crate::projection::Projection;
use crate::tile::{SchemeId, TileKey, TileRange, tiles_per_side};

/// Number of zoom levels the shader can sample simultaneously.
pub const MAX_SLOTS: usize = 4;

/// A tile the selector wants this frame. Never kept across frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateTile {
    pub key: TileKey,
    pub x: u32,
    pub y: u32,
    /// 3D distance from the camera to the nearest point of the tile.
    pub distance: f64,
}

/// Inclusive range of zoom levels active this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ZoomRange {
    pub min: u8,
    pub max: u8,
}

impl ZoomRange {
    /// Derive the active range from the nearest visible ground.
    ///
    /// The finest zoom is the one desired at the nearest visible ground
    /// point; the range then spans at most [`MAX_SLOTS`] levels below it.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn for_footprint(footprint: &GroundFootprint, metrics: &ZoomMetrics) -> Self {
        let nearest = footprint.slant_distance(footprint.nearest_ground_distance());
        let max = metrics.desired_zoom(nearest);
        let min = max
            .saturating_sub((MAX_SLOTS - 1) as u8)
            .max(metrics.min_zoom());
        Self { min, max }
    }

    #[must_use]
    pub fn contains(&self, zoom: u8) -> bool {
        (self.min..=self.max).contains(&zoom)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = u8> {
        self.min..=self.max
    }
}

/// Counters describing one selection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SelectionStats {
    /// Quad-tree nodes processed (trapezoid) or tiles examined (bands).
    pub visited: usize,
    /// Tiles rejected by the frustum.
    pub culled: usize,
    /// Tiles rejected by inner-radius exclusion.
    pub excluded: usize,
    /// Tiles dropped by the per-zoom cap.
    pub truncated: usize,
    /// Whether a work or leaf budget stopped refinement early.
    pub budget_exhausted: bool,
}

/// Output of a selector: per-zoom candidates, nearest first.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub zoom_range: ZoomRange,
    pub per_zoom: BTreeMap<u8, Vec<CandidateTile>>,
    pub stats: SelectionStats,
}

impl Selection {
    /// Total number of candidates across all zooms.
    #[must_use]
    pub fn candidate_count(&self) -> usize {
        self.per_zoom.values().map(Vec::len).sum()
    }
}

/// Produces per-zoom tile candidates from the current view.
pub trait TileSelector {
    fn select(&mut self, ctx: &SelectionContext<'_>) -> Selection;
}

/// Everything a selector needs to evaluate tiles for one frame.
pub struct SelectionContext<'a> {
    pub scheme: SchemeId,
    pub projection: &'a Projection,
    pub frame: &'a FrameInputs,
    pub config: &'a AtlasConfig,
    pub ground: &'a dyn GroundSampler,
    pub metrics: ZoomMetrics,
    pub frustum: Frustum,
    pub footprint: GroundFootprint,
    pub zoom_range: ZoomRange,
}

impl SelectionContext<'_> {
    fn camera(&self) -> DVec3 {
        self.frame.pose.position
    }

    fn elevation_at(&self, xz: DVec2) -> f64 {
        self.ground
            .elevation(xz)
            .unwrap_or(self.footprint.ground_elevation)
    }

    /// 3D distance from the camera to the nearest point of a tile.
    #[must_use]
    pub fn tile_distance(&self, zoom: u8, x: u32, y: u32) -> f64 {
        let rect = self.projection.tile_footprint(zoom, x, y);
        let camera = self.camera();
        let nearest = DVec2::new(camera.x, camera.z).clamp(rect.min, rect.max);
        let point = DVec3::new(nearest.x, self.elevation_at(nearest), nearest.y);
        camera.distance(point)
    }

    /// Horizontal distances from the camera's ground point to the nearest and
    /// farthest points of a tile.
    #[must_use]
    pub fn tile_ground_distances(&self, zoom: u8, x: u32, y: u32) -> (f64, f64) {
        let rect = self.projection.tile_footprint(zoom, x, y);
        let ground = self.footprint.camera_ground;
        (rect.distance_to(ground), rect.farthest_distance(ground))
    }

    /// Whether any part of the tile's bounding box is inside the frustum.
    #[must_use]
    pub fn tile_visible(&self, zoom: u8, x: u32, y: u32) -> bool {
        let rect = self.projection.tile_footprint(zoom, x, y);
        let samples = [
            rect.min,
            rect.max,
            DVec2::new(rect.min.x, rect.max.y),
            DVec2::new(rect.max.x, rect.min.y),
            rect.center(),
        ];
        let (mut low, mut high) = (f64::INFINITY, f64::NEG_INFINITY);
        for sample in samples {
            let elevation = self.elevation_at(sample);
            low = low.min(elevation);
            high = high.max(elevation);
        }
        // Pad for relief between the samples.
        let pad = (rect.max.x - rect.min.x) * 0.01;
        self.frustum.intersects_aabb(
            DVec3::new(rect.min.x, low - pad, rect.min.y),
            DVec3::new(rect.max.x, high + pad, rect.max.y),
        )
    }

    /// Tiles within `horizon_reach_tiles` of the camera at `zoom`.
    #[must_use]
    pub fn reach_window(&self, zoom: u8) -> TileRange {
        let (x, y) = self.projection.tile_at(zoom, self.footprint.camera_ground);
        TileRange::new(x, y, x, y).expand(self.config.horizon_reach_tiles, zoom)
    }

    /// Tile step toward the horizontal view direction, if it is not too oblique.
    #[must_use]
    pub fn forward_step(&self) -> Option<(i32, i32)> {
        let forward = self.frame.pose.forward;
        let heading = DVec2::new(forward.x, forward.z).normalize_or_zero();
        if heading == DVec2::ZERO {
            return None;
        }
        // Diagonal steps only when both components are significant.
        let axis = |v: f64| {
            if v > 0.38 {
                1
            } else if v < -0.38 {
                -1
            } else {
                0
            }
        };
        Some((axis(heading.x), axis(heading.y)))
    }

    #[must_use]
    pub fn candidate(&self, zoom: u8, x: u32, y: u32) -> CandidateTile {
        CandidateTile {
            key: TileKey::new(self.scheme, zoom, x, y),
            x,
            y,
            distance: self.tile_distance(zoom, x, y),
        }
    }
}

/// Offset a tile coordinate by one step, staying inside the pyramid.
pub(crate) fn step_tile(zoom: u8, x: u32, y: u32, (dx, dy): (i32, i32)) -> Option<(u32, u32)> {
    let n = i64::from(tiles_per_side(zoom));
    let nx = i64::from(x) + i64::from(dx);
    let ny = i64::from(y) + i64::from(dy);
    if (0..n).contains(&nx) && (0..n).contains(&ny) {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Some((nx as u32, ny as u32))
    } else {
        None
    }
}

/// Sort each zoom's candidates nearest first and apply the per-zoom cap.
pub(crate) fn finalize(
    mut per_zoom: BTreeMap<u8, Vec<CandidateTile>>,
    cap: usize,
    stats: &mut SelectionStats,
) -> BTreeMap<u8, Vec<CandidateTile>> {
    for candidates in per_zoom.values_mut() {
        candidates.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.key.cmp(&b.key)));
        if candidates.len() > cap {
            stats.truncated += candidates.len() - cap;
            candidates.truncate(cap);
        }
    }
    per_zoom.retain(|_, candidates| !candidates.is_empty());
    per_zoom
}

/// Runs whichever strategy the configuration selects.
#[derive(Debug, Default)]
pub struct LodSelector {
    trapezoid: TrapezoidSelector,
    bands: BandSelector,
}

impl LodSelector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Band layout computed by the most recent bands pass, if any.
    #[must_use]
    pub fn last_bands(&self) -> Option<&BandLayout> {
        self.bands.last_layout()
    }
}

impl TileSelector for LodSelector {
    fn select(&mut self, ctx: &SelectionContext<'_>) -> Selection {
        match ctx.config.strategy {
            LodStrategy::Trapezoid => self.trapezoid.select(ctx),
            LodStrategy::Bands => self.bands.select(ctx),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::Fixture;
    use super::*;

    #[test]
    fn test_zoom_range_spans_at_most_four_levels() {
        let fixture = Fixture::new(
            DVec3::new(0.0, 5000.0, 0.0),
            DVec3::new(0.0, -1.0, -0.01),
            AtlasConfig::default(),
        );
        let ctx = fixture.context();
        assert_eq!(ctx.zoom_range.max, 15);
        assert_eq!(ctx.zoom_range.min, 12);
    }

    #[test]
    fn test_zoom_range_respects_min_zoom() {
        let config = AtlasConfig {
            min_zoom: 14,
            ..AtlasConfig::default()
        };
        let fixture = Fixture::new(
            DVec3::new(0.0, 5000.0, 0.0),
            DVec3::new(0.0, -1.0, -0.01),
            config,
        );
        assert_eq!(fixture.context().zoom_range, ZoomRange { min: 14, max: 15 });
    }

    #[test]
    fn test_tile_distance_under_camera_is_height() {
        let fixture = Fixture::new(
            DVec3::new(0.0, 1000.0, 0.0),
            DVec3::new(0.0, -1.0, -0.01),
            AtlasConfig::default(),
        );
        let ctx = fixture.context();
        let (x, y) = fixture.projection.tile_at(14, DVec2::ZERO);
        assert!((ctx.tile_distance(14, x, y) - 1000.0).abs() < 1e-6);
        assert!(ctx.tile_visible(14, x, y));
    }

    #[test]
    fn test_tiles_behind_camera_are_culled() {
        let fixture = Fixture::new(
            DVec3::new(0.0, 200.0, 0.0),
            DVec3::new(0.0, -0.3, -1.0),
            AtlasConfig::default(),
        );
        let ctx = fixture.context();
        let zoom = 16;
        let size = fixture.projection.tile_size_local(zoom);
        // Well behind the camera (positive z).
        let (x, y) = fixture.projection.tile_at(zoom, DVec2::new(0.0, size * 20.0));
        assert!(!ctx.tile_visible(zoom, x, y));
        // Ahead of the camera.
        let (x, y) = fixture.projection.tile_at(zoom, DVec2::new(0.0, -size * 3.0));
        assert!(ctx.tile_visible(zoom, x, y));
    }

    #[test]
    fn test_forward_step() {
        let fixture = Fixture::new(
            DVec3::new(0.0, 200.0, 0.0),
            DVec3::new(1.0, -0.3, -1.0),
            AtlasConfig::default(),
        );
        // North-east: +x, -z (tile rows shrink northward).
        assert_eq!(fixture.context().forward_step(), Some((1, -1)));
    }

    #[test]
    fn test_finalize_sorts_and_caps() {
        let key = |x| TileKey::new(SchemeId::DEFAULT, 5, x, 0);
        let tile = |x, distance| CandidateTile {
            key: key(x),
            x,
            y: 0,
            distance,
        };
        let mut per_zoom = BTreeMap::new();
        per_zoom.insert(5, vec![tile(0, 30.0), tile(1, 10.0), tile(2, 20.0)]);
        per_zoom.insert(6, Vec::new());
        let mut stats = SelectionStats::default();
        let result = finalize(per_zoom, 2, &mut stats);
        let xs: Vec<u32> = result[&5].iter().map(|c| c.x).collect();
        assert_eq!(xs, vec![1, 2]);
        assert_eq!(stats.truncated, 1);
        assert!(!result.contains_key(&6));
    }
}

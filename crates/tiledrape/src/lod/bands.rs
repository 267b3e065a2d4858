//! Per-zoom coverage regions separated into distance annuli.

use std::collections::{BTreeMap, HashSet};

use glam::DVec2;
use serde::Serialize;

use super::{
    CandidateTile, Selection, SelectionContext, SelectionStats, TileSelector, ZoomRange, finalize,
    step_tile,
};
use crate::config::CoverageMode;
use crate::ground::GroundFootprint;
use crate::metrics::ZoomMetrics;
use crate::projection::LocalRect;
use crate::tile::TileRange;

/// Ground annulus covered by one zoom level.
///
/// Radii are horizontal distances from the camera's ground point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Band {
    pub zoom: u8,
    pub inner_radius: f64,
    pub outer_radius: f64,
}

impl Band {
    #[must_use]
    pub fn contains(&self, radius: f64) -> bool {
        radius >= self.inner_radius && radius <= self.outer_radius
    }
}

/// Bands for every zoom in the active range, finest first.
///
/// Each band's inner radius equals the next finer band's outer radius, so
/// the annuli tile the ground without gaps or overlaps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandLayout {
    pub bands: Vec<Band>,
}

impl BandLayout {
    /// Derive the layout from the distance→zoom mapping.
    ///
    /// The finest zoom starts at the camera and the coarsest zoom is
    /// unbounded outward.
    #[must_use]
    pub fn compute(range: ZoomRange, metrics: &ZoomMetrics, footprint: &GroundFootprint) -> Self {
        let outer = |zoom: u8| {
            if zoom == range.min {
                f64::INFINITY
            } else {
                footprint.ground_radius(metrics.max_distance_for_zoom(zoom))
            }
        };
        let bands = range
            .iter()
            .rev()
            .map(|zoom| Band {
                zoom,
                inner_radius: if zoom == range.max { 0.0 } else { outer(zoom + 1) },
                outer_radius: outer(zoom),
            })
            .collect();
        Self { bands }
    }

    #[must_use]
    pub fn band(&self, zoom: u8) -> Option<&Band> {
        self.bands.iter().find(|b| b.zoom == zoom)
    }

    /// The band a ground radius falls into.
    #[must_use]
    pub fn zoom_at(&self, radius: f64) -> Option<u8> {
        self.bands.iter().find(|b| b.contains(radius)).map(|b| b.zoom)
    }
}

/// Viewport/bands LOD strategy.
#[derive(Debug, Default)]
pub struct BandSelector {
    last_layout: Option<BandLayout>,
}

impl BandSelector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Layout used by the most recent selection.
    #[must_use]
    pub fn last_layout(&self) -> Option<&BandLayout> {
        self.last_layout.as_ref()
    }
}

fn coverage_region(ctx: &SelectionContext<'_>, band: &Band) -> Option<TileRange> {
    let zoom = band.zoom;
    let region = match ctx.config.coverage {
        CoverageMode::ViewportBounds => ctx
            .projection
            .tile_range_for_rect(zoom, ctx.footprint.bounds())
            .expand(ctx.config.viewport_padding_tiles, zoom),
        CoverageMode::DistanceBands => {
            let radius = band
                .outer_radius
                .min(ctx.footprint.farthest_ground_distance());
            let center = ctx.footprint.camera_ground;
            let rect = LocalRect {
                min: center - DVec2::splat(radius),
                max: center + DVec2::splat(radius),
            };
            ctx.projection.tile_range_for_rect(zoom, rect)
        }
    };
    region.intersect(&ctx.reach_window(zoom))
}

impl TileSelector for BandSelector {
    fn select(&mut self, ctx: &SelectionContext<'_>) -> Selection {
        let layout = BandLayout::compute(ctx.zoom_range, &ctx.metrics, &ctx.footprint);
        let mut stats = SelectionStats::default();
        let mut per_zoom: BTreeMap<u8, Vec<CandidateTile>> = BTreeMap::new();
        let step = if ctx.config.lookahead {
            ctx.forward_step()
        } else {
            None
        };

        for band in &layout.bands {
            let Some(region) = coverage_region(ctx, band) else {
                continue;
            };
            let zoom = band.zoom;
            let mut accepted = HashSet::new();
            let mut candidates = Vec::new();

            for (x, y) in region.iter() {
                stats.visited += 1;
                let (near, far) = ctx.tile_ground_distances(zoom, x, y);
                if near > band.outer_radius {
                    continue;
                }
                if far <= band.inner_radius {
                    stats.excluded += 1;
                    continue;
                }
                if !ctx.tile_visible(zoom, x, y) {
                    stats.culled += 1;
                    continue;
                }
                accepted.insert((x, y));
                candidates.push(ctx.candidate(zoom, x, y));
            }

            if let Some(step) = step {
                let window = ctx.reach_window(zoom);
                let ahead: Vec<(u32, u32)> = accepted
                    .iter()
                    .filter_map(|&(x, y)| step_tile(zoom, x, y, step))
                    .filter(|&(x, y)| window.contains(x, y))
                    .collect();
                for (x, y) in ahead {
                    if accepted.contains(&(x, y)) {
                        continue;
                    }
                    let (_, far) = ctx.tile_ground_distances(zoom, x, y);
                    if far <= band.inner_radius {
                        continue;
                    }
                    accepted.insert((x, y));
                    candidates.push(ctx.candidate(zoom, x, y));
                }
            }

            if !candidates.is_empty() {
                per_zoom.insert(zoom, candidates);
            }
        }

        let per_zoom = finalize(per_zoom, ctx.config.max_tiles_per_zoom, &mut stats);
        tracing::debug!(
            "Band LOD: zooms {}..={} visited={} culled={} excluded={} truncated={}",
            ctx.zoom_range.min,
            ctx.zoom_range.max,
            stats.visited,
            stats.culled,
            stats.excluded,
            stats.truncated,
        );
        self.last_layout = Some(layout);
        Selection {
            zoom_range: ctx.zoom_range,
            per_zoom,
            stats,
        }
    }
}

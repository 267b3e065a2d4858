//! Quad-tree refinement over the view footprint.
//!
//! Starts from the coarsest-zoom tiles overlapping the footprint and splits
//! any node whose distance calls for a finer zoom, until the desired zoom is
//! reached or a budget runs out. The ring of coarse tiles around the camera
//! is never culled, so fast turns never expose areas with no coverage at all.

use std::collections::BTreeMap;

use super::{CandidateTile, Selection, SelectionContext, SelectionStats, TileSelector, finalize};
use crate::tile::TileRange;

#[derive(Debug, Clone, Copy)]
struct Node {
    zoom: u8,
    x: u32,
    y: u32,
    distance: f64,
}

impl Node {
    fn new(ctx: &SelectionContext<'_>, zoom: u8, x: u32, y: u32) -> Self {
        Self {
            zoom,
            x,
            y,
            distance: ctx.tile_distance(zoom, x, y),
        }
    }
}

/// Quad-tree ("trapezoid") LOD strategy.
#[derive(Debug, Default)]
pub struct TrapezoidSelector {
    /// Reused traversal stack.
    stack: Vec<Node>,
}

impl TrapezoidSelector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push nodes so that the nearest is popped first.
    fn push_nearest_last(&mut self, mut nodes: Vec<Node>) {
        nodes.sort_by(|a, b| b.distance.total_cmp(&a.distance));
        self.stack.extend(nodes);
    }
}

fn accept(leaves: &mut BTreeMap<u8, Vec<CandidateTile>>, ctx: &SelectionContext<'_>, node: Node) {
    leaves.entry(node.zoom).or_default().push(CandidateTile {
        key: crate::tile::TileKey::new(ctx.scheme, node.zoom, node.x, node.y),
        x: node.x,
        y: node.y,
        distance: node.distance,
    });
}

/// Coarse tiles refinement starts from, nearest first.
///
/// The 3x3 ring around the camera's ground point is always included. Other
/// tiles inside the reach window must overlap the footprint quadrilateral;
/// the nearest of them fill the remaining `max_tiles_per_zoom` places.
fn root_nodes(ctx: &SelectionContext<'_>, zoom: u8, stats: &mut SelectionStats) -> Vec<Node> {
    let (cx, cy) = ctx.projection.tile_at(zoom, ctx.footprint.camera_ground);
    let ring = TileRange::new(cx, cy, cx, cy).expand(1, zoom);
    let mut roots: Vec<Node> = ring.iter().map(|(x, y)| Node::new(ctx, zoom, x, y)).collect();

    let mut overlapping = Vec::new();
    let bounds = ctx.projection.tile_range_for_rect(zoom, ctx.footprint.bounds());
    if let Some(range) = bounds.intersect(&ctx.reach_window(zoom)) {
        for (x, y) in range.iter() {
            if ring.contains(x, y) {
                continue;
            }
            if ctx
                .footprint
                .overlaps(&ctx.projection.tile_footprint(zoom, x, y))
            {
                overlapping.push(Node::new(ctx, zoom, x, y));
            } else {
                stats.culled += 1;
            }
        }
    }

    overlapping.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then((a.y, a.x).cmp(&(b.y, b.x)))
    });
    let room = ctx.config.max_tiles_per_zoom.saturating_sub(roots.len());
    if overlapping.len() > room {
        stats.truncated += overlapping.len() - room;
        overlapping.truncate(room);
    }
    roots.extend(overlapping);
    roots
}

impl TileSelector for TrapezoidSelector {
    fn select(&mut self, ctx: &SelectionContext<'_>) -> Selection {
        let range = ctx.zoom_range;
        let root_zoom = range.min;
        let mut stats = SelectionStats::default();
        let mut leaves: BTreeMap<u8, Vec<CandidateTile>> = BTreeMap::new();

        self.stack.clear();
        let roots = root_nodes(ctx, root_zoom, &mut stats);
        let root_count = roots.len();
        self.push_nearest_last(roots);

        // Leaves added by splits; the roots themselves are not counted.
        let mut leaf_total = 0usize;
        let mut work = 0usize;

        while let Some(node) = self.stack.pop() {
            if work >= ctx.config.work_budget {
                // Out of work units: everything still queued is kept as is.
                stats.budget_exhausted = true;
                accept(&mut leaves, ctx, node);
                for rest in self.stack.drain(..) {
                    accept(&mut leaves, ctx, rest);
                }
                break;
            }
            work += 1;
            stats.visited += 1;

            let desired = ctx.metrics.desired_zoom(node.distance).min(range.max);
            if desired <= node.zoom {
                accept(&mut leaves, ctx, node);
                continue;
            }

            let zoom = node.zoom + 1;
            let mut children = Vec::with_capacity(4);
            for (cx, cy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                let (x, y) = (node.x * 2 + cx, node.y * 2 + cy);
                if ctx.tile_visible(zoom, x, y) {
                    children.push(Node::new(ctx, zoom, x, y));
                } else {
                    stats.culled += 1;
                }
            }

            if children.is_empty() {
                // Nothing of this node is on screen. Roots stay regardless.
                if node.zoom == root_zoom {
                    accept(&mut leaves, ctx, node);
                }
                continue;
            }

            let added = children.len() - 1;
            if leaf_total + added > ctx.config.leaf_budget {
                stats.budget_exhausted = true;
                accept(&mut leaves, ctx, node);
                continue;
            }
            leaf_total += added;
            self.push_nearest_last(children);
        }

        let per_zoom = finalize(leaves, ctx.config.max_tiles_per_zoom, &mut stats);
        tracing::debug!(
            "Trapezoid LOD: zooms {}..={} roots={} visited={} culled={} exhausted={}",
            range.min,
            range.max,
            root_count,
            stats.visited,
            stats.culled,
            stats.budget_exhausted,
        );
        Selection {
            zoom_range: range,
            per_zoom,
            stats,
        }
    }
}

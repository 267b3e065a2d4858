//! Atlas grid planning: which square block of tiles an atlas covers.

use serde::Serialize;

use crate::lod::CandidateTile;
use crate::tile::{TileRange, tiles_per_side};

/// Placement of a square atlas grid in the tile pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GridLayout {
    pub zoom: u8,
    /// Tile column of the grid's first cell.
    pub origin_x: u32,
    /// Tile row of the grid's first cell.
    pub origin_y: u32,
    /// Cells per side.
    pub size: u32,
    /// Pixel edge length of one cell.
    pub cell_px: u32,
}

impl GridLayout {
    /// Render target edge length in pixels.
    #[must_use]
    pub fn texture_px(&self) -> u32 {
        self.size * self.cell_px
    }

    #[must_use]
    pub fn cell_count(&self) -> usize {
        (self.size as usize) * (self.size as usize)
    }

    #[must_use]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.origin_x
            && y >= self.origin_y
            && x - self.origin_x < self.size
            && y - self.origin_y < self.size
    }

    /// Row-major cell index of tile `(x, y)`, if inside the grid.
    #[must_use]
    pub fn cell_index(&self, x: u32, y: u32) -> Option<usize> {
        self.contains(x, y).then(|| {
            (y - self.origin_y) as usize * self.size as usize + (x - self.origin_x) as usize
        })
    }

    /// Tile range spanned by the grid.
    #[must_use]
    pub fn range(&self) -> TileRange {
        TileRange::new(
            self.origin_x,
            self.origin_y,
            self.origin_x + self.size - 1,
            self.origin_y + self.size - 1,
        )
    }
}

/// Result of [`plan_grid`].
#[derive(Debug, Clone, PartialEq)]
pub struct GridPlan {
    pub layout: GridLayout,
    /// Candidates that fall outside a size-capped grid.
    pub dropped: usize,
}

/// Largest grid size that fits `max_texture_size` at `cell_px`.
#[must_use]
pub fn max_grid_size(max_texture_size: u32, cell_px: u32, mipmaps: bool) -> u32 {
    let cells = (max_texture_size / cell_px.max(1)).max(1);
    if mipmaps {
        // Largest power of two not above the limit.
        1 << (31 - cells.leading_zeros())
    } else {
        cells
    }
}

/// Plan the grid for one zoom's candidates.
///
/// The grid is centered on the candidate bounds, clamped into the pyramid,
/// and contains the full bounds unless the texture limit forces a cap.
/// Returns `None` when there are no candidates.
#[must_use]
pub fn plan_grid(
    zoom: u8,
    candidates: &[CandidateTile],
    cell_px: u32,
    mipmaps: bool,
    max_texture_size: u32,
) -> Option<GridPlan> {
    let bounds = TileRange::from_tiles(candidates.iter().map(|c| (c.x, c.y)))?;
    let n = tiles_per_side(zoom);

    let extent = bounds.width().max(bounds.height());
    let wanted = if mipmaps {
        extent.next_power_of_two()
    } else {
        extent
    };
    let size = wanted
        .min(max_grid_size(max_texture_size, cell_px, mipmaps))
        .max(1);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let origin = |min: u32, span: u32| -> u32 {
        let centered = i64::from(min) - (i64::from(size) - i64::from(span)) / 2;
        let last = i64::from(n) - i64::from(size);
        if last <= 0 {
            0
        } else {
            centered.clamp(0, last) as u32
        }
    };

    let mut layout = GridLayout {
        zoom,
        origin_x: origin(bounds.min_x, bounds.width()),
        origin_y: origin(bounds.min_y, bounds.height()),
        size,
        cell_px,
    };

    let mut dropped = candidates
        .iter()
        .filter(|c| !layout.contains(c.x, c.y))
        .count();
    if dropped > 0 {
        // Capped grid: anchor on the nearest candidate so detail stays close
        // to the camera.
        let nearest = candidates
            .iter()
            .min_by(|a, b| a.distance.total_cmp(&b.distance))
            .map_or((bounds.min_x, bounds.min_y), |c| (c.x, c.y));
        if !layout.contains(nearest.0, nearest.1) {
            layout.origin_x = origin(nearest.0, 1);
            layout.origin_y = origin(nearest.1, 1);
            dropped = candidates
                .iter()
                .filter(|c| !layout.contains(c.x, c.y))
                .count();
        }
    }

    Some(GridPlan { layout, dropped })
}

//! Tile identifiers and rectangular tile ranges.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Highest zoom level addressable with `u32` tile indices.
pub const MAX_ZOOM: u8 = 30;

/// Number of tiles along one edge of the pyramid at `zoom`.
#[must_use]
pub fn tiles_per_side(zoom: u8) -> u32 {
    1u32 << zoom.min(MAX_ZOOM)
}

/// Identifies a tile pyramid (imagery layer) within a tile source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchemeId(pub u16);

impl SchemeId {
    /// The scheme used when a session only drapes a single layer.
    pub const DEFAULT: SchemeId = SchemeId(0);
}

impl fmt::Display for SchemeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable identifier of a single map tile.
///
/// Used as the key for caching, pinning, and atlas-cell addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileKey {
    /// Imagery layer.
    pub scheme: SchemeId,
    /// Zoom level.
    pub zoom: u8,
    /// Column, growing eastward.
    pub x: u32,
    /// Row, growing southward.
    pub y: u32,
}

impl TileKey {
    /// Create a new tile key.
    #[must_use]
    pub fn new(scheme: SchemeId, zoom: u8, x: u32, y: u32) -> Self {
        Self { scheme, zoom, x, y }
    }

    /// The four tiles one zoom level deeper that cover this tile.
    #[must_use]
    pub fn children(&self) -> [TileKey; 4] {
        let zoom = self.zoom + 1;
        let x = self.x * 2;
        let y = self.y * 2;
        [
            TileKey::new(self.scheme, zoom, x, y),
            TileKey::new(self.scheme, zoom, x + 1, y),
            TileKey::new(self.scheme, zoom, x, y + 1),
            TileKey::new(self.scheme, zoom, x + 1, y + 1),
        ]
    }

    /// The tile one zoom level up that contains this tile.
    #[must_use]
    pub fn parent(&self) -> Option<TileKey> {
        (self.zoom > 0).then(|| TileKey::new(self.scheme, self.zoom - 1, self.x / 2, self.y / 2))
    }

    /// Whether the coordinates are inside the pyramid at this key's zoom.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let n = tiles_per_side(self.zoom);
        self.zoom <= MAX_ZOOM && self.x < n && self.y < n
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.scheme, self.zoom, self.x, self.y)
    }
}

/// Inclusive rectangle of tile coordinates at a single zoom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRange {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl TileRange {
    #[must_use]
    pub fn new(min_x: u32, min_y: u32, max_x: u32, max_y: u32) -> Self {
        Self {
            min_x: min_x.min(max_x),
            min_y: min_y.min(max_y),
            max_x: max_x.max(min_x),
            max_y: max_y.max(min_y),
        }
    }

    /// Smallest range containing every `(x, y)` pair, or `None` if empty.
    pub fn from_tiles(tiles: impl IntoIterator<Item = (u32, u32)>) -> Option<Self> {
        let mut iter = tiles.into_iter();
        let (x, y) = iter.next()?;
        let mut range = Self::new(x, y, x, y);
        for (x, y) in iter {
            range.min_x = range.min_x.min(x);
            range.min_y = range.min_y.min(y);
            range.max_x = range.max_x.max(x);
            range.max_y = range.max_y.max(y);
        }
        Some(range)
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    #[must_use]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        (self.min_x..=self.max_x).contains(&x) && (self.min_y..=self.max_y).contains(&y)
    }

    /// Grow the range by `tiles` on every side, staying inside the pyramid.
    #[must_use]
    pub fn expand(&self, tiles: u32, zoom: u8) -> Self {
        let last = tiles_per_side(zoom) - 1;
        Self {
            min_x: self.min_x.saturating_sub(tiles),
            min_y: self.min_y.saturating_sub(tiles),
            max_x: self.max_x.saturating_add(tiles).min(last),
            max_y: self.max_y.saturating_add(tiles).min(last),
        }
    }

    /// Clamp the range into the pyramid at `zoom`.
    #[must_use]
    pub fn clamp_to_zoom(&self, zoom: u8) -> Self {
        let last = tiles_per_side(zoom) - 1;
        Self::new(
            self.min_x.min(last),
            self.min_y.min(last),
            self.max_x.min(last),
            self.max_y.min(last),
        )
    }

    /// Overlap of two ranges, if any.
    #[must_use]
    pub fn intersect(&self, other: &TileRange) -> Option<TileRange> {
        let min_x = self.min_x.max(other.min_x);
        let min_y = self.min_y.max(other.min_y);
        let max_x = self.max_x.min(other.max_x);
        let max_y = self.max_y.min(other.max_y);
        (min_x <= max_x && min_y <= max_y).then_some(TileRange {
            min_x,
            min_y,
            max_x,
            max_y,
        })
    }

    /// Iterate all coordinates row by row.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        (self.min_y..=self.max_y).flat_map(move |y| (self.min_x..=self.max_x).map(move |x| (x, y)))
    }

    /// Number of tiles in the range.
    #[must_use]
    pub fn count(&self) -> u64 {
        u64::from(self.width()) * u64::from(self.height())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_and_parent() {
        let key = TileKey::new(SchemeId::DEFAULT, 4, 3, 5);
        for child in key.children() {
            assert_eq!(child.zoom, 5);
            assert_eq!(child.parent(), Some(key));
        }
        assert_eq!(TileKey::new(SchemeId::DEFAULT, 0, 0, 0).parent(), None);
    }

    #[test]
    fn test_validity() {
        assert!(TileKey::new(SchemeId::DEFAULT, 2, 3, 3).is_valid());
        assert!(!TileKey::new(SchemeId::DEFAULT, 2, 4, 0).is_valid());
    }

    #[test]
    fn test_range_from_tiles() {
        let range = TileRange::from_tiles([(100, 50), (103, 52), (101, 51)]).unwrap();
        assert_eq!(range, TileRange::new(100, 50, 103, 52));
        assert_eq!(range.width(), 4);
        assert_eq!(range.height(), 3);
        assert_eq!(range.count(), 12);
        assert_eq!(range.iter().count(), 12);
        assert!(TileRange::from_tiles(std::iter::empty()).is_none());
    }

    #[test]
    fn test_range_intersect() {
        let a = TileRange::new(0, 0, 5, 5);
        let b = TileRange::new(3, 4, 9, 9);
        assert_eq!(a.intersect(&b), Some(TileRange::new(3, 4, 5, 5)));
        assert_eq!(a.intersect(&TileRange::new(6, 0, 7, 1)), None);
    }

    #[test]
    fn test_range_expand_clamps() {
        let range = TileRange::new(0, 1, 3, 3).expand(2, 2);
        assert_eq!(range, TileRange::new(0, 0, 3, 3));
        assert_eq!(
            TileRange::new(2, 2, 9, 9).clamp_to_zoom(3),
            TileRange::new(2, 2, 7, 7)
        );
    }
}

//! Live configuration, read by the engine every frame.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Which LOD strategy produces the per-zoom candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LodStrategy {
    /// Quad-tree refinement from a coarse root ring.
    #[default]
    Trapezoid,
    /// One coverage region per zoom, separated into distance annuli.
    Bands,
}

/// How the bands strategy derives each zoom's coverage region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageMode {
    /// Tile-aligned bounds of the screen footprint, padded by a margin.
    #[default]
    ViewportBounds,
    /// A disc around the camera sized by the distance→zoom banding.
    DistanceBands,
}

/// Thresholds that gate selector recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    /// Horizontal camera translation that forces recomputation.
    pub move_meters: f64,
    /// Vertical camera translation that forces recomputation.
    pub height_meters: f64,
    /// View direction change that forces recomputation.
    pub angle_degrees: f64,
    /// After this long, any pose change triggers recomputation.
    pub interval_seconds: f64,
    /// Recomputation never happens more often than this.
    pub min_interval_seconds: f64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            move_meters: 15.0,
            height_meters: 20.0,
            angle_degrees: 1.5,
            interval_seconds: 0.5,
            min_interval_seconds: 0.05,
        }
    }
}

/// Edge-aware smoothing of magnified low-zoom tiles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Blend strength in `[0, 1]`. Zero disables the pass entirely.
    pub factor: f32,
    /// Neighborhood offset in atlas texels.
    pub radius: f32,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            factor: 0.5,
            radius: 1.0,
        }
    }
}

/// Diagnostic snapshot logging.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub log_interval_seconds: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_interval_seconds: 2.0,
        }
    }
}

/// All tunables of the tile-atlas engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlasConfig {
    pub strategy: LodStrategy,
    pub coverage: CoverageMode,
    pub min_zoom: u8,
    pub max_zoom: u8,
    /// Added to the continuous zoom before rounding. Positive values sharpen.
    pub zoom_bias: f64,
    /// Margin around the footprint bounds in `ViewportBounds` coverage.
    pub viewport_padding_tiles: u32,
    /// Extend coverage by one ring of tiles toward the view direction.
    pub lookahead: bool,
    pub max_tiles_per_zoom: usize,
    /// Maximum number of leaves the trapezoid strategy may produce.
    pub leaf_budget: usize,
    /// Maximum number of nodes the trapezoid strategy may visit.
    pub work_budget: usize,
    /// Maximum tiles enumerated from the camera outward at one zoom.
    pub horizon_reach_tiles: u32,
    pub max_new_loads_per_frame: usize,
    /// Round grids up to a power of two so atlases can be mipmapped.
    pub mipmaps: bool,
    pub default_cell_size: u32,
    /// Cell pixel size per zoom, overriding `default_cell_size`.
    pub cell_size_overrides: BTreeMap<u8, u32>,
    pub debounce: DebounceConfig,
    pub smoothing: SmoothingConfig,
    pub telemetry: TelemetryConfig,
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            strategy: LodStrategy::default(),
            coverage: CoverageMode::default(),
            min_zoom: 2,
            max_zoom: 19,
            zoom_bias: 0.0,
            viewport_padding_tiles: 1,
            lookahead: true,
            max_tiles_per_zoom: 96,
            leaf_budget: 256,
            work_budget: 2048,
            horizon_reach_tiles: 48,
            max_new_loads_per_frame: 8,
            mipmaps: false,
            default_cell_size: 256,
            cell_size_overrides: BTreeMap::new(),
            debounce: DebounceConfig::default(),
            smoothing: SmoothingConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl AtlasConfig {
    /// Cell pixel size used for atlases at `zoom`.
    #[must_use]
    pub fn cell_size(&self, zoom: u8) -> u32 {
        self.cell_size_overrides
            .get(&zoom)
            .copied()
            .unwrap_or(self.default_cell_size)
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_size_override() {
        let mut config = AtlasConfig::default();
        config.cell_size_overrides.insert(17, 128);
        assert_eq!(config.cell_size(17), 128);
        assert_eq!(config.cell_size(16), 256);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AtlasConfig =
            serde_json::from_str(r#"{ "strategy": "bands", "debounce": { "move_meters": 5.0 } }"#)
                .unwrap();
        assert_eq!(config.strategy, LodStrategy::Bands);
        assert_eq!(config.debounce.move_meters, 5.0);
        assert_eq!(config.debounce.height_meters, 20.0);
        assert_eq!(config.max_zoom, 19);
    }
}

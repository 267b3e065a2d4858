//! Launch parameter parsing for the viewer.
//!
//! On native, parameters are parsed from command-line arguments using clap.
//! On WASM, defaults are used (CLI argument parsing is not available).

use bevy::prelude::*;
use tiledrape::AtlasConfig;

/// Default starting latitude (Berlin).
const DEFAULT_LAT: f64 = 52.52;
/// Default starting longitude (Berlin).
const DEFAULT_LON: f64 = 13.405;
/// Default camera altitude above the terrain in meters.
const DEFAULT_ALTITUDE: f64 = 1500.0;
/// Default tile URL template.
pub const DEFAULT_TILE_URL: &str = "https://tile.openstreetmap.org/{z}/{x}/{y}.png";

/// Launch parameters for the viewer.
#[derive(Resource, Debug, Clone)]
pub struct LaunchParams {
    /// Latitude of the session reference point in degrees.
    pub lat: f64,
    /// Longitude of the session reference point in degrees.
    pub lon: f64,
    /// Camera altitude above the terrain in meters.
    pub altitude: f64,
    /// Tile URL template with `{z}`, `{x}` and `{y}` placeholders.
    pub tile_url: String,
    /// Initial atlas configuration.
    pub config: AtlasConfig,
}

impl Default for LaunchParams {
    fn default() -> Self {
        Self {
            lat: DEFAULT_LAT,
            lon: DEFAULT_LON,
            altitude: DEFAULT_ALTITUDE,
            tile_url: DEFAULT_TILE_URL.to_string(),
            config: AtlasConfig::default(),
        }
    }
}

#[cfg(not(target_family = "wasm"))]
mod native {
    use std::path::{Path, PathBuf};

    use clap::{Parser, ValueEnum};
    use tiledrape::LodStrategy;

    use super::*;

    /// LOD strategy as a command-line value.
    #[derive(Debug, Clone, Copy, ValueEnum)]
    enum StrategyArg {
        Trapezoid,
        Bands,
    }

    impl From<StrategyArg> for LodStrategy {
        fn from(arg: StrategyArg) -> Self {
            match arg {
                StrategyArg::Trapezoid => LodStrategy::Trapezoid,
                StrategyArg::Bands => LodStrategy::Bands,
            }
        }
    }

    #[derive(Parser)]
    #[command(about = "Drapes streamed map tiles over a terrain plane")]
    struct CliArgs {
        /// Starting latitude in degrees.
        #[arg(long, default_value_t = DEFAULT_LAT)]
        lat: f64,

        /// Starting longitude in degrees.
        #[arg(long, default_value_t = DEFAULT_LON)]
        lon: f64,

        /// Camera altitude above the terrain in meters.
        #[arg(long, default_value_t = DEFAULT_ALTITUDE)]
        altitude: f64,

        /// Tile URL template with {z}, {x} and {y} placeholders.
        #[arg(long, default_value = DEFAULT_TILE_URL)]
        tile_url: String,

        /// LOD strategy, overriding the config file.
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,

        /// JSON file with atlas configuration.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Log a telemetry snapshot periodically.
        #[arg(long)]
        telemetry: bool,
    }

    /// Read an atlas configuration, falling back to defaults on any error.
    fn load_config(path: &Path) -> AtlasConfig {
        let parsed = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|text| parse_config(&text));
        match parsed {
            Ok(config) => {
                tracing::info!("Loaded atlas config from {}", path.display());
                config
            }
            Err(e) => {
                tracing::warn!("Ignoring config {}: {e}", path.display());
                AtlasConfig::default()
            }
        }
    }

    pub fn parse() -> LaunchParams {
        let args = CliArgs::parse();
        let mut config = args
            .config
            .as_deref()
            .map(load_config)
            .unwrap_or_default();
        if let Some(strategy) = args.strategy {
            config.strategy = strategy.into();
        }
        if args.telemetry {
            config.telemetry.enabled = true;
        }
        LaunchParams {
            lat: args.lat,
            lon: args.lon,
            altitude: args.altitude,
            tile_url: args.tile_url,
            config,
        }
    }
}

/// Parse an atlas configuration from JSON. Missing fields keep defaults.
#[cfg_attr(target_family = "wasm", allow(dead_code))]
pub fn parse_config(text: &str) -> Result<AtlasConfig, String> {
    serde_json::from_str(text).map_err(|e| e.to_string())
}

/// Parse launch parameters from CLI args (native) or use defaults (WASM).
pub fn parse() -> LaunchParams {
    #[cfg(not(target_family = "wasm"))]
    {
        native::parse()
    }
    #[cfg(target_family = "wasm")]
    {
        LaunchParams::default()
    }
}

//! Error types for the tiledrape crate.

use std::fmt;

use crate::tile::TileKey;

/// Result type for tiledrape operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while streaming and compositing tiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Fetching a tile from the tile source failed.
    Fetch {
        /// The tile that failed.
        key: TileKey,
        /// The error message.
        message: String,
    },
    /// Tile payload could not be turned into a texture.
    Decode {
        /// The tile that failed.
        key: TileKey,
        /// The error message.
        message: String,
    },
    /// The backend refused to allocate an atlas render target.
    TargetAllocation {
        /// Zoom level the target was meant for.
        zoom: u8,
        /// Requested edge length in pixels.
        requested: u32,
        /// Maximum edge length supported by the device.
        limit: u32,
    },
    /// A shader mutation step could not be applied.
    Shader {
        /// Identifier of the failing step.
        step: &'static str,
        /// The error message.
        message: String,
    },
    /// Cache operation failed.
    Cache {
        /// The operation that failed.
        operation: &'static str,
        /// The error message.
        message: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Fetch { key, message } => write!(f, "fetching tile {key} failed: {message}"),
            Error::Decode { key, message } => write!(f, "decoding tile {key} failed: {message}"),
            Error::TargetAllocation {
                zoom,
                requested,
                limit,
            } => write!(
                f,
                "atlas target for zoom {zoom} needs {requested}px, device limit is {limit}px"
            ),
            Error::Shader { step, message } => {
                write!(f, "shader step '{step}' failed: {message}")
            }
            Error::Cache { operation, message } => {
                write!(f, "cache {operation} failed: {message}")
            }
        }
    }
}

impl std::error::Error for Error {}

/// Reasons a frame's update is skipped without touching the atlas.
///
/// These are expected conditions (camera under the horizon, host not yet
/// initialized) rather than failures, so they are reported through
/// [`UpdateOutcome`](crate::engine::UpdateOutcome) instead of [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRejection {
    /// Camera position or orientation contains NaN or infinity.
    NonFiniteCamera,
    /// Viewport has zero area or the projection is degenerate.
    DegenerateViewport,
    /// No projection reference has been established for the session.
    MissingReference,
    /// No part of the view reaches the ground.
    NoGroundIntersection,
}

impl fmt::Display for FrameRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            FrameRejection::NonFiniteCamera => "camera pose is not finite",
            FrameRejection::DegenerateViewport => "viewport or projection is degenerate",
            FrameRejection::MissingReference => "projection reference is not set",
            FrameRejection::NoGroundIntersection => "view does not intersect the ground",
        };
        f.write_str(reason)
    }
}

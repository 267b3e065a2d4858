//! Seams to the host: where tiles come from and where async work runs.

use std::{future::Future, pin::Pin};

use crate::error::Result;
use crate::tile::TileKey;

/// Future returned by [`TileSource::fetch`].
#[cfg(not(target_family = "wasm"))]
pub type TileFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'static>>;
/// Future returned by [`TileSource::fetch`].
///
/// Browser fetches are not `Send`; the page has a single thread anyway.
#[cfg(target_family = "wasm")]
pub type TileFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + 'static>>;

/// Future handed to a [`TaskSpawn`] implementation.
#[cfg(not(target_family = "wasm"))]
pub type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
/// Future handed to a [`TaskSpawn`] implementation.
#[cfg(target_family = "wasm")]
pub type TaskFuture = Pin<Box<dyn Future<Output = ()> + 'static>>;

/// Asynchronous tile fetch plus reference-counted residency.
///
/// Implementations own fetching, decoding, retries and backoff. A texture
/// stays resident while its pin count is at least one.
pub trait TileSource {
    /// Handle to a decoded tile, cheap to clone.
    type Texture: Clone + Send + 'static;

    /// Start fetching a tile. The future resolves off the update thread.
    fn fetch(&self, key: TileKey) -> TileFuture<Self::Texture>;

    /// Increment the tile's pin count.
    fn pin(&self, key: TileKey);

    /// Decrement the tile's pin count.
    fn unpin(&self, key: TileKey);

    /// The tile's texture if it is already resident.
    fn resident(&self, key: TileKey) -> Option<Self::Texture>;
}

/// Runs fetch futures to completion somewhere other than the update call.
pub trait TaskSpawn {
    fn spawn(&self, task: TaskFuture);
}

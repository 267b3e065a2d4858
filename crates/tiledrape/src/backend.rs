//! GPU-side operations the compositor needs from the renderer.

use crate::error::Result;
use crate::grid::GridLayout;
use crate::tile::TileKey;

/// One grid cell's contents for a composite pass.
#[derive(Debug, Clone)]
pub struct AtlasCell<T> {
    /// Row-major index into the grid.
    pub index: usize,
    /// Tile shown in the cell, `None` for an empty cell.
    pub key: Option<TileKey>,
    /// `None` clears the cell to transparent.
    pub texture: Option<T>,
}

/// Allocates atlas render targets and draws tiles into them.
///
/// All calls happen synchronously inside the engine's update; a composite
/// must be complete when it returns.
pub trait AtlasBackend<T> {
    /// Handle to an atlas render target.
    type Target: Clone;

    /// Allocate a transparent `width × height` target for `zoom`.
    fn create_target(&mut self, zoom: u8, width: u32, height: u32, mipmaps: bool)
    -> Result<Self::Target>;

    /// Free a target. Called at most once per target.
    fn release_target(&mut self, target: Self::Target);

    /// Redraw every listed cell of the target. Cells not listed keep their
    /// contents.
    fn composite(&mut self, target: &mut Self::Target, layout: &GridLayout, cells: &[AtlasCell<T>]);
}

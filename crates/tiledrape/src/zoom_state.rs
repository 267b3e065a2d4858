//! Per-zoom atlas bookkeeping.
//!
//! A [`ZoomLevelState`] owns one atlas grid and its render target, and tracks
//! which tiles the selector wants at that zoom, which of them are pinned,
//! resident, or still being fetched. The compositor creates one lazily when a
//! zoom first needs tiles and disposes of it once the zoom goes inactive.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::backend::{AtlasBackend, AtlasCell};
use crate::error::{Error, Result};
use crate::grid::GridLayout;
use crate::lod::CandidateTile;
use crate::source::TileSource;
use crate::tile::TileKey;

/// What happened to a fetch completion handed to [`ZoomLevelState::complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The texture was bound into its cell.
    Applied,
    /// The fetch was superseded; nothing changed.
    Stale,
    /// The fetch failed; the cell stays transparent.
    Failed,
}

/// Counts from one [`ZoomLevelState::reconcile`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub added: usize,
    pub removed: usize,
    /// New tiles that were already resident and bound immediately.
    pub bound: usize,
}

/// One cell's draw primitive: the tile it shows, if any.
#[derive(Debug, Clone)]
struct Cell<T> {
    key: Option<TileKey>,
    texture: Option<T>,
}

impl<T> Default for Cell<T> {
    fn default() -> Self {
        Self {
            key: None,
            texture: None,
        }
    }
}

/// Atlas state for a single zoom level.
///
/// `T` is the tile texture handle, `G` the render target handle.
#[derive(Debug)]
pub struct ZoomLevelState<T, G> {
    layout: GridLayout,
    target: Option<G>,
    mipmaps: bool,
    cells: Vec<Cell<T>>,
    /// Cells that changed since the last composite.
    dirty_cells: BTreeSet<usize>,
    desired: HashSet<TileKey>,
    pinned: HashSet<TileKey>,
    resident: HashMap<TileKey, T>,
    /// Expected ticket id per tile being fetched.
    in_flight: HashMap<TileKey, u64>,
    /// Tiles whose fetch failed while desired. Not retried until they drop
    /// out of the desired set.
    failed: HashSet<TileKey>,
    /// Desired tiles still to be fetched, nearest first.
    pending: VecDeque<TileKey>,
    generation: u64,
    disposed: bool,
}

impl<T: Clone, G: Clone> ZoomLevelState<T, G> {
    /// Create an empty state. The render target is allocated separately by
    /// [`ZoomLevelState::allocate_target`].
    #[must_use]
    pub fn new(layout: GridLayout, mipmaps: bool) -> Self {
        Self {
            layout,
            target: None,
            mipmaps,
            cells: vec![Cell::default(); layout.cell_count()],
            dirty_cells: BTreeSet::new(),
            desired: HashSet::new(),
            pinned: HashSet::new(),
            resident: HashMap::new(),
            in_flight: HashMap::new(),
            failed: HashSet::new(),
            pending: VecDeque::new(),
            generation: 0,
            disposed: false,
        }
    }

    #[must_use]
    pub fn zoom(&self) -> u8 {
        self.layout.zoom
    }

    #[must_use]
    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    #[must_use]
    pub fn target(&self) -> Option<&G> {
        self.target.as_ref()
    }

    /// Incremented every time the grid is recreated.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.dirty_cells.is_empty()
    }

    #[must_use]
    pub fn desired_len(&self) -> usize {
        self.desired.len()
    }

    #[must_use]
    pub fn resident_len(&self) -> usize {
        self.resident.len()
    }

    #[must_use]
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_pinned(&self, key: TileKey) -> bool {
        self.pinned.contains(&key)
    }

    #[must_use]
    pub fn is_resident(&self, key: TileKey) -> bool {
        self.resident.contains_key(&key)
    }

    /// The ticket id a completion for `key` must carry to be accepted.
    #[must_use]
    pub fn in_flight_ticket(&self, key: TileKey) -> Option<u64> {
        self.in_flight.get(&key).copied()
    }

    /// Switch to a new grid placement or cell size.
    ///
    /// Returns `false` when nothing changed. Otherwise every resident tile
    /// that still fits is rebound into the new grid, all cells are marked
    /// dirty, and the caller must reallocate the render target.
    pub fn apply_layout(&mut self, layout: GridLayout, mipmaps: bool) -> bool {
        if layout == self.layout && mipmaps == self.mipmaps {
            return false;
        }
        self.layout = layout;
        self.mipmaps = mipmaps;
        self.generation += 1;
        self.cells = vec![Cell::default(); layout.cell_count()];
        self.dirty_cells = (0..self.cells.len()).collect();
        let resident: Vec<(TileKey, T)> = self
            .resident
            .iter()
            .map(|(k, t)| (*k, t.clone()))
            .collect();
        for (key, texture) in resident {
            self.bind(key, texture);
        }
        true
    }

    /// Allocate the render target for the current layout, releasing any
    /// previous one.
    pub fn allocate_target<B>(&mut self, backend: &mut B) -> Result<()>
    where
        B: AtlasBackend<T, Target = G>,
    {
        if let Some(old) = self.target.take() {
            backend.release_target(old);
        }
        let px = self.layout.texture_px();
        let target = backend.create_target(self.layout.zoom, px, px, self.mipmaps)?;
        self.target = Some(target);
        self.dirty_cells = (0..self.cells.len()).collect();
        Ok(())
    }

    /// Bring the desired set in line with this frame's candidates.
    ///
    /// Tiles that dropped out are unpinned exactly once, their cells
    /// cleared and any fetch in flight for them forgotten. New tiles are
    /// pinned, bound right away when the source already holds them, and
    /// queued for fetching otherwise.
    pub fn reconcile<S>(&mut self, candidates: &[CandidateTile], source: &S) -> ReconcileStats
    where
        S: TileSource<Texture = T>,
    {
        let mut stats = ReconcileStats::default();
        let wanted: HashSet<TileKey> = candidates
            .iter()
            .filter(|c| self.layout.contains(c.x, c.y))
            .map(|c| c.key)
            .collect();

        let dropped: Vec<TileKey> = self.desired.difference(&wanted).copied().collect();
        for key in dropped {
            self.release(key, source);
            stats.removed += 1;
        }

        for &key in &wanted {
            if self.desired.insert(key) {
                stats.added += 1;
                if self.pinned.insert(key) {
                    source.pin(key);
                }
                if !self.resident.contains_key(&key) {
                    if let Some(texture) = source.resident(key) {
                        self.resident.insert(key, texture.clone());
                        self.bind(key, texture);
                        stats.bound += 1;
                    }
                }
            }
        }

        self.pending = candidates
            .iter()
            .map(|c| c.key)
            .filter(|key| {
                wanted.contains(key)
                    && !self.resident.contains_key(key)
                    && !self.in_flight.contains_key(key)
                    && !self.failed.contains(key)
            })
            .collect();
        stats
    }

    /// Next tile waiting to be fetched, nearest first.
    pub fn next_pending(&mut self) -> Option<TileKey> {
        while let Some(key) = self.pending.pop_front() {
            if self.desired.contains(&key)
                && !self.resident.contains_key(&key)
                && !self.in_flight.contains_key(&key)
            {
                return Some(key);
            }
        }
        None
    }

    /// Record that a fetch for `key` was issued with ticket `id`.
    pub fn begin_fetch(&mut self, key: TileKey, id: u64) {
        self.in_flight.insert(key, id);
    }

    /// Apply a fetch completion if it is still current.
    pub fn complete(&mut self, key: TileKey, id: u64, result: Result<T>) -> CompletionOutcome {
        if self.in_flight.get(&key) != Some(&id) {
            return CompletionOutcome::Stale;
        }
        self.in_flight.remove(&key);
        if !self.desired.contains(&key) {
            return CompletionOutcome::Stale;
        }
        match result {
            Ok(texture) => {
                self.resident.insert(key, texture.clone());
                self.bind(key, texture);
                CompletionOutcome::Applied
            }
            Err(err) => {
                tracing::warn!("Failed to load tile {key}: {err}");
                self.failed.insert(key);
                CompletionOutcome::Failed
            }
        }
    }

    /// Draw every changed cell into the render target.
    ///
    /// Returns whether a composite pass ran.
    pub fn composite<B>(&mut self, backend: &mut B) -> bool
    where
        B: AtlasBackend<T, Target = G>,
    {
        if self.dirty_cells.is_empty() || self.target.is_none() {
            return false;
        }
        let cells: Vec<AtlasCell<T>> = self
            .dirty_cells
            .iter()
            .filter_map(|&index| {
                let cell = self.cells.get(index)?;
                Some(AtlasCell {
                    index,
                    key: cell.key,
                    texture: cell.texture.clone(),
                })
            })
            .collect();
        let Some(target) = self.target.as_mut() else {
            return false;
        };
        backend.composite(target, &self.layout, &cells);
        self.dirty_cells.clear();
        true
    }

    /// Unpin every held tile and release the render target.
    ///
    /// Safe to call more than once.
    pub fn dispose<S, B>(&mut self, source: &S, backend: &mut B)
    where
        S: TileSource<Texture = T>,
        B: AtlasBackend<T, Target = G>,
    {
        if self.disposed {
            return;
        }
        self.disposed = true;
        for key in self.pinned.drain() {
            source.unpin(key);
        }
        if let Some(target) = self.target.take() {
            backend.release_target(target);
        }
        self.desired.clear();
        self.resident.clear();
        self.in_flight.clear();
        self.failed.clear();
        self.pending.clear();
        self.dirty_cells.clear();
        self.cells.clear();
        tracing::debug!("Disposed atlas for zoom {}", self.layout.zoom);
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn release<S>(&mut self, key: TileKey, source: &S)
    where
        S: TileSource<Texture = T>,
    {
        self.desired.remove(&key);
        if self.pinned.remove(&key) {
            source.unpin(key);
        }
        self.resident.remove(&key);
        self.in_flight.remove(&key);
        self.failed.remove(&key);
        if let Some(index) = self.layout.cell_index(key.x, key.y) {
            if let Some(cell) = self.cells.get_mut(index) {
                if cell.key == Some(key) {
                    *cell = Cell::default();
                    self.dirty_cells.insert(index);
                }
            }
        }
    }

    fn bind(&mut self, key: TileKey, texture: T) {
        let Some(index) = self.layout.cell_index(key.x, key.y) else {
            return;
        };
        if let Some(cell) = self.cells.get_mut(index) {
            *cell = Cell {
                key: Some(key),
                texture: Some(texture),
            };
            self.dirty_cells.insert(index);
        }
    }
}

/// Fails when a layout cannot be allocated under `max_texture_size`.
pub(crate) fn check_target_size(layout: &GridLayout, max_texture_size: u32) -> Result<()> {
    let requested = layout.texture_px();
    if requested > max_texture_size {
        return Err(Error::TargetAllocation {
            zoom: layout.zoom,
            requested,
            limit: max_texture_size,
        });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::*;
    use crate::cache::PinnedCache;
    use crate::source::TileFuture;

    /// Tile source backed by a [`PinnedCache`] that records every pin change.
    #[derive(Debug)]
    pub struct RecordingSource {
        pub cache: PinnedCache<u32>,
        pub pins: RefCell<Vec<(TileKey, bool)>>,
        pub fetches: RefCell<Vec<TileKey>>,
        /// Keys whose fetch fails.
        pub failing: RefCell<HashSet<TileKey>>,
    }

    impl RecordingSource {
        pub fn new() -> Self {
            Self {
                cache: PinnedCache::new(64),
                pins: RefCell::new(Vec::new()),
                fetches: RefCell::new(Vec::new()),
                failing: RefCell::new(HashSet::new()),
            }
        }

        /// Number of pins minus unpins per key.
        pub fn balance(&self) -> HashMap<TileKey, i64> {
            let mut balance = HashMap::new();
            for &(key, pin) in self.pins.borrow().iter() {
                *balance.entry(key).or_insert(0) += if pin { 1 } else { -1 };
            }
            balance
        }
    }

    /// Texture payload derived from the key so tests can check bindings.
    pub fn texture_for(key: TileKey) -> u32 {
        key.x * 1000 + key.y
    }

    impl TileSource for RecordingSource {
        type Texture = u32;

        fn fetch(&self, key: TileKey) -> TileFuture<u32> {
            self.fetches.borrow_mut().push(key);
            let fail = self.failing.borrow().contains(&key);
            let cache = self.cache.clone();
            Box::pin(async move {
                if fail {
                    return Err(Error::Fetch {
                        key,
                        message: "HTTP 404".to_string(),
                    });
                }
                let texture = texture_for(key);
                cache.insert(key, texture);
                Ok(texture)
            })
        }

        fn pin(&self, key: TileKey) {
            self.pins.borrow_mut().push((key, true));
            self.cache.pin(key);
        }

        fn unpin(&self, key: TileKey) {
            self.pins.borrow_mut().push((key, false));
            self.cache.unpin(key).unwrap();
        }

        fn resident(&self, key: TileKey) -> Option<u32> {
            self.cache.get(key)
        }
    }

    /// Backend that records allocations and composites in memory.
    #[derive(Debug, Default)]
    pub struct RecordingBackend {
        pub next_id: u32,
        pub live: HashSet<u32>,
        pub released: Vec<u32>,
        /// Per target, cell index → bound texture.
        pub contents: HashMap<u32, HashMap<usize, Option<u32>>>,
        pub composites: usize,
        /// Reject targets larger than this.
        pub limit: Option<u32>,
    }

    impl AtlasBackend<u32> for RecordingBackend {
        type Target = u32;

        fn create_target(&mut self, zoom: u8, width: u32, _height: u32, _mipmaps: bool) -> Result<u32> {
            if let Some(limit) = self.limit {
                if width > limit {
                    return Err(Error::TargetAllocation {
                        zoom,
                        requested: width,
                        limit,
                    });
                }
            }
            self.next_id += 1;
            self.live.insert(self.next_id);
            Ok(self.next_id)
        }

        fn release_target(&mut self, target: u32) {
            assert!(self.live.remove(&target), "target {target} released twice");
            self.released.push(target);
            self.contents.remove(&target);
        }

        fn composite(&mut self, target: &mut u32, _layout: &GridLayout, cells: &[AtlasCell<u32>]) {
            self.composites += 1;
            let contents = self.contents.entry(*target).or_default();
            for cell in cells {
                contents.insert(cell.index, cell.texture);
            }
        }
    }

    pub fn candidate(zoom: u8, x: u32, y: u32, distance: f64) -> CandidateTile {
        CandidateTile {
            key: TileKey::new(crate::tile::SchemeId::DEFAULT, zoom, x, y),
            x,
            y,
            distance,
        }
    }
}

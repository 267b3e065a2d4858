//! Reconciles selector output with per-zoom atlas state.
//!
//! The compositor owns the zoom → [`ZoomLevelState`] table. Each
//! recomputation it creates, re-plans or disposes states to match the
//! selection; every frame it applies fetch completions, issues new fetches
//! within the load quota and re-composites dirty atlases.
//!
//! Fetches run on the host's task spawner and report back through an
//! `async_channel`. Every fetch carries a [`FetchTicket`]; a completion only
//! touches state when the zoom still exists and still expects that ticket.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::backend::AtlasBackend;
use crate::config::AtlasConfig;
use crate::error::Result;
use crate::grid::{GridLayout, plan_grid};
use crate::lod::{MAX_SLOTS, Selection};
use crate::source::{TaskSpawn, TileSource};
use crate::tile::TileKey;
use crate::zoom_state::{CompletionOutcome, ZoomLevelState, check_target_size};

/// Identity captured when a fetch is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchTicket {
    pub zoom: u8,
    pub key: TileKey,
    pub id: u64,
}

struct Completion<T> {
    ticket: FetchTicket,
    result: Result<T>,
}

/// Running totals since the compositor was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompositorStats {
    pub loads_issued: u64,
    pub loads_completed: u64,
    pub loads_failed: u64,
    pub stale_completions: u64,
    /// Pending loads left over after the quota ran out, last frame.
    pub deferred_loads: usize,
    pub target_reallocations: u64,
    pub target_failures: u64,
    /// Candidates outside a size-capped grid, last reconcile.
    pub dropped_by_grid: usize,
    pub composites: u64,
}

/// A zoom state bound to a shader slot.
#[derive(Debug, Clone)]
pub struct ActiveSlot<G> {
    pub layout: GridLayout,
    pub target: G,
}

/// Per-zoom figures for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ZoomSummary {
    pub zoom: u8,
    pub desired: usize,
    pub resident: usize,
    pub in_flight: usize,
    pub pending: usize,
    pub grid_size: u32,
    pub cell_px: u32,
    pub generation: u64,
    pub has_target: bool,
}

/// Owns every active [`ZoomLevelState`].
pub struct AtlasCompositor<T, G> {
    states: BTreeMap<u8, ZoomLevelState<T, G>>,
    completion_tx: async_channel::Sender<Completion<T>>,
    completion_rx: async_channel::Receiver<Completion<T>>,
    next_ticket: u64,
    stats: CompositorStats,
}

impl<T, G> std::fmt::Debug for AtlasCompositor<T, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtlasCompositor")
            .field("zooms", &self.states.keys().collect::<Vec<_>>())
            .field("next_ticket", &self.next_ticket)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<T, G> Default for AtlasCompositor<T, G>
where
    T: Clone + Send + 'static,
    G: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, G> AtlasCompositor<T, G>
where
    T: Clone + Send + 'static,
    G: Clone,
{
    #[must_use]
    pub fn new() -> Self {
        let (completion_tx, completion_rx) = async_channel::unbounded();
        Self {
            states: BTreeMap::new(),
            completion_tx,
            completion_rx,
            next_ticket: 0,
            stats: CompositorStats::default(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> &CompositorStats {
        &self.stats
    }

    #[must_use]
    pub fn state(&self, zoom: u8) -> Option<&ZoomLevelState<T, G>> {
        self.states.get(&zoom)
    }

    /// Zooms that currently have a state, ascending.
    pub fn zooms(&self) -> impl Iterator<Item = u8> + '_ {
        self.states.keys().copied()
    }

    /// Apply every completion that has arrived since the last call.
    ///
    /// Returns the number of completions that changed an atlas.
    pub fn drain_completions(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(completion) = self.completion_rx.try_recv() {
            let FetchTicket { zoom, key, id } = completion.ticket;
            let outcome = match self.states.get_mut(&zoom) {
                Some(state) => state.complete(key, id, completion.result),
                None => CompletionOutcome::Stale,
            };
            match outcome {
                CompletionOutcome::Applied => {
                    self.stats.loads_completed += 1;
                    applied += 1;
                }
                CompletionOutcome::Failed => self.stats.loads_failed += 1,
                CompletionOutcome::Stale => {
                    tracing::debug!("Ignoring stale completion for {key} (ticket {id})");
                    self.stats.stale_completions += 1;
                }
            }
        }
        applied
    }

    /// Match the zoom states to a fresh selection.
    ///
    /// Zooms without candidates are disposed. Others get their grid
    /// re-planned; a changed grid reallocates the render target while the
    /// tile bookkeeping carries over.
    pub fn reconcile<S, B>(
        &mut self,
        selection: &Selection,
        config: &AtlasConfig,
        max_texture_size: u32,
        source: &S,
        backend: &mut B,
    ) where
        S: TileSource<Texture = T>,
        B: AtlasBackend<T, Target = G>,
    {
        let stale: Vec<u8> = self
            .states
            .keys()
            .copied()
            .filter(|zoom| !selection.per_zoom.contains_key(zoom))
            .collect();
        for zoom in stale {
            if let Some(mut state) = self.states.remove(&zoom) {
                state.dispose(source, backend);
            }
        }

        self.stats.dropped_by_grid = 0;
        for (&zoom, candidates) in &selection.per_zoom {
            let cell_px = config.cell_size(zoom);
            let Some(plan) =
                plan_grid(zoom, candidates, cell_px, config.mipmaps, max_texture_size)
            else {
                continue;
            };
            self.stats.dropped_by_grid += plan.dropped;

            let state = self
                .states
                .entry(zoom)
                .or_insert_with(|| ZoomLevelState::new(plan.layout, config.mipmaps));
            let needs_target =
                state.apply_layout(plan.layout, config.mipmaps) || state.target().is_none();
            if needs_target {
                let allocated = check_target_size(&plan.layout, max_texture_size)
                    .and_then(|()| state.allocate_target(backend));
                match allocated {
                    Ok(()) => {
                        self.stats.target_reallocations += 1;
                        tracing::debug!(
                            "Allocated atlas for zoom {zoom}: {0}x{0} cells at ({1}, {2}), generation {3}",
                            plan.layout.size,
                            plan.layout.origin_x,
                            plan.layout.origin_y,
                            state.generation(),
                        );
                    }
                    Err(err) => {
                        self.stats.target_failures += 1;
                        tracing::warn!("Atlas for zoom {zoom} unavailable: {err}");
                    }
                }
            }
            state.reconcile(candidates, source);
        }
    }

    /// Issue pending fetches, at most `quota` in total.
    ///
    /// Coarse zooms go first so that coverage appears before detail; within
    /// a zoom the nearest tiles go first.
    pub fn issue_fetches<S, P>(&mut self, quota: usize, source: &S, spawner: &P) -> usize
    where
        S: TileSource<Texture = T>,
        P: TaskSpawn + ?Sized,
    {
        let mut issued = 0;
        for (&zoom, state) in &mut self.states {
            while issued < quota {
                let Some(key) = state.next_pending() else {
                    break;
                };
                self.next_ticket += 1;
                let ticket = FetchTicket {
                    zoom,
                    key,
                    id: self.next_ticket,
                };
                state.begin_fetch(key, ticket.id);
                let fetch = source.fetch(key);
                let tx = self.completion_tx.clone();
                spawner.spawn(Box::pin(async move {
                    let result = fetch.await;
                    let _ = tx.send(Completion { ticket, result }).await;
                }));
                issued += 1;
            }
        }
        self.stats.loads_issued += issued as u64;
        self.stats.deferred_loads = self.states.values().map(ZoomLevelState::pending_len).sum();
        if self.stats.deferred_loads > 0 {
            tracing::debug!(
                "Load quota reached, {} tiles deferred",
                self.stats.deferred_loads
            );
        }
        issued
    }

    /// Re-composite every dirty atlas. Returns how many ran.
    pub fn composite_dirty<B>(&mut self, backend: &mut B) -> usize
    where
        B: AtlasBackend<T, Target = G>,
    {
        let count = self
            .states
            .values_mut()
            .map(|state| usize::from(state.composite(backend)))
            .sum();
        self.stats.composites += count as u64;
        count
    }

    /// States bound to shader slots: highest zoom first, at most
    /// [`MAX_SLOTS`], only those with a render target.
    #[must_use]
    pub fn active_slots(&self) -> Vec<ActiveSlot<G>> {
        self.states
            .values()
            .rev()
            .filter_map(|state| {
                state.target().map(|target| ActiveSlot {
                    layout: *state.layout(),
                    target: target.clone(),
                })
            })
            .take(MAX_SLOTS)
            .collect()
    }

    #[must_use]
    pub fn summaries(&self) -> Vec<ZoomSummary> {
        self.states
            .values()
            .map(|state| ZoomSummary {
                zoom: state.zoom(),
                desired: state.desired_len(),
                resident: state.resident_len(),
                in_flight: state.in_flight_len(),
                pending: state.pending_len(),
                grid_size: state.layout().size,
                cell_px: state.layout().cell_px,
                generation: state.generation(),
                has_target: state.target().is_some(),
            })
            .collect()
    }

    /// Dispose of every zoom state.
    pub fn dispose<S, B>(&mut self, source: &S, backend: &mut B)
    where
        S: TileSource<Texture = T>,
        B: AtlasBackend<T, Target = G>,
    {
        for (_, mut state) in std::mem::take(&mut self.states) {
            state.dispose(source, backend);
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::cell::RefCell;
    use std::future::Future;
    use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

    use crate::source::{TaskFuture, TaskSpawn};

    pub fn block_on<F: Future>(f: F) -> F::Output {
        fn dummy_raw_waker() -> RawWaker {
            fn no_op(_: *const ()) {}
            fn clone(_: *const ()) -> RawWaker {
                dummy_raw_waker()
            }
            static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no_op, no_op, no_op);
            RawWaker::new(std::ptr::null(), &VTABLE)
        }

        #[allow(unsafe_code)]
        let waker = unsafe { Waker::from_raw(dummy_raw_waker()) };
        let mut cx = Context::from_waker(&waker);
        let mut f = std::pin::pin!(f);

        loop {
            match f.as_mut().poll(&mut cx) {
                Poll::Ready(result) => return result,
                Poll::Pending => {
                    // Test futures never wait on anything.
                    panic!("Future unexpectedly pending");
                }
            }
        }
    }

    /// Collects spawned tasks so a test decides when they complete.
    #[derive(Default)]
    pub struct ManualSpawner {
        pub tasks: RefCell<Vec<TaskFuture>>,
    }

    impl ManualSpawner {
        /// Run every collected task to completion.
        pub fn run_all(&self) -> usize {
            let tasks: Vec<TaskFuture> = self.tasks.borrow_mut().drain(..).collect();
            let count = tasks.len();
            for task in tasks {
                block_on(task);
            }
            count
        }
    }

    impl TaskSpawn for ManualSpawner {
        fn spawn(&self, task: TaskFuture) {
            self.tasks.borrow_mut().push(task);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::test_support::ManualSpawner;
    use super::*;
    use crate::lod::{CandidateTile, SelectionStats, ZoomRange};
    use crate::zoom_state::test_support::{
        RecordingBackend, RecordingSource, candidate, texture_for,
    };

    fn selection(per_zoom: Vec<(u8, Vec<CandidateTile>)>) -> Selection {
        let zooms: Vec<u8> = per_zoom.iter().map(|(z, _)| *z).collect();
        Selection {
            zoom_range: ZoomRange {
                min: zooms.iter().copied().min().unwrap_or(0),
                max: zooms.iter().copied().max().unwrap_or(0),
            },
            per_zoom: per_zoom.into_iter().collect::<BTreeMap<_, _>>(),
            stats: SelectionStats::default(),
        }
    }

    fn row(zoom: u8, xs: std::ops::Range<u32>) -> Vec<CandidateTile> {
        xs.map(|x| candidate(zoom, x, 0, f64::from(x))).collect()
    }

    struct Harness {
        compositor: AtlasCompositor<u32, u32>,
        source: RecordingSource,
        backend: RecordingBackend,
        spawner: ManualSpawner,
        config: AtlasConfig,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                compositor: AtlasCompositor::new(),
                source: RecordingSource::new(),
                backend: RecordingBackend::default(),
                spawner: ManualSpawner::default(),
                config: AtlasConfig::default(),
            }
        }

        fn reconcile(&mut self, selection: &Selection) {
            self.compositor.reconcile(
                selection,
                &self.config,
                8192,
                &self.source,
                &mut self.backend,
            );
        }

        fn issue(&mut self, quota: usize) -> usize {
            self.compositor
                .issue_fetches(quota, &self.source, &self.spawner)
        }
    }

    #[test]
    fn test_full_load_cycle() {
        let mut h = Harness::new();
        h.reconcile(&selection(vec![(10, row(10, 0..3))]));
        assert_eq!(h.issue(8), 3);
        assert_eq!(h.spawner.run_all(), 3);
        assert_eq!(h.compositor.drain_completions(), 3);
        assert_eq!(h.compositor.composite_dirty(&mut h.backend), 1);

        let slots = h.compositor.active_slots();
        assert_eq!(slots.len(), 1);
        let contents = &h.backend.contents[&slots[0].target];
        for x in 0..3 {
            let key = candidate(10, x, 0, 0.0).key;
            let index = slots[0].layout.cell_index(x, 0).unwrap();
            assert_eq!(contents[&index], Some(texture_for(key)));
        }
        assert_eq!(h.compositor.stats().loads_completed, 3);
    }

    #[test]
    fn test_quota_serves_coarse_zoom_first() {
        let mut h = Harness::new();
        h.reconcile(&selection(vec![(10, row(10, 0..3)), (11, row(11, 0..3))]));
        assert_eq!(h.issue(4), 4);
        let fetched: Vec<u8> = h.source.fetches.borrow().iter().map(|k| k.zoom).collect();
        assert_eq!(fetched, vec![10, 10, 10, 11]);
        assert_eq!(h.compositor.stats().deferred_loads, 2);

        // Nothing is fetched twice.
        assert_eq!(h.issue(4), 2);
        assert_eq!(h.source.fetches.borrow().len(), 6);
    }

    #[test]
    fn test_completion_after_zoom_disposed_is_ignored() {
        let mut h = Harness::new();
        h.reconcile(&selection(vec![(10, row(10, 0..2))]));
        h.issue(8);
        h.reconcile(&selection(vec![(12, row(12, 0..1))]));
        assert!(h.compositor.state(10).is_none());
        h.spawner.run_all();
        h.compositor.drain_completions();
        assert_eq!(h.compositor.stats().stale_completions, 2);
        assert!(h.source.balance().iter().all(|(k, &v)| k.zoom == 12 || v == 0));
    }

    #[test]
    fn test_regrid_keeps_in_flight_fetch_valid() {
        let mut h = Harness::new();
        h.reconcile(&selection(vec![(10, row(10, 0..2))]));
        h.issue(8);
        // Wider grid: the state is recreated but the fetches stay current.
        h.reconcile(&selection(vec![(10, row(10, 0..4))]));
        assert!(h.compositor.state(10).unwrap().generation() > 0);
        h.spawner.run_all();
        assert_eq!(h.compositor.drain_completions(), 2);
        assert_eq!(h.compositor.stats().stale_completions, 0);
        assert_eq!(h.backend.released.len(), 1);
    }

    #[test]
    fn test_failed_fetch_counted() {
        let mut h = Harness::new();
        let tiles = row(10, 0..2);
        h.source.failing.borrow_mut().insert(tiles[1].key);
        h.reconcile(&selection(vec![(10, tiles)]));
        h.issue(8);
        h.spawner.run_all();
        assert_eq!(h.compositor.drain_completions(), 1);
        assert_eq!(h.compositor.stats().loads_failed, 1);
    }

    #[test]
    fn test_slots_ordered_by_descending_zoom() {
        let mut h = Harness::new();
        let per_zoom = (10..15).map(|z| (z, row(z, 0..1))).collect();
        h.reconcile(&selection(per_zoom));
        let zooms: Vec<u8> = h
            .compositor
            .active_slots()
            .iter()
            .map(|s| s.layout.zoom)
            .collect();
        assert_eq!(zooms, vec![14, 13, 12, 11]);
    }

    #[test]
    fn test_oversized_grid_has_no_target() {
        let mut h = Harness::new();
        h.backend.limit = Some(512);
        h.reconcile(&selection(vec![(10, row(10, 0..4))]));
        assert!(h.compositor.active_slots().is_empty());
        assert_eq!(h.compositor.stats().target_failures, 1);
    }

    #[test]
    fn test_dispose_releases_everything() {
        let mut h = Harness::new();
        h.reconcile(&selection(vec![(10, row(10, 0..2)), (11, row(11, 0..2))]));
        h.compositor.dispose(&h.source, &mut h.backend);
        assert!(h.backend.live.is_empty());
        assert!(h.source.balance().values().all(|&v| v == 0));
        assert_eq!(h.compositor.zooms().count(), 0);
    }
}

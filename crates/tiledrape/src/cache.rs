//! Reference-counted tile residency.
//!
//! [`PinnedCache`] keeps decoded tiles in memory. A pinned tile is never
//! evicted; once its pin count drops to zero it becomes eligible for
//! eviction, oldest first, whenever the cache is over capacity.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, PoisonError, RwLock},
};

use crate::error::{Error, Result};
use crate::tile::TileKey;

/// In-memory tile cache with pin counts.
///
/// Cloning shares the underlying storage, so a source can hand one clone to
/// its fetch tasks and keep another for pin bookkeeping.
#[derive(Debug)]
pub struct PinnedCache<T> {
    data: Arc<RwLock<PinnedCacheInner<T>>>,
    capacity: usize,
}

#[derive(Debug)]
struct Entry<T> {
    /// `None` while the tile is pinned but not loaded yet.
    value: Option<T>,
    pins: u32,
}

#[derive(Debug)]
struct PinnedCacheInner<T> {
    entries: HashMap<TileKey, Entry<T>>,
    /// Unpinned resident keys, oldest first.
    evictable: VecDeque<TileKey>,
}

impl<T> Default for PinnedCacheInner<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            evictable: VecDeque::new(),
        }
    }
}

impl<T> PinnedCacheInner<T> {
    fn resident_len(&self) -> usize {
        self.entries.values().filter(|e| e.value.is_some()).count()
    }

    fn evict_to(&mut self, capacity: usize) {
        let mut resident = self.resident_len();
        while resident > capacity {
            let Some(oldest) = self.evictable.pop_front() else {
                break;
            };
            if self.entries.remove(&oldest).is_some() {
                tracing::trace!("Evicted tile {oldest}");
                resident -= 1;
            }
        }
    }
}

impl<T: Clone> PinnedCache<T> {
    /// Create a cache that holds at most `capacity` tiles beyond those pinned.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Arc::new(RwLock::new(PinnedCacheInner::default())),
            capacity,
        }
    }

    /// Store a decoded tile.
    ///
    /// Replaces any previous value. Unpinned tiles are immediately
    /// eligible for eviction.
    pub fn insert(&self, key: TileKey, value: T) {
        let mut cache = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let entry = cache.entries.entry(key).or_insert(Entry {
            value: None,
            pins: 0,
        });
        entry.value = Some(value);
        if entry.pins == 0 {
            cache.evictable.retain(|k| *k != key);
            cache.evictable.push_back(key);
        }
        cache.evict_to(self.capacity);
    }

    /// Get a resident tile.
    #[must_use]
    pub fn get(&self, key: TileKey) -> Option<T> {
        let cache = self.data.read().unwrap_or_else(PoisonError::into_inner);
        cache.entries.get(&key).and_then(|e| e.value.clone())
    }

    #[must_use]
    pub fn contains(&self, key: TileKey) -> bool {
        self.get(key).is_some()
    }

    /// Increment the pin count, protecting the tile from eviction.
    ///
    /// Tiles may be pinned before they are loaded.
    pub fn pin(&self, key: TileKey) {
        let mut cache = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let entry = cache.entries.entry(key).or_insert(Entry {
            value: None,
            pins: 0,
        });
        entry.pins += 1;
        if entry.pins == 1 {
            cache.evictable.retain(|k| *k != key);
        }
    }

    /// Decrement the pin count.
    ///
    /// Fails when the tile is not pinned; the cache is left unchanged.
    pub fn unpin(&self, key: TileKey) -> Result<()> {
        let mut cache = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = cache.entries.get_mut(&key).filter(|e| e.pins > 0) else {
            return Err(Error::Cache {
                operation: "unpin",
                message: format!("tile {key} is not pinned"),
            });
        };
        entry.pins -= 1;
        if entry.pins == 0 {
            if entry.value.is_some() {
                cache.evictable.push_back(key);
                cache.evict_to(self.capacity);
            } else {
                cache.entries.remove(&key);
            }
        }
        Ok(())
    }

    /// Current pin count of a tile.
    #[must_use]
    pub fn pin_count(&self, key: TileKey) -> u32 {
        let cache = self.data.read().unwrap_or_else(PoisonError::into_inner);
        cache.entries.get(&key).map_or(0, |e| e.pins)
    }

    /// Number of resident tiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .resident_len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tiles with a non-zero pin count.
    #[must_use]
    pub fn pinned_len(&self) -> usize {
        let cache = self.data.read().unwrap_or_else(PoisonError::into_inner);
        cache.entries.values().filter(|e| e.pins > 0).count()
    }

    /// Drop every unpinned tile.
    pub fn clear_unpinned(&self) {
        let mut cache = self.data.write().unwrap_or_else(PoisonError::into_inner);
        cache.evict_to(0);
    }
}

impl<T> Clone for PinnedCache<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            capacity: self.capacity,
        }
    }
}

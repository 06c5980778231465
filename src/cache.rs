//! Bounded cache of day-sized raw chunks.
//!
//! Entries are immutable `Arc` slices, so concurrent queries share them
//! without copying. Once full, the oldest-inserted entry is evicted.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::models::RawReading;
use crate::tier::Tier;
use crate::EpochMillis;

// ---

/// Stable key for one day-aligned chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub tier: Tier,
    pub day_start: EpochMillis,
    pub day_end: EpochMillis,
}

pub type Chunk = Arc<[RawReading]>;

#[derive(Default)]
struct Entries {
    map: HashMap<ChunkKey, Chunk>,
    order: VecDeque<ChunkKey>,
}

pub struct ChunkCache {
    // ---
    capacity: usize,
    entries: RwLock<Entries>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ChunkCache {
    // ---
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: RwLock::new(Entries::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, key: &ChunkKey) -> Option<Chunk> {
        // ---
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let found = entries.map.get(key).cloned();
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Insert unless already present; an existing entry is never replaced.
    pub fn insert(&self, key: ChunkKey, chunk: Chunk) {
        // ---
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.map.contains_key(&key) {
            return;
        }
        while entries.map.len() >= self.capacity {
            let Some(oldest) = entries.order.pop_front() else {
                break;
            };
            entries.map.remove(&oldest);
            debug!(day_start = oldest.day_start, "Evicted chunk");
        }
        entries.order.push_back(key);
        entries.map.insert(key, chunk);
    }

    pub fn contains(&self, key: &ChunkKey) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

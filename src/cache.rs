//! Stage handle cache with reference-aware release
//!
//! Several nodes may legitimately cache the identical underlying handle
//! (a single-input Merge or an empty-name Root passes its input through
//! unchanged), so the engine-side free happens only once the last cache
//! entry pointing at a resource goes away. This is the only place in the
//! crate allowed to call `UsdEngine::stage_free`.

use crate::engine::{StageHandle, UsdEngine};
use crate::node::NodeId;
use log::debug;
use std::collections::HashMap;

/// Statistics about cache behavior during this session
#[derive(Debug, Default, Clone)]
pub struct CacheStatistics {
    pub cache_hits: usize,
    pub cache_misses: usize,
    /// Entries removed from the cache
    pub entries_freed: usize,
    /// Underlying handles actually released by the engine
    pub handles_released: usize,
}

impl CacheStatistics {
    /// Cache hit ratio over this session
    pub fn hit_ratio(&self) -> f32 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f32 / total as f32
        }
    }
}

/// Maps each owning node to the stage handle it produced
#[derive(Debug, Default)]
pub struct StageHandleCache {
    entries: HashMap<NodeId, StageHandle>,
    stats: CacheStatistics,
}

impl StageHandleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached handle for a node, if present. Does not mutate the cache.
    pub fn get(&mut self, node_id: NodeId) -> Option<StageHandle> {
        match self.entries.get(&node_id).copied() {
            Some(handle) => {
                self.stats.cache_hits += 1;
                Some(handle)
            }
            None => {
                self.stats.cache_misses += 1;
                None
            }
        }
    }

    /// Whether the node currently holds a cache entry
    pub fn contains(&self, node_id: NodeId) -> bool {
        self.entries.contains_key(&node_id)
    }

    /// Cached handle without touching hit/miss statistics
    pub fn peek(&self, node_id: NodeId) -> Option<StageHandle> {
        self.entries.get(&node_id).copied()
    }

    /// Stores a node's compute result, invalidating any prior entry first.
    ///
    /// An absent result only clears; the cache never holds empty entries.
    pub fn set(&mut self, node_id: NodeId, handle: Option<StageHandle>, engine: &dyn UsdEngine) {
        self.free(node_id, engine);
        if let Some(handle) = handle {
            debug!("cache: node {} -> stage {}", node_id, handle.0);
            self.entries.insert(node_id, handle);
        }
    }

    /// Removes the entry for a node; releases the underlying handle when no
    /// other entry references it. A no-op for ids without an entry.
    pub fn free(&mut self, node_id: NodeId, engine: &dyn UsdEngine) {
        let Some(handle) = self.entries.remove(&node_id) else {
            return;
        };
        self.stats.entries_freed += 1;
        let still_referenced = self.entries.values().any(|&h| h == handle);
        if !still_referenced {
            debug!("cache: releasing stage {} (last reference)", handle.0);
            self.stats.handles_released += 1;
            engine.stage_free(handle);
        }
    }

    /// Releases every distinct underlying handle exactly once and clears the
    /// cache. Used on document teardown.
    pub fn free_all(&mut self, engine: &dyn UsdEngine) {
        let mut released: Vec<StageHandle> = Vec::new();
        for &handle in self.entries.values() {
            if !released.contains(&handle) {
                released.push(handle);
            }
        }
        self.stats.entries_freed += self.entries.len();
        self.stats.handles_released += released.len();
        self.entries.clear();
        for handle in released {
            debug!("cache: releasing stage {} (teardown)", handle.0);
            engine.stage_free(handle);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn statistics(&self) -> &CacheStatistics {
        &self.stats
    }
}

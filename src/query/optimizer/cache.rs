use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use xxhash_rust::xxh64::xxh64;

use crate::query::ast::Node;

use super::Sorts;

/// Optimized form of a tree together with the sorts hoisted out of it.
#[derive(Clone, Debug, PartialEq)]
pub struct OptimizedTreeAndSorts {
    /// Rewritten tree without its hoisted sorts.
    pub tree: Node,
    /// Hoisted sorts in application order.
    pub sorts: Sorts,
}

/// Bounded memo from source-tree handle to its optimized form.
///
/// A miss is always safe; callers simply optimize again. In concurrent mode entries are
/// spread over several independently locked LRU shards picked by handle hash; otherwise
/// one shard holds everything. A capacity of zero disables caching.
pub struct OptimizedTreeCache {
    shards: Vec<Mutex<LruCache<String, Arc<OptimizedTreeAndSorts>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl OptimizedTreeCache {
    /// Creates a cache holding roughly `capacity` entries.
    pub fn new(capacity: usize, concurrent: bool, shards: usize) -> Self {
        let shard_count = if capacity == 0 {
            0
        } else if concurrent {
            shards.clamp(1, capacity)
        } else {
            1
        };
        let per_shard_cap = NonZeroUsize::new(capacity.div_ceil(shard_count.max(1)))
            .unwrap_or(NonZeroUsize::MIN);
        let shards = (0..shard_count)
            .map(|_| Mutex::new(LruCache::new(per_shard_cap)))
            .collect();
        Self {
            shards,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Whether lookups can ever hit.
    pub fn is_enabled(&self) -> bool {
        !self.shards.is_empty()
    }

    /// Looks up the optimized form of `tree`.
    pub fn find(&self, tree: &Node) -> Option<Arc<OptimizedTreeAndSorts>> {
        let handle = tree.handle();
        let found = self
            .shard_for(&handle)
            .and_then(|shard| shard.lock().get(&handle).cloned());
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Records the optimized form of `original`; trees whose sorts cannot be cached are
    /// returned without being stored.
    pub fn store(&self, original: &Node, optimized: Node, sorts: Sorts) -> Arc<OptimizedTreeAndSorts> {
        let entry = Arc::new(OptimizedTreeAndSorts {
            tree: optimized,
            sorts,
        });
        if !entry.sorts.can_be_cached() {
            return entry;
        }
        let handle = original.handle();
        if let Some(shard) = self.shard_for(&handle) {
            shard.lock().put(handle, Arc::clone(&entry));
        }
        entry
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    /// Whether the cache holds no entry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry; counters are kept.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }

    /// Lookups that found an entry.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that found nothing.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    fn shard_for(&self, handle: &str) -> Option<&Mutex<LruCache<String, Arc<OptimizedTreeAndSorts>>>> {
        if self.shards.is_empty() {
            return None;
        }
        let idx = (xxh64(handle.as_bytes(), 0) % self.shards.len() as u64) as usize;
        self.shards.get(idx)
    }
}

impl fmt::Debug for OptimizedTreeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimizedTreeCache")
            .field("shards", &self.shards.len())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .finish()
    }
}

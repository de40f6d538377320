//! In-memory LRU cache for tile bytes.
//!
//! Shared by every tile source of a session so that a tile fetched for
//! rendering is not fetched again by a point query on the same frame.
//!
//! ## Memory-Based Eviction
//!
//! The cache is bounded by bytes rather than entry count. When an insert
//! would exceed the limit, ~5% of the budget is evicted in LRU order in one
//! batch. Tile containers are immutable for a forecast run, so entries never
//! expire.

use bytes::Bytes;
use frame_common::TileCoord;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Key of a cached tile: the container it came from plus its coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub container: Arc<str>,
    pub coord: TileCoord,
}

impl TileKey {
    pub fn new(container: Arc<str>, coord: TileCoord) -> Self {
        Self { container, coord }
    }
}

/// Statistics for the tile memory cache.
///
/// All fields are atomic for lock-free reads.
#[derive(Debug, Default)]
pub struct TileMemoryCacheStats {
    /// Total cache hits
    pub hits: AtomicU64,
    /// Total cache misses
    pub misses: AtomicU64,
    /// Total entries evicted
    pub evictions: AtomicU64,
    /// Current cache size in bytes
    pub size_bytes: AtomicU64,
    /// Current number of entries in cache
    pub entry_count: AtomicU64,
    /// Number of batch eviction runs
    pub eviction_runs: AtomicU64,
}

impl TileMemoryCacheStats {
    /// Calculate cache hit rate as a percentage (0-100).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }
}

/// Memory-bounded LRU of tile bytes.
pub struct TileMemoryCache {
    cache: RwLock<LruCache<TileKey, Bytes>>,
    max_bytes: u64,
    stats: TileMemoryCacheStats,
}

impl TileMemoryCache {
    /// Create a cache holding at most `max_size_mb` megabytes of tiles.
    pub fn new(max_size_mb: usize) -> Self {
        Self::with_max_bytes((max_size_mb as u64) * 1024 * 1024)
    }

    /// Create a cache with an exact byte budget.
    pub fn with_max_bytes(max_bytes: u64) -> Self {
        // Eviction is driven by bytes; the entry cap only has to be out of reach.
        const LRU_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1_000_000) {
            Some(n) => n,
            None => NonZeroUsize::MIN,
        };

        Self {
            cache: RwLock::new(LruCache::new(LRU_CAPACITY)),
            max_bytes,
            stats: TileMemoryCacheStats::default(),
        }
    }

    /// Get a tile, updating LRU order and hit/miss statistics.
    pub async fn get(&self, key: &TileKey) -> Option<Bytes> {
        let mut cache = self.cache.write().await;
        match cache.get(key) {
            Some(data) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(data.clone())
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a tile. Tiles larger than the whole budget are not cached.
    pub async fn insert(&self, key: TileKey, data: Bytes) {
        let tile_size = data.len() as u64;
        if tile_size > self.max_bytes {
            return;
        }

        let mut cache = self.cache.write().await;

        if let Some(existing) = cache.pop(&key) {
            self.stats
                .size_bytes
                .fetch_sub(existing.len() as u64, Ordering::Relaxed);
            self.stats.entry_count.fetch_sub(1, Ordering::Relaxed);
        }

        while self.stats.size_bytes.load(Ordering::Relaxed) + tile_size > self.max_bytes {
            if self.evict_batch_locked(&mut cache) == 0 {
                break;
            }
        }

        cache.put(key, data);
        self.stats.entry_count.fetch_add(1, Ordering::Relaxed);
        self.stats
            .size_bytes
            .fetch_add(tile_size, Ordering::Relaxed);
    }

    /// Evict ~5% of the budget in LRU order. Returns the number of entries removed.
    fn evict_batch_locked(&self, cache: &mut LruCache<TileKey, Bytes>) -> usize {
        let target_free = (self.max_bytes / 20).max(1);
        let mut bytes_freed = 0u64;
        let mut entries_evicted = 0usize;

        while bytes_freed < target_free {
            match cache.pop_lru() {
                Some((_, evicted)) => {
                    bytes_freed += evicted.len() as u64;
                    entries_evicted += 1;
                }
                None => break,
            }
        }

        self.stats
            .size_bytes
            .fetch_sub(bytes_freed, Ordering::Relaxed);
        self.stats
            .entry_count
            .fetch_sub(entries_evicted as u64, Ordering::Relaxed);
        self.stats
            .evictions
            .fetch_add(entries_evicted as u64, Ordering::Relaxed);
        self.stats.eviction_runs.fetch_add(1, Ordering::Relaxed);

        debug!(
            entries_evicted = entries_evicted,
            bytes_freed = bytes_freed,
            max_bytes = self.max_bytes,
            "Tile cache batch eviction"
        );

        entries_evicted
    }

    pub fn stats(&self) -> &TileMemoryCacheStats {
        &self.stats
    }

    /// Current number of entries in cache.
    pub fn len(&self) -> usize {
        self.stats.entry_count.load(Ordering::Relaxed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get current cache size in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.stats.size_bytes.load(Ordering::Relaxed)
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Drop every entry. Statistics counters other than size are kept.
    pub async fn clear(&self) {
        let mut cache = self.cache.write().await;
        cache.clear();
        self.stats.size_bytes.store(0, Ordering::Relaxed);
        self.stats.entry_count.store(0, Ordering::Relaxed);
    }
}

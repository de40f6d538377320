//! Gauges published at the end of a session.

use metrics::gauge;
use std::sync::atomic::Ordering;

use frame_scheduler::HeadlessStats;
use tile_store::TileMemoryCache;

/// Publish tile byte cache counters.
pub fn record_tile_cache(cache: &TileMemoryCache) {
    let stats = cache.stats();
    gauge!("tile_memory_cache_hits_total").set(stats.hits.load(Ordering::Relaxed) as f64);
    gauge!("tile_memory_cache_misses_total").set(stats.misses.load(Ordering::Relaxed) as f64);
    gauge!("tile_memory_cache_hit_rate_percent").set(stats.hit_rate());
    gauge!("tile_memory_cache_evictions_total").set(stats.evictions.load(Ordering::Relaxed) as f64);
    gauge!("tile_memory_cache_size_bytes").set(cache.size_bytes() as f64);
    gauge!("tile_memory_cache_entries").set(cache.len() as f64);
}

/// Publish what the headless map applied and discarded.
pub fn record_headless(stats: &HeadlessStats) {
    gauge!("headless_tiles_loaded_total").set(stats.loaded as f64);
    gauge!("headless_tiles_blank_total").set(stats.blank as f64);
    gauge!("headless_completions_discarded_total").set(stats.discarded as f64);
}

//! Engine counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Hit/miss/eviction counters, updated without the engine lock
#[derive(Debug, Default)]
pub(crate) struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    edits_refused: AtomicU64,
}

impl CacheMetrics {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_edit_refused(&self) {
        self.edits_refused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, entries: usize, size: u64, max_size: u64) -> CacheStats {
        CacheStats {
            entries,
            size,
            max_size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            edits_refused: self.edits_refused.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the cache
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Entries in the table, including ones still being written
    pub entries: usize,
    /// Bytes held by published values
    pub size: u64,
    /// Byte budget
    pub max_size: u64,
    pub hits: u64,
    pub misses: u64,
    /// Entries removed by trimming
    pub evictions: u64,
    /// `edit` calls that returned no editor
    pub edits_refused: u64,
}

impl CacheStats {
    /// Hit ratio (0.0 - 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits as f64;
        let total = hits + self.misses as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }
}

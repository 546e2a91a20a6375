use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};

/// Resolver hit/miss counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ResolverStats {
    pub entries_indexed: usize,
    pub loads: u64,
    pub load_failures: u64,
    pub hits_direct: u64,
    pub hits_normalized: u64,
    pub hits_feed: u64,
    pub misses: u64,
    /// When the published index was built, if there is one.
    pub loaded_at: Option<DateTime<Utc>>,
}

/// Lock-free counters shared by concurrent callers.
#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    pub entries_indexed: AtomicUsize,
    pub loads: AtomicU64,
    pub load_failures: AtomicU64,
    pub hits_direct: AtomicU64,
    pub hits_normalized: AtomicU64,
    pub hits_feed: AtomicU64,
    pub misses: AtomicU64,
}

impl StatCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ResolverStats {
        ResolverStats {
            entries_indexed: self.entries_indexed.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            hits_direct: self.hits_direct.load(Ordering::Relaxed),
            hits_normalized: self.hits_normalized.load(Ordering::Relaxed),
            hits_feed: self.hits_feed.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loaded_at: None,
        }
    }
}

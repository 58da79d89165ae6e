//! Content-addressed query cache
//!
//! Maps a query hash to the one live [`Query`] for it. Lookup and insertion
//! happen under a single lock so concurrent creators of the same hash always
//! receive the same instance.
//!
//! After every insertion or hit the cache sweeps: while the summed score of
//! its entries exceeds the budget, the oldest entry is evicted. Entries whose
//! score is not known yet count as zero. The most recently created entry is
//! never evicted, so a single oversized query stays cached. Evicted queries
//! keep working for whoever still holds them.

use crate::query::Query;
use crate::types::QueryHash;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

struct CacheEntry {
    query: Arc<Query>,
    inserted_at: Instant,
    seq: u64,
}

pub struct QueryCache {
    entries: Mutex<HashMap<QueryHash, CacheEntry>>,
    next_seq: AtomicU64,
    max_score: u64,
}

impl QueryCache {
    pub fn new(max_score: u64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            max_score,
        }
    }

    pub fn max_score(&self) -> u64 {
        self.max_score
    }

    /// Return the cached query for `hash`, or insert the one built by `make`.
    ///
    /// The second element is `true` on a hit. `make` runs under the cache lock
    /// and must not touch the cache.
    pub fn get_or_insert_with<F>(&self, hash: QueryHash, make: F) -> (Arc<Query>, bool)
    where
        F: FnOnce() -> Arc<Query>,
    {
        let (query, hit) = {
            let mut entries = self.entries.lock();
            match entries.get(&hash) {
                Some(entry) => (entry.query.clone(), true),
                None => {
                    let query = make();
                    entries.insert(
                        hash,
                        CacheEntry {
                            query: query.clone(),
                            inserted_at: Instant::now(),
                            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                        },
                    );
                    (query, false)
                }
            }
        };
        debug!(hash = %hash.short(), hit, "Query cache lookup");
        self.sweep();
        (query, hit)
    }

    pub fn get(&self, hash: &QueryHash) -> Option<Arc<Query>> {
        self.entries.lock().get(hash).map(|e| e.query.clone())
    }

    pub fn contains(&self, hash: &QueryHash) -> bool {
        self.entries.lock().contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Summed score of all entries, unknown scores counting as zero.
    pub fn total_score(&self) -> u64 {
        self.entries
            .lock()
            .values()
            .map(|e| e.query.score().unwrap_or(0))
            .fold(0u64, u64::saturating_add)
    }

    /// How long the entry for `hash` has been cached.
    pub fn age(&self, hash: &QueryHash) -> Option<std::time::Duration> {
        self.entries.lock().get(hash).map(|e| e.inserted_at.elapsed())
    }

    /// Evict oldest entries until the budget holds. Returns the evicted hashes.
    pub fn sweep(&self) -> Vec<QueryHash> {
        let mut entries = self.entries.lock();
        let mut total = entries
            .values()
            .map(|e| e.query.score().unwrap_or(0))
            .fold(0u64, u64::saturating_add);
        if total <= self.max_score {
            return Vec::new();
        }

        let mut by_age: Vec<(u64, QueryHash, u64)> = entries
            .iter()
            .map(|(hash, e)| (e.seq, *hash, e.query.score().unwrap_or(0)))
            .collect();
        by_age.sort_unstable_by_key(|(seq, _, _)| *seq);

        let mut evicted = Vec::new();
        for (_, hash, score) in by_age {
            if total <= self.max_score || entries.len() <= 1 {
                break;
            }
            entries.remove(&hash);
            total = total.saturating_sub(score);
            evicted.push(hash);
        }
        drop(entries);

        if !evicted.is_empty() {
            debug!(
                evicted = evicted.len(),
                remaining_score = total,
                max_score = self.max_score,
                "Evicted queries from cache"
            );
        }
        evicted
    }

    /// Drop every entry. Outstanding queries are unaffected.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        debug!(entries = entries.len(), "Clearing query cache");
        entries.clear();
    }
}

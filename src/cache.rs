//! A bounded in-memory node cache keyed by nodes-file offset (§1, §4.3, §9).
//!
//! Grounded in `nexuslite`'s `cache/core.rs` + `cache/metrics.rs` shape: an
//! `lru::LruCache` behind a lock, with atomic hit/miss counters exposed as a
//! snapshot struct. The LRU *policy and implementation* are explicitly an
//! external collaborator per the design (§1), so we reach for the `lru`
//! crate directly rather than hand-rolling a replacement.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;

use crate::node::Node;

/// Point-in-time hit/miss/eviction counters for a [`NodeCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub len: usize,
    pub capacity: usize,
}

/// Caches decoded nodes by the file offset they were read from or written
/// to. Offsets are monotonically increasing across the lifetime of a nodes
/// file (§9), so a stale offset is never silently reused for different
/// content — eviction on commit only ever needs to *forget* superseded
/// offsets, never worry about them being recycled.
pub struct NodeCache<V> {
    inner: Mutex<LruCache<u64, Arc<Node<V>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<V> NodeCache<V> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).expect("1 is nonzero"));
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up the node stored at `offset`, recording a hit or a miss.
    pub fn get(&self, offset: u64) -> Option<Arc<Node<V>>> {
        let mut inner = self.inner.lock();
        let found = inner.get(&offset).cloned();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Insert (or refresh) the node stored at `offset`.
    pub fn insert(&self, offset: u64, node: Arc<Node<V>>) {
        self.inner.lock().put(offset, node);
    }

    /// Drop a now-superseded offset from the cache, e.g. the previous
    /// location of a node replaced by a commit's copy-on-write rewrite.
    pub fn invalidate(&self, offset: u64) {
        if self.inner.lock().pop(&offset).is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            len: inner.len(),
            capacity: inner.cap().get(),
        }
    }
}

//! The atomically-swapped database state cell (§4.1, §5, §9).
//!
//! `nexuslite` protects its mutable collection/cache maps with
//! `parking_lot::RwLock`s throughout (`Engine.collections`,
//! `Cache.store`); we follow the same idiom here; but because a read
//! transaction must see one consistent, unchanging snapshot for its whole
//! lifetime (§5's "a started read transaction is unaffected by later
//! commits"), the lock protects not the mutable fields themselves but a
//! single `Arc<DbState>` that gets atomically replaced on commit. Readers
//! clone the `Arc` once and then never touch the lock again.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::manifest::ReplayedManifest;
use crate::node::NodeId;

/// An immutable point-in-time view of the tree's durable state.
#[derive(Debug, Clone)]
pub struct DbState {
    pub root_id: NodeId,
    pub id_counter: NodeId,
    pub manifest: Arc<BTreeMap<NodeId, u64>>,
    pub nodes_offset: u64,
}

impl DbState {
    #[must_use]
    pub fn from_replay(replayed: ReplayedManifest, nodes_offset: u64) -> Self {
        Self {
            root_id: replayed.root_id,
            id_counter: replayed.id_counter,
            manifest: Arc::new(replayed.manifest),
            nodes_offset,
        }
    }
}

/// A cell holding the current `DbState`, swapped atomically by each commit.
pub struct StateCell {
    inner: RwLock<Arc<DbState>>,
}

impl StateCell {
    #[must_use]
    pub fn new(initial: DbState) -> Self {
        Self { inner: RwLock::new(Arc::new(initial)) }
    }

    /// Take an immutable snapshot for a new transaction.
    #[must_use]
    pub fn snapshot(&self) -> Arc<DbState> {
        self.inner.read().clone()
    }

    /// Publish a new state, replacing whatever the cell currently holds.
    /// Called once, at the very end of a successful commit.
    pub fn publish(&self, next: DbState) {
        *self.inner.write() = Arc::new(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_unaffected_by_a_later_publish() {
        let cell = StateCell::new(DbState {
            root_id: 1,
            id_counter: 1,
            manifest: Arc::new(BTreeMap::new()),
            nodes_offset: 0,
        });
        let snap = cell.snapshot();
        cell.publish(DbState { root_id: 2, id_counter: 2, manifest: Arc::new(BTreeMap::new()), nodes_offset: 16 });
        assert_eq!(snap.root_id, 1);
        assert_eq!(cell.snapshot().root_id, 2);
    }
}

//! Transactions: an isolated snapshot plus a copy-on-write overlay (§4.1-§4.3).
//!
//! Grounded in `nexuslite`'s collection-level copy-on-write log
//! (`collection.rs`'s staged-write-then-publish pattern, since removed) and
//! in the teacher's consistent use of `parking_lot` guards held for exactly
//! the duration of a mutation. A [`Transaction`] never touches the database
//! files directly except at `commit`: every read first checks its own
//! overlay, then the shared cache, then falls back to the nodes file.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Error;
use crate::node::{Node, NodeId};
use crate::state::DbState;
use crate::Database;

fn encode_node<V: Serialize>(node: &Node<V>) -> Result<Vec<u8>, Error> {
    bincode::serde::encode_to_vec(node, bincode::config::standard())
        .map_err(|e| Error::Codec(crate::error::CodecError(e.to_string())))
}

fn decode_node<V: DeserializeOwned>(bytes: &[u8]) -> Result<Node<V>, Error> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(n, _)| n)
        .map_err(|e| Error::Codec(crate::error::CodecError(e.to_string())))
}

/// An in-progress transaction. Read transactions never mutate anything;
/// write transactions stage changes in `dirty_nodes` until `commit`.
pub struct Transaction<'db, V> {
    db: &'db Database<V>,
    snapshot: Arc<DbState>,
    dirty_nodes: RefCell<HashMap<NodeId, Option<Node<V>>>>,
    id_counter: Cell<NodeId>,
    root_id: Cell<NodeId>,
    writable: bool,
    // Held for the lifetime of a write transaction so commits serialize;
    // §5 "at most one writer at a time". Dropped (released) on commit/abort.
    _write_guard: Option<parking_lot::MutexGuard<'db, ()>>,
}

impl<'db, V> Transaction<'db, V>
where
    V: Clone + Serialize + DeserializeOwned,
{
    pub(crate) fn new_read(db: &'db Database<V>) -> Self {
        let snapshot = db.state.snapshot();
        let root_id = Cell::new(snapshot.root_id);
        let id_counter = Cell::new(snapshot.id_counter);
        Self {
            db,
            snapshot,
            dirty_nodes: RefCell::new(HashMap::new()),
            id_counter,
            root_id,
            writable: false,
            _write_guard: None,
        }
    }

    pub(crate) fn new_write(db: &'db Database<V>) -> Self {
        let guard = db.write_lock.lock();
        let snapshot = db.state.snapshot();
        let root_id = Cell::new(snapshot.root_id);
        let id_counter = Cell::new(snapshot.id_counter);
        Self {
            db,
            snapshot,
            dirty_nodes: RefCell::new(HashMap::new()),
            id_counter,
            root_id,
            writable: true,
            _write_guard: Some(guard),
        }
    }

    #[must_use]
    pub fn root_id(&self) -> NodeId {
        self.root_id.get()
    }

    pub(crate) fn set_root_id(&self, id: NodeId) {
        self.root_id.set(id);
    }

    /// Allocate a fresh node id for a node created during a split or a new
    /// root (§4.7). Only meaningful inside a write transaction.
    pub(crate) fn new_id(&self) -> NodeId {
        let id = self.id_counter.get() + 1;
        self.id_counter.set(id);
        id
    }

    /// Fetch a node by id: overlay first, then cache, then the file.
    ///
    /// `id == 1` with an empty manifest and a fresh database is the
    /// synthetic bootstrap root (§4.2 step 5): an empty leaf that was never
    /// actually written to disk.
    ///
    /// # Errors
    /// Returns [`Error::CorruptState`] if `id` has been tombstoned in this
    /// transaction's overlay (a logic error: nothing should look up a node
    /// after removing it within the same transaction) or if the manifest
    /// has no entry for `id` and it isn't the bootstrap root.
    pub fn get_node(&self, id: NodeId) -> Result<Arc<Node<V>>, Error> {
        if let Some(entry) = self.dirty_nodes.borrow().get(&id) {
            return match entry {
                Some(node) => Ok(Arc::new(node.clone())),
                None => Err(Error::CorruptState { detail: format!("node {id} looked up after removal") }),
            };
        }

        let Some(&offset) = self.snapshot.manifest.get(&id) else {
            if id == 1 {
                return Ok(Arc::new(Node::empty_leaf(1)));
            }
            return Err(Error::CorruptState { detail: format!("no manifest entry for node {id}") });
        };

        if let Some(cached) = self.db.cache.get(offset) {
            return Ok(cached);
        }
        let bytes = self.db.nodes_file.read_at(offset)?;
        let node: Node<V> = decode_node(&bytes)?;
        let arced = Arc::new(node);
        self.db.cache.insert(offset, arced.clone());
        Ok(arced)
    }

    /// Stage a modified or newly created node into this transaction's
    /// overlay, keyed by its own id.
    pub fn put_node(&self, node: Node<V>) {
        debug_assert!(self.writable, "put_node called on a read-only transaction");
        self.dirty_nodes.borrow_mut().insert(node.id(), Some(node));
    }

    /// Mark a node's id as orphaned: its content is no longer reachable
    /// from the tree rooted at the transaction's (eventual) new root.
    pub fn tombstone(&self, id: NodeId) {
        debug_assert!(self.writable, "tombstone called on a read-only transaction");
        self.dirty_nodes.borrow_mut().insert(id, None);
    }

    /// Abort a write transaction: simply drop the overlay and release the
    /// writer lock without touching durable state. A no-op for read
    /// transactions.
    pub fn abort(self) {
        // Dropping self drops `_write_guard`, releasing the writer lock.
    }

    /// Commit a write transaction: append every staged node, then the new
    /// root pointer, as one manifest append, then publish the new state.
    /// A no-op (but still valid) call on a read transaction.
    ///
    /// # Errors
    /// Returns [`Error::Io`] if appending to the nodes file or manifest
    /// fails, or [`Error::Codec`] if a staged node fails to encode.
    pub fn commit(self) -> Result<(), Error> {
        if !self.writable {
            return Ok(());
        }

        let mut new_manifest = (*self.snapshot.manifest).clone();
        let mut records = Vec::new();

        for (id, maybe_node) in self.dirty_nodes.borrow().iter() {
            match maybe_node {
                Some(node) => {
                    let encoded = encode_node(node)?;
                    let offset = self.db.nodes_file.append(&encoded)?;
                    if let Some(&old_offset) = new_manifest.get(id) {
                        self.db.cache.invalidate(old_offset);
                    }
                    self.db.cache.insert(offset, Arc::new(node.clone()));
                    new_manifest.insert(*id, offset);
                    records.push((*id, offset));
                }
                None => {
                    if let Some(old_offset) = new_manifest.remove(id) {
                        self.db.cache.invalidate(old_offset);
                    }
                    records.push((*id, crate::manifest::TOMBSTONE_PAYLOAD));
                }
            }
        }

        // §6: every commit's run of node records is followed by an 8-byte
        // zero padding record, whether or not the run was empty.
        self.db.nodes_file.append_commit_padding()?;

        records.push((0, self.root_id.get()));
        self.db.manifest_file.lock().append_records(&records)?;

        let new_state = DbState {
            root_id: self.root_id.get(),
            id_counter: self.id_counter.get(),
            manifest: Arc::new(new_manifest),
            nodes_offset: self.db.nodes_file.len()?,
        };
        self.db.state.publish(new_state);
        Ok(())
    }
}

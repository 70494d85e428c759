//! `ambertree` — an embedded, single-process, durable ordered key-value
//! store backed by a disk-resident copy-on-write B+tree.
//!
//! The public surface is small by design: open a [`Database`], run
//! [`Transaction`]s against it (either through the convenience
//! `b_get`/`b_insert`/`b_remove`/`b_seek` methods, or by borrowing a
//! transaction directly for multi-step work), and let `commit` publish the
//! result durably. Everything else — the manifest/nodes file formats, the
//! node cache, the tree algorithms — is implementation detail reachable
//! through the crate's module tree for anyone embedding deeper than the
//! top-level API.
//!
//! Grounded throughout in `nexuslite`'s engine-facade shape: a thin
//! `Database` type backed by a process-wide open-database registry
//! (`DB_REGISTRY`/`ENGINE_WEAK`), `parking_lot` guards held for the
//! shortest span that correctness allows, and `thiserror`/`log` at every
//! fallible or notable boundary.

#![forbid(unsafe_code)]

pub mod btree;
pub mod cache;
pub mod codec;
pub mod error;
pub mod logger;
pub mod manifest;
pub mod node;
pub mod nodes_file;
pub mod pathkey;
pub mod state;
pub mod txn;

mod fsutil;
mod utils;

use std::any::Any;
use std::collections::HashMap;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Weak};

use log::info;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::cache::{CacheStats, NodeCache};
use crate::error::Error;
use crate::manifest::ManifestFile;
use crate::node::{Key, NodeId};
use crate::nodes_file::NodesFile;
use crate::state::{DbState, StateCell};
pub use crate::txn::Transaction;

/// The tree's branching factor: the maximum number of records a leaf may
/// hold, and the maximum number of children an internal node may hold,
/// before it splits. Checked against the on-disk manifest header at open
/// time — a mismatch means the database was created by a build with a
/// different `ORDER` and is rejected rather than silently misread.
pub const ORDER: usize = 32;

/// Snapshot of a database's bookkeeping, for diagnostics and tests.
#[derive(Debug, Clone)]
pub struct Stats {
    pub root_id: NodeId,
    pub id_counter: NodeId,
    pub manifest_len: usize,
    pub nodes_offset: u64,
    pub cache: CacheStats,
}

/// Builder for opening a [`Database`], mirroring the shape of
/// `nexuslite`'s cache-config builder: a handful of tunables with sane
/// defaults, consumed by a single terminal `open` call.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    cache_capacity: usize,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self { cache_capacity: 32 }
    }
}

impl OpenOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bounded node cache's capacity (default 32 entries).
    #[must_use]
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Open (creating if absent) the database rooted at `dir`.
    ///
    /// Reopening a path that is already open in this process closes the
    /// stale handle and reconstructs a fresh one from a new manifest/nodes
    /// replay (§4.2's "idempotent reinitialization") rather than handing
    /// back the existing live handle — a second `open` with different
    /// `OpenOptions` (e.g. a new cache capacity) takes effect rather than
    /// silently inheriting the first call's settings. Handles already
    /// cloned out of the stale registry entry keep working; they simply
    /// stop being the one a later `open` of the same path returns.
    ///
    /// # Errors
    /// Returns [`Error::IncompatibleVersion`] / [`Error::OrderMismatch`] if
    /// the on-disk manifest header doesn't match this build, and
    /// [`Error::Io`] for lower-level failures opening the manifest or
    /// nodes files.
    pub fn open<V>(&self, dir: &Path) -> Result<Database<V>, Error>
    where
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let path = fsutil::normalize_db_path(dir);
        std::fs::create_dir_all(&path)?;
        let _ = logger::init_for_db(&path);

        if registry::lookup::<V>(&path).is_some() {
            info!("closing stale handle for {} before reopening", path.display());
            registry::remove(&path);
        }

        let manifest_path = path.join("manifest");
        let nodes_path = path.join("nodes");
        let order_u32 = u32::try_from(ORDER).expect("ORDER fits in u32");
        let (manifest_file, replayed) = ManifestFile::open(&manifest_path, order_u32)?;
        let (nodes_file, nodes_offset) = NodesFile::open(&nodes_path)?;
        let state = StateCell::new(DbState::from_replay(replayed, nodes_offset));
        let cache = NodeCache::new(self.cache_capacity);

        let inner = Arc::new(DatabaseInner {
            path: path.clone(),
            manifest_file: Mutex::new(manifest_file),
            nodes_file,
            cache,
            state,
            write_lock: Mutex::new(()),
        });
        registry::insert(path, &inner);
        info!("opened database at {}", inner.path.display());
        Ok(Database { inner })
    }
}

pub(crate) struct DatabaseInner<V> {
    pub(crate) path: PathBuf,
    pub(crate) manifest_file: Mutex<ManifestFile>,
    pub(crate) nodes_file: NodesFile,
    pub(crate) cache: NodeCache<V>,
    pub(crate) state: StateCell,
    pub(crate) write_lock: Mutex<()>,
}

/// A handle to an open database. Cheap to clone: all clones share the
/// same underlying files, cache, and state cell.
pub struct Database<V> {
    inner: Arc<DatabaseInner<V>>,
}

impl<V> Clone for Database<V> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<V> std::ops::Deref for Database<V> {
    type Target = DatabaseInner<V>;
    fn deref(&self) -> &DatabaseInner<V> {
        &self.inner
    }
}

impl<V> Database<V>
where
    V: Clone + Serialize + DeserializeOwned,
{
    #[must_use]
    pub fn read_transaction(&self) -> Transaction<'_, V> {
        Transaction::new_read(self)
    }

    #[must_use]
    pub fn write_transaction(&self) -> Transaction<'_, V> {
        Transaction::new_write(self)
    }

    /// Run `f` against a fresh read transaction. The transaction is
    /// inherently read-only, so there is nothing to commit.
    ///
    /// # Errors
    /// Propagates whatever `f` returns as an error.
    pub fn with_read_transaction<F, T>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&Transaction<'_, V>) -> Result<T, Error>,
    {
        let txn = self.read_transaction();
        f(&txn)
    }

    /// Run `f` against a fresh write transaction and commit on success.
    /// If `f` returns an error, the transaction is dropped (equivalent to
    /// an abort) and nothing is written.
    ///
    /// # Errors
    /// Propagates whatever `f` returns, or a commit failure.
    pub fn with_write_transaction<F, T>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&Transaction<'_, V>) -> Result<T, Error>,
    {
        let txn = self.write_transaction();
        let out = f(&txn)?;
        txn.commit()?;
        Ok(out)
    }

    /// # Errors
    /// Returns an [`Error`] if a node on the lookup path cannot be read.
    pub fn b_get(&self, key: &[u8]) -> Result<Option<V>, Error> {
        let txn = self.read_transaction();
        btree::get(&txn, key)
    }

    /// # Errors
    /// Returns an [`Error`] if a node on the scan path cannot be read.
    pub fn b_seek(&self, start: Bound<&[u8]>, end: Bound<&[u8]>, limit: Option<usize>) -> Result<Vec<(Key, V)>, Error> {
        let txn = self.read_transaction();
        btree::seek(&txn, start, end, limit)
    }

    /// # Errors
    /// Returns an [`Error`] if the insert or the commit fails.
    pub fn b_insert(&self, key: &[u8], value: V) -> Result<(), Error> {
        let txn = self.write_transaction();
        btree::insert(&txn, key, value)?;
        txn.commit()
    }

    /// # Errors
    /// Returns an [`Error`] if the removal or the commit fails.
    pub fn b_remove(&self, key: &[u8]) -> Result<(), Error> {
        let txn = self.write_transaction();
        btree::remove(&txn, key)?;
        txn.commit()
    }

    #[must_use]
    pub fn stats(&self) -> Stats {
        let snap = self.state.snapshot();
        Stats {
            root_id: snap.root_id,
            id_counter: snap.id_counter,
            manifest_len: snap.manifest.len(),
            nodes_offset: snap.nodes_offset,
            cache: self.cache.stats(),
        }
    }

    /// Drop this database's entry from the process-wide registry so a
    /// later `open` of the same path starts a fresh handle rather than
    /// reusing this one. Existing clones of this handle keep working.
    pub fn close(&self) {
        registry::remove(&self.path);
    }
}

/// Open (creating if absent) the database rooted at `dir` with default
/// options. Shorthand for `OpenOptions::new().open(dir)`.
///
/// # Errors
/// See [`OpenOptions::open`].
pub fn open<V>(dir: impl AsRef<Path>) -> Result<Database<V>, Error>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    OpenOptions::new().open(dir.as_ref())
}

/// Drop every database from the process-wide registry. Existing handles
/// keep working; a later `open` of any of their paths starts fresh.
pub fn close_all() {
    registry::clear();
}

mod registry {
    use super::{Any, Arc, DatabaseInner, HashMap, LazyLock, Path, PathBuf, RwLock, Weak};

    static REGISTRY: LazyLock<RwLock<HashMap<PathBuf, Weak<dyn Any + Send + Sync>>>> =
        LazyLock::new(|| RwLock::new(HashMap::new()));

    pub(crate) fn lookup<V: Send + Sync + 'static>(path: &Path) -> Option<Arc<DatabaseInner<V>>> {
        let guard = REGISTRY.read();
        let weak = guard.get(path)?;
        weak.upgrade()?.downcast::<DatabaseInner<V>>().ok()
    }

    pub(crate) fn insert<V: Send + Sync + 'static>(path: PathBuf, inner: &Arc<DatabaseInner<V>>) {
        let weak: Weak<dyn Any + Send + Sync> = Arc::downgrade(inner);
        REGISTRY.write().insert(path, weak);
    }

    pub(crate) fn remove(path: &Path) {
        REGISTRY.write().remove(path);
    }

    pub(crate) fn clear() {
        REGISTRY.write().clear();
    }
}

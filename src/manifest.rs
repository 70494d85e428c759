//! The manifest file: header + append-only `(id, payload)` log (§4.2, §6).
//!
//! Grounded in the shape of `nexuslite`'s `recovery/wasp/manifest.rs`
//! (`WaspFile::open`/`read_manifest`/`write_manifest`), but the on-disk
//! layout here is the one spec'd in §6 — a 16-byte fixed header followed by
//! a flat append-only log of 16-byte `(id: u64, payload: u64)` records,
//! rather than WASP's double-buffered 16 KB manifest pages. `id == 0` marks
//! a root-pointer record; any other id is a `manifest[id] := offset` update.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use crate::error::Error;
use crate::node::NodeId;

pub const FILE_TYPE_TAG: u64 = 14_404_350;
pub const FILE_VERSION_TAG: u32 = 1;
const HEADER_LEN: usize = 16;
const RECORD_LEN: usize = 16;

/// Reserved payload value marking a manifest record as a tombstone (§3: "a
/// commit that writes null for its id in dirty-nodes appends a tombstone to
/// the manifest"). No live offset ever equals `u64::MAX`, since offsets are
/// bounded by the nodes file's actual length.
pub const TOMBSTONE_PAYLOAD: u64 = u64::MAX;

/// The state recovered by replaying a manifest file from scratch.
#[derive(Debug, Clone)]
pub struct ReplayedManifest {
    pub root_id: NodeId,
    pub id_counter: NodeId,
    pub manifest: BTreeMap<NodeId, u64>,
}

impl Default for ReplayedManifest {
    fn default() -> Self {
        // §4.2 step 4: the initial root-id is 1, the initial id-counter is 1.
        Self { root_id: 1, id_counter: 1, manifest: BTreeMap::new() }
    }
}

/// Replay the manifest body (everything after the 16-byte header).
///
/// Any trailing bytes that don't form a complete 16-byte record are
/// ignored — §9 open ambiguity (ii) and testable scenario S6: a torn
/// trailing record (from a crash mid-append) must not affect recovered
/// state.
fn replay(body: &[u8]) -> ReplayedManifest {
    let mut state = ReplayedManifest::default();
    let mut saw_root = false;
    let complete_len = (body.len() / RECORD_LEN) * RECORD_LEN;
    for chunk in body[..complete_len].chunks_exact(RECORD_LEN) {
        let id = u64::from_be_bytes(chunk[0..8].try_into().expect("8 bytes"));
        let payload = u64::from_be_bytes(chunk[8..16].try_into().expect("8 bytes"));
        if id == 0 {
            state.root_id = payload;
            saw_root = true;
        } else if payload == TOMBSTONE_PAYLOAD {
            state.manifest.remove(&id);
            state.id_counter = state.id_counter.max(id);
        } else {
            state.manifest.insert(id, payload);
            state.id_counter = state.id_counter.max(id);
        }
    }
    let _ = saw_root;
    state
}

/// An open manifest: an append-only writer plus the header it validated.
pub struct ManifestFile {
    writer: File,
}

impl ManifestFile {
    /// Open (creating if absent) the manifest at `path`, validate or write
    /// its header, and replay its body into a [`ReplayedManifest`].
    ///
    /// # Errors
    /// Returns [`Error::InvalidDatabase`] if the path is a plain file masquerading
    /// as a header-less manifest, [`Error::IncompatibleVersion`] /
    /// [`Error::OrderMismatch`] on header mismatches, and [`Error::Io`] for
    /// lower-level I/O failures.
    pub fn open(path: &Path, order: u32) -> Result<(Self, ReplayedManifest), Error> {
        let mut rw = OpenOptions::new().read(true).write(true).create(true).truncate(false).open(path)?;
        let len = rw.metadata()?.len();
        if len == 0 {
            let mut header = Vec::with_capacity(HEADER_LEN);
            header.extend_from_slice(&FILE_TYPE_TAG.to_be_bytes());
            header.extend_from_slice(&FILE_VERSION_TAG.to_be_bytes());
            header.extend_from_slice(&order.to_be_bytes());
            rw.write_all(&header)?;
            rw.sync_data()?;
        } else {
            let mut header = [0u8; HEADER_LEN];
            rw.read_exact(&mut header)?;
            let file_type_tag = u64::from_be_bytes(header[0..8].try_into().expect("8 bytes"));
            let file_version_tag = u32::from_be_bytes(header[8..12].try_into().expect("4 bytes"));
            let on_disk_order = u32::from_be_bytes(header[12..16].try_into().expect("4 bytes"));
            if file_type_tag != FILE_TYPE_TAG {
                return Err(Error::InvalidDatabase {
                    reason: format!("bad manifest header tag 0x{file_type_tag:x}"),
                });
            }
            if file_version_tag != FILE_VERSION_TAG {
                return Err(Error::IncompatibleVersion { found: file_version_tag, expected: FILE_VERSION_TAG });
            }
            if on_disk_order != order {
                return Err(Error::OrderMismatch { found: on_disk_order, expected: order });
            }
        }

        let mut body = Vec::new();
        rw.read_to_end(&mut body)?;
        let replayed = replay(&body);

        let writer = OpenOptions::new().append(true).open(path)?;
        Ok((Self { writer }, replayed))
    }

    /// Append a run of `(id, payload)` records, then fsync.
    ///
    /// Per §5's ordering guarantees, callers append the manifest deltas
    /// first and the `(0, new_root_id)` root record last within the same
    /// call, so a torn write only ever loses the tail of a single commit.
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the write or sync fails.
    pub fn append_records(&mut self, records: &[(NodeId, u64)]) -> Result<(), Error> {
        let mut buf = Vec::with_capacity(records.len() * RECORD_LEN);
        for &(id, payload) in records {
            buf.extend_from_slice(&id.to_be_bytes());
            buf.extend_from_slice(&payload.to_be_bytes());
        }
        self.writer.write_all(&buf)?;
        self.writer.sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fresh_manifest_has_default_state() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("manifest");
        let (_f, replayed) = ManifestFile::open(&path, 32).expect("open");
        assert_eq!(replayed.root_id, 1);
        assert_eq!(replayed.id_counter, 1);
        assert!(replayed.manifest.is_empty());
    }

    #[test]
    fn reopen_rejects_order_mismatch() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("manifest");
        {
            let _ = ManifestFile::open(&path, 32).expect("open");
        }
        let err = ManifestFile::open(&path, 16).unwrap_err();
        assert!(matches!(err, Error::OrderMismatch { found: 32, expected: 16 }));
    }

    #[test]
    fn replay_round_trips_records_and_tracks_root_and_counter() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("manifest");
        {
            let (mut f, _) = ManifestFile::open(&path, 32).expect("open");
            f.append_records(&[(5, 100), (7, 200), (0, 7)]).expect("append");
        }
        let (_f, replayed) = ManifestFile::open(&path, 32).expect("reopen");
        assert_eq!(replayed.root_id, 7);
        assert_eq!(replayed.id_counter, 7);
        assert_eq!(replayed.manifest.get(&5), Some(&100));
        assert_eq!(replayed.manifest.get(&7), Some(&200));
    }

    #[test]
    fn torn_trailing_record_is_ignored_on_replay() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("manifest");
        {
            let (mut f, _) = ManifestFile::open(&path, 32).expect("open");
            f.append_records(&[(3, 9), (0, 3)]).expect("append");
        }
        // Simulate a torn write: append a partial (< 16 byte) trailing record.
        {
            let mut f = OpenOptions::new().append(true).open(&path).expect("reopen append");
            f.write_all(&[1, 2, 3]).expect("partial write");
            f.sync_data().expect("sync");
        }
        let (_f, replayed) = ManifestFile::open(&path, 32).expect("reopen");
        assert_eq!(replayed.root_id, 3);
        assert_eq!(replayed.id_counter, 3);
    }

    #[test]
    fn tombstone_record_removes_prior_entry_on_replay() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("manifest");
        {
            let (mut f, _) = ManifestFile::open(&path, 32).expect("open");
            f.append_records(&[(5, 100), (0, 5)]).expect("append");
            f.append_records(&[(5, TOMBSTONE_PAYLOAD), (0, 1)]).expect("append tombstone");
        }
        let (_f, replayed) = ManifestFile::open(&path, 32).expect("reopen");
        assert!(replayed.manifest.get(&5).is_none());
        assert_eq!(replayed.id_counter, 5);
    }
}

//! The nodes file: an append-only log of length-prefixed encoded nodes (§6).
//!
//! Grounded in `nexuslite`'s manual length-prefixed record writing in
//! `wal.rs`/`recovery/wasp/wasp_engine.rs` (`write_all(&len.to_le_bytes())`
//! followed by the payload) — adapted to the spec's big-endian `u64` length
//! prefix and to storing whole encoded [`crate::node::Node`] values rather
//! than WAL frames.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use crate::error::Error;

/// Append-only writer plus a mutex-guarded random-access reader over the
/// same file, held in separate locks. §4.3/§5 require reads to proceed
/// concurrently with the single writer's appends; splitting the writer and
/// reader handles (and their locks) means a long-running scan never blocks
/// a commit's append, and vice versa.
pub struct NodesFile {
    writer: Mutex<File>,
    reader: Mutex<File>,
}

impl NodesFile {
    /// Open (creating if absent) the nodes file at `path`.
    ///
    /// Returns the handle plus the current end-of-file offset, which the
    /// caller treats as the next append position.
    ///
    /// # Errors
    /// Returns [`Error::Io`] on failure to open or stat the file.
    pub fn open(path: &Path) -> Result<(Self, u64), Error> {
        let writer = OpenOptions::new().create(true).append(true).read(false).open(path)?;
        let offset = writer.metadata()?.len();
        let reader = OpenOptions::new().read(true).open(path)?;
        Ok((Self { writer: Mutex::new(writer), reader: Mutex::new(reader) }, offset))
    }

    /// Append one length-prefixed record and return the offset it was
    /// written at (the offset to record in the manifest for this node).
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the write or sync fails.
    pub fn append(&self, encoded: &[u8]) -> Result<u64, Error> {
        let mut writer = self.writer.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let offset = writer.metadata()?.len();
        let len = crate::utils::num::usize_to_u64(encoded.len());
        writer.write_all(&len.to_be_bytes())?;
        writer.write_all(encoded)?;
        writer.sync_data()?;
        Ok(offset)
    }

    /// Read the encoded bytes of the record stored at `offset`.
    ///
    /// # Errors
    /// Returns [`Error::CorruptState`] if the record's declared length runs
    /// past the end of the file, and [`Error::Io`] for lower-level failures.
    pub fn read_at(&self, offset: u64) -> Result<Vec<u8>, Error> {
        let mut reader = self.reader.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        reader.seek(SeekFrom::Start(offset))?;
        let mut len_buf = [0u8; 8];
        reader.read_exact(&mut len_buf)?;
        let len = u64::from_be_bytes(len_buf);
        let len = usize::try_from(len)
            .map_err(|_| Error::CorruptState { detail: format!("node record length {len} overflows usize") })?;
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).map_err(|_| Error::CorruptState {
            detail: format!("node record at offset {offset} truncated"),
        })?;
        Ok(body)
    }

    /// Append the 8-byte zero padding that marks the end of a commit's run
    /// of node records (§6: "a single commit writes a contiguous run of node
    /// records followed by an 8-byte zero padding, advancing nodes-offset by
    /// 8 + Σ(8 + size)").
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the write or sync fails.
    pub fn append_commit_padding(&self) -> Result<(), Error> {
        let mut writer = self.writer.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        writer.write_all(&[0u8; 8])?;
        writer.sync_data()?;
        Ok(())
    }

    /// Current end-of-file offset — where the next `append` will land.
    ///
    /// # Errors
    /// Returns [`Error::Io`] if stat-ing the writer handle fails.
    pub fn len(&self) -> Result<u64, Error> {
        let writer = self.writer.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(writer.metadata()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_then_read_round_trips() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nodes");
        let (f, start) = NodesFile::open(&path).expect("open");
        assert_eq!(start, 0);
        let off_a = f.append(b"hello").expect("append a");
        let off_b = f.append(b"world!").expect("append b");
        assert_eq!(f.read_at(off_a).expect("read a"), b"hello".to_vec());
        assert_eq!(f.read_at(off_b).expect("read b"), b"world!".to_vec());
    }

    #[test]
    fn reopen_resumes_at_prior_end_of_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nodes");
        let end = {
            let (f, _) = NodesFile::open(&path).expect("open");
            f.append(b"first").expect("append")
        };
        assert_eq!(end, 0);
        let (_, resumed_offset) = NodesFile::open(&path).expect("reopen");
        assert_eq!(resumed_offset, 8 + 5);
    }
}

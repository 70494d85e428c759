//! Small filesystem helpers shared by the manifest and node log writers.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Resolve a user-supplied database directory to an absolute path.
#[must_use]
pub fn normalize_db_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")).join(path)
    }
}

/// Open (creating if absent) a file restricted to the owner where supported.
///
/// On Unix this maps to mode `0o600`; on other platforms we just avoid
/// requesting anything broader than read/write for the current user.
///
/// # Errors
/// Returns an error if the file cannot be created or opened.
pub fn open_secure(path: &Path, append: bool) -> io::Result<File> {
    let mut opts = OpenOptions::new();
    opts.read(true).create(true);
    if append {
        opts.append(true);
    } else {
        opts.write(true);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    opts.open(path)
}

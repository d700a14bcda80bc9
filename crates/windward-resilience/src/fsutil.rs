//! Atomic file persistence.
//!
//! Every persisted artifact (state, task queue, metrics, replicated
//! snapshots) is replaced via write-to-temp + rename so concurrent readers
//! never observe a truncated file.

use std::fs;
use std::io;
use std::path::Path;

/// Atomically replace `path` with `bytes`. The temp file lives in the same
/// directory so the rename stays on one filesystem.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = sibling_tmp(path);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

/// Atomically copy `src` to `dst` (read fully, then write-temp + rename).
pub fn copy_atomic(src: &Path, dst: &Path) -> io::Result<()> {
    let bytes = fs::read(src)?;
    write_atomic(dst, &bytes)
}

fn sibling_tmp(path: &Path) -> std::path::PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "file".into());
    name.push(".tmp");
    path.with_file_name(name)
}

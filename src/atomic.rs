//! Crash-safe file replacement and the registry lock.
//!
//! Writes go to a temporary file in the destination directory and are then
//! renamed over the target, so readers only ever observe the old or the new
//! content.

use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Atomically replaces `path` with `contents`, creating parent directories.
pub fn write(path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(|e| Error::io(&parent, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(|e| Error::io(&parent, e))?;
    tmp.write_all(contents.as_ref())
        .map_err(|e| Error::io(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| Error::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| Error::io(path, e.error))?;
    Ok(())
}

/// Reads a file as UTF-8, mapping a missing file to [`Error::InputNotFound`].
pub fn read_to_string(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| Error::io(path, e))
}

/// Exclusive advisory lock held as `<target>.lock` for as long as the guard lives.
///
/// The lock file is created with `create_new`, which fails if another
/// invocation already holds it. A process killed while holding the lock leaves
/// the file behind; deleting it by hand releases the lock.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    _file: File,
}

impl FileLock {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
    const RETRY_INTERVAL: Duration = Duration::from_millis(50);

    /// Acquires the lock for `target`, retrying until `timeout` elapses.
    pub fn acquire(target: &Path, timeout: Duration) -> Result<Self> {
        let mut name = target.as_os_str().to_owned();
        name.push(".lock");
        let path = PathBuf::from(name);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let started = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    // Owner pid, useful when clearing a stale lock by hand.
                    let _ = writeln!(file, "{}", std::process::id());
                    tracing::debug!(lock = %path.display(), "acquired registry lock");
                    return Ok(Self { path, _file: file });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if started.elapsed() >= timeout {
                        return Err(Error::LockTimeout { path });
                    }
                    std::thread::sleep(Self::RETRY_INTERVAL);
                }
                Err(e) => return Err(Error::io(&path, e)),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(lock = %self.path.display(), error = %e, "failed to release lock");
        }
    }
}

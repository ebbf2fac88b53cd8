//! Cross-process advisory lock for collection publishing.
//!
//! Each collection has a sibling `collections/<id>.lock` file. A publish
//! attempt takes an exclusive, non-blocking `flock`-style lock on it so that
//! independent processes (or machines sharing the store over a network
//! filesystem) never publish the same collection at the same time. The lock
//! is released when the [`FileLock`] guard is dropped.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::LockError;

/// Guard holding an exclusive advisory lock. Dropping it releases the lock.
#[derive(Debug)]
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Try to take the lock without blocking.
    ///
    /// Returns [`LockError::Contended`] when another process holds it.
    pub fn try_acquire(path: &Path) -> Result<FileLock, LockError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LockError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| LockError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(lock = %path.display(), "Acquired advisory lock");
                Ok(FileLock {
                    _file: file,
                    path: path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                Err(LockError::Contended(path.to_path_buf()))
            }
            Err(e) => Err(LockError::Io {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_acquire_is_contended_until_release() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("c.lock");

        let first = FileLock::try_acquire(&path).unwrap();
        assert!(matches!(
            FileLock::try_acquire(&path),
            Err(LockError::Contended(_))
        ));

        drop(first);
        let again = FileLock::try_acquire(&path).unwrap();
        assert_eq!(again.path(), path.as_path());
    }
}

//! Process-wide advisory lock
//!
//! Every mutating invocation holds an exclusive `flock` on the lock file for
//! its whole lifetime. A second invocation does not wait: it gets
//! [`Error::LockBusy`] and must exit without touching any state.

use crate::error::{DaneResult, Error};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Held lock; released when dropped (or when the process exits)
#[derive(Debug)]
pub struct ProcessLock {
    path: PathBuf,
    file: File,
}

impl ProcessLock {
    pub fn acquire(path: impl AsRef<Path>) -> DaneResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(path = %path.display(), "Acquired process lock");
                Ok(Self { path, file })
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Err(Error::LockBusy(path)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

//! Error types shared by the library modules.
//!
//! The CLI layer wraps these in `anyhow` with context; the orchestrator never
//! lets one of them escape a single record; it converts them into an
//! [`Outcome`](crate::provider::Outcome) instead.

use std::path::PathBuf;

/// Result type for library operations
pub type DaneResult<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Static configuration is unusable; raised before any orchestration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An invariant did not hold (e.g. no certificate file for a usage).
    #[error("Internal error: {0}")]
    Internal(String),

    /// Hard failure that counts toward the run's exit status.
    #[error("Processing error: {0}")]
    Processing(String),

    /// Dropping privileges before running a provider command failed.
    #[error("Privilege error: {0}")]
    Privilege(String),

    /// The state file contains a line we cannot trust.
    #[error("State file {path:?}, line {line}: {reason}")]
    StateParse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Dane directory error at {path:?}: {reason}")]
    Dane { path: PathBuf, reason: String },

    /// A regular file sits where a dane symlink belongs; never touched.
    #[error("Foreign file at {0:?} where a dane symlink belongs")]
    ForeignFile(PathBuf),

    /// The process lock is held by another invocation.
    #[error("Lock {0:?} is held by another process")]
    LockBusy(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn dane(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Dane {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::StateParse {
            path: PathBuf::from("/var/lib/danectl/state"),
            line: 3,
            reason: "unknown record kind 'FOO'".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("line 3"));
        assert!(msg.contains("FOO"));

        let err = Error::LockBusy(PathBuf::from("/run/danectl.lock"));
        assert!(err.to_string().contains("danectl.lock"));
    }
}

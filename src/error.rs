use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Custom error type for daemon_reborn.
/// Tells the caller exactly which step of the handoff failed.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// The target is not a POSIX system.
    #[error("daemon: non-POSIX OS is not supported")]
    NotSupported,
    /// The pid file is locked by another holder, i.e. a daemon is already running.
    #[error("daemon is already running (pid file {} is locked)", .path.display())]
    WouldBlock { path: PathBuf },
    /// The pid file is held but its contents don't name a live process.
    #[error("corrupt pid file {}: {reason}", .path.display())]
    CorruptPidFile { path: PathBuf, reason: String },
    /// I/O on the pid file failed.
    #[error("pid file {}: {source}", .path.display())]
    PidFileIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The log file for the daemon's standard streams could not be opened.
    #[error("log file {}: {source}", .path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Failed to switch to the configured credential.
    #[error("failed to change credential ({call}): {source}")]
    Credential {
        call: &'static str,
        #[source]
        source: io::Error,
    },
    /// A system call failed (pipe, kill, umask, ...).
    #[error("syscall '{call}' failed: {source}")]
    Syscall {
        call: &'static str,
        #[source]
        source: io::Error,
    },
    /// Standard IO errors (executable resolution, spawning, ...).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl DaemonError {
    /// Returns `true` when the error means another daemon holds the pid file.
    pub fn is_would_block(&self) -> bool {
        matches!(self, DaemonError::WouldBlock { .. })
    }

    pub(crate) fn pid_file(path: impl Into<PathBuf>, source: io::Error) -> Self {
        DaemonError::PidFileIo {
            path: path.into(),
            source,
        }
    }
}

/// A specialized Result type for daemon_reborn operations.
pub type DaemonResult<T> = Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn would_block_is_recognised() {
        let err = DaemonError::WouldBlock {
            path: PathBuf::from("/run/app.pid"),
        };
        assert!(err.is_would_block());
        assert!(err.to_string().contains("/run/app.pid"));
        assert!(!DaemonError::NotSupported.is_would_block());
    }

    #[test]
    fn io_errors_keep_their_source() {
        use std::error::Error as _;

        let err = DaemonError::pid_file(
            "/tmp/x.pid",
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(err.source().is_some());
        assert!(err.to_string().starts_with("pid file /tmp/x.pid"));
    }
}

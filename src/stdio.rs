use std::fs::{File, OpenOptions};
use std::path::Path;
use std::process::Stdio;

use crate::error::{DaemonError, DaemonResult};

/// Standard streams of the re-executed child.
#[derive(Debug)]
pub(crate) struct ChildStreams {
    pub(crate) stdin: Stdio,
    pub(crate) stdout: Stdio,
    pub(crate) stderr: Stdio,
}

impl ChildStreams {
    /// Stdin is always `/dev/null`. Stdout and stderr share the log file if there is one,
    /// and are discarded otherwise.
    pub(crate) fn new(log_file: Option<&Path>, perm: u32) -> DaemonResult<Self> {
        let Some(path) = log_file else {
            return Ok(ChildStreams {
                stdin: Stdio::null(),
                stdout: Stdio::null(),
                stderr: Stdio::null(),
            });
        };

        let log = open_log(path, perm)?;
        let err = log.try_clone().map_err(|source| DaemonError::LogFile {
            path: path.to_owned(),
            source,
        })?;
        Ok(ChildStreams {
            stdin: Stdio::null(),
            stdout: log.into(),
            stderr: err.into(),
        })
    }
}

fn open_log(path: &Path, perm: u32) -> DaemonResult<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(perm);
    }
    #[cfg(not(unix))]
    let _ = perm;

    options.open(path).map_err(|source| DaemonError::LogFile {
        path: path.to_owned(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_is_created_for_appending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.log");
        std::fs::write(&path, "earlier\n").unwrap();

        ChildStreams::new(Some(&path), 0o640).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "earlier\n");
    }

    #[test]
    fn unopenable_log_is_reported_with_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("daemon.log");

        match ChildStreams::new(Some(&path), 0o640) {
            Err(DaemonError::LogFile { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected a log file error, got {:?}", other),
        }
    }
}

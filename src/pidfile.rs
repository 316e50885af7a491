//! Lock-protected pid files.
//!
//! A daemon keeps its pid file open and `flock`ed for its whole lifetime. Anybody else can
//! find out whether it is still running by trying to take the same lock: if that
//! succeeds, the file is a leftover and nobody is home.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, trace};

use crate::error::{DaemonError, DaemonResult};
use crate::process::DaemonProcess;
use crate::sys;

/// Default permissions for pid and log files.
pub const FILE_PERM: u32 = 0o640;

/// An open, locked pid file.
///
/// The lock lives as long as this value. Dropping it closes the descriptor and with it
/// the lock, but leaves the file on disk; use [`PidFile::remove`] for a clean release.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    file: File,
}

impl PidFile {
    /// Opens (creating it with `perm` if needed) and locks the pid file.
    ///
    /// The contents are left alone until [`write_pid`](Self::write_pid), so a losing
    /// contender never clobbers the pid of the running daemon.
    pub fn open_locked<P: AsRef<Path>>(path: P, perm: u32) -> DaemonResult<Self> {
        let path = path.as_ref();
        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(perm);
        }
        #[cfg(not(unix))]
        let _ = perm;

        let file = options
            .open(path)
            .map_err(|e| DaemonError::pid_file(path, e))?;
        sys::lock_file(&file).map_err(|e| lock_error(path, e))?;
        trace!("Locked pid file {}", path.display());

        Ok(PidFile {
            path: path.to_owned(),
            file,
        })
    }

    /// Replaces the file contents with the decimal `pid`.
    pub fn write_pid(&mut self, pid: u32) -> DaemonResult<()> {
        let path = &self.path;
        self.file
            .set_len(0)
            .and_then(|_| self.file.seek(SeekFrom::Start(0)))
            .and_then(|_| write!(self.file, "{}", pid))
            .and_then(|_| self.file.sync_all())
            .map_err(|e| DaemonError::pid_file(path, e))
    }

    /// Reads the pid back from the file.
    pub fn read_pid(&mut self) -> DaemonResult<u32> {
        let path = &self.path;
        let mut contents = String::new();
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.read_to_string(&mut contents))
            .map_err(|e| DaemonError::pid_file(path, e))?;
        parse_pid(path, &contents)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the file from disk, then drops the lock.
    ///
    /// Removing first keeps a new daemon from locking the old inode just before it
    /// disappears under it.
    pub fn remove(self) -> DaemonResult<()> {
        let PidFile { path, file } = self;
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(DaemonError::pid_file(path, e)),
        }
        sys::unlock_file(&file).map_err(|e| lock_error(&path, e))?;
        debug!("Released pid file {}", path.display());
        Ok(())
    }
}

/// Creates and locks the pid file at `path` and writes `pid` into it.
///
/// The returned value must be kept alive for as long as the lock should be held.
pub fn write_pid<P: AsRef<Path>>(path: P, pid: u32, perm: u32) -> DaemonResult<PidFile> {
    let mut pid_file = PidFile::open_locked(path, perm)?;
    pid_file.write_pid(pid)?;
    debug!("Wrote pid {} to {}", pid, pid_file.path().display());
    Ok(pid_file)
}

/// Looks for the daemon holding the pid file at `path`.
///
/// An empty path means pid files are disabled and yields `Ok(None)` without touching
/// the filesystem, as does a missing file or one nobody holds a lock on. A held file
/// whose contents don't name a live process is a [`DaemonError::CorruptPidFile`].
pub fn search<P: AsRef<Path>>(path: P) -> DaemonResult<Option<DaemonProcess>> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return Ok(None);
    }

    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(DaemonError::pid_file(path, e)),
    };

    match sys::lock_file(&file) {
        Ok(()) => {
            trace!("Pid file {} is not held by anybody", path.display());
            sys::unlock_file(&file).map_err(|e| lock_error(path, e))?;
            return Ok(None);
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
        Err(e) => return Err(lock_error(path, e)),
    }

    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|e| DaemonError::pid_file(path, e))?;
    let process = DaemonProcess::from_pid(parse_pid(path, &contents)?);
    if !process.is_alive() {
        return Err(DaemonError::CorruptPidFile {
            path: path.to_owned(),
            reason: format!("no process with pid {}", process.id()),
        });
    }
    Ok(Some(process))
}

/// Removes the pid file regardless of who holds it. A missing file is fine.
pub fn clean<P: AsRef<Path>>(path: P) -> DaemonResult<()> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return Ok(());
    }
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed pid file {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DaemonError::pid_file(path, e)),
    }
}

fn parse_pid(path: &Path, contents: &str) -> DaemonResult<u32> {
    contents
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|&pid| pid > 0)
        .ok_or_else(|| DaemonError::CorruptPidFile {
            path: path.to_owned(),
            reason: format!("{:?} is not a pid", contents.trim()),
        })
}

fn lock_error(path: &Path, err: io::Error) -> DaemonError {
    match err.kind() {
        io::ErrorKind::WouldBlock => DaemonError::WouldBlock {
            path: path.to_owned(),
        },
        io::ErrorKind::Unsupported => DaemonError::NotSupported,
        _ => DaemonError::pid_file(path, err),
    }
}

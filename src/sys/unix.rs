use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
pub(crate) use std::os::fd::RawFd;
use std::os::unix::process::CommandExt;
use std::process::Command;
use std::time::Duration;

use crate::credential::{Credential, Identity};
use crate::error::{DaemonError, DaemonResult};

// =========================================================================
// Lock primitive
// =========================================================================

/// Takes an exclusive, non-blocking `flock` on the file.
///
/// Contention is reported as an error of kind [`io::ErrorKind::WouldBlock`].
pub(crate) fn lock_file(file: &File) -> io::Result<()> {
    flock(file, libc::LOCK_EX | libc::LOCK_NB)
}

pub(crate) fn unlock_file(file: &File) -> io::Result<()> {
    flock(file, libc::LOCK_UN)
}

fn flock(file: &File, operation: libc::c_int) -> io::Result<()> {
    // EWOULDBLOCK comes back as ErrorKind::WouldBlock.
    if unsafe { libc::flock(file.as_raw_fd(), operation) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

// =========================================================================
// Processes
// =========================================================================

pub(crate) fn parent_id() -> u32 {
    std::os::unix::process::parent_id()
}

/// Checks whether a process with this pid exists (it may belong to another user).
pub(crate) fn process_exists(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

pub(crate) fn send_signal(pid: u32, signal: i32) -> DaemonResult<()> {
    let pid = libc::pid_t::try_from(pid).map_err(|_| DaemonError::Syscall {
        call: "kill",
        source: io::Error::from(io::ErrorKind::InvalidInput),
    })?;
    if unsafe { libc::kill(pid, signal) } < 0 {
        return Err(DaemonError::Syscall {
            call: "kill",
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

/// Sets the file mode creation mask and returns the previous one.
pub(crate) fn set_umask(mask: u32) -> u32 {
    unsafe { libc::umask(mask as libc::mode_t) as u32 }
}

// =========================================================================
// Spawn handshake
// =========================================================================

/// Creates a pipe with both ends marked close-on-exec.
pub(crate) fn cloexec_pipe() -> DaemonResult<(File, OwnedFd)> {
    let mut fds = [0 as libc::c_int; 2];

    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly"
    ))]
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };

    #[cfg(not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly"
    )))]
    let rc = unsafe {
        let rc = libc::pipe(fds.as_mut_ptr());
        if rc == 0 {
            libc::fcntl(fds[0], libc::F_SETFD, libc::FD_CLOEXEC);
            libc::fcntl(fds[1], libc::F_SETFD, libc::FD_CLOEXEC);
        }
        rc
    };

    if rc < 0 {
        return Err(DaemonError::Syscall {
            call: "pipe",
            source: io::Error::last_os_error(),
        });
    }
    // Both descriptors are fresh and owned by nobody else.
    let (read, write) = unsafe { (File::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    Ok((read, write))
}

/// Waits up to `timeout` for the descriptor to become readable or hung up.
///
/// Returns `false` on timeout and on an interrupted wait.
pub(crate) fn wait_readable(file: &File, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd: file.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(rc > 0 && pfd.revents != 0)
}

/// Closes an inherited descriptor if it is actually open.
pub(crate) fn close_inherited(fd: RawFd) {
    if fd < 0 || unsafe { libc::fcntl(fd, libc::F_GETFD) } < 0 {
        return;
    }
    drop(unsafe { OwnedFd::from_raw_fd(fd) });
}

// =========================================================================
// Child setup (runs between fork and exec)
// =========================================================================

/// Everything the freshly forked child needs before `exec`, prepared up front so the
/// hook itself doesn't allocate.
pub(crate) struct ChildSetup {
    pub(crate) sync_fd: RawFd,
    pub(crate) target_fd: RawFd,
    pub(crate) chroot: Option<CString>,
    pub(crate) work_dir: CString,
    pub(crate) credential: Option<Credential>,
}

/// Installs the pre-exec hook: new session, sync descriptor, chroot, credential, chdir.
pub(crate) fn configure_child(command: &mut Command, setup: ChildSetup) {
    let hook = move || -> io::Result<()> {
        if unsafe { libc::setsid() } < 0 {
            return Err(io::Error::last_os_error());
        }

        if setup.sync_fd == setup.target_fd {
            if unsafe { libc::fcntl(setup.target_fd, libc::F_SETFD, 0) } < 0 {
                return Err(io::Error::last_os_error());
            }
        } else if unsafe { libc::dup2(setup.sync_fd, setup.target_fd) } < 0 {
            return Err(io::Error::last_os_error());
        }

        if let Some(root) = &setup.chroot {
            if unsafe { libc::chroot(root.as_ptr()) } < 0 {
                return Err(io::Error::last_os_error());
            }
        }

        if let Some(credential) = &setup.credential {
            credential.apply(&SystemIdentity).map_err(|e| match e {
                DaemonError::Credential { source, .. } => source,
                other => io::Error::other(other.to_string()),
            })?;
        }

        if unsafe { libc::chdir(setup.work_dir.as_ptr()) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    };
    unsafe { command.pre_exec(hook) };
}

// =========================================================================
// Identity
// =========================================================================

/// The real process identity, backed by `libc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIdentity;

impl Identity for SystemIdentity {
    fn effective_uid(&self) -> u32 {
        unsafe { libc::geteuid() }
    }

    fn effective_gid(&self) -> u32 {
        unsafe { libc::getegid() }
    }

    fn groups(&self) -> io::Result<Vec<u32>> {
        let count = unsafe { libc::getgroups(0, std::ptr::null_mut()) };
        if count < 0 {
            return Err(io::Error::last_os_error());
        }
        let mut groups = vec![0 as libc::gid_t; count as usize];
        let count = unsafe { libc::getgroups(count, groups.as_mut_ptr()) };
        if count < 0 {
            return Err(io::Error::last_os_error());
        }
        groups.truncate(count as usize);
        Ok(groups)
    }

    fn set_groups(&self, groups: &[u32]) -> io::Result<()> {
        if unsafe { libc::setgroups(groups.len() as _, groups.as_ptr()) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn set_gid(&self, gid: u32) -> io::Result<()> {
        if unsafe { libc::setgid(gid) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn set_uid(&self, uid: u32) -> io::Result<()> {
        if unsafe { libc::setuid(uid) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

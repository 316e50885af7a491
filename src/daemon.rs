use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{self, Child};
use std::time::Duration;

use log::{debug, trace};

use crate::credential::Credential;
use crate::error::{DaemonError, DaemonResult};
use crate::pidfile::{self, PidFile, FILE_PERM};
use crate::process::DaemonProcess;
use crate::reborn;
use crate::sys;

/// How long [`Context::reborn`] waits for the daemon to take over by default.
pub const HANDOFF_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration of the daemon and the handles it holds once running.
///
/// One `Context` is meant to live for the whole life of the daemon: the locked pid file
/// is stored inside it, and dropping the context closes the file and releases the lock.
#[derive(Debug)]
pub struct Context {
    pub(crate) work_dir: PathBuf,
    pub(crate) pid_file_name: Option<PathBuf>,
    pub(crate) pid_file_perm: u32,
    pub(crate) log_file_name: Option<PathBuf>,
    pub(crate) log_file_perm: u32,
    pub(crate) args: Option<Vec<OsString>>,
    pub(crate) env: Vec<(OsString, OsString)>,
    pub(crate) umask: Option<u32>,
    pub(crate) chroot: Option<PathBuf>,
    pub(crate) credential: Option<Credential>,
    pub(crate) handoff_timeout: Duration,

    pid_file: Option<PidFile>,
    reborn: bool,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// Creates a new default configuration.
    ///
    /// # Defaults
    /// - Working directory: the current one (`/` if it can't be determined)
    /// - Pid file: none
    /// - Log file: none, standard streams go to `/dev/null`
    /// - File permissions: `0o640`
    /// - Arguments: the ones this process was started with
    /// - Handoff timeout: [`HANDOFF_TIMEOUT`]
    pub fn new() -> Self {
        Context {
            work_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
            pid_file_name: None,
            pid_file_perm: FILE_PERM,
            log_file_name: None,
            log_file_perm: FILE_PERM,
            args: None,
            env: Vec::new(),
            umask: None,
            chroot: None,
            credential: None,
            handoff_timeout: HANDOFF_TIMEOUT,
            pid_file: None,
            reborn: false,
        }
    }

    // --- Public Getters ---

    /// Returns the directory the daemon runs in.
    pub fn work_dir_path(&self) -> &Path {
        &self.work_dir
    }

    /// Returns the pid file path, if pid file tracking is enabled.
    pub fn pid_file_path(&self) -> Option<&Path> {
        self.pid_file_name.as_deref()
    }

    /// Returns the log file the daemon's standard streams go to, if any.
    pub fn log_file_path(&self) -> Option<&Path> {
        self.log_file_name.as_deref()
    }

    /// Returns the identity the daemon runs under, if one is configured.
    pub fn get_credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// Whether this context has taken the daemon branch of [`reborn`](Self::reborn).
    pub fn is_daemon(&self) -> bool {
        self.reborn
    }

    // --- Builder Methods ---

    /// Sets the directory the daemon runs in.
    pub fn work_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.work_dir = path.into();
        self
    }

    /// Sets the pid file. An empty path disables pid file tracking.
    pub fn pid_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        let path = path.into();
        self.pid_file_name = if path.as_os_str().is_empty() { None } else { Some(path) };
        self
    }

    /// Sets the mode the pid file is created with (before the umask).
    pub fn pid_file_perm(mut self, perm: u32) -> Self {
        self.pid_file_perm = perm;
        self
    }

    /// Sends the daemon's stdout and stderr to this file (appending).
    pub fn log_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        let path = path.into();
        self.log_file_name = if path.as_os_str().is_empty() { None } else { Some(path) };
        self
    }

    /// Sets the mode the log file is created with (before the umask).
    pub fn log_file_perm(mut self, perm: u32) -> Self {
        self.log_file_perm = perm;
        self
    }

    /// Arguments for the daemon instead of the current ones (without the program name).
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    /// Adds a variable on top of the inherited environment.
    pub fn env<K: Into<OsString>, V: Into<OsString>>(mut self, key: K, value: V) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Umask set by the daemon before it creates its pid file.
    pub fn umask(mut self, mask: u32) -> Self {
        self.umask = Some(mask);
        self
    }

    /// Directory to `chroot` into before the daemon starts; the working directory is
    /// then relative to it.
    pub fn chroot<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.chroot = Some(path.into());
        self
    }

    /// Identity the daemon runs under.
    pub fn credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Upper bound on how long the caller waits for the daemon to take over.
    ///
    /// When it runs out, [`reborn`](Self::reborn) returns the child anyway.
    pub fn handoff_timeout(mut self, timeout: Duration) -> Self {
        self.handoff_timeout = timeout;
        self
    }

    // --- Operations ---

    /// Runs a second copy of the current program as a daemon.
    ///
    /// Returns `Ok(Some(child))` in the calling process and `Ok(None)` in the daemon,
    /// which should then go on with its actual work. Unlike `fork`, this is safe with
    /// any number of threads running.
    ///
    /// The caller blocks until the daemon has called `reborn` itself, the daemon exits,
    /// or the [handoff timeout](Self::handoff_timeout) runs out, so the daemon should
    /// call it early, before spawning anything. In the daemon, a
    /// [`DaemonError::WouldBlock`] means another instance already holds the pid file.
    pub fn reborn(&mut self) -> DaemonResult<Option<Child>> {
        if cfg!(not(unix)) {
            return Err(DaemonError::NotSupported);
        }

        if self.reborn || reborn::was_reborn() {
            self.become_daemon()?;
            return Ok(None);
        }

        let child = self.spawn()?;
        Ok(Some(child))
    }

    /// Looks up the running daemon through the pid file.
    ///
    /// Works from any process. `Ok(None)` if no pid file is configured or nobody
    /// holds it.
    pub fn search(&self) -> DaemonResult<Option<DaemonProcess>> {
        match &self.pid_file_name {
            Some(path) => pidfile::search(path),
            None => Ok(None),
        }
    }

    /// Removes and unlocks the pid file held by this daemon.
    pub fn release(&mut self) -> DaemonResult<()> {
        match self.pid_file.take() {
            Some(pid_file) => pid_file.remove(),
            None => Ok(()),
        }
    }

    /// Removes the pid file no matter who holds it, e.g. after a daemon was killed.
    pub fn clean(&mut self) -> DaemonResult<()> {
        if let Some(pid_file) = self.pid_file.take() {
            return pid_file.remove();
        }
        match &self.pid_file_name {
            Some(path) => pidfile::clean(path),
            None => Ok(()),
        }
    }

    fn become_daemon(&mut self) -> DaemonResult<()> {
        if !self.reborn {
            trace!("Reborn as daemon with pid {}", process::id());
            reborn::clear_reborn();
            reborn::release_parent();
            self.reborn = true;
        }

        if let Some(mask) = self.umask {
            sys::set_umask(mask);
        }

        if let Some(path) = &self.pid_file_name {
            let pid_file = pidfile::write_pid(path, process::id(), self.pid_file_perm)?;
            self.pid_file = Some(pid_file);
        }

        if let Some(credential) = &self.credential {
            if credential.apply_if_needed(&sys::SystemIdentity)? {
                debug!("Switched to uid {} gid {}", credential.uid, credential.gid);
            }
        }
        Ok(())
    }

    #[cfg(unix)]
    fn spawn(&self) -> DaemonResult<Child> {
        use std::ffi::CString;
        use std::os::fd::AsRawFd;
        use std::os::unix::ffi::OsStrExt;
        use std::process::Command;
        use std::time::Instant;

        use log::warn;

        use crate::stdio::ChildStreams;

        const HANDOFF_POLL: Duration = Duration::from_millis(100);

        fn c_path(path: &Path) -> DaemonResult<CString> {
            CString::new(path.as_os_str().as_bytes()).map_err(|_| {
                DaemonError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("path {} contains a NUL byte", path.display()),
                ))
            })
        }

        let exe = env::current_exe()?;
        let args: Vec<OsString> = match &self.args {
            Some(args) => args.clone(),
            None => env::args_os().skip(1).collect(),
        };
        let streams = ChildStreams::new(self.log_file_name.as_deref(), self.log_file_perm)?;
        let setup_chroot = self.chroot.as_deref().map(c_path).transpose()?;
        let work_dir = c_path(&self.work_dir)?;

        let (sync_read, sync_write) = sys::cloexec_pipe()?;

        let mut command = Command::new(&exe);
        command
            .args(&args)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .env(reborn::MARK_NAME, process::id().to_string())
            .env(reborn::SYNC_NAME, reborn::SYNC_FD.to_string())
            .stdin(streams.stdin)
            .stdout(streams.stdout)
            .stderr(streams.stderr);
        sys::configure_child(
            &mut command,
            sys::ChildSetup {
                sync_fd: sync_write.as_raw_fd(),
                target_fd: reborn::SYNC_FD,
                chroot: setup_chroot,
                work_dir,
                credential: self.credential.clone(),
            },
        );

        debug!("Re-executing {} in {}", exe.display(), self.work_dir.display());
        let mut child = command.spawn()?;
        drop(command);
        drop(sync_write);

        // Readable means EOF: the daemon checked its marker, or died.
        let deadline = Instant::now() + self.handoff_timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                warn!(
                    "Daemon {} did not take over within {:?}",
                    child.id(),
                    self.handoff_timeout
                );
                break;
            }
            if sys::wait_readable(&sync_read, left.min(HANDOFF_POLL))? {
                trace!("Daemon {} took over", child.id());
                break;
            }
            // The sync descriptor may have leaked into a process the child started.
            if let Some(status) = child.try_wait()? {
                debug!("Daemon {} exited before taking over: {}", child.id(), status);
                break;
            }
        }

        Ok(child)
    }

    #[cfg(not(unix))]
    fn spawn(&self) -> DaemonResult<Child> {
        Err(DaemonError::NotSupported)
    }
}

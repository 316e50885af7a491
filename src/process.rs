use crate::error::DaemonResult;
use crate::sys;

/// A running daemon found through its pid file.
///
/// Unlike [`std::process::Child`] this is not our child, so there is nothing to wait on;
/// all we can do is look at it and signal it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DaemonProcess {
    pid: u32,
}

impl DaemonProcess {
    pub fn from_pid(pid: u32) -> Self {
        DaemonProcess { pid }
    }

    pub fn id(&self) -> u32 {
        self.pid
    }

    /// Whether a process with this pid still exists.
    pub fn is_alive(&self) -> bool {
        sys::process_exists(self.pid)
    }

    /// Sends `signal` (e.g. `libc::SIGTERM`) to the process.
    pub fn signal(&self, signal: i32) -> DaemonResult<()> {
        sys::send_signal(self.pid, signal)
    }
}

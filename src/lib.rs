//! # daemon_reborn
//!
//! **daemon_reborn** turns a program into a background daemon without `fork`ing the running
//! process. Instead it re-executes its own binary in a new session with a marker in the
//! environment; the new copy recognises the marker, takes the pid file and carries on as
//! the daemon. Since nothing is forked, threads started before daemonizing are harmless.
//!
//! ```no_run
//! use daemon_reborn::Context;
//!
//! let mut ctx = Context::new()
//!     .pid_file("/tmp/sample.pid")
//!     .log_file("/tmp/sample.log");
//!
//! match ctx.reborn() {
//!     Ok(Some(child)) => println!("daemon started as {}", child.id()),
//!     Ok(None) => {
//!         // We are the daemon now. Keep `ctx` alive, it holds the pid file lock.
//!         ctx.release().ok();
//!     }
//!     Err(e) if e.is_would_block() => eprintln!("already running"),
//!     Err(e) => eprintln!("failed: {}", e),
//! }
//! ```
//!
//! Only POSIX systems are supported; elsewhere every operation fails with
//! [`DaemonError::NotSupported`].

mod credential;
mod daemon;
mod error;
mod options;
pub mod pidfile;
mod process;
mod reborn;
#[cfg(unix)]
pub mod signal;
mod stdio;
mod sys;

// Re-export public types to keep the API flat
pub use credential::{Credential, Identity};
pub use daemon::{Context, HANDOFF_TIMEOUT};
pub use error::{DaemonError, DaemonResult};
pub use options::{daemonize, is_truthy, Branch, Options, ENV_NAME};
pub use pidfile::{PidFile, FILE_PERM};
pub use process::DaemonProcess;
pub use reborn::{clear_reborn, was_reborn, MARK_NAME, SYNC_NAME};
pub use sys::SystemIdentity;

/// Serializes tests that touch the process environment.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

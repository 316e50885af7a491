//! One-call daemonization for programs that don't need the full [`Context`].

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::process::{self, Child};

use log::info;

use crate::daemon::Context;
use crate::error::DaemonResult;

/// Environment variable that switches daemon mode on in [`Options::from_env`].
pub const ENV_NAME: &str = "DAEMON";

/// Which side of the handoff [`daemonize`] returned in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    /// Daemon mode is disabled; nothing happened.
    Foreground,
    /// The original process, after the `on_parent` callback ran.
    Parent,
    /// The re-executed daemon.
    Daemon,
}

/// Settings for [`daemonize`].
pub struct Options {
    pub daemon: bool,
    pub debug: bool,
    pub log_file: Option<PathBuf>,
    on_parent: Option<Box<dyn FnOnce(Child)>>,
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("daemon", &self.daemon)
            .field("debug", &self.debug)
            .field("log_file", &self.log_file)
            .field("on_parent", &if self.on_parent.is_some() { "Some(FnOnce)" } else { "None" })
            .finish()
    }
}

impl Default for Options {
    /// Daemon mode on, debug off, no log file, parent exits.
    fn default() -> Self {
        Options {
            daemon: true,
            debug: false,
            log_file: None,
            on_parent: None,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options with daemon mode taken from the `DAEMON` environment variable.
    pub fn from_env() -> Self {
        let daemon = env::var(ENV_NAME).map_or(false, |v| is_truthy(&v));
        Options {
            daemon,
            ..Self::default()
        }
    }

    pub fn daemon(mut self, daemon: bool) -> Self {
        self.daemon = daemon;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn log_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Called with the child in the original process instead of exiting it.
    pub fn on_parent<F: FnOnce(Child) + 'static>(mut self, callback: F) -> Self {
        self.on_parent = Some(Box::new(callback));
        self
    }
}

/// `true`, `1`, `t`, `yes`, `y` and `on`, in any case.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "true" | "1" | "t" | "yes" | "y" | "on"
    )
}

/// Puts the current program into the background, working in the current directory.
///
/// Without an `on_parent` callback the original process exits with status 0 and only
/// the daemon returns from here.
pub fn daemonize(options: Options) -> DaemonResult<Branch> {
    if !options.daemon {
        return Ok(Branch::Foreground);
    }
    daemonize_with(options, Context::new().work_dir(env::current_dir()?))
}

fn daemonize_with(options: Options, mut context: Context) -> DaemonResult<Branch> {
    if let Some(log_file) = options.log_file {
        context = context.log_file(log_file);
    }

    match context.reborn()? {
        Some(child) => match options.on_parent {
            Some(callback) => {
                callback(child);
                Ok(Branch::Parent)
            }
            None => process::exit(0),
        },
        None => {
            if options.debug {
                info!("--- daemon started ---");
            }
            Ok(Branch::Daemon)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{reborn, sys, ENV_LOCK};

    #[test]
    fn truthy_values() {
        for v in ["true", "TRUE", "1", "t", "T", "yes", "Y", "on", "On"] {
            assert!(is_truthy(v), "{}", v);
        }
        for v in ["", "0", "false", "no", "off", "enable", " on"] {
            assert!(!is_truthy(v), "{}", v);
        }
    }

    #[test]
    fn disabled_stays_in_foreground() {
        let branch = daemonize(Options::new().daemon(false)).unwrap();
        assert_eq!(branch, Branch::Foreground);
    }

    #[test]
    fn defaults() {
        let options = Options::default();
        assert!(options.daemon);
        assert!(!options.debug);
        assert!(options.log_file.is_none());
        assert!(format!("{:?}", options).contains("on_parent: \"None\""));
    }

    #[test]
    fn daemon_mode_follows_environment() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        env::set_var(ENV_NAME, "yes");
        assert!(Options::from_env().daemon);
        env::set_var(ENV_NAME, "off");
        assert!(!Options::from_env().daemon);
        env::remove_var(ENV_NAME);
        assert!(!Options::from_env().daemon);
        assert_eq!(daemonize(Options::from_env()).unwrap(), Branch::Foreground);
    }

    #[cfg(unix)]
    #[test]
    fn reborn_process_takes_daemon_branch() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        env::set_var(reborn::MARK_NAME, sys::parent_id().to_string());

        let branch = daemonize(Options::new().debug(true)).unwrap();
        assert_eq!(branch, Branch::Daemon);
        assert!(!reborn::was_reborn());
    }

    #[cfg(unix)]
    #[test]
    fn caller_gets_child_through_callback() {
        use std::cell::Cell;
        use std::rc::Rc;
        use std::time::Duration;

        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        reborn::clear_reborn();

        let seen = Rc::new(Cell::new(None));
        let options = Options::new().on_parent({
            let seen = Rc::clone(&seen);
            move |mut child: Child| {
                seen.set(Some(child.id()));
                child.kill().unwrap();
                child.wait().unwrap();
            }
        });
        let context = Context::new()
            .args(["daemon::tests::idle_without_reborn", "--exact", "--ignored"])
            .handoff_timeout(Duration::from_millis(300));

        assert_eq!(daemonize_with(options, context).unwrap(), Branch::Parent);
        assert!(seen.get().is_some());
    }
}

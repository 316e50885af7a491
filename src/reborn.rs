//! The reborn marker: how a re-executed child recognises itself.
//!
//! Before re-executing, the caller puts [`MARK_NAME`] into the child's environment with
//! its own pid as the value. In the child that value is the parent pid, so a marker that
//! merely leaked into an unrelated process through an inherited environment does not
//! match and is ignored.

use std::env;
use std::ffi::OsStr;

use log::trace;

use crate::sys;

/// Environment variable carrying the reborn marker.
pub const MARK_NAME: &str = "_GO_DAEMON";

/// Environment variable naming the descriptor the parent waits on during the handoff.
pub const SYNC_NAME: &str = "_GO_DAEMON_SYNC";

/// Descriptor number the sync pipe is placed on in the child.
pub(crate) const SYNC_FD: i32 = 3;

/// Returns `true` in the re-executed daemon and `false` in the original caller.
pub fn was_reborn() -> bool {
    marker_matches(env::var_os(MARK_NAME).as_deref(), sys::parent_id())
}

/// Removes the marker from this process' environment.
///
/// Only affects this process and the children it spawns from now on.
pub fn clear_reborn() {
    env::remove_var(MARK_NAME);
}

fn marker_matches(value: Option<&OsStr>, parent: u32) -> bool {
    match value.and_then(OsStr::to_str) {
        Some(value) => value.parse::<u32>().map_or(false, |pid| pid == parent),
        None => false,
    }
}

/// Tells the waiting parent the marker has been checked by closing the sync descriptor.
pub(crate) fn release_parent() {
    let fd = env::var(SYNC_NAME).ok().and_then(|v| v.parse::<i32>().ok());
    env::remove_var(SYNC_NAME);
    if let Some(fd) = fd {
        trace!("Releasing parent through fd {}", fd);
        #[cfg(unix)]
        sys::close_inherited(fd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ENV_LOCK;

    #[test]
    fn marker_must_equal_parent_pid() {
        assert!(marker_matches(Some(OsStr::new("4242")), 4242));
        assert!(!marker_matches(Some(OsStr::new("4243")), 4242));
        assert!(!marker_matches(Some(OsStr::new("true")), 4242));
        assert!(!marker_matches(Some(OsStr::new("")), 4242));
        assert!(!marker_matches(None, 4242));
    }

    #[test]
    fn was_reborn_follows_environment() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        clear_reborn();
        assert!(!was_reborn());

        env::set_var(MARK_NAME, sys::parent_id().to_string());
        assert!(was_reborn());

        clear_reborn();
        assert!(!was_reborn());
    }

    #[test]
    fn inherited_marker_is_not_reborn() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        env::set_var(MARK_NAME, std::process::id().to_string());
        assert!(!was_reborn());
        clear_reborn();
    }
}

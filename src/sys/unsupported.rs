//! Fallback for non-POSIX targets: every operation fails with `NotSupported`.

use std::fs::File;
use std::io;

use crate::credential::Identity;
use crate::error::{DaemonError, DaemonResult};

fn unsupported() -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, DaemonError::NotSupported.to_string())
}

pub(crate) fn lock_file(_file: &File) -> io::Result<()> {
    Err(unsupported())
}

pub(crate) fn unlock_file(_file: &File) -> io::Result<()> {
    Err(unsupported())
}

pub(crate) fn parent_id() -> u32 {
    0
}

pub(crate) fn process_exists(_pid: u32) -> bool {
    false
}

pub(crate) fn send_signal(_pid: u32, _signal: i32) -> DaemonResult<()> {
    Err(DaemonError::NotSupported)
}

pub(crate) fn set_umask(_mask: u32) -> u32 {
    0
}

/// Placeholder identity; every change is refused.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIdentity;

impl Identity for SystemIdentity {
    fn effective_uid(&self) -> u32 {
        0
    }

    fn effective_gid(&self) -> u32 {
        0
    }

    fn groups(&self) -> io::Result<Vec<u32>> {
        Err(unsupported())
    }

    fn set_groups(&self, _groups: &[u32]) -> io::Result<()> {
        Err(unsupported())
    }

    fn set_gid(&self, _gid: u32) -> io::Result<()> {
        Err(unsupported())
    }

    fn set_uid(&self, _uid: u32) -> io::Result<()> {
        Err(unsupported())
    }
}

use std::io;

use crate::error::{DaemonError, DaemonResult};

/// The identity the daemon should run as.
///
/// Applied once, in the child, and irreversibly. Supplementary groups are replaced
/// with `groups` unless `no_set_groups` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub uid: u32,
    pub gid: u32,
    pub groups: Vec<u32>,
    pub no_set_groups: bool,
}

impl Credential {
    /// A credential for `uid`/`gid` with an empty supplementary group list.
    pub fn new(uid: u32, gid: u32) -> Self {
        Credential {
            uid,
            gid,
            groups: Vec::new(),
            no_set_groups: false,
        }
    }

    /// Sets the supplementary groups.
    pub fn groups<I: IntoIterator<Item = u32>>(mut self, groups: I) -> Self {
        self.groups = groups.into_iter().collect();
        self
    }

    /// Leaves the supplementary groups untouched.
    pub fn no_set_groups(mut self, skip: bool) -> Self {
        self.no_set_groups = skip;
        self
    }

    /// Switches the process to this credential.
    ///
    /// Order is groups, gid, uid: once the uid is dropped the process may no longer be
    /// allowed to change the other two. Every call is made, even when the process
    /// already runs with the target ids.
    ///
    /// Called between `fork` and `exec`, so it must not allocate on the success path.
    pub fn apply<I: Identity + ?Sized>(&self, os: &I) -> DaemonResult<()> {
        if !self.no_set_groups {
            os.set_groups(&self.groups)
                .map_err(|source| DaemonError::Credential { call: "setgroups", source })?;
        }
        os.set_gid(self.gid)
            .map_err(|source| DaemonError::Credential { call: "setgid", source })?;
        os.set_uid(self.uid)
            .map_err(|source| DaemonError::Credential { call: "setuid", source })?;
        Ok(())
    }

    /// Applies the credential unless the process already runs under it.
    ///
    /// The process counts as switched when the effective uid and gid match and the
    /// supplementary groups equal `groups` (ignoring order), or `no_set_groups` is
    /// set. Returns whether anything was changed.
    pub fn apply_if_needed<I: Identity + ?Sized>(&self, os: &I) -> DaemonResult<bool> {
        if self.is_current(os)? {
            return Ok(false);
        }
        self.apply(os)?;
        Ok(true)
    }

    fn is_current<I: Identity + ?Sized>(&self, os: &I) -> DaemonResult<bool> {
        if os.effective_uid() != self.uid || os.effective_gid() != self.gid {
            return Ok(false);
        }
        if self.no_set_groups {
            return Ok(true);
        }
        let mut current = os
            .groups()
            .map_err(|source| DaemonError::Credential { call: "getgroups", source })?;
        let mut wanted = self.groups.clone();
        current.sort_unstable();
        current.dedup();
        wanted.sort_unstable();
        wanted.dedup();
        Ok(current == wanted)
    }
}

/// The OS calls needed to inspect and switch the process identity.
///
/// [`SystemIdentity`](crate::SystemIdentity) is the real implementation.
pub trait Identity {
    fn effective_uid(&self) -> u32;
    fn effective_gid(&self) -> u32;
    /// The current supplementary group list.
    fn groups(&self) -> io::Result<Vec<u32>>;
    fn set_groups(&self, groups: &[u32]) -> io::Result<()>;
    fn set_gid(&self, gid: u32) -> io::Result<()>;
    fn set_uid(&self, uid: u32) -> io::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Debug, PartialEq, Eq)]
    enum Call {
        Groups(Vec<u32>),
        Gid(u32),
        Uid(u32),
    }

    struct Recorder {
        uid: u32,
        gid: u32,
        groups: Vec<u32>,
        fail_gid: bool,
        calls: RefCell<Vec<Call>>,
    }

    impl Recorder {
        fn root() -> Self {
            Recorder {
                uid: 0,
                gid: 0,
                groups: Vec::new(),
                fail_gid: false,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl Identity for Recorder {
        fn effective_uid(&self) -> u32 {
            self.uid
        }

        fn effective_gid(&self) -> u32 {
            self.gid
        }

        fn groups(&self) -> io::Result<Vec<u32>> {
            Ok(self.groups.clone())
        }

        fn set_groups(&self, groups: &[u32]) -> io::Result<()> {
            self.calls.borrow_mut().push(Call::Groups(groups.to_vec()));
            Ok(())
        }

        fn set_gid(&self, gid: u32) -> io::Result<()> {
            if self.fail_gid {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied));
            }
            self.calls.borrow_mut().push(Call::Gid(gid));
            Ok(())
        }

        fn set_uid(&self, uid: u32) -> io::Result<()> {
            self.calls.borrow_mut().push(Call::Uid(uid));
            Ok(())
        }
    }

    #[test]
    fn drops_groups_then_gid_then_uid() {
        let os = Recorder::root();
        Credential::new(1000, 100).groups([10, 20]).apply(&os).unwrap();

        assert_eq!(
            *os.calls.borrow(),
            vec![Call::Groups(vec![10, 20]), Call::Gid(100), Call::Uid(1000)]
        );
    }

    #[test]
    fn no_set_groups_keeps_supplementary_groups() {
        let os = Recorder::root();
        Credential::new(1000, 100)
            .groups([10])
            .no_set_groups(true)
            .apply(&os)
            .unwrap();

        assert_eq!(*os.calls.borrow(), vec![Call::Gid(100), Call::Uid(1000)]);
    }

    #[test]
    fn groups_are_set_even_when_ids_already_match() {
        let os = Recorder::root();
        Credential::new(0, 0).groups([10, 20]).apply(&os).unwrap();

        assert_eq!(
            *os.calls.borrow(),
            vec![Call::Groups(vec![10, 20]), Call::Gid(0), Call::Uid(0)]
        );
    }

    #[test]
    fn matching_ids_with_other_groups_are_reapplied() {
        let os = Recorder::root();
        let changed = Credential::new(0, 0)
            .groups([10, 20])
            .apply_if_needed(&os)
            .unwrap();

        assert!(changed);
        assert_eq!(os.calls.borrow()[0], Call::Groups(vec![10, 20]));
    }

    #[test]
    fn already_running_as_target_is_a_noop() {
        let os = Recorder {
            uid: 1000,
            gid: 100,
            groups: vec![20, 10],
            ..Recorder::root()
        };
        let changed = Credential::new(1000, 100)
            .groups([10, 20])
            .apply_if_needed(&os)
            .unwrap();

        assert!(!changed);
        assert!(os.calls.borrow().is_empty());
    }

    #[test]
    fn no_set_groups_ignores_current_groups() {
        let os = Recorder {
            uid: 1000,
            gid: 100,
            groups: vec![4, 27],
            ..Recorder::root()
        };
        let changed = Credential::new(1000, 100)
            .no_set_groups(true)
            .apply_if_needed(&os)
            .unwrap();

        assert!(!changed);
        assert!(os.calls.borrow().is_empty());
    }

    #[test]
    fn failure_stops_before_uid() {
        let os = Recorder {
            fail_gid: true,
            ..Recorder::root()
        };
        let err = Credential::new(1000, 100).apply(&os).unwrap_err();

        assert!(matches!(err, DaemonError::Credential { call: "setgid", .. }));
        assert_eq!(*os.calls.borrow(), vec![Call::Groups(vec![])]);
    }
}

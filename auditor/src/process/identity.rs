//! Resolution of symbolic user and group names to numeric IDs.

use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Resolves the `user` / `group` fields of a baseline entry.
///
/// Numeric strings resolve to themselves.
pub trait IdentityResolver {
    fn user_id(&self, user: &str) -> Result<u32>;
    fn group_id(&self, group: &str) -> Result<u32>;
}

/// Identity lookup backed by explicit tables, optionally falling back to the
/// system user and group databases.
///
/// The tables let a saved snapshot from another machine be audited with that
/// machine's IDs.
#[derive(Debug, Clone, Default)]
pub struct IdentityTable {
    users: BTreeMap<String, u32>,
    groups: BTreeMap<String, u32>,
    system_lookup: bool,
}

impl IdentityTable {
    /// An empty table without system fallback.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty table that consults `getpwnam` / `getgrnam` for unknown names.
    pub fn system() -> Self {
        Self {
            system_lookup: true,
            ..Self::default()
        }
    }

    pub fn with_system_lookup(mut self, enabled: bool) -> Self {
        self.system_lookup = enabled;
        self
    }

    pub fn with_user(mut self, name: impl Into<String>, uid: u32) -> Self {
        self.users.insert(name.into(), uid);
        self
    }

    pub fn with_group(mut self, name: impl Into<String>, gid: u32) -> Self {
        self.groups.insert(name.into(), gid);
        self
    }

    pub fn extend_users(&mut self, users: impl IntoIterator<Item = (String, u32)>) {
        self.users.extend(users);
    }

    pub fn extend_groups(&mut self, groups: impl IntoIterator<Item = (String, u32)>) {
        self.groups.extend(groups);
    }
}

impl IdentityResolver for IdentityTable {
    fn user_id(&self, user: &str) -> Result<u32> {
        if let Ok(uid) = user.parse::<u32>() {
            return Ok(uid);
        }
        if let Some(uid) = self.users.get(user) {
            return Ok(*uid);
        }
        if self.system_lookup {
            if let Some(uid) = system_user_id(user) {
                return Ok(uid);
            }
        }
        Err(Error::unknown_user(user))
    }

    fn group_id(&self, group: &str) -> Result<u32> {
        if let Ok(gid) = group.parse::<u32>() {
            return Ok(gid);
        }
        if let Some(gid) = self.groups.get(group) {
            return Ok(*gid);
        }
        if self.system_lookup {
            if let Some(gid) = system_group_id(group) {
                return Ok(gid);
            }
        }
        Err(Error::unknown_group(group))
    }
}

#[cfg(unix)]
fn system_user_id(name: &str) -> Option<u32> {
    let name = std::ffi::CString::new(name).ok()?;
    // SAFETY: `passwd` is a plain C struct of integers and pointers, for
    // which all-zero is a valid value; getpwnam_r overwrites it.
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut buf = vec![0 as libc::c_char; 4096];
    let mut result: *mut libc::passwd = std::ptr::null_mut();

    // SAFETY: all pointers refer to live, correctly sized buffers owned by
    // this frame; `result` is only read after the call returns.
    let rc = unsafe {
        libc::getpwnam_r(
            name.as_ptr(),
            &mut pwd,
            buf.as_mut_ptr(),
            buf.len(),
            &mut result,
        )
    };

    if rc != 0 || result.is_null() {
        return None;
    }
    Some(pwd.pw_uid)
}

#[cfg(unix)]
fn system_group_id(name: &str) -> Option<u32> {
    let name = std::ffi::CString::new(name).ok()?;
    // SAFETY: `group` is a plain C struct of integers and pointers, for
    // which all-zero is a valid value; getgrnam_r overwrites it.
    let mut grp: libc::group = unsafe { std::mem::zeroed() };
    let mut buf = vec![0 as libc::c_char; 4096];
    let mut result: *mut libc::group = std::ptr::null_mut();

    // SAFETY: as in `system_user_id`.
    let rc = unsafe {
        libc::getgrnam_r(
            name.as_ptr(),
            &mut grp,
            buf.as_mut_ptr(),
            buf.len(),
            &mut result,
        )
    };

    if rc != 0 || result.is_null() {
        return None;
    }
    Some(grp.gr_gid)
}

#[cfg(not(unix))]
fn system_user_id(_name: &str) -> Option<u32> {
    None
}

#[cfg(not(unix))]
fn system_group_id(_name: &str) -> Option<u32> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_passthrough() {
        let table = IdentityTable::new();
        assert_eq!(table.user_id("228").unwrap(), 228);
        assert_eq!(table.group_id("0").unwrap(), 0);
    }

    #[test]
    fn test_table_lookup() {
        let table = IdentityTable::new()
            .with_user("power", 228)
            .with_group("power", 229);
        assert_eq!(table.user_id("power").unwrap(), 228);
        assert_eq!(table.group_id("power").unwrap(), 229);
    }

    #[test]
    fn test_unknown_without_system_lookup() {
        let table = IdentityTable::new();
        let err = table.user_id("root").unwrap_err();
        assert!(matches!(err, Error::IdentityLookup { kind: "user", .. }));
        let err = table.group_id("root").unwrap_err();
        assert!(matches!(err, Error::IdentityLookup { kind: "group", .. }));
    }

    #[test]
    fn test_table_overrides_system() {
        let table = IdentityTable::system().with_user("root", 4242);
        assert_eq!(table.user_id("root").unwrap(), 4242);
    }

    #[cfg(unix)]
    #[test]
    fn test_system_lookup_root() {
        let table = IdentityTable::system();
        assert_eq!(table.user_id("root").unwrap(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_system_lookup_unknown_user() {
        let table = IdentityTable::system();
        assert!(table.user_id("no-such-user-sandbox-audit").is_err());
        assert!(table.user_id("bad\0name").is_err());
    }

    #[test]
    fn test_extend() {
        let mut table = IdentityTable::new();
        table.extend_users([("cras".to_string(), 600)]);
        table.extend_groups([("cras".to_string(), 600)]);
        assert_eq!(table.user_id("cras").unwrap(), 600);
        assert_eq!(table.group_id("cras").unwrap(), 600);
    }
}

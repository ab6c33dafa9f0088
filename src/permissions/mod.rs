//! Client permission sets: an immutable collection of permission keys a
//! token carried, and the variadic validation a resolver calls before
//! touching anything sensitive.

use std::collections::BTreeSet;
use thiserror::Error;

/// A permission key. `u16` mirrors the wire-level representation JWT claims
/// use (small integers), wide enough for the whole known-permission table.
pub type PermissionKey = u16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("client doesn't have all needed permissions")]
pub struct PermissionError;

/// A client's resolved set of permissions. Built once per `authorize()` call
/// and never mutated afterwards.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PermissionSet {
    lookup: BTreeSet<PermissionKey>,
}

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, permission: PermissionKey) {
        self.lookup.insert(permission);
    }

    pub fn contains(&self, permission: PermissionKey) -> bool {
        self.lookup.contains(&permission)
    }

    /// Validates that every given key is present, short-circuiting on the
    /// first missing one.
    pub fn validate(&self, permissions: &[PermissionKey]) -> Result<(), PermissionError> {
        for key in permissions {
            if !self.contains(*key) {
                return Err(PermissionError);
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }
}

impl FromIterator<PermissionKey> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = PermissionKey>>(iter: I) -> Self {
        Self {
            lookup: iter.into_iter().collect(),
        }
    }
}

/// The table of legacy string permission names to their numeric keys, used
/// to resolve old-style string entries in a `permissions` JWT claim. New
/// tokens are expected to carry numeric keys directly.
pub fn known_permission_key(name: &str) -> Option<PermissionKey> {
    KNOWN_PERMISSIONS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, key)| *key)
}

/// All keys in the known-permission table, used by `AllowAllAuthorizer` to
/// build a set that contains everything.
pub fn all_known_keys() -> impl Iterator<Item = PermissionKey> {
    KNOWN_PERMISSIONS.iter().map(|(_, key)| *key)
}

const KNOWN_PERMISSIONS: &[(&str, PermissionKey)] = &[
    ("read-signals", 1),
    ("write-signals", 2),
    ("subscribe-signals", 3),
    ("admin", 4),
];

/// Named constants for the table above, for resolvers that need a key at
/// compile time rather than through [`known_permission_key`].
pub const READ_SIGNALS: PermissionKey = 1;
pub const WRITE_SIGNALS: PermissionKey = 2;
pub const SUBSCRIBE_SIGNALS: PermissionKey = 3;
pub const ADMIN: PermissionKey = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_passes_when_all_keys_present() {
        let set: PermissionSet = [1, 2, 3].into_iter().collect();
        assert!(set.validate(&[1, 3]).is_ok());
    }

    #[test]
    fn validate_fails_on_first_missing_key() {
        let set: PermissionSet = [1].into_iter().collect();
        assert_eq!(set.validate(&[1, 2]), Err(PermissionError));
    }

    #[test]
    fn empty_set_fails_any_nonempty_validation() {
        let set = PermissionSet::new();
        assert!(set.validate(&[1]).is_err());
        assert!(set.validate(&[]).is_ok());
    }

    #[test]
    fn known_permission_lookup_is_case_sensitive_and_exact() {
        assert_eq!(known_permission_key("read-signals"), Some(1));
        assert_eq!(known_permission_key("nonexistent"), None);
    }
}

//! Branch-level access control.
//!
//! A small table of `(database, branch, user, host) -> permissions` rows
//! whose first four columns are match expressions. A session may write to a
//! branch when the union of every row matching it grants `write` (or `admin`).
//! A second rule set restricts who may create branches under a given name.

mod access;
mod expr;
mod namespace;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use access::{AccessEntry, AccessError, AccessResult, AccessStore};
pub use expr::{fold_expression, MatchExpr};
pub use namespace::NamespaceEntry;

/// Longest expression accepted in any column.
pub const MAX_EXPRESSION_LEN: usize = u16::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(u64);

impl Permissions {
    pub const NONE: Permissions = Permissions(0);
    pub const ADMIN: Permissions = Permissions(1);
    pub const WRITE: Permissions = Permissions(2);

    const NAMES: [(&'static str, Permissions); 2] = [("admin", Self::ADMIN), ("write", Self::WRITE)];

    pub fn from_bits(bits: u64) -> Option<Self> {
        if bits & !(Self::ADMIN.0 | Self::WRITE.0) == 0 {
            Some(Self(bits))
        } else {
            None
        }
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn contains(self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: Permissions) -> Self {
        Self(self.0 | other.0)
    }

    /// Whether these permissions allow an action needing `required`.
    /// Admin allows everything.
    pub fn allows(self, required: Permissions) -> bool {
        self.contains(required) || self.contains(Self::ADMIN)
    }

    /// parse a set string like `"admin,write"`
    pub fn parse(s: &str) -> Option<Self> {
        let mut perms = Self::NONE;
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (_, flag) = Self::NAMES
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(part))?;
            perms = perms.union(*flag);
        }
        Some(perms)
    }

    /// accept either the bit value or the set string
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_u64().and_then(Self::from_bits),
            Value::String(s) => Self::parse(s),
            _ => None,
        }
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name)
            .collect();
        f.write_str(&names.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_permission_strings() {
        assert_eq!(Permissions::ADMIN.union(Permissions::WRITE).to_string(), "admin,write");
        assert_eq!(Permissions::WRITE.to_string(), "write");
        assert_eq!(Permissions::NONE.to_string(), "");

        assert_eq!(Permissions::parse("Write, admin"), Some(Permissions::from_bits(3).unwrap()));
        assert_eq!(Permissions::parse(""), Some(Permissions::NONE));
        assert_eq!(Permissions::parse("read"), None);
        assert_eq!(Permissions::from_bits(4), None);
    }

    #[test]
    fn test_from_value() {
        assert_eq!(Permissions::from_value(&json!(2)), Some(Permissions::WRITE));
        assert_eq!(Permissions::from_value(&json!("admin")), Some(Permissions::ADMIN));
        assert_eq!(Permissions::from_value(&json!(true)), None);
    }

    #[test]
    fn test_admin_allows_write() {
        assert!(Permissions::ADMIN.allows(Permissions::WRITE));
        assert!(Permissions::WRITE.allows(Permissions::WRITE));
        assert!(!Permissions::NONE.allows(Permissions::WRITE));
    }
}

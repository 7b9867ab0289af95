//! typed wrappers around git object ids and the names used by the storage layer.

use std::fmt;
use std::fmt::Write as _;

use git2::Oid;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Commit identifier. Kept distinct from blob and tree ids so they can't be mixed up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommitId(pub(crate) Oid);

impl CommitId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    pub(crate) fn raw(&self) -> Oid {
        self.0
    }

    /// Parse a CommitId from its 40-character hex form, as printed by
    /// `Display` and stored in diff partition keys.
    pub fn from_hex(hex: &str) -> Result<Self, git2::Error> {
        Oid::from_str(hex).map(CommitId)
    }

    /// abbreviated hex form
    pub fn short(&self) -> String {
        self.0.to_string()[..7].to_string()
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Git blob identifier. Row files and schema entries are both blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobId(pub(crate) Oid);

impl BlobId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    pub(crate) fn raw(&self) -> Oid {
        self.0
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Git tree identifier. Two roots holding the same table produce the same table TreeId.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TreeId(pub(crate) Oid);

impl TreeId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    pub(crate) fn raw(&self) -> Oid {
        self.0
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated table name.
///
/// Table names become directory names in the root tree, so they are restricted:
/// - 1-64 characters
/// - ASCII alphanumerics, underscores and hyphens
/// - must start with a letter or underscore
/// - a handful of names are reserved
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableName(String);

impl TableName {
    const RESERVED: &'static [&'static str] = &["_schema", "_meta", "_system", "_git"];

    /// Validate and wrap a table name.
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<(), InvalidNameError> {
        let first = name.chars().next().ok_or(InvalidNameError::Empty)?;

        if name.len() > 64 {
            return Err(InvalidNameError::TooLong(name.len()));
        }

        if !first.is_ascii_alphabetic() && first != '_' {
            return Err(InvalidNameError::InvalidStart(first));
        }

        for (i, c) in name.chars().enumerate() {
            if !c.is_ascii_alphanumeric() && c != '_' && c != '-' {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }

        if Self::RESERVED.contains(&name.to_lowercase().as_str()) {
            return Err(InvalidNameError::Reserved(name.to_string()));
        }

        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for TableName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Row file name inside a table directory (without the `.json` suffix).
///
/// Keyed rows are named after the hex of their encoded primary key, keyless rows
/// get a generated ULID per stored instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowKey(String);

impl RowKey {
    /// Accepts 1-128 characters from `[A-Za-z0-9_-]`.
    pub fn new(key: impl Into<String>) -> Result<Self, InvalidNameError> {
        let key = key.into();
        Self::validate(&key)?;
        Ok(Self(key))
    }

    fn validate(key: &str) -> Result<(), InvalidNameError> {
        if key.is_empty() {
            return Err(InvalidNameError::Empty);
        }

        if key.len() > 128 {
            return Err(InvalidNameError::TooLong(key.len()));
        }

        for (i, c) in key.chars().enumerate() {
            if !c.is_ascii_alphanumeric() && c != '_' && c != '-' {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }

        Ok(())
    }

    /// Hex-encode an arbitrary byte key. Always yields a valid row key.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut hex = String::with_capacity(bytes.len() * 2 + 1);
        hex.push('k');
        for b in bytes {
            let _ = write!(hex, "{:02x}", b);
        }
        Self(hex)
    }

    /// Key of a row file already in a table tree. Stored keys may be longer
    /// than `new` accepts since encoded primary keys have no length limit.
    pub(crate) fn from_stored(stem: &str) -> Option<Self> {
        let valid = !stem.is_empty()
            && stem.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        valid.then(|| Self(stem.to_string()))
    }

    /// Generate a new ULID-based row key.
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    /// file name of this row inside its table tree
    pub fn file_name(&self) -> String {
        format!("{}.json", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RowKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A branch name. The working set lives on two reserved branches next to `main`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BranchName(String);

impl BranchName {
    /// committed history (HEAD)
    pub const MAIN: &'static str = "main";
    /// staged root
    pub const STAGED: &'static str = "ws/staged";
    /// working root
    pub const WORKING: &'static str = "ws/working";

    /// Any git-safe name; `..` and leading or trailing slashes are rejected.
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        if name.is_empty() {
            return Err(InvalidNameError::Empty);
        }
        if name.contains("..") || name.ends_with('/') || name.starts_with('/') {
            return Err(InvalidNameError::InvalidPath(name));
        }
        Ok(Self(name))
    }

    pub fn main() -> Self {
        Self(Self::MAIN.to_string())
    }

    pub fn staged() -> Self {
        Self(Self::STAGED.to_string())
    }

    pub fn working() -> Self {
        Self(Self::WORKING.to_string())
    }

    /// `main` and anything under `ws/` belong to the database itself
    pub fn is_reserved(&self) -> bool {
        self.0 == Self::MAIN || self.0.starts_with("ws/")
    }

    /// full ref path, e.g. `refs/heads/main`
    pub fn as_ref_path(&self) -> String {
        format!("refs/heads/{}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// git signature (author/committer info)
#[derive(Debug, Clone)]
pub struct GitSignature {
    pub name: String,
    pub email: String,
}

impl GitSignature {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// the identity every commit made by this crate is signed with
    pub fn gitdb() -> Self {
        Self::new("GitDB", "gitdb@localhost")
    }

    pub(crate) fn to_git2_signature(&self) -> Result<git2::Signature<'static>, git2::Error> {
        git2::Signature::now(&self.name, &self.email)
    }
}

impl Default for GitSignature {
    fn default() -> Self {
        Self::gitdb()
    }
}

/// rejected table, row or branch names
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidNameError {
    #[error("name cannot be empty")]
    Empty,
    /// tables allow 64 characters, row keys 128
    #[error("name too long: {0} characters")]
    TooLong(usize),
    #[error("name cannot start with '{0}'")]
    InvalidStart(char),
    #[error("invalid character '{char}' at position {position}")]
    InvalidCharacter { char: char, position: usize },
    #[error("'{0}' is a reserved name")]
    Reserved(String),
    /// branch names only
    #[error("invalid path: '{0}'")]
    InvalidPath(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_valid() {
        assert!(TableName::new("users").is_ok());
        assert!(TableName::new("user_accounts").is_ok());
        assert!(TableName::new("User123").is_ok());
        assert!(TableName::new("_private").is_ok());
        assert!(TableName::new("my-table").is_ok());
    }

    #[test]
    fn test_table_name_invalid() {
        assert!(TableName::new("").is_err());
        assert_eq!(
            TableName::new("123users"),
            Err(InvalidNameError::InvalidStart('1'))
        );
        assert!(TableName::new("users/admin").is_err());
        assert!(TableName::new("_schema").is_err());
        assert!(TableName::new("a".repeat(65)).is_err());
    }

    #[test]
    fn test_row_key_from_bytes_is_valid() {
        let key = RowKey::from_bytes(&[0x00, 0xff, 0x10]);
        assert_eq!(key.as_str(), "k00ff10");
        assert!(RowKey::new(key.as_str()).is_ok());
        assert_eq!(key.file_name(), "k00ff10.json");
    }

    #[test]
    fn test_row_key_generate() {
        let key1 = RowKey::generate();
        let key2 = RowKey::generate();
        assert_ne!(key1, key2);
        assert_eq!(key1.as_str().len(), 26);
    }

    #[test]
    fn test_working_set_branches() {
        assert_eq!(BranchName::staged().as_str(), "ws/staged");
        assert!(BranchName::new("../main").is_err());
        assert_eq!(BranchName::staged().as_ref_path(), "refs/heads/ws/staged");
        assert!(BranchName::main().is_reserved());
        assert!(BranchName::new("ws/other").unwrap().is_reserved());
        assert!(!BranchName::new("feature/ws").unwrap().is_reserved());
    }
}

//! The access table and its persistence.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::expr::{fold_expression, MatchExpr};
use super::namespace::{CompiledNamespace, NamespaceEntry};
use super::{Permissions, MAX_EXPRESSION_LEN};
use crate::context::{Context, Session};

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("`{user}`@`{host}` does not have the correct permissions on branch `{branch}`")]
    IncorrectPermissions { user: String, host: String, branch: String },

    #[error("expressions are too long [{0}]")]
    ExpressionsTooLong(String),

    #[error("`{user}`@`{host}` cannot add the row [{row}]")]
    InsertDenied { user: String, host: String, row: String },

    #[error("`{user}`@`{host}` cannot update the row [{row}]")]
    UpdateDenied { user: String, host: String, row: String },

    #[error("`{user}`@`{host}` cannot delete the row [{row}]")]
    DeleteDenied { user: String, host: String, row: String },

    #[error("duplicate entry [{0}]")]
    DuplicateEntry(String),

    /// the super user row is synthesized and cannot be edited
    #[error("the row [{0}] is read-only")]
    ReadOnlyRow(String),

    #[error("`{user}`@`{host}` cannot create a branch named `{branch}`")]
    CannotCreateBranch { user: String, host: String, branch: String },

    #[error("`{user}`@`{host}` cannot delete the branch `{branch}`")]
    CannotDeleteBranch { user: String, host: String, branch: String },

    #[error("invalid permissions value: {0}")]
    InvalidPermissions(String),

    #[error("access file error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed access file: {0}")]
    Format(#[from] serde_json::Error),
}

pub type AccessResult<T> = Result<T, AccessError>;

/// One row of the access table. Expressions are stored folded, with
/// database, branch and host lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEntry {
    pub database: String,
    pub branch: String,
    pub user: String,
    pub host: String,
    pub permissions: Permissions,
}

impl AccessEntry {
    pub fn new(
        database: &str,
        branch: &str,
        user: &str,
        host: &str,
        permissions: Permissions,
    ) -> AccessResult<Self> {
        let entry = Self {
            database: fold_expression(&database.to_lowercase()),
            branch: fold_expression(&branch.to_lowercase()),
            user: fold_expression(user),
            host: fold_expression(&host.to_lowercase()),
            permissions,
        };
        if [&entry.database, &entry.branch, &entry.user, &entry.host]
            .iter()
            .any(|e| e.len() > MAX_EXPRESSION_LEN)
        {
            return Err(AccessError::ExpressionsTooLong(entry.describe_key()));
        }
        Ok(entry)
    }

    fn default_row() -> Self {
        Self {
            database: "%".into(),
            branch: "%".into(),
            user: "%".into(),
            host: "%".into(),
            permissions: Permissions::WRITE,
        }
    }

    fn super_user(user: &str, host: &str) -> Self {
        Self {
            database: "%".into(),
            branch: "%".into(),
            user: fold_expression(user),
            host: fold_expression(&host.to_lowercase()),
            permissions: Permissions::ADMIN,
        }
    }

    fn same_key(&self, other: &AccessEntry) -> bool {
        self.database == other.database
            && self.branch == other.branch
            && self.user == other.user
            && self.host == other.host
    }

    fn describe_key(&self) -> String {
        format!("{:?}, {:?}, {:?}, {:?}", self.database, self.branch, self.user, self.host)
    }

    fn describe(&self) -> String {
        format!("{}, {:?}", self.describe_key(), self.permissions.to_string())
    }
}

/// an entry with its expressions parsed for matching
#[derive(Debug, Clone)]
struct CompiledEntry {
    entry: AccessEntry,
    database: MatchExpr,
    branch: MatchExpr,
    user: MatchExpr,
    host: MatchExpr,
}

impl CompiledEntry {
    fn new(entry: AccessEntry) -> Self {
        Self {
            database: MatchExpr::parse(&entry.database, false),
            branch: MatchExpr::parse(&entry.branch, false),
            user: MatchExpr::parse(&entry.user, true),
            host: MatchExpr::parse(&entry.host, false),
            entry,
        }
    }

    fn matches(&self, database: &str, branch: &str, user: &str, host: &str) -> bool {
        self.database.matches(database)
            && self.branch.matches(branch)
            && self.user.matches(user)
            && self.host.matches(host)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AccessFile {
    entries: Vec<AccessEntry>,
    #[serde(default)]
    namespaces: Vec<NamespaceEntry>,
}

/// Shared, lock-protected access table plus the branch namespace rules.
pub struct AccessStore {
    entries: RwLock<Vec<CompiledEntry>>,
    pub(super) namespaces: RwLock<Vec<CompiledNamespace>>,
    super_user: String,
    super_host: String,
    path: Option<PathBuf>,
}

impl AccessStore {
    /// An in-memory store holding only the default `write for everyone` row.
    pub fn new(super_user: impl Into<String>, super_host: impl Into<String>) -> Self {
        Self {
            entries: RwLock::new(vec![CompiledEntry::new(AccessEntry::default_row())]),
            namespaces: RwLock::new(Vec::new()),
            super_user: super_user.into(),
            super_host: super_host.into(),
            path: None,
        }
    }

    /// Load the store from `path`. A missing or empty file yields the default
    /// row; later `save` calls write back to the same file.
    pub fn load(
        path: impl AsRef<Path>,
        super_user: impl Into<String>,
        super_host: impl Into<String>,
    ) -> AccessResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut store = Self::new(super_user, super_host);

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        if !bytes.is_empty() {
            let file: AccessFile = serde_json::from_slice(&bytes)?;
            *store.entries.get_mut() = file.entries.into_iter().map(CompiledEntry::new).collect();
            *store.namespaces.get_mut() = file.namespaces.into_iter().map(CompiledNamespace::new).collect();
        }
        debug!(path = %path.display(), entries = store.len(), "access table loaded");

        store.path = Some(path);
        Ok(store)
    }

    /// Write the table to its file, if it has one.
    pub fn save(&self) -> AccessResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = AccessFile {
            entries: self.entries(),
            namespaces: self.namespace_entries(),
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(&file)?)?;
        debug!(path = %path.display(), entries = file.entries.len(), "access table saved");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// The row listing the configured super user, who holds `admin` everywhere.
    /// It is never stored and never takes part in matching.
    pub fn super_user_row(&self) -> AccessEntry {
        AccessEntry::super_user(&self.super_user, &self.super_host)
    }

    fn reject_super_user_row(&self, entry: &AccessEntry) -> AccessResult<()> {
        let row = self.super_user_row();
        if row.same_key(entry) {
            return Err(AccessError::ReadOnlyRow(row.describe_key()));
        }
        Ok(())
    }

    /// snapshot of every stored row, in insertion order
    pub fn entries(&self) -> Vec<AccessEntry> {
        self.entries.read().iter().map(|c| c.entry.clone()).collect()
    }

    /// union of the permissions of every row matching the given names
    pub fn matches(&self, database: &str, branch: &str, user: &str, host: &str) -> Permissions {
        Self::match_in(&self.entries.read(), database, branch, user, host)
    }

    fn match_in(entries: &[CompiledEntry], database: &str, branch: &str, user: &str, host: &str) -> Permissions {
        entries
            .iter()
            .filter(|c| c.matches(database, branch, user, host))
            .fold(Permissions::NONE, |acc, c| acc.union(c.entry.permissions))
    }

    pub(super) fn is_super_user(&self, session: &Session) -> bool {
        session.user == self.super_user && session.host.eq_ignore_ascii_case(&self.super_host)
    }

    /// Fails unless the context's session holds `required` on `branch`.
    /// Contexts without a session are internal and always allowed.
    pub fn check_access(&self, ctx: &Context, database: &str, branch: &str, required: Permissions) -> AccessResult<()> {
        let Some(session) = ctx.session() else {
            return Ok(());
        };
        if self.is_super_user(session) {
            return Ok(());
        }
        let perms = self.matches(database, branch, &session.user, &session.host);
        if perms.allows(required) {
            return Ok(());
        }
        warn!(user = %session.user, host = %session.host, branch, "branch access denied");
        Err(AccessError::IncorrectPermissions {
            user: session.user.clone(),
            host: session.host.clone(),
            branch: branch.to_string(),
        })
    }

    // the session, unless it is allowed to administer rows for `database` and `branch`
    fn denied_in(&self, entries: &[CompiledEntry], ctx: &Context, database: &str, branch: &str) -> Option<Session> {
        let session = ctx.session()?;
        if self.is_super_user(session) {
            return None;
        }
        let perms = Self::match_in(entries, database, branch, &session.user, &session.host);
        if perms.contains(Permissions::ADMIN) {
            None
        } else {
            Some(session.clone())
        }
    }

    fn denied_session(&self, entries: &[CompiledEntry], ctx: &Context, entry: &AccessEntry) -> Option<Session> {
        self.denied_in(entries, ctx, &entry.database, &entry.branch)
    }

    /// Like the row checks, but for edits of the namespace rules.
    pub(super) fn denied_admin(&self, ctx: &Context, database: &str, branch: &str) -> Option<Session> {
        self.denied_in(&self.entries.read(), ctx, database, branch)
    }

    pub fn insert(&self, ctx: &Context, entry: AccessEntry) -> AccessResult<()> {
        self.reject_super_user_row(&entry)?;
        let mut entries = self.entries.write();

        if let Some(session) = self.denied_session(&entries, ctx, &entry) {
            return Err(AccessError::InsertDenied {
                user: session.user,
                host: session.host,
                row: entry.describe(),
            });
        }
        // an admin row covering this one already grants everything it could
        let covered = Self::match_in(&entries, &entry.database, &entry.branch, &entry.user, &entry.host);
        if covered.contains(Permissions::ADMIN) || entries.iter().any(|c| c.entry.same_key(&entry)) {
            return Err(AccessError::DuplicateEntry(entry.describe()));
        }

        debug!(row = %entry.describe(), "access row inserted");
        entries.push(CompiledEntry::new(entry));
        Ok(())
    }

    /// Grant the session `admin` on a branch it just created, unless it
    /// already holds it there.
    pub fn add_admin_for(&self, ctx: &Context, database: &str, branch: &str) -> AccessResult<()> {
        let Some(session) = ctx.session() else {
            return Ok(());
        };
        let mut entries = self.entries.write();
        if Self::match_in(&entries, database, branch, &session.user, &session.host).contains(Permissions::ADMIN) {
            return Ok(());
        }
        let entry = AccessEntry::new(database, branch, &session.user, &session.host, Permissions::ADMIN)?;
        debug!(row = %entry.describe(), "admin granted to branch creator");
        entries.push(CompiledEntry::new(entry));
        Ok(())
    }

    /// Replace the row keyed like `old` with `new`.
    pub fn update(&self, ctx: &Context, old: &AccessEntry, new: AccessEntry) -> AccessResult<()> {
        self.reject_super_user_row(old)?;
        self.reject_super_user_row(&new)?;
        let mut entries = self.entries.write();

        if !old.same_key(&new) && entries.iter().any(|c| c.entry.same_key(&new)) {
            return Err(AccessError::DuplicateEntry(new.describe()));
        }
        for target in [old, &new] {
            if let Some(session) = self.denied_session(&entries, ctx, target) {
                return Err(AccessError::UpdateDenied {
                    user: session.user,
                    host: session.host,
                    row: old.describe_key(),
                });
            }
        }

        let remaining: Vec<CompiledEntry> = entries.iter().filter(|c| !c.entry.same_key(old)).cloned().collect();
        let covered = Self::match_in(&remaining, &new.database, &new.branch, &new.user, &new.host);
        if covered.contains(Permissions::ADMIN) {
            return Err(AccessError::DuplicateEntry(new.describe()));
        }

        debug!(from = %old.describe_key(), to = %new.describe(), "access row updated");
        *entries = remaining;
        entries.push(CompiledEntry::new(new));
        Ok(())
    }

    /// Remove the row keyed like `entry`. Removing a missing row is a no-op.
    pub fn remove(&self, ctx: &Context, entry: &AccessEntry) -> AccessResult<()> {
        self.reject_super_user_row(entry)?;
        let mut entries = self.entries.write();

        if let Some(session) = self.denied_session(&entries, ctx, entry) {
            return Err(AccessError::DeleteDenied {
                user: session.user,
                host: session.host,
                row: entry.describe_key(),
            });
        }
        if let Some(pos) = entries.iter().position(|c| c.entry.same_key(entry)) {
            entries.remove(pos);
            debug!(row = %entry.describe_key(), "access row removed");
        }
        Ok(())
    }
}

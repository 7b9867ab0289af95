//! Branch namespace rules: which sessions may create branches under a name.
//!
//! A branch name that no rule matches is open to everyone. Otherwise only the
//! rules with the longest matching branch expression count, and the session
//! has to match the user and host of one of them. Editing the rules takes the
//! same `admin` permission as editing access rows.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::access::{AccessError, AccessResult, AccessStore};
use super::expr::{fold_expression, MatchExpr};
use super::{Permissions, MAX_EXPRESSION_LEN};
use crate::context::{Context, Session};

/// One namespace rule, folded the same way as access rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceEntry {
    pub database: String,
    pub branch: String,
    pub user: String,
    pub host: String,
}

impl NamespaceEntry {
    pub fn new(database: &str, branch: &str, user: &str, host: &str) -> AccessResult<Self> {
        let entry = Self {
            database: fold_expression(&database.to_lowercase()),
            branch: fold_expression(&branch.to_lowercase()),
            user: fold_expression(user),
            host: fold_expression(&host.to_lowercase()),
        };
        if [&entry.database, &entry.branch, &entry.user, &entry.host]
            .iter()
            .any(|e| e.len() > MAX_EXPRESSION_LEN)
        {
            return Err(AccessError::ExpressionsTooLong(entry.describe()));
        }
        Ok(entry)
    }

    fn describe(&self) -> String {
        format!("{:?}, {:?}, {:?}, {:?}", self.database, self.branch, self.user, self.host)
    }
}

#[derive(Debug, Clone)]
pub(super) struct CompiledNamespace {
    entry: NamespaceEntry,
    database: MatchExpr,
    branch: MatchExpr,
    user: MatchExpr,
    host: MatchExpr,
}

impl CompiledNamespace {
    pub(super) fn new(entry: NamespaceEntry) -> Self {
        Self {
            database: MatchExpr::parse(&entry.database, false),
            branch: MatchExpr::parse(&entry.branch, false),
            user: MatchExpr::parse(&entry.user, true),
            host: MatchExpr::parse(&entry.host, false),
            entry,
        }
    }
}

impl AccessStore {
    /// every namespace rule, in insertion order
    pub fn namespace_entries(&self) -> Vec<NamespaceEntry> {
        self.namespaces.read().iter().map(|c| c.entry.clone()).collect()
    }

    pub fn can_create(&self, database: &str, branch: &str, user: &str, host: &str) -> bool {
        if self.is_super_user(&Session::new(user, host)) {
            return true;
        }
        let rules = self.namespaces.read();
        let matched: Vec<&CompiledNamespace> = rules
            .iter()
            .filter(|c| c.database.matches(database) && c.branch.matches(branch))
            .collect();
        let Some(longest) = matched.iter().map(|c| c.entry.branch.len()).max() else {
            return true;
        };
        matched
            .iter()
            .filter(|c| c.entry.branch.len() == longest)
            .any(|c| c.user.matches(user) && c.host.matches(host))
    }

    /// Fails unless the context's session may create `branch`.
    pub fn check_create_branch(&self, ctx: &Context, database: &str, branch: &str) -> AccessResult<()> {
        let Some(session) = ctx.session() else {
            return Ok(());
        };
        if self.can_create(database, branch, &session.user, &session.host) {
            return Ok(());
        }
        warn!(user = %session.user, host = %session.host, branch, "branch creation denied");
        Err(AccessError::CannotCreateBranch {
            user: session.user.clone(),
            host: session.host.clone(),
            branch: branch.to_string(),
        })
    }

    /// Deleting a branch takes `write` on it.
    pub fn check_delete_branch(&self, ctx: &Context, database: &str, branch: &str) -> AccessResult<()> {
        self.check_access(ctx, database, branch, Permissions::WRITE)
            .map_err(|e| match e {
                AccessError::IncorrectPermissions { user, host, branch } => {
                    AccessError::CannotDeleteBranch { user, host, branch }
                }
                other => other,
            })
    }

    fn require_admin(
        &self,
        ctx: &Context,
        entry: &NamespaceEntry,
        denied: impl FnOnce(Session) -> AccessError,
    ) -> AccessResult<()> {
        match self.denied_admin(ctx, &entry.database, &entry.branch) {
            Some(session) => Err(denied(session)),
            None => Ok(()),
        }
    }

    pub fn insert_namespace(&self, ctx: &Context, entry: NamespaceEntry) -> AccessResult<()> {
        self.require_admin(ctx, &entry, |s| AccessError::InsertDenied {
            user: s.user,
            host: s.host,
            row: entry.describe(),
        })?;

        let mut rules = self.namespaces.write();
        if rules.iter().any(|c| c.entry == entry) {
            return Err(AccessError::DuplicateEntry(entry.describe()));
        }
        debug!(row = %entry.describe(), "namespace row inserted");
        rules.push(CompiledNamespace::new(entry));
        Ok(())
    }

    pub fn update_namespace(&self, ctx: &Context, old: &NamespaceEntry, new: NamespaceEntry) -> AccessResult<()> {
        for target in [old, &new] {
            self.require_admin(ctx, target, |s| AccessError::UpdateDenied {
                user: s.user,
                host: s.host,
                row: old.describe(),
            })?;
        }

        let mut rules = self.namespaces.write();
        if *old != new && rules.iter().any(|c| c.entry == new) {
            return Err(AccessError::DuplicateEntry(new.describe()));
        }
        rules.retain(|c| c.entry != *old);
        debug!(from = %old.describe(), to = %new.describe(), "namespace row updated");
        rules.push(CompiledNamespace::new(new));
        Ok(())
    }

    /// Removing a missing rule is a no-op.
    pub fn remove_namespace(&self, ctx: &Context, entry: &NamespaceEntry) -> AccessResult<()> {
        self.require_admin(ctx, entry, |s| AccessError::DeleteDenied {
            user: s.user,
            host: s.host,
            row: entry.describe(),
        })?;

        let mut rules = self.namespaces.write();
        if let Some(pos) = rules.iter().position(|c| c.entry == *entry) {
            rules.remove(pos);
            debug!(row = %entry.describe(), "namespace row removed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch_control::AccessEntry;
    use tempfile::TempDir;

    fn rule(db: &str, branch: &str, user: &str, host: &str) -> NamespaceEntry {
        NamespaceEntry::new(db, branch, user, host).unwrap()
    }

    fn as_user(user: &str) -> Context {
        Context::background().with_session(Session::new(user, "localhost"))
    }

    #[test]
    fn test_unclaimed_names_are_open() {
        let store = AccessStore::new("root", "localhost");
        assert!(store.can_create("db", "anything", "bob", "localhost"));
        assert!(store.check_create_branch(&as_user("bob"), "db", "anything").is_ok());
    }

    #[test]
    fn test_longest_branch_expression_wins() {
        let store = AccessStore::new("root", "localhost");
        let internal = Context::background();
        store.insert_namespace(&internal, rule("db", "release%", "alice", "%")).unwrap();
        store.insert_namespace(&internal, rule("db", "release/v2%", "bob", "%")).unwrap();

        assert!(store.can_create("db", "release/v1", "alice", "localhost"));
        assert!(!store.can_create("db", "release/v1", "bob", "localhost"));
        // the longer rule shadows alice's
        assert!(store.can_create("db", "release/v2.1", "bob", "localhost"));
        assert!(!store.can_create("db", "release/v2.1", "alice", "localhost"));
        // user is case-sensitive, branch is not
        assert!(!store.can_create("db", "release/v1", "Alice", "localhost"));
        assert!(store.can_create("DB", "RELEASE/V1", "alice", "localhost"));
        // other databases are unaffected
        assert!(store.can_create("other", "release/v1", "bob", "localhost"));
        // super user is never restricted
        assert!(store.can_create("db", "release/v1", "root", "localhost"));

        assert!(matches!(
            store.check_create_branch(&as_user("bob"), "db", "release/v1"),
            Err(AccessError::CannotCreateBranch { .. })
        ));
    }

    #[test]
    fn test_delete_needs_write() {
        let store = AccessStore::new("root", "localhost");
        let internal = Context::background();
        assert!(store.check_delete_branch(&as_user("bob"), "db", "dev").is_ok());

        store
            .remove(&internal, &AccessEntry::new("%", "%", "%", "%", Permissions::NONE).unwrap())
            .unwrap();
        assert!(matches!(
            store.check_delete_branch(&as_user("bob"), "db", "dev"),
            Err(AccessError::CannotDeleteBranch { .. })
        ));
        assert!(store.check_delete_branch(&internal, "db", "dev").is_ok());
    }

    #[test]
    fn test_edits_need_admin() {
        let store = AccessStore::new("root", "localhost");
        let bob = as_user("bob");
        let row = rule("db", "bob/%", "bob", "%");

        assert!(matches!(
            store.insert_namespace(&bob, row.clone()),
            Err(AccessError::InsertDenied { .. })
        ));
        store.insert_namespace(&as_user("root"), row.clone()).unwrap();
        assert!(matches!(
            store.insert_namespace(&Context::background(), row.clone()),
            Err(AccessError::DuplicateEntry(_))
        ));
        assert!(matches!(store.remove_namespace(&bob, &row), Err(AccessError::DeleteDenied { .. })));

        store
            .insert(&Context::background(), AccessEntry::new("db", "bob/%", "bob", "%", Permissions::ADMIN).unwrap())
            .unwrap();
        let renamed = rule("db", "bob/x%", "bob", "%");
        store.update_namespace(&bob, &row, renamed.clone()).unwrap();
        assert_eq!(store.namespace_entries(), vec![renamed.clone()]);
        store.remove_namespace(&bob, &renamed).unwrap();
        assert!(store.namespace_entries().is_empty());
    }

    #[test]
    fn test_rules_persist_with_access_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("branch_control.json");
        let store = AccessStore::load(&path, "root", "localhost").unwrap();
        store.insert_namespace(&Context::background(), rule("db", "prod%", "ops", "%")).unwrap();
        store.save().unwrap();

        let reloaded = AccessStore::load(&path, "root", "localhost").unwrap();
        assert_eq!(reloaded.namespace_entries(), store.namespace_entries());
        assert_eq!(reloaded.len(), 1);
    }
}

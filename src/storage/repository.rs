//! Core Git repository wrapper.
//!
//! Wraps `git2::Repository` with thread-safe access and the high-level
//! operations the catalog, snapshot loader and system tables build on. Every
//! write takes the commit it applies to and returns the new commit; moving a
//! branch is always a separate step.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::Repository;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::storage::blob::{self, Row};
use crate::storage::commit::{self, CommitBuilder, CommitInfo, CommitMessage};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::refs::RefManager;
use crate::storage::tree::{TreeMutator, SCHEMA_ENTRY};
use crate::storage::types::{BranchName, CommitId, GitSignature, RowKey, TableName, TreeId};

/// The main Git repository wrapper. Clone it to share across threads.
#[derive(Clone)]
pub struct GitRepository {
    inner: Arc<GitRepositoryInner>,
}

struct GitRepositoryInner {
    // git2::Repository is Send but not Sync
    repo: Mutex<Repository>,
    path: PathBuf,
    signature: GitSignature,
}

/// The three roots a database works against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkingSet {
    pub head: CommitId,
    pub staged: CommitId,
    pub working: CommitId,
}

impl GitRepository {
    /// Open an existing repository, creating any missing working-set branch
    /// at HEAD.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo = Repository::open(path)
            .map_err(|_| StorageError::NotInitialized(path.to_path_buf()))?;

        let storage = Self::wrap(repo, path);
        // repositories created before the working set existed only have main
        storage.with_repo_mut(|repo| {
            let head = RefManager::head_commit(repo)?;
            RefManager::init_branches(repo, head)
        })?;
        Ok(storage)
    }

    /// Create a repository with an empty initial commit on all three branches.
    pub fn init(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let storage = Self::wrap(Repository::init(path)?, path);

        storage.with_repo_mut(|repo| {
            let commit_id = commit::create_initial_commit(repo, &storage.inner.signature)?;
            RefManager::init_branches(repo, commit_id)
        })?;

        info!(path = %path.display(), "initialized repository");
        Ok(storage)
    }

    pub fn open_or_init(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if path.join(".git").exists() {
            Self::open(path)
        } else {
            Self::init(path)
        }
    }

    fn wrap(repo: Repository, path: &Path) -> Self {
        Self {
            inner: Arc::new(GitRepositoryInner {
                repo: Mutex::new(repo),
                path: path.to_path_buf(),
                signature: GitSignature::gitdb(),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Run `f` with the repository locked.
    pub fn with_repo<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Repository) -> StorageResult<T>,
    {
        let repo = self.inner.repo.lock();
        f(&repo)
    }

    pub fn with_repo_mut<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Repository) -> StorageResult<T>,
    {
        let repo = self.inner.repo.lock();
        f(&repo)
    }

    /// apply tree edits on top of `at` and commit the result
    fn commit_change<F>(&self, at: CommitId, message: String, edit: F) -> StorageResult<CommitId>
    where
        F: FnOnce(&Repository, &mut TreeMutator<'_>) -> StorageResult<()>,
    {
        self.with_repo_mut(|repo| {
            let tree = commit::get_tree_at_commit(repo, at)?;
            let mut mutator = TreeMutator::from_tree(repo, &tree)?;
            edit(repo, &mut mutator)?;
            let new_tree_id = mutator.write()?;

            let id = CommitBuilder::new(repo)
                .tree(new_tree_id)
                .parent(at)
                .message(message.as_str())
                .signature(self.inner.signature.clone())
                .commit()?;
            debug!(commit = %id.short(), %message, "committed");
            Ok(id)
        })
    }

    // ==================== Refs & History ====================

    /// tip of `main`
    pub fn head(&self) -> StorageResult<CommitId> {
        self.with_repo(RefManager::head_commit)
    }

    pub fn resolve_branch(&self, branch: &BranchName) -> StorageResult<CommitId> {
        self.with_repo(|repo| RefManager::resolve_branch(repo, branch))
    }

    /// `BranchAlreadyExists` if the name is taken
    pub fn create_branch(&self, branch: &BranchName, target: CommitId) -> StorageResult<()> {
        self.with_repo_mut(|repo| RefManager::create_branch(repo, branch, target))
    }

    pub fn delete_branch(&self, branch: &BranchName) -> StorageResult<()> {
        self.with_repo_mut(|repo| RefManager::delete_branch(repo, branch))
    }

    pub fn update_branch(&self, branch: &BranchName, target: CommitId) -> StorageResult<()> {
        self.with_repo_mut(|repo| RefManager::update_branch(repo, branch, target))
    }

    pub fn update_branch_if_unchanged(
        &self,
        branch: &BranchName,
        expected: CommitId,
        target: CommitId,
    ) -> StorageResult<()> {
        self.with_repo_mut(|repo| {
            RefManager::update_branch_if_unchanged(repo, branch, expected, target)
        })
    }

    pub fn get_commit(&self, id: CommitId) -> StorageResult<CommitInfo> {
        self.with_repo(|repo| commit::get_commit(repo, id))
    }

    /// first-parent history starting at `from`, newest first
    pub fn history(&self, from: CommitId, limit: Option<usize>) -> StorageResult<Vec<CommitInfo>> {
        self.with_repo(|repo| {
            let iter = commit::history(repo, from)?;
            match limit {
                Some(n) => iter.take(n).collect(),
                None => iter.collect(),
            }
        })
    }

    // ==================== Working Set ====================

    /// Resolve HEAD, STAGED and WORKING in one go.
    pub fn working_set(&self) -> StorageResult<WorkingSet> {
        self.with_repo(|repo| {
            Ok(WorkingSet {
                head: RefManager::head_commit(repo)?,
                staged: RefManager::resolve_branch(repo, &BranchName::staged())?,
                working: RefManager::resolve_branch(repo, &BranchName::working())?,
            })
        })
    }

    /// Copy a table's state (rows and schema) from one root onto another.
    /// A table missing from `from` is removed from the result.
    pub fn copy_table(
        &self,
        table: &TableName,
        from: CommitId,
        onto: CommitId,
    ) -> StorageResult<CommitId> {
        let source = self.table_tree_id(table, from)?;
        self.commit_change(onto, CommitMessage::stage(table.as_str()), |_, mutator| {
            mutator.set_table(table, source)
        })
    }

    /// copy a table from the working root into the staged root and move `ws/staged`
    pub fn stage_table(&self, table: &TableName) -> StorageResult<CommitId> {
        let ws = self.working_set()?;
        let staged = self.copy_table(table, ws.working, ws.staged)?;
        self.update_branch_if_unchanged(&BranchName::staged(), ws.staged, staged)?;
        Ok(staged)
    }

    /// Commit the staged root on top of `main`. Returns `None` when nothing is staged.
    pub fn commit_staged(&self, message: &str) -> StorageResult<Option<CommitId>> {
        let ws = self.working_set()?;
        let (head_tree, staged_tree) = self.with_repo(|repo| {
            Ok((
                commit::get_tree_at_commit(repo, ws.head)?.id(),
                commit::get_tree_at_commit(repo, ws.staged)?.id(),
            ))
        })?;
        if head_tree == staged_tree {
            return Ok(None);
        }

        let id = self.commit_tree_of(ws.staged, ws.head, message)?;
        self.update_branch_if_unchanged(&BranchName::main(), ws.head, id)?;
        self.update_branch(&BranchName::staged(), id)?;
        info!(commit = %id.short(), "committed staged changes");
        Ok(Some(id))
    }

    /// point both working-set branches back at `main`
    pub fn reset_working_set(&self) -> StorageResult<()> {
        let head = self.head()?;
        self.update_branch(&BranchName::staged(), head)?;
        self.update_branch(&BranchName::working(), head)
    }

    /// commit the tree of `source` as a child of `parent`
    pub fn commit_tree_of(
        &self,
        source: CommitId,
        parent: CommitId,
        message: &str,
    ) -> StorageResult<CommitId> {
        self.with_repo_mut(|repo| {
            let tree = commit::get_tree_at_commit(repo, source)?;
            CommitBuilder::new(repo)
                .tree(tree.id())
                .parent(parent)
                .message(message)
                .signature(self.inner.signature.clone())
                .commit()
        })
    }

    // ==================== Table Operations ====================

    pub fn list_tables(&self, at: CommitId) -> StorageResult<Vec<TableName>> {
        self.with_repo(|repo| Ok(commit::get_tree_at_commit(repo, at)?.list_tables()))
    }

    pub fn table_exists(&self, table: &TableName, at: CommitId) -> StorageResult<bool> {
        Ok(self.table_tree_id(table, at)?.is_some())
    }

    /// tree id of a table at a commit; equal ids mean identical rows and schema
    pub fn table_tree_id(&self, table: &TableName, at: CommitId) -> StorageResult<Option<TreeId>> {
        self.with_repo(|repo| Ok(commit::get_tree_at_commit(repo, at)?.table_tree_id(table)))
    }

    /// create a table whose directory holds only the serialized schema
    pub fn create_table(
        &self,
        table: &TableName,
        schema: &[u8],
        at: CommitId,
    ) -> StorageResult<CommitId> {
        self.commit_change(at, CommitMessage::create_table(table.as_str()), |repo, mutator| {
            let schema_blob = blob::write_raw_blob(repo, schema)?;
            mutator.create_table(table, schema_blob)
        })
    }

    pub fn drop_table(&self, table: &TableName, at: CommitId) -> StorageResult<CommitId> {
        self.commit_change(at, CommitMessage::drop_table(table.as_str()), |_, mutator| {
            mutator.drop_table(table)
        })
    }

    /// raw `_schema` blob; `None` when the table is missing at `at`
    pub fn read_table_schema(&self, table: &TableName, at: CommitId) -> StorageResult<Option<Vec<u8>>> {
        self.with_repo(|repo| {
            let tree = commit::get_tree_at_commit(repo, at)?;
            if !tree.table_exists(table) {
                return Ok(None);
            }
            match tree.table_entry(repo, table, SCHEMA_ENTRY)? {
                Some(blob_id) => Ok(Some(blob::read_blob(repo, blob_id)?)),
                None => Err(StorageError::CorruptedData {
                    path: format!("{}/{}", table, SCHEMA_ENTRY).into(),
                    reason: "table directory has no schema".to_string(),
                }),
            }
        })
    }

    pub fn write_table_schema(
        &self,
        table: &TableName,
        schema: &[u8],
        at: CommitId,
    ) -> StorageResult<CommitId> {
        self.commit_change(at, CommitMessage::alter_table(table.as_str()), |repo, mutator| {
            let schema_blob = blob::write_raw_blob(repo, schema)?;
            mutator.put_entry(table, SCHEMA_ENTRY, schema_blob)
        })
    }

    // ==================== Row Operations ====================

    pub fn read_row(&self, table: &TableName, key: &RowKey, at: CommitId) -> StorageResult<Option<Row>> {
        self.with_repo(|repo| {
            let tree = commit::get_tree_at_commit(repo, at)?;
            match tree.get_row_blob_id(repo, table, key)? {
                Some(blob_id) => {
                    let bytes = blob::read_blob(repo, blob_id)?;
                    Ok(Some(blob::deserialize_row(&bytes, key)?))
                }
                None => Ok(None),
            }
        })
    }

    /// insert a new row, failing if the key is taken
    pub fn insert_row(&self, table: &TableName, row: Row, at: CommitId) -> StorageResult<CommitId> {
        let message = CommitMessage::insert(table.as_str(), row.key.as_str());
        self.commit_change(at, message, |repo, mutator| {
            let tree = commit::get_tree_at_commit(repo, at)?;
            if tree.row_exists(repo, table, &row.key)? {
                return Err(StorageError::RowAlreadyExists {
                    table: table.clone(),
                    key: row.key.clone(),
                });
            }
            let blob_id = blob::write_row_blob(repo, &row)?;
            mutator.upsert_row(table, &row.key, blob_id)
        })
    }

    /// Insert or replace. Returns the new commit on top of `at`.
    pub fn upsert_row(&self, table: &TableName, row: Row, at: CommitId) -> StorageResult<CommitId> {
        let message = CommitMessage::update(table.as_str(), row.key.as_str());
        self.commit_change(at, message, |repo, mutator| {
            let blob_id = blob::write_row_blob(repo, &row)?;
            mutator.upsert_row(table, &row.key, blob_id)
        })
    }

    pub fn delete_row(&self, table: &TableName, key: &RowKey, at: CommitId) -> StorageResult<CommitId> {
        self.commit_change(at, CommitMessage::delete(table.as_str(), key.as_str()), |_, mutator| {
            mutator.delete_row(table, key)
        })
    }

    /// Visit a table's rows in key order. The repository stays locked until
    /// the scan ends; an error from `visit` stops it.
    pub fn for_each_row<E, F>(&self, table: &TableName, at: CommitId, mut visit: F) -> Result<(), E>
    where
        E: From<StorageError>,
        F: FnMut(Row) -> Result<(), E>,
    {
        let repo = self.inner.repo.lock();
        let tree = commit::get_tree_at_commit(&repo, at)?;
        for (key, blob_id) in tree.list_rows(&repo, table)? {
            let bytes = blob::read_blob(&repo, blob_id)?;
            visit(blob::deserialize_row(&bytes, &key)?)?;
        }
        Ok(())
    }

    /// Read every row of a table. The whole table is loaded into memory.
    pub fn scan_table(&self, table: &TableName, at: CommitId) -> StorageResult<Vec<Row>> {
        let mut rows = Vec::new();
        self.for_each_row(table, at, |row| {
            rows.push(row);
            Ok::<_, StorageError>(())
        })?;
        Ok(rows)
    }
}

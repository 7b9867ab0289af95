//! Branch and reference management.
//!
//! Three refs make up a database's working set:
//! - `main`: committed history, HEAD points at it
//! - `ws/staged`: the staged root
//! - `ws/working`: the working root
//!
//! Writers move the working-set refs with compare-and-swap so that a writer
//! holding stale pending commits can't silently overwrite someone else's work.

use git2::{BranchType, Repository};
use tracing::debug;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BranchName, CommitId};

/// Manages Git references (branches).
pub struct RefManager;

impl RefManager {
    /// Commit a branch points at. A missing branch is `RefNotFound`.
    pub fn resolve_branch(repo: &Repository, branch: &BranchName) -> StorageResult<CommitId> {
        let reference = repo
            .find_reference(&branch.as_ref_path())
            .map_err(|_| StorageError::RefNotFound(branch.to_string()))?;

        let commit = reference
            .peel_to_commit()
            .map_err(|_| StorageError::RefNotFound(branch.to_string()))?;

        Ok(CommitId::new(commit.id()))
    }

    /// Commit behind HEAD, or `EmptyRepository` while HEAD is unborn.
    pub fn head_commit(repo: &Repository) -> StorageResult<CommitId> {
        let head = repo.head().map_err(|e| {
            if e.code() == git2::ErrorCode::UnbornBranch {
                StorageError::EmptyRepository
            } else {
                StorageError::Git(e)
            }
        })?;

        Ok(CommitId::new(head.peel_to_commit()?.id()))
    }

    pub fn branch_exists(repo: &Repository, branch: &BranchName) -> bool {
        repo.find_reference(&branch.as_ref_path()).is_ok()
    }

    /// Never moves an existing branch.
    pub fn create_branch(repo: &Repository, branch: &BranchName, target: CommitId) -> StorageResult<()> {
        if Self::branch_exists(repo, branch) {
            return Err(StorageError::BranchAlreadyExists(branch.to_string()));
        }

        let commit = repo.find_commit(target.raw())?;
        repo.branch(branch.as_str(), &commit, false)?;
        Ok(())
    }

    pub fn delete_branch(repo: &Repository, branch: &BranchName) -> StorageResult<()> {
        let mut found = repo
            .find_branch(branch.as_str(), BranchType::Local)
            .map_err(|_| StorageError::RefNotFound(branch.to_string()))?;
        found.delete()?;
        debug!(branch = %branch, "branch deleted");
        Ok(())
    }

    /// force a branch to a new commit
    pub fn update_branch(repo: &Repository, branch: &BranchName, target: CommitId) -> StorageResult<()> {
        let mut reference = repo
            .find_reference(&branch.as_ref_path())
            .map_err(|_| StorageError::RefNotFound(branch.to_string()))?;

        reference.set_target(target.raw(), &format!("move {} to {}", branch, target.short()))?;
        debug!(branch = %branch, target = %target.short(), "branch moved");
        Ok(())
    }

    /// move a branch only if it still points at `expected`
    pub fn update_branch_if_unchanged(
        repo: &Repository,
        branch: &BranchName,
        expected: CommitId,
        new_target: CommitId,
    ) -> StorageResult<()> {
        let current = Self::resolve_branch(repo, branch)?;

        if current != expected {
            return Err(StorageError::ConcurrentModification {
                branch: branch.to_string(),
            });
        }

        Self::update_branch(repo, branch, new_target)
    }

    /// Create `main` plus the working-set branches at the initial commit and point HEAD at `main`.
    pub fn init_branches(repo: &Repository, initial_commit: CommitId) -> StorageResult<()> {
        for branch in [BranchName::main(), BranchName::staged(), BranchName::working()] {
            if !Self::branch_exists(repo, &branch) {
                Self::create_branch(repo, &branch, initial_commit)?;
            }
        }

        repo.set_head(&BranchName::main().as_ref_path())?;
        Ok(())
    }
}

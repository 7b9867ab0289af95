//! Buffered writes against one branch.
//!
//! A `BranchWriter` remembers the branch tip it started from (`base`) and
//! chains every write as a new commit on top of its private `head`. Nothing
//! is visible on the branch until `commit`, which moves the ref only if no
//! one else moved it in the meantime.

use tracing::debug;

use crate::storage::blob::Row;
use crate::storage::error::StorageResult;
use crate::storage::repository::GitRepository;
use crate::storage::types::{BranchName, CommitId, RowKey, TableName};

pub struct BranchWriter {
    repo: GitRepository,
    branch: BranchName,
    base: CommitId,
    head: CommitId,
}

impl BranchWriter {
    pub fn new(repo: GitRepository, branch: BranchName) -> StorageResult<Self> {
        let base = repo.resolve_branch(&branch)?;
        Ok(Self {
            repo,
            branch,
            base,
            head: base,
        })
    }

    pub fn branch(&self) -> &BranchName {
        &self.branch
    }

    pub fn repository(&self) -> &GitRepository {
        &self.repo
    }

    /// commit all reads and writes should go through
    pub fn head(&self) -> CommitId {
        self.head
    }

    pub fn is_dirty(&self) -> bool {
        self.head != self.base
    }

    /// pick up the current branch tip when nothing is pending
    pub fn refresh(&mut self) -> StorageResult<()> {
        if !self.is_dirty() {
            self.base = self.repo.resolve_branch(&self.branch)?;
            self.head = self.base;
        }
        Ok(())
    }

    pub fn table_exists(&self, table: &TableName) -> StorageResult<bool> {
        self.repo.table_exists(table, self.head)
    }

    pub fn create_table(&mut self, table: &TableName, schema: &[u8]) -> StorageResult<()> {
        self.head = self.repo.create_table(table, schema, self.head)?;
        Ok(())
    }

    pub fn write_table_schema(&mut self, table: &TableName, schema: &[u8]) -> StorageResult<()> {
        self.head = self.repo.write_table_schema(table, schema, self.head)?;
        Ok(())
    }

    pub fn scan_table(&self, table: &TableName) -> StorageResult<Vec<Row>> {
        self.repo.scan_table(table, self.head)
    }

    pub fn read_row(&self, table: &TableName, key: &RowKey) -> StorageResult<Option<Row>> {
        self.repo.read_row(table, key, self.head)
    }

    pub fn insert_row(&mut self, table: &TableName, row: Row) -> StorageResult<()> {
        self.head = self.repo.insert_row(table, row, self.head)?;
        Ok(())
    }

    pub fn upsert_row(&mut self, table: &TableName, row: Row) -> StorageResult<()> {
        self.head = self.repo.upsert_row(table, row, self.head)?;
        Ok(())
    }

    pub fn delete_row(&mut self, table: &TableName, key: &RowKey) -> StorageResult<()> {
        self.head = self.repo.delete_row(table, key, self.head)?;
        Ok(())
    }

    /// Move the branch to the pending head. Returns the new tip, or `None`
    /// when there was nothing to write.
    pub fn commit(&mut self) -> StorageResult<Option<CommitId>> {
        if !self.is_dirty() {
            return Ok(None);
        }
        self.repo
            .update_branch_if_unchanged(&self.branch, self.base, self.head)?;
        debug!(branch = %self.branch, head = %self.head.short(), "branch writer committed");
        self.base = self.head;
        Ok(Some(self.head))
    }

    /// drop every pending write
    pub fn discard(&mut self) {
        self.head = self.base;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::error::StorageError;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, GitRepository) {
        let dir = TempDir::new().unwrap();
        let repo = GitRepository::init(dir.path()).unwrap();
        (dir, repo)
    }

    #[test]
    fn test_writes_invisible_until_commit() {
        let (_dir, repo) = setup();
        let table = TableName::new("t").unwrap();
        let mut writer = BranchWriter::new(repo.clone(), BranchName::working()).unwrap();

        writer.create_table(&table, b"{}").unwrap();
        writer
            .insert_row(&table, Row::from_value(RowKey::new("a").unwrap(), json!({"v": 1})).unwrap())
            .unwrap();
        assert!(writer.is_dirty());
        assert_eq!(writer.scan_table(&table).unwrap().len(), 1);

        let working = repo.working_set().unwrap().working;
        assert!(!repo.table_exists(&table, working).unwrap());

        let tip = writer.commit().unwrap().unwrap();
        assert_eq!(repo.working_set().unwrap().working, tip);
        assert!(!writer.is_dirty());
        assert_eq!(writer.commit().unwrap(), None);
    }

    #[test]
    fn test_discard_and_conflict() {
        let (_dir, repo) = setup();
        let table = TableName::new("t").unwrap();

        let mut first = BranchWriter::new(repo.clone(), BranchName::staged()).unwrap();
        let mut second = BranchWriter::new(repo.clone(), BranchName::staged()).unwrap();

        first.create_table(&table, b"{}").unwrap();
        first.discard();
        assert!(!first.is_dirty());
        assert!(!first.table_exists(&table).unwrap());

        first.create_table(&table, b"{}").unwrap();
        second.create_table(&table, b"{\"other\":true}").unwrap();
        first.commit().unwrap();

        let err = second.commit().unwrap_err();
        assert!(matches!(err, StorageError::ConcurrentModification { .. }));

        second.discard();
        second.refresh().unwrap();
        assert!(second.table_exists(&table).unwrap());
    }
}

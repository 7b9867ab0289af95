//! Catalog manager for schema persistence and retrieval.
//!
//! A table's schema lives next to its rows, so every root carries the schemas
//! of the tables it contains. All methods take the commit to read from or
//! write on top of; the caller decides which branch to move.

use serde_json::Value;
use tracing::debug;

use super::schema::{SchemaError, SchemaResult, TableSchema};
use crate::storage::{CommitId, GitRepository, StorageError, TableName};

/// Reads and writes table schemas in a repository.
#[derive(Clone)]
pub struct Catalog {
    repo: GitRepository,
}

impl Catalog {
    pub fn new(repo: GitRepository) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &GitRepository {
        &self.repo
    }

    fn encode(schema: &TableSchema) -> SchemaResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(schema)?)
    }

    pub fn create_table(&self, schema: &TableSchema, at: CommitId) -> SchemaResult<CommitId> {
        schema.validate()?;
        let table = schema.table_name()?;

        let commit = self
            .repo
            .create_table(&table, &Self::encode(schema)?, at)
            .map_err(|e| match e {
                StorageError::TableAlreadyExists(_) => SchemaError::TableExists(schema.name.clone()),
                other => other.into(),
            })?;
        debug!(table = %table, commit = %commit.short(), "created table");
        Ok(commit)
    }

    /// schema of a table at a commit, `None` if the table doesn't exist there
    pub fn find_table(&self, table: &TableName, at: CommitId) -> SchemaResult<Option<TableSchema>> {
        match self.repo.read_table_schema(table, at)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_table(&self, table: &TableName, at: CommitId) -> SchemaResult<TableSchema> {
        self.find_table(table, at)?
            .ok_or_else(|| SchemaError::TableNotFound(table.to_string()))
    }

    pub fn table_exists(&self, table: &TableName, at: CommitId) -> SchemaResult<bool> {
        Ok(self.repo.table_exists(table, at)?)
    }

    /// replace a table's schema; the version must move forward
    pub fn update_table(&self, schema: &TableSchema, at: CommitId) -> SchemaResult<CommitId> {
        schema.validate()?;
        let table = schema.table_name()?;
        let existing = self.get_table(&table, at)?;

        if schema.version <= existing.version {
            return Err(SchemaError::VersionMismatch {
                expected: existing.version + 1,
                found: schema.version,
            });
        }

        Ok(self.repo.write_table_schema(&table, &Self::encode(schema)?, at)?)
    }

    pub fn drop_table(&self, table: &TableName, at: CommitId) -> SchemaResult<CommitId> {
        self.repo.drop_table(table, at).map_err(|e| match e {
            StorageError::TableNotFound(_) => SchemaError::TableNotFound(table.to_string()),
            other => other.into(),
        })
    }

    pub fn list_tables(&self, at: CommitId) -> SchemaResult<Vec<TableName>> {
        Ok(self.repo.list_tables(at)?)
    }

    pub fn validate_row(&self, table: &TableName, row: &Value, at: CommitId) -> SchemaResult<()> {
        self.get_table(table, at)?.validate_row(row)
    }
}

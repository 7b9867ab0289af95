//! Errors raised while reading and writing versioned tables in the Git store.
//!
//! Everything below the catalog reports a `StorageError`; the system tables
//! wrap it into `SqlError` on the way out.

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::types::{InvalidNameError, RowKey, TableName};

#[derive(Debug, Error)]
pub enum StorageError {
    /// libgit2 failed underneath us
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// no row file with this key in the table at the given root
    #[error("row not found: table={table}, key={key}")]
    RowNotFound { table: TableName, key: RowKey },

    /// the table directory is missing at the given root
    #[error("table not found: {0}")]
    TableNotFound(TableName),

    /// an insert hit an existing row file
    #[error("row already exists: table={table}, key={key}")]
    RowAlreadyExists { table: TableName, key: RowKey },

    #[error("table already exists: {0}")]
    TableAlreadyExists(TableName),

    /// a table, row key or branch name failed validation
    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    /// a row blob or schema entry is not the JSON we wrote
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// one of `main`, `ws/staged` or `ws/working` is missing
    #[error("ref not found: {0}")]
    RefNotFound(String),

    /// a blob decoded but does not describe what its path says it should
    #[error("corrupted data at {path}: {reason}")]
    CorruptedData { path: PathBuf, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// the directory holds no Git repository
    #[error("repository not initialized: {0}")]
    NotInitialized(PathBuf),

    /// HEAD is unborn
    #[error("repository is empty: no commits found")]
    EmptyRepository,

    #[error("commit not found: {0}")]
    CommitNotFound(String),

    /// a tree entry that should be a table directory or row file is not
    #[error("unexpected entry type at {path}: expected {expected}, found {found}")]
    UnexpectedEntryType {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("branch already exists: {0}")]
    BranchAlreadyExists(String),

    /// a working-set branch moved while a writer held pending commits on it
    #[error("concurrent modification: branch {branch} was updated by another writer")]
    ConcurrentModification { branch: String },

    /// row JSON that cannot be stored as a row, e.g. not an object
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_row() {
        let err = StorageError::RowNotFound {
            table: TableName::new("users").unwrap(),
            key: RowKey::new("u1").unwrap(),
        };
        assert_eq!(err.to_string(), "row not found: table=users, key=u1");

        let err = StorageError::ConcurrentModification {
            branch: "ws/working".to_string(),
        };
        assert!(err.to_string().contains("ws/working"));
    }

    #[test]
    fn test_invalid_name_converts() {
        let err: StorageError = TableName::new("_schema").unwrap_err().into();
        assert!(matches!(err, StorageError::InvalidName(_)));
    }
}

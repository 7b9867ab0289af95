//! Errors surfaced to the query engine by system tables.

use thiserror::Error;

use crate::branch_control::AccessError;
use crate::catalog::SchemaError;
use crate::context::Cancelled;
use crate::dtables::ConvertError;
use crate::snapshot::TupleError;
use crate::storage::StorageError;

pub type SqlResult<T> = Result<T, SqlError>;

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("context cancelled")]
    Cancelled,

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("{0} table is not modifiable due to schema change")]
    NotModifiable(String),

    #[error("only update of column 'staged' is allowed")]
    InvalidUpdate,

    #[error("cannot delete staged rows from workspace")]
    CannotDeleteStaged,

    #[error("diff producer panicked")]
    ProducerPanicked,

    #[error("invalid value for column '{column}': {reason}")]
    InvalidValue { column: String, reason: String },

    #[error("row conversion failed: {0}")]
    Convert(#[from] ConvertError),

    #[error("tuple decode failed: {0}")]
    Tuple(#[from] TupleError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<Cancelled> for SqlError {
    fn from(_: Cancelled) -> Self {
        SqlError::Cancelled
    }
}

impl SqlError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SqlError::Cancelled)
    }

    pub fn invalid_value(column: impl Into<String>, reason: impl Into<String>) -> Self {
        SqlError::InvalidValue {
            column: column.into(),
            reason: reason.into(),
        }
    }
}

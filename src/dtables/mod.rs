//! System tables that expose version-control state as rows.
//!
//! - `gitdb_diff_<table>`: per-commit changes to a table across history
//! - `gitdb_workspace_<table>`: staged and unstaged changes, editable
//! - `gitdb_branch_control`: branch access rules
//! - `gitdb_branch_namespace_control`: who may create branches under a name
//!
//! The diff tables share one streaming materializer ([`DiffRowIter`]) that
//! converts rows stored under older schemas with a [`RowConverter`].

mod branch_control_table;
mod branch_namespace_table;
mod diff_iter;
mod diff_table;
mod rowconv;
mod workspace_table;
mod writer;

pub use branch_control_table::{BranchControlTable, BRANCH_CONTROL_TABLE};
pub use branch_namespace_table::{BranchNamespaceTable, BRANCH_NAMESPACE_TABLE};
pub use diff_iter::{side_columns, DiffPhase, DiffRowIter, DiffType, IterState, MaterializerConfig, RowHeader};
pub use diff_table::{DiffTable, DIFF_TABLE_PREFIX, EMPTY_LABEL, WORKING_LABEL};
pub use rowconv::{ConvertError, RowConverter};
pub use workspace_table::{WorkspaceTable, WORKSPACE_TABLE_PREFIX};
pub use writer::{RowData, TableWriter};

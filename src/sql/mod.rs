//! Engine-facing table contract.
//!
//! System tables implement [`Table`] to be enumerated and read, and the
//! editor traits to accept writes. Rows are positional vectors of JSON
//! values matching the table's [`SqlSchema`].

mod error;
mod row;
mod table;

pub use error::{SqlError, SqlResult};
pub use row::{collect_rows, Column, RowIter, SqlRow, SqlSchema, VecRowIter};
pub use table::{
    scan_table, DeletableTable, InsertableTable, Partition, RowDeleter, RowInserter, RowUpdater,
    Table, TableEditor, UpdatableTable,
};

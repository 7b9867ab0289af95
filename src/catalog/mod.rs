//! Catalog module for schema management.
//!
//! Each table directory carries its schema as `_schema.json`, so the schemas
//! seen at a commit are exactly the ones its rows were written under.

mod manager;
mod schema;
mod types;

pub use manager::Catalog;
pub use schema::{SchemaBuilder, SchemaError, SchemaResult, SchemaVersion, TableSchema};
pub use types::{CoerceError, ColumnDef, DataType};

//! gitdb-workspace - versioned tables on Git, read through system tables.
//!
//! Every table is a directory in a Git tree; `main` holds committed history
//! while `ws/staged` and `ws/working` hold the staged and working roots.
//! System tables expose that state as rows:
//!
//! - `gitdb_diff_<table>`: every change to a table, commit by commit
//! - `gitdb_workspace_<table>`: pending changes, which can be staged,
//!   unstaged or reverted by updating and deleting rows
//! - `gitdb_branch_control`: who may write to which branch
//! - `gitdb_branch_namespace_control`: who may create which branches
//!
//! # Example
//!
//! ```no_run
//! use gitdb_workspace::catalog::{DataType, SchemaBuilder};
//! use gitdb_workspace::context::Context;
//! use gitdb_workspace::db::Database;
//! use serde_json::json;
//!
//! let db = Database::open("./my_database").unwrap();
//! let schema = SchemaBuilder::new("users")
//!     .add_column("id", DataType::Integer)
//!     .add_column("name", DataType::Text)
//!     .primary_key("id")
//!     .build()
//!     .unwrap();
//! db.create_table(&schema).unwrap();
//! db.insert("users", vec![json!({"id": 1, "name": "Alice"})]).unwrap();
//!
//! let rows = db.system_table("gitdb_workspace_users").unwrap().scan(&Context::background()).unwrap();
//! assert_eq!(rows.len(), 1);
//! ```

pub mod branch_control;
pub mod catalog;
pub mod context;
pub mod db;
pub mod dtables;
pub mod snapshot;
pub mod sql;
pub mod storage;

//! storage layer
//!
//! a complete abstraction over git for versioned table storage. The layers
//! above (catalog, snapshots, system tables) use this API and never touch
//! git2 directly.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     GitRepository                           │
//! │     (tables, rows, schemas, working set, history)           │
//! └─────────────────────────────────────────────────────────────┘
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │    tree     │       │    blob     │       │    refs     │
//!  │  (tables)   │       │   (rows)    │       │ (main, ws/) │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//!         └─────────────────────┼─────────────────────┘
//!                               ▼
//!                        ┌─────────────┐
//!                        │   commit    │
//!                        └─────────────┘
//! ```
//!
//! ```ignore
//! let repo = GitRepository::open_or_init("./my_database")?;
//! let ws = repo.working_set()?;
//!
//! let table = TableName::new("users")?;
//! let working = repo.create_table(&table, &schema_bytes, ws.working)?;
//! let working = repo.insert_row(&table, row, working)?;
//! repo.update_branch(&BranchName::working(), working)?;
//! ```

mod blob;
mod commit;
mod error;
mod refs;
mod repository;
mod tree;
mod types;
mod writer;

pub use blob::Row;
pub use commit::{CommitInfo, CommitMessage};
pub use error::{StorageError, StorageResult};
pub use repository::{GitRepository, WorkingSet};
pub use writer::BranchWriter;
pub use types::{BlobId, BranchName, CommitId, GitSignature, InvalidNameError, RowKey, TableName, TreeId};

//! Database API - the user-facing handle over the repository, its working
//! set and the system tables.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::branch_control::{AccessError, AccessStore};
use crate::catalog::{Catalog, SchemaError, TableSchema};
use crate::context::Context;
use crate::dtables::{
    BranchControlTable, BranchNamespaceTable, DiffTable, MaterializerConfig, RowData, TableWriter,
    WorkspaceTable, BRANCH_CONTROL_TABLE, BRANCH_NAMESPACE_TABLE, DIFF_TABLE_PREFIX, WORKSPACE_TABLE_PREFIX,
};
use crate::sql::{scan_table, SqlError, SqlRow, SqlSchema, Table};
use crate::storage::{BranchName, CommitId, CommitInfo, GitRepository, StorageError, TableName, WorkingSet};

/// Result type for database operations.
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Database errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Sql(#[from] SqlError),

    #[error("branch control: {0}")]
    Access(#[from] AccessError),

    #[error("database not found: {0}")]
    NotFound(PathBuf),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// `main` and the working-set branches can't be created or deleted by hand
    #[error("branch is reserved: {0}")]
    ReservedBranch(String),
}

/// Database configuration options.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the database directory.
    pub path: PathBuf,
    /// Create if doesn't exist.
    pub create_if_missing: bool,
    /// Enable verbose logging.
    pub verbose: bool,
    /// Rows buffered between a diff producer and its reader.
    pub row_buffer: usize,
    /// Database name used for branch permission checks.
    pub database_name: String,
    /// Account that bypasses branch control.
    pub super_user: String,
    pub super_host: String,
    /// Where branch control rules persist; in memory only when unset.
    pub branch_control_path: Option<PathBuf>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".gitdb"),
            create_if_missing: true,
            verbose: false,
            row_buffer: MaterializerConfig::default().row_buffer,
            database_name: "gitdb".to_string(),
            super_user: "root".to_string(),
            super_host: "localhost".to_string(),
            branch_control_path: None,
        }
    }
}

impl DatabaseConfig {
    /// Create a new configuration with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Set create_if_missing flag.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Set verbose flag.
    pub fn verbose(mut self, value: bool) -> Self {
        self.verbose = value;
        self
    }

    pub fn row_buffer(mut self, rows: usize) -> Self {
        self.row_buffer = rows;
        self
    }

    pub fn database_name(mut self, name: impl Into<String>) -> Self {
        self.database_name = name.into();
        self
    }

    pub fn super_user(mut self, user: impl Into<String>, host: impl Into<String>) -> Self {
        self.super_user = user.into();
        self.super_host = host.into();
        self
    }

    pub fn branch_control_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.branch_control_path = Some(path.into());
        self
    }

    fn validate(&self) -> DatabaseResult<()> {
        if self.row_buffer == 0 {
            return Err(DatabaseError::InvalidConfig("row_buffer must be at least 1".into()));
        }
        if self.database_name.is_empty() {
            return Err(DatabaseError::InvalidConfig("database_name cannot be empty".into()));
        }
        Ok(())
    }
}

/// A system table resolved by name.
pub enum SystemTable {
    Diff(DiffTable),
    Workspace(WorkspaceTable),
    BranchControl(BranchControlTable),
    BranchNamespace(BranchNamespaceTable),
}

impl SystemTable {
    pub fn as_table(&self) -> &dyn Table {
        match self {
            SystemTable::Diff(t) => t,
            SystemTable::Workspace(t) => t,
            SystemTable::BranchControl(t) => t,
            SystemTable::BranchNamespace(t) => t,
        }
    }

    pub fn schema(&self) -> &SqlSchema {
        self.as_table().schema()
    }

    /// read every row
    pub fn scan(&self, ctx: &Context) -> DatabaseResult<Vec<SqlRow>> {
        Ok(scan_table(ctx, self.as_table())?)
    }
}

/// The main database handle.
pub struct Database {
    config: DatabaseConfig,
    repo: GitRepository,
    catalog: Catalog,
    access: Arc<AccessStore>,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> DatabaseResult<Self> {
        Self::open_with_config(DatabaseConfig::new(path.as_ref()))
    }

    /// Open or create a database with custom configuration.
    pub fn open_with_config(config: DatabaseConfig) -> DatabaseResult<Self> {
        config.validate()?;
        let repo = if config.create_if_missing {
            GitRepository::open_or_init(&config.path)?
        } else if config.path.exists() {
            GitRepository::open(&config.path)?
        } else {
            return Err(DatabaseError::NotFound(config.path.clone()));
        };

        let access = match &config.branch_control_path {
            Some(path) => AccessStore::load(path, &config.super_user, &config.super_host)?,
            None => AccessStore::new(&config.super_user, &config.super_host),
        };

        info!(path = %config.path.display(), database = %config.database_name, "database opened");
        Ok(Self {
            catalog: Catalog::new(repo.clone()),
            repo,
            access: Arc::new(access),
            config,
        })
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Get the configuration.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn repository(&self) -> &GitRepository {
        &self.repo
    }

    pub fn access_store(&self) -> &Arc<AccessStore> {
        &self.access
    }

    pub fn working_set(&self) -> DatabaseResult<WorkingSet> {
        Ok(self.repo.working_set()?)
    }

    fn materializer(&self) -> MaterializerConfig {
        MaterializerConfig {
            row_buffer: self.config.row_buffer,
        }
    }

    /// Resolve `gitdb_diff_<t>`, `gitdb_workspace_<t>` or one of the branch control tables.
    pub fn system_table(&self, name: &str) -> DatabaseResult<SystemTable> {
        let lower = name.to_ascii_lowercase();
        if lower == BRANCH_CONTROL_TABLE {
            return Ok(SystemTable::BranchControl(BranchControlTable::new(self.access.clone())));
        }
        if lower == BRANCH_NAMESPACE_TABLE {
            return Ok(SystemTable::BranchNamespace(BranchNamespaceTable::new(self.access.clone())));
        }

        let table_name = |prefix: &str| TableName::new(&name[prefix.len()..]).map_err(SchemaError::from);
        let table = if lower.starts_with(DIFF_TABLE_PREFIX) {
            SystemTable::Diff(DiffTable::new(
                self.catalog.clone(),
                table_name(DIFF_TABLE_PREFIX)?,
                self.materializer(),
            )?)
        } else if lower.starts_with(WORKSPACE_TABLE_PREFIX) {
            SystemTable::Workspace(WorkspaceTable::new(
                self.catalog.clone(),
                table_name(WORKSPACE_TABLE_PREFIX)?,
                self.materializer(),
                self.access.clone(),
                self.config.database_name.clone(),
            )?)
        } else {
            return Err(DatabaseError::TableNotFound(name.to_string()));
        };
        debug!(name, "system table resolved");
        Ok(table)
    }

    // ==================== Branches ====================

    fn user_branch(name: &str) -> DatabaseResult<BranchName> {
        let branch = BranchName::new(name).map_err(StorageError::from)?;
        if branch.is_reserved() {
            return Err(DatabaseError::ReservedBranch(name.to_string()));
        }
        Ok(branch)
    }

    /// Branch off `main`'s tip. The creator gets `admin` on the new branch
    /// unless they already hold it there.
    pub fn create_branch(&self, ctx: &Context, name: &str) -> DatabaseResult<CommitId> {
        let branch = Self::user_branch(name)?;
        let database = &self.config.database_name;
        self.access.check_create_branch(ctx, database, branch.as_str())?;

        let head = self.repo.head()?;
        self.repo.create_branch(&branch, head)?;
        self.access.add_admin_for(ctx, database, branch.as_str())?;
        self.access.save()?;
        info!(branch = %branch, at = %head.short(), "branch created");
        Ok(head)
    }

    pub fn delete_branch(&self, ctx: &Context, name: &str) -> DatabaseResult<()> {
        let branch = Self::user_branch(name)?;
        self.access
            .check_delete_branch(ctx, &self.config.database_name, branch.as_str())?;
        self.repo.delete_branch(&branch)?;
        info!(branch = %branch, "branch deleted");
        Ok(())
    }

    // ==================== Working set edits ====================

    /// tables in the working root
    pub fn tables(&self) -> DatabaseResult<Vec<TableName>> {
        Ok(self.catalog.list_tables(self.working_set()?.working)?)
    }

    pub fn table_schema(&self, table: &str) -> DatabaseResult<Option<TableSchema>> {
        let table = TableName::new(table).map_err(SchemaError::from)?;
        Ok(self.catalog.find_table(&table, self.working_set()?.working)?)
    }

    fn require_schema(&self, table: &str) -> DatabaseResult<TableSchema> {
        self.table_schema(table)?
            .ok_or_else(|| DatabaseError::TableNotFound(table.to_string()))
    }

    /// Apply `at -> new tip` edits to the working branch, failing if it moved.
    fn edit_working<F>(&self, edit: F) -> DatabaseResult<CommitId>
    where
        F: FnOnce(CommitId) -> DatabaseResult<CommitId>,
    {
        let working = self.working_set()?.working;
        let tip = edit(working)?;
        self.repo
            .update_branch_if_unchanged(&BranchName::working(), working, tip)?;
        Ok(tip)
    }

    pub fn create_table(&self, schema: &TableSchema) -> DatabaseResult<CommitId> {
        self.edit_working(|at| Ok(self.catalog.create_table(schema, at)?))
    }

    /// replace a table's schema; the new version must be newer
    pub fn alter_table(&self, schema: &TableSchema) -> DatabaseResult<CommitId> {
        self.edit_working(|at| Ok(self.catalog.update_table(schema, at)?))
    }

    pub fn drop_table(&self, table: &str) -> DatabaseResult<CommitId> {
        let table = TableName::new(table).map_err(SchemaError::from)?;
        self.edit_working(|at| Ok(self.catalog.drop_table(&table, at)?))
    }

    fn write_rows<F>(&self, table: &str, write: F) -> DatabaseResult<()>
    where
        F: FnOnce(&mut TableWriter, &TableSchema) -> DatabaseResult<()>,
    {
        let schema = self.require_schema(table)?;
        let mut writer = TableWriter::new(self.repo.clone(), BranchName::working())?;
        write(&mut writer, &schema)?;
        writer.commit()?;
        Ok(())
    }

    fn row_data(schema: &TableSchema, row: Value) -> DatabaseResult<RowData> {
        schema.validate_row(&row)?;
        match row {
            Value::Object(map) => Ok(map.into_iter().collect()),
            _ => Err(SchemaError::InvalidRow("row must be a JSON object".into()).into()),
        }
    }

    /// Insert rows into the working root. Keyed rows must not exist yet.
    pub fn insert(&self, table: &str, rows: Vec<Value>) -> DatabaseResult<()> {
        self.write_rows(table, |writer, schema| {
            for row in rows {
                writer.insert(schema, Self::row_data(schema, row)?)?;
            }
            Ok(())
        })
    }

    /// Insert or replace rows in the working root.
    pub fn upsert(&self, table: &str, rows: Vec<Value>) -> DatabaseResult<()> {
        self.write_rows(table, |writer, schema| {
            for row in rows {
                writer.put(schema, Self::row_data(schema, row)?)?;
            }
            Ok(())
        })
    }

    /// Delete rows from the working root: keyed rows by their primary key,
    /// keyless rows one instance per matching row. Returns how many went.
    pub fn delete(&self, table: &str, rows: Vec<Value>) -> DatabaseResult<usize> {
        let mut removed = 0;
        self.write_rows(table, |writer, schema| {
            for row in rows {
                let data = match row {
                    Value::Object(map) => map.into_iter().collect(),
                    _ => return Err(SchemaError::InvalidRow("row must be a JSON object".into()).into()),
                };
                if writer.remove(schema, &data)? {
                    removed += 1;
                }
            }
            Ok(())
        })?;
        Ok(removed)
    }

    /// Stage a table: copy its working state into the staged root.
    pub fn add(&self, table: &str) -> DatabaseResult<CommitId> {
        let table = TableName::new(table).map_err(SchemaError::from)?;
        Ok(self.repo.stage_table(&table)?)
    }

    /// Commit everything staged. `None` when nothing was staged.
    pub fn commit(&self, message: &str) -> DatabaseResult<Option<CommitId>> {
        Ok(self.repo.commit_staged(message)?)
    }

    /// Drop all staged and working changes.
    pub fn reset(&self) -> DatabaseResult<()> {
        Ok(self.repo.reset_working_set()?)
    }

    /// Get the version/commit history.
    pub fn history(&self, limit: Option<usize>) -> DatabaseResult<Vec<CommitInfo>> {
        let head = self.repo.head()?;
        Ok(self.repo.history(head, limit)?)
    }
}

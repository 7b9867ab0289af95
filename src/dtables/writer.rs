//! Schema-aware row writes on top of a [`BranchWriter`].
//!
//! Keyed rows are stored under the hex of their encoded primary key, so
//! writing the same key twice replaces the row. Keyless rows get a fresh key
//! per stored instance and are matched by content when removed.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::catalog::TableSchema;
use crate::snapshot::encode_key;
use crate::sql::{SqlError, SqlResult};
use crate::storage::{BranchName, BranchWriter, CommitId, GitRepository, Row, RowKey, TableName};

pub type RowData = BTreeMap<String, Value>;

pub struct TableWriter {
    writer: BranchWriter,
}

impl TableWriter {
    pub fn new(repo: GitRepository, branch: BranchName) -> SqlResult<Self> {
        Ok(Self {
            writer: BranchWriter::new(repo, branch)?,
        })
    }

    pub fn branch(&self) -> &BranchName {
        self.writer.branch()
    }

    pub fn head(&self) -> CommitId {
        self.writer.head()
    }

    pub fn is_dirty(&self) -> bool {
        self.writer.is_dirty()
    }

    /// Storage key of a keyed row.
    pub fn row_key(schema: &TableSchema, data: &RowData) -> SqlResult<RowKey> {
        let pk = schema
            .primary_key
            .as_deref()
            .ok_or_else(|| SqlError::Internal(format!("table {} has no primary key", schema.name)))?;
        match data.get(pk) {
            Some(value) if !value.is_null() => Ok(RowKey::from_bytes(encode_key(value).as_bytes())),
            _ => Err(SqlError::invalid_value(pk, "primary key cannot be null")),
        }
    }

    /// create the table in this branch's root if it isn't there yet
    pub fn ensure_table(&mut self, schema: &TableSchema) -> SqlResult<TableName> {
        let table = schema.table_name()?;
        if !self.writer.table_exists(&table)? {
            let bytes = serde_json::to_vec_pretty(schema).map_err(crate::storage::StorageError::from)?;
            self.writer.create_table(&table, &bytes)?;
        }
        Ok(table)
    }

    /// Write a row: keyed rows replace any row with the same key, keyless
    /// rows add one more instance.
    pub fn put(&mut self, schema: &TableSchema, data: RowData) -> SqlResult<()> {
        let table = self.ensure_table(schema)?;
        let data = normalize(data);
        if schema.is_keyless() {
            self.writer.insert_row(&table, Row::new(RowKey::generate(), data))?;
        } else {
            let key = Self::row_key(schema, &data)?;
            self.writer.upsert_row(&table, Row::new(key, data))?;
        }
        Ok(())
    }

    /// Insert a row, failing if a keyed row with the same key exists.
    pub fn insert(&mut self, schema: &TableSchema, data: RowData) -> SqlResult<()> {
        let table = schema.table_name()?;
        let data = normalize(data);
        let key = if schema.is_keyless() {
            RowKey::generate()
        } else {
            Self::row_key(schema, &data)?
        };
        self.writer.insert_row(&table, Row::new(key, data))?;
        Ok(())
    }

    /// Remove a row. Keyed rows are found by key, keyless rows by content
    /// (one instance). Returns whether a row was removed.
    pub fn remove(&mut self, schema: &TableSchema, data: &RowData) -> SqlResult<bool> {
        let table = schema.table_name()?;
        if !self.writer.table_exists(&table)? {
            return Ok(false);
        }

        let key = if schema.is_keyless() {
            let columns = schema.value_columns();
            self.writer
                .scan_table(&table)?
                .into_iter()
                .find(|row| {
                    columns.iter().all(|c| {
                        row.value_or_null(&c.name) == data.get(&c.name).cloned().unwrap_or(Value::Null)
                    })
                })
                .map(|row| row.key)
        } else {
            let key = Self::row_key(schema, data)?;
            self.writer.read_row(&table, &key)?.map(|row| row.key)
        };

        match key {
            Some(key) => {
                self.writer.delete_row(&table, &key)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// all rows of a table in this branch's pending root
    pub fn scan(&self, schema: &TableSchema) -> SqlResult<Vec<Row>> {
        let table = schema.table_name()?;
        if !self.writer.table_exists(&table)? {
            return Ok(Vec::new());
        }
        Ok(self.writer.scan_table(&table)?)
    }

    pub fn commit(&mut self) -> SqlResult<Option<CommitId>> {
        Ok(self.writer.commit()?)
    }

    pub fn discard(&mut self) {
        self.writer.discard();
    }

    pub fn refresh(&mut self) -> SqlResult<()> {
        Ok(self.writer.refresh()?)
    }
}

// null columns are stored as absent so equal rows always serialize equally
fn normalize(mut data: RowData) -> RowData {
    data.retain(|_, v| !v.is_null());
    data
}

//! Table schema definitions and validation.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{ColumnDef, DataType};
use crate::storage::{InvalidNameError, StorageError, TableName};

/// Schema version for tracking migrations.
pub type SchemaVersion = u32;

/// Table schema definition.
///
/// A schema without a primary key describes a keyless table: rows are
/// identified only by their content and duplicates are allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    /// incremented on each modification
    pub version: SchemaVersion,
    pub columns: Vec<ColumnDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<String>,
}

impl TableSchema {
    /// A keyless schema at version 1.
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            version: 1,
            columns,
            primary_key: None,
        }
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Keyless rows are stored under generated keys and diffed by content.
    pub fn is_keyless(&self) -> bool {
        self.primary_key.is_none()
    }

    /// the primary key column, empty for keyless tables
    pub fn key_columns(&self) -> Vec<&ColumnDef> {
        match &self.primary_key {
            Some(pk) => self.columns.iter().filter(|c| &c.name == pk).collect(),
            None => Vec::new(),
        }
    }

    /// every non-key column in declaration order
    pub fn value_columns(&self) -> Vec<&ColumnDef> {
        self.columns
            .iter()
            .filter(|c| self.primary_key.as_deref() != Some(c.name.as_str()))
            .collect()
    }

    /// same column names, types and key, ignoring table name and version
    pub fn same_columns(&self, other: &TableSchema) -> bool {
        self.primary_key == other.primary_key
            && self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(&other.columns)
                .all(|(a, b)| a.name == b.name && a.data_type == b.data_type)
    }

    pub fn table_name(&self) -> Result<TableName, SchemaError> {
        Ok(TableName::new(self.name.as_str())?)
    }

    /// Validate the schema itself (e.g., primary key exists).
    pub fn validate(&self) -> Result<(), SchemaError> {
        self.table_name()?;

        let mut seen = HashSet::new();
        for col in &self.columns {
            if !seen.insert(&col.name) {
                return Err(SchemaError::DuplicateColumn(col.name.clone()));
            }
        }

        if let Some(pk) = &self.primary_key {
            if !self.columns.iter().any(|c| &c.name == pk) {
                return Err(SchemaError::InvalidPrimaryKey(pk.clone()));
            }
        }

        Ok(())
    }

    /// Validate a row against this schema.
    pub fn validate_row(&self, row: &Value) -> Result<(), SchemaError> {
        let obj = row
            .as_object()
            .ok_or_else(|| SchemaError::InvalidRow("row must be a JSON object".into()))?;

        for key in obj.keys() {
            if self.get_column(key).is_none() {
                return Err(SchemaError::ColumnNotFound(key.clone()));
            }
        }
        for col in &self.columns {
            col.validate(obj.get(&col.name)).map_err(SchemaError::InvalidRow)?;
        }
        if let Some(pk) = &self.primary_key {
            if obj.get(pk).map_or(true, Value::is_null) {
                return Err(SchemaError::InvalidRow(format!("primary key '{}' is null", pk)));
            }
        }

        Ok(())
    }

    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    pub fn add_column(&mut self, column: ColumnDef) -> Result<(), SchemaError> {
        if self.get_column(&column.name).is_some() {
            return Err(SchemaError::DuplicateColumn(column.name));
        }
        self.columns.push(column);
        self.bump_version();
        Ok(())
    }

    pub fn remove_column(&mut self, name: &str) -> Result<ColumnDef, SchemaError> {
        let pos = self
            .columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| SchemaError::ColumnNotFound(name.to_string()))?;

        if self.primary_key.as_deref() == Some(name) {
            return Err(SchemaError::CannotRemovePrimaryKey(name.to_string()));
        }

        let col = self.columns.remove(pos);
        self.bump_version();
        Ok(col)
    }

    /// change a column's type; existing rows are coerced on read
    pub fn alter_column_type(&mut self, name: &str, data_type: DataType) -> Result<(), SchemaError> {
        let col = self
            .columns
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| SchemaError::ColumnNotFound(name.to_string()))?;
        col.data_type = data_type;
        self.bump_version();
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("invalid primary key reference: {0}")]
    InvalidPrimaryKey(String),

    #[error("column not found: {0}")]
    ColumnNotFound(String),

    #[error("cannot remove primary key column: {0}")]
    CannotRemovePrimaryKey(String),

    #[error("invalid row: {0}")]
    InvalidRow(String),

    #[error("table already exists: {0}")]
    TableExists(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("schema version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: SchemaVersion, found: SchemaVersion },

    #[error("invalid table name: {0}")]
    InvalidName(#[from] InvalidNameError),

    #[error("corrupted schema: {0}")]
    Corrupted(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type SchemaResult<T> = Result<T, SchemaError>;

/// Builder for creating table schemas.
pub struct SchemaBuilder {
    name: String,
    columns: Vec<ColumnDef>,
    primary_key: Option<String>,
}

impl SchemaBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: None,
        }
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn add_column(self, name: impl Into<String>, data_type: DataType) -> Self {
        self.column(ColumnDef::new(name, data_type))
    }

    pub fn primary_key(mut self, column_name: impl Into<String>) -> Self {
        self.primary_key = Some(column_name.into());
        self
    }

    pub fn build(self) -> Result<TableSchema, SchemaError> {
        let mut schema = TableSchema::new(self.name, self.columns);
        schema.primary_key = self.primary_key;
        schema.validate()?;
        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_schema() -> TableSchema {
        SchemaBuilder::new("users")
            .column(ColumnDef::new("id", DataType::Uuid).required())
            .column(ColumnDef::new("name", DataType::Text).required())
            .add_column("age", DataType::Integer)
            .primary_key("id")
            .build()
            .unwrap()
    }

    #[test]
    fn test_schema_validation() {
        assert!(matches!(
            SchemaBuilder::new("bad").add_column("a", DataType::Text).add_column("a", DataType::Integer).build(),
            Err(SchemaError::DuplicateColumn(_))
        ));
        assert!(matches!(
            SchemaBuilder::new("bad").add_column("a", DataType::Text).primary_key("id").build(),
            Err(SchemaError::InvalidPrimaryKey(_))
        ));
        assert!(matches!(
            SchemaBuilder::new("1bad").build(),
            Err(SchemaError::InvalidName(_))
        ));
    }

    #[test]
    fn test_key_and_value_columns() {
        let schema = sample_schema();
        assert!(!schema.is_keyless());
        assert_eq!(schema.key_columns()[0].name, "id");
        let values: Vec<_> = schema.value_columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(values, vec!["name", "age"]);

        let keyless = SchemaBuilder::new("log").add_column("msg", DataType::Text).build().unwrap();
        assert!(keyless.is_keyless());
        assert!(keyless.key_columns().is_empty());
        assert_eq!(keyless.value_columns().len(), 1);
    }

    #[test]
    fn test_row_validation() {
        let schema = sample_schema();
        let id = "550e8400-e29b-41d4-a716-446655440000";

        assert!(schema.validate_row(&json!({"id": id, "name": "Alice", "age": 30})).is_ok());
        assert!(schema.validate_row(&json!({"id": id})).is_err());
        assert!(schema.validate_row(&json!({"id": id, "name": "A", "age": "thirty"})).is_err());
        assert!(matches!(
            schema.validate_row(&json!({"id": id, "name": "A", "extra": 1})),
            Err(SchemaError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn test_same_columns_ignores_version() {
        let a = sample_schema();
        let mut b = sample_schema();
        b.bump_version();
        assert!(a.same_columns(&b));

        b.alter_column_type("age", DataType::Text).unwrap();
        assert!(!a.same_columns(&b));
    }

    #[test]
    fn test_schema_migration() {
        let mut schema = sample_schema();

        schema.add_column(ColumnDef::new("bio", DataType::Text)).unwrap();
        assert_eq!(schema.version, 2);
        assert!(schema.get_column("bio").is_some());

        let removed = schema.remove_column("bio").unwrap();
        assert_eq!(removed.name, "bio");
        assert_eq!(schema.version, 3);

        let result = schema.remove_column("id");
        assert!(matches!(result, Err(SchemaError::CannotRemovePrimaryKey(_))));
    }

    #[test]
    fn test_schema_serialization() {
        let schema = sample_schema();
        let json = serde_json::to_string_pretty(&schema).unwrap();
        let deserialized: TableSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, deserialized);
    }
}

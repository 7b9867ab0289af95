//! Row blobs.
//!
//! Each stored row is one JSON blob. The file name carries the row key and the
//! blob repeats it under `_pk` so a mismatched tree entry can be detected on read.
//! Serialization is deterministic, so equal rows always hash to the same blob.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BlobId, RowKey};

/// a stored row: its key plus column values by name
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub key: RowKey,
    pub data: BTreeMap<String, Value>,
}

impl Row {
    pub fn new(key: RowKey, data: BTreeMap<String, Value>) -> Self {
        Self { key, data }
    }

    /// build a row from a JSON object
    pub fn from_value(key: RowKey, value: Value) -> StorageResult<Self> {
        match value {
            Value::Object(map) => Ok(Self::new(key, map.into_iter().collect())),
            _ => Err(StorageError::SchemaViolation(
                "row data must be a JSON object".to_string(),
            )),
        }
    }

    /// `None` for a column the row was never written with
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.data.get(column)
    }

    /// column value, with missing columns read as null
    pub fn value_or_null(&self, column: &str) -> Value {
        self.data.get(column).cloned().unwrap_or(Value::Null)
    }
}

/// On-disk layout: the key under `_pk`, then the columns flattened beside it.
#[derive(Serialize, Deserialize)]
struct RowJson {
    #[serde(rename = "_pk")]
    pk: String,
    #[serde(flatten)]
    data: BTreeMap<String, Value>,
}

/// Pretty-printed JSON with columns in name order.
pub fn serialize_row(row: &Row) -> StorageResult<Vec<u8>> {
    let json = RowJson {
        pk: row.key.as_str().to_string(),
        data: row.data.clone(),
    };
    Ok(serde_json::to_vec_pretty(&json)?)
}

/// deserialize a row, checking the embedded key against the file name
pub fn deserialize_row(bytes: &[u8], expected_key: &RowKey) -> StorageResult<Row> {
    let json: RowJson = serde_json::from_slice(bytes)?;

    if json.pk != expected_key.as_str() {
        return Err(StorageError::CorruptedData {
            path: expected_key.file_name().into(),
            reason: format!(
                "primary key mismatch: file name suggests '{}' but content has '{}'",
                expected_key, json.pk
            ),
        });
    }

    Ok(Row {
        key: expected_key.clone(),
        data: json.data,
    })
}

/// Serialize a row and store it as a blob. Returns the existing blob id when
/// an identical row is already in the object database.
pub fn write_row_blob(repo: &git2::Repository, row: &Row) -> StorageResult<BlobId> {
    let bytes = serialize_row(row)?;
    Ok(BlobId::new(repo.blob(&bytes)?))
}

/// store bytes that are not a row, e.g. a table's `_schema` entry
pub fn write_raw_blob(repo: &git2::Repository, bytes: &[u8]) -> StorageResult<BlobId> {
    Ok(BlobId::new(repo.blob(bytes)?))
}

/// Raw content of a blob. Fails with a git error if the id is not a blob.
pub fn read_blob(repo: &git2::Repository, blob_id: BlobId) -> StorageResult<Vec<u8>> {
    let blob = repo.find_blob(blob_id.raw())?;
    Ok(blob.content().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serialization_roundtrip() {
        let key = RowKey::new("test123").unwrap();
        let row = Row::from_value(key.clone(), json!({"name": "Alice", "count": 42})).unwrap();

        let bytes = serialize_row(&row).unwrap();
        let restored = deserialize_row(&bytes, &key).unwrap();

        assert_eq!(row, restored);
        assert_eq!(restored.value_or_null("missing"), Value::Null);
    }

    #[test]
    fn test_serialization_is_deterministic() {
        let key = RowKey::new("abc").unwrap();
        let a = Row::from_value(key.clone(), json!({"b": 2, "a": 1})).unwrap();
        let b = Row::from_value(key, json!({"a": 1, "b": 2})).unwrap();

        assert_eq!(serialize_row(&a).unwrap(), serialize_row(&b).unwrap());
    }

    #[test]
    fn test_non_object_rejected() {
        let key = RowKey::new("abc").unwrap();
        let result = Row::from_value(key, json!([1, 2]));
        assert!(matches!(result, Err(StorageError::SchemaViolation(_))));
    }

    #[test]
    fn test_key_mismatch_detection() {
        let row = Row::new(RowKey::new("correct").unwrap(), BTreeMap::new());
        let bytes = serialize_row(&row).unwrap();

        let result = deserialize_row(&bytes, &RowKey::new("wrong").unwrap());
        assert!(matches!(result, Err(StorageError::CorruptedData { .. })));
    }
}

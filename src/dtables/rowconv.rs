//! Converting encoded rows between two schemas of the same table.

use serde_json::Value;
use thiserror::Error;

use crate::catalog::{CoerceError, DataType, TableSchema};
use crate::snapshot::{Tuple, TupleDesc, TupleError};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConvertError {
    #[error("primary key column '{0}' is missing from the target schema")]
    MissingKeyColumn(String),

    #[error(transparent)]
    Decode(#[from] TupleError),

    #[error("column '{column}': {source}")]
    Coerce {
        column: String,
        #[source]
        source: CoerceError,
    },

    #[error("output row has {found} columns, expected {expected}")]
    Width { expected: usize, found: usize },
}

#[derive(Debug, Clone)]
struct FieldMapping {
    name: String,
    /// output position, `None` when the target has no such column
    target: Option<usize>,
    /// set when source and target types differ
    coerce: Option<DataType>,
}

impl FieldMapping {
    fn write(&self, value: Value, out: &mut [Value]) -> Result<(), ConvertError> {
        let Some(idx) = self.target else {
            return Ok(());
        };
        out[idx] = match self.coerce {
            Some(ty) => ty.coerce(&value).map_err(|source| ConvertError::Coerce {
                column: self.name.clone(),
                source,
            })?,
            None => value,
        };
        Ok(())
    }
}

/// Maps the key and value tuples of one schema onto the columns of another.
///
/// Built once per schema pair; `put_converted` has no side effects beyond
/// the output slice.
#[derive(Debug, Clone)]
pub struct RowConverter {
    key_desc: TupleDesc,
    value_desc: TupleDesc,
    key_fields: Vec<FieldMapping>,
    value_fields: Vec<FieldMapping>,
    width: usize,
}

impl RowConverter {
    pub fn new(source: &TableSchema, target: &TableSchema) -> Result<Self, ConvertError> {
        // key fields only land on key columns, value fields only on value columns
        let map = |name: &str, ty: DataType, is_key: bool| {
            let target_is_key = target.primary_key.as_deref() == Some(name);
            let idx = target
                .columns
                .iter()
                .position(|c| c.name == name)
                .filter(|_| target_is_key == is_key);
            FieldMapping {
                name: name.to_string(),
                target: idx,
                coerce: idx
                    .map(|i| target.columns[i].data_type)
                    .filter(|target_ty| *target_ty != ty),
            }
        };

        let key_columns = source.key_columns();
        let mut key_fields = Vec::with_capacity(key_columns.len());
        for col in &key_columns {
            let mapping = map(&col.name, col.data_type, true);
            if mapping.target.is_none() {
                return Err(ConvertError::MissingKeyColumn(col.name.clone()));
            }
            key_fields.push(mapping);
        }

        let value_columns = source.value_columns();
        let value_fields = value_columns.iter().map(|c| map(&c.name, c.data_type, false)).collect();

        let key_types = key_columns.iter().map(|c| c.data_type).collect();
        let value_types = value_columns.iter().map(|c| c.data_type).collect();
        let value_desc = if source.is_keyless() {
            TupleDesc::keyless_value(value_types)
        } else {
            TupleDesc::new(value_types)
        };

        Ok(Self {
            key_desc: TupleDesc::new(key_types),
            value_desc,
            key_fields,
            value_fields,
            width: target.columns.len(),
        })
    }

    /// number of target columns
    pub fn width(&self) -> usize {
        self.width
    }

    /// Decode `key` and `value` and write each mapped field into `out`.
    /// Target columns with no source field are left untouched.
    pub fn put_converted(&self, key: &Tuple, value: &Tuple, out: &mut [Value]) -> Result<(), ConvertError> {
        if out.len() != self.width {
            return Err(ConvertError::Width {
                expected: self.width,
                found: out.len(),
            });
        }

        // keyless keys are content hashes, not columns
        let keys = if self.key_fields.is_empty() {
            Vec::new()
        } else {
            self.key_desc.decode(key)?
        };
        let values = self.value_desc.decode(value)?;

        for (mapping, v) in self.key_fields.iter().zip(keys) {
            mapping.write(v, out)?;
        }
        for (mapping, v) in self.value_fields.iter().zip(values) {
            mapping.write(v, out)?;
        }
        Ok(())
    }
}

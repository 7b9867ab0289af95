//! Rows, schemas and row iteration.

use std::fmt;

use serde_json::Value;

use super::error::SqlResult;
use crate::catalog::DataType;
use crate::context::Context;

/// One output row, positionally matching its table's `SqlSchema`.
pub type SqlRow = Vec<Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub primary_key: bool,
    /// name of the table the column belongs to
    pub source: String,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            primary_key: false,
            source: source.into(),
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlSchema {
    columns: Vec<Column>,
}

impl SqlSchema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

impl fmt::Display for SqlSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.names().join("\t"))
    }
}

/// Pull-based row iteration.
///
/// `next_row` returns `Ok(None)` at end of data and keeps returning it after
/// the iterator has finished or failed. `close` must be called once the
/// caller is done and is safe to call more than once.
pub trait RowIter: Send {
    fn next_row(&mut self, ctx: &Context) -> SqlResult<Option<SqlRow>>;

    fn close(&mut self, ctx: &Context) -> SqlResult<()>;
}

/// Rows computed up front.
pub struct VecRowIter {
    rows: std::vec::IntoIter<SqlRow>,
}

impl VecRowIter {
    pub fn new(rows: Vec<SqlRow>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl RowIter for VecRowIter {
    fn next_row(&mut self, ctx: &Context) -> SqlResult<Option<SqlRow>> {
        ctx.check()?;
        Ok(self.rows.next())
    }

    fn close(&mut self, _ctx: &Context) -> SqlResult<()> {
        self.rows = Vec::new().into_iter();
        Ok(())
    }
}

/// Drain an iterator into a vector, closing it whether or not iteration failed.
pub fn collect_rows(ctx: &Context, iter: &mut dyn RowIter) -> SqlResult<Vec<SqlRow>> {
    let mut rows = Vec::new();
    let result = loop {
        match iter.next_row(ctx) {
            Ok(Some(row)) => rows.push(row),
            Ok(None) => break Ok(rows),
            Err(e) => break Err(e),
        }
    };
    iter.close(ctx)?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_lookup() {
        let schema = SqlSchema::new(vec![
            Column::new("id", DataType::Integer, "t").primary_key(),
            Column::new("name", DataType::Text, "t"),
        ]);
        assert_eq!(schema.index_of("name"), Some(1));
        assert_eq!(schema.index_of("missing"), None);
        assert!(!schema.columns()[0].nullable);
        assert_eq!(schema.to_string(), "id\tname");
    }

    #[test]
    fn test_vec_row_iter() {
        let ctx = Context::background();
        let mut iter = VecRowIter::new(vec![vec![json!(1)], vec![json!(2)]]);
        let rows = collect_rows(&ctx, &mut iter).unwrap();
        assert_eq!(rows, vec![vec![json!(1)], vec![json!(2)]]);
        assert_eq!(iter.next_row(&ctx).unwrap(), None);
        iter.close(&ctx).unwrap();
    }

    #[test]
    fn test_vec_row_iter_observes_cancellation() {
        let (ctx, cancel) = Context::background().with_cancel();
        let mut iter = VecRowIter::new(vec![vec![json!(1)]]);
        cancel.cancel();
        assert!(iter.next_row(&ctx).unwrap_err().is_cancelled());
    }
}

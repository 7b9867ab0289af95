//! Immutable, ordered views of one table at one commit.
//!
//! A snapshot maps encoded keys to encoded values:
//! - keyed tables: key = `[pk]`, value = non-key columns in schema order
//! - keyless tables: identical rows collapse into one entry keyed by the
//!   content hash, with value = `[count, columns...]`
//!
//! Snapshots are what the diff machinery walks; they are never mutated.

mod diff;
mod tuple;

use std::collections::BTreeMap;
use std::sync::Arc;

use git2::{ObjectType, Oid};
use serde_json::Value;
use tracing::trace;

use crate::catalog::TableSchema;
use crate::context::{Cancelled, Context};
use crate::storage::{CommitId, GitRepository, Row, StorageError, TableName};

pub use diff::{diff_snapshots, ChangeRecord};
pub use tuple::{cardinality, Tuple, TupleBuilder, TupleDesc, TupleError, TupleReader, TupleResult};

#[derive(Debug, Clone)]
pub struct Snapshot {
    schema: Arc<TableSchema>,
    rows: Arc<BTreeMap<Tuple, Tuple>>,
    absent: bool,
}

impl Snapshot {
    /// the table as seen from a root that doesn't contain it
    pub fn empty(schema: Arc<TableSchema>) -> Self {
        Self {
            schema,
            rows: Arc::new(BTreeMap::new()),
            absent: true,
        }
    }

    /// Build a snapshot from already-encoded entries.
    pub fn from_entries(schema: Arc<TableSchema>, entries: impl IntoIterator<Item = (Tuple, Tuple)>) -> Self {
        Self {
            schema,
            rows: Arc::new(entries.into_iter().collect()),
            absent: false,
        }
    }

    /// Read a table at a commit. A table missing at `at` yields an empty
    /// snapshot. `ctx` is checked between rows.
    pub fn load<E>(
        ctx: &Context,
        repo: &GitRepository,
        table: &TableName,
        at: CommitId,
        schema: Arc<TableSchema>,
    ) -> Result<Self, E>
    where
        E: From<StorageError> + From<Cancelled>,
    {
        if !repo.table_exists(table, at)? {
            return Ok(Self::empty(schema));
        }

        let mut rows = Vec::new();
        repo.for_each_row(table, at, |row| {
            ctx.check()?;
            rows.push(row);
            Ok::<_, E>(())
        })?;
        let entries = if schema.is_keyless() {
            encode_keyless(&schema, &rows)
        } else {
            rows.iter().map(|row| encode_keyed(&schema, row)).collect()
        };
        trace!(table = %table, at = %at.short(), rows = rows.len(), "snapshot loaded");

        Ok(Self {
            schema,
            rows: Arc::new(entries),
            absent: false,
        })
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    pub fn key_descriptor(&self) -> TupleDesc {
        TupleDesc::new(self.schema.key_columns().iter().map(|c| c.data_type).collect())
    }

    pub fn value_descriptor(&self) -> TupleDesc {
        let fields = self.schema.value_columns().iter().map(|c| c.data_type).collect();
        if self.is_keyless() {
            TupleDesc::keyless_value(fields)
        } else {
            TupleDesc::new(fields)
        }
    }

    pub fn is_keyless(&self) -> bool {
        self.schema.is_keyless()
    }

    /// true when the table does not exist at this snapshot's root
    pub fn is_absent(&self) -> bool {
        self.absent
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, key: &Tuple) -> Option<&Tuple> {
        self.rows.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Tuple, &Tuple)> {
        self.rows.iter()
    }
}

/// Where a diff side comes from. Stored tables are read by whoever opens
/// the source, so a diff producer does the reading on its own thread.
#[derive(Clone)]
pub enum SnapshotSource {
    Ready(Snapshot),
    Stored {
        repo: GitRepository,
        table: TableName,
        at: CommitId,
        schema: Arc<TableSchema>,
    },
}

impl SnapshotSource {
    pub fn stored(repo: GitRepository, table: TableName, at: CommitId, schema: Arc<TableSchema>) -> Self {
        SnapshotSource::Stored { repo, table, at, schema }
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        match self {
            SnapshotSource::Ready(snapshot) => snapshot.schema(),
            SnapshotSource::Stored { schema, .. } => schema,
        }
    }

    /// A stored source always has a schema at its root, so the table exists.
    pub fn is_absent(&self) -> bool {
        match self {
            SnapshotSource::Ready(snapshot) => snapshot.is_absent(),
            SnapshotSource::Stored { .. } => false,
        }
    }

    pub fn is_keyless(&self) -> bool {
        self.schema().is_keyless()
    }

    pub fn open<E>(&self, ctx: &Context) -> Result<Snapshot, E>
    where
        E: From<StorageError> + From<Cancelled>,
    {
        match self {
            SnapshotSource::Ready(snapshot) => Ok(snapshot.clone()),
            SnapshotSource::Stored { repo, table, at, schema } => {
                Snapshot::load(ctx, repo, table, *at, schema.clone())
            }
        }
    }
}

impl From<Snapshot> for SnapshotSource {
    fn from(snapshot: Snapshot) -> Self {
        SnapshotSource::Ready(snapshot)
    }
}

/// encoded primary key of a row value
pub fn encode_key(pk: &Value) -> Tuple {
    Tuple::builder().push(pk).build()
}

fn encode_keyed(schema: &TableSchema, row: &Row) -> (Tuple, Tuple) {
    let pk = schema
        .primary_key
        .as_deref()
        .map(|pk| row.value_or_null(pk))
        .unwrap_or(Value::Null);

    let value = schema
        .value_columns()
        .iter()
        .fold(Tuple::builder(), |b, col| b.push(&row.value_or_null(&col.name)))
        .build();

    (encode_key(&pk), value)
}

fn encode_keyless(schema: &TableSchema, rows: &[Row]) -> BTreeMap<Tuple, Tuple> {
    let columns = schema.value_columns();
    let mut grouped: BTreeMap<Tuple, (Vec<u8>, u64)> = BTreeMap::new();

    for row in rows {
        let content = columns
            .iter()
            .fold(Tuple::builder(), |b, col| b.push(&row.value_or_null(&col.name)))
            .build();
        let key = Tuple::builder()
            .push(&Value::String(content_hash(content.as_bytes())))
            .build();
        grouped
            .entry(key)
            .or_insert_with(|| (content.as_bytes().to_vec(), 0))
            .1 += 1;
    }

    grouped
        .into_iter()
        .map(|(key, (content, count))| {
            let mut value = Tuple::builder().push_uint(count).build().as_bytes().to_vec();
            value.extend_from_slice(&content);
            (key, Tuple::from_bytes(value))
        })
        .collect()
}

/// git blob hash of encoded row content
pub fn content_hash(bytes: &[u8]) -> String {
    Oid::hash_object(ObjectType::Blob, bytes)
        .map(|oid| oid.to_string())
        .unwrap_or_else(|_| {
            bytes.iter().map(|b| format!("{:02x}", b)).collect()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, DataType, SchemaBuilder};
    use crate::sql::SqlError;
    use crate::storage::RowKey;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Catalog) {
        let dir = TempDir::new().unwrap();
        let repo = GitRepository::init(dir.path()).unwrap();
        (dir, Catalog::new(repo))
    }

    fn load(catalog: &Catalog, table: &TableName, at: CommitId, schema: TableSchema) -> Snapshot {
        Snapshot::load::<SqlError>(&Context::background(), catalog.repository(), table, at, Arc::new(schema)).unwrap()
    }

    fn insert(catalog: &Catalog, table: &TableName, key: RowKey, value: Value, at: CommitId) -> CommitId {
        let row = Row::from_value(key, value).unwrap();
        catalog.repository().insert_row(table, row, at).unwrap()
    }

    #[test]
    fn test_load_keyed_table() {
        let (_dir, catalog) = setup();
        let schema = SchemaBuilder::new("people")
            .add_column("id", DataType::Integer)
            .add_column("name", DataType::Text)
            .add_column("age", DataType::Integer)
            .primary_key("id")
            .build()
            .unwrap();
        let table = TableName::new("people").unwrap();
        let mut at = catalog.create_table(&schema, catalog.repository().head().unwrap()).unwrap();

        for (id, name) in [(2, "b"), (1, "a"), (-5, "z")] {
            let key = RowKey::from_bytes(encode_key(&json!(id)).as_bytes());
            at = insert(&catalog, &table, key, json!({"id": id, "name": name}), at);
        }

        let snapshot = load(&catalog, &table, at, schema);
        assert!(!snapshot.is_absent());
        assert_eq!(snapshot.len(), 3);

        let keys: Vec<_> = snapshot
            .iter()
            .map(|(k, _)| snapshot.key_descriptor().decode(k).unwrap()[0].clone())
            .collect();
        assert_eq!(keys, vec![json!(-5), json!(1), json!(2)]);

        let (_, first) = snapshot.iter().next().unwrap();
        assert_eq!(
            snapshot.value_descriptor().decode(first).unwrap(),
            vec![json!("z"), Value::Null]
        );
    }

    #[test]
    fn test_load_keyless_groups_duplicates() {
        let (_dir, catalog) = setup();
        let schema = SchemaBuilder::new("events").add_column("msg", DataType::Text).build().unwrap();
        let table = TableName::new("events").unwrap();
        let mut at = catalog.create_table(&schema, catalog.repository().head().unwrap()).unwrap();

        for msg in ["x", "x", "y"] {
            at = insert(&catalog, &table, RowKey::generate(), json!({"msg": msg}), at);
        }

        let snapshot = load(&catalog, &table, at, schema);
        assert_eq!(snapshot.len(), 2);

        let mut counts: Vec<_> = snapshot
            .iter()
            .map(|(_, v)| {
                let cols = snapshot.value_descriptor().decode(v).unwrap();
                (cols[0].clone(), cardinality(v).unwrap())
            })
            .collect();
        counts.sort_by_key(|(_, n)| *n);
        assert_eq!(counts, vec![(json!("y"), 1), (json!("x"), 2)]);
    }

    #[test]
    fn test_missing_table_is_absent() {
        let (_dir, catalog) = setup();
        let schema = SchemaBuilder::new("ghost").add_column("a", DataType::Text).build().unwrap();
        let table = TableName::new("ghost").unwrap();
        let head = catalog.repository().head().unwrap();

        let snapshot = load(&catalog, &table, head, schema);
        assert!(snapshot.is_absent());
        assert!(snapshot.is_empty());

        let err = catalog.repository().scan_table(&table, head).unwrap_err();
        assert!(matches!(err, StorageError::TableNotFound(_)));
    }

    #[test]
    fn test_load_stops_when_cancelled() {
        let (_dir, catalog) = setup();
        let schema = SchemaBuilder::new("events").add_column("msg", DataType::Text).build().unwrap();
        let table = TableName::new("events").unwrap();
        let mut at = catalog.create_table(&schema, catalog.repository().head().unwrap()).unwrap();
        at = insert(&catalog, &table, RowKey::generate(), json!({"msg": "x"}), at);

        let (ctx, cancel) = Context::background().with_cancel();
        cancel.cancel();
        let source = SnapshotSource::stored(catalog.repository().clone(), table, at, Arc::new(schema));
        assert!(!source.is_absent());
        assert!(matches!(source.open::<SqlError>(&ctx), Err(SqlError::Cancelled)));
        assert_eq!(source.open::<SqlError>(&Context::background()).unwrap().len(), 1);
    }
}

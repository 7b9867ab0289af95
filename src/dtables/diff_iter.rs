//! Streaming diff materialization.
//!
//! A producer thread walks one or more snapshot diffs ("phases") in order,
//! converts each change record into output rows and hands them to the
//! consumer over a bounded channel. Errors travel on a separate rendezvous
//! channel so that every row sent before a failure is still delivered.
//!
//! ```text
//!  producer                         consumer (next_row)
//!  ────────                         ───────────────────
//!  load snapshots
//!  diff_snapshots ─ rows (bounded) ─▶ try_recv, then select over
//!        │                            { caller ctx, iterator ctx,
//!        └─────── errors (0) ───────▶   errors, rows }
//! ```

use std::fmt;
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, select, Receiver, Sender, TryRecvError};
use serde_json::Value;
use tracing::{debug, trace, warn};

use super::rowconv::RowConverter;
use crate::catalog::{DataType, TableSchema};
use crate::context::{CancelHandle, Cancelled, Context};
use crate::snapshot::{cardinality, diff_snapshots, ChangeRecord, SnapshotSource};
use crate::sql::{Column, RowIter, SqlError, SqlResult, SqlRow};

/// Tunables for diff materialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterializerConfig {
    /// rows buffered between producer and consumer
    pub row_buffer: usize,
}

impl Default for MaterializerConfig {
    fn default() -> Self {
        Self { row_buffer: 64 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffType {
    Added,
    Removed,
    Modified,
}

impl DiffType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffType::Added => "added",
            DiffType::Removed => "removed",
            DiffType::Modified => "modified",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "added" => Some(DiffType::Added),
            "removed" => Some(DiffType::Removed),
            "modified" => Some(DiffType::Modified),
            _ => None,
        }
    }
}

impl fmt::Display for DiffType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The metadata columns leading every output row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowHeader {
    /// `id, staged, diff_type`
    Workspace { staged: bool },
    /// `to_commit, to_commit_date, from_commit, from_commit_date, diff_type`
    Commits {
        to_commit: String,
        to_date: Option<DateTime<Utc>>,
        from_commit: String,
        from_date: Option<DateTime<Utc>>,
    },
}

impl RowHeader {
    pub fn width(&self) -> usize {
        match self {
            RowHeader::Workspace { .. } => 3,
            RowHeader::Commits { .. } => 5,
        }
    }

    pub fn columns(&self, source: &str) -> Vec<Column> {
        match self {
            RowHeader::Workspace { .. } => vec![
                Column::new("id", DataType::Integer, source).primary_key(),
                Column::new("staged", DataType::Boolean, source).not_null(),
                Column::new("diff_type", DataType::Text, source).not_null(),
            ],
            RowHeader::Commits { .. } => vec![
                Column::new("to_commit", DataType::Text, source),
                Column::new("to_commit_date", DataType::Timestamp, source),
                Column::new("from_commit", DataType::Text, source),
                Column::new("from_commit_date", DataType::Timestamp, source),
                Column::new("diff_type", DataType::Text, source).not_null(),
            ],
        }
    }

    fn write(&self, seq: u64, diff_type: DiffType, out: &mut [Value]) {
        let date = |d: &Option<DateTime<Utc>>| d.map_or(Value::Null, |d| Value::String(d.to_rfc3339()));
        match self {
            RowHeader::Workspace { staged } => {
                out[0] = Value::from(seq);
                out[1] = Value::Bool(*staged);
                out[2] = Value::from(diff_type.as_str());
            }
            RowHeader::Commits {
                to_commit,
                to_date,
                from_commit,
                from_date,
            } => {
                out[0] = Value::from(to_commit.as_str());
                out[1] = date(to_date);
                out[2] = Value::from(from_commit.as_str());
                out[3] = date(from_date);
                out[4] = Value::from(diff_type.as_str());
            }
        }
    }

    fn has_sequence(&self) -> bool {
        matches!(self, RowHeader::Workspace { .. })
    }
}

/// `to_<col>...` or `from_<col>...` columns for one side of a diff row
pub fn side_columns(prefix: &str, schema: &TableSchema, source: &str) -> Vec<Column> {
    schema
        .columns
        .iter()
        .map(|c| Column::new(format!("{}_{}", prefix, c.name), c.data_type, source))
        .collect()
}

/// One `from → to` diff whose rows are written in the layout
/// `[header..., to-target columns..., from-target columns...]`.
pub struct DiffPhase {
    from: SnapshotSource,
    to: SnapshotSource,
    from_conv: RowConverter,
    to_conv: RowConverter,
    header: RowHeader,
    keyless: bool,
}

impl DiffPhase {
    /// Build the converters for both sides. Fails before any thread exists if
    /// a side's schema can't be mapped onto its target. Stored sides are only
    /// read once the phase runs.
    pub fn new(
        from: impl Into<SnapshotSource>,
        to: impl Into<SnapshotSource>,
        from_target: &TableSchema,
        to_target: &TableSchema,
        header: RowHeader,
    ) -> SqlResult<Self> {
        let (from, to) = (from.into(), to.into());
        let from_conv = RowConverter::new(from.schema(), from_target)?;
        let to_conv = RowConverter::new(to.schema(), to_target)?;
        // an absent side takes the shape of the other one
        let keyless = (from.is_absent() || from.is_keyless()) && (to.is_absent() || to.is_keyless());

        Ok(Self {
            from,
            to,
            from_conv,
            to_conv,
            header,
            keyless,
        })
    }

    pub fn width(&self) -> usize {
        self.header.width() + self.to_conv.width() + self.from_conv.width()
    }

    /// diff type and number of rows a record expands to
    fn expansion(&self, record: &ChangeRecord) -> SqlResult<(DiffType, u64)> {
        if !self.keyless {
            let diff_type = match record {
                ChangeRecord::Added { .. } => DiffType::Added,
                ChangeRecord::Removed { .. } => DiffType::Removed,
                ChangeRecord::Modified { .. } => DiffType::Modified,
            };
            return Ok((diff_type, 1));
        }

        Ok(match record {
            ChangeRecord::Added { to, .. } => (DiffType::Added, cardinality(to)?),
            ChangeRecord::Removed { from, .. } => (DiffType::Removed, cardinality(from)?),
            ChangeRecord::Modified { from, to, .. } => {
                let (from_n, to_n) = (cardinality(from)?, cardinality(to)?);
                if to_n > from_n {
                    (DiffType::Added, to_n - from_n)
                } else {
                    (DiffType::Removed, from_n - to_n)
                }
            }
        })
    }

    /// a row for `record` with every column but the sequence id filled in
    fn template(&self, record: &ChangeRecord, diff_type: DiffType) -> SqlResult<SqlRow> {
        let header_width = self.header.width();
        let to_end = header_width + self.to_conv.width();
        let mut row = vec![Value::Null; self.width()];
        self.header.write(0, diff_type, &mut row[..header_width]);

        if diff_type != DiffType::Removed {
            if let Some(to) = record.to_value() {
                self.to_conv.put_converted(record.key(), to, &mut row[header_width..to_end])?;
            }
        }
        if diff_type != DiffType::Added {
            if let Some(from) = record.from_value() {
                self.from_conv.put_converted(record.key(), from, &mut row[to_end..])?;
            }
        }
        Ok(row)
    }

    fn run(&self, ctx: &Context, seq: &mut u64, rows: &Sender<SqlRow>) -> SqlResult<()> {
        let from = self.from.open::<SqlError>(ctx)?;
        let to = self.to.open::<SqlError>(ctx)?;
        diff_snapshots(ctx, &from, &to, |record| {
            let (diff_type, count) = self.expansion(&record)?;
            if count == 0 {
                return Ok(());
            }
            let template = self.template(&record, diff_type)?;

            for _ in 0..count {
                let mut row = template.clone();
                if self.header.has_sequence() {
                    row[0] = Value::from(*seq);
                }
                *seq += 1;

                select! {
                    send(rows, row) -> sent => sent.map_err(|_| Cancelled)?,
                    recv(ctx.done()) -> _ => return Err(Cancelled.into()),
                }
            }
            Ok(())
        })
    }
}

fn produce(ctx: Context, phases: Vec<DiffPhase>, rows: Sender<SqlRow>, errors: Sender<SqlError>) {
    let mut seq = 0u64;
    for (index, phase) in phases.iter().enumerate() {
        trace!(phase = index, "diff phase started");
        match phase.run(&ctx, &mut seq, &rows) {
            Ok(()) => trace!(phase = index, rows = seq, "diff phase finished"),
            Err(SqlError::Cancelled) => {
                debug!(phase = index, "diff producer cancelled");
                return;
            }
            Err(e) => {
                warn!(phase = index, error = %e, "diff producer failed");
                select! {
                    send(errors, e) -> _ => {},
                    recv(ctx.done()) -> _ => {},
                }
                return;
            }
        }
    }
    // dropping `rows` here closes the channel
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterState {
    Created,
    Running,
    Drained,
    Failed,
    Closed,
}

impl IterState {
    fn is_terminal(self) -> bool {
        matches!(self, IterState::Drained | IterState::Failed | IterState::Closed)
    }
}

enum Event {
    Row(SqlRow),
    Drained,
    Failed(SqlError),
    ErrorsClosed,
    Cancelled,
}

/// Row iterator over the output of a background diff producer.
pub struct DiffRowIter {
    state: IterState,
    ctx: Context,
    cancel: CancelHandle,
    rows: Receiver<SqlRow>,
    errors: Receiver<SqlError>,
    errors_closed: bool,
    pending_error: Option<SqlError>,
    producer: Option<JoinHandle<()>>,
}

impl DiffRowIter {
    /// Start a producer running `phases` in order with one shared sequence counter.
    pub fn spawn(parent: &Context, phases: Vec<DiffPhase>, config: MaterializerConfig) -> SqlResult<Self> {
        let (ctx, cancel) = parent.with_cancel();
        let (row_tx, row_rx) = bounded(config.row_buffer);
        let (err_tx, err_rx) = bounded(0);

        let producer_ctx = ctx.clone();
        let phase_count = phases.len();
        let producer = thread::Builder::new()
            .name("diff-producer".to_string())
            .spawn(move || produce(producer_ctx, phases, row_tx, err_tx))
            .map_err(|e| SqlError::Internal(format!("failed to spawn diff producer: {}", e)))?;
        debug!(phases = phase_count, buffer = config.row_buffer, "diff producer spawned");

        Ok(Self {
            state: IterState::Created,
            ctx,
            cancel,
            rows: row_rx,
            errors: err_rx,
            errors_closed: false,
            pending_error: None,
            producer: Some(producer),
        })
    }

    pub fn state(&self) -> IterState {
        self.state
    }

    fn fail(&mut self, err: SqlError) -> SqlResult<Option<SqlRow>> {
        self.state = IterState::Failed;
        self.cancel.cancel();
        Err(err)
    }

    fn finish(&mut self) -> SqlResult<Option<SqlRow>> {
        if let Some(handle) = self.producer.take() {
            if handle.join().is_err() {
                return self.fail(SqlError::ProducerPanicked);
            }
        }
        self.state = IterState::Drained;
        Ok(None)
    }

    fn wait(&self, caller: &Context) -> Event {
        if self.errors_closed {
            return select! {
                recv(caller.done()) -> _ => Event::Cancelled,
                recv(self.ctx.done()) -> _ => Event::Cancelled,
                recv(self.rows) -> msg => msg.map_or(Event::Drained, Event::Row),
            };
        }
        select! {
            recv(caller.done()) -> _ => Event::Cancelled,
            recv(self.ctx.done()) -> _ => Event::Cancelled,
            recv(self.errors) -> msg => msg.map_or(Event::ErrorsClosed, Event::Failed),
            recv(self.rows) -> msg => msg.map_or(Event::Drained, Event::Row),
        }
    }
}

impl RowIter for DiffRowIter {
    fn next_row(&mut self, ctx: &Context) -> SqlResult<Option<SqlRow>> {
        if self.state.is_terminal() {
            return Ok(None);
        }
        self.state = IterState::Running;

        if ctx.is_cancelled() || self.ctx.is_cancelled() {
            return self.fail(SqlError::Cancelled);
        }

        match self.rows.try_recv() {
            Ok(row) => return Ok(Some(row)),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
        }
        if let Some(err) = self.pending_error.take() {
            return self.fail(err);
        }

        loop {
            match self.wait(ctx) {
                Event::Row(row) => return Ok(Some(row)),
                Event::Drained => return self.finish(),
                Event::Cancelled => return self.fail(SqlError::Cancelled),
                Event::ErrorsClosed => self.errors_closed = true,
                Event::Failed(err) => {
                    // the producer may have buffered rows before failing
                    if let Ok(row) = self.rows.try_recv() {
                        self.pending_error = Some(err);
                        return Ok(Some(row));
                    }
                    return self.fail(err);
                }
            }
        }
    }

    fn close(&mut self, _ctx: &Context) -> SqlResult<()> {
        if self.state != IterState::Closed {
            self.cancel.cancel();
            self.state = IterState::Closed;
            trace!("diff iterator closed");
        }
        Ok(())
    }
}

impl Drop for DiffRowIter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SchemaBuilder;
    use crate::dtables::ConvertError;
    use crate::catalog::Catalog;
    use crate::snapshot::{Snapshot, Tuple, TupleError};
    use crate::storage::{CommitId, GitRepository, Row, RowKey, StorageError, TableName};
    use crate::sql::collect_rows;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn keyed_schema() -> Arc<TableSchema> {
        Arc::new(
            SchemaBuilder::new("t")
                .add_column("pk", DataType::Integer)
                .add_column("v", DataType::Text)
                .primary_key("pk")
                .build()
                .unwrap(),
        )
    }

    fn keyless_schema() -> Arc<TableSchema> {
        Arc::new(SchemaBuilder::new("k").add_column("v", DataType::Text).build().unwrap())
    }

    fn keyed(rows: &[(i64, &str)]) -> Snapshot {
        Snapshot::from_entries(
            keyed_schema(),
            rows.iter().map(|(k, v)| {
                (
                    Tuple::builder().push(&json!(k)).build(),
                    Tuple::builder().push(&json!(v)).build(),
                )
            }),
        )
    }

    fn keyless(rows: &[(&str, u64)]) -> Snapshot {
        Snapshot::from_entries(
            keyless_schema(),
            rows.iter().map(|(v, n)| {
                (
                    Tuple::builder().push(&json!(format!("h-{}", v))).build(),
                    Tuple::builder().push_uint(*n).push(&json!(v)).build(),
                )
            }),
        )
    }

    fn workspace_phase(from: Snapshot, to: Snapshot, staged: bool) -> DiffPhase {
        let schema = from.schema().clone();
        DiffPhase::new(from, to, &schema, &schema, RowHeader::Workspace { staged }).unwrap()
    }

    fn run(phases: Vec<DiffPhase>) -> SqlResult<Vec<SqlRow>> {
        let ctx = Context::background();
        let mut iter = DiffRowIter::spawn(&ctx, phases, MaterializerConfig::default())?;
        collect_rows(&ctx, &mut iter)
    }

    // row layout: id, staged, diff_type, to_pk, to_v, from_pk, from_v
    fn diff_types(rows: &[SqlRow]) -> Vec<&str> {
        rows.iter().map(|r| r[2].as_str().unwrap()).collect()
    }

    #[test]
    fn test_rows_follow_key_order() {
        let from = keyed(&[(3, "c"), (10, "x")]);
        let to = keyed(&[(-4, "n"), (3, "C"), (7, "g")]);
        let rows = run(vec![workspace_phase(from, to, false)]).unwrap();

        let keys: Vec<Value> = rows
            .iter()
            .map(|r| if r[3].is_null() { r[5].clone() } else { r[3].clone() })
            .collect();
        assert_eq!(keys, vec![json!(-4), json!(3), json!(7), json!(10)]);
    }

    #[test]
    fn test_keyed_row_per_record_with_diff_types() {
        let from = keyed(&[(1, "a"), (2, "b")]);
        let to = keyed(&[(2, "B"), (3, "c")]);
        let rows = run(vec![workspace_phase(from, to, true)]).unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(diff_types(&rows), vec!["removed", "modified", "added"]);
        assert_eq!(rows[1], vec![json!(1), json!(true), json!("modified"), json!(2), json!("B"), json!(2), json!("b")]);
    }

    #[test]
    fn test_sides_nulled_by_diff_type() {
        let rows = run(vec![workspace_phase(keyed(&[(1, "a")]), keyed(&[(2, "b")]), false)]).unwrap();

        let removed = &rows[0];
        assert_eq!(removed[2], json!("removed"));
        assert!(removed[3].is_null() && removed[4].is_null());
        assert_eq!(&removed[5..], &[json!(1), json!("a")]);

        let added = &rows[1];
        assert_eq!(added[2], json!("added"));
        assert_eq!(&added[3..5], &[json!(2), json!("b")]);
        assert!(added[5].is_null() && added[6].is_null());
    }

    #[test]
    fn test_keyless_cardinality_expansion() {
        let rows = run(vec![workspace_phase(keyless(&[("x", 3)]), keyless(&[("x", 5)]), false)]).unwrap();
        assert_eq!(diff_types(&rows), vec!["added", "added"]);
        assert!(rows.iter().all(|r| r[3] == json!("x") && r[4].is_null()));

        let rows = run(vec![workspace_phase(keyless(&[("x", 5)]), keyless(&[("x", 2)]), false)]).unwrap();
        assert_eq!(diff_types(&rows), vec!["removed"; 3]);
        assert!(rows.iter().all(|r| r[3].is_null() && r[4] == json!("x")));

        let rows = run(vec![workspace_phase(keyless(&[]), keyless(&[("y", 2), ("z", 1)]), false)]).unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn test_two_phases_share_sequence() {
        let head = keyed(&[]);
        let staged = keyed(&[(1, "a"), (2, "b")]);
        let working = keyed(&[(1, "a"), (2, "b"), (3, "c"), (4, "d")]);

        let rows = run(vec![
            workspace_phase(head, staged.clone(), true),
            workspace_phase(staged, working, false),
        ])
        .unwrap();

        let ids: Vec<Value> = rows.iter().map(|r| r[0].clone()).collect();
        assert_eq!(ids, vec![json!(0), json!(1), json!(2), json!(3)]);
        let staged_flags: Vec<Value> = rows.iter().map(|r| r[1].clone()).collect();
        assert_eq!(staged_flags, vec![json!(true), json!(true), json!(false), json!(false)]);
        let to_keys: Vec<Value> = rows.iter().map(|r| r[3].clone()).collect();
        assert_eq!(to_keys, vec![json!(1), json!(2), json!(3), json!(4)]);
    }

    #[test]
    fn test_error_after_rows() {
        let schema = keyed_schema();
        let good = |k: i64| (Tuple::builder().push(&json!(k)).build(), Tuple::builder().push(&json!("ok")).build());
        let to = Snapshot::from_entries(
            schema.clone(),
            vec![good(1), good(2), good(3), (Tuple::builder().push(&json!(4)).build(), Tuple::from_bytes(vec![0xee]))],
        );
        let phase = DiffPhase::new(Snapshot::empty(schema.clone()), to, &schema, &schema, RowHeader::Workspace { staged: false }).unwrap();

        let ctx = Context::background();
        let mut iter = DiffRowIter::spawn(&ctx, vec![phase], MaterializerConfig { row_buffer: 1 }).unwrap();
        for _ in 0..3 {
            assert!(iter.next_row(&ctx).unwrap().is_some());
        }
        let err = iter.next_row(&ctx).unwrap_err();
        assert!(matches!(
            err,
            SqlError::Convert(ConvertError::Decode(TupleError::UnknownTag { tag: 0xee, .. }))
        ));
        assert_eq!(iter.state(), IterState::Failed);
        assert_eq!(iter.next_row(&ctx).unwrap(), None);
        iter.close(&ctx).unwrap();
    }

    #[test]
    fn test_close_twice_with_blocked_producer() {
        let many: Vec<(i64, &str)> = (0..500).map(|i| (i, "v")).collect();
        let phase = workspace_phase(keyed(&[]), keyed(&many), false);

        let ctx = Context::background();
        let mut iter = DiffRowIter::spawn(&ctx, vec![phase], MaterializerConfig { row_buffer: 2 }).unwrap();
        assert!(iter.next_row(&ctx).unwrap().is_some());
        std::thread::sleep(Duration::from_millis(10));

        iter.close(&ctx).unwrap();
        iter.close(&ctx).unwrap();
        assert_eq!(iter.state(), IterState::Closed);
        assert_eq!(iter.next_row(&ctx).unwrap(), None);
    }

    #[test]
    fn test_caller_cancellation() {
        let many: Vec<(i64, &str)> = (0..100).map(|i| (i, "v")).collect();
        let phase = workspace_phase(keyed(&[]), keyed(&many), false);

        let (ctx, cancel) = Context::background().with_cancel();
        let mut iter = DiffRowIter::spawn(&ctx, vec![phase], MaterializerConfig { row_buffer: 1 }).unwrap();
        assert!(iter.next_row(&ctx).unwrap().is_some());
        cancel.cancel();

        assert!(iter.next_row(&ctx).unwrap_err().is_cancelled());
        assert_eq!(iter.next_row(&ctx).unwrap(), None);
        iter.close(&ctx).unwrap();
    }

    #[test]
    fn test_schema_mapping_fails_before_spawn() {
        let target = SchemaBuilder::new("t").add_column("v", DataType::Text).build().unwrap();
        let result = DiffPhase::new(keyed(&[]), keyed(&[]), &target, &target, RowHeader::Workspace { staged: false });
        assert!(matches!(result, Err(SqlError::Convert(ConvertError::MissingKeyColumn(_)))));
    }

    #[test]
    fn test_commit_header() {
        let date = DateTime::parse_from_rfc3339("2024-01-02T03:04:05Z").unwrap().with_timezone(&Utc);
        let header = RowHeader::Commits {
            to_commit: "WORKING".to_string(),
            to_date: None,
            from_commit: "abc".to_string(),
            from_date: Some(date),
        };
        let schema = keyed_schema();
        let phase = DiffPhase::new(keyed(&[]), keyed(&[(1, "a")]), &schema, &schema, header).unwrap();
        let rows = run(vec![phase]).unwrap();

        assert_eq!(
            rows,
            vec![vec![
                json!("WORKING"),
                Value::Null,
                json!("abc"),
                json!("2024-01-02T03:04:05+00:00"),
                json!("added"),
                json!(1),
                json!("a"),
                Value::Null,
                Value::Null,
            ]]
        );
    }

    #[test]
    fn test_stored_sides_are_read_by_the_producer() {
        let dir = tempfile::TempDir::new().unwrap();
        let repo = GitRepository::init(dir.path()).unwrap();
        let catalog = Catalog::new(repo.clone());
        let schema = keyed_schema();
        let table = TableName::new("t").unwrap();
        let at = catalog.create_table(&schema, repo.head().unwrap()).unwrap();
        let row = Row::from_value(RowKey::new("r1").unwrap(), json!({"pk": 1, "v": "a"})).unwrap();
        let at = repo.insert_row(&table, row, at).unwrap();
        let header = RowHeader::Workspace { staged: false };

        let stored = SnapshotSource::stored(repo.clone(), table.clone(), at, schema.clone());
        let phase = DiffPhase::new(Snapshot::empty(schema.clone()), stored, &schema, &schema, header.clone()).unwrap();
        assert_eq!(
            run(vec![phase]).unwrap(),
            vec![vec![json!(0), json!(false), json!("added"), json!(1), json!("a"), Value::Null, Value::Null]]
        );

        // an unreadable root only fails once the producer gets to it
        let missing = CommitId::from_hex("0123456789abcdef0123456789abcdef01234567").unwrap();
        let broken = SnapshotSource::stored(repo, table, missing, schema.clone());
        let phase = DiffPhase::new(Snapshot::empty(schema.clone()), broken, &schema, &schema, header).unwrap();
        let ctx = Context::background();
        let mut iter = DiffRowIter::spawn(&ctx, vec![phase], MaterializerConfig::default()).unwrap();
        assert!(matches!(
            iter.next_row(&ctx),
            Err(SqlError::Storage(StorageError::CommitNotFound(_)))
        ));
        assert_eq!(iter.state(), IterState::Failed);
    }
}

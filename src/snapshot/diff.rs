//! Structural diff of two snapshots.

use std::cmp::Ordering;

use tracing::trace;

use super::{Snapshot, Tuple};
use crate::context::{Cancelled, Context};

/// One difference between two snapshots, with the raw encoded tuples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeRecord {
    Added { key: Tuple, to: Tuple },
    Removed { key: Tuple, from: Tuple },
    Modified { key: Tuple, from: Tuple, to: Tuple },
}

impl ChangeRecord {
    pub fn key(&self) -> &Tuple {
        match self {
            ChangeRecord::Added { key, .. }
            | ChangeRecord::Removed { key, .. }
            | ChangeRecord::Modified { key, .. } => key,
        }
    }

    pub fn from_value(&self) -> Option<&Tuple> {
        match self {
            ChangeRecord::Added { .. } => None,
            ChangeRecord::Removed { from, .. } | ChangeRecord::Modified { from, .. } => Some(from),
        }
    }

    pub fn to_value(&self) -> Option<&Tuple> {
        match self {
            ChangeRecord::Removed { .. } => None,
            ChangeRecord::Added { to, .. } | ChangeRecord::Modified { to, .. } => Some(to),
        }
    }
}

/// Visit every difference between `from` and `to` in ascending key order.
///
/// Returns `Ok(())` once both snapshots are exhausted. The context is checked
/// before each record; a cancelled context ends the walk with `Cancelled`.
/// An error returned by `visit` stops the walk and is passed through.
pub fn diff_snapshots<E, F>(ctx: &Context, from: &Snapshot, to: &Snapshot, mut visit: F) -> Result<(), E>
where
    E: From<Cancelled>,
    F: FnMut(ChangeRecord) -> Result<(), E>,
{
    let mut left = from.iter().peekable();
    let mut right = to.iter().peekable();
    let mut visited = 0usize;

    loop {
        let order = match (left.peek(), right.peek()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some((lk, _)), Some((rk, _))) => lk.cmp(rk),
        };

        let record = match order {
            Ordering::Less => match left.next() {
                Some((k, v)) => ChangeRecord::Removed { key: k.clone(), from: v.clone() },
                None => break,
            },
            Ordering::Greater => match right.next() {
                Some((k, v)) => ChangeRecord::Added { key: k.clone(), to: v.clone() },
                None => break,
            },
            Ordering::Equal => match (left.next(), right.next()) {
                (Some((_, lv)), Some((_, rv))) if lv == rv => continue,
                (Some((k, lv)), Some((_, rv))) => ChangeRecord::Modified {
                    key: k.clone(),
                    from: lv.clone(),
                    to: rv.clone(),
                },
                _ => break,
            },
        };

        ctx.check()?;
        visit(record)?;
        visited += 1;
    }

    trace!(records = visited, "snapshot diff finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DataType, SchemaBuilder, TableSchema};
    use serde_json::json;
    use std::sync::Arc;

    fn schema() -> Arc<TableSchema> {
        Arc::new(
            SchemaBuilder::new("t")
                .add_column("id", DataType::Integer)
                .add_column("v", DataType::Text)
                .primary_key("id")
                .build()
                .unwrap(),
        )
    }

    fn snapshot(rows: &[(i64, &str)]) -> Snapshot {
        Snapshot::from_entries(
            schema(),
            rows.iter().map(|(k, v)| {
                (
                    Tuple::builder().push(&json!(k)).build(),
                    Tuple::builder().push(&json!(v)).build(),
                )
            }),
        )
    }

    fn collect(from: &Snapshot, to: &Snapshot) -> Vec<(char, Tuple)> {
        let mut out = Vec::new();
        diff_snapshots::<Cancelled, _>(&Context::background(), from, to, |rec| {
            let tag = match rec {
                ChangeRecord::Added { .. } => 'a',
                ChangeRecord::Removed { .. } => 'r',
                ChangeRecord::Modified { .. } => 'm',
            };
            out.push((tag, rec.key().clone()));
            Ok(())
        })
        .unwrap();
        out
    }

    #[test]
    fn test_merge_walk_order() {
        let from = snapshot(&[(1, "a"), (2, "b"), (4, "d")]);
        let to = snapshot(&[(2, "B"), (3, "c"), (4, "d"), (5, "e")]);

        let tags: Vec<char> = collect(&from, &to).into_iter().map(|(t, _)| t).collect();
        assert_eq!(tags, vec!['r', 'm', 'a', 'a']);

        let keys: Vec<Tuple> = collect(&from, &to).into_iter().map(|(_, k)| k).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_identical_snapshots_produce_nothing() {
        let s = snapshot(&[(1, "a")]);
        assert!(collect(&s, &s).is_empty());
    }

    #[test]
    fn test_cancelled_context_stops_walk() {
        let (ctx, cancel) = Context::background().with_cancel();
        cancel.cancel();
        let result = diff_snapshots::<Cancelled, _>(&ctx, &snapshot(&[]), &snapshot(&[(1, "a")]), |_| Ok(()));
        assert_eq!(result, Err(Cancelled));
    }

    #[test]
    fn test_visitor_error_passes_through() {
        #[derive(Debug, PartialEq)]
        enum Stop {
            Cancelled,
            Halt,
        }
        impl From<Cancelled> for Stop {
            fn from(_: Cancelled) -> Self {
                Stop::Cancelled
            }
        }

        let mut seen = 0;
        let result = diff_snapshots(&Context::background(), &snapshot(&[]), &snapshot(&[(1, "a"), (2, "b")]), |_| {
            seen += 1;
            Err(Stop::Halt)
        });
        assert_eq!(result, Err(Stop::Halt));
        assert_eq!(seen, 1);
    }
}

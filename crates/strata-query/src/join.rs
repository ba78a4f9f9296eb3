//! Multi-row hash index for equi-joins.
//!
//! Built once from the build relation, then probed read-only. Rows with a null
//! key component never enter the index, so they can never match.

use crate::key::{JoinKey, Key};
use crate::predicate::BoundPredicate;
use crate::scope::{BoundColumn, RowCursor};
use ahash::AHashMap;
use smallvec::SmallVec;
use strata_columnar::{RowRef, Table};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JoinBuildStats {
    /// Rows scanned on the build side.
    pub scanned: usize,
    /// Rows inserted (passed the build filter and had a non-null key).
    pub inserted: usize,
    pub distinct_keys: usize,
}

#[derive(Clone, Debug, Default)]
pub struct HashJoinIndex {
    map: AHashMap<JoinKey, SmallVec<[RowRef; 1]>>,
    rows: usize,
    scanned: usize,
}

impl HashJoinIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: JoinKey, row: RowRef) {
        self.map.entry(key).or_default().push(row);
        self.rows += 1;
    }

    /// Builds from arbitrary rows; `key_of` returns `None` for rows to skip.
    pub fn build<I, F>(rows: I, mut key_of: F) -> Self
    where
        I: IntoIterator<Item = RowRef>,
        F: FnMut(RowRef) -> Option<JoinKey>,
    {
        let mut index = Self::new();
        for row in rows {
            index.scanned += 1;
            if let Some(key) = key_of(row) {
                index.insert(key, row);
            }
        }
        index
    }

    /// Builds from every row of `table` that satisfies `filter`.
    ///
    /// `key_columns` and `filter` must be bound against a scope whose only
    /// relation is `table`.
    pub fn from_table(table: &Table, key_columns: &[BoundColumn], filter: Option<&BoundPredicate>) -> Self {
        let mut index = Self::new();
        for (c, chunk) in table.chunks().iter().enumerate() {
            for offset in 0..chunk.len() {
                index.scanned += 1;
                let row = [RowCursor::new(chunk, offset)];
                if filter.is_some_and(|f| !f.evaluate(&row)) {
                    continue;
                }
                if let Some(key) = extract_key(key_columns, &row) {
                    index.insert(key, RowRef::new(c, offset));
                }
            }
        }
        index
    }

    /// Every build row with exactly this key, in insertion order; empty when absent.
    #[inline]
    pub fn probe(&self, key: &JoinKey) -> &[RowRef] {
        self.map.get(key).map(|rows| rows.as_slice()).unwrap_or_default()
    }

    #[inline]
    pub fn contains(&self, key: &JoinKey) -> bool {
        self.map.contains_key(key)
    }

    /// Number of indexed rows.
    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn distinct_keys(&self) -> usize {
        self.map.len()
    }

    pub fn build_stats(&self) -> JoinBuildStats {
        JoinBuildStats {
            scanned: self.scanned,
            inserted: self.rows,
            distinct_keys: self.map.len(),
        }
    }
}

/// Reads a composite key; `None` if any component is null.
#[inline]
pub fn extract_key(columns: &[BoundColumn], row: &[RowCursor<'_>]) -> Option<Key> {
    columns.iter().map(|c| c.key_value(row)).collect()
}

//! Final ordering of finalized groups.
//!
//! Projection is pure: it never aggregates, only orders rows. After the
//! caller's sort keys, the remaining group-key columns break ties in ascending
//! order so the output is deterministic whenever group keys are unique.

use crate::error::{QueryError, QueryResult};
use crate::key::KeyValue;
use ordered_float::OrderedFloat;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use strata_columnar::DecimalValue;

/// One output cell, carried at full precision.
#[derive(Clone, Debug, PartialEq)]
pub enum ResultValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(DecimalValue),
    /// Days since 1970-01-01.
    Date(i32),
    Text(Arc<str>),
}

pub type ResultRow = Vec<ResultValue>;

impl ResultValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ResultValue::Int(v) => Some(*v as f64),
            ResultValue::Float(v) => Some(*v),
            ResultValue::Decimal(v) => Some(v.to_f64()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ResultValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ResultValue::Text(v) => Some(&**v),
            _ => None,
        }
    }
}

impl From<&KeyValue> for ResultValue {
    fn from(v: &KeyValue) -> Self {
        match v {
            KeyValue::Bool(b) => ResultValue::Bool(*b),
            KeyValue::Int(i) => ResultValue::Int(*i),
            KeyValue::Date(d) => ResultValue::Date(*d),
            KeyValue::Decimal { raw, scale } => ResultValue::Decimal(DecimalValue::new(*raw, *scale)),
            KeyValue::Float(f) => ResultValue::Float(f.0),
            KeyValue::Text(s) => ResultValue::Text(s.clone()),
        }
    }
}

impl From<&str> for ResultValue {
    fn from(v: &str) -> Self {
        ResultValue::Text(Arc::from(v))
    }
}

impl fmt::Display for ResultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultValue::Null => f.write_str("NULL"),
            ResultValue::Bool(v) => write!(f, "{v}"),
            ResultValue::Int(v) => write!(f, "{v}"),
            ResultValue::Float(v) => write!(f, "{v}"),
            ResultValue::Decimal(v) => write!(f, "{v}"),
            ResultValue::Date(days) => match strata_columnar::date::date_from_days(*days) {
                Some(d) => write!(f, "{d}"),
                None => write!(f, "date({days})"),
            },
            ResultValue::Text(v) => f.write_str(v),
        }
    }
}

fn rank(v: &ResultValue) -> u8 {
    match v {
        ResultValue::Null => 0,
        ResultValue::Bool(_) => 1,
        ResultValue::Int(_) | ResultValue::Float(_) | ResultValue::Decimal(_) => 2,
        ResultValue::Date(_) => 3,
        ResultValue::Text(_) => 4,
    }
}

/// Total order over result cells: nulls first, then booleans, numbers, dates
/// and text. Numbers of different representations compare by value.
pub fn cmp_value(a: &ResultValue, b: &ResultValue) -> Ordering {
    match (a, b) {
        (ResultValue::Bool(a), ResultValue::Bool(b)) => a.cmp(b),
        (ResultValue::Int(a), ResultValue::Int(b)) => a.cmp(b),
        (ResultValue::Decimal(a), ResultValue::Decimal(b)) => a.compare(b),
        (ResultValue::Date(a), ResultValue::Date(b)) => a.cmp(b),
        (ResultValue::Text(a), ResultValue::Text(b)) => a.as_ref().cmp(b.as_ref()),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => OrderedFloat(x).cmp(&OrderedFloat(y)),
            _ => rank(a).cmp(&rank(b)),
        },
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortKey {
    pub column: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(column: &str) -> Self {
        Self {
            column: column.to_owned(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(column: &str) -> Self {
        Self {
            column: column.to_owned(),
            direction: SortDirection::Desc,
        }
    }
}

/// Aggregation output before ordering: group key columns first, then metrics.
#[derive(Clone, Debug, PartialEq)]
pub struct FinalizedGroups {
    pub columns: Vec<String>,
    pub key_len: usize,
    pub rows: Vec<ResultRow>,
}

impl FinalizedGroups {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// Orders rows by `keys`, then by any group-key column not already used, ascending.
pub fn project(groups: FinalizedGroups, keys: &[SortKey]) -> QueryResult<Vec<ResultRow>> {
    let mut order: Vec<(usize, SortDirection)> = keys
        .iter()
        .map(|k| {
            groups
                .column_index(&k.column)
                .map(|idx| (idx, k.direction))
                .ok_or_else(|| QueryError::UnknownField(k.column.clone()))
        })
        .collect::<QueryResult<_>>()?;
    for idx in 0..groups.key_len {
        if !order.iter().any(|(i, _)| *i == idx) {
            order.push((idx, SortDirection::Asc));
        }
    }

    Ok(project_with(groups, |a, b| {
        for &(idx, direction) in &order {
            let ord = cmp_value(&a[idx], &b[idx]);
            let ord = match direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }))
}

/// Orders rows with a caller-supplied comparator.
pub fn project_with<F>(groups: FinalizedGroups, mut cmp: F) -> Vec<ResultRow>
where
    F: FnMut(&ResultRow, &ResultRow) -> Ordering,
{
    let mut rows = groups.rows;
    rows.sort_by(|a, b| cmp(a, b));
    rows
}

//! Name resolution and typed row access for the relations visible to an
//! evaluation.

use crate::error::{QueryError, QueryResult};
use crate::key::KeyValue;
use ordered_float::OrderedFloat;
use std::cmp::Ordering;
use std::sync::Arc;
use strata_columnar::{decimal, Chunk, ColumnChunk, ColumnType, DecimalValue, RowRef, SchemaError, Table};

/// How decimal columns without a declared scale are read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecimalPolicy {
    pub default_scale: i8,
    /// Treat a missing scale as a schema error instead of assuming `default_scale`.
    pub require_scale: bool,
}

impl Default for DecimalPolicy {
    fn default() -> Self {
        Self {
            default_scale: 2,
            require_scale: false,
        }
    }
}

/// The relations a predicate or key may reference, in row-slot order.
#[derive(Clone, Debug)]
pub struct Scope {
    relations: Vec<(String, Arc<Table>)>,
    policy: DecimalPolicy,
}

impl Scope {
    pub fn new(policy: DecimalPolicy) -> Self {
        Self {
            relations: Vec::new(),
            policy,
        }
    }

    /// Adds a relation and returns its slot.
    pub fn push(&mut self, alias: impl Into<String>, table: Arc<Table>) -> QueryResult<usize> {
        let alias = alias.into();
        if self.relations.iter().any(|(a, _)| *a == alias) {
            return Err(QueryError::DuplicateRelation(alias));
        }
        self.relations.push((alias, table));
        Ok(self.relations.len() - 1)
    }

    pub fn single(alias: impl Into<String>, table: Arc<Table>, policy: DecimalPolicy) -> QueryResult<Self> {
        let mut scope = Self::new(policy);
        scope.push(alias, table)?;
        Ok(scope)
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    pub fn table(&self, slot: usize) -> &Arc<Table> {
        &self.relations[slot].1
    }

    pub fn policy(&self) -> DecimalPolicy {
        self.policy
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.relations.iter().any(|(a, _)| a == alias)
    }

    pub fn resolve(&self, relation: &str, column: &str) -> QueryResult<BoundColumn> {
        let Some(slot) = self.relations.iter().position(|(a, _)| a == relation) else {
            return Err(QueryError::UnknownRelation(relation.to_owned()));
        };
        let table = &self.relations[slot].1;
        let Some(col) = table.column_index(column) else {
            return Err(QueryError::UnknownColumn {
                relation: relation.to_owned(),
                column: column.to_owned(),
            });
        };

        let column_type = table.column_type(col);
        let scale = match column_type {
            ColumnType::Decimal128 {
                scale: Some(scale), ..
            } => scale,
            ColumnType::Decimal128 { scale: None, .. } if self.policy.require_scale => {
                return Err(SchemaError::MissingDecimalScale {
                    table: table.name().to_owned(),
                    column: column.to_owned(),
                }
                .into())
            }
            ColumnType::Decimal128 { scale: None, .. } => self.policy.default_scale,
            _ => 0,
        };

        Ok(BoundColumn {
            slot,
            column: col,
            column_type,
            scale,
            name: Arc::from(format!("{relation}.{column}")),
        })
    }
}

/// One relation's current row.
#[derive(Clone, Copy, Debug)]
pub struct RowCursor<'a> {
    pub chunk: &'a Chunk,
    pub offset: usize,
}

impl<'a> RowCursor<'a> {
    pub fn new(chunk: &'a Chunk, offset: usize) -> Self {
        Self { chunk, offset }
    }

    pub fn at(table: &'a Table, row: RowRef) -> Self {
        Self {
            chunk: table.chunk(row.chunk as usize),
            offset: row.offset as usize,
        }
    }
}

/// A typed, borrowed cell value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Cell<'a> {
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(i32),
    Decimal(DecimalValue),
    Str(&'a str),
}

impl Cell<'_> {
    pub fn to_f64(self) -> Option<f64> {
        match self {
            Cell::Int(v) => Some(v as f64),
            Cell::Float(v) => Some(v),
            Cell::Decimal(v) => Some(v.to_f64()),
            _ => None,
        }
    }
}

/// Compares two cells, promoting numerics. `None` when the types are not
/// comparable or a float is NaN.
pub fn compare_cells(a: &Cell<'_>, b: &Cell<'_>) -> Option<Ordering> {
    match (a, b) {
        (Cell::Int(x), Cell::Int(y)) => Some(x.cmp(y)),
        (Cell::Date(x), Cell::Date(y)) => Some(x.cmp(y)),
        (Cell::Bool(x), Cell::Bool(y)) => Some(x.cmp(y)),
        (Cell::Str(x), Cell::Str(y)) => Some(x.cmp(y)),
        (Cell::Decimal(x), Cell::Decimal(y)) => Some(x.compare(y)),
        (Cell::Decimal(x), Cell::Int(y)) => Some(x.compare(&DecimalValue::new(i128::from(*y), 0))),
        (Cell::Int(x), Cell::Decimal(y)) => Some(DecimalValue::new(i128::from(*x), 0).compare(y)),
        (Cell::Float(_), _) | (_, Cell::Float(_)) => a.to_f64()?.partial_cmp(&b.to_f64()?),
        _ => None,
    }
}

/// Whether values of the two column types can be compared with each other.
pub fn comparable(a: ColumnType, b: ColumnType) -> bool {
    (a.is_numeric() && b.is_numeric())
        || matches!(
            (a, b),
            (ColumnType::Date32, ColumnType::Date32)
                | (ColumnType::Boolean, ColumnType::Boolean)
                | (ColumnType::Utf8, ColumnType::Utf8)
        )
}

/// A resolved column reference: which row slot, which column, and how to read it.
#[derive(Clone, Debug)]
pub struct BoundColumn {
    pub slot: usize,
    pub column: usize,
    pub column_type: ColumnType,
    /// Effective scale for decimal columns; 0 otherwise.
    pub scale: i8,
    /// `alias.column`, for diagnostics.
    pub name: Arc<str>,
}

impl BoundColumn {
    #[inline]
    pub fn chunk_column<'a>(&self, row: &[RowCursor<'a>]) -> (&'a ColumnChunk, usize) {
        let cursor = row[self.slot];
        (cursor.chunk.column(self.column), cursor.offset)
    }

    #[inline]
    pub fn is_valid(&self, row: &[RowCursor<'_>]) -> bool {
        let (col, offset) = self.chunk_column(row);
        col.is_valid(offset)
    }

    #[inline]
    pub fn cell<'a>(&self, row: &[RowCursor<'a>]) -> Option<Cell<'a>> {
        let (col, offset) = self.chunk_column(row);
        match self.column_type {
            ColumnType::Int64 => col.i64_at(offset).map(Cell::Int),
            ColumnType::Float64 => col.f64_at(offset).map(Cell::Float),
            ColumnType::Boolean => col.bool_at(offset).map(Cell::Bool),
            ColumnType::Date32 => col.date_at(offset).map(Cell::Date),
            ColumnType::Decimal128 { .. } => col
                .decimal_raw_at(offset)
                .map(|raw| Cell::Decimal(DecimalValue::new(raw, self.scale))),
            ColumnType::Utf8 => col.str_at(offset).map(|s| Cell::Str(s.as_ref())),
        }
    }

    /// Numeric value as a float; decimals are decoded here.
    #[inline]
    pub fn f64_value(&self, row: &[RowCursor<'_>]) -> Option<f64> {
        let (col, offset) = self.chunk_column(row);
        match self.column_type {
            ColumnType::Int64 => col.i64_at(offset).map(|v| v as f64),
            ColumnType::Float64 => col.f64_at(offset),
            ColumnType::Decimal128 { .. } => col
                .decimal_raw_at(offset)
                .map(|raw| decimal::decode(raw, self.scale)),
            _ => None,
        }
    }

    #[inline]
    pub fn key_value(&self, row: &[RowCursor<'_>]) -> Option<KeyValue> {
        let (col, offset) = self.chunk_column(row);
        match self.column_type {
            ColumnType::Int64 => col.i64_at(offset).map(KeyValue::Int),
            ColumnType::Float64 => col.f64_at(offset).map(|v| KeyValue::Float(OrderedFloat(v))),
            ColumnType::Boolean => col.bool_at(offset).map(KeyValue::Bool),
            ColumnType::Date32 => col.date_at(offset).map(KeyValue::Date),
            ColumnType::Decimal128 { .. } => col.decimal_raw_at(offset).map(|raw| KeyValue::Decimal {
                raw,
                scale: self.scale,
            }),
            ColumnType::Utf8 => col.str_at(offset).map(|s| KeyValue::Text(s.clone())),
        }
    }

    /// Key identity of this column's values: two columns can share a join key
    /// only if their values hash and compare the same way.
    pub fn key_class(&self) -> (ColumnType, i8) {
        match self.column_type {
            ColumnType::Decimal128 { .. } => (
                ColumnType::Decimal128 {
                    precision: 0,
                    scale: None,
                },
                self.scale,
            ),
            other => (other, 0),
        }
    }
}

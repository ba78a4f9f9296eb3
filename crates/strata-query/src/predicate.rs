//! Conjunctive row predicates.
//!
//! A [`Predicate`] names columns by relation alias; binding it against a
//! [`Scope`] resolves names, checks literal types and precomputes dictionary
//! matches for string tests. Any null operand makes the predicate false.

use crate::error::{QueryError, QueryResult};
use crate::plan::ColumnRef;
use crate::scope::{comparable, compare_cells, BoundColumn, Cell, RowCursor, Scope};
use chrono::NaiveDate;
use std::cmp::Ordering;
use std::sync::Arc;
use strata_columnar::{date, BitVec, Chunk, ColumnType, DecimalError, DecimalValue};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CmpOp {
    #[inline]
    pub fn test(self, ord: Ordering) -> bool {
        match self {
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Ge => ord != Ordering::Less,
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::Ne => ord != Ordering::Equal,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    /// Days since 1970-01-01.
    Date(i32),
    Decimal(DecimalValue),
    Text(Arc<str>),
    Bool(bool),
}

impl Literal {
    pub fn date(d: NaiveDate) -> Self {
        Literal::Date(date::days_from_date(d))
    }

    /// Exact decimal literal, e.g. `Literal::decimal("0.05")`.
    pub fn decimal(text: &str) -> Result<Self, DecimalError> {
        DecimalValue::parse(text).map(Literal::Decimal)
    }

    pub fn text(s: &str) -> Self {
        Literal::Text(Arc::from(s))
    }

    fn as_cell(&self) -> Cell<'_> {
        match self {
            Literal::Int(v) => Cell::Int(*v),
            Literal::Float(v) => Cell::Float(*v),
            Literal::Date(v) => Cell::Date(*v),
            Literal::Decimal(v) => Cell::Decimal(*v),
            Literal::Text(v) => Cell::Str(v),
            Literal::Bool(v) => Cell::Bool(*v),
        }
    }

    /// Representative column type, for compatibility checks.
    fn column_type(&self) -> ColumnType {
        match self {
            Literal::Int(_) => ColumnType::Int64,
            Literal::Float(_) => ColumnType::Float64,
            Literal::Date(_) => ColumnType::Date32,
            Literal::Decimal(_) => ColumnType::Decimal128 {
                precision: 38,
                scale: None,
            },
            Literal::Text(_) => ColumnType::Utf8,
            Literal::Bool(_) => ColumnType::Boolean,
        }
    }
}

impl From<i64> for Literal {
    fn from(v: i64) -> Self {
        Literal::Int(v)
    }
}

impl From<f64> for Literal {
    fn from(v: f64) -> Self {
        Literal::Float(v)
    }
}

impl From<NaiveDate> for Literal {
    fn from(v: NaiveDate) -> Self {
        Literal::date(v)
    }
}

impl From<DecimalValue> for Literal {
    fn from(v: DecimalValue) -> Self {
        Literal::Decimal(v)
    }
}

impl From<&str> for Literal {
    fn from(v: &str) -> Self {
        Literal::text(v)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    /// All children must hold; evaluated left to right. An empty `And` is true.
    And(Vec<Predicate>),
    Compare {
        column: ColumnRef,
        op: CmpOp,
        value: Literal,
    },
    ColumnCompare {
        left: ColumnRef,
        op: CmpOp,
        right: ColumnRef,
    },
    InSet {
        column: ColumnRef,
        values: Vec<Arc<str>>,
        negated: bool,
    },
    /// Case-sensitive substring test.
    Contains { column: ColumnRef, needle: Arc<str> },
}

impl Predicate {
    pub fn always() -> Self {
        Predicate::And(Vec::new())
    }

    pub fn and(children: impl IntoIterator<Item = Predicate>) -> Self {
        Predicate::And(children.into_iter().collect())
    }

    pub fn compare(column: ColumnRef, op: CmpOp, value: impl Into<Literal>) -> Self {
        Predicate::Compare {
            column,
            op,
            value: value.into(),
        }
    }

    pub fn columns(left: ColumnRef, op: CmpOp, right: ColumnRef) -> Self {
        Predicate::ColumnCompare { left, op, right }
    }

    /// `lo <= column < hi`.
    pub fn range(column: ColumnRef, lo: impl Into<Literal>, hi: impl Into<Literal>) -> Self {
        Predicate::And(vec![
            Predicate::compare(column.clone(), CmpOp::Ge, lo),
            Predicate::compare(column, CmpOp::Lt, hi),
        ])
    }

    /// `lo <= column <= hi`.
    pub fn between(column: ColumnRef, lo: impl Into<Literal>, hi: impl Into<Literal>) -> Self {
        Predicate::And(vec![
            Predicate::compare(column.clone(), CmpOp::Ge, lo),
            Predicate::compare(column, CmpOp::Le, hi),
        ])
    }

    pub fn in_set<'s>(column: ColumnRef, values: impl IntoIterator<Item = &'s str>) -> Self {
        Predicate::InSet {
            column,
            values: values.into_iter().map(Arc::from).collect(),
            negated: false,
        }
    }

    pub fn not_in_set<'s>(column: ColumnRef, values: impl IntoIterator<Item = &'s str>) -> Self {
        Predicate::InSet {
            column,
            values: values.into_iter().map(Arc::from).collect(),
            negated: true,
        }
    }

    pub fn contains(column: ColumnRef, needle: &str) -> Self {
        Predicate::Contains {
            column,
            needle: Arc::from(needle),
        }
    }

    pub fn is_always(&self) -> bool {
        matches!(self, Predicate::And(children) if children.iter().all(Predicate::is_always))
    }

    /// Every column the predicate reads.
    pub fn referenced_columns<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        match self {
            Predicate::And(children) => {
                for child in children {
                    child.referenced_columns(out);
                }
            }
            Predicate::Compare { column, .. }
            | Predicate::InSet { column, .. }
            | Predicate::Contains { column, .. } => out.push(column),
            Predicate::ColumnCompare { left, right, .. } => {
                out.push(left);
                out.push(right);
            }
        }
    }

    pub fn bind(&self, scope: &Scope) -> QueryResult<BoundPredicate> {
        Ok(BoundPredicate {
            root: bind_node(self, scope)?,
        })
    }
}

fn mismatch(context: &str, column: &BoundColumn, expected: impl Into<String>) -> QueryError {
    QueryError::TypeMismatch {
        context: context.to_owned(),
        column: column.name.to_string(),
        expected: expected.into(),
        actual: column.column_type,
    }
}

fn bind_node(predicate: &Predicate, scope: &Scope) -> QueryResult<Node> {
    Ok(match predicate {
        Predicate::And(children) => Node::And(
            children
                .iter()
                .map(|c| bind_node(c, scope))
                .collect::<QueryResult<_>>()?,
        ),
        Predicate::Compare { column, op, value } => {
            let column = scope.resolve(&column.relation, &column.column)?;
            match (column.column_type, value) {
                (ColumnType::Utf8, Literal::Text(rhs)) => Node::strings(
                    column,
                    StrTest::Compare {
                        op: *op,
                        rhs: rhs.clone(),
                    },
                    scope,
                ),
                (column_type, value) if comparable(column_type, value.column_type()) => {
                    Node::Compare {
                        column,
                        op: *op,
                        value: value.clone(),
                    }
                }
                (_, value) => {
                    return Err(mismatch("comparison", &column, format!("{value:?}")))
                }
            }
        }
        Predicate::ColumnCompare { left, op, right } => {
            let left = scope.resolve(&left.relation, &left.column)?;
            let right = scope.resolve(&right.relation, &right.column)?;
            if !comparable(left.column_type, right.column_type) {
                return Err(mismatch(
                    "column comparison",
                    &left,
                    format!("{} ({})", right.name, right.column_type),
                ));
            }
            Node::Columns {
                left,
                op: *op,
                right,
            }
        }
        Predicate::InSet {
            column,
            values,
            negated,
        } => {
            let column = scope.resolve(&column.relation, &column.column)?;
            if column.column_type != ColumnType::Utf8 {
                return Err(mismatch("set membership", &column, "utf8"));
            }
            Node::strings(
                column,
                StrTest::InSet {
                    values: values.clone(),
                    negated: *negated,
                },
                scope,
            )
        }
        Predicate::Contains { column, needle } => {
            let column = scope.resolve(&column.relation, &column.column)?;
            if column.column_type != ColumnType::Utf8 {
                return Err(mismatch("substring test", &column, "utf8"));
            }
            Node::strings(column, StrTest::Contains(needle.clone()), scope)
        }
    })
}

#[derive(Clone, Debug)]
enum StrTest {
    Compare { op: CmpOp, rhs: Arc<str> },
    InSet { values: Vec<Arc<str>>, negated: bool },
    Contains(Arc<str>),
}

impl StrTest {
    fn matches(&self, s: &str) -> bool {
        match self {
            StrTest::Compare { op, rhs } => op.test(s.cmp(rhs)),
            StrTest::InSet { values, negated } => {
                values.iter().any(|v| v.as_ref() == s) != *negated
            }
            StrTest::Contains(needle) => s.contains(needle.as_ref()),
        }
    }
}

/// Per-dictionary-entry outcome of a string test.
#[derive(Clone, Debug)]
struct DictMatches {
    dictionary: Arc<Vec<Arc<str>>>,
    matches: BitVec,
}

#[derive(Clone, Debug)]
enum Node {
    And(Vec<Node>),
    Compare {
        column: BoundColumn,
        op: CmpOp,
        value: Literal,
    },
    Columns {
        left: BoundColumn,
        op: CmpOp,
        right: BoundColumn,
    },
    Strings {
        column: BoundColumn,
        test: StrTest,
        cache: Option<DictMatches>,
    },
}

impl Node {
    fn strings(column: BoundColumn, test: StrTest, scope: &Scope) -> Node {
        let table = scope.table(column.slot);
        let cache = table
            .chunks()
            .first()
            .and_then(|chunk| chunk.column(column.column).dictionary())
            .map(|dictionary| DictMatches {
                matches: dictionary.iter().map(|s| test.matches(s)).collect(),
                dictionary: dictionary.clone(),
            });
        Node::Strings {
            column,
            test,
            cache,
        }
    }

    fn evaluate(&self, row: &[RowCursor<'_>]) -> bool {
        match self {
            Node::And(children) => children.iter().all(|c| c.evaluate(row)),
            Node::Compare { column, op, value } => column
                .cell(row)
                .and_then(|cell| compare_cells(&cell, &value.as_cell()))
                .is_some_and(|ord| op.test(ord)),
            Node::Columns { left, op, right } => {
                let (Some(l), Some(r)) = (left.cell(row), right.cell(row)) else {
                    return false;
                };
                compare_cells(&l, &r).is_some_and(|ord| op.test(ord))
            }
            Node::Strings {
                column,
                test,
                cache,
            } => {
                let (col, offset) = column.chunk_column(row);
                let Some(idx) = col.dict_index_at(offset) else {
                    return false;
                };
                if let (Some(cache), Some(dictionary)) = (cache, col.dictionary()) {
                    if Arc::ptr_eq(&cache.dictionary, dictionary) {
                        return (idx as usize) < cache.matches.len()
                            && cache.matches.get(idx as usize);
                    }
                }
                col.str_at(offset).is_some_and(|s| test.matches(s))
            }
        }
    }
}

/// A predicate resolved against a [`Scope`]. Evaluation is side-effect free.
#[derive(Clone, Debug)]
pub struct BoundPredicate {
    root: Node,
}

impl BoundPredicate {
    /// Evaluates against one row per scope slot.
    #[inline]
    pub fn evaluate(&self, row: &[RowCursor<'_>]) -> bool {
        self.root.evaluate(row)
    }

    /// Selection mask over a chunk of a single-relation scope.
    pub fn filter_chunk(&self, chunk: &Chunk) -> BitVec {
        (0..chunk.len())
            .map(|offset| self.evaluate(&[RowCursor::new(chunk, offset)]))
            .collect()
    }
}

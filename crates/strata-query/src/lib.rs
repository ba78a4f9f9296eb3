//! Filter → join → group → sort evaluation over chunked columnar tables.
//!
//! Queries are declarative [`QuerySpec`]s; [`QueryEngine::evaluate`] loads the
//! referenced tables from a [`ColumnarTableSource`](strata_columnar::ColumnarTableSource),
//! builds hash join indices, scans the fact relation once and returns sorted
//! rows together with an [`EvaluationReport`].
//!
//! Per-row arithmetic is evaluated in batches by a [`kernel::BatchKernel`],
//! either scalar or SIMD (`wide`), optionally cross-checked against each other.

#![forbid(unsafe_code)]

mod aggregate;
mod error;
mod join;
pub mod kernel;
mod key;
mod options;
mod parallel;
mod pipeline;
mod plan;
mod predicate;
mod projector;
mod scope;
pub mod tpch;

pub use crate::aggregate::{GroupAggregator, OutputField, OutputKind};
pub use crate::error::{QueryError, QueryResult};
pub use crate::join::{extract_key, HashJoinIndex, JoinBuildStats};
pub use crate::kernel::{KernelChoice, KernelDivergence, KernelError, KernelRunner, Recipe};
pub use crate::key::{GroupKey, JoinKey, Key, KeyValue};
pub use crate::options::{AbortHandle, EngineOptions};
pub use crate::pipeline::{Evaluation, EvaluationReport, QueryEngine, QueryOutput, Stage};
pub use crate::plan::{
    col, AggregateKind, AggregateSpec, ColumnRef, DerivedSpec, GroupKeySpec, JoinKind, JoinSpec,
    KeyExpr, Measure, QuerySpec, RelationSpec,
};
pub use crate::predicate::{BoundPredicate, CmpOp, Literal, Predicate};
pub use crate::projector::{
    cmp_value, project, project_with, FinalizedGroups, ResultRow, ResultValue, SortDirection,
    SortKey,
};
pub use crate::scope::{BoundColumn, Cell, DecimalPolicy, RowCursor, Scope};

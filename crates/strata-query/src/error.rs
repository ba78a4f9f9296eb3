use crate::kernel::KernelError;
use strata_columnar::{ColumnType, SchemaError, SourceError};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum QueryError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("unknown relation: {0}")]
    UnknownRelation(String),

    #[error("unknown column {relation}[{column}]")]
    UnknownColumn { relation: String, column: String },

    #[error("unknown output field: {0}")]
    UnknownField(String),

    #[error("unknown derived value: {0}")]
    UnknownDerived(String),

    #[error("duplicate relation alias: {0}")]
    DuplicateRelation(String),

    #[error("{context}: {column} has type {actual}, which cannot be compared with {expected}")]
    TypeMismatch {
        context: String,
        column: String,
        expected: String,
        actual: ColumnType,
    },

    #[error(
        "join key type mismatch for {relation}: build key {build_column} is {build_type}, probe key {probe_column} is {probe_type}"
    )]
    JoinKeyTypeMismatch {
        relation: String,
        build_column: String,
        build_type: ColumnType,
        probe_column: String,
        probe_type: ColumnType,
    },

    #[error("group key has {actual} values, aggregator expects {expected}")]
    KeyArity { expected: usize, actual: usize },

    #[error("cannot merge aggregators with different layouts")]
    AggregatorMismatch,

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error("invalid query {query}: {reason}")]
    InvalidQuery { query: String, reason: String },

    #[error("illegal stage transition {from:?} -> {to:?}")]
    StageTransition {
        from: crate::pipeline::Stage,
        to: crate::pipeline::Stage,
    },

    #[error("evaluation aborted")]
    Aborted,
}

pub type QueryResult<T> = Result<T, QueryError>;

use crate::types::ColumnType;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("unknown column {table}[{column}]")]
    MissingColumn { table: String, column: String },
    #[error("column {table}[{column}] has type {actual}, expected {expected}")]
    TypeMismatch {
        table: String,
        column: String,
        expected: String,
        actual: ColumnType,
    },
    #[error("decimal column {table}[{column}] carries no scale")]
    MissingDecimalScale { table: String, column: String },
    #[error("row has {actual} values but table {table} has {expected} columns")]
    RowLength {
        table: String,
        expected: usize,
        actual: usize,
    },
    #[error("value {value} cannot be stored in column {table}[{column}] of type {column_type}")]
    ValueType {
        table: String,
        column: String,
        column_type: ColumnType,
        value: String,
    },
    #[error("column {table}[{column}] has unsupported type {data_type}")]
    UnsupportedType {
        table: String,
        column: String,
        data_type: String,
    },
    #[error("chunk {chunk} of table {table} is malformed: {reason}")]
    MalformedChunk {
        table: String,
        chunk: usize,
        reason: String,
    },
}

/// Failure to obtain a table from a [`crate::ColumnarTableSource`].
///
/// Always fatal for the evaluation that requested the table.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("table {table} not found")]
    TableNotFound { table: String },
    #[error("table {table} could not be read: {reason}")]
    Unreadable { table: String, reason: String },
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

//! Chunked, nullable columnar tables for analytical scans.
//!
//! This crate focuses on:
//! - Immutable tables made of fixed-size chunks, each holding one typed buffer per column.
//! - Presence bitmaps (`BitVec`) alongside every buffer; a missing bitmap means "no nulls".
//! - Exact fixed-point 128-bit decimals ([`DecimalValue`]) decoded lazily on access.
//! - The [`ColumnarTableSource`] boundary through which a query engine obtains tables.

#![forbid(unsafe_code)]

#[cfg(feature = "arrow")]
pub mod arrow;
mod bitmap;
mod chunk;
pub mod date;
pub mod decimal;
mod error;
mod source;
mod table;
mod types;

pub use crate::bitmap::BitVec;
pub use crate::chunk::{Chunk, ColumnChunk, ColumnData, RowRef};
pub use crate::decimal::{DecimalError, DecimalValue};
pub use crate::error::{SchemaError, SourceError};
pub use crate::source::{ColumnarTableSource, InMemorySource};
pub use crate::table::{ColumnSchema, Table, TableBuilder, TableOptions};
pub use crate::types::{ColumnType, Value};

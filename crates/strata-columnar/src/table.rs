#![forbid(unsafe_code)]

use crate::bitmap::BitVec;
use crate::chunk::{Chunk, ColumnChunk, ColumnData, RowRef};
use crate::decimal::{self, DecimalValue};
use crate::error::SchemaError;
use crate::types::{ColumnType, Value};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
pub struct TableOptions {
    /// Rows per chunk. The last chunk may be shorter.
    pub chunk_rows: usize,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self { chunk_rows: 65_536 }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// An immutable, chunked, columnar table.
///
/// Cloning is cheap: column buffers are shared.
#[derive(Clone, Debug)]
pub struct Table {
    name: Arc<str>,
    schema: Vec<ColumnSchema>,
    chunks: Vec<Chunk>,
    rows: usize,
}

impl Table {
    /// Assembles a table from prebuilt chunks, checking that every chunk
    /// matches the schema.
    pub fn from_chunks(
        name: impl Into<Arc<str>>,
        schema: Vec<ColumnSchema>,
        chunks: Vec<Chunk>,
    ) -> Result<Self, SchemaError> {
        let name = name.into();
        let malformed = |chunk: usize, reason: String| SchemaError::MalformedChunk {
            table: name.to_string(),
            chunk,
            reason,
        };

        let mut rows = 0usize;
        for (idx, chunk) in chunks.iter().enumerate() {
            if chunk.column_count() != schema.len() {
                return Err(malformed(
                    idx,
                    format!(
                        "{} columns, schema has {}",
                        chunk.column_count(),
                        schema.len()
                    ),
                ));
            }
            for (col, column_schema) in chunk.columns().iter().zip(schema.iter()) {
                if col.len() != chunk.len() {
                    return Err(malformed(
                        idx,
                        format!(
                            "column {} has {} rows, chunk has {}",
                            column_schema.name,
                            col.len(),
                            chunk.len()
                        ),
                    ));
                }
                if col.validity().is_some_and(|v| v.len() != chunk.len()) {
                    return Err(malformed(
                        idx,
                        format!("validity of column {} has the wrong length", column_schema.name),
                    ));
                }
                if !data_matches(col.data(), column_schema.column_type) {
                    return Err(malformed(
                        idx,
                        format!(
                            "column {} buffer does not hold {}",
                            column_schema.name, column_schema.column_type
                        ),
                    ));
                }
            }
            rows += chunk.len();
        }

        Ok(Self {
            name,
            schema,
            chunks,
            rows,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &[ColumnSchema] {
        &self.schema
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.schema.iter().position(|c| c.name == name)
    }

    pub fn column_type(&self, col: usize) -> ColumnType {
        self.schema[col].column_type
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn column_count(&self) -> usize {
        self.schema.len()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn chunk(&self, idx: usize) -> &Chunk {
        &self.chunks[idx]
    }

    /// Reads one cell. Decimals without a declared scale are returned at scale 0.
    pub fn value(&self, row: RowRef, col: usize) -> Value {
        let Some(chunk) = self.chunks.get(row.chunk as usize) else {
            return Value::Null;
        };
        let scale = match self.column_type(col) {
            ColumnType::Decimal128 { scale, .. } => scale.unwrap_or(0),
            _ => 0,
        };
        chunk.column(col).value_at(row.offset as usize, scale)
    }

    /// Row-major copy of the whole table. Meant for tests and diagnostics.
    pub fn to_rows(&self) -> Vec<Vec<Value>> {
        let mut out = Vec::with_capacity(self.rows);
        for (c, chunk) in self.chunks.iter().enumerate() {
            for offset in 0..chunk.len() {
                let row = RowRef::new(c, offset);
                out.push((0..self.column_count()).map(|col| self.value(row, col)).collect());
            }
        }
        out
    }

    /// A table with only `columns`, in that order, sharing this table's buffers.
    pub fn project(&self, columns: &[&str]) -> Result<Table, SchemaError> {
        let indices = columns
            .iter()
            .map(|&name| {
                self.column_index(name)
                    .ok_or_else(|| SchemaError::MissingColumn {
                        table: self.name.to_string(),
                        column: name.to_owned(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Table {
            name: self.name.clone(),
            schema: indices.iter().map(|&i| self.schema[i].clone()).collect(),
            chunks: self.chunks.iter().map(|c| c.select(&indices)).collect(),
            rows: self.rows,
        })
    }
}

fn data_matches(data: &ColumnData, column_type: ColumnType) -> bool {
    matches!(
        (data, column_type),
        (ColumnData::Int64(_), ColumnType::Int64)
            | (ColumnData::Float64(_), ColumnType::Float64)
            | (ColumnData::Boolean(_), ColumnType::Boolean)
            | (ColumnData::Date32(_), ColumnType::Date32)
            | (ColumnData::Decimal128(_), ColumnType::Decimal128 { .. })
            | (ColumnData::Utf8 { .. }, ColumnType::Utf8)
    )
}

/// Row-at-a-time table construction, flushing a chunk every
/// [`TableOptions::chunk_rows`] rows.
pub struct TableBuilder {
    name: Arc<str>,
    schema: Vec<ColumnSchema>,
    options: TableOptions,
    builders: Vec<ColumnBuilder>,
    current_rows: usize,
    chunk_lens: Vec<usize>,
}

enum ColumnBuilder {
    Int(PrimitiveBuilder<i64>),
    Float(PrimitiveBuilder<f64>),
    Date(PrimitiveBuilder<i32>),
    Decimal {
        precision: u8,
        scale: Option<i8>,
        inner: PrimitiveBuilder<i128>,
    },
    Bool(BoolBuilder),
    Dict(DictBuilder),
}

struct PrimitiveBuilder<T> {
    current: Vec<T>,
    validity: BitVec,
    chunks: Vec<(Vec<T>, BitVec)>,
}

struct BoolBuilder {
    current: BitVec,
    validity: BitVec,
    chunks: Vec<(BitVec, BitVec)>,
}

struct DictBuilder {
    dictionary: Vec<Arc<str>>,
    dict_map: HashMap<Arc<str>, u32>,
    current: Vec<u32>,
    validity: BitVec,
    chunks: Vec<(Vec<u32>, BitVec)>,
}

impl TableBuilder {
    pub fn new(name: impl Into<Arc<str>>, schema: Vec<ColumnSchema>, options: TableOptions) -> Self {
        let chunk_rows = options.chunk_rows.max(1);
        let builders = schema
            .iter()
            .map(|col| match col.column_type {
                ColumnType::Int64 => ColumnBuilder::Int(PrimitiveBuilder::new(chunk_rows)),
                ColumnType::Float64 => ColumnBuilder::Float(PrimitiveBuilder::new(chunk_rows)),
                ColumnType::Date32 => ColumnBuilder::Date(PrimitiveBuilder::new(chunk_rows)),
                ColumnType::Decimal128 { precision, scale } => ColumnBuilder::Decimal {
                    precision,
                    scale,
                    inner: PrimitiveBuilder::new(chunk_rows),
                },
                ColumnType::Boolean => ColumnBuilder::Bool(BoolBuilder::new(chunk_rows)),
                ColumnType::Utf8 => ColumnBuilder::Dict(DictBuilder::new(chunk_rows)),
            })
            .collect();

        Self {
            name: name.into(),
            schema,
            options: TableOptions { chunk_rows },
            builders,
            current_rows: 0,
            chunk_lens: Vec::new(),
        }
    }

    /// Appends one row. On error the builder is left unchanged.
    pub fn append_row(&mut self, row: &[Value]) -> Result<(), SchemaError> {
        if row.len() != self.builders.len() {
            return Err(SchemaError::RowLength {
                table: self.name.to_string(),
                expected: self.builders.len(),
                actual: row.len(),
            });
        }

        // Convert every cell first so a bad value cannot leave a ragged row behind.
        let mut cells = Vec::with_capacity(row.len());
        for ((builder, value), schema) in self.builders.iter().zip(row).zip(&self.schema) {
            let cell = builder.convert(value).ok_or_else(|| SchemaError::ValueType {
                table: self.name.to_string(),
                column: schema.name.clone(),
                column_type: schema.column_type,
                value: value.to_string(),
            })?;
            cells.push(cell);
        }

        for (builder, cell) in self.builders.iter_mut().zip(cells) {
            builder.push(cell);
        }

        self.current_rows += 1;
        if self.current_rows == self.options.chunk_rows {
            self.flush();
        }
        Ok(())
    }

    fn flush(&mut self) {
        if self.current_rows == 0 {
            return;
        }
        for builder in &mut self.builders {
            builder.flush();
        }
        self.chunk_lens.push(self.current_rows);
        self.current_rows = 0;
    }

    pub fn finalize(mut self) -> Table {
        self.flush();

        // Every column builder flushed exactly once per entry in `chunk_lens`.
        let mut per_column: Vec<_> = self
            .builders
            .into_iter()
            .map(|b| b.finish().into_iter())
            .collect();

        let chunks = self
            .chunk_lens
            .iter()
            .map(|&len| {
                let columns = per_column.iter_mut().filter_map(Iterator::next).collect();
                Chunk::new(len, columns)
            })
            .collect();

        let rows = self.chunk_lens.iter().sum();
        Table {
            name: self.name,
            schema: self.schema,
            chunks,
            rows,
        }
    }
}

/// A value already converted to the column's physical representation.
enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Date(i32),
    Decimal(i128),
    Bool(bool),
    Str(Arc<str>),
}

impl ColumnBuilder {
    fn convert(&self, value: &Value) -> Option<Cell> {
        if value.is_null() {
            return Some(Cell::Null);
        }
        match (self, value) {
            (ColumnBuilder::Int(_), Value::Int(v)) => Some(Cell::Int(*v)),
            (ColumnBuilder::Float(_), Value::Float(v)) => Some(Cell::Float(*v)),
            (ColumnBuilder::Float(_), Value::Int(v)) => Some(Cell::Float(*v as f64)),
            (ColumnBuilder::Float(_), Value::Decimal(v)) => Some(Cell::Float(v.to_f64())),
            (ColumnBuilder::Date(_), Value::Date(v)) => Some(Cell::Date(*v)),
            (ColumnBuilder::Bool(_), Value::Boolean(v)) => Some(Cell::Bool(*v)),
            (ColumnBuilder::Dict(_), Value::String(v)) => Some(Cell::Str(v.clone())),
            (
                ColumnBuilder::Decimal {
                    precision, scale, ..
                },
                value,
            ) => convert_decimal(value, *precision, *scale).map(Cell::Decimal),
            _ => None,
        }
    }

    fn push(&mut self, cell: Cell) {
        match (self, cell) {
            (ColumnBuilder::Int(b), Cell::Int(v)) => b.push(Some(v)),
            (ColumnBuilder::Int(b), _) => b.push(None),
            (ColumnBuilder::Float(b), Cell::Float(v)) => b.push(Some(v)),
            (ColumnBuilder::Float(b), _) => b.push(None),
            (ColumnBuilder::Date(b), Cell::Date(v)) => b.push(Some(v)),
            (ColumnBuilder::Date(b), _) => b.push(None),
            (ColumnBuilder::Decimal { inner, .. }, Cell::Decimal(v)) => inner.push(Some(v)),
            (ColumnBuilder::Decimal { inner, .. }, _) => inner.push(None),
            (ColumnBuilder::Bool(b), Cell::Bool(v)) => b.push(Some(v)),
            (ColumnBuilder::Bool(b), _) => b.push(None),
            (ColumnBuilder::Dict(b), Cell::Str(v)) => b.push(Some(v)),
            (ColumnBuilder::Dict(b), _) => b.push(None),
        }
    }

    fn flush(&mut self) {
        match self {
            ColumnBuilder::Int(b) => b.flush(),
            ColumnBuilder::Float(b) => b.flush(),
            ColumnBuilder::Date(b) => b.flush(),
            ColumnBuilder::Decimal { inner, .. } => inner.flush(),
            ColumnBuilder::Bool(b) => b.flush(),
            ColumnBuilder::Dict(b) => b.flush(),
        }
    }

    fn finish(self) -> Vec<Arc<ColumnChunk>> {
        match self {
            ColumnBuilder::Int(b) => b.finish(ColumnData::Int64),
            ColumnBuilder::Float(b) => b.finish(ColumnData::Float64),
            ColumnBuilder::Date(b) => b.finish(ColumnData::Date32),
            ColumnBuilder::Decimal { inner, .. } => inner.finish(ColumnData::Decimal128),
            ColumnBuilder::Bool(b) => b.finish(),
            ColumnBuilder::Dict(b) => b.finish(),
        }
    }
}

/// Decimal columns accept decimals (rescaled to the declared scale), integers
/// and floats. Without a declared scale only decimals are accepted and their
/// raw integer is stored untouched.
fn convert_decimal(value: &Value, precision: u8, scale: Option<i8>) -> Option<i128> {
    match (value, scale) {
        (Value::Decimal(d), Some(scale)) => d.rescale(scale).map(DecimalValue::raw),
        (Value::Decimal(d), None) => Some(d.raw()),
        (Value::Int(v), Some(scale)) => DecimalValue::new(i128::from(*v), 0)
            .rescale(scale)
            .map(DecimalValue::raw),
        (Value::Float(v), Some(scale)) => decimal::encode(*v, precision, scale).ok(),
        _ => None,
    }
}

impl<T: Copy + Default> PrimitiveBuilder<T> {
    fn new(chunk_rows: usize) -> Self {
        Self {
            current: Vec::with_capacity(chunk_rows),
            validity: BitVec::with_capacity_bits(chunk_rows),
            chunks: Vec::new(),
        }
    }

    fn push(&mut self, value: Option<T>) {
        self.current.push(value.unwrap_or_default());
        self.validity.push(value.is_some());
    }

    fn flush(&mut self) {
        let values = std::mem::take(&mut self.current);
        let validity = std::mem::take(&mut self.validity);
        self.chunks.push((values, validity));
    }

    fn finish(self, wrap: fn(Vec<T>) -> ColumnData) -> Vec<Arc<ColumnChunk>> {
        self.chunks
            .into_iter()
            .map(|(values, validity)| Arc::new(ColumnChunk::new(wrap(values), Some(validity))))
            .collect()
    }
}

impl BoolBuilder {
    fn new(chunk_rows: usize) -> Self {
        Self {
            current: BitVec::with_capacity_bits(chunk_rows),
            validity: BitVec::with_capacity_bits(chunk_rows),
            chunks: Vec::new(),
        }
    }

    fn push(&mut self, value: Option<bool>) {
        self.current.push(value.unwrap_or(false));
        self.validity.push(value.is_some());
    }

    fn flush(&mut self) {
        let values = std::mem::take(&mut self.current);
        let validity = std::mem::take(&mut self.validity);
        self.chunks.push((values, validity));
    }

    fn finish(self) -> Vec<Arc<ColumnChunk>> {
        self.chunks
            .into_iter()
            .map(|(values, validity)| {
                Arc::new(ColumnChunk::new(ColumnData::Boolean(values), Some(validity)))
            })
            .collect()
    }
}

impl DictBuilder {
    fn new(chunk_rows: usize) -> Self {
        Self {
            dictionary: Vec::new(),
            dict_map: HashMap::new(),
            current: Vec::with_capacity(chunk_rows),
            validity: BitVec::with_capacity_bits(chunk_rows),
            chunks: Vec::new(),
        }
    }

    fn intern(&mut self, s: Arc<str>) -> u32 {
        if let Some(idx) = self.dict_map.get(s.as_ref()) {
            return *idx;
        }

        let idx = self.dictionary.len() as u32;
        self.dictionary.push(s.clone());
        self.dict_map.insert(s, idx);
        idx
    }

    fn push(&mut self, value: Option<Arc<str>>) {
        match value {
            Some(s) => {
                let idx = self.intern(s);
                self.current.push(idx);
                self.validity.push(true);
            }
            None => {
                self.current.push(0);
                self.validity.push(false);
            }
        }
    }

    fn flush(&mut self) {
        let indices = std::mem::take(&mut self.current);
        let validity = std::mem::take(&mut self.validity);
        self.chunks.push((indices, validity));
    }

    fn finish(self) -> Vec<Arc<ColumnChunk>> {
        // Every chunk shares the final dictionary; earlier chunks only use a prefix of it.
        let dictionary = Arc::new(self.dictionary);
        self.chunks
            .into_iter()
            .map(|(indices, validity)| {
                Arc::new(ColumnChunk::new(
                    ColumnData::Utf8 {
                        indices,
                        dictionary: dictionary.clone(),
                    },
                    Some(validity),
                ))
            })
            .collect()
    }
}

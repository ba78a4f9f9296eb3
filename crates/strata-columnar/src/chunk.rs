#![forbid(unsafe_code)]

use crate::bitmap::BitVec;
use crate::decimal::DecimalValue;
use crate::types::Value;
use std::sync::Arc;

/// Position of a row inside a chunked table.
///
/// Join indices and result bookkeeping hold these instead of copies of row data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowRef {
    pub chunk: u32,
    pub offset: u32,
}

impl RowRef {
    /// Both indices must fit in `u32`; wider positions are clamped in release
    /// builds and rejected by a debug assertion.
    pub fn new(chunk: usize, offset: usize) -> Self {
        let narrow = |index: usize, what: &str| {
            let narrowed = u32::try_from(index);
            debug_assert!(narrowed.is_ok(), "{what} index {index} does not fit in u32");
            narrowed.unwrap_or(u32::MAX)
        };
        Self {
            chunk: narrow(chunk, "chunk"),
            offset: narrow(offset, "row"),
        }
    }
}

/// Typed buffer for one column of one chunk.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnData {
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    Boolean(BitVec),
    Date32(Vec<i32>),
    /// Raw scaled integers; the scale lives in the column type.
    Decimal128(Vec<i128>),
    /// Dictionary indices. The dictionary is shared by every chunk of the column.
    Utf8 {
        indices: Vec<u32>,
        dictionary: Arc<Vec<Arc<str>>>,
    },
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Int64(v) => v.len(),
            ColumnData::Float64(v) => v.len(),
            ColumnData::Boolean(v) => v.len(),
            ColumnData::Date32(v) => v.len(),
            ColumnData::Decimal128(v) => v.len(),
            ColumnData::Utf8 { indices, .. } => indices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One column's buffer for one chunk, plus its presence bitmap.
///
/// `validity == None` means every row is present. Accessors return `None` for
/// absent rows and for rows read through the wrong type.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnChunk {
    data: ColumnData,
    validity: Option<BitVec>,
}

impl ColumnChunk {
    /// Builds a chunk; an all-true bitmap is normalized to `None`.
    pub fn new(data: ColumnData, validity: Option<BitVec>) -> Self {
        let validity = validity.filter(|v| !v.all_true());
        Self { data, validity }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    pub fn validity(&self) -> Option<&BitVec> {
        self.validity.as_ref()
    }

    pub fn null_count(&self) -> usize {
        self.validity
            .as_ref()
            .map_or(0, |v| v.len() - v.count_ones())
    }

    #[inline]
    pub fn is_valid(&self, row: usize) -> bool {
        self.validity.as_ref().map_or(true, |v| v.get(row))
    }

    #[inline]
    pub fn i64_at(&self, row: usize) -> Option<i64> {
        match &self.data {
            ColumnData::Int64(v) if self.is_valid(row) => v.get(row).copied(),
            _ => None,
        }
    }

    #[inline]
    pub fn f64_at(&self, row: usize) -> Option<f64> {
        match &self.data {
            ColumnData::Float64(v) if self.is_valid(row) => v.get(row).copied(),
            _ => None,
        }
    }

    #[inline]
    pub fn bool_at(&self, row: usize) -> Option<bool> {
        match &self.data {
            ColumnData::Boolean(v) if self.is_valid(row) && row < v.len() => Some(v.get(row)),
            _ => None,
        }
    }

    #[inline]
    pub fn date_at(&self, row: usize) -> Option<i32> {
        match &self.data {
            ColumnData::Date32(v) if self.is_valid(row) => v.get(row).copied(),
            _ => None,
        }
    }

    /// Raw scaled integer; callers pair it with the column's scale.
    #[inline]
    pub fn decimal_raw_at(&self, row: usize) -> Option<i128> {
        match &self.data {
            ColumnData::Decimal128(v) if self.is_valid(row) => v.get(row).copied(),
            _ => None,
        }
    }

    #[inline]
    pub fn dict_index_at(&self, row: usize) -> Option<u32> {
        match &self.data {
            ColumnData::Utf8 { indices, .. } if self.is_valid(row) => indices.get(row).copied(),
            _ => None,
        }
    }

    #[inline]
    pub fn str_at(&self, row: usize) -> Option<&Arc<str>> {
        match &self.data {
            ColumnData::Utf8 {
                indices,
                dictionary,
            } if self.is_valid(row) => dictionary.get(*indices.get(row)? as usize),
            _ => None,
        }
    }

    pub fn dictionary(&self) -> Option<&Arc<Vec<Arc<str>>>> {
        match &self.data {
            ColumnData::Utf8 { dictionary, .. } => Some(dictionary),
            _ => None,
        }
    }

    /// Reads one cell back as a [`Value`]. `scale` is only consulted for decimals.
    pub fn value_at(&self, row: usize, scale: i8) -> Value {
        if row >= self.len() || !self.is_valid(row) {
            return Value::Null;
        }
        match &self.data {
            ColumnData::Int64(v) => Value::Int(v[row]),
            ColumnData::Float64(v) => Value::Float(v[row]),
            ColumnData::Boolean(v) => Value::Boolean(v.get(row)),
            ColumnData::Date32(v) => Value::Date(v[row]),
            ColumnData::Decimal128(v) => Value::Decimal(DecimalValue::new(v[row], scale)),
            ColumnData::Utf8 {
                indices,
                dictionary,
            } => dictionary
                .get(indices[row] as usize)
                .map_or(Value::Null, |s| Value::String(s.clone())),
        }
    }
}

/// A fixed-size, immutable batch of column buffers belonging to a table.
#[derive(Clone, Debug)]
pub struct Chunk {
    len: usize,
    columns: Vec<Arc<ColumnChunk>>,
}

impl Chunk {
    /// Callers guarantee every column has `len` rows; [`crate::Table::from_chunks`]
    /// validates this.
    pub fn new(len: usize, columns: Vec<Arc<ColumnChunk>>) -> Self {
        Self { len, columns }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    #[inline]
    pub fn column(&self, idx: usize) -> &ColumnChunk {
        &self.columns[idx]
    }

    pub fn columns(&self) -> &[Arc<ColumnChunk>] {
        &self.columns
    }

    /// A chunk sharing the selected column buffers, in the given order.
    pub fn select(&self, columns: &[usize]) -> Chunk {
        Chunk {
            len: self.len,
            columns: columns.iter().map(|&c| self.columns[c].clone()).collect(),
        }
    }
}

//! Conversion from already-decoded Arrow record batches.
//!
//! One chunk is produced per batch. String columns share a single dictionary
//! across all chunks, as [`crate::TableBuilder`] does.

use crate::bitmap::BitVec;
use crate::chunk::{Chunk, ColumnChunk, ColumnData};
use crate::error::SchemaError;
use crate::table::{ColumnSchema, Table};
use crate::types::ColumnType;
use arrow_array::{
    Array, BooleanArray, Date32Array, Decimal128Array, Float64Array, Int64Array, RecordBatch,
    StringArray,
};
use arrow_schema::{DataType, SchemaRef};
use std::collections::HashMap;
use std::sync::Arc;

fn column_type_for(table: &str, name: &str, data_type: &DataType) -> Result<ColumnType, SchemaError> {
    Ok(match data_type {
        DataType::Int64 => ColumnType::Int64,
        DataType::Float64 => ColumnType::Float64,
        DataType::Boolean => ColumnType::Boolean,
        DataType::Date32 => ColumnType::Date32,
        DataType::Utf8 => ColumnType::Utf8,
        DataType::Decimal128(precision, scale) => ColumnType::Decimal128 {
            precision: *precision,
            scale: Some(*scale),
        },
        other => {
            return Err(SchemaError::UnsupportedType {
                table: table.to_owned(),
                column: name.to_owned(),
                data_type: other.to_string(),
            })
        }
    })
}

fn validity_of(array: &dyn Array) -> Option<BitVec> {
    array
        .nulls()
        .map(|nulls| (0..array.len()).map(|i| nulls.is_valid(i)).collect())
}

/// Converts `batches` (all sharing `schema`) into a [`Table`] named `name`.
pub fn table_from_record_batches(
    name: &str,
    schema: SchemaRef,
    batches: &[RecordBatch],
) -> Result<Table, SchemaError> {
    let columns = schema
        .fields()
        .iter()
        .map(|f| -> Result<ColumnSchema, SchemaError> {
            let column_type = column_type_for(name, f.name(), f.data_type())?;
            Ok(ColumnSchema::new(f.name().clone(), column_type))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut dictionaries: Vec<Option<StringInterner>> = columns
        .iter()
        .map(|c| (c.column_type == ColumnType::Utf8).then(StringInterner::default))
        .collect();

    // Dictionaries are only final after every batch is seen, so string columns
    // are collected as indices first and wrapped at the end.
    enum Pending {
        Ready(ColumnChunk),
        Strings(Vec<u32>, Option<BitVec>),
    }

    let mut pending_chunks: Vec<(usize, Vec<Pending>)> = Vec::with_capacity(batches.len());
    for (chunk_idx, batch) in batches.iter().enumerate() {
        if batch.num_columns() != columns.len() {
            return Err(SchemaError::MalformedChunk {
                table: name.to_owned(),
                chunk: chunk_idx,
                reason: format!(
                    "{} columns, schema has {}",
                    batch.num_columns(),
                    columns.len()
                ),
            });
        }

        let mut pending = Vec::with_capacity(columns.len());
        for (col_idx, column) in columns.iter().enumerate() {
            let array = batch.column(col_idx).as_ref();
            let mismatch = || SchemaError::MalformedChunk {
                table: name.to_owned(),
                chunk: chunk_idx,
                reason: format!("column {} does not hold {}", column.name, column.column_type),
            };
            let validity = validity_of(array);
            let any = array.as_any();
            let item = match column.column_type {
                ColumnType::Int64 => {
                    let a = any.downcast_ref::<Int64Array>().ok_or_else(mismatch)?;
                    Pending::Ready(ColumnChunk::new(
                        ColumnData::Int64(a.values().to_vec()),
                        validity,
                    ))
                }
                ColumnType::Float64 => {
                    let a = any.downcast_ref::<Float64Array>().ok_or_else(mismatch)?;
                    Pending::Ready(ColumnChunk::new(
                        ColumnData::Float64(a.values().to_vec()),
                        validity,
                    ))
                }
                ColumnType::Date32 => {
                    let a = any.downcast_ref::<Date32Array>().ok_or_else(mismatch)?;
                    Pending::Ready(ColumnChunk::new(
                        ColumnData::Date32(a.values().to_vec()),
                        validity,
                    ))
                }
                ColumnType::Decimal128 { .. } => {
                    let a = any.downcast_ref::<Decimal128Array>().ok_or_else(mismatch)?;
                    Pending::Ready(ColumnChunk::new(
                        ColumnData::Decimal128(a.values().to_vec()),
                        validity,
                    ))
                }
                ColumnType::Boolean => {
                    let a = any.downcast_ref::<BooleanArray>().ok_or_else(mismatch)?;
                    let values = a.values().iter().collect();
                    Pending::Ready(ColumnChunk::new(ColumnData::Boolean(values), validity))
                }
                ColumnType::Utf8 => {
                    let a = any.downcast_ref::<StringArray>().ok_or_else(mismatch)?;
                    let Some(interner) = dictionaries[col_idx].as_mut() else {
                        return Err(mismatch());
                    };
                    let indices = (0..a.len())
                        .map(|i| if a.is_valid(i) { interner.intern(a.value(i)) } else { 0 })
                        .collect();
                    Pending::Strings(indices, validity)
                }
            };
            pending.push(item);
        }
        pending_chunks.push((batch.num_rows(), pending));
    }

    let finished: Vec<Option<Arc<Vec<Arc<str>>>>> = dictionaries
        .into_iter()
        .map(|d| d.map(|d| Arc::new(d.values)))
        .collect();

    let mut chunks = Vec::with_capacity(pending_chunks.len());
    for (len, pending) in pending_chunks {
        let cols = pending
            .into_iter()
            .zip(finished.iter())
            .map(|(p, dictionary)| match (p, dictionary) {
                (Pending::Ready(c), _) => Arc::new(c),
                (Pending::Strings(indices, validity), dictionary) => Arc::new(ColumnChunk::new(
                    ColumnData::Utf8 {
                        indices,
                        dictionary: dictionary.clone().unwrap_or_default(),
                    },
                    validity,
                )),
            })
            .collect();
        chunks.push(Chunk::new(len, cols));
    }

    Table::from_chunks(name, columns, chunks)
}

#[derive(Default)]
struct StringInterner {
    values: Vec<Arc<str>>,
    lookup: HashMap<Arc<str>, u32>,
}

impl StringInterner {
    fn intern(&mut self, s: &str) -> u32 {
        if let Some(&idx) = self.lookup.get(s) {
            return idx;
        }
        let idx = self.values.len() as u32;
        let s: Arc<str> = Arc::from(s);
        self.values.push(s.clone());
        self.lookup.insert(s, idx);
        idx
    }
}

#![cfg(feature = "arrow")]

use arrow_array::{ArrayRef, Date32Array, Decimal128Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;
use strata_columnar::arrow::table_from_record_batches;
use strata_columnar::{ColumnType, DecimalValue, SchemaError, Value};

fn batch(
    schema: &Arc<Schema>,
    keys: Vec<Option<i64>>,
    prices: Vec<Option<i128>>,
    dates: Vec<Option<i32>>,
    modes: Vec<Option<&str>>,
) -> Result<RecordBatch, Box<dyn std::error::Error>> {
    let prices = Decimal128Array::from(prices).with_precision_and_scale(15, 2)?;
    Ok(RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from(keys)) as ArrayRef,
            Arc::new(prices) as ArrayRef,
            Arc::new(Date32Array::from(dates)) as ArrayRef,
            Arc::new(StringArray::from(modes)) as ArrayRef,
        ],
    )?)
}

#[test]
fn record_batches_become_chunks() -> Result<(), Box<dyn std::error::Error>> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("l_orderkey", DataType::Int64, false),
        Field::new("l_extendedprice", DataType::Decimal128(15, 2), true),
        Field::new("l_shipdate", DataType::Date32, true),
        Field::new("l_shipmode", DataType::Utf8, true),
    ]));

    let b0 = batch(
        &schema,
        vec![Some(1), Some(2)],
        vec![Some(-1234), None],
        vec![Some(8766), Some(8767)],
        vec![Some("MAIL"), None],
    )?;
    let b1 = batch(
        &schema,
        vec![Some(3)],
        vec![Some(100)],
        vec![None],
        vec![Some("MAIL")],
    )?;

    let table = table_from_record_batches("lineitem", schema.clone(), &[b0, b1])?;
    assert_eq!(table.row_count(), 3);
    assert_eq!(table.chunks().len(), 2);
    assert_eq!(
        table.schema()[1].column_type,
        ColumnType::Decimal128 {
            precision: 15,
            scale: Some(2)
        }
    );

    let rows = table.to_rows();
    assert_eq!(rows[0][1], Value::Decimal(DecimalValue::new(-1234, 2)));
    assert_eq!(rows[1][1], Value::Null);
    assert_eq!(rows[1][3], Value::Null);
    assert_eq!(rows[2][2], Value::Null);
    assert_eq!(rows[2][3], Value::from("MAIL"));

    let d0 = table.chunk(0).column(3).dictionary().unwrap();
    let d1 = table.chunk(1).column(3).dictionary().unwrap();
    assert!(Arc::ptr_eq(d0, d1));
    Ok(())
}

#[test]
fn unsupported_arrow_types_are_schema_errors() {
    let schema = Arc::new(Schema::new(vec![Field::new(
        "ts",
        DataType::Float32,
        true,
    )]));
    let err = table_from_record_batches("t", schema, &[]).unwrap_err();
    assert!(matches!(err, SchemaError::UnsupportedType { .. }));
}

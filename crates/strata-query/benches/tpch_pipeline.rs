use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use strata_columnar::date::parse_date;
use strata_columnar::{ColumnSchema, ColumnType, DecimalValue, InMemorySource, TableBuilder, TableOptions, Value};
use strata_query::tpch::{q1, q6, Q1Params, Q6Params};
use strata_query::{EngineOptions, KernelChoice, QueryEngine};

fn bench_rows() -> usize {
    std::env::var("STRATA_TPCH_BENCH_ROWS")
        .ok()
        .and_then(|v| v.replace('_', "").parse::<usize>().ok())
        .filter(|&v| v >= 1_000)
        .unwrap_or(1_000_000)
}

fn build_lineitem(rows: usize) -> InMemorySource {
    let money = ColumnType::Decimal128 {
        precision: 15,
        scale: Some(2),
    };
    let schema = vec![
        ColumnSchema::new("l_shipdate", ColumnType::Date32),
        ColumnSchema::new("l_returnflag", ColumnType::Utf8),
        ColumnSchema::new("l_linestatus", ColumnType::Utf8),
        ColumnSchema::new("l_quantity", money),
        ColumnSchema::new("l_extendedprice", money),
        ColumnSchema::new("l_discount", money),
        ColumnSchema::new("l_tax", money),
    ];
    let first_day = parse_date("1992-01-02").unwrap_or_default();
    let flags = [Value::from("A"), Value::from("N"), Value::from("R")];
    let statuses = [Value::from("F"), Value::from("O")];

    let mut rng = StdRng::seed_from_u64(42);
    let mut builder = TableBuilder::new("lineitem", schema, TableOptions::default());
    for _ in 0..rows {
        builder
            .append_row(&[
                Value::Date(first_day + rng.gen_range(0..2_526)),
                flags[rng.gen_range(0..flags.len())].clone(),
                statuses[rng.gen_range(0..statuses.len())].clone(),
                Value::Decimal(DecimalValue::new(rng.gen_range(100..=5_000), 2)),
                Value::Decimal(DecimalValue::new(rng.gen_range(90_000..=10_494_950), 2)),
                Value::Decimal(DecimalValue::new(rng.gen_range(0..=10), 2)),
                Value::Decimal(DecimalValue::new(rng.gen_range(0..=8), 2)),
            ])
            .unwrap();
    }
    InMemorySource::new().with_table(builder.finalize())
}

fn bench_tpch_pipeline(c: &mut Criterion) {
    let rows = bench_rows();
    let source = build_lineitem(rows);
    let queries = [("q1", q1(&Q1Params::default())), ("q6", q6(&Q6Params::default()))];

    let mut group = c.benchmark_group("tpch_pipeline");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(10));

    for (name, spec) in &queries {
        for (label, kernel, parallel) in [
            ("scalar", KernelChoice::Scalar, false),
            ("simd", KernelChoice::Simd, false),
            ("simd_parallel", KernelChoice::Simd, true),
        ] {
            let engine = QueryEngine::new(
                EngineOptions::default()
                    .with_kernel(kernel)
                    .with_parallel(parallel),
            );
            group.bench_with_input(BenchmarkId::new(*name, label), &rows, |b, _| {
                b.iter(|| black_box(engine.evaluate(&source, spec).unwrap()))
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_tpch_pipeline);
criterion_main!(benches);

use pretty_assertions::assert_eq;
use strata_columnar::{
    ColumnSchema, ColumnType, InMemorySource, SchemaError, SourceError, Table, TableBuilder,
    TableOptions, Value,
};
use strata_query::{
    col, AbortHandle, AggregateKind, CmpOp, EngineOptions, Evaluation, JoinSpec, KeyExpr,
    KernelChoice, Measure, Predicate, QueryEngine, QueryError, QuerySpec, Recipe, ResultValue,
    SortKey, Stage,
};

fn build_table(name: &str, chunk_rows: usize, schema: Vec<ColumnSchema>, rows: Vec<Vec<Value>>) -> Table {
    let mut builder = TableBuilder::new(name, schema, TableOptions { chunk_rows });
    for row in rows {
        builder.append_row(&row).unwrap();
    }
    builder.finalize()
}

fn sequential() -> EngineOptions {
    EngineOptions::default().with_parallel(false)
}

/// orders(o_orderkey, o_priority) and lineitem(l_orderkey, l_qty, l_price).
fn source() -> InMemorySource {
    let orders = build_table(
        "orders",
        2,
        vec![
            ColumnSchema::new("o_orderkey", ColumnType::Int64),
            ColumnSchema::new("o_priority", ColumnType::Utf8),
        ],
        vec![
            vec![Value::Int(1), Value::from("HIGH")],
            vec![Value::Int(2), Value::from("LOW")],
            vec![Value::Int(3), Value::Null],
            vec![Value::Null, Value::from("HIGH")],
        ],
    );
    let lineitem = build_table(
        "lineitem",
        3,
        vec![
            ColumnSchema::new("l_orderkey", ColumnType::Int64),
            ColumnSchema::new("l_qty", ColumnType::Int64),
            ColumnSchema::new("l_price", ColumnType::Float64),
        ],
        vec![
            vec![Value::Int(1), Value::Int(5), Value::Float(10.0)],
            vec![Value::Int(1), Value::Int(7), Value::Float(20.0)],
            vec![Value::Int(2), Value::Null, Value::Float(30.0)],
            vec![Value::Int(9), Value::Int(1), Value::Float(40.0)],
            vec![Value::Null, Value::Int(2), Value::Float(50.0)],
            vec![Value::Int(3), Value::Int(3), Value::Float(60.0)],
            vec![Value::Int(2), Value::Int(4), Value::Float(70.0)],
        ],
    );
    InMemorySource::new().with_table(orders).with_table(lineitem)
}

fn revenue_by_priority() -> QuerySpec {
    QuerySpec::new("by_priority", "l", "lineitem")
        .join(JoinSpec::inner("o", "orders").on("o_orderkey", col("l", "l_orderkey")))
        .group_by("priority", KeyExpr::Column(col("o", "o_priority")))
        .aggregate("revenue", AggregateKind::Sum(Measure::Column(col("l", "l_price"))))
        .aggregate("lines", AggregateKind::Count)
        .order_by(SortKey::asc("priority"))
}

#[test]
fn unmatched_and_null_keys_never_contribute() {
    let out = QueryEngine::new(sequential())
        .evaluate(&source(), &revenue_by_priority())
        .unwrap();

    // Order 9 does not exist, one line has a null key, and order 3 has a null
    // priority, so only orders 1 and 2 produce groups.
    assert_eq!(
        out.rows,
        vec![
            vec![ResultValue::from("HIGH"), ResultValue::Float(30.0), ResultValue::Int(2)],
            vec![ResultValue::from("LOW"), ResultValue::Float(100.0), ResultValue::Int(2)],
        ]
    );
    assert_eq!(out.report.rows_scanned, 7);
    assert_eq!(out.report.rows_joined, 5);
    assert_eq!(out.report.rows_aggregated, 4);
    assert_eq!(out.report.join_builds.len(), 1);
    assert_eq!(out.report.join_builds[0].1.inserted, 3);
}

#[test]
fn null_measure_excludes_the_whole_row() {
    let spec = QuerySpec::new("qty", "l", "lineitem")
        .join(JoinSpec::inner("o", "orders").on("o_orderkey", col("l", "l_orderkey")))
        .group_by("priority", KeyExpr::Column(col("o", "o_priority")))
        .aggregate("qty", AggregateKind::Sum(Measure::Column(col("l", "l_qty"))))
        .aggregate("lines", AggregateKind::Count)
        .order_by(SortKey::asc("priority"));

    let out = QueryEngine::new(sequential()).evaluate(&source(), &spec).unwrap();
    assert_eq!(
        out.rows,
        vec![
            vec![ResultValue::from("HIGH"), ResultValue::Float(12.0), ResultValue::Int(2)],
            vec![ResultValue::from("LOW"), ResultValue::Float(4.0), ResultValue::Int(1)],
        ]
    );
}

#[test]
fn null_in_a_count_where_column_excludes_the_row() {
    let spec = QuerySpec::new("urgent", "l", "lineitem")
        .join(JoinSpec::inner("o", "orders").on("o_orderkey", col("l", "l_orderkey")))
        .group_by("order", KeyExpr::Column(col("l", "l_orderkey")))
        .aggregate(
            "high",
            AggregateKind::CountWhere(Predicate::in_set(col("o", "o_priority"), ["HIGH"])),
        )
        .aggregate(
            "other",
            AggregateKind::CountWhere(Predicate::not_in_set(col("o", "o_priority"), ["HIGH"])),
        )
        .order_by(SortKey::asc("order"));

    let out = QueryEngine::new(sequential()).evaluate(&source(), &spec).unwrap();
    // Order 3 joins but its priority is null, so it never forms a group.
    assert_eq!(
        out.rows,
        vec![
            vec![ResultValue::Int(1), ResultValue::Int(2), ResultValue::Int(0)],
            vec![ResultValue::Int(2), ResultValue::Int(0), ResultValue::Int(2)],
        ]
    );
    assert_eq!(out.report.rows_joined, 5);
    assert_eq!(out.report.rows_aggregated, 4);
}

#[test]
fn null_operands_fail_every_comparison() {
    for op in [CmpOp::Lt, CmpOp::Le, CmpOp::Gt, CmpOp::Ge, CmpOp::Eq, CmpOp::Ne] {
        let spec = QuerySpec::new("nulls", "l", "lineitem")
            .filter(Predicate::compare(col("l", "l_qty"), op, 4i64))
            .aggregate("n", AggregateKind::Count);
        let out = QueryEngine::new(sequential()).evaluate(&source(), &spec).unwrap();
        let qualified = out.report.rows_qualified;
        let expected = match op {
            CmpOp::Lt => 3,
            CmpOp::Le => 4,
            CmpOp::Gt => 2,
            CmpOp::Ge => 3,
            CmpOp::Eq => 1,
            CmpOp::Ne => 5,
        };
        assert_eq!(qualified, expected, "{op:?}");
    }

    let spec = QuerySpec::new("priorities", "o", "orders")
        .filter(Predicate::not_in_set(col("o", "o_priority"), ["LOW"]))
        .aggregate("n", AggregateKind::Count);
    let out = QueryEngine::new(sequential()).evaluate(&source(), &spec).unwrap();
    // The null priority is neither in nor out of the set.
    assert_eq!(out.rows, vec![vec![ResultValue::Int(2)]]);
}

#[test]
fn semi_join_keeps_each_probe_row_once() {
    let spec = QuerySpec::new("has_big_line", "o", "orders")
        .join(
            JoinSpec::semi("l", "lineitem")
                .on("l_orderkey", col("o", "o_orderkey"))
                .filter(Predicate::compare(col("l", "l_price"), CmpOp::Gt, 5.0)),
        )
        .group_by("priority", KeyExpr::Column(col("o", "o_priority")))
        .aggregate("orders", AggregateKind::Count)
        .order_by(SortKey::asc("priority"));

    let out = QueryEngine::new(sequential()).evaluate(&source(), &spec).unwrap();
    assert_eq!(
        out.rows,
        vec![
            vec![ResultValue::from("HIGH"), ResultValue::Int(1)],
            vec![ResultValue::from("LOW"), ResultValue::Int(1)],
        ]
    );
    assert_eq!(out.report.rows_joined, 3);
}

#[test]
fn semi_joined_columns_are_not_visible() {
    let spec = QuerySpec::new("bad", "o", "orders")
        .join(JoinSpec::semi("l", "lineitem").on("l_orderkey", col("o", "o_orderkey")))
        .group_by("qty", KeyExpr::Column(col("l", "l_qty")))
        .aggregate("n", AggregateKind::Count);
    let err = QueryEngine::default().evaluate(&source(), &spec).unwrap_err();
    assert_eq!(err, QueryError::UnknownRelation("l".into()));
}

#[test]
fn batch_size_and_parallelism_do_not_change_results() {
    let spec = revenue_by_priority().derive(
        &["discounted"],
        Recipe::DiscountedPrice,
        vec![col("l", "l_price"), col("l", "l_price")],
    );
    let spec = spec.aggregate(
        "discounted",
        AggregateKind::Sum(Measure::Derived("discounted".into())),
    );

    let baseline = QueryEngine::new(sequential().with_kernel(KernelChoice::Scalar))
        .evaluate(&source(), &spec)
        .unwrap();
    for batch_size in [1, 2, 3, 1024] {
        for parallel in [false, true] {
            let options = EngineOptions::default()
                .with_batch_size(batch_size)
                .with_parallel(parallel)
                .with_kernel(KernelChoice::Verified);
            let out = QueryEngine::new(options).evaluate(&source(), &spec).unwrap();
            assert_eq!(out.rows, baseline.rows, "batch {batch_size}, parallel {parallel}");
            assert!(out.report.divergences.is_empty());
            assert!(out.report.kernel_batches >= 1);
        }
    }
}

#[test]
fn stages_are_recorded_in_order() {
    let spec = revenue_by_priority();
    let source = source();
    let mut evaluation = Evaluation::new(&spec, sequential());
    assert_eq!(evaluation.stage(), Stage::Scanning);
    evaluation.run(&source).unwrap();

    assert_eq!(evaluation.stage(), Stage::Done);
    assert_eq!(
        evaluation.report().stages,
        vec![
            Stage::Scanning,
            Stage::Filtering,
            Stage::Joining,
            Stage::Aggregating,
            Stage::Finalizing,
            Stage::Sorted,
            Stage::Done,
        ]
    );
    assert!(matches!(
        evaluation.run(&source),
        Err(QueryError::StageTransition { from: Stage::Done, .. })
    ));
}

#[test]
fn abort_fails_the_evaluation() {
    let abort = AbortHandle::new();
    abort.abort();
    let spec = revenue_by_priority();
    let source = source();
    let mut evaluation = Evaluation::new(&spec, sequential().with_abort(abort));

    assert_eq!(evaluation.run(&source), Err(QueryError::Aborted));
    assert_eq!(evaluation.stage(), Stage::Failed);
    assert_eq!(evaluation.report().stages.last(), Some(&Stage::Failed));
}

#[test]
fn missing_decimal_scale_is_fatal_only_when_required() {
    let prices = build_table(
        "prices",
        2,
        vec![ColumnSchema::new(
            "p",
            ColumnType::Decimal128 {
                precision: 12,
                scale: None,
            },
        )],
        vec![
            vec![Value::Decimal(strata_columnar::DecimalValue::new(-1250, 2))],
            vec![Value::Decimal(strata_columnar::DecimalValue::new(250, 2))],
        ],
    );
    let source = InMemorySource::new().with_table(prices);
    let spec = QuerySpec::new("total", "t", "prices")
        .aggregate("total", AggregateKind::Sum(Measure::Column(col("t", "p"))));

    let out = QueryEngine::default().evaluate(&source, &spec).unwrap();
    assert_eq!(out.rows, vec![vec![ResultValue::Float(-10.0)]]);

    let strict = EngineOptions {
        require_decimal_scale: true,
        ..EngineOptions::default()
    };
    let mut evaluation = Evaluation::new(&spec, strict);
    assert!(matches!(
        evaluation.run(&source),
        Err(QueryError::Schema(SchemaError::MissingDecimalScale { .. }))
    ));
    assert_eq!(evaluation.stage(), Stage::Failed);
}

#[test]
fn source_errors_are_fatal() {
    let spec = QuerySpec::new("missing", "x", "nope").aggregate("n", AggregateKind::Count);
    let err = QueryEngine::default().evaluate(&source(), &spec).unwrap_err();
    assert_eq!(
        err,
        QueryError::Source(SourceError::TableNotFound {
            table: "nope".into()
        })
    );

    let spec = QuerySpec::new("missing", "l", "lineitem")
        .aggregate("t", AggregateKind::Sum(Measure::Column(col("l", "l_tax"))));
    let err = QueryEngine::default().evaluate(&source(), &spec).unwrap_err();
    assert!(matches!(
        err,
        QueryError::Source(SourceError::Schema(SchemaError::MissingColumn { .. }))
    ));
}

#[test]
fn join_keys_must_have_matching_types() {
    let spec = QuerySpec::new("bad", "l", "lineitem")
        .join(JoinSpec::inner("o", "orders").on("o_priority", col("l", "l_orderkey")))
        .aggregate("n", AggregateKind::Count);
    let err = QueryEngine::default().evaluate(&source(), &spec).unwrap_err();
    assert!(matches!(err, QueryError::JoinKeyTypeMismatch { .. }));

    let spec = QuerySpec::new("bad", "o", "orders")
        .aggregate("p", AggregateKind::Sum(Measure::Column(col("o", "o_priority"))));
    let err = QueryEngine::default().evaluate(&source(), &spec).unwrap_err();
    assert!(matches!(err, QueryError::TypeMismatch { .. }));
}

#[test]
fn global_aggregate_without_rows_reports_zero() {
    let spec = QuerySpec::new("none", "l", "lineitem")
        .filter(Predicate::compare(col("l", "l_qty"), CmpOp::Gt, 1000i64))
        .aggregate("revenue", AggregateKind::Sum(Measure::Column(col("l", "l_price"))))
        .aggregate("avg_qty", AggregateKind::Avg(Measure::Column(col("l", "l_qty"))));
    let out = QueryEngine::default().evaluate(&source(), &spec).unwrap();
    assert_eq!(out.rows, vec![vec![ResultValue::Float(0.0), ResultValue::Null]]);
}

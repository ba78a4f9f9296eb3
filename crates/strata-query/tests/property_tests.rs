#![cfg(not(target_arch = "wasm32"))]

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use strata_columnar::{ColumnSchema, ColumnType, InMemorySource, Table, TableBuilder, TableOptions, Value};
use strata_query::kernel::{agrees, BatchKernel, LaneWidth, ScalarKernel, SimdKernel};
use strata_query::{
    col, AggregateKind, EngineOptions, JoinSpec, KernelChoice, KernelRunner, KeyExpr, Measure,
    QueryEngine, QuerySpec, Recipe, ResultValue, SortKey,
};

const RECIPES: [Recipe; 4] = [
    Recipe::Product,
    Recipe::DiscountedPrice,
    Recipe::DiscountedCharge,
    Recipe::NetProfit,
];

fn sales_table(rows: &[(u8, i32)], chunk_rows: usize) -> Table {
    let schema = vec![
        ColumnSchema::new("region", ColumnType::Int64),
        ColumnSchema::new("amount", ColumnType::Int64),
    ];
    let mut builder = TableBuilder::new("sales", schema, TableOptions { chunk_rows });
    for &(region, amount) in rows {
        builder
            .append_row(&[Value::Int(i64::from(region)), Value::Int(i64::from(amount))])
            .unwrap();
    }
    builder.finalize()
}

fn totals_by_region() -> QuerySpec {
    QuerySpec::new("totals", "s", "sales")
        .group_by("region", KeyExpr::Column(col("s", "region")))
        .aggregate("total", AggregateKind::Sum(Measure::Column(col("s", "amount"))))
        .aggregate("n", AggregateKind::Count)
        .order_by(SortKey::asc("region"))
}

fn run_kernel(kernel: &dyn BatchKernel, recipe: Recipe, inputs: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let len = inputs.first().map_or(0, Vec::len);
    let mut outputs = vec![vec![0.0; len]; recipe.output_count()];
    let views: Vec<&[f64]> = inputs.iter().map(Vec::as_slice).collect();
    let mut out_views: Vec<&mut [f64]> = outputs.iter_mut().map(Vec::as_mut_slice).collect();
    kernel.apply(recipe, &views, &mut out_views).unwrap();
    outputs
}

proptest! {
    #[test]
    fn grouping_ignores_row_order_and_chunking(
        rows in prop::collection::vec((0u8..6, -1000i32..1000), 0..200),
        chunk_a in 1usize..17,
        chunk_b in 1usize..17,
        seed in any::<u64>(),
    ) {
        let mut shuffled = rows.clone();
        let mut rng = StdRng::seed_from_u64(seed);
        for i in (1..shuffled.len()).rev() {
            shuffled.swap(i, rng.gen_range(0..=i));
        }

        let spec = totals_by_region();
        let a = InMemorySource::new().with_table(sales_table(&rows, chunk_a));
        let b = InMemorySource::new().with_table(sales_table(&shuffled, chunk_b));

        let sequential = QueryEngine::new(EngineOptions::default().with_parallel(false))
            .evaluate(&a, &spec)
            .unwrap();
        let parallel = QueryEngine::new(EngineOptions::default().with_parallel(true))
            .evaluate(&b, &spec)
            .unwrap();

        // Integer-valued sums are exact in any order.
        prop_assert_eq!(&sequential.rows, &parallel.rows);
        let counted: i64 = sequential.rows.iter().filter_map(|r| r[2].as_i64()).sum();
        prop_assert_eq!(counted as usize, rows.len());
    }

    #[test]
    fn join_output_counts_only_matching_pairs(
        build in prop::collection::vec(0i64..8, 0..20),
        probe in prop::collection::vec(0i64..12, 0..40),
    ) {
        let keys = |name: &str, values: &[i64]| {
            let mut builder = TableBuilder::new(
                name,
                vec![ColumnSchema::new("k", ColumnType::Int64)],
                TableOptions { chunk_rows: 3 },
            );
            for &v in values {
                builder.append_row(&[Value::Int(v)]).unwrap();
            }
            builder.finalize()
        };
        let source = InMemorySource::new()
            .with_table(keys("dim", &build))
            .with_table(keys("fact", &probe));
        let spec = QuerySpec::new("pairs", "f", "fact")
            .join(JoinSpec::inner("d", "dim").on("k", col("f", "k")))
            .aggregate("n", AggregateKind::Count);

        let out = QueryEngine::default().evaluate(&source, &spec).unwrap();
        let expected = probe
            .iter()
            .map(|p| build.iter().filter(|b| *b == p).count())
            .sum::<usize>();
        prop_assert_eq!(&out.rows, &vec![vec![ResultValue::Int(expected as i64)]]);
        prop_assert_eq!(out.report.rows_joined, expected);
    }

    #[test]
    fn simd_kernels_agree_with_scalar_reference(len in 0usize..67, seed in any::<u64>()) {
        let mut rng = StdRng::seed_from_u64(seed);
        for recipe in RECIPES {
            let inputs: Vec<Vec<f64>> = (0..recipe.input_count())
                .map(|i| {
                    (0..len)
                        .map(|_| match i {
                            // Discounts and taxes are small fractions.
                            1 | 2 => rng.gen_range(0.0..0.1),
                            _ => rng.gen_range(-1.0e6..1.0e6),
                        })
                        .collect()
                })
                .collect();

            let expected = run_kernel(&ScalarKernel, recipe, &inputs);
            for width in [LaneWidth::Two, LaneWidth::Four] {
                let actual = run_kernel(&SimdKernel::with_lanes(width), recipe, &inputs);
                for (e, a) in expected.iter().zip(&actual) {
                    prop_assert_eq!(e.len(), len);
                    for (x, y) in e.iter().zip(a) {
                        prop_assert!(agrees(*x, *y), "{:?} {:?}: {} vs {}", recipe, width, x, y);
                    }
                }
            }
        }
    }

    #[test]
    fn verified_runner_reports_no_divergence(len in 0usize..300, batch in 1usize..64, seed in any::<u64>()) {
        let mut rng = StdRng::seed_from_u64(seed);
        let inputs: Vec<Vec<f64>> = (0..4)
            .map(|_| (0..len).map(|_| rng.gen_range(0.0..1000.0)).collect())
            .collect();
        let views: Vec<&[f64]> = inputs.iter().map(Vec::as_slice).collect();

        let mut runner = KernelRunner::new(KernelChoice::Verified, batch);
        let mut outputs = vec![Vec::new()];
        let divergences = runner.run(Recipe::NetProfit, &views, &mut outputs).unwrap();
        prop_assert!(divergences.is_empty());
        prop_assert_eq!(outputs[0].len(), len);
    }
}

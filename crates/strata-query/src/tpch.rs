//! TPC-H queries expressed as [`QuerySpec`]s.
//!
//! Column and table names follow the TPC-H schema (`lineitem`, `orders`,
//! `part`, `partsupp`, `supplier`, `nation`). Parameter defaults are the
//! validation values from the TPC-H benchmark.

use crate::kernel::Recipe;
use crate::plan::{col, AggregateKind, JoinSpec, KeyExpr, Measure, QuerySpec};
use crate::predicate::{CmpOp, Predicate};
use crate::projector::SortKey;
use chrono::NaiveDate;
use strata_columnar::DecimalValue;

fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default()
}

/// Pricing summary report.
#[derive(Clone, Debug, PartialEq)]
pub struct Q1Params {
    /// Inclusive upper bound on `l_shipdate` (1998-12-01 minus DELTA days).
    pub ship_cutoff: NaiveDate,
}

impl Default for Q1Params {
    fn default() -> Self {
        Self {
            ship_cutoff: ymd(1998, 9, 2),
        }
    }
}

pub fn q1(params: &Q1Params) -> QuerySpec {
    let l = |c: &str| col("l", c);
    let sum = |c: &str| AggregateKind::Sum(Measure::Column(l(c)));
    let avg = |c: &str| AggregateKind::Avg(Measure::Column(l(c)));

    QuerySpec::new("q1", "l", "lineitem")
        .filter(Predicate::compare(l("l_shipdate"), CmpOp::Le, params.ship_cutoff))
        .derive(
            &["disc_price", "charge"],
            Recipe::DiscountedCharge,
            vec![l("l_extendedprice"), l("l_discount"), l("l_tax")],
        )
        .group_by("l_returnflag", KeyExpr::Column(l("l_returnflag")))
        .group_by("l_linestatus", KeyExpr::Column(l("l_linestatus")))
        .aggregate("sum_qty", sum("l_quantity"))
        .aggregate("sum_base_price", sum("l_extendedprice"))
        .aggregate(
            "sum_disc_price",
            AggregateKind::Sum(Measure::Derived("disc_price".into())),
        )
        .aggregate("sum_charge", AggregateKind::Sum(Measure::Derived("charge".into())))
        .aggregate("avg_qty", avg("l_quantity"))
        .aggregate("avg_price", avg("l_extendedprice"))
        .aggregate("avg_disc", avg("l_discount"))
        .aggregate("count_order", AggregateKind::Count)
        .order_by(SortKey::asc("l_returnflag"))
        .order_by(SortKey::asc("l_linestatus"))
}

/// Order priority checking: orders with at least one late line item.
#[derive(Clone, Debug, PartialEq)]
pub struct Q4Params {
    pub start: NaiveDate,
    /// Exclusive.
    pub end: NaiveDate,
}

impl Default for Q4Params {
    fn default() -> Self {
        Self {
            start: ymd(1993, 7, 1),
            end: ymd(1993, 10, 1),
        }
    }
}

pub fn q4(params: &Q4Params) -> QuerySpec {
    QuerySpec::new("q4", "o", "orders")
        .filter(Predicate::range(col("o", "o_orderdate"), params.start, params.end))
        .join(
            JoinSpec::semi("l", "lineitem")
                .on("l_orderkey", col("o", "o_orderkey"))
                .filter(Predicate::columns(
                    col("l", "l_commitdate"),
                    CmpOp::Lt,
                    col("l", "l_receiptdate"),
                )),
        )
        .group_by("o_orderpriority", KeyExpr::Column(col("o", "o_orderpriority")))
        .aggregate("order_count", AggregateKind::Count)
        .order_by(SortKey::asc("o_orderpriority"))
}

/// Forecasting revenue change.
#[derive(Clone, Debug, PartialEq)]
pub struct Q6Params {
    pub start: NaiveDate,
    /// Exclusive.
    pub end: NaiveDate,
    pub min_discount: DecimalValue,
    pub max_discount: DecimalValue,
    /// Exclusive.
    pub max_quantity: i64,
}

impl Default for Q6Params {
    fn default() -> Self {
        Self {
            start: ymd(1994, 1, 1),
            end: ymd(1995, 1, 1),
            min_discount: DecimalValue::new(5, 2),
            max_discount: DecimalValue::new(7, 2),
            max_quantity: 24,
        }
    }
}

pub fn q6(params: &Q6Params) -> QuerySpec {
    let l = |c: &str| col("l", c);
    QuerySpec::new("q6", "l", "lineitem")
        .filter(Predicate::and([
            Predicate::range(l("l_shipdate"), params.start, params.end),
            Predicate::between(l("l_discount"), params.min_discount, params.max_discount),
            Predicate::compare(l("l_quantity"), CmpOp::Lt, params.max_quantity),
        ]))
        .derive(
            &["revenue"],
            Recipe::Product,
            vec![l("l_extendedprice"), l("l_discount")],
        )
        .aggregate("revenue", AggregateKind::Sum(Measure::Derived("revenue".into())))
}

/// Product type profit measure.
#[derive(Clone, Debug, PartialEq)]
pub struct Q9Params {
    /// Substring of `p_name`.
    pub color: String,
}

impl Default for Q9Params {
    fn default() -> Self {
        Self {
            color: "green".to_owned(),
        }
    }
}

pub fn q9(params: &Q9Params) -> QuerySpec {
    let l = |c: &str| col("l", c);
    QuerySpec::new("q9", "l", "lineitem")
        .join(
            JoinSpec::semi("p", "part")
                .on("p_partkey", l("l_partkey"))
                .filter(Predicate::contains(col("p", "p_name"), &params.color)),
        )
        .join(
            JoinSpec::inner("ps", "partsupp")
                .on("ps_partkey", l("l_partkey"))
                .on("ps_suppkey", l("l_suppkey")),
        )
        .join(JoinSpec::inner("o", "orders").on("o_orderkey", l("l_orderkey")))
        .join(JoinSpec::inner("s", "supplier").on("s_suppkey", l("l_suppkey")))
        .join(JoinSpec::inner("n", "nation").on("n_nationkey", col("s", "s_nationkey")))
        .derive(
            &["amount"],
            Recipe::NetProfit,
            vec![
                l("l_extendedprice"),
                l("l_discount"),
                col("ps", "ps_supplycost"),
                l("l_quantity"),
            ],
        )
        .group_by("nation", KeyExpr::Column(col("n", "n_name")))
        .group_by("o_year", KeyExpr::Year(col("o", "o_orderdate")))
        .aggregate("sum_profit", AggregateKind::Sum(Measure::Derived("amount".into())))
        .order_by(SortKey::asc("nation"))
        .order_by(SortKey::desc("o_year"))
}

/// Shipping modes and order priority.
#[derive(Clone, Debug, PartialEq)]
pub struct Q12Params {
    pub ship_modes: Vec<String>,
    pub start: NaiveDate,
    /// Exclusive.
    pub end: NaiveDate,
}

impl Default for Q12Params {
    fn default() -> Self {
        Self {
            ship_modes: vec!["MAIL".to_owned(), "SHIP".to_owned()],
            start: ymd(1994, 1, 1),
            end: ymd(1995, 1, 1),
        }
    }
}

const HIGH_PRIORITIES: [&str; 2] = ["1-URGENT", "2-HIGH"];

pub fn q12(params: &Q12Params) -> QuerySpec {
    let l = |c: &str| col("l", c);
    let priority = || col("o", "o_orderpriority");
    QuerySpec::new("q12", "l", "lineitem")
        .filter(Predicate::and([
            Predicate::in_set(l("l_shipmode"), params.ship_modes.iter().map(String::as_str)),
            Predicate::columns(l("l_commitdate"), CmpOp::Lt, l("l_receiptdate")),
            Predicate::columns(l("l_shipdate"), CmpOp::Lt, l("l_commitdate")),
            Predicate::range(l("l_receiptdate"), params.start, params.end),
        ]))
        .join(JoinSpec::inner("o", "orders").on("o_orderkey", l("l_orderkey")))
        .group_by("l_shipmode", KeyExpr::Column(l("l_shipmode")))
        .aggregate(
            "high_line_count",
            AggregateKind::CountWhere(Predicate::in_set(priority(), HIGH_PRIORITIES)),
        )
        .aggregate(
            "low_line_count",
            AggregateKind::CountWhere(Predicate::not_in_set(priority(), HIGH_PRIORITIES)),
        )
        .order_by(SortKey::asc("l_shipmode"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_query_is_well_formed() {
        for spec in [
            q1(&Q1Params::default()),
            q4(&Q4Params::default()),
            q6(&Q6Params::default()),
            q9(&Q9Params::default()),
            q12(&Q12Params::default()),
        ] {
            spec.validate().unwrap();
        }
    }

    #[test]
    fn q9_reads_only_what_it_needs() {
        let required = q9(&Q9Params::default()).required_columns();
        let part = required.iter().find(|(alias, _)| alias == "p").unwrap();
        assert_eq!(part.1, vec!["p_name".to_owned(), "p_partkey".to_owned()]);
        let nation = required.iter().find(|(alias, _)| alias == "n").unwrap();
        assert_eq!(nation.1, vec!["n_name".to_owned(), "n_nationkey".to_owned()]);
    }
}

//! Declarative query configuration.
//!
//! A [`QuerySpec`] describes one filter → join → group → sort evaluation. The
//! pipeline derives everything else (required columns, accumulator layout,
//! kernel batches) from it.

use crate::error::{QueryError, QueryResult};
use crate::kernel::Recipe;
use crate::predicate::Predicate;
use crate::projector::SortKey;
use std::collections::HashSet;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    /// Relation alias, as declared in the query.
    pub relation: String,
    pub column: String,
}

impl std::fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.relation, self.column)
    }
}

pub fn col(relation: &str, column: &str) -> ColumnRef {
    ColumnRef {
        relation: relation.to_owned(),
        column: column.to_owned(),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationSpec {
    pub alias: String,
    pub table: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinKind {
    /// Every matching build row yields one joined row; its columns become visible.
    Inner,
    /// The probe row survives once if any build row matches; no build columns are visible.
    Semi,
}

#[derive(Clone, Debug, PartialEq)]
pub struct JoinSpec {
    pub alias: String,
    pub table: String,
    pub kind: JoinKind,
    /// Columns of the joined table, matched positionally with `probe_keys`.
    pub build_keys: Vec<String>,
    /// Columns of the fact relation or of an earlier inner join.
    pub probe_keys: Vec<ColumnRef>,
    /// Build-side filter over the joined table only.
    pub filter: Predicate,
}

impl JoinSpec {
    pub fn new(kind: JoinKind, alias: &str, table: &str) -> Self {
        Self {
            alias: alias.to_owned(),
            table: table.to_owned(),
            kind,
            build_keys: Vec::new(),
            probe_keys: Vec::new(),
            filter: Predicate::always(),
        }
    }

    pub fn inner(alias: &str, table: &str) -> Self {
        Self::new(JoinKind::Inner, alias, table)
    }

    pub fn semi(alias: &str, table: &str) -> Self {
        Self::new(JoinKind::Semi, alias, table)
    }

    /// Adds one key component: `self.alias.build_column = probe`.
    pub fn on(mut self, build_column: &str, probe: ColumnRef) -> Self {
        self.build_keys.push(build_column.to_owned());
        self.probe_keys.push(probe);
        self
    }

    pub fn filter(mut self, filter: Predicate) -> Self {
        self.filter = filter;
        self
    }
}

/// Per-row arithmetic evaluated in batches by a kernel.
#[derive(Clone, Debug, PartialEq)]
pub struct DerivedSpec {
    pub outputs: Vec<String>,
    pub recipe: Recipe,
    pub inputs: Vec<ColumnRef>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum KeyExpr {
    Column(ColumnRef),
    /// Calendar year of a date column.
    Year(ColumnRef),
}

impl KeyExpr {
    pub fn column(&self) -> &ColumnRef {
        match self {
            KeyExpr::Column(c) | KeyExpr::Year(c) => c,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GroupKeySpec {
    pub name: String,
    pub expr: KeyExpr,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Measure {
    /// A numeric column; decimals are decoded to floats.
    Column(ColumnRef),
    /// A named output of a [`DerivedSpec`].
    Derived(String),
    /// The constant 1.
    One,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AggregateKind {
    Sum(Measure),
    Avg(Measure),
    Count,
    /// Counts rows for which the predicate holds.
    CountWhere(Predicate),
}

#[derive(Clone, Debug, PartialEq)]
pub struct AggregateSpec {
    pub name: String,
    pub kind: AggregateKind,
}

#[derive(Clone, Debug, PartialEq)]
pub struct QuerySpec {
    pub name: String,
    pub fact: RelationSpec,
    pub filter: Predicate,
    pub joins: Vec<JoinSpec>,
    pub derived: Vec<DerivedSpec>,
    pub group_by: Vec<GroupKeySpec>,
    pub aggregates: Vec<AggregateSpec>,
    pub order_by: Vec<SortKey>,
}

impl QuerySpec {
    pub fn new(name: &str, fact_alias: &str, fact_table: &str) -> Self {
        Self {
            name: name.to_owned(),
            fact: RelationSpec {
                alias: fact_alias.to_owned(),
                table: fact_table.to_owned(),
            },
            filter: Predicate::always(),
            joins: Vec::new(),
            derived: Vec::new(),
            group_by: Vec::new(),
            aggregates: Vec::new(),
            order_by: Vec::new(),
        }
    }

    pub fn filter(mut self, filter: Predicate) -> Self {
        self.filter = filter;
        self
    }

    pub fn join(mut self, join: JoinSpec) -> Self {
        self.joins.push(join);
        self
    }

    pub fn derive(mut self, outputs: &[&str], recipe: Recipe, inputs: Vec<ColumnRef>) -> Self {
        self.derived.push(DerivedSpec {
            outputs: outputs.iter().map(|s| (*s).to_owned()).collect(),
            recipe,
            inputs,
        });
        self
    }

    pub fn group_by(mut self, name: &str, expr: KeyExpr) -> Self {
        self.group_by.push(GroupKeySpec {
            name: name.to_owned(),
            expr,
        });
        self
    }

    pub fn aggregate(mut self, name: &str, kind: AggregateKind) -> Self {
        self.aggregates.push(AggregateSpec {
            name: name.to_owned(),
            kind,
        });
        self
    }

    pub fn order_by(mut self, key: SortKey) -> Self {
        self.order_by.push(key);
        self
    }

    /// Group key names followed by aggregate names.
    pub fn output_columns(&self) -> Vec<String> {
        self.group_by
            .iter()
            .map(|g| g.name.clone())
            .chain(self.aggregates.iter().map(|a| a.name.clone()))
            .collect()
    }

    fn invalid(&self, reason: impl Into<String>) -> QueryError {
        QueryError::InvalidQuery {
            query: self.name.clone(),
            reason: reason.into(),
        }
    }

    /// Structural checks that need no table metadata.
    pub fn validate(&self) -> QueryResult<()> {
        let mut aliases = HashSet::new();
        for alias in std::iter::once(&self.fact.alias).chain(self.joins.iter().map(|j| &j.alias)) {
            if !aliases.insert(alias.as_str()) {
                return Err(QueryError::DuplicateRelation(alias.clone()));
            }
        }

        for join in &self.joins {
            if join.build_keys.is_empty() || join.build_keys.len() != join.probe_keys.len() {
                return Err(self.invalid(format!(
                    "join {} needs matching non-empty build and probe keys",
                    join.alias
                )));
            }
        }

        let mut derived_names = HashSet::new();
        for derived in &self.derived {
            if derived.inputs.len() != derived.recipe.input_count()
                || derived.outputs.len() != derived.recipe.output_count()
            {
                return Err(self.invalid(format!(
                    "{:?} takes {} inputs and yields {} outputs",
                    derived.recipe,
                    derived.recipe.input_count(),
                    derived.recipe.output_count()
                )));
            }
            for name in &derived.outputs {
                if !derived_names.insert(name.as_str()) {
                    return Err(self.invalid(format!("derived value {name} defined twice")));
                }
            }
        }

        let mut outputs = HashSet::new();
        for name in self.output_columns() {
            if !outputs.insert(name.clone()) {
                return Err(self.invalid(format!("output column {name} defined twice")));
            }
        }

        for aggregate in &self.aggregates {
            if let AggregateKind::Sum(Measure::Derived(name))
            | AggregateKind::Avg(Measure::Derived(name)) = &aggregate.kind
            {
                if !derived_names.contains(name.as_str()) {
                    return Err(QueryError::UnknownDerived(name.clone()));
                }
            }
        }
        Ok(())
    }

    /// Columns each relation must supply, keyed by alias, in first-use order.
    pub fn required_columns(&self) -> Vec<(String, Vec<String>)> {
        let mut out: Vec<(String, Vec<String>)> = std::iter::once(&self.fact.alias)
            .chain(self.joins.iter().map(|j| &j.alias))
            .map(|alias| (alias.clone(), Vec::new()))
            .collect();

        let mut add = |c: &ColumnRef| {
            if let Some((_, cols)) = out.iter_mut().find(|(alias, _)| *alias == c.relation) {
                if !cols.contains(&c.column) {
                    cols.push(c.column.clone());
                }
            }
        };

        let mut refs = Vec::new();
        self.filter.referenced_columns(&mut refs);
        for join in &self.joins {
            join.filter.referenced_columns(&mut refs);
            refs.extend(join.probe_keys.iter());
        }
        for derived in &self.derived {
            refs.extend(derived.inputs.iter());
        }
        for key in &self.group_by {
            refs.push(key.expr.column());
        }
        for aggregate in &self.aggregates {
            match &aggregate.kind {
                AggregateKind::Sum(Measure::Column(c)) | AggregateKind::Avg(Measure::Column(c)) => {
                    refs.push(c)
                }
                AggregateKind::CountWhere(p) => p.referenced_columns(&mut refs),
                _ => {}
            }
        }
        for c in refs {
            add(c);
        }

        // Build keys are named without an alias.
        for join in &self.joins {
            for key in &join.build_keys {
                add(&col(&join.alias, key));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::CmpOp;
    use pretty_assertions::assert_eq;

    #[test]
    fn required_columns_cover_every_reference() {
        let spec = QuerySpec::new("q", "l", "lineitem")
            .filter(Predicate::compare(col("l", "l_quantity"), CmpOp::Lt, 24i64))
            .join(
                JoinSpec::inner("o", "orders")
                    .on("o_orderkey", col("l", "l_orderkey"))
                    .filter(Predicate::in_set(col("o", "o_orderpriority"), ["1-URGENT"])),
            )
            .derive(
                &["revenue"],
                Recipe::Product,
                vec![col("l", "l_extendedprice"), col("l", "l_discount")],
            )
            .group_by("mode", KeyExpr::Column(col("l", "l_shipmode")))
            .aggregate("revenue", AggregateKind::Sum(Measure::Derived("revenue".into())));

        assert_eq!(
            spec.required_columns(),
            vec![
                (
                    "l".to_owned(),
                    vec![
                        "l_quantity".to_owned(),
                        "l_orderkey".to_owned(),
                        "l_extendedprice".to_owned(),
                        "l_discount".to_owned(),
                        "l_shipmode".to_owned(),
                    ]
                ),
                (
                    "o".to_owned(),
                    vec!["o_orderpriority".to_owned(), "o_orderkey".to_owned()]
                ),
            ]
        );
        spec.validate().unwrap();
    }

    #[test]
    fn validate_rejects_inconsistent_shapes() {
        let spec = QuerySpec::new("q", "l", "lineitem")
            .derive(&["x"], Recipe::Product, vec![col("l", "a")]);
        assert!(matches!(spec.validate(), Err(QueryError::InvalidQuery { .. })));

        let spec = QuerySpec::new("q", "l", "lineitem").join(JoinSpec::inner("l", "orders").on("k", col("l", "k")));
        assert!(matches!(spec.validate(), Err(QueryError::DuplicateRelation(_))));

        let spec = QuerySpec::new("q", "l", "lineitem")
            .aggregate("x", AggregateKind::Sum(Measure::Derived("nope".into())));
        assert!(matches!(spec.validate(), Err(QueryError::UnknownDerived(_))));
    }
}

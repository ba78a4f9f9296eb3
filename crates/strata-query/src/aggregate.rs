//! Hash grouping with additive accumulators.
//!
//! Groups live in a flat arena: `keys[g]` and `values[g * width..][..width]`.
//! Only sums are accumulated; averages and counts are derived in
//! [`GroupAggregator::finalize`], so partial aggregators merge exactly.

use crate::error::{QueryError, QueryResult};
use crate::key::GroupKey;
use crate::projector::{FinalizedGroups, ResultValue};
use ahash::AHashMap;

/// How a finalized output column is computed from accumulators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputKind {
    Sum(usize),
    /// An accumulator that only ever received whole increments.
    Count(usize),
    /// `sum / count`; null when `count` is zero.
    Average { sum: usize, count: usize },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputField {
    pub name: String,
    pub kind: OutputKind,
}

impl OutputField {
    pub fn sum(name: &str, acc: usize) -> Self {
        Self {
            name: name.to_owned(),
            kind: OutputKind::Sum(acc),
        }
    }

    pub fn count(name: &str, acc: usize) -> Self {
        Self {
            name: name.to_owned(),
            kind: OutputKind::Count(acc),
        }
    }

    pub fn average(name: &str, sum: usize, count: usize) -> Self {
        Self {
            name: name.to_owned(),
            kind: OutputKind::Average { sum, count },
        }
    }
}

#[derive(Clone, Debug)]
pub struct GroupAggregator {
    key_arity: usize,
    accumulators: Vec<String>,
    index: AHashMap<GroupKey, usize>,
    keys: Vec<GroupKey>,
    values: Vec<f64>,
}

impl GroupAggregator {
    /// A zero-arity aggregator starts with its single group already present,
    /// so a global aggregate reports zeros when no row qualifies.
    pub fn new<S: Into<String>>(key_arity: usize, accumulators: impl IntoIterator<Item = S>) -> Self {
        let mut agg = Self {
            key_arity,
            accumulators: accumulators.into_iter().map(Into::into).collect(),
            index: AHashMap::new(),
            keys: Vec::new(),
            values: Vec::new(),
        };
        if key_arity == 0 {
            agg.group_slot(&GroupKey::new());
        }
        agg
    }

    pub fn key_arity(&self) -> usize {
        self.key_arity
    }

    pub fn accumulator_names(&self) -> &[String] {
        &self.accumulators
    }

    pub fn accumulator_index(&self, name: &str) -> Option<usize> {
        self.accumulators.iter().position(|a| a == name)
    }

    /// Number of groups seen so far.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn get(&self, key: &GroupKey) -> Option<&[f64]> {
        let width = self.accumulators.len();
        self.index
            .get(key)
            .map(|&g| &self.values[g * width..(g + 1) * width])
    }

    fn group_slot(&mut self, key: &GroupKey) -> usize {
        if let Some(&g) = self.index.get(key) {
            return g;
        }
        let g = self.keys.len();
        self.keys.push(key.clone());
        self.index.insert(key.clone(), g);
        self.values
            .extend(std::iter::repeat(0.0).take(self.accumulators.len()));
        g
    }

    fn check_key(&self, key: &GroupKey) -> QueryResult<()> {
        if key.len() != self.key_arity {
            return Err(QueryError::KeyArity {
                expected: self.key_arity,
                actual: key.len(),
            });
        }
        Ok(())
    }

    /// Adds one delta per accumulator, creating the group on first sight.
    pub fn update(&mut self, key: &GroupKey, deltas: &[f64]) -> QueryResult<()> {
        self.check_key(key)?;
        let width = self.accumulators.len();
        if deltas.len() != width {
            return Err(QueryError::AggregatorMismatch);
        }
        let g = self.group_slot(key);
        for (acc, delta) in self.values[g * width..(g + 1) * width].iter_mut().zip(deltas) {
            *acc += delta;
        }
        Ok(())
    }

    /// Adds deltas to the named accumulators; the others are left untouched.
    pub fn update_named(&mut self, key: &GroupKey, deltas: &[(&str, f64)]) -> QueryResult<()> {
        self.check_key(key)?;
        let positions = deltas
            .iter()
            .map(|(name, delta)| {
                self.accumulator_index(name)
                    .map(|i| (i, *delta))
                    .ok_or_else(|| QueryError::UnknownField((*name).to_owned()))
            })
            .collect::<QueryResult<Vec<_>>>()?;

        let width = self.accumulators.len();
        let g = self.group_slot(key);
        for (i, delta) in positions {
            self.values[g * width + i] += delta;
        }
        Ok(())
    }

    /// Folds `other` into `self`. Addition makes this commutative and
    /// associative up to floating-point rounding.
    pub fn merge(&mut self, other: GroupAggregator) -> QueryResult<()> {
        if other.key_arity != self.key_arity || other.accumulators != self.accumulators {
            return Err(QueryError::AggregatorMismatch);
        }
        let width = self.accumulators.len();
        for (g, key) in other.keys.iter().enumerate() {
            let slot = self.group_slot(key);
            let theirs = &other.values[g * width..(g + 1) * width];
            for (acc, delta) in self.values[slot * width..(slot + 1) * width]
                .iter_mut()
                .zip(theirs)
            {
                *acc += delta;
            }
        }
        Ok(())
    }

    /// Turns every group into a result row: key values followed by `fields`.
    /// Row order is unspecified; sorting is the projector's job.
    pub fn finalize(self, key_names: &[String], fields: &[OutputField]) -> QueryResult<FinalizedGroups> {
        if key_names.len() != self.key_arity {
            return Err(QueryError::KeyArity {
                expected: self.key_arity,
                actual: key_names.len(),
            });
        }
        let width = self.accumulators.len();
        for field in fields {
            let in_range = match field.kind {
                OutputKind::Sum(a) | OutputKind::Count(a) => a < width,
                OutputKind::Average { sum, count } => sum < width && count < width,
            };
            if !in_range {
                return Err(QueryError::UnknownField(field.name.clone()));
            }
        }

        let rows = self
            .keys
            .into_iter()
            .enumerate()
            .map(|(g, key)| {
                let accs = &self.values[g * width..(g + 1) * width];
                key.values()
                    .iter()
                    .map(ResultValue::from)
                    .chain(fields.iter().map(|f| match f.kind {
                        OutputKind::Sum(a) => ResultValue::Float(accs[a]),
                        OutputKind::Count(a) => ResultValue::Int(accs[a].round() as i64),
                        OutputKind::Average { sum, count } if accs[count] != 0.0 => {
                            ResultValue::Float(accs[sum] / accs[count])
                        }
                        OutputKind::Average { .. } => ResultValue::Null,
                    }))
                    .collect()
            })
            .collect();

        Ok(FinalizedGroups {
            columns: key_names
                .iter()
                .cloned()
                .chain(fields.iter().map(|f| f.name.clone()))
                .collect(),
            key_len: self.key_arity,
            rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{Key, KeyValue};
    use pretty_assertions::assert_eq;

    fn key(nation: &str, year: i64) -> Key {
        [KeyValue::from(nation), KeyValue::Int(year)].into_iter().collect()
    }

    #[test]
    fn sums_profit_per_nation_year() {
        let mut agg = GroupAggregator::new(2, ["sum_profit"]);
        for amount in [100.0, -20.0, 5.0] {
            agg.update(&key("FRANCE", 1995), &[amount]).unwrap();
        }
        let out = agg
            .finalize(
                &["nation".to_owned(), "o_year".to_owned()],
                &[OutputField::sum("sum_profit", 0)],
            )
            .unwrap();
        assert_eq!(
            out.rows,
            vec![vec![
                ResultValue::Text("FRANCE".into()),
                ResultValue::Int(1995),
                ResultValue::Float(85.0)
            ]]
        );
    }

    #[test]
    fn averages_are_derived_at_finalize() {
        let mut agg = GroupAggregator::new(1, ["qty", "n"]);
        let k = Key::single("A");
        agg.update(&k, &[10.0, 1.0]).unwrap();
        agg.update(&k, &[20.0, 1.0]).unwrap();
        let out = agg
            .finalize(
                &["k".to_owned()],
                &[OutputField::average("avg_qty", 0, 1), OutputField::count("n", 1)],
            )
            .unwrap();
        assert_eq!(out.rows[0][1], ResultValue::Float(15.0));
        assert_eq!(out.rows[0][2], ResultValue::Int(2));
    }

    #[test]
    fn global_aggregate_has_one_group_without_rows() {
        let agg = GroupAggregator::new(0, ["revenue", "n"]);
        let out = agg
            .finalize(
                &[],
                &[OutputField::sum("revenue", 0), OutputField::average("avg", 0, 1)],
            )
            .unwrap();
        assert_eq!(out.rows, vec![vec![ResultValue::Float(0.0), ResultValue::Null]]);
    }

    #[test]
    fn merge_matches_single_pass() {
        let rows = [("A", 1.0), ("B", 2.0), ("A", 3.0), ("C", 4.0), ("B", 5.0)];
        let mut whole = GroupAggregator::new(1, ["v"]);
        for (k, v) in rows {
            whole.update(&Key::single(k), &[v]).unwrap();
        }

        let mut left = GroupAggregator::new(1, ["v"]);
        let mut right = GroupAggregator::new(1, ["v"]);
        for (i, (k, v)) in rows.iter().enumerate() {
            let target = if i % 2 == 0 { &mut left } else { &mut right };
            target.update(&Key::single(*k), &[*v]).unwrap();
        }
        right.merge(left).unwrap();

        for k in ["A", "B", "C"] {
            assert_eq!(whole.get(&Key::single(k)), right.get(&Key::single(k)));
        }
        assert_eq!(right.len(), 3);
    }

    #[test]
    fn arity_and_layout_are_enforced() {
        let mut agg = GroupAggregator::new(2, ["v"]);
        assert!(matches!(
            agg.update(&Key::single("A"), &[1.0]),
            Err(QueryError::KeyArity { expected: 2, actual: 1 })
        ));
        assert!(matches!(
            agg.update_named(&key("A", 1), &[("missing", 1.0)]),
            Err(QueryError::UnknownField(_))
        ));
        let other = GroupAggregator::new(2, ["w"]);
        assert!(matches!(agg.merge(other), Err(QueryError::AggregatorMismatch)));
    }
}

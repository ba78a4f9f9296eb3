//! Evaluation of a [`QuerySpec`] against a table source.
//!
//! Join indices are built first, one stage per join. The fact relation is then
//! scanned once: filter, probe, group-key extraction and accumulation are
//! fused per row, while derived arithmetic is buffered and handed to the
//! kernel in batches. With the `parallel` feature, fact chunks are scanned on
//! the crate's thread pool and the partial aggregators merged.

use crate::aggregate::{GroupAggregator, OutputField};
use crate::error::{QueryError, QueryResult};
use crate::join::{extract_key, HashJoinIndex, JoinBuildStats};
use crate::kernel::{KernelDivergence, KernelRunner, Recipe};
use crate::key::{GroupKey, KeyValue};
use crate::options::{AbortHandle, EngineOptions};
use crate::plan::{AggregateKind, JoinKind, KeyExpr, Measure, QuerySpec};
use crate::predicate::BoundPredicate;
use crate::projector::{self, ResultRow, ResultValue};
use crate::scope::{BoundColumn, RowCursor, Scope};
use log::{debug, trace};
use smallvec::SmallVec;
use std::sync::Arc;
use strata_columnar::{date, Chunk, ColumnType, ColumnarTableSource, Table};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Scanning,
    Filtering,
    Joining,
    Aggregating,
    Finalizing,
    Sorted,
    Done,
    Failed,
}

impl Stage {
    fn rank(self) -> u8 {
        match self {
            Stage::Scanning => 0,
            Stage::Filtering => 1,
            Stage::Joining => 2,
            Stage::Aggregating => 3,
            Stage::Finalizing => 4,
            Stage::Sorted => 5,
            Stage::Done => 6,
            Stage::Failed => 7,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    /// Stages only move forward. `Joining` repeats once per join stage, and
    /// any live stage may fail.
    pub fn can_advance_to(self, next: Stage) -> bool {
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Stage::Failed) => true,
            (Stage::Joining, Stage::Joining) => true,
            (from, to) => to.rank() > from.rank(),
        }
    }
}

/// Counters and diagnostics collected during one evaluation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EvaluationReport {
    pub query: String,
    pub rows_scanned: usize,
    /// Fact rows that passed the fact filter.
    pub rows_qualified: usize,
    /// Rows that survived every join stage.
    pub rows_joined: usize,
    /// Rows that contributed to a group.
    pub rows_aggregated: usize,
    pub groups: usize,
    pub kernel_batches: usize,
    pub divergences: Vec<KernelDivergence>,
    pub join_builds: Vec<(String, JoinBuildStats)>,
    pub stages: Vec<Stage>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<ResultRow>,
    pub report: EvaluationReport,
}

impl QueryOutput {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&ResultValue> {
        let col = self.column_index(column)?;
        self.rows.get(row)?.get(col)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
pub struct QueryEngine {
    options: EngineOptions,
}

impl QueryEngine {
    pub fn new(options: EngineOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn evaluate(&self, source: &dyn ColumnarTableSource, spec: &QuerySpec) -> QueryResult<QueryOutput> {
        Evaluation::new(spec, self.options.clone()).run(source)
    }
}

/// One evaluation context. Owns the join indices and aggregator for the
/// duration of [`Evaluation::run`]; they are dropped once rows are projected.
#[derive(Debug)]
pub struct Evaluation<'q> {
    spec: &'q QuerySpec,
    options: EngineOptions,
    stage: Stage,
    started: bool,
    report: EvaluationReport,
}

impl<'q> Evaluation<'q> {
    pub fn new(spec: &'q QuerySpec, options: EngineOptions) -> Self {
        Self {
            spec,
            options,
            stage: Stage::Scanning,
            started: false,
            report: EvaluationReport {
                query: spec.name.clone(),
                stages: vec![Stage::Scanning],
                ..EvaluationReport::default()
            },
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn report(&self) -> &EvaluationReport {
        &self.report
    }

    /// Runs the evaluation to completion. Any error moves it to
    /// [`Stage::Failed`]; an evaluation runs at most once.
    pub fn run(&mut self, source: &dyn ColumnarTableSource) -> QueryResult<QueryOutput> {
        if self.started {
            return Err(QueryError::StageTransition {
                from: self.stage,
                to: Stage::Scanning,
            });
        }
        self.started = true;

        match self.run_stages(source) {
            Ok(output) => Ok(output),
            Err(err) => {
                debug!("{}: failed in {:?}: {err}", self.spec.name, self.stage);
                self.stage = Stage::Failed;
                self.report.stages.push(Stage::Failed);
                Err(err)
            }
        }
    }

    fn advance(&mut self, next: Stage) -> QueryResult<()> {
        if !self.stage.can_advance_to(next) {
            return Err(QueryError::StageTransition {
                from: self.stage,
                to: next,
            });
        }
        debug!("{}: {:?} -> {:?}", self.spec.name, self.stage, next);
        self.stage = next;
        self.report.stages.push(next);
        Ok(())
    }

    fn check_abort(&self) -> QueryResult<()> {
        if self.options.abort.as_ref().is_some_and(AbortHandle::is_aborted) {
            return Err(QueryError::Aborted);
        }
        Ok(())
    }

    fn run_stages(&mut self, source: &dyn ColumnarTableSource) -> QueryResult<QueryOutput> {
        let spec = self.spec;
        spec.validate()?;
        let policy = self.options.decimal_policy();

        // Scanning: fetch every relation with only the columns it must supply.
        let mut tables: Vec<(String, Arc<Table>)> = Vec::new();
        for (alias, columns) in spec.required_columns() {
            let name = if alias == spec.fact.alias {
                &spec.fact.table
            } else {
                match spec.joins.iter().find(|j| j.alias == alias) {
                    Some(join) => &join.table,
                    None => return Err(QueryError::UnknownRelation(alias)),
                }
            };
            let wanted: Vec<&str> = columns.iter().map(String::as_str).collect();
            let table = source.load_table(name, &wanted)?;
            debug!(
                "{}: loaded {name} as {alias}: {} rows in {} chunks, {} columns",
                spec.name,
                table.row_count(),
                table.chunks().len(),
                table.column_count()
            );
            tables.push((alias, table));
        }
        let table_for = |alias: &str| -> QueryResult<Arc<Table>> {
            tables
                .iter()
                .find(|(a, _)| a == alias)
                .map(|(_, t)| t.clone())
                .ok_or_else(|| QueryError::UnknownRelation(alias.to_owned()))
        };

        self.advance(Stage::Filtering)?;
        let fact = table_for(&spec.fact.alias)?;
        let mut scope = Scope::new(policy);
        scope.push(spec.fact.alias.clone(), fact.clone())?;
        let filter = bind_optional(&spec.filter, &scope)?;

        let mut joins = Vec::with_capacity(spec.joins.len());
        for join in &spec.joins {
            self.advance(Stage::Joining)?;
            self.check_abort()?;

            let table = table_for(&join.alias)?;
            let build_scope = Scope::single(join.alias.clone(), table.clone(), policy)?;
            let build_filter = bind_optional(&join.filter, &build_scope)?;
            let build_keys = join
                .build_keys
                .iter()
                .map(|c| build_scope.resolve(&join.alias, c))
                .collect::<QueryResult<Vec<_>>>()?;
            let probe_keys = join
                .probe_keys
                .iter()
                .map(|c| scope.resolve(&c.relation, &c.column))
                .collect::<QueryResult<Vec<_>>>()?;
            for (build, probe) in build_keys.iter().zip(&probe_keys) {
                if build.key_class() != probe.key_class() {
                    return Err(QueryError::JoinKeyTypeMismatch {
                        relation: join.alias.clone(),
                        build_column: build.name.to_string(),
                        build_type: build.column_type,
                        probe_column: probe.name.to_string(),
                        probe_type: probe.column_type,
                    });
                }
            }

            let index = HashJoinIndex::from_table(&table, &build_keys, build_filter.as_ref());
            let stats = index.build_stats();
            debug!(
                "{}: built {:?} join {}: {} of {} rows indexed, {} distinct keys",
                spec.name, join.kind, join.alias, stats.inserted, stats.scanned, stats.distinct_keys
            );
            self.report.join_builds.push((join.alias.clone(), stats));

            // Only inner joins make build columns visible downstream.
            if join.kind == JoinKind::Inner {
                scope.push(join.alias.clone(), table.clone())?;
            }
            joins.push(BoundJoin {
                kind: join.kind,
                table,
                probe: probe_keys,
                index,
            });
        }

        self.advance(Stage::Aggregating)?;
        let layout = Layout::bind(spec, &scope)?;
        let plan = ScanPlan {
            fact,
            filter,
            joins,
            group_key: layout.group_key,
            accumulators: layout.sources,
            accumulator_names: layout.names,
            derived: layout.derived,
            kernel: self.options.kernel,
            batch_size: self.options.batch_size.max(1),
            abort: self.options.abort.clone(),
        };
        let partial = plan.scan(self.options.parallel)?;
        let counters = partial.counters;
        self.report.rows_scanned = counters.scanned;
        self.report.rows_qualified = counters.qualified;
        self.report.rows_joined = counters.joined;
        self.report.rows_aggregated = counters.aggregated;
        self.report.kernel_batches = counters.kernel_batches;
        self.report.divergences = partial.divergences;
        self.report.groups = partial.aggregator.len();
        debug!(
            "{}: scanned {} rows, {} qualified, {} joined, {} aggregated into {} groups",
            spec.name,
            counters.scanned,
            counters.qualified,
            counters.joined,
            counters.aggregated,
            self.report.groups
        );
        drop(plan);

        self.advance(Stage::Finalizing)?;
        let key_names: Vec<String> = spec.group_by.iter().map(|g| g.name.clone()).collect();
        let groups = partial.aggregator.finalize(&key_names, &layout.fields)?;

        self.advance(Stage::Sorted)?;
        let columns = groups.columns.clone();
        let rows = projector::project(groups, &spec.order_by)?;

        self.advance(Stage::Done)?;
        Ok(QueryOutput {
            columns,
            rows,
            report: self.report.clone(),
        })
    }
}

fn bind_optional(predicate: &crate::predicate::Predicate, scope: &Scope) -> QueryResult<Option<BoundPredicate>> {
    if predicate.is_always() {
        return Ok(None);
    }
    predicate.bind(scope).map(Some)
}

fn numeric(context: &str, column: BoundColumn) -> QueryResult<BoundColumn> {
    if column.column_type.is_numeric() {
        return Ok(column);
    }
    Err(QueryError::TypeMismatch {
        context: context.to_owned(),
        column: column.name.to_string(),
        expected: "a numeric column".to_owned(),
        actual: column.column_type,
    })
}

#[derive(Debug)]
struct BoundJoin {
    kind: JoinKind,
    table: Arc<Table>,
    probe: Vec<BoundColumn>,
    index: HashJoinIndex,
}

#[derive(Debug)]
enum BoundKey {
    Column(BoundColumn),
    Year(BoundColumn),
}

impl BoundKey {
    fn value(&self, row: &[RowCursor<'_>]) -> Option<KeyValue> {
        match self {
            BoundKey::Column(c) => c.key_value(row),
            BoundKey::Year(c) => {
                let (col, offset) = c.chunk_column(row);
                let year = date::year_of(col.date_at(offset)?)?;
                Some(KeyValue::Int(i64::from(year)))
            }
        }
    }
}

/// Where an accumulator's per-row delta comes from.
#[derive(Debug)]
enum Source {
    Column(BoundColumn),
    One,
    /// 1 when the predicate holds. A null in any column it reads drops the row.
    Where {
        predicate: BoundPredicate,
        reads: Vec<BoundColumn>,
    },
    Derived { spec: usize, output: usize },
}

impl Source {
    #[inline]
    fn delta(&self, row: &[RowCursor<'_>]) -> Option<f64> {
        match self {
            Source::Column(c) => c.f64_value(row),
            Source::One => Some(1.0),
            Source::Where { predicate, reads } => {
                if !reads.iter().all(|c| c.is_valid(row)) {
                    return None;
                }
                Some(if predicate.evaluate(row) { 1.0 } else { 0.0 })
            }
            // Filled in once the kernel batch runs.
            Source::Derived { .. } => Some(0.0),
        }
    }
}

#[derive(Debug)]
struct BoundDerived {
    recipe: Recipe,
    inputs: Vec<BoundColumn>,
}

/// Accumulator layout and output fields resolved against the joined scope.
struct Layout {
    group_key: Vec<BoundKey>,
    names: Vec<String>,
    sources: Vec<Source>,
    fields: Vec<OutputField>,
    derived: Vec<BoundDerived>,
}

impl Layout {
    fn bind(spec: &QuerySpec, scope: &Scope) -> QueryResult<Self> {
        let group_key = spec
            .group_by
            .iter()
            .map(|g| match &g.expr {
                KeyExpr::Column(c) => scope.resolve(&c.relation, &c.column).map(BoundKey::Column),
                KeyExpr::Year(c) => {
                    let bound = scope.resolve(&c.relation, &c.column)?;
                    if bound.column_type != ColumnType::Date32 {
                        return Err(QueryError::TypeMismatch {
                            context: format!("group key {}", g.name),
                            column: bound.name.to_string(),
                            expected: "a date column".to_owned(),
                            actual: bound.column_type,
                        });
                    }
                    Ok(BoundKey::Year(bound))
                }
            })
            .collect::<QueryResult<Vec<_>>>()?;

        let derived = spec
            .derived
            .iter()
            .map(|d| {
                let context = format!("{:?} input", d.recipe);
                let inputs = d
                    .inputs
                    .iter()
                    .map(|c| numeric(&context, scope.resolve(&c.relation, &c.column)?))
                    .collect::<QueryResult<Vec<_>>>()?;
                Ok(BoundDerived {
                    recipe: d.recipe,
                    inputs,
                })
            })
            .collect::<QueryResult<Vec<_>>>()?;

        let measure = |name: &str, m: &Measure| -> QueryResult<Source> {
            match m {
                Measure::Column(c) => {
                    let bound = scope.resolve(&c.relation, &c.column)?;
                    Ok(Source::Column(numeric(&format!("aggregate {name}"), bound)?))
                }
                Measure::One => Ok(Source::One),
                Measure::Derived(d) => spec
                    .derived
                    .iter()
                    .enumerate()
                    .find_map(|(s, derived)| {
                        derived
                            .outputs
                            .iter()
                            .position(|o| o == d)
                            .map(|output| Source::Derived { spec: s, output })
                    })
                    .ok_or_else(|| QueryError::UnknownDerived(d.clone())),
            }
        };

        let mut layout = Layout {
            group_key,
            names: Vec::new(),
            sources: Vec::new(),
            fields: Vec::new(),
            derived,
        };
        for aggregate in &spec.aggregates {
            let name = aggregate.name.as_str();
            match &aggregate.kind {
                AggregateKind::Sum(m) => {
                    let acc = layout.push(name.to_owned(), measure(name, m)?);
                    layout.fields.push(OutputField::sum(name, acc));
                }
                AggregateKind::Avg(m) => {
                    let sum = layout.push(format!("{name}.sum"), measure(name, m)?);
                    let count = layout.push(format!("{name}.count"), Source::One);
                    layout.fields.push(OutputField::average(name, sum, count));
                }
                AggregateKind::Count => {
                    let acc = layout.push(name.to_owned(), Source::One);
                    layout.fields.push(OutputField::count(name, acc));
                }
                AggregateKind::CountWhere(p) => {
                    let mut columns = Vec::new();
                    p.referenced_columns(&mut columns);
                    let reads = columns
                        .into_iter()
                        .map(|c| scope.resolve(&c.relation, &c.column))
                        .collect::<QueryResult<Vec<_>>>()?;
                    let source = Source::Where {
                        predicate: p.bind(scope)?,
                        reads,
                    };
                    let acc = layout.push(name.to_owned(), source);
                    layout.fields.push(OutputField::count(name, acc));
                }
            }
        }
        Ok(layout)
    }

    fn push(&mut self, name: String, source: Source) -> usize {
        self.names.push(name);
        self.sources.push(source);
        self.sources.len() - 1
    }
}

/// Everything the fact scan reads. Shared immutably between workers.
struct ScanPlan {
    fact: Arc<Table>,
    filter: Option<BoundPredicate>,
    joins: Vec<BoundJoin>,
    group_key: Vec<BoundKey>,
    accumulators: Vec<Source>,
    accumulator_names: Vec<String>,
    derived: Vec<BoundDerived>,
    kernel: crate::kernel::KernelChoice,
    batch_size: usize,
    abort: Option<AbortHandle>,
}

impl ScanPlan {
    fn check_abort(&self) -> QueryResult<()> {
        if self.abort.as_ref().is_some_and(AbortHandle::is_aborted) {
            return Err(QueryError::Aborted);
        }
        Ok(())
    }

    fn group_key(&self, row: &[RowCursor<'_>]) -> Option<GroupKey> {
        self.group_key.iter().map(|k| k.value(row)).collect()
    }

    fn scan(&self, parallel: bool) -> QueryResult<Partial> {
        if parallel && self.fact.chunks().len() > 1 {
            if let Some(result) = self.try_scan_parallel() {
                return result;
            }
        }

        let mut worker = Worker::new(self);
        for (i, chunk) in self.fact.chunks().iter().enumerate() {
            self.check_abort()?;
            worker.process(i, chunk)?;
        }
        worker.finish()
    }

    /// `None` when no worker pool is available.
    #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
    fn try_scan_parallel(&self) -> Option<QueryResult<Partial>> {
        use rayon::prelude::*;

        let pool = crate::parallel::scan_pool()?;
        Some(pool.install(|| {
            self.fact
                .chunks()
                .par_iter()
                .enumerate()
                .try_fold(
                    || Worker::new(self),
                    |mut worker, (i, chunk)| {
                        self.check_abort()?;
                        worker.process(i, chunk)?;
                        Ok::<_, QueryError>(worker)
                    },
                )
                .map(|worker| worker.and_then(Worker::finish))
                .try_reduce(|| Partial::empty(self), Partial::merge)
        }))
    }

    #[cfg(not(all(feature = "parallel", not(target_arch = "wasm32"))))]
    fn try_scan_parallel(&self) -> Option<QueryResult<Partial>> {
        None
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct ScanCounters {
    scanned: usize,
    qualified: usize,
    joined: usize,
    aggregated: usize,
    kernel_batches: usize,
}

impl ScanCounters {
    fn add(&mut self, other: ScanCounters) {
        self.scanned += other.scanned;
        self.qualified += other.qualified;
        self.joined += other.joined;
        self.aggregated += other.aggregated;
        self.kernel_batches += other.kernel_batches;
    }
}

/// A worker's result: mergeable in any order.
struct Partial {
    aggregator: GroupAggregator,
    counters: ScanCounters,
    divergences: Vec<KernelDivergence>,
}

impl Partial {
    fn empty(plan: &ScanPlan) -> Self {
        Self {
            aggregator: GroupAggregator::new(plan.group_key.len(), plan.accumulator_names.iter().cloned()),
            counters: ScanCounters::default(),
            divergences: Vec::new(),
        }
    }

    fn merge(mut self, other: Partial) -> QueryResult<Partial> {
        self.aggregator.merge(other.aggregator)?;
        self.counters.add(other.counters);
        self.divergences.extend(other.divergences);
        Ok(self)
    }
}

/// Rows waiting for a kernel batch. `deltas` holds one full accumulator row
/// per pending row; derived slots are overwritten after the kernel runs.
#[derive(Default)]
struct Pending {
    keys: Vec<GroupKey>,
    deltas: Vec<f64>,
    inputs: Vec<Vec<Vec<f64>>>,
    outputs: Vec<Vec<Vec<f64>>>,
}

impl Pending {
    fn new(derived: &[BoundDerived]) -> Self {
        Self {
            keys: Vec::new(),
            deltas: Vec::new(),
            inputs: derived
                .iter()
                .map(|d| vec![Vec::new(); d.recipe.input_count()])
                .collect(),
            outputs: derived
                .iter()
                .map(|d| vec![Vec::new(); d.recipe.output_count()])
                .collect(),
        }
    }

    fn len(&self) -> usize {
        self.keys.len()
    }

    fn clear(&mut self) {
        self.keys.clear();
        self.deltas.clear();
        for column in self.inputs.iter_mut().flatten() {
            column.clear();
        }
    }
}

struct Worker<'p> {
    plan: &'p ScanPlan,
    runner: KernelRunner,
    aggregator: GroupAggregator,
    pending: Pending,
    deltas: SmallVec<[f64; 8]>,
    inputs: SmallVec<[f64; 8]>,
    counters: ScanCounters,
    divergences: Vec<KernelDivergence>,
}

impl<'p> Worker<'p> {
    fn new(plan: &'p ScanPlan) -> Self {
        Self {
            plan,
            runner: KernelRunner::new(plan.kernel, plan.batch_size),
            aggregator: GroupAggregator::new(plan.group_key.len(), plan.accumulator_names.iter().cloned()),
            pending: Pending::new(&plan.derived),
            deltas: SmallVec::new(),
            inputs: SmallVec::new(),
            counters: ScanCounters::default(),
            divergences: Vec::new(),
        }
    }

    fn process(&mut self, index: usize, chunk: &'p Chunk) -> QueryResult<()> {
        let plan = self.plan;
        let before = self.counters;
        let mut row: SmallVec<[RowCursor<'p>; 4]> = SmallVec::new();
        for offset in 0..chunk.len() {
            self.counters.scanned += 1;
            row.clear();
            row.push(RowCursor::new(chunk, offset));
            if plan.filter.as_ref().is_some_and(|f| !f.evaluate(&row)) {
                continue;
            }
            self.counters.qualified += 1;
            self.expand(0, &mut row)?;
        }
        trace!(
            "chunk {index}: {} rows, {} qualified, {} joined",
            chunk.len(),
            self.counters.qualified - before.qualified,
            self.counters.joined - before.joined
        );
        Ok(())
    }

    /// Walks the join stages depth first; each complete combination is one
    /// joined row.
    fn expand(&mut self, stage: usize, row: &mut SmallVec<[RowCursor<'p>; 4]>) -> QueryResult<()> {
        let plan = self.plan;
        let Some(join) = plan.joins.get(stage) else {
            return self.emit(row);
        };
        let Some(key) = extract_key(&join.probe, row) else {
            return Ok(());
        };
        match join.kind {
            JoinKind::Semi if join.index.contains(&key) => self.expand(stage + 1, row),
            JoinKind::Semi => Ok(()),
            JoinKind::Inner => {
                for &matched in join.index.probe(&key) {
                    row.push(RowCursor::at(&join.table, matched));
                    let result = self.expand(stage + 1, row);
                    row.pop();
                    result?;
                }
                Ok(())
            }
        }
    }

    fn emit(&mut self, row: &[RowCursor<'_>]) -> QueryResult<()> {
        let plan = self.plan;
        self.counters.joined += 1;

        let Some(key) = plan.group_key(row) else {
            return Ok(());
        };
        self.deltas.clear();
        for source in &plan.accumulators {
            match source.delta(row) {
                Some(delta) => self.deltas.push(delta),
                None => return Ok(()),
            }
        }

        if plan.derived.is_empty() {
            self.aggregator.update(&key, &self.deltas)?;
            self.counters.aggregated += 1;
            return Ok(());
        }

        self.inputs.clear();
        for derived in &plan.derived {
            for input in &derived.inputs {
                match input.f64_value(row) {
                    Some(v) => self.inputs.push(v),
                    None => return Ok(()),
                }
            }
        }
        // Pending input columns are laid out in the same order.
        for (column, value) in self.pending.inputs.iter_mut().flatten().zip(&self.inputs) {
            column.push(*value);
        }
        self.pending.keys.push(key);
        self.pending.deltas.extend_from_slice(&self.deltas);
        self.counters.aggregated += 1;

        if self.pending.len() >= plan.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> QueryResult<()> {
        let rows = self.pending.len();
        if rows == 0 {
            return Ok(());
        }
        let plan = self.plan;
        for (s, derived) in plan.derived.iter().enumerate() {
            let inputs: SmallVec<[&[f64]; 4]> = self.pending.inputs[s].iter().map(Vec::as_slice).collect();
            let found = self.runner.run(derived.recipe, &inputs, &mut self.pending.outputs[s])?;
            self.divergences.extend(found);
        }
        self.counters.kernel_batches += 1;

        let width = plan.accumulators.len();
        for (a, source) in plan.accumulators.iter().enumerate() {
            if let Source::Derived { spec, output } = *source {
                let computed = &self.pending.outputs[spec][output];
                for (r, value) in computed.iter().enumerate().take(rows) {
                    self.pending.deltas[r * width + a] = *value;
                }
            }
        }
        for (r, key) in self.pending.keys.iter().enumerate() {
            self.aggregator
                .update(key, &self.pending.deltas[r * width..(r + 1) * width])?;
        }
        trace!("kernel batch of {rows} rows");
        self.pending.clear();
        Ok(())
    }

    fn finish(mut self) -> QueryResult<Partial> {
        self.flush()?;
        Ok(Partial {
            aggregator: self.aggregator,
            counters: self.counters,
            divergences: self.divergences,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_only_move_forward() {
        assert!(Stage::Scanning.can_advance_to(Stage::Filtering));
        assert!(Stage::Filtering.can_advance_to(Stage::Aggregating));
        assert!(Stage::Joining.can_advance_to(Stage::Joining));
        assert!(Stage::Sorted.can_advance_to(Stage::Done));
        assert!(Stage::Aggregating.can_advance_to(Stage::Failed));

        assert!(!Stage::Aggregating.can_advance_to(Stage::Joining));
        assert!(!Stage::Filtering.can_advance_to(Stage::Filtering));
        assert!(!Stage::Done.can_advance_to(Stage::Failed));
        assert!(!Stage::Failed.can_advance_to(Stage::Done));
    }
}

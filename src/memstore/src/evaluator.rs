//! Direct evaluation of provider trees over in-memory tables.

use crate::expression::{decimal_average, eval, eval_predicate, Env};
use common::execution::{CancellationToken, ParameterValues};
use common::logical_plan::{
    AggregateColumn, AggregateKind, ApplyKind, Count, Direction, JoinKind, Provider, ProviderKind,
    SetOp,
};
use common::{ApplyParameterId, DataType, Field, OrmError, Tuple};
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Tables by name.
pub type Tables = HashMap<String, Arc<Vec<Tuple>>>;

/// Evaluates providers row by row.
///
/// Apply nodes bind each left row to their parameter while the right side
/// is evaluated, the way a correlated sub-query runs per outer row.
pub struct Evaluator<'a> {
    tables: &'a Tables,
    parameters: &'a ParameterValues,
    outer: HashMap<ApplyParameterId, Tuple>,
    token: Option<&'a CancellationToken>,
}

impl<'a> Evaluator<'a> {
    /// Creates an evaluator.
    ///
    /// # Arguments
    ///
    /// * `tables` - Table rows by table name.
    /// * `parameters` - Bound query parameters.
    pub fn new(tables: &'a Tables, parameters: &'a ParameterValues) -> Self {
        Self {
            tables,
            parameters,
            outer: HashMap::new(),
            token: None,
        }
    }

    /// Checks `token` for every produced row.
    pub fn with_token(mut self, token: &'a CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    fn check(&self) -> Result<(), OrmError> {
        match self.token {
            Some(t) => t.check(),
            None => Ok(()),
        }
    }

    fn env(&self) -> Env<'_> {
        Env {
            parameters: self.parameters,
            outer: &self.outer,
        }
    }

    fn count(&self, count: &Count) -> Result<usize, OrmError> {
        match count {
            Count::Constant(n) => Ok(*n as usize),
            Count::Parameter(key) => {
                let value = self.parameters.get(key).ok_or_else(|| {
                    OrmError::ValidationError(format!("Parameter {} is not bound", key))
                })?;
                match value.as_i64() {
                    Some(n) if n >= 0 => Ok(n as usize),
                    _ => Err(OrmError::InvalidOperation(format!(
                        "Row count {} must be a non-negative integer",
                        value
                    ))),
                }
            }
        }
    }

    /// Evaluates `provider` into its rows.
    pub fn evaluate(&mut self, provider: &Provider) -> Result<Vec<Tuple>, OrmError> {
        self.check()?;
        match provider.kind() {
            ProviderKind::Raw {
                rows, projection, ..
            } => match projection {
                Some(p) => rows.iter().map(|t| t.project(p)).collect(),
                None => Ok(rows.as_ref().clone()),
            },
            ProviderKind::Index { table, columns, .. } => {
                let rows = self.tables.get(table).ok_or_else(|| OrmError::ExecutionError {
                    context: format!("Table {} does not exist", table),
                    source: None,
                })?;
                let mut res = Vec::with_capacity(rows.len());
                for row in rows.iter() {
                    self.check()?;
                    res.push(row.project(columns)?);
                }
                Ok(res)
            }
            ProviderKind::Filter { source, predicate } => {
                let rows = self.evaluate(source)?;
                let mut res = Vec::new();
                for row in rows {
                    self.check()?;
                    if eval_predicate(predicate, &row, &self.env())? {
                        res.push(row);
                    }
                }
                Ok(res)
            }
            ProviderKind::Select { source, columns } => self
                .evaluate(source)?
                .iter()
                .map(|t| t.project(columns))
                .collect(),
            ProviderKind::Calculate { source, columns } => {
                let rows = self.evaluate(source)?;
                let mut res = Vec::with_capacity(rows.len());
                for row in rows {
                    self.check()?;
                    let mut fields: Vec<Field> = row.field_vals().cloned().collect();
                    for c in columns {
                        fields.push(eval(&c.expression, &row, &self.env())?);
                    }
                    res.push(Tuple::new(fields));
                }
                Ok(res)
            }
            ProviderKind::Alias { source, .. } => self.evaluate(source),
            ProviderKind::Join {
                left,
                right,
                kind,
                equal_indexes,
            } => {
                let (l, r) = (self.evaluate(left)?, self.evaluate(right)?);
                let matches = |a: &Tuple, b: &Tuple| -> Result<bool, OrmError> {
                    for (li, ri) in equal_indexes {
                        let (x, y) = (field(a, *li)?, field(b, *ri)?);
                        if x.sql_cmp(y) != Some(Ordering::Equal) {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                };
                self.join(&l, &r, *kind, left.header().len(), right.header().len(), matches)
            }
            ProviderKind::PredicateJoin {
                left,
                right,
                kind,
                predicate,
            } => {
                let (l, r) = (self.evaluate(left)?, self.evaluate(right)?);
                let env = self.env();
                let matches = |a: &Tuple, b: &Tuple| eval_predicate(predicate, &a.merge(b), &env);
                self.join(&l, &r, *kind, left.header().len(), right.header().len(), matches)
            }
            ProviderKind::Apply {
                left,
                right,
                parameter,
                kind,
            } => self.apply(left, right, *parameter, *kind),
            ProviderKind::Existence { source, negated } => {
                let found = !self.evaluate(source)?.is_empty();
                Ok(vec![Tuple::new(vec![Field::BoolField(found != *negated)])])
            }
            ProviderKind::Aggregate {
                source,
                group_indexes,
                columns,
            } => {
                let rows = self.evaluate(source)?;
                self.aggregate(&rows, group_indexes, columns, source)
            }
            ProviderKind::Sort { source, order } => {
                let mut rows = self.evaluate(source)?;
                rows.sort_by(|a, b| compare_rows(a, b, order));
                Ok(rows)
            }
            ProviderKind::Take { source, count } => {
                let n = self.count(count)?;
                let mut rows = self.evaluate(source)?;
                rows.truncate(n);
                Ok(rows)
            }
            ProviderKind::Skip { source, count } => {
                let n = self.count(count)?;
                Ok(self.evaluate(source)?.into_iter().skip(n).collect())
            }
            ProviderKind::Distinct { source } => Ok(distinct(self.evaluate(source)?)),
            ProviderKind::Set { op, left, right } => {
                let (l, r) = (self.evaluate(left)?, self.evaluate(right)?);
                Ok(set_operation(*op, l, r))
            }
        }
    }

    fn join<F>(
        &self,
        left: &[Tuple],
        right: &[Tuple],
        kind: JoinKind,
        left_width: usize,
        right_width: usize,
        matches: F,
    ) -> Result<Vec<Tuple>, OrmError>
    where
        F: Fn(&Tuple, &Tuple) -> Result<bool, OrmError>,
    {
        let mut res = Vec::new();
        let mut right_matched = vec![false; right.len()];
        for l in left {
            let mut matched = false;
            for (i, r) in right.iter().enumerate() {
                self.check()?;
                if kind == JoinKind::Cross || matches(l, r)? {
                    matched = true;
                    right_matched[i] = true;
                    res.push(l.merge(r));
                }
            }
            if !matched && matches!(kind, JoinKind::LeftOuter | JoinKind::FullOuter) {
                res.push(l.merge(&Tuple::nulls(right_width)));
            }
        }
        if kind == JoinKind::FullOuter {
            for (r, _) in right.iter().zip(right_matched).filter(|(_, m)| !m) {
                res.push(Tuple::nulls(left_width).merge(r));
            }
        }
        Ok(res)
    }

    fn apply(
        &mut self,
        left: &Provider,
        right: &Provider,
        parameter: ApplyParameterId,
        kind: ApplyKind,
    ) -> Result<Vec<Tuple>, OrmError> {
        let rows = self.evaluate(left)?;
        let right_width = right.header().len();
        let previous = self.outer.remove(&parameter);
        let mut res = Vec::new();
        let mut outcome = Ok(());
        for row in rows {
            self.outer.insert(parameter, row.clone());
            let inner = match self.evaluate(right) {
                Ok(inner) => inner,
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            };
            if inner.is_empty() {
                if matches!(kind, ApplyKind::Outer | ApplyKind::Aggregate) {
                    res.push(row.merge(&Tuple::nulls(right_width)));
                }
                continue;
            }
            for r in inner {
                res.push(row.merge(&r));
            }
        }
        self.outer.remove(&parameter);
        if let Some(p) = previous {
            self.outer.insert(parameter, p);
        }
        outcome.map(|_| res)
    }

    fn aggregate(
        &self,
        rows: &[Tuple],
        group_indexes: &[usize],
        columns: &[AggregateColumn],
        source: &Provider,
    ) -> Result<Vec<Tuple>, OrmError> {
        let mut order: Vec<Tuple> = Vec::new();
        let mut groups: HashMap<Tuple, Vec<&Tuple>> = HashMap::new();
        for row in rows {
            self.check()?;
            let key = row.project(group_indexes)?;
            groups
                .entry(key.clone())
                .or_insert_with(|| {
                    order.push(key);
                    Vec::new()
                })
                .push(row);
        }
        if group_indexes.is_empty() && order.is_empty() {
            order.push(Tuple::new(vec![]));
            groups.insert(Tuple::new(vec![]), Vec::new());
        }
        let mut res = Vec::with_capacity(order.len());
        for key in order {
            let members = groups.get(&key).map(Vec::as_slice).unwrap_or(&[]);
            let mut fields: Vec<Field> = key.field_vals().cloned().collect();
            for c in columns {
                let dtype = match c.source_index {
                    Some(i) => source.header().column(i)?.dtype,
                    None => DataType::Long,
                };
                fields.push(aggregate_values(c, dtype, members)?);
            }
            res.push(Tuple::new(fields));
        }
        Ok(res)
    }
}

fn field(tuple: &Tuple, i: usize) -> Result<&Field, OrmError> {
    tuple
        .get_field(i)
        .ok_or_else(|| OrmError::ValidationError(format!("Column {} out of range for {}", i, tuple)))
}

fn compare_rows(a: &Tuple, b: &Tuple, order: &[(usize, Direction)]) -> Ordering {
    for (i, direction) in order {
        let ord = a.get_field(*i).cmp(&b.get_field(*i));
        let ord = match direction {
            Direction::Ascending => ord,
            Direction::Descending => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn distinct(rows: Vec<Tuple>) -> Vec<Tuple> {
    let mut seen = HashSet::new();
    rows.into_iter().filter(|r| seen.insert(r.clone())).collect()
}

fn set_operation(op: SetOp, left: Vec<Tuple>, right: Vec<Tuple>) -> Vec<Tuple> {
    match op {
        SetOp::Concat => left.into_iter().chain(right).collect(),
        SetOp::Union => distinct(left.into_iter().chain(right).collect()),
        SetOp::Except => {
            let right: HashSet<Tuple> = right.into_iter().collect();
            distinct(left.into_iter().filter(|r| !right.contains(r)).collect())
        }
        SetOp::Intersect => {
            let right: HashSet<Tuple> = right.into_iter().collect();
            distinct(left.into_iter().filter(|r| right.contains(r)).collect())
        }
    }
}

fn overflow(kind: AggregateKind) -> OrmError {
    OrmError::InvalidOperation(format!("Arithmetic overflow in {}", kind))
}

/// Computes one aggregate over the rows of a group. Nulls are skipped; an
/// aggregate other than count over no values is null.
fn aggregate_values(
    column: &AggregateColumn,
    dtype: DataType,
    rows: &[&Tuple],
) -> Result<Field, OrmError> {
    let index = match column.source_index {
        None => return Ok(Field::LongField(rows.len() as i64)),
        Some(i) => i,
    };
    let mut values = Vec::with_capacity(rows.len());
    for row in rows {
        let f = field(row, index)?;
        if !f.is_null() {
            values.push(f);
        }
    }
    let kind = column.kind;
    if kind == AggregateKind::Count {
        return Ok(Field::LongField(values.len() as i64));
    }
    if values.is_empty() {
        return Ok(Field::Null);
    }
    match kind {
        AggregateKind::Min | AggregateKind::Max => {
            let mut best = values[0];
            for &v in &values[1..] {
                let ord = v.sql_cmp(best).ok_or_else(|| {
                    OrmError::InvalidOperation(format!("Cannot compare {} and {}", v, best))
                })?;
                let better = match kind {
                    AggregateKind::Min => ord == Ordering::Less,
                    _ => ord == Ordering::Greater,
                };
                if better {
                    best = v;
                }
            }
            Ok(best.clone())
        }
        AggregateKind::Sum => sum(kind, dtype, &values),
        _ => average(kind, dtype, &values),
    }
}

fn sum(kind: AggregateKind, dtype: DataType, values: &[&Field]) -> Result<Field, OrmError> {
    let err = |v: &Field| OrmError::InvalidOperation(format!("Cannot sum {}", v));
    match dtype {
        DataType::Int => {
            let mut total = 0i32;
            for v in values {
                let x = v.as_i64().ok_or_else(|| err(*v))? as i32;
                total = total.checked_add(x).ok_or_else(|| overflow(kind))?;
            }
            Ok(Field::IntField(total))
        }
        DataType::Long => {
            let mut total = 0i64;
            for v in values {
                total = total
                    .checked_add(v.as_i64().ok_or_else(|| err(*v))?)
                    .ok_or_else(|| overflow(kind))?;
            }
            Ok(Field::LongField(total))
        }
        DataType::Decimal => Ok(Field::DecimalField(decimal_sum(kind, values)?)),
        DataType::Float => Ok(Field::FloatField(float_sum(values)? as f32)),
        _ => Ok(Field::DoubleField(float_sum(values)?)),
    }
}

fn float_sum(values: &[&Field]) -> Result<f64, OrmError> {
    let mut total = 0f64;
    for v in values {
        total += v
            .as_f64()
            .ok_or_else(|| OrmError::InvalidOperation(format!("Cannot sum {}", v)))?;
    }
    Ok(total)
}

fn decimal_sum(kind: AggregateKind, values: &[&Field]) -> Result<Decimal, OrmError> {
    let mut total = Decimal::ZERO;
    for v in values {
        let x = v
            .as_decimal()
            .ok_or_else(|| OrmError::InvalidOperation(format!("Cannot sum {}", v)))?;
        total = total.checked_add(x).ok_or_else(|| overflow(kind))?;
    }
    Ok(total)
}

fn average(kind: AggregateKind, dtype: DataType, values: &[&Field]) -> Result<Field, OrmError> {
    match dtype {
        DataType::Decimal => Ok(Field::DecimalField(decimal_average(
            decimal_sum(kind, values)?,
            values.len(),
        )?)),
        DataType::Float => Ok(Field::FloatField(
            (float_sum(values)? / values.len() as f64) as f32,
        )),
        _ => Ok(Field::DoubleField(float_sum(values)? / values.len() as f64)),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use common::catalog::Catalog;
    use common::logical_plan::TupleExpr;
    use common::testutil::*;
    use common::{Column, Header};

    fn raw(rows: Vec<Vec<Field>>) -> Provider {
        let width = rows.first().map_or(2, |r| r.len());
        let header = Header::new(
            (0..width)
                .map(|i| Column::new(&format!("c{}", i), DataType::Int, true))
                .collect(),
        );
        Provider::raw(header, Arc::new(rows.into_iter().map(Tuple::new).collect()))
    }

    fn run(provider: &Provider) -> Vec<Tuple> {
        let tables = Tables::new();
        let parameters = ParameterValues::new();
        Evaluator::new(&tables, &parameters)
            .evaluate(provider)
            .unwrap()
    }

    #[test]
    fn test_outer_join_pads_nulls() {
        let left = raw(vec![vec![int(1), int(10)], vec![int(2), int(20)]]);
        let right = raw(vec![vec![int(1), int(100)], vec![Field::Null, int(300)]]);
        let join = Provider::join(left.clone(), right.clone(), JoinKind::LeftOuter, vec![(0, 0)]).unwrap();
        let rows = run(&join);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], Tuple::new(vec![int(2), int(20), Field::Null, Field::Null]));

        let full = Provider::join(left, right, JoinKind::FullOuter, vec![(0, 0)]).unwrap();
        let rows = run(&full);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2], Tuple::new(vec![Field::Null, Field::Null, Field::Null, int(300)]));
    }

    #[test]
    fn test_scalar_aggregate_over_empty_input() {
        let empty = raw(vec![]);
        let agg = Provider::aggregate(
            empty,
            vec![],
            vec![
                (String::from("n"), AggregateKind::Count, None),
                (String::from("s"), AggregateKind::Sum, Some(0)),
                (String::from("a"), AggregateKind::Avg, Some(1)),
            ],
        )
        .unwrap();
        assert_eq!(
            run(&agg),
            vec![Tuple::new(vec![Field::LongField(0), Field::Null, Field::Null])]
        );
    }

    #[test]
    fn test_grouped_aggregate() {
        let source = raw(vec![
            vec![int(1), int(4)],
            vec![int(2), Field::Null],
            vec![int(1), int(6)],
            vec![Field::Null, int(1)],
        ]);
        let agg = Provider::aggregate(
            source,
            vec![0],
            vec![
                (String::from("n"), AggregateKind::Count, Some(1)),
                (String::from("a"), AggregateKind::Avg, Some(1)),
                (String::from("m"), AggregateKind::Max, Some(1)),
            ],
        )
        .unwrap();
        let rows = run(&agg);
        assert_eq!(rows.len(), 3);
        assert_eq!(
            rows[0],
            Tuple::new(vec![int(1), Field::LongField(2), Field::DoubleField(5.0), int(6)])
        );
        assert_eq!(
            rows[1],
            Tuple::new(vec![int(2), Field::LongField(0), Field::Null, Field::Null])
        );
    }

    #[test]
    fn test_sum_overflow() {
        let source = raw(vec![vec![int(i32::MAX)], vec![int(1)]]);
        let agg = Provider::aggregate(
            source,
            vec![],
            vec![(String::from("s"), AggregateKind::Sum, Some(0))],
        )
        .unwrap();
        let tables = Tables::new();
        let parameters = ParameterValues::new();
        assert!(Evaluator::new(&tables, &parameters).evaluate(&agg).is_err());
    }

    #[test]
    fn test_apply_binds_outer_row() {
        let left = raw(vec![vec![int(1), int(0)], vec![int(2), int(0)], vec![int(3), int(0)]]);
        let right = raw(vec![vec![int(1), int(7)], vec![int(1), int(8)], vec![int(3), int(9)]]);
        let p = ApplyParameterId(0);
        let correlated = Provider::filter(
            right,
            TupleExpr::eq(
                TupleExpr::Column(0),
                TupleExpr::ApplyParam {
                    parameter: p,
                    index: 0,
                },
            ),
        );
        let cross = Provider::apply(left.clone(), correlated.clone(), p, ApplyKind::Cross);
        assert_eq!(run(&cross).len(), 3);
        let outer = Provider::apply(left.clone(), correlated.clone(), p, ApplyKind::Outer);
        let rows = run(&outer);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[2], Tuple::new(vec![int(2), int(0), Field::Null, Field::Null]));
        let exists = Provider::apply(
            left,
            Provider::existence(correlated, "e", false),
            p,
            ApplyKind::Existence,
        );
        let flags: Vec<Field> = run(&exists).iter().map(|t| t.field_vals[2].clone()).collect();
        assert_eq!(
            flags,
            vec![
                Field::BoolField(true),
                Field::BoolField(false),
                Field::BoolField(true)
            ]
        );
    }

    #[test]
    fn test_sort_take_skip_distinct() {
        let source = raw(vec![vec![int(3)], vec![int(1)], vec![int(3)], vec![int(2)]]);
        let sorted = Provider::sort(
            Provider::distinct(source),
            vec![(0, Direction::Descending)],
        )
        .unwrap();
        let paged = Provider::take(
            Provider::skip(sorted, Count::Constant(1)),
            Count::Parameter(common::ParamKey::Named(String::from("n"))),
        );
        let tables = Tables::new();
        let mut parameters = ParameterValues::new();
        parameters.insert(common::ParamKey::Named(String::from("n")), int(5));
        let rows = Evaluator::new(&tables, &parameters).evaluate(&paged).unwrap();
        assert_eq!(rows, vec![Tuple::new(vec![int(2)]), Tuple::new(vec![int(1)])]);
    }

    #[test]
    fn test_missing_table() {
        let model = teacher_model();
        let teacher = model.get_type("Teacher").unwrap();
        let scan = Provider::index(teacher, "PK_Teacher", "a0").unwrap();
        let tables = Tables::new();
        let parameters = ParameterValues::new();
        let err = Evaluator::new(&tables, &parameters).evaluate(&scan);
        assert!(matches!(err, Err(OrmError::ExecutionError { .. })));
    }

    #[test]
    fn test_cancelled_token() {
        let source = raw(vec![vec![int(1)]]);
        let tables = Tables::new();
        let parameters = ParameterValues::new();
        let token = CancellationToken::new();
        token.cancel();
        let res = Evaluator::new(&tables, &parameters)
            .with_token(&token)
            .evaluate(&source);
        assert!(matches!(res, Err(OrmError::Cancelled)));
    }
}

use super::{QueryPreparer, ResultKind, Translation};
use crate::expression::{Expr, ExprFunction, Lambda, LocalCollection, QueryMethod};
use crate::projector::{ItemExpr, SubQueryRef};
use common::catalog::Catalog;
use common::ids::IdGenerator;
use common::logical_plan::{
    AggregateKind, ApplyKind, BinaryOp, CalculatedColumn, ColumnMap, Count, Direction, JoinKind,
    Provider, ProviderKind, ScalarFunction, SetOp, TupleExpr, UnaryOp,
};
use common::model::{FieldInfo, FieldKind, TypeInfo};
use common::{ApplyParameterId, Column, DataType, Field, Header, OrmError, ParamKey};
use std::collections::{BTreeSet, HashMap};
use std::mem;
use std::sync::Arc;

/// Row source of one query level: a provider and the element read from its rows.
///
/// Providers of a frame only grow by appending columns (reference joins,
/// calculated columns, applies), so column indexes handed out stay valid.
struct Frame {
    provider: Provider,
    item: ItemExpr,
    /// Reference joins already added, by target and foreign key columns.
    joins: HashMap<String, ItemExpr>,
    /// Correlation parameter through which nested queries read this frame's row.
    parameter: Option<ApplyParameterId>,
    /// Sort keys not applied yet.
    ordering: Vec<(usize, Direction)>,
    group: Option<GroupInfo>,
}

impl Frame {
    fn new(provider: Provider, item: ItemExpr) -> Self {
        Self {
            provider,
            item,
            joins: HashMap::new(),
            parameter: None,
            ordering: Vec::new(),
            group: None,
        }
    }

    fn width(&self) -> usize {
        self.provider.header().len()
    }

    /// Appends a calculated column and returns its index.
    fn calculate(&mut self, name: &str, expression: TupleExpr, dtype: DataType, nullable: bool) -> usize {
        let index = self.width();
        self.provider = Provider::calculate(
            self.provider.clone(),
            vec![CalculatedColumn {
                column: Column::new(name, dtype, nullable),
                expression,
            }],
        );
        index
    }

    fn flush(&mut self) -> Result<(), OrmError> {
        if !self.ordering.is_empty() {
            let order = mem::take(&mut self.ordering);
            self.provider = Provider::sort(self.provider.clone(), order)?;
        }
        Ok(())
    }
}

/// Groups produced by a GroupBy.
#[derive(Clone)]
struct GroupInfo {
    id: usize,
    /// Key over the group columns of the aggregate.
    key: ItemExpr,
    /// Elements of one group, as a query correlated on the key.
    elements: Expr,
    /// Element of the grouped source, over the aggregate's source columns.
    source_item: ItemExpr,
    element: Option<Lambda>,
    /// Whether lambdas over the frame receive the groups.
    exposed: bool,
    /// Grouping item, built once it is needed.
    item: Option<ItemExpr>,
}

#[derive(Clone)]
enum Binding {
    Item { frame: usize, item: ItemExpr },
    Group(usize),
    Sequence(Expr),
}

/// Translated lambda sub-expression.
#[derive(Clone)]
enum Operand {
    /// Value over the columns of the current frame.
    Scalar {
        expr: TupleExpr,
        dtype: DataType,
        nullable: bool,
    },
    Item {
        frame: usize,
        item: ItemExpr,
    },
    /// Reference field not dereferenced yet.
    Reference {
        frame: usize,
        fk: Vec<usize>,
        target: String,
        nullable: bool,
    },
    /// Groups of the frame at this index.
    Group(usize),
    Sequence(Expr),
    Null,
}

type Scalar = (TupleExpr, DataType, bool);

fn entity_item(type_info: &TypeInfo, offset: usize, nullable: bool) -> ItemExpr {
    ItemExpr::Entity {
        type_name: type_info.name.clone(),
        columns: (offset..offset + type_info.columns.len()).collect(),
        key: type_info.key.iter().map(|k| k + offset).collect(),
        nullable,
    }
}

fn single_param(lambda: &Lambda) -> Result<String, OrmError> {
    match lambda.params.as_slice() {
        [p] => Ok(p.clone()),
        _ => Err(OrmError::translation(
            "Expected a lambda with one parameter",
            lambda,
        )),
    }
}

fn two_params(lambda: &Lambda) -> Result<(String, String), OrmError> {
    match lambda.params.as_slice() {
        [a, b] => Ok((a.clone(), b.clone())),
        _ => Err(OrmError::translation(
            "Expected a lambda with two parameters",
            lambda,
        )),
    }
}

/// Escapes LIKE wildcards in `text`.
fn escape_like(text: &str) -> (String, Option<char>) {
    if !text.contains(|c: char| c == '%' || c == '_' || c == '\\') {
        return (text.to_string(), None);
    }
    let mut escaped = String::with_capacity(text.len() + 4);
    for c in text.chars() {
        if c == '%' || c == '_' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    (escaped, Some('\\'))
}

/// Apply parameters read but not bound inside `provider`.
fn free_parameters(provider: &Provider) -> BTreeSet<ApplyParameterId> {
    let mut res = BTreeSet::new();
    for e in provider.expressions() {
        res.extend(e.apply_parameters());
    }
    match provider.kind() {
        ProviderKind::Apply {
            left,
            right,
            parameter,
            ..
        } => {
            res.extend(free_parameters(left));
            let mut inner = free_parameters(right);
            inner.remove(parameter);
            res.extend(inner);
        }
        _ => {
            for c in provider.children() {
                res.extend(free_parameters(c));
            }
        }
    }
    res
}

fn function_type(function: ScalarFunction, args: &[Scalar]) -> Option<(DataType, bool)> {
    let nullable = args.iter().any(|a| a.2);
    let types: Vec<DataType> = args.iter().map(|a| a.1).collect();
    match (function, types.as_slice()) {
        (ScalarFunction::Upper, [DataType::String])
        | (ScalarFunction::Lower, [DataType::String])
        | (ScalarFunction::Trim, [DataType::String])
        | (ScalarFunction::TrimStart, [DataType::String])
        | (ScalarFunction::TrimEnd, [DataType::String]) => Some((DataType::String, nullable)),
        (ScalarFunction::Length, [DataType::String]) => Some((DataType::Int, nullable)),
        (ScalarFunction::Substring, [DataType::String, s, l]) if s.is_integral() && l.is_integral() => {
            Some((DataType::String, nullable))
        }
        (ScalarFunction::Abs, [t]) | (ScalarFunction::Round, [t]) if t.is_numeric() => {
            Some((*t, nullable))
        }
        (ScalarFunction::Coalesce, [first, rest @ ..]) => {
            let dtype = rest
                .iter()
                .try_fold(*first, |acc, t| acc.promote(*t))?;
            Some((dtype, args.iter().all(|a| a.2)))
        }
        (ScalarFunction::CurrentDate, [])
        | (ScalarFunction::CurrentTimestamp, []) => Some((DataType::DateTime, false)),
        (ScalarFunction::DatePart(_), [DataType::DateTime]) => Some((DataType::Int, nullable)),
        _ => None,
    }
}

/// Binds query expressions against the domain model and produces a provider
/// tree plus the item projector reading its rows.
///
/// A translator is used for one expression; every name and id it hands out
/// is local to it.
pub struct Translator<'a> {
    catalog: &'a dyn Catalog,
    preparer: &'a dyn QueryPreparer,
    ids: IdGenerator,
    frames: Vec<Frame>,
    /// Lambda parameters, innermost scope last.
    scopes: Vec<HashMap<String, Binding>>,
    /// Parameters of generated lambdas.
    hidden: HashMap<String, Binding>,
    next_hidden: usize,
    next_group: usize,
}

impl<'a> Translator<'a> {
    /// Creates a translator.
    ///
    /// # Arguments
    ///
    /// * `catalog` - Domain model the expression is bound against.
    /// * `preparer` - Prepares the nested queries found while translating.
    pub fn new(catalog: &'a dyn Catalog, preparer: &'a dyn QueryPreparer) -> Self {
        Self {
            catalog,
            preparer,
            ids: IdGenerator::new(),
            frames: Vec::new(),
            scopes: Vec::new(),
            hidden: HashMap::new(),
            next_hidden: 0,
            next_group: 0,
        }
    }

    /// Translates a whole query.
    pub fn translate(mut self, expr: &Expr) -> Result<Translation, OrmError> {
        debug!("Translating {}", expr);
        let translation = match expr {
            Expr::Method { source, method } if !method.is_sequence() => {
                self.root_terminal(source, method, expr)?
            }
            _ => {
                let frame = self.sequence(expr)?;
                self.finish(frame)?
            }
        };
        debug!(
            "Translated into {} providers",
            translation.provider.node_count()
        );
        Ok(translation)
    }

    fn finish(&mut self, frame: Frame) -> Result<Translation, OrmError> {
        let (mut frame, item) = self.with_frame(frame, |t, f| t.frame_item(f))?;
        frame.flush()?;
        Ok(Translation {
            provider: frame.provider,
            projector: item,
            result: ResultKind::Sequence,
        })
    }

    fn with_frame<T, F>(&mut self, frame: Frame, body: F) -> Result<(Frame, T), OrmError>
    where
        F: FnOnce(&mut Self, usize) -> Result<T, OrmError>,
    {
        self.frames.push(frame);
        let index = self.frames.len() - 1;
        let res = body(self, index);
        match self.frames.pop() {
            Some(frame) => res.map(|value| (frame, value)),
            None => Err(OrmError::InvalidOperation(String::from(
                "Translation frame stack is empty",
            ))),
        }
    }

    fn with_bindings<T, F>(&mut self, bindings: Vec<(String, Binding)>, body: F) -> Result<T, OrmError>
    where
        F: FnOnce(&mut Self) -> Result<T, OrmError>,
    {
        self.scopes.push(bindings.into_iter().collect());
        let res = body(self);
        self.scopes.pop();
        res
    }

    fn hidden_name(&mut self, prefix: &str) -> String {
        let name = format!("${}{}", prefix, self.next_hidden);
        self.next_hidden += 1;
        name
    }

    fn current(&self) -> usize {
        self.frames.len().saturating_sub(1)
    }

    fn frame_parameter(&mut self, frame: usize) -> ApplyParameterId {
        let ids = &mut self.ids;
        *self.frames[frame]
            .parameter
            .get_or_insert_with(|| ids.next_apply_parameter())
    }

    /// Read of a frame column from the current frame.
    fn column_ref(&mut self, frame: usize, index: usize) -> TupleExpr {
        if frame == self.current() {
            TupleExpr::Column(index)
        } else {
            TupleExpr::ApplyParam {
                parameter: self.frame_parameter(frame),
                index,
            }
        }
    }

    fn frame_binding(&self, f: usize) -> Binding {
        let frame = &self.frames[f];
        match &frame.group {
            Some(g) if g.exposed => Binding::Group(g.id),
            _ => Binding::Item {
                frame: f,
                item: frame.item.clone(),
            },
        }
    }

    /// Element of frame `f`, building the grouping of exposed groups.
    fn frame_item(&mut self, f: usize) -> Result<ItemExpr, OrmError> {
        match &self.frames[f].group {
            Some(g) if g.exposed => self.grouping(f),
            _ => Ok(self.frames[f].item.clone()),
        }
    }

    /// Grouping item of frame `f`; the elements query is prepared once.
    fn grouping(&mut self, f: usize) -> Result<ItemExpr, OrmError> {
        let group = match &self.frames[f].group {
            Some(g) => g.clone(),
            None => {
                return Err(OrmError::ValidationError(String::from(
                    "Frame has no groups",
                )))
            }
        };
        if let Some(item) = group.item {
            return Ok(item);
        }
        let elements = self.subquery_at(f, &group.elements)?;
        let item = ItemExpr::Grouping {
            key: Box::new(group.key),
            elements,
        };
        if let Some(g) = self.frames[f].group.as_mut() {
            g.item = Some(item.clone());
        }
        Ok(item)
    }

    fn group_frame(&self, id: usize) -> Option<usize> {
        self.frames
            .iter()
            .rposition(|fr| fr.group.as_ref().map(|g| g.id) == Some(id))
    }

    fn lambda_operand(&mut self, f: usize, lambda: &Lambda) -> Result<Operand, OrmError> {
        let param = single_param(lambda)?;
        let binding = self.frame_binding(f);
        self.with_bindings(vec![(param, binding)], |t| t.operand(&lambda.body))
    }

    // Sequences.

    fn sequence(&mut self, expr: &Expr) -> Result<Frame, OrmError> {
        match expr {
            Expr::Root(type_name) => self.root_frame(type_name, expr),
            Expr::Local(collection) => Ok(self.local_frame(collection)),
            Expr::Method { source, method } if method.is_sequence() => {
                self.sequence_method(source, method, expr)
            }
            Expr::Param(_) | Expr::Member { .. } => {
                let op = self.operand(expr)?;
                let seq = self.sequence_of(op, expr)?;
                self.sequence(&seq)
            }
            _ => Err(OrmError::translation("Expression is not a sequence", expr)),
        }
    }

    fn root_frame(&mut self, type_name: &str, expr: &Expr) -> Result<Frame, OrmError> {
        let catalog = self.catalog;
        let type_info = catalog
            .get_type(type_name)
            .map_err(|_| OrmError::translation(format!("Unknown type {}", type_name), expr))?;
        let index = type_info
            .primary_index()
            .ok_or_else(|| OrmError::translation(format!("{} has no primary index", type_name), expr))?
            .name
            .clone();
        let alias = self.ids.next_alias();
        let provider = Provider::index(type_info, &index, &alias)?;
        Ok(Frame::new(provider, entity_item(type_info, 0, false)))
    }

    fn local_frame(&mut self, collection: &LocalCollection) -> Frame {
        let alias = self.ids.next_alias();
        let columns: Vec<Column> = collection
            .columns
            .iter()
            .enumerate()
            .map(|(i, (name, dtype))| {
                let nullable = collection
                    .rows
                    .iter()
                    .any(|r| r.get_field(i).map_or(true, Field::is_null));
                Column::new(&format!("{}.{}", alias, name), *dtype, nullable)
            })
            .collect();
        let item = if columns.len() == 1 {
            ItemExpr::column(0, columns[0].dtype, columns[0].nullable)
        } else {
            ItemExpr::Anonymous {
                members: collection
                    .columns
                    .iter()
                    .zip(columns.iter())
                    .enumerate()
                    .map(|(i, ((name, _), c))| (name.clone(), ItemExpr::column(i, c.dtype, c.nullable)))
                    .collect(),
            }
        };
        Frame::new(
            Provider::raw(Header::new(columns), collection.rows.clone()),
            item,
        )
    }

    fn sequence_method(
        &mut self,
        source: &Expr,
        method: &QueryMethod,
        expr: &Expr,
    ) -> Result<Frame, OrmError> {
        match method {
            QueryMethod::Where(predicate) => {
                let frame = self.sequence(source)?;
                self.filter(frame, predicate, false)
            }
            QueryMethod::Select(selector) => {
                let frame = self.sequence(source)?;
                let (mut frame, item) = self.with_frame(frame, |t, f| {
                    let op = t.lambda_operand(f, selector)?;
                    t.project(op, &selector.body)
                })?;
                frame.item = item;
                if let Some(g) = frame.group.as_mut() {
                    g.exposed = false;
                }
                Ok(frame)
            }
            QueryMethod::SelectMany { collection, result } => {
                self.select_many(source, collection, result.as_ref())
            }
            QueryMethod::Join {
                inner,
                outer_key,
                inner_key,
                result,
            } => self.join(source, inner, outer_key, inner_key, result, JoinKind::Inner, expr),
            QueryMethod::LeftJoin {
                inner,
                outer_key,
                inner_key,
                result,
            } => self.join(
                source,
                inner,
                outer_key,
                inner_key,
                result,
                JoinKind::LeftOuter,
                expr,
            ),
            QueryMethod::GroupJoin {
                inner,
                outer_key,
                inner_key,
                result,
            } => self.group_join(source, inner, outer_key, inner_key, result),
            QueryMethod::GroupBy {
                key,
                element,
                result,
            } => self.group_by(source, key, element.as_ref(), result.as_ref()),
            QueryMethod::OrderBy { key, descending } | QueryMethod::ThenBy { key, descending } => {
                let frame = self.sequence(source)?;
                let (mut frame, columns) = self.with_frame(frame, |t, f| {
                    let op = t.lambda_operand(f, key)?;
                    t.identity_columns(op, &key.body)
                })?;
                let direction = if *descending {
                    Direction::Descending
                } else {
                    Direction::Ascending
                };
                let keys = columns.into_iter().map(|c| (c, direction));
                if let QueryMethod::OrderBy { .. } = method {
                    // A new primary order; the previous one breaks ties.
                    let previous = mem::take(&mut frame.ordering);
                    frame.ordering = keys.collect();
                    for (c, d) in previous {
                        if !frame.ordering.iter().any(|(i, _)| *i == c) {
                            frame.ordering.push((c, d));
                        }
                    }
                } else {
                    if frame.ordering.is_empty() {
                        return Err(OrmError::translation("ThenBy must follow OrderBy", expr));
                    }
                    for (c, d) in keys {
                        if !frame.ordering.iter().any(|(i, _)| *i == c) {
                            frame.ordering.push((c, d));
                        }
                    }
                }
                Ok(frame)
            }
            QueryMethod::Take(count) | QueryMethod::Skip(count) => {
                let mut frame = self.sequence(source)?;
                frame.flush()?;
                let count = self.count_of(count, expr)?;
                frame.provider = match method {
                    QueryMethod::Take(_) => Provider::take(frame.provider, count),
                    _ => Provider::skip(frame.provider, count),
                };
                Ok(frame)
            }
            QueryMethod::Distinct => {
                let mut frame = self.sequence(source)?;
                frame.flush()?;
                self.project_columns(&mut frame, false, expr)?;
                frame.provider = Provider::distinct(frame.provider);
                Ok(frame)
            }
            QueryMethod::Union(other)
            | QueryMethod::Concat(other)
            | QueryMethod::Except(other)
            | QueryMethod::Intersect(other) => {
                let op = match method {
                    QueryMethod::Union(_) => SetOp::Union,
                    QueryMethod::Concat(_) => SetOp::Concat,
                    QueryMethod::Except(_) => SetOp::Except,
                    _ => SetOp::Intersect,
                };
                let mut left = self.sequence(source)?;
                left.flush()?;
                self.project_columns(&mut left, true, expr)?;
                let mut right = self.sequence(other)?;
                right.flush()?;
                self.project_columns(&mut right, true, expr)?;
                if left.width() != right.width() {
                    return Err(OrmError::translation(
                        "Set operation over differently shaped sequences",
                        expr,
                    ));
                }
                left.provider = Provider::set(op, left.provider, right.provider)
                    .map_err(|e| OrmError::translation(e.to_string(), expr))?;
                Ok(left)
            }
            QueryMethod::DefaultIfEmpty => Err(OrmError::translation(
                "DefaultIfEmpty is only supported as the collection of SelectMany",
                expr,
            )),
            _ => Err(OrmError::translation("Expected a sequence method", expr)),
        }
    }

    fn count_of(&self, count: &Expr, expr: &Expr) -> Result<Count, OrmError> {
        match count {
            Expr::Constant(f) => match f.as_i64() {
                Some(n) => Ok(Count::Constant(n.max(0) as u64)),
                None => Err(OrmError::translation("Count must be an integer", expr)),
            },
            Expr::Variable { name, dtype } if dtype.is_integral() => {
                Ok(Count::Parameter(ParamKey::Named(name.clone())))
            }
            _ => Err(OrmError::translation(
                "Count must be a constant or a variable",
                expr,
            )),
        }
    }

    /// Narrows the frame to the columns of its item.
    ///
    /// # Arguments
    ///
    /// * `frame` - Frame to narrow.
    /// * `positional` - Keep repeated columns, as set operations pair columns by position.
    /// * `expr` - Expression reported on failure.
    fn project_columns(&mut self, frame: &mut Frame, positional: bool, expr: &Expr) -> Result<(), OrmError> {
        if frame.group.as_ref().map_or(false, |g| g.exposed) {
            return Err(OrmError::translation(
                "Groups cannot be compared as values",
                expr,
            ));
        }
        let mut columns = if positional {
            frame.item.column_list()
        } else {
            frame.item.distinct_columns()
        };
        if positional && columns.len() != frame.item.distinct_columns().len() {
            return Err(OrmError::translation(
                "Set operations over elements repeating a column are not supported",
                expr,
            ));
        }
        if columns.is_empty() {
            let name = self.ids.next_column();
            columns.push(frame.calculate(&name, TupleExpr::literal(Field::IntField(0)), DataType::Int, false));
        }
        let mut map: ColumnMap = vec![None; frame.width()];
        for (i, c) in columns.iter().enumerate() {
            map[*c] = Some(i);
        }
        frame.item = frame.item.remap(&map)?;
        frame.provider = Provider::select(frame.provider.clone(), columns)?;
        frame.joins.clear();
        frame.group = None;
        Ok(())
    }

    fn filter(&mut self, frame: Frame, predicate: &Lambda, negate: bool) -> Result<Frame, OrmError> {
        let (mut frame, (expr, nullable)) = self.with_frame(frame, |t, f| {
            let op = t.lambda_operand(f, predicate)?;
            t.predicate(op, &predicate.body)
        })?;
        let expr = match (negate, nullable) {
            (false, _) => expr,
            (true, false) => TupleExpr::not(expr),
            // Rows where the predicate is not true, null included.
            (true, true) => TupleExpr::Conditional {
                test: Box::new(expr),
                if_true: Box::new(TupleExpr::literal(Field::BoolField(false))),
                if_false: Box::new(TupleExpr::true_literal()),
            },
        };
        frame.provider = Provider::filter(frame.provider, expr);
        Ok(frame)
    }

    fn select_many(
        &mut self,
        source: &Expr,
        collection: &Lambda,
        result: Option<&Lambda>,
    ) -> Result<Frame, OrmError> {
        let mut left = self.sequence(source)?;
        left.flush()?;
        let param = single_param(collection)?;
        let (mut left, (right, right_item, outer, left_item)) = self.with_frame(left, |t, f| {
            let binding = t.frame_binding(f);
            let left_item = t.frame_item(f)?;
            t.with_bindings(vec![(param, binding)], |t| {
                let (body, outer) = match collection.body.as_ref() {
                    Expr::Method {
                        source,
                        method: QueryMethod::DefaultIfEmpty,
                    } => (source.as_ref(), true),
                    body => (body, false),
                };
                let op = t.operand(body)?;
                let seq = t.sequence_of(op, body)?;
                let right = t.sequence(&seq)?;
                let (mut right, right_item) = t.with_frame(right, |t, r| t.frame_item(r))?;
                right.flush()?;
                Ok((right, right_item, outer, left_item))
            })
        })?;
        let parameter = match left.parameter.take() {
            Some(p) => p,
            None => self.ids.next_apply_parameter(),
        };
        let width = left.width();
        let kind = if outer { ApplyKind::Outer } else { ApplyKind::Cross };
        let provider = Provider::apply(left.provider, right.provider, parameter, kind);
        let right_item = if outer {
            right_item.shift(width).to_nullable()
        } else {
            right_item.shift(width)
        };
        let mut frame = Frame::new(provider, right_item.clone());
        frame.joins = left.joins;
        frame.group = left.group.take().map(|mut g| {
            g.exposed = false;
            g
        });
        match result {
            None => Ok(frame),
            Some(result) => {
                let (a, b) = two_params(result)?;
                let (mut frame, item) = self.with_frame(frame, |t, f| {
                    t.with_bindings(
                        vec![
                            (a, Binding::Item { frame: f, item: left_item }),
                            (b, Binding::Item { frame: f, item: right_item }),
                        ],
                        |t| {
                            let op = t.operand(&result.body)?;
                            t.project(op, &result.body)
                        },
                    )
                })?;
                frame.item = item;
                Ok(frame)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn join(
        &mut self,
        outer: &Expr,
        inner: &Expr,
        outer_key: &Lambda,
        inner_key: &Lambda,
        result: &Lambda,
        kind: JoinKind,
        expr: &Expr,
    ) -> Result<Frame, OrmError> {
        let mut left = self.sequence(outer)?;
        left.flush()?;
        let (left, (left_keys, left_item)) = self.with_frame(left, |t, f| {
            let op = t.lambda_operand(f, outer_key)?;
            let keys = t.identity_columns(op, &outer_key.body)?;
            Ok((keys, t.frame_item(f)?))
        })?;
        let mut right = self.sequence(inner)?;
        right.flush()?;
        let (right, (right_keys, right_item)) = self.with_frame(right, |t, f| {
            let op = t.lambda_operand(f, inner_key)?;
            let keys = t.identity_columns(op, &inner_key.body)?;
            Ok((keys, t.frame_item(f)?))
        })?;
        if left_keys.len() != right_keys.len() {
            return Err(OrmError::translation("Join keys have different shapes", expr));
        }
        let width = left.width();
        let provider = Provider::join(
            left.provider,
            right.provider,
            kind,
            left_keys.into_iter().zip(right_keys.into_iter()).collect(),
        )?;
        let right_item = match kind {
            JoinKind::LeftOuter => right_item.shift(width).to_nullable(),
            _ => right_item.shift(width),
        };
        let mut frame = Frame::new(provider, left_item.clone());
        frame.joins = left.joins;
        frame.group = left.group.map(|mut g| {
            g.exposed = false;
            g
        });
        let (a, b) = two_params(result)?;
        let (mut frame, item) = self.with_frame(frame, |t, f| {
            t.with_bindings(
                vec![
                    (a, Binding::Item { frame: f, item: left_item }),
                    (b, Binding::Item { frame: f, item: right_item }),
                ],
                |t| {
                    let op = t.operand(&result.body)?;
                    t.project(op, &result.body)
                },
            )
        })?;
        frame.item = item;
        Ok(frame)
    }

    fn group_join(
        &mut self,
        outer: &Expr,
        inner: &Expr,
        outer_key: &Lambda,
        inner_key: &Lambda,
        result: &Lambda,
    ) -> Result<Frame, OrmError> {
        let mut left = self.sequence(outer)?;
        left.flush()?;
        let outer_param = single_param(outer_key)?;
        let inner_param = single_param(inner_key)?;
        let (a, b) = two_params(result)?;
        let hidden_outer = self.hidden_name("o");
        let hidden_inner = self.hidden_name("i");
        let group = inner.clone().filter(Lambda::new(
            &hidden_inner,
            inner_key
                .body
                .rename_param(&inner_param, &hidden_inner)
                .eq(outer_key.body.rename_param(&outer_param, &hidden_outer)),
        ));
        let (mut frame, item) = self.with_frame(left, |t, f| {
            let binding = t.frame_binding(f);
            t.hidden.insert(hidden_outer, binding.clone());
            t.with_bindings(vec![(a, binding), (b, Binding::Sequence(group))], |t| {
                let op = t.operand(&result.body)?;
                t.project(op, &result.body)
            })
        })?;
        frame.item = item;
        if let Some(g) = frame.group.as_mut() {
            g.exposed = false;
        }
        Ok(frame)
    }

    fn group_by(
        &mut self,
        source: &Expr,
        key: &Lambda,
        element: Option<&Lambda>,
        result: Option<&Lambda>,
    ) -> Result<Frame, OrmError> {
        let mut frame = self.sequence(source)?;
        frame.flush()?;
        let key_param = single_param(key)?;
        let (mut frame, (key_item, source_item)) = self.with_frame(frame, |t, f| {
            let source_item = t.frame_item(f)?;
            let op = t.lambda_operand(f, key)?;
            Ok((t.project(op, &key.body)?, source_item))
        })?;
        let mut key_columns = key_item.distinct_columns();
        if key_columns.is_empty() {
            // Constant keys still need one group column.
            let name = self.ids.next_column();
            key_columns.push(frame.calculate(
                &name,
                TupleExpr::literal(Field::IntField(0)),
                DataType::Int,
                false,
            ));
        }
        let mut map: ColumnMap = vec![None; frame.width()];
        for (i, c) in key_columns.iter().enumerate() {
            map[*c] = Some(i);
        }
        let group_key = key_item.remap(&map)?;

        let id = self.next_group;
        self.next_group += 1;
        let group_name = format!("$g{}", id);
        self.hidden.insert(group_name.clone(), Binding::Group(id));
        let element_name = self.hidden_name("e");
        let mut elements = source.clone().filter(Lambda::new(
            &element_name,
            key.body.rename_param(&key_param, &element_name).binary(
                BinaryOp::NullSafeEqual,
                Expr::Param(group_name).member("Key"),
            ),
        ));
        if let Some(el) = element {
            elements = elements.select(el.clone());
        }

        let provider = Provider::aggregate(frame.provider, key_columns, vec![])?;
        let mut group_frame = Frame::new(provider, group_key.clone());
        group_frame.group = Some(GroupInfo {
            id,
            key: group_key.clone(),
            elements,
            source_item,
            element: element.cloned(),
            exposed: true,
            item: None,
        });
        match result {
            None => Ok(group_frame),
            Some(result) => {
                let (k, g) = two_params(result)?;
                let (mut group_frame, item) = self.with_frame(group_frame, |t, f| {
                    t.with_bindings(
                        vec![
                            (k, Binding::Item { frame: f, item: group_key }),
                            (g, Binding::Group(id)),
                        ],
                        |t| {
                            let op = t.operand(&result.body)?;
                            t.project(op, &result.body)
                        },
                    )
                })?;
                group_frame.item = item;
                if let Some(info) = group_frame.group.as_mut() {
                    info.exposed = false;
                }
                Ok(group_frame)
            }
        }
    }

    // Root terminals.

    fn root_terminal(
        &mut self,
        source: &Expr,
        method: &QueryMethod,
        expr: &Expr,
    ) -> Result<Translation, OrmError> {
        let frame = self.sequence(source)?;
        match method {
            QueryMethod::First {
                predicate,
                or_default,
            }
            | QueryMethod::Single {
                predicate,
                or_default,
            } => {
                let mut frame = match predicate {
                    Some(p) => self.filter(frame, p, false)?,
                    None => frame,
                };
                frame.flush()?;
                let (limit, result) = match method {
                    QueryMethod::First { .. } => (
                        1,
                        ResultKind::First {
                            or_default: *or_default,
                        },
                    ),
                    _ => (
                        2,
                        ResultKind::Single {
                            or_default: *or_default,
                        },
                    ),
                };
                frame.provider = Provider::take(frame.provider, Count::Constant(limit));
                let mut translation = self.finish(frame)?;
                translation.result = result;
                Ok(translation)
            }
            QueryMethod::Any(_) | QueryMethod::All(_) | QueryMethod::Contains(_) => {
                let (frame, negated) = match method {
                    QueryMethod::Any(Some(p)) => (self.filter(frame, p, false)?, false),
                    QueryMethod::All(p) => (self.filter(frame, p, true)?, true),
                    QueryMethod::Contains(value) => {
                        let predicate = self.contains_predicate(value);
                        (self.filter(frame, &predicate, false)?, false)
                    }
                    _ => (frame, false),
                };
                let name = self.ids.next_column();
                Ok(Translation {
                    provider: Provider::existence(frame.provider, &name, negated),
                    projector: ItemExpr::column(0, DataType::Bool, false),
                    result: ResultKind::Exists,
                })
            }
            QueryMethod::Count { predicate, long } => {
                let frame = match predicate {
                    Some(p) => self.filter(frame, p, false)?,
                    None => frame,
                };
                let name = self.ids.next_column();
                let provider = Provider::aggregate(
                    frame.provider,
                    vec![],
                    vec![(name, AggregateKind::Count, None)],
                )?;
                Ok(Translation {
                    provider,
                    projector: ItemExpr::column(0, DataType::Long, false),
                    result: ResultKind::Count { long: *long },
                })
            }
            QueryMethod::Aggregate { kind, selector } => {
                let (frame, (column, nullable)) = self.with_frame(frame, |t, f| {
                    let op = match selector {
                        Some(s) => t.lambda_operand(f, s)?,
                        None => {
                            let item = t.frame_item(f)?;
                            Operand::Item { frame: f, item }
                        }
                    };
                    let (e, dtype, nullable) = t.to_scalar(op, expr)?;
                    Ok((t.materialize(e, dtype, nullable), nullable))
                })?;
                let name = self.ids.next_column();
                let provider = Provider::aggregate(frame.provider, vec![], vec![(name, *kind, Some(column))])
                    .map_err(|e| OrmError::translation(e.to_string(), expr))?;
                let dtype = provider.header().column(0)?.dtype;
                Ok(Translation {
                    provider,
                    projector: ItemExpr::column(0, dtype, true),
                    result: ResultKind::Aggregate {
                        kind: *kind,
                        dtype,
                        nullable,
                    },
                })
            }
            _ => Err(OrmError::translation("Expected a terminal method", expr)),
        }
    }

    fn contains_predicate(&mut self, value: &Expr) -> Lambda {
        let name = self.hidden_name("c");
        Lambda::new(&name, Expr::Param(name.clone()).eq(value.clone()))
    }

    // Lambda bodies.

    fn operand(&mut self, expr: &Expr) -> Result<Operand, OrmError> {
        match expr {
            Expr::Root(_) | Expr::Local(_) => Ok(Operand::Sequence(expr.clone())),
            Expr::Param(name) => self.lookup(name, expr),
            Expr::Constant(Field::Null) => Ok(Operand::Null),
            Expr::Constant(f) => match f.dtype() {
                Some(dtype) => Ok(Operand::Scalar {
                    expr: TupleExpr::literal(f.clone()),
                    dtype,
                    nullable: false,
                }),
                None => Ok(Operand::Null),
            },
            Expr::Variable { name, dtype } => Ok(Operand::Scalar {
                expr: TupleExpr::Parameter(ParamKey::Named(name.clone())),
                dtype: *dtype,
                nullable: true,
            }),
            Expr::Member { source, name } => {
                let source = self.operand(source)?;
                self.member(source, name, expr)
            }
            Expr::Binary { op, left, right } => self.binary(*op, left, right, expr),
            Expr::Unary { op, operand } => self.unary(*op, operand, expr),
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => {
                let test = self.operand(test)?;
                let (test, _) = self.predicate(test, expr)?;
                let a = self.operand(if_true)?;
                let b = self.operand(if_false)?;
                let ((ae, ad, an), (be, bd, bn)) = self.scalar_pair(a, b, expr)?;
                let dtype = ad.promote(bd).ok_or_else(|| {
                    OrmError::translation(format!("Branches of types {} and {}", ad, bd), expr)
                })?;
                Ok(Operand::Scalar {
                    expr: TupleExpr::Conditional {
                        test: Box::new(test),
                        if_true: Box::new(ae),
                        if_false: Box::new(be),
                    },
                    dtype,
                    nullable: an || bn,
                })
            }
            Expr::Call { function, args } => self.call(*function, args, expr),
            Expr::New(members) => {
                let mut items = Vec::with_capacity(members.len());
                for (name, e) in members {
                    let op = self.operand(e)?;
                    items.push((name.clone(), self.project(op, e)?));
                }
                Ok(Operand::Item {
                    frame: self.current(),
                    item: ItemExpr::Anonymous { members: items },
                })
            }
            Expr::Method { source, method } => {
                if method.is_sequence() {
                    Ok(Operand::Sequence(expr.clone()))
                } else {
                    self.nested_terminal(source, method, expr)
                }
            }
        }
    }

    fn lookup(&mut self, name: &str, expr: &Expr) -> Result<Operand, OrmError> {
        let binding = self
            .scopes
            .iter()
            .rev()
            .find_map(|s| s.get(name))
            .or_else(|| self.hidden.get(name))
            .cloned()
            .ok_or_else(|| OrmError::translation(format!("Unknown parameter {}", name), expr))?;
        match binding {
            Binding::Item { frame, item } => Ok(Operand::Item { frame, item }),
            Binding::Group(id) => match self.group_frame(id) {
                Some(f) => Ok(Operand::Group(f)),
                None => Err(OrmError::translation("Group is no longer in scope", expr)),
            },
            Binding::Sequence(e) => Ok(Operand::Sequence(e)),
        }
    }

    fn sequence_of(&self, op: Operand, expr: &Expr) -> Result<Expr, OrmError> {
        match op {
            Operand::Sequence(e) => Ok(e),
            Operand::Group(f) => match &self.frames[f].group {
                Some(g) => Ok(g.elements.clone()),
                None => Err(OrmError::translation("Group is no longer in scope", expr)),
            },
            Operand::Item {
                item: ItemExpr::SubQuery(SubQueryRef {
                    expression: Some(e),
                    ..
                }),
                ..
            }
            | Operand::Item {
                item:
                    ItemExpr::Grouping {
                        elements: SubQueryRef {
                            expression: Some(e),
                            ..
                        },
                        ..
                    },
                ..
            } => Ok(e),
            _ => Err(OrmError::translation("Expression is not a sequence", expr)),
        }
    }

    fn member(&mut self, source: Operand, name: &str, expr: &Expr) -> Result<Operand, OrmError> {
        match source {
            Operand::Item { frame, item } => self.item_member(frame, &item, name, expr),
            Operand::Reference {
                frame,
                fk,
                target,
                nullable,
            } => {
                let catalog = self.catalog;
                let target_type = catalog.get_type(&target)?;
                if let Some(field) = target_type.field(name) {
                    // The key of a referenced entity is the foreign key itself.
                    if fk.len() == 1 && target_type.key == [field.mapping.offset] && field.mapping.length == 1 {
                        let dtype = target_type.columns[field.mapping.offset].dtype;
                        return Ok(Operand::Item {
                            frame,
                            item: ItemExpr::column(fk[0], dtype, nullable),
                        });
                    }
                }
                let entity = self.dereference(frame, &fk, &target, nullable)?;
                self.item_member(frame, &entity, name, expr)
            }
            Operand::Group(f) if name == "Key" => match &self.frames[f].group {
                Some(g) => Ok(Operand::Item {
                    frame: f,
                    item: g.key.clone(),
                }),
                None => Err(OrmError::translation("Group is no longer in scope", expr)),
            },
            Operand::Scalar {
                expr: e,
                dtype,
                nullable,
            } => self.scalar_member(e, dtype, nullable, name, expr),
            _ => Err(OrmError::translation(format!("Unknown member {}", name), expr)),
        }
    }

    fn item_member(&mut self, frame: usize, item: &ItemExpr, name: &str, expr: &Expr) -> Result<Operand, OrmError> {
        match item {
            ItemExpr::Entity {
                type_name,
                columns,
                nullable,
                ..
            } => {
                let catalog = self.catalog;
                let type_info = catalog.get_type(type_name)?;
                let field = type_info.field(name).ok_or_else(|| {
                    OrmError::translation(format!("{} has no field {}", type_name, name), expr)
                })?;
                self.field_operand(frame, type_info, field, item, columns, *nullable)
            }
            ItemExpr::Structure { members, .. } | ItemExpr::Anonymous { members } => {
                match members.iter().find(|(n, _)| n == name) {
                    Some((_, member)) => Ok(Operand::Item {
                        frame,
                        item: member.clone(),
                    }),
                    None => Err(OrmError::translation(format!("Unknown member {}", name), expr)),
                }
            }
            ItemExpr::Grouping { key, .. } if name == "Key" => Ok(Operand::Item {
                frame,
                item: key.as_ref().clone(),
            }),
            ItemExpr::Column { .. } | ItemExpr::Constant(_) => {
                let (e, dtype, nullable) = self.to_scalar(
                    Operand::Item {
                        frame,
                        item: item.clone(),
                    },
                    expr,
                )?;
                self.scalar_member(e, dtype, nullable, name, expr)
            }
            _ => Err(OrmError::translation(format!("Unknown member {}", name), expr)),
        }
    }

    fn field_operand(
        &mut self,
        frame: usize,
        type_info: &TypeInfo,
        field: &FieldInfo,
        owner: &ItemExpr,
        columns: &[usize],
        nullable: bool,
    ) -> Result<Operand, OrmError> {
        let nullable = nullable || field.nullable;
        match &field.kind {
            FieldKind::Scalar(dtype) => Ok(Operand::Item {
                frame,
                item: ItemExpr::column(columns[field.mapping.offset], *dtype, nullable),
            }),
            FieldKind::Structure(fields) => Ok(Operand::Item {
                frame,
                item: structure_item(
                    &format!("{}.{}", type_info.name, field.name),
                    fields,
                    columns,
                    nullable,
                ),
            }),
            FieldKind::Reference { target } => Ok(Operand::Reference {
                frame,
                fk: field.mapping.range().map(|i| columns[i]).collect(),
                target: target.clone(),
                nullable,
            }),
            FieldKind::EntitySet { target, inverse } => {
                let owner_name = self.hidden_name("o");
                self.hidden.insert(
                    owner_name.clone(),
                    Binding::Item {
                        frame,
                        item: owner.clone(),
                    },
                );
                let element = self.hidden_name("e");
                Ok(Operand::Sequence(Expr::root(target).filter(Lambda::new(
                    &element,
                    Expr::Param(element.clone())
                        .member(inverse)
                        .eq(Expr::Param(owner_name)),
                ))))
            }
        }
    }

    fn scalar_member(
        &mut self,
        e: TupleExpr,
        dtype: DataType,
        nullable: bool,
        name: &str,
        expr: &Expr,
    ) -> Result<Operand, OrmError> {
        use common::logical_plan::DatePart;
        let function = |function: ScalarFunction| Operand::Scalar {
            expr: TupleExpr::Function {
                function,
                args: vec![e.clone()],
            },
            dtype: DataType::Int,
            nullable,
        };
        match (dtype, name) {
            (DataType::String, "Length") => Ok(function(ScalarFunction::Length)),
            (DataType::DateTime, "Year") => Ok(function(ScalarFunction::DatePart(DatePart::Year))),
            (DataType::DateTime, "Month") => Ok(function(ScalarFunction::DatePart(DatePart::Month))),
            (DataType::DateTime, "Day") => Ok(function(ScalarFunction::DatePart(DatePart::Day))),
            (DataType::DateTime, "Hour") => Ok(function(ScalarFunction::DatePart(DatePart::Hour))),
            (DataType::DateTime, "Minute") => {
                Ok(function(ScalarFunction::DatePart(DatePart::Minute)))
            }
            (DataType::DateTime, "Second") => {
                Ok(function(ScalarFunction::DatePart(DatePart::Second)))
            }
            (_, "HasValue") => Ok(Operand::Scalar {
                expr: TupleExpr::unary(UnaryOp::IsNotNull, e),
                dtype: DataType::Bool,
                nullable: false,
            }),
            (_, "Value") => Ok(Operand::Scalar {
                expr: e,
                dtype,
                nullable: false,
            }),
            _ => Err(OrmError::translation(
                format!("{} has no member {}", dtype, name),
                expr,
            )),
        }
    }

    /// Joins the entity a reference points to into `frame`, once per reference.
    fn dereference(&mut self, frame: usize, fk: &[usize], target: &str, nullable: bool) -> Result<ItemExpr, OrmError> {
        let memo = format!("{}{:?}", target, fk);
        if let Some(item) = self.frames[frame].joins.get(&memo) {
            return Ok(item.clone());
        }
        let catalog = self.catalog;
        let target_type = catalog.get_type(target)?;
        let index = target_type
            .primary_index()
            .ok_or_else(|| OrmError::ValidationError(format!("{} has no primary index", target)))?
            .name
            .clone();
        let alias = self.ids.next_alias();
        let right = Provider::index(target_type, &index, &alias)?;
        let kind = if nullable {
            JoinKind::LeftOuter
        } else {
            JoinKind::Inner
        };
        let fr = &mut self.frames[frame];
        let width = fr.width();
        let pairs = fk.iter().copied().zip(target_type.key.iter().copied()).collect();
        fr.provider = Provider::join(fr.provider.clone(), right, kind, pairs)?;
        let item = entity_item(target_type, width, nullable);
        debug!("Joined {} as {} for {:?}", target, alias, fk);
        fr.joins.insert(memo, item.clone());
        Ok(item)
    }

    fn to_scalar(&mut self, op: Operand, expr: &Expr) -> Result<Scalar, OrmError> {
        match op {
            Operand::Scalar {
                expr,
                dtype,
                nullable,
            } => Ok((expr, dtype, nullable)),
            Operand::Item {
                frame,
                item:
                    ItemExpr::Column {
                        index,
                        dtype,
                        nullable,
                    },
            } => Ok((self.column_ref(frame, index), dtype, nullable)),
            Operand::Item {
                item: ItemExpr::Constant(f),
                ..
            } => match f.dtype() {
                Some(dtype) => Ok((TupleExpr::literal(f), dtype, false)),
                None => Err(OrmError::translation("Untyped null", expr)),
            },
            _ => Err(OrmError::translation("Expression is not a scalar value", expr)),
        }
    }

    fn predicate(&mut self, op: Operand, expr: &Expr) -> Result<(TupleExpr, bool), OrmError> {
        let (e, dtype, nullable) = self.to_scalar(op, expr)?;
        if dtype != DataType::Bool {
            return Err(OrmError::translation(
                format!("Expected a boolean, got {}", dtype),
                expr,
            ));
        }
        Ok((e, nullable))
    }

    /// Two scalars, typing a null literal after the other side.
    fn scalar_pair(&mut self, a: Operand, b: Operand, expr: &Expr) -> Result<(Scalar, Scalar), OrmError> {
        match (a, b) {
            (Operand::Null, Operand::Null) => {
                Err(OrmError::translation("Cannot type null on both sides", expr))
            }
            (Operand::Null, b) => {
                let b = self.to_scalar(b, expr)?;
                Ok(((TupleExpr::literal(Field::Null), b.1, true), b))
            }
            (a, Operand::Null) => {
                let a = self.to_scalar(a, expr)?;
                let dtype = a.1;
                Ok((a, (TupleExpr::literal(Field::Null), dtype, true)))
            }
            (a, b) => Ok((self.to_scalar(a, expr)?, self.to_scalar(b, expr)?)),
        }
    }

    /// Columns identifying a value: entity keys, foreign keys, member columns.
    /// `None` for the null literal.
    fn identity(&mut self, op: Operand, expr: &Expr) -> Result<Option<Vec<Scalar>>, OrmError> {
        match op {
            Operand::Null => Ok(None),
            Operand::Scalar { .. } => Ok(Some(vec![self.to_scalar(op, expr)?])),
            Operand::Reference {
                frame,
                fk,
                target,
                nullable,
            } => {
                let catalog = self.catalog;
                let target_type = catalog.get_type(&target)?;
                let mut res = Vec::with_capacity(fk.len());
                for (c, k) in fk.iter().zip(target_type.key.iter()) {
                    let dtype = target_type.columns[*k].dtype;
                    res.push((self.column_ref(frame, *c), dtype, nullable));
                }
                Ok(Some(res))
            }
            Operand::Item { frame, item } => self.item_identity(frame, &item, expr),
            _ => Err(OrmError::translation("Value cannot be compared", expr)),
        }
    }

    fn item_identity(&mut self, frame: usize, item: &ItemExpr, expr: &Expr) -> Result<Option<Vec<Scalar>>, OrmError> {
        match item {
            ItemExpr::Constant(Field::Null) => Ok(None),
            ItemExpr::Column { .. } | ItemExpr::Constant(_) => Ok(Some(vec![self.to_scalar(
                Operand::Item {
                    frame,
                    item: item.clone(),
                },
                expr,
            )?])),
            ItemExpr::Entity { key, nullable, .. } => {
                let mut res = Vec::with_capacity(key.len());
                for k in key {
                    let dtype = self.frames[frame].provider.header().column(*k)?.dtype;
                    res.push((self.column_ref(frame, *k), dtype, *nullable));
                }
                Ok(Some(res))
            }
            ItemExpr::Structure { members, .. } | ItemExpr::Anonymous { members } => {
                let mut res = Vec::new();
                for (_, m) in members {
                    match self.item_identity(frame, m, expr)? {
                        Some(cols) => res.extend(cols),
                        None => {
                            return Err(OrmError::translation(
                                "Null members cannot be compared",
                                expr,
                            ))
                        }
                    }
                }
                Ok(Some(res))
            }
            _ => Err(OrmError::translation("Sequences cannot be compared", expr)),
        }
    }

    /// Columns of the current frame identifying `op`, materialized where computed.
    fn identity_columns(&mut self, op: Operand, expr: &Expr) -> Result<Vec<usize>, OrmError> {
        let current = self.current();
        let values = self
            .identity(op, expr)?
            .ok_or_else(|| OrmError::translation("Cannot key on null", expr))?;
        Ok(values
            .into_iter()
            .map(|(e, dtype, nullable)| match e {
                TupleExpr::Column(i) => i,
                e => {
                    let name = self.ids.next_column();
                    self.frames[current].calculate(&name, e, dtype, nullable)
                }
            })
            .collect())
    }

    fn equality(&mut self, op: BinaryOp, left: Operand, right: Operand, expr: &Expr) -> Result<Operand, OrmError> {
        let l = self.identity(left, expr)?;
        let r = self.identity(right, expr)?;
        let (test, nullable) = match (l, r) {
            (None, None) => (TupleExpr::true_literal(), false),
            (Some(cols), None) | (None, Some(cols)) => (
                TupleExpr::conjunction(cols.into_iter().map(|(e, _, _)| TupleExpr::is_null(e)).collect())
                    .unwrap_or_else(TupleExpr::true_literal),
                false,
            ),
            (Some(l), Some(r)) => {
                if l.len() != r.len() {
                    return Err(OrmError::translation("Compared values have different shapes", expr));
                }
                let mut parts = Vec::with_capacity(l.len());
                let mut nullable = false;
                for ((le, ld, ln), (re, rd, rn)) in l.into_iter().zip(r.into_iter()) {
                    if ld.promote(rd).is_none() {
                        return Err(OrmError::translation(
                            format!("Cannot compare {} with {}", ld, rd),
                            expr,
                        ));
                    }
                    nullable |= ln || rn;
                    let cmp = if op == BinaryOp::NullSafeEqual {
                        BinaryOp::NullSafeEqual
                    } else {
                        BinaryOp::Equal
                    };
                    parts.push(TupleExpr::binary(cmp, le, re));
                }
                let test = TupleExpr::conjunction(parts).unwrap_or_else(TupleExpr::true_literal);
                (test, nullable && op != BinaryOp::NullSafeEqual)
            }
        };
        let test = match (op, test) {
            (
                BinaryOp::NotEqual,
                TupleExpr::Binary {
                    op: BinaryOp::Equal,
                    left,
                    right,
                },
            ) => TupleExpr::Binary {
                op: BinaryOp::NotEqual,
                left,
                right,
            },
            (BinaryOp::NotEqual, test) => TupleExpr::not(test),
            (_, test) => test,
        };
        Ok(Operand::Scalar {
            expr: test,
            dtype: DataType::Bool,
            nullable,
        })
    }

    fn binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr, expr: &Expr) -> Result<Operand, OrmError> {
        let l = self.operand(left)?;
        let r = self.operand(right)?;
        if matches!(op, BinaryOp::Equal | BinaryOp::NotEqual | BinaryOp::NullSafeEqual) {
            return self.equality(op, l, r, expr);
        }
        let ((le, ld, ln), (re, rd, rn)) = self.scalar_pair(l, r, expr)?;
        let nullable = ln || rn;
        let mismatch = || OrmError::translation(format!("Operator {} on {} and {}", op, ld, rd), expr);
        let (op, le, re, dtype) = if op.is_logical() {
            if ld != DataType::Bool || rd != DataType::Bool {
                return Err(mismatch());
            }
            (op, le, re, DataType::Bool)
        } else if op.is_comparison() {
            if ld.promote(rd).is_none() {
                return Err(mismatch());
            }
            (op, le, re, DataType::Bool)
        } else if op == BinaryOp::Concat
            || (op == BinaryOp::Add && (ld == DataType::String || rd == DataType::String))
        {
            let text = |e: TupleExpr, d: DataType| {
                if d == DataType::String {
                    e
                } else {
                    TupleExpr::Cast {
                        operand: Box::new(e),
                        dtype: DataType::String,
                    }
                }
            };
            (BinaryOp::Concat, text(le, ld), text(re, rd), DataType::String)
        } else {
            match ld.promote(rd) {
                Some(dtype) if dtype.is_numeric() => (op, le, re, dtype),
                _ => return Err(mismatch()),
            }
        };
        Ok(Operand::Scalar {
            expr: TupleExpr::binary(op, le, re),
            dtype,
            nullable,
        })
    }

    fn unary(&mut self, op: UnaryOp, operand: &Expr, expr: &Expr) -> Result<Operand, OrmError> {
        let value = self.operand(operand)?;
        match op {
            UnaryOp::IsNull | UnaryOp::IsNotNull => {
                let eq = if op == UnaryOp::IsNull {
                    BinaryOp::Equal
                } else {
                    BinaryOp::NotEqual
                };
                self.equality(eq, value, Operand::Null, expr)
            }
            UnaryOp::Not => {
                let (e, nullable) = self.predicate(value, expr)?;
                Ok(Operand::Scalar {
                    expr: TupleExpr::not(e),
                    dtype: DataType::Bool,
                    nullable,
                })
            }
            UnaryOp::Negate => {
                let (e, dtype, nullable) = self.to_scalar(value, expr)?;
                if !dtype.is_numeric() {
                    return Err(OrmError::translation(format!("Cannot negate {}", dtype), expr));
                }
                Ok(Operand::Scalar {
                    expr: TupleExpr::unary(UnaryOp::Negate, e),
                    dtype,
                    nullable,
                })
            }
        }
    }

    fn call(&mut self, function: ExprFunction, args: &[Expr], expr: &Expr) -> Result<Operand, OrmError> {
        match function {
            ExprFunction::StartsWith | ExprFunction::EndsWith | ExprFunction::StringContains => {
                let (value, text) = match args {
                    [value, Expr::Constant(Field::StringField(text))] => (value, text),
                    _ => {
                        return Err(OrmError::translation(
                            "String matching needs a constant pattern",
                            expr,
                        ))
                    }
                };
                let op = self.operand(value)?;
                let (e, dtype, nullable) = self.to_scalar(op, expr)?;
                if dtype != DataType::String {
                    return Err(OrmError::translation(format!("Cannot match {}", dtype), expr));
                }
                let (escaped, escape) = escape_like(text);
                let pattern = match function {
                    ExprFunction::StartsWith => format!("{}%", escaped),
                    ExprFunction::EndsWith => format!("%{}", escaped),
                    _ => format!("%{}%", escaped),
                };
                Ok(Operand::Scalar {
                    expr: TupleExpr::Like {
                        operand: Box::new(e),
                        pattern,
                        escape,
                    },
                    dtype: DataType::Bool,
                    nullable,
                })
            }
            ExprFunction::Scalar(function) => {
                let mut values = Vec::with_capacity(args.len());
                for a in args {
                    let op = self.operand(a)?;
                    values.push(self.to_scalar(op, a)?);
                }
                let (dtype, nullable) = function_type(function, &values).ok_or_else(|| {
                    OrmError::translation(format!("Invalid arguments for {}", function), expr)
                })?;
                Ok(Operand::Scalar {
                    expr: TupleExpr::Function {
                        function,
                        args: values.into_iter().map(|v| v.0).collect(),
                    },
                    dtype,
                    nullable,
                })
            }
        }
    }

    // Projection.

    /// Column of the current frame holding `e`.
    fn materialize(&mut self, e: TupleExpr, dtype: DataType, nullable: bool) -> usize {
        match e {
            TupleExpr::Column(i) => i,
            e => {
                let name = self.ids.next_column();
                let current = self.current();
                self.frames[current].calculate(&name, e, dtype, nullable)
            }
        }
    }

    /// Item over the current frame for `op`.
    fn project(&mut self, op: Operand, expr: &Expr) -> Result<ItemExpr, OrmError> {
        let current = self.current();
        match op {
            Operand::Null => Ok(ItemExpr::Constant(Field::Null)),
            Operand::Scalar {
                expr: TupleExpr::Literal(f),
                ..
            } => Ok(ItemExpr::Constant(f)),
            Operand::Scalar {
                expr: e,
                dtype,
                nullable,
            } => Ok(ItemExpr::column(self.materialize(e, dtype, nullable), dtype, nullable)),
            Operand::Item { frame, item } if frame == current => Ok(item),
            Operand::Item { frame, item } => self.localize(frame, &item),
            Operand::Reference {
                frame,
                fk,
                target,
                nullable,
            } => {
                let item = self.dereference(frame, &fk, &target, nullable)?;
                self.project(Operand::Item { frame, item }, expr)
            }
            Operand::Group(f) => {
                let item = self.grouping(f)?;
                self.project(Operand::Item { frame: f, item }, expr)
            }
            Operand::Sequence(e) => Ok(ItemExpr::SubQuery(self.subquery_at(current, &e)?)),
        }
    }

    /// Copies the columns of an outer item into the current frame.
    fn localize(&mut self, frame: usize, item: &ItemExpr) -> Result<ItemExpr, OrmError> {
        let current = self.current();
        let header = self.frames[frame].provider.header().clone();
        let mut map: ColumnMap = vec![None; header.len()];
        for c in item.distinct_columns() {
            let column = header.column(c)?;
            let e = self.column_ref(frame, c);
            let name = self.ids.next_column();
            map[c] = Some(self.frames[current].calculate(&name, e, column.dtype, column.nullable));
        }
        item.remap(&map)
    }

    /// Translates `e` as a separate query whose outer reads of frame `f`
    /// become parameters bound from the outer row.
    fn subquery_at(&mut self, f: usize, e: &Expr) -> Result<SubQueryRef, OrmError> {
        let nested = self.sequence(e)?;
        let translation = self.finish(nested)?;
        let mut provider = translation.provider;
        let mut bindings = Vec::new();
        if let Some(p) = self.frames[f].parameter {
            let indexes = provider.apply_parameter_indexes(p);
            if !indexes.is_empty() {
                provider = provider.apply_parameter_to_query_parameter(p);
                bindings = indexes
                    .into_iter()
                    .map(|index| (ParamKey::Outer { parameter: p, index }, index))
                    .collect();
            }
        }
        if !free_parameters(&provider).is_empty() {
            return Err(OrmError::translation(
                "Nested sequences can only read the enclosing query level",
                e,
            ));
        }
        let query = self.preparer.prepare(Translation {
            provider,
            projector: translation.projector,
            result: ResultKind::Sequence,
        })?;
        Ok(SubQueryRef {
            query: Arc::new(query),
            bindings,
            expression: Some(e.clone()),
        })
    }

    // Nested terminals.

    fn nested_terminal(&mut self, source: &Expr, method: &QueryMethod, expr: &Expr) -> Result<Operand, OrmError> {
        let source_op = self.operand(source)?;
        if let Operand::Group(f) = source_op {
            if let Some(folded) = self.try_fold(f, method, expr)? {
                return Ok(folded);
            }
        }
        let seq = self.sequence_of(source_op, expr)?;
        let current = self.current();
        match method {
            QueryMethod::Any(_) | QueryMethod::All(_) | QueryMethod::Contains(_) => {
                let nested = self.sequence(&seq)?;
                let (nested, negated) = match method {
                    QueryMethod::Any(Some(p)) => (self.filter(nested, p, false)?, false),
                    QueryMethod::All(p) => (self.filter(nested, p, true)?, true),
                    QueryMethod::Contains(value) => {
                        let predicate = self.contains_predicate(value);
                        (self.filter(nested, &predicate, false)?, false)
                    }
                    _ => (nested, false),
                };
                let name = self.ids.next_column();
                let existence = Provider::existence(nested.provider, &name, negated);
                let column = self.attach(current, existence, ApplyKind::Existence);
                Ok(Operand::Item {
                    frame: current,
                    item: ItemExpr::column(column, DataType::Bool, false),
                })
            }
            QueryMethod::Count { predicate, long } => {
                let nested = self.sequence(&seq)?;
                let nested = match predicate {
                    Some(p) => self.filter(nested, p, false)?,
                    None => nested,
                };
                let (column, _, _) = self.attach_aggregate(current, nested.provider, AggregateKind::Count, None)?;
                Ok(count_operand(TupleExpr::Column(column), *long))
            }
            QueryMethod::Aggregate { kind, selector } => {
                let nested = self.sequence(&seq)?;
                let (nested, column) = self.with_frame(nested, |t, f| {
                    let op = match selector {
                        Some(s) => t.lambda_operand(f, s)?,
                        None => {
                            let item = t.frame_item(f)?;
                            Operand::Item { frame: f, item }
                        }
                    };
                    let (e, dtype, nullable) = t.to_scalar(op, expr)?;
                    Ok(t.materialize(e, dtype, nullable))
                })?;
                let (column, dtype, nullable) =
                    self.attach_aggregate(current, nested.provider, *kind, Some(column))?;
                Ok(aggregate_operand(*kind, TupleExpr::Column(column), dtype, nullable))
            }
            QueryMethod::First { predicate, .. } | QueryMethod::Single { predicate, .. } => {
                let nested = self.sequence(&seq)?;
                let nested = match predicate {
                    Some(p) => self.filter(nested, p, false)?,
                    None => nested,
                };
                let (mut nested, item) = self.with_frame(nested, |t, f| t.frame_item(f))?;
                nested.flush()?;
                let first = Provider::take(nested.provider, Count::Constant(1));
                let column = self.attach(current, first, ApplyKind::Outer);
                Ok(Operand::Item {
                    frame: current,
                    item: item.shift(column).to_nullable(),
                })
            }
            _ => Err(OrmError::translation("Expected a terminal method", expr)),
        }
    }

    /// Appends `right` applied to every row of frame `f`; returns the index of its first column.
    fn attach(&mut self, f: usize, right: Provider, kind: ApplyKind) -> usize {
        let parameter = match self.frames[f].parameter.take() {
            Some(p) => p,
            None => self.ids.next_apply_parameter(),
        };
        let frame = &mut self.frames[f];
        let width = frame.width();
        frame.provider = Provider::apply(frame.provider.clone(), right, parameter, kind);
        width
    }

    fn attach_aggregate(
        &mut self,
        f: usize,
        source: Provider,
        kind: AggregateKind,
        column: Option<usize>,
    ) -> Result<(usize, DataType, bool), OrmError> {
        let name = self.ids.next_column();
        let aggregate = Provider::aggregate(source, vec![], vec![(name, kind, column)])?;
        let index = self.attach(f, aggregate, ApplyKind::Aggregate);
        let column = self.frames[f].provider.header().column(index)?;
        Ok((index, column.dtype, column.nullable))
    }

    /// Adds an aggregate over the groups of frame `f` to its group-by, when
    /// the group-by is still the top of the frame.
    fn try_fold(&mut self, f: usize, method: &QueryMethod, expr: &Expr) -> Result<Option<Operand>, OrmError> {
        if f != self.current() {
            return Ok(None);
        }
        let (kind, selector) = match method {
            QueryMethod::Count {
                predicate: None, ..
            } => (AggregateKind::Count, None),
            QueryMethod::Aggregate { kind, selector } => (*kind, selector.clone()),
            _ => return Ok(None),
        };
        let group = match &self.frames[f].group {
            Some(g) => g.clone(),
            None => return Ok(None),
        };
        let (source, group_indexes, columns) = match self.frames[f].provider.kind() {
            ProviderKind::Aggregate {
                source,
                group_indexes,
                columns,
            } => (source.as_ref().clone(), group_indexes.clone(), columns.clone()),
            _ => return Ok(None),
        };
        let (source, column) = if kind == AggregateKind::Count {
            (Frame::new(source, group.source_item.clone()), None)
        } else {
            let (source, column) = self.with_frame(Frame::new(source, group.source_item.clone()), |t, s| {
                let mut binding = t.frame_binding(s);
                if let Some(element) = &group.element {
                    let op = t.lambda_operand(s, element)?;
                    binding = Binding::Item {
                        frame: s,
                        item: t.project(op, &element.body)?,
                    };
                }
                let op = match &selector {
                    Some(sel) => {
                        let param = single_param(sel)?;
                        t.with_bindings(vec![(param, binding)], |t| t.operand(&sel.body))?
                    }
                    None => match binding {
                        Binding::Item { frame, item } => Operand::Item { frame, item },
                        _ => return Err(OrmError::translation("Aggregate needs a selector", expr)),
                    },
                };
                let (e, dtype, nullable) = t.to_scalar(op, expr)?;
                Ok(t.materialize(e, dtype, nullable))
            })?;
            (source, Some(column))
        };
        if let Some(p) = self.frames[f].parameter {
            if source.provider.references_parameter(p) {
                // The selector reads the group itself; aggregate over the elements instead.
                return Ok(None);
            }
        }
        let name = self.ids.next_column();
        let mut aggregates: Vec<(String, AggregateKind, Option<usize>)> = columns
            .iter()
            .map(|c| (c.column.name.clone(), c.kind, c.source_index))
            .collect();
        aggregates.push((name, kind, column));
        let index = group_indexes.len() + columns.len();
        let provider = Provider::aggregate(source.provider, group_indexes, aggregates)
            .map_err(|e| OrmError::translation(e.to_string(), expr))?;
        let result = provider.header().column(index)?.clone();
        self.frames[f].provider = provider;
        debug!("Folded {} into the group-by as column {}", kind, index);
        Ok(Some(match (kind, method) {
            (AggregateKind::Count, QueryMethod::Count { long, .. }) => {
                count_operand(TupleExpr::Column(index), *long)
            }
            _ => aggregate_operand(kind, TupleExpr::Column(index), result.dtype, result.nullable),
        }))
    }
}

fn count_operand(column: TupleExpr, long: bool) -> Operand {
    if long {
        Operand::Scalar {
            expr: column,
            dtype: DataType::Long,
            nullable: false,
        }
    } else {
        Operand::Scalar {
            expr: TupleExpr::Cast {
                operand: Box::new(column),
                dtype: DataType::Int,
            },
            dtype: DataType::Int,
            nullable: false,
        }
    }
}

/// Sums of no rows are zero.
fn aggregate_operand(kind: AggregateKind, column: TupleExpr, dtype: DataType, nullable: bool) -> Operand {
    match (kind, dtype.zero()) {
        (AggregateKind::Sum, Some(zero)) => Operand::Scalar {
            expr: TupleExpr::Function {
                function: ScalarFunction::Coalesce,
                args: vec![column, TupleExpr::literal(zero)],
            },
            dtype,
            nullable: false,
        },
        _ => Operand::Scalar {
            expr: column,
            dtype,
            nullable,
        },
    }
}

fn structure_item(type_name: &str, fields: &[FieldInfo], columns: &[usize], nullable: bool) -> ItemExpr {
    let members = fields
        .iter()
        .filter_map(|field| {
            let nullable = nullable || field.nullable;
            let item = match &field.kind {
                FieldKind::Scalar(dtype) => {
                    ItemExpr::column(columns[field.mapping.offset], *dtype, nullable)
                }
                FieldKind::Structure(nested) => structure_item(
                    &format!("{}.{}", type_name, field.name),
                    nested,
                    columns,
                    nullable,
                ),
                FieldKind::Reference { .. } | FieldKind::EntitySet { .. } => return None,
            };
            Some((field.name.clone(), item))
        })
        .collect();
    ItemExpr::Structure {
        type_name: type_name.to_string(),
        members,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::expression::{lambda, param, var};
    use crate::query::TranslatedQuery;
    use common::catalog::DomainModel;
    use common::testutil::*;

    /// Fails every nested query, so tests see what stays in one provider tree.
    struct NoNested;

    impl QueryPreparer for NoNested {
        fn prepare(&self, _translation: Translation) -> Result<TranslatedQuery, OrmError> {
            Err(OrmError::InvalidOperation(String::from("nested")))
        }
    }

    fn translate(model: &DomainModel, expr: &Expr) -> Result<Translation, OrmError> {
        Translator::new(model, &NoNested).translate(expr)
    }

    fn walk<'p>(provider: &'p Provider, out: &mut Vec<&'p Provider>) {
        out.push(provider);
        for c in provider.children() {
            walk(c, out);
        }
    }

    fn nodes(provider: &Provider) -> Vec<&Provider> {
        let mut out = Vec::new();
        walk(provider, &mut out);
        out
    }

    fn join_kinds(provider: &Provider) -> Vec<JoinKind> {
        nodes(provider)
            .into_iter()
            .filter_map(|p| match p.kind() {
                ProviderKind::Join { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect()
    }

    fn apply_kinds(provider: &Provider) -> Vec<ApplyKind> {
        nodes(provider)
            .into_iter()
            .filter_map(|p| match p.kind() {
                ProviderKind::Apply { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_all_is_negated_existence() {
        init();
        let model = teacher_model();
        let expr = Expr::root("Teacher")
            .filter(lambda(
                "t",
                param("t").member("Gender").eq(Expr::string("Female")),
            ))
            .all(lambda("t", param("t").member("Gender").eq(Expr::string("Male"))));
        let t = translate(&model, &expr).unwrap();
        assert_eq!(t.result, ResultKind::Exists);
        match t.provider.kind() {
            ProviderKind::Existence { source, negated } => {
                assert!(*negated);
                match source.kind() {
                    ProviderKind::Filter { predicate, source } => {
                        assert!(matches!(
                            predicate,
                            TupleExpr::Unary {
                                op: UnaryOp::Not,
                                ..
                            }
                        ));
                        assert!(matches!(source.kind(), ProviderKind::Filter { .. }));
                    }
                    _ => panic!("Expected a filter"),
                }
            }
            _ => panic!("Expected an existence test"),
        }
    }

    #[test]
    fn test_reference_joins() {
        let model = shop_model();
        let expr = Expr::root("Order").select(lambda(
            "o",
            Expr::New(vec![
                (String::from("Name"), param("o").path("Customer.Name")),
                (String::from("City"), param("o").path("Customer.Address.City")),
                (String::from("Salesman"), param("o").path("Salesman.Name")),
            ]),
        ));
        let t = translate(&model, &expr).unwrap();
        let mut kinds = join_kinds(&t.provider);
        kinds.sort_by_key(|k| *k as u8);
        assert_eq!(kinds, vec![JoinKind::Inner, JoinKind::LeftOuter]);
        assert!(matches!(
            t.projector.member("Salesman"),
            Some(ItemExpr::Column { nullable: true, .. })
        ));
        assert!(matches!(
            t.projector.member("Name"),
            Some(ItemExpr::Column { nullable: false, .. })
        ));
    }

    #[test]
    fn test_key_access_does_not_join() {
        let model = shop_model();
        let expr = Expr::root("Order").filter(lambda(
            "o",
            param("o").path("Customer.Id").eq(Expr::int(1)),
        ));
        let t = translate(&model, &expr).unwrap();
        assert!(join_kinds(&t.provider).is_empty());
        match t.provider.kind() {
            ProviderKind::Filter { predicate, .. } => {
                assert_eq!(
                    predicate,
                    &TupleExpr::eq(TupleExpr::Column(3), TupleExpr::literal(Field::IntField(1)))
                );
            }
            _ => panic!("Expected a filter"),
        }
    }

    #[test]
    fn test_nested_count_is_aggregate_apply() {
        let model = shop_model();
        let expr = Expr::root("Customer").select(lambda("c", param("c").member("Orders").count()));
        let t = translate(&model, &expr).unwrap();
        assert_eq!(apply_kinds(&t.provider), vec![ApplyKind::Aggregate]);
        assert!(matches!(
            t.projector,
            ItemExpr::Column {
                dtype: DataType::Int,
                nullable: false,
                ..
            }
        ));
    }

    #[test]
    fn test_nested_sum_is_never_null() {
        let model = shop_model();
        let expr = Expr::root("Customer").select(lambda(
            "c",
            param("c")
                .member("Orders")
                .sum(Some(lambda("o", param("o").member("Total")))),
        ));
        let t = translate(&model, &expr).unwrap();
        assert!(matches!(
            t.projector,
            ItemExpr::Column {
                dtype: DataType::Decimal,
                nullable: false,
                ..
            }
        ));
    }

    #[test]
    fn test_entity_set_any() {
        let model = shop_model();
        let expr = Expr::root("Customer").filter(lambda("c", param("c").member("Orders").any(None)));
        let t = translate(&model, &expr).unwrap();
        assert_eq!(apply_kinds(&t.provider), vec![ApplyKind::Existence]);
    }

    #[test]
    fn test_group_count_folds() {
        let model = shop_model();
        let expr = Expr::root("Order")
            .group_by(lambda("o", param("o").path("Customer.Id")))
            .select(lambda(
                "g",
                Expr::New(vec![
                    (String::from("Customer"), param("g").member("Key")),
                    (String::from("Orders"), param("g").count()),
                ]),
            ));
        let t = translate(&model, &expr).unwrap();
        assert!(apply_kinds(&t.provider).is_empty());
        let aggregates: Vec<_> = nodes(&t.provider)
            .into_iter()
            .filter_map(|p| match p.kind() {
                ProviderKind::Aggregate {
                    group_indexes,
                    columns,
                    ..
                } => Some((group_indexes.clone(), columns.len())),
                _ => None,
            })
            .collect();
        assert_eq!(aggregates, vec![(vec![3], 1)]);
    }

    #[test]
    fn test_groups_prepare_elements() {
        let model = shop_model();
        let expr = Expr::root("Customer").group_by(lambda("c", param("c").member("Name")));
        match translate(&model, &expr) {
            Err(OrmError::InvalidOperation(msg)) => assert_eq!(msg, "nested"),
            other => panic!("Expected the elements query to be prepared, got {:?}", other),
        }
    }

    #[test]
    fn test_take_variable() {
        let model = teacher_model();
        let expr = Expr::root("Teacher").take(var("n", DataType::Int));
        let t = translate(&model, &expr).unwrap();
        match t.provider.kind() {
            ProviderKind::Take { count, .. } => {
                assert_eq!(count, &Count::Parameter(ParamKey::Named(String::from("n"))))
            }
            _ => panic!("Expected take"),
        }
    }

    #[test]
    fn test_unknown_member() {
        let model = teacher_model();
        let expr = Expr::root("Teacher").filter(lambda("t", param("t").member("Age").eq(Expr::int(3))));
        match translate(&model, &expr) {
            Err(OrmError::TranslationError { expression, .. }) => {
                assert!(expression.contains("Age"))
            }
            other => panic!("Expected a translation error, got {:?}", other),
        }
    }

    #[test]
    fn test_default_if_empty_needs_select_many() {
        let model = teacher_model();
        let expr = Expr::root("Teacher").method(QueryMethod::DefaultIfEmpty);
        assert!(matches!(
            translate(&model, &expr),
            Err(OrmError::TranslationError { .. })
        ));
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("abc"), (String::from("abc"), None));
        assert_eq!(escape_like("5%_a"), (String::from("5\\%\\_a"), Some('\\')));
    }
}

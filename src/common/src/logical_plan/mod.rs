use crate::model::TypeInfo;
use crate::{ApplyParameterId, Column, DataType, Header, OrmError, ParamKey, Tuple};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
pub use tuple_expr::*;
mod tuple_expr;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    Inner,
    LeftOuter,
    FullOuter,
    Cross,
}

/// How the right side of an apply is combined with each left row.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplyKind {
    /// Left rows with at least one right row.
    Cross,
    /// Every left row; right columns are null when the right side is empty.
    Outer,
    /// Right side is an existence test producing one boolean column.
    Existence,
    /// Right side is a scalar aggregate producing exactly one row.
    Aggregate,
}

impl ApplyKind {
    /// Existence and aggregate applies already have a direct SQL form
    /// (correlated EXISTS / scalar sub-query) and never need a join.
    pub fn is_self_convertible(self) -> bool {
        matches!(self, ApplyKind::Existence | ApplyKind::Aggregate)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateKind {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op_str = match self {
            AggregateKind::Count => "count",
            AggregateKind::Sum => "sum",
            AggregateKind::Avg => "avg",
            AggregateKind::Min => "min",
            AggregateKind::Max => "max",
        };
        write!(f, "{}", op_str)
    }
}

/// Aggregate output column.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AggregateColumn {
    pub column: Column,
    pub kind: AggregateKind,
    /// Aggregated source column; `None` only for counting rows.
    pub source_index: Option<usize>,
}

/// Column computed from the other columns of the same tuple.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CalculatedColumn {
    pub column: Column,
    pub expression: TupleExpr,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetOp {
    Union,
    Except,
    Intersect,
    /// Bag union, keeps duplicates.
    Concat,
}

/// Row count of take and skip.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub enum Count {
    Constant(u64),
    Parameter(ParamKey),
}

impl fmt::Display for Count {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Count::Constant(n) => write!(f, "{}", n),
            Count::Parameter(p) => write!(f, "{}", p),
        }
    }
}

/// The operation a provider performs. Every provider exclusively owns its children.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum ProviderKind {
    /// In-memory rows; `projection` selects the emitted columns of `columns`.
    Raw {
        rows: Arc<Vec<Tuple>>,
        columns: Header,
        projection: Option<Vec<usize>>,
    },
    /// Scan of a type's table through one of its indexes.
    Index {
        table: String,
        index: String,
        alias: String,
        /// Full column layout of the table.
        table_header: Header,
        /// Emitted positions of `table_header`.
        columns: Vec<usize>,
    },
    Filter {
        source: Box<Provider>,
        predicate: TupleExpr,
    },
    Select {
        source: Box<Provider>,
        columns: Vec<usize>,
    },
    Calculate {
        source: Box<Provider>,
        columns: Vec<CalculatedColumn>,
    },
    Alias {
        source: Box<Provider>,
        alias: String,
    },
    Join {
        left: Box<Provider>,
        right: Box<Provider>,
        kind: JoinKind,
        equal_indexes: Vec<(usize, usize)>,
    },
    /// Join on a predicate over `left ++ right`.
    PredicateJoin {
        left: Box<Provider>,
        right: Box<Provider>,
        kind: JoinKind,
        predicate: TupleExpr,
    },
    Apply {
        left: Box<Provider>,
        right: Box<Provider>,
        parameter: ApplyParameterId,
        kind: ApplyKind,
    },
    /// One row with one boolean column telling whether `source` has rows.
    Existence {
        source: Box<Provider>,
        negated: bool,
    },
    Aggregate {
        source: Box<Provider>,
        group_indexes: Vec<usize>,
        columns: Vec<AggregateColumn>,
    },
    Sort {
        source: Box<Provider>,
        order: Vec<(usize, Direction)>,
    },
    Take {
        source: Box<Provider>,
        count: Count,
    },
    Skip {
        source: Box<Provider>,
        count: Count,
    },
    Distinct {
        source: Box<Provider>,
    },
    Set {
        op: SetOp,
        left: Box<Provider>,
        right: Box<Provider>,
    },
}

/// Node of the relational algebra. The header is derived from the children by the constructors.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Provider {
    header: Header,
    kind: ProviderKind,
}

fn check_index(header: &Header, i: usize, what: &str) -> Result<(), OrmError> {
    if i < header.len() {
        Ok(())
    } else {
        Err(OrmError::ValidationError(format!(
            "{} column {} out of range for {}",
            what, i, header
        )))
    }
}

impl Provider {
    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn kind(&self) -> &ProviderKind {
        &self.kind
    }

    pub fn into_kind(self) -> ProviderKind {
        self.kind
    }

    /// In-memory rows with the given columns.
    ///
    /// # Arguments
    ///
    /// * `columns` - Columns of every row.
    /// * `rows` - Row data.
    pub fn raw(columns: Header, rows: Arc<Vec<Tuple>>) -> Self {
        Self {
            header: columns.clone(),
            kind: ProviderKind::Raw {
                rows,
                columns,
                projection: None,
            },
        }
    }

    /// In-memory rows emitting only the `projection` columns.
    pub fn raw_projected(
        columns: Header,
        rows: Arc<Vec<Tuple>>,
        projection: Vec<usize>,
    ) -> Result<Self, OrmError> {
        Ok(Self {
            header: columns.select(&projection)?,
            kind: ProviderKind::Raw {
                rows,
                columns,
                projection: Some(projection),
            },
        })
    }

    /// Scan of the table of `type_info` through `index`, columns qualified with `alias`.
    ///
    /// # Arguments
    ///
    /// * `type_info` - Scanned type.
    /// * `index` - Name of the index.
    /// * `alias` - Column qualifier.
    pub fn index(type_info: &TypeInfo, index: &str, alias: &str) -> Result<Self, OrmError> {
        if type_info.index(index).is_none() {
            return Err(OrmError::ValidationError(format!(
                "Index {} not found on {}",
                index, type_info.name
            )));
        }
        let table_header = type_info.header(alias);
        let columns = (0..table_header.len()).collect();
        Ok(Self {
            header: table_header.clone(),
            kind: ProviderKind::Index {
                table: type_info.table.clone(),
                index: index.to_string(),
                alias: alias.to_string(),
                table_header,
                columns,
            },
        })
    }

    /// Same index scan emitting only `columns` of the table layout.
    pub fn index_columns(
        table: &str,
        index: &str,
        alias: &str,
        table_header: Header,
        columns: Vec<usize>,
    ) -> Result<Self, OrmError> {
        Ok(Self {
            header: table_header.select(&columns)?,
            kind: ProviderKind::Index {
                table: table.to_string(),
                index: index.to_string(),
                alias: alias.to_string(),
                table_header,
                columns,
            },
        })
    }

    pub fn filter(source: Provider, predicate: TupleExpr) -> Self {
        Self {
            header: source.header.clone(),
            kind: ProviderKind::Filter {
                source: Box::new(source),
                predicate,
            },
        }
    }

    pub fn select(source: Provider, columns: Vec<usize>) -> Result<Self, OrmError> {
        Ok(Self {
            header: source.header.select(&columns)?,
            kind: ProviderKind::Select {
                source: Box::new(source),
                columns,
            },
        })
    }

    pub fn calculate(source: Provider, columns: Vec<CalculatedColumn>) -> Self {
        Self {
            header: source
                .header
                .append(columns.iter().map(|c| c.column.clone()).collect()),
            kind: ProviderKind::Calculate {
                source: Box::new(source),
                columns,
            },
        }
    }

    pub fn alias(source: Provider, alias: &str) -> Self {
        Self {
            header: source.header.alias(alias),
            kind: ProviderKind::Alias {
                source: Box::new(source),
                alias: alias.to_string(),
            },
        }
    }

    fn join_header(left: &Header, right: &Header, kind: JoinKind) -> Header {
        match kind {
            JoinKind::Inner | JoinKind::Cross => left.join(right),
            JoinKind::LeftOuter => left.join(&right.to_nullable()),
            JoinKind::FullOuter => left.to_nullable().join(&right.to_nullable()),
        }
    }

    /// Equi-join; `equal_indexes` pairs a left column with a right column.
    pub fn join(
        left: Provider,
        right: Provider,
        kind: JoinKind,
        equal_indexes: Vec<(usize, usize)>,
    ) -> Result<Self, OrmError> {
        for (l, r) in &equal_indexes {
            check_index(&left.header, *l, "Join key")?;
            check_index(&right.header, *r, "Join key")?;
        }
        Ok(Self {
            header: Self::join_header(&left.header, &right.header, kind),
            kind: ProviderKind::Join {
                left: Box::new(left),
                right: Box::new(right),
                kind,
                equal_indexes,
            },
        })
    }

    pub fn predicate_join(
        left: Provider,
        right: Provider,
        kind: JoinKind,
        predicate: TupleExpr,
    ) -> Self {
        Self {
            header: Self::join_header(&left.header, &right.header, kind),
            kind: ProviderKind::PredicateJoin {
                left: Box::new(left),
                right: Box::new(right),
                kind,
                predicate,
            },
        }
    }

    pub fn apply(
        left: Provider,
        right: Provider,
        parameter: ApplyParameterId,
        kind: ApplyKind,
    ) -> Self {
        let header = match kind {
            ApplyKind::Outer => left.header.join(&right.header.to_nullable()),
            _ => left.header.join(&right.header),
        };
        Self {
            header,
            kind: ProviderKind::Apply {
                left: Box::new(left),
                right: Box::new(right),
                parameter,
                kind,
            },
        }
    }

    /// Existence test of `source`, emitted as one boolean column `name`.
    pub fn existence(source: Provider, name: &str, negated: bool) -> Self {
        Self {
            header: Header::new(vec![Column::new(name, DataType::Bool, false)]),
            kind: ProviderKind::Existence {
                source: Box::new(source),
                negated,
            },
        }
    }

    /// Groups by `group_indexes` and computes `aggregates` as `(name, kind, source column)`.
    ///
    /// The header holds the group columns followed by the aggregates. Without
    /// group columns the result is exactly one row.
    pub fn aggregate(
        source: Provider,
        group_indexes: Vec<usize>,
        aggregates: Vec<(String, AggregateKind, Option<usize>)>,
    ) -> Result<Self, OrmError> {
        let mut columns = Vec::with_capacity(aggregates.len());
        for (name, kind, source_index) in aggregates {
            columns.push(Self::aggregate_column(
                &source.header,
                group_indexes.is_empty(),
                name,
                kind,
                source_index,
            )?);
        }
        Self::aggregate_with_columns(source, group_indexes, columns)
    }

    fn aggregate_column(
        source: &Header,
        scalar: bool,
        name: String,
        kind: AggregateKind,
        source_index: Option<usize>,
    ) -> Result<AggregateColumn, OrmError> {
        let column = match (kind, source_index) {
            (AggregateKind::Count, _) => Column::new(&name, DataType::Long, false),
            (_, None) => {
                return Err(OrmError::ValidationError(format!(
                    "Aggregate {} needs a source column",
                    kind
                )))
            }
            (kind, Some(i)) => {
                let src = source.column(i)?;
                let dtype = match kind {
                    AggregateKind::Avg => src.dtype.average_type().ok_or_else(|| {
                        OrmError::ValidationError(format!("Cannot average {}", src.dtype))
                    })?,
                    AggregateKind::Sum if !src.dtype.is_numeric() => {
                        return Err(OrmError::ValidationError(format!(
                            "Cannot sum {}",
                            src.dtype
                        )))
                    }
                    _ => src.dtype,
                };
                Column::new(&name, dtype, scalar || src.nullable)
            }
        };
        Ok(AggregateColumn {
            column,
            kind,
            source_index,
        })
    }

    /// Aggregate with already-typed columns.
    pub fn aggregate_with_columns(
        source: Provider,
        group_indexes: Vec<usize>,
        columns: Vec<AggregateColumn>,
    ) -> Result<Self, OrmError> {
        let mut header = source.header.select(&group_indexes)?;
        header = header.append(columns.iter().map(|c| c.column.clone()).collect());
        Ok(Self {
            header,
            kind: ProviderKind::Aggregate {
                source: Box::new(source),
                group_indexes,
                columns,
            },
        })
    }

    pub fn sort(source: Provider, order: Vec<(usize, Direction)>) -> Result<Self, OrmError> {
        for (i, _) in &order {
            check_index(&source.header, *i, "Sort")?;
        }
        Ok(Self {
            header: source.header.clone(),
            kind: ProviderKind::Sort {
                source: Box::new(source),
                order,
            },
        })
    }

    pub fn take(source: Provider, count: Count) -> Self {
        Self {
            header: source.header.clone(),
            kind: ProviderKind::Take {
                source: Box::new(source),
                count,
            },
        }
    }

    pub fn skip(source: Provider, count: Count) -> Self {
        Self {
            header: source.header.clone(),
            kind: ProviderKind::Skip {
                source: Box::new(source),
                count,
            },
        }
    }

    pub fn distinct(source: Provider) -> Self {
        Self {
            header: source.header.clone(),
            kind: ProviderKind::Distinct {
                source: Box::new(source),
            },
        }
    }

    /// Set operation; both sides must have the same width and compatible column types.
    pub fn set(op: SetOp, left: Provider, right: Provider) -> Result<Self, OrmError> {
        if left.header.len() != right.header.len() {
            return Err(OrmError::ValidationError(format!(
                "{:?} of headers with different widths: {} and {}",
                op, left.header, right.header
            )));
        }
        let mut cols = Vec::with_capacity(left.header.len());
        for (l, r) in left.header.columns().zip(right.header.columns()) {
            if l.dtype.promote(r.dtype).is_none() {
                return Err(OrmError::ValidationError(format!(
                    "{:?} of incompatible columns {} and {}",
                    op, l.name, r.name
                )));
            }
            let mut col = l.clone();
            col.nullable = l.nullable || r.nullable;
            cols.push(col);
        }
        Ok(Self {
            header: Header::new(cols),
            kind: ProviderKind::Set {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
        })
    }

    /// Direct children, left to right.
    pub fn children(&self) -> Vec<&Provider> {
        match &self.kind {
            ProviderKind::Raw { .. } | ProviderKind::Index { .. } => vec![],
            ProviderKind::Filter { source, .. }
            | ProviderKind::Select { source, .. }
            | ProviderKind::Calculate { source, .. }
            | ProviderKind::Alias { source, .. }
            | ProviderKind::Existence { source, .. }
            | ProviderKind::Aggregate { source, .. }
            | ProviderKind::Sort { source, .. }
            | ProviderKind::Take { source, .. }
            | ProviderKind::Skip { source, .. }
            | ProviderKind::Distinct { source } => vec![source],
            ProviderKind::Join { left, right, .. }
            | ProviderKind::PredicateJoin { left, right, .. }
            | ProviderKind::Apply { left, right, .. }
            | ProviderKind::Set { left, right, .. } => vec![left, right],
        }
    }

    /// Expressions evaluated by this node (not its children).
    pub fn expressions(&self) -> Vec<&TupleExpr> {
        match &self.kind {
            ProviderKind::Filter { predicate, .. }
            | ProviderKind::PredicateJoin { predicate, .. } => vec![predicate],
            ProviderKind::Calculate { columns, .. } => {
                columns.iter().map(|c| &c.expression).collect()
            }
            _ => vec![],
        }
    }

    /// Apply parameters read anywhere in the tree.
    pub fn apply_parameters(&self) -> BTreeSet<ApplyParameterId> {
        let mut res = BTreeSet::new();
        for e in self.expressions() {
            res.extend(e.apply_parameters());
        }
        for c in self.children() {
            res.extend(c.apply_parameters());
        }
        res
    }

    pub fn references_parameter(&self, parameter: ApplyParameterId) -> bool {
        self.expressions()
            .iter()
            .any(|e| e.references_parameter(parameter))
            || self
                .children()
                .iter()
                .any(|c| c.references_parameter(parameter))
    }

    /// Outer columns read through `parameter` anywhere in the tree.
    pub fn apply_parameter_indexes(&self, parameter: ApplyParameterId) -> BTreeSet<usize> {
        let mut res = BTreeSet::new();
        for e in self.expressions() {
            res.extend(e.apply_parameter_indexes(parameter));
        }
        for c in self.children() {
            res.extend(c.apply_parameter_indexes(parameter));
        }
        res
    }

    /// Query parameters read anywhere in the tree, including take/skip counts.
    pub fn parameters(&self) -> Vec<ParamKey> {
        let mut res = Vec::new();
        for e in self.expressions() {
            res.extend(e.parameters());
        }
        if let ProviderKind::Take { count: Count::Parameter(p), .. }
        | ProviderKind::Skip { count: Count::Parameter(p), .. } = &self.kind
        {
            res.push(p.clone());
        }
        for c in self.children() {
            res.extend(c.parameters());
        }
        res
    }

    /// Rewrites every expression in the tree with `f`; headers are kept.
    /// `None` from `f` aborts the rewrite.
    pub fn try_map_expressions<F>(&self, f: &mut F) -> Option<Provider>
    where
        F: FnMut(&TupleExpr) -> Option<TupleExpr>,
    {
        let boxed = |p: &Provider, f: &mut F| p.try_map_expressions(f).map(Box::new);
        let kind = match &self.kind {
            ProviderKind::Raw { .. } | ProviderKind::Index { .. } => self.kind.clone(),
            ProviderKind::Filter { source, predicate } => ProviderKind::Filter {
                source: boxed(source, f)?,
                predicate: f(predicate)?,
            },
            ProviderKind::Select { source, columns } => ProviderKind::Select {
                source: boxed(source, f)?,
                columns: columns.clone(),
            },
            ProviderKind::Calculate { source, columns } => {
                let source = boxed(source, f)?;
                let mut new_cols = Vec::with_capacity(columns.len());
                for c in columns {
                    new_cols.push(CalculatedColumn {
                        column: c.column.clone(),
                        expression: f(&c.expression)?,
                    });
                }
                ProviderKind::Calculate {
                    source,
                    columns: new_cols,
                }
            }
            ProviderKind::Alias { source, alias } => ProviderKind::Alias {
                source: boxed(source, f)?,
                alias: alias.clone(),
            },
            ProviderKind::Join {
                left,
                right,
                kind,
                equal_indexes,
            } => ProviderKind::Join {
                left: boxed(left, f)?,
                right: boxed(right, f)?,
                kind: *kind,
                equal_indexes: equal_indexes.clone(),
            },
            ProviderKind::PredicateJoin {
                left,
                right,
                kind,
                predicate,
            } => ProviderKind::PredicateJoin {
                left: boxed(left, f)?,
                right: boxed(right, f)?,
                kind: *kind,
                predicate: f(predicate)?,
            },
            ProviderKind::Apply {
                left,
                right,
                parameter,
                kind,
            } => ProviderKind::Apply {
                left: boxed(left, f)?,
                right: boxed(right, f)?,
                parameter: *parameter,
                kind: *kind,
            },
            ProviderKind::Existence { source, negated } => ProviderKind::Existence {
                source: boxed(source, f)?,
                negated: *negated,
            },
            ProviderKind::Aggregate {
                source,
                group_indexes,
                columns,
            } => ProviderKind::Aggregate {
                source: boxed(source, f)?,
                group_indexes: group_indexes.clone(),
                columns: columns.clone(),
            },
            ProviderKind::Sort { source, order } => ProviderKind::Sort {
                source: boxed(source, f)?,
                order: order.clone(),
            },
            ProviderKind::Take { source, count } => ProviderKind::Take {
                source: boxed(source, f)?,
                count: count.clone(),
            },
            ProviderKind::Skip { source, count } => ProviderKind::Skip {
                source: boxed(source, f)?,
                count: count.clone(),
            },
            ProviderKind::Distinct { source } => ProviderKind::Distinct {
                source: boxed(source, f)?,
            },
            ProviderKind::Set { op, left, right } => ProviderKind::Set {
                op: *op,
                left: boxed(left, f)?,
                right: boxed(right, f)?,
            },
        };
        Some(Provider {
            header: self.header.clone(),
            kind,
        })
    }

    /// Rewrites outer reads through `parameter` as query parameters, for
    /// sub-queries executed once per outer row instead of being applied.
    pub fn apply_parameter_to_query_parameter(&self, parameter: ApplyParameterId) -> Provider {
        match self.try_map_expressions(&mut |e| Some(e.apply_parameter_to_query_parameter(parameter)))
        {
            Some(p) => p,
            None => unreachable!("expression mapping never aborts"),
        }
    }

    /// Number of nodes in the tree.
    pub fn node_count(&self) -> usize {
        1 + self.children().iter().map(|c| c.node_count()).sum::<usize>()
    }

    /// Serializes the provider tree as json.
    pub fn to_json(&self) -> Result<serde_json::Value, OrmError> {
        Ok(serde_json::to_value(self)?)
    }

    /// De-Serializes a json representation of the provider tree created in to_json
    pub fn from_json(json: &str) -> Result<Self, OrmError> {
        Ok(serde_json::from_str(json)?)
    }

    fn describe(&self) -> String {
        match &self.kind {
            ProviderKind::Raw {
                rows, projection, ..
            } => match projection {
                Some(p) => format!("Raw {} rows {:?}", rows.len(), p),
                None => format!("Raw {} rows", rows.len()),
            },
            ProviderKind::Index {
                table,
                index,
                alias,
                columns,
                table_header,
            } => {
                if columns.len() == table_header.len() {
                    format!("Index {}.{} as {}", table, index, alias)
                } else {
                    format!("Index {}.{} as {} {:?}", table, index, alias, columns)
                }
            }
            ProviderKind::Filter { predicate, .. } => format!("Filter {}", predicate),
            ProviderKind::Select { columns, .. } => format!("Select {:?}", columns),
            ProviderKind::Calculate { columns, .. } => {
                let cols: Vec<String> = columns
                    .iter()
                    .map(|c| format!("{} = {}", c.column.name, c.expression))
                    .collect();
                format!("Calculate {}", cols.join(", "))
            }
            ProviderKind::Alias { alias, .. } => format!("Alias {}", alias),
            ProviderKind::Join {
                kind,
                equal_indexes,
                ..
            } => format!("Join {:?} {:?}", kind, equal_indexes),
            ProviderKind::PredicateJoin {
                kind, predicate, ..
            } => format!("PredicateJoin {:?} {}", kind, predicate),
            ProviderKind::Apply {
                parameter, kind, ..
            } => format!("Apply {:?} {}", kind, parameter),
            ProviderKind::Existence { negated, .. } => {
                if *negated {
                    String::from("NotExists")
                } else {
                    String::from("Exists")
                }
            }
            ProviderKind::Aggregate {
                group_indexes,
                columns,
                ..
            } => {
                let aggs: Vec<String> = columns
                    .iter()
                    .map(|c| match c.source_index {
                        Some(i) => format!("{}(t[{}])", c.kind, i),
                        None => format!("{}(*)", c.kind),
                    })
                    .collect();
                format!("Aggregate {:?} {}", group_indexes, aggs.join(", "))
            }
            ProviderKind::Sort { order, .. } => format!("Sort {:?}", order),
            ProviderKind::Take { count, .. } => format!("Take {}", count),
            ProviderKind::Skip { count, .. } => format!("Skip {}", count),
            ProviderKind::Distinct { .. } => String::from("Distinct"),
            ProviderKind::Set { op, .. } => format!("{:?}", op),
        }
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        writeln!(f, "{}{}", "  ".repeat(depth), self.describe())?;
        for c in self.children() {
            c.fmt_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

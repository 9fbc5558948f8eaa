//! Provider tree to SQL DOM.
//!
//! Every provider compiles into a `Level`: a select under construction whose
//! output expressions line up with the provider header. A rule extends the
//! level of its source in place when the result keeps the same meaning and
//! wraps it into a derived table otherwise.

use crate::dialect::{ApplySyntax, PagingStyle, SqlTranslator};
use crate::dom::*;
use common::logical_plan::*;
use common::{ApplyParameterId, Field, Header, OrmError, Tuple};
use std::collections::{HashMap, HashSet};

/// Select under construction. `exprs` holds one expression per provider column.
#[derive(Debug, Clone)]
struct Level {
    select: SqlSelect,
    exprs: Vec<SqlExpr>,
}

impl Level {
    fn new(select: SqlSelect, exprs: Vec<SqlExpr>) -> Self {
        Self { select, exprs }
    }

    fn is_grouped(&self) -> bool {
        !self.select.group_by.is_empty()
            || self.select.having.is_some()
            || self.exprs.iter().any(SqlExpr::is_aggregating)
    }

    /// Rows are exactly the rows of FROM after WHERE.
    fn is_plain(&self) -> bool {
        !self.select.distinct && !self.is_grouped() && !self.select.is_paged()
    }

    /// A level computing values without reading any table.
    fn is_constant(&self) -> bool {
        self.select.from.is_none() && self.select.where_clause.is_none() && self.is_plain()
    }
}

/// Output aliases for the columns of `header`, unique within the select.
pub fn column_names(header: &Header) -> Vec<String> {
    let mut used = HashSet::new();
    header
        .columns()
        .map(|c| {
            let base = c.name.replace('.', "_");
            let mut name = base.clone();
            let mut n = 1;
            while !used.insert(name.clone()) {
                name = format!("{}_{}", base, n);
                n += 1;
            }
            name
        })
        .collect()
}

fn unique_name(base: &str, names: &[String]) -> String {
    let mut name = base.to_string();
    let mut n = 1;
    while names.contains(&name) {
        name = format!("{}{}", base, n);
        n += 1;
    }
    name
}

fn count_expr(count: &Count) -> SqlExpr {
    match count {
        Count::Constant(n) => SqlExpr::int(*n as i64),
        Count::Parameter(p) => SqlExpr::Parameter(p.clone()),
    }
}

fn always_true() -> SqlExpr {
    SqlExpr::binary(BinaryOp::Equal, SqlExpr::int(1), SqlExpr::int(1))
}

fn conjunction(predicates: Vec<SqlExpr>) -> Option<SqlExpr> {
    predicates.into_iter().fold(None, |acc, p| match acc {
        Some(a) => Some(SqlExpr::and(a, p)),
        None => Some(p),
    })
}

/// Compiles provider trees for one dialect.
pub struct SqlCompiler<'a> {
    translator: &'a dyn SqlTranslator,
    next_table: u32,
    /// Left row expressions visible to the right side of the applies being compiled.
    outer: HashMap<ApplyParameterId, Vec<SqlExpr>>,
}

impl<'a> SqlCompiler<'a> {
    pub fn new(translator: &'a dyn SqlTranslator) -> Self {
        Self {
            translator,
            next_table: 0,
            outer: HashMap::new(),
        }
    }

    /// Compiles the tree rooted at `provider` into a query whose columns follow its header.
    ///
    /// # Arguments
    ///
    /// * `provider` - Optimized provider tree.
    pub fn compile(&mut self, provider: &Provider) -> Result<SqlQuery, OrmError> {
        let level = self.compile_level(provider)?;
        let names = column_names(provider.header());
        Ok(SqlQuery::Select(self.seal(level, &names, true)?))
    }

    fn next_alias(&mut self) -> String {
        let alias = format!("t{}", self.next_table);
        self.next_table += 1;
        alias
    }

    fn compile_level(&mut self, provider: &Provider) -> Result<Level, OrmError> {
        let header = provider.header();
        match provider.kind() {
            ProviderKind::Raw {
                rows,
                columns,
                projection,
            } => {
                let indexes: Vec<usize> = match projection {
                    Some(p) => p.clone(),
                    None => (0..columns.len()).collect(),
                };
                let query = self.raw_rows(rows, columns, &indexes, &column_names(header))?;
                let (from, exprs) = self.derived(query, &column_names(header));
                Ok(Level::new(
                    SqlSelect {
                        from: Some(from),
                        ..SqlSelect::default()
                    },
                    exprs,
                ))
            }
            ProviderKind::Index {
                table,
                alias,
                table_header,
                columns,
                ..
            } => {
                let mut exprs = Vec::with_capacity(columns.len());
                for i in columns {
                    exprs.push(SqlExpr::column(alias, table_header.column(*i)?.base_name()));
                }
                Ok(Level::new(
                    SqlSelect {
                        from: Some(SqlTableRef::Table {
                            name: table.clone(),
                            alias: alias.clone(),
                        }),
                        ..SqlSelect::default()
                    },
                    exprs,
                ))
            }
            ProviderKind::Filter { source, predicate } => {
                let mut level = self.compile_level(source)?;
                if !level.is_plain() {
                    level = self.wrap(level, source.header())?;
                }
                let condition = self.expr(predicate, &level.exprs)?;
                level.select.add_where(condition);
                Ok(level)
            }
            ProviderKind::Select { source, columns } => {
                let mut level = self.compile_level(source)?;
                if level.select.distinct {
                    level = self.wrap(level, source.header())?;
                }
                let mut exprs = Vec::with_capacity(columns.len());
                for i in columns {
                    exprs.push(Self::column_expr(&level.exprs, *i)?);
                }
                level.exprs = exprs;
                Ok(level)
            }
            ProviderKind::Calculate { source, columns } => {
                let mut level = self.compile_level(source)?;
                if level.select.distinct {
                    level = self.wrap(level, source.header())?;
                }
                for c in columns {
                    let e = self.expr(&c.expression, &level.exprs)?;
                    level.exprs.push(e);
                }
                Ok(level)
            }
            ProviderKind::Alias { source, .. } => self.compile_level(source),
            ProviderKind::Join {
                left,
                right,
                kind,
                equal_indexes,
            } => {
                self.check_join(*kind)?;
                let allow_where = *kind != JoinKind::FullOuter;
                let l = self.compile_level(left)?;
                let (lref, lwhere, lexprs) = self.into_source(l, left.header(), allow_where)?;
                let r = self.compile_level(right)?;
                let (rref, rwhere, rexprs) = self.into_source(r, right.header(), allow_where)?;
                let mut conditions = Vec::with_capacity(equal_indexes.len());
                for (a, b) in equal_indexes {
                    conditions.push(SqlExpr::binary(
                        BinaryOp::Equal,
                        Self::column_expr(&lexprs, *a)?,
                        Self::column_expr(&rexprs, *b)?,
                    ));
                }
                Ok(Self::join_levels(
                    *kind, lref, lwhere, lexprs, rref, rwhere, rexprs, conditions,
                ))
            }
            ProviderKind::PredicateJoin {
                left,
                right,
                kind,
                predicate,
            } => {
                self.check_join(*kind)?;
                let allow_where = *kind != JoinKind::FullOuter;
                let l = self.compile_level(left)?;
                let (lref, lwhere, lexprs) = self.into_source(l, left.header(), allow_where)?;
                let r = self.compile_level(right)?;
                let (rref, rwhere, rexprs) = self.into_source(r, right.header(), allow_where)?;
                let mut conditions = Vec::new();
                if !predicate.is_true_literal() {
                    let mut both = lexprs.clone();
                    both.extend(rexprs.iter().cloned());
                    conditions.push(self.expr(predicate, &both)?);
                }
                Ok(Self::join_levels(
                    *kind, lref, lwhere, lexprs, rref, rwhere, rexprs, conditions,
                ))
            }
            ProviderKind::Apply {
                left,
                right,
                parameter,
                kind,
            } => self.compile_apply(left, right, *parameter, *kind),
            ProviderKind::Existence { source, negated } => {
                let level = self.compile_level(source)?;
                let query = self.seal(level, &column_names(source.header()), false)?;
                Ok(Level::new(
                    SqlSelect::default(),
                    vec![SqlExpr::Exists {
                        query: Box::new(SqlQuery::Select(query)),
                        negated: *negated,
                    }],
                ))
            }
            ProviderKind::Aggregate {
                source,
                group_indexes,
                columns,
            } => {
                let mut level = self.compile_level(source)?;
                let needs_wrap = !level.is_plain()
                    || group_indexes
                        .iter()
                        .chain(columns.iter().filter_map(|c| c.source_index.as_ref()))
                        .any(|i| {
                            !matches!(
                                level.exprs.get(*i),
                                Some(SqlExpr::Column { .. }) | Some(SqlExpr::Literal(_))
                            )
                        });
                if needs_wrap {
                    level = self.wrap(level, source.header())?;
                }
                let mut exprs = Vec::with_capacity(group_indexes.len() + columns.len());
                for i in group_indexes {
                    exprs.push(Self::column_expr(&level.exprs, *i)?);
                }
                level.select.group_by = exprs.clone();
                for c in columns {
                    let arg = match c.source_index {
                        Some(i) => {
                            let arg = Self::column_expr(&level.exprs, i)?;
                            let source_type = source.header().column(i)?.dtype;
                            if c.kind == AggregateKind::Avg && source_type != c.column.dtype {
                                Some(Box::new(SqlExpr::Cast {
                                    operand: Box::new(arg),
                                    dtype: c.column.dtype,
                                }))
                            } else {
                                Some(Box::new(arg))
                            }
                        }
                        None => None,
                    };
                    exprs.push(SqlExpr::Aggregate { kind: c.kind, arg });
                }
                level.exprs = exprs;
                Ok(level)
            }
            ProviderKind::Sort { source, order } => {
                let mut level = self.compile_level(source)?;
                if level.select.is_paged() {
                    level = self.wrap(level, source.header())?;
                }
                let mut order_by = Vec::with_capacity(order.len());
                for (i, direction) in order {
                    order_by.push(SqlOrder {
                        expr: Self::column_expr(&level.exprs, *i)?,
                        ascending: *direction == Direction::Ascending,
                    });
                }
                level.select.order_by = order_by;
                Ok(level)
            }
            ProviderKind::Take { source, count } => {
                let mut level = self.compile_level(source)?;
                if level.select.limit.is_some() {
                    level = self.wrap(level, source.header())?;
                }
                level.select.limit = Some(count_expr(count));
                Ok(level)
            }
            ProviderKind::Skip { source, count } => {
                let mut level = self.compile_level(source)?;
                if level.select.is_paged() {
                    level = self.wrap(level, source.header())?;
                }
                level.select.offset = Some(count_expr(count));
                Ok(level)
            }
            ProviderKind::Distinct { source } => {
                let mut level = self.compile_level(source)?;
                if level.select.is_paged() {
                    level = self.wrap(level, source.header())?;
                }
                level.select.distinct = true;
                Ok(level)
            }
            ProviderKind::Set { op, left, right } => {
                let names = column_names(header);
                let l = self.compile_level(left)?;
                let l = self.set_operand(l, left.header(), &names)?;
                let r = self.compile_level(right)?;
                let r = self.set_operand(r, right.header(), &names)?;
                let query = SqlQuery::Set {
                    op: *op,
                    left: Box::new(SqlQuery::Select(l)),
                    right: Box::new(SqlQuery::Select(r)),
                };
                let (from, exprs) = self.derived(query, &names);
                Ok(Level::new(
                    SqlSelect {
                        from: Some(from),
                        ..SqlSelect::default()
                    },
                    exprs,
                ))
            }
        }
    }

    fn compile_apply(
        &mut self,
        left: &Provider,
        right: &Provider,
        parameter: ApplyParameterId,
        kind: ApplyKind,
    ) -> Result<Level, OrmError> {
        match kind {
            ApplyKind::Existence | ApplyKind::Aggregate => {
                let mut level = self.compile_level(left)?;
                if !level.is_plain() {
                    level = self.wrap(level, left.header())?;
                }
                self.outer.insert(parameter, level.exprs.clone());
                let compiled = self.compile_level(right);
                self.outer.remove(&parameter);
                let r = compiled?;
                if r.is_constant() {
                    level.exprs.extend(r.exprs);
                } else {
                    let names = column_names(right.header());
                    let query = self.seal(r, &names, false)?;
                    if names.len() == 1 {
                        level
                            .exprs
                            .push(SqlExpr::SubQuery(Box::new(SqlQuery::Select(query))));
                    } else {
                        let (from, exprs) = self.derived(SqlQuery::Select(query), &names);
                        for (e, name) in exprs.into_iter().zip(names.iter()) {
                            let single = SqlSelect {
                                columns: vec![SqlColumn {
                                    expr: e,
                                    alias: name.clone(),
                                }],
                                from: Some(from.clone()),
                                ..SqlSelect::default()
                            };
                            level
                                .exprs
                                .push(SqlExpr::SubQuery(Box::new(SqlQuery::Select(single))));
                        }
                    }
                }
                Ok(level)
            }
            ApplyKind::Cross | ApplyKind::Outer => {
                if self.translator.capabilities().apply == ApplySyntax::Unsupported {
                    let construct = if kind == ApplyKind::Cross {
                        "CROSS APPLY"
                    } else {
                        "OUTER APPLY"
                    };
                    return Err(self.translator.not_supported(construct));
                }
                let l = self.compile_level(left)?;
                let (lref, lwhere, mut exprs) = self.into_source(l, left.header(), true)?;
                self.outer.insert(parameter, exprs.clone());
                let compiled = self.compile_level(right);
                self.outer.remove(&parameter);
                let r = compiled?;
                let names = column_names(right.header());
                let query = self.seal(r, &names, false)?;
                let (rref, rexprs) = self.derived(SqlQuery::Select(query), &names);
                exprs.extend(rexprs);
                let join_kind = if kind == ApplyKind::Cross {
                    SqlJoinKind::CrossApply
                } else {
                    SqlJoinKind::OuterApply
                };
                Ok(Level::new(
                    SqlSelect {
                        from: Some(SqlTableRef::Join(Box::new(SqlJoin {
                            kind: join_kind,
                            left: lref,
                            right: rref,
                            on: None,
                        }))),
                        where_clause: lwhere,
                        ..SqlSelect::default()
                    },
                    exprs,
                ))
            }
        }
    }

    fn check_join(&self, kind: JoinKind) -> Result<(), OrmError> {
        if kind == JoinKind::FullOuter && !self.translator.capabilities().full_outer_join {
            Err(self.translator.not_supported("FULL OUTER JOIN"))
        } else {
            Ok(())
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn join_levels(
        kind: JoinKind,
        lref: SqlTableRef,
        lwhere: Option<SqlExpr>,
        mut exprs: Vec<SqlExpr>,
        rref: SqlTableRef,
        rwhere: Option<SqlExpr>,
        rexprs: Vec<SqlExpr>,
        mut conditions: Vec<SqlExpr>,
    ) -> Level {
        exprs.extend(rexprs);
        let mut select = SqlSelect::default();
        let (sql_kind, on) = match kind {
            JoinKind::Inner | JoinKind::Cross => {
                select.where_clause = lwhere;
                if let Some(w) = rwhere {
                    select.add_where(w);
                }
                match conjunction(conditions) {
                    Some(on) => (SqlJoinKind::Inner, Some(on)),
                    None => (SqlJoinKind::Cross, None),
                }
            }
            JoinKind::LeftOuter | JoinKind::FullOuter => {
                select.where_clause = lwhere;
                conditions.extend(rwhere);
                let on = conjunction(conditions).unwrap_or_else(always_true);
                let sql_kind = if kind == JoinKind::LeftOuter {
                    SqlJoinKind::LeftOuter
                } else {
                    SqlJoinKind::FullOuter
                };
                (sql_kind, Some(on))
            }
        };
        select.from = Some(SqlTableRef::Join(Box::new(SqlJoin {
            kind: sql_kind,
            left: lref,
            right: rref,
            on,
        })));
        Level::new(select, exprs)
    }

    /// Table reference, pending WHERE condition and column expressions for
    /// using `level` as one side of a join.
    fn into_source(
        &mut self,
        mut level: Level,
        header: &Header,
        allow_where: bool,
    ) -> Result<(SqlTableRef, Option<SqlExpr>, Vec<SqlExpr>), OrmError> {
        if level.is_plain() && (allow_where || level.select.where_clause.is_none()) {
            if let Some(from) = level.select.from.take() {
                return Ok((from, level.select.where_clause, level.exprs));
            }
        }
        let names = column_names(header);
        let query = self.seal(level, &names, false)?;
        let (from, exprs) = self.derived(SqlQuery::Select(query), &names);
        Ok((from, None, exprs))
    }

    /// Wraps `level` into a derived table and starts a new level over it.
    fn wrap(&mut self, level: Level, header: &Header) -> Result<Level, OrmError> {
        let names = column_names(header);
        let query = self.seal(level, &names, false)?;
        let (from, exprs) = self.derived(SqlQuery::Select(query), &names);
        Ok(Level::new(
            SqlSelect {
                from: Some(from),
                ..SqlSelect::default()
            },
            exprs,
        ))
    }

    fn derived(&mut self, query: SqlQuery, names: &[String]) -> (SqlTableRef, Vec<SqlExpr>) {
        let (from, exprs, _) = self.derived_with_alias(query, names);
        (from, exprs)
    }

    fn derived_with_alias(
        &mut self,
        query: SqlQuery,
        names: &[String],
    ) -> (SqlTableRef, Vec<SqlExpr>, String) {
        let alias = self.next_alias();
        let exprs = names.iter().map(|n| SqlExpr::column(&alias, n)).collect();
        (
            SqlTableRef::Derived {
                query: Box::new(query),
                alias: alias.clone(),
            },
            exprs,
            alias,
        )
    }

    fn set_operand(
        &mut self,
        mut level: Level,
        header: &Header,
        names: &[String],
    ) -> Result<SqlSelect, OrmError> {
        if level.select.is_paged() {
            level = self.wrap(level, header)?;
        }
        self.seal(level, names, false)
    }

    /// Finishes a level: names its columns and lowers paging for the dialect.
    ///
    /// # Arguments
    ///
    /// * `level` - Level to finish.
    /// * `names` - Output column aliases.
    /// * `keep_order` - Whether an ORDER BY without paging is kept.
    fn seal(
        &mut self,
        level: Level,
        names: &[String],
        keep_order: bool,
    ) -> Result<SqlSelect, OrmError> {
        let Level { mut select, exprs } = level;
        if exprs.len() != names.len() {
            return Err(OrmError::ValidationError(format!(
                "Select of {} expressions named with {} columns",
                exprs.len(),
                names.len()
            )));
        }
        if !keep_order && !select.is_paged() {
            select.order_by.clear();
        }
        select.columns = exprs
            .into_iter()
            .zip(names.iter())
            .map(|(expr, name)| SqlColumn {
                expr,
                alias: name.clone(),
            })
            .collect();
        if !select.is_paged() {
            return Ok(select);
        }
        let caps = self.translator.capabilities();
        match caps.paging {
            PagingStyle::LimitOffset => Ok(select),
            PagingStyle::OffsetFetch => {
                let uses_top = select.offset.is_none() && caps.top_for_take;
                if !uses_top && caps.offset_requires_order && select.order_by.is_empty() {
                    let first = select.columns[0].expr.clone();
                    select.order_by.push(SqlOrder {
                        expr: first,
                        ascending: true,
                    });
                }
                Ok(select)
            }
            PagingStyle::Top => {
                if select.offset.is_none() {
                    Ok(select)
                } else {
                    self.row_number_paging(select, names, keep_order)
                }
            }
            PagingStyle::RowNum => self.rownum_paging(select, names),
        }
    }

    /// Skip through `ROW_NUMBER()` for dialects without an offset clause.
    ///
    /// The numbered rows are only ordered at the root select. A derived
    /// table cannot carry ORDER BY without TOP, and the level reading it
    /// orders again.
    fn row_number_paging(
        &mut self,
        mut select: SqlSelect,
        names: &[String],
        keep_order: bool,
    ) -> Result<SqlSelect, OrmError> {
        let limit = select.limit.take();
        let offset = match select.offset.take() {
            Some(o) => o,
            None => return Ok(select),
        };
        let mut order = std::mem::take(&mut select.order_by);
        if select.distinct || select.is_grouped() {
            // Numbering has to happen over the distinct or grouped rows.
            let mut positions = Vec::with_capacity(order.len());
            for o in &order {
                let p = select
                    .columns
                    .iter()
                    .position(|c| c.expr == o.expr)
                    .ok_or_else(|| {
                        self.translator
                            .not_supported("ORDER BY over an unselected column with Skip")
                    })?;
                positions.push((p, o.ascending));
            }
            let (from, exprs) = self.derived(SqlQuery::Select(select), names);
            order = positions
                .into_iter()
                .map(|(p, ascending)| SqlOrder {
                    expr: exprs[p].clone(),
                    ascending,
                })
                .collect();
            select = SqlSelect {
                columns: exprs
                    .into_iter()
                    .zip(names.iter())
                    .map(|(expr, name)| SqlColumn {
                        expr,
                        alias: name.clone(),
                    })
                    .collect(),
                from: Some(from),
                ..SqlSelect::default()
            };
        }
        if order.is_empty() {
            order.push(SqlOrder {
                expr: select.columns[0].expr.clone(),
                ascending: true,
            });
        }
        let rn = unique_name("rn", names);
        select.columns.push(SqlColumn {
            expr: SqlExpr::RowNumber { order_by: order },
            alias: rn.clone(),
        });
        let (from, exprs, alias) = self.derived_with_alias(SqlQuery::Select(select), names);
        let rn_col = SqlExpr::column(&alias, &rn);
        let mut outer = SqlSelect {
            columns: exprs
                .into_iter()
                .zip(names.iter())
                .map(|(expr, name)| SqlColumn {
                    expr,
                    alias: name.clone(),
                })
                .collect(),
            from: Some(from),
            ..SqlSelect::default()
        };
        outer.add_where(SqlExpr::binary(
            BinaryOp::Greater,
            rn_col.clone(),
            offset.clone(),
        ));
        if let Some(limit) = limit {
            outer.add_where(SqlExpr::binary(
                BinaryOp::LessOrEqual,
                rn_col.clone(),
                SqlExpr::binary(BinaryOp::Add, offset, limit),
            ));
        }
        if keep_order {
            outer.order_by.push(SqlOrder {
                expr: rn_col,
                ascending: true,
            });
        }
        Ok(outer)
    }

    /// Take and skip through `ROWNUM`, which is assigned before ORDER BY
    /// and so always counts rows of an already ordered derived table.
    fn rownum_paging(
        &mut self,
        mut select: SqlSelect,
        names: &[String],
    ) -> Result<SqlSelect, OrmError> {
        let limit = select.limit.take();
        let offset = select.offset.take();
        let named = |exprs: Vec<SqlExpr>| -> Vec<SqlColumn> {
            exprs
                .into_iter()
                .zip(names.iter())
                .map(|(expr, name)| SqlColumn {
                    expr,
                    alias: name.clone(),
                })
                .collect()
        };
        let (from, exprs) = self.derived(SqlQuery::Select(select), names);
        let mut middle = SqlSelect {
            columns: named(exprs),
            from: Some(from),
            ..SqlSelect::default()
        };
        let offset = match offset {
            Some(o) => o,
            None => {
                if let Some(limit) = limit {
                    middle.add_where(SqlExpr::binary(BinaryOp::LessOrEqual, SqlExpr::RowNum, limit));
                }
                return Ok(middle);
            }
        };
        let rn = unique_name("rn", names);
        middle.columns.push(SqlColumn {
            expr: SqlExpr::RowNum,
            alias: rn.clone(),
        });
        if let Some(limit) = limit {
            middle.add_where(SqlExpr::binary(
                BinaryOp::LessOrEqual,
                SqlExpr::RowNum,
                SqlExpr::binary(BinaryOp::Add, offset.clone(), limit),
            ));
        }
        let (from, exprs, alias) = self.derived_with_alias(SqlQuery::Select(middle), names);
        let rn_col = SqlExpr::column(&alias, &rn);
        let mut outer = SqlSelect {
            columns: named(exprs),
            from: Some(from),
            ..SqlSelect::default()
        };
        outer.add_where(SqlExpr::binary(BinaryOp::Greater, rn_col.clone(), offset));
        outer.order_by.push(SqlOrder {
            expr: rn_col,
            ascending: true,
        });
        Ok(outer)
    }

    /// Union of one literal row select per tuple.
    fn raw_rows(
        &mut self,
        rows: &[Tuple],
        columns: &Header,
        indexes: &[usize],
        names: &[String],
    ) -> Result<SqlQuery, OrmError> {
        let mut dtypes = Vec::with_capacity(indexes.len());
        for i in indexes {
            dtypes.push(columns.column(*i)?.dtype);
        }
        let row_select = |row: Option<&Tuple>| -> SqlSelect {
            let columns = indexes
                .iter()
                .zip(dtypes.iter())
                .zip(names.iter())
                .map(|((i, dtype), name)| {
                    let field = row
                        .and_then(|r| r.get_field(*i))
                        .cloned()
                        .unwrap_or(Field::Null);
                    let expr = if field.is_null() {
                        SqlExpr::Cast {
                            operand: Box::new(SqlExpr::Literal(Field::Null)),
                            dtype: *dtype,
                        }
                    } else {
                        SqlExpr::Literal(field)
                    };
                    SqlColumn {
                        expr,
                        alias: name.clone(),
                    }
                })
                .collect();
            SqlSelect {
                columns,
                ..SqlSelect::default()
            }
        };
        if rows.is_empty() {
            let mut select = row_select(None);
            select.add_where(SqlExpr::binary(
                BinaryOp::Equal,
                SqlExpr::int(1),
                SqlExpr::int(0),
            ));
            return Ok(SqlQuery::Select(select));
        }
        let mut query = SqlQuery::Select(row_select(rows.get(0)));
        for row in &rows[1..] {
            query = SqlQuery::Set {
                op: SetOp::Concat,
                left: Box::new(query),
                right: Box::new(SqlQuery::Select(row_select(Some(row)))),
            };
        }
        Ok(query)
    }

    fn column_expr(exprs: &[SqlExpr], i: usize) -> Result<SqlExpr, OrmError> {
        exprs.get(i).cloned().ok_or_else(|| {
            OrmError::ValidationError(format!(
                "Column {} out of range for {} compiled columns",
                i,
                exprs.len()
            ))
        })
    }

    /// Translates a tuple expression over the columns `exprs`.
    fn expr(&self, expr: &TupleExpr, exprs: &[SqlExpr]) -> Result<SqlExpr, OrmError> {
        Ok(match expr {
            TupleExpr::Column(i) => Self::column_expr(exprs, *i)?,
            TupleExpr::ApplyParam { parameter, index } => {
                let outer = self.outer.get(parameter).ok_or_else(|| {
                    OrmError::ValidationError(format!("Unbound apply parameter {}", parameter))
                })?;
                Self::column_expr(outer, *index)?
            }
            TupleExpr::Literal(f) => SqlExpr::Literal(f.clone()),
            TupleExpr::Parameter(p) => SqlExpr::Parameter(p.clone()),
            TupleExpr::Binary { op, left, right } => {
                SqlExpr::binary(*op, self.expr(left, exprs)?, self.expr(right, exprs)?)
            }
            TupleExpr::Unary { op, operand } => SqlExpr::Unary {
                op: *op,
                operand: Box::new(self.expr(operand, exprs)?),
            },
            TupleExpr::Conditional {
                test,
                if_true,
                if_false,
            } => SqlExpr::Case {
                branches: vec![(self.expr(test, exprs)?, self.expr(if_true, exprs)?)],
                otherwise: Some(Box::new(self.expr(if_false, exprs)?)),
            },
            TupleExpr::Function { function, args } => {
                let mut sql_args = Vec::with_capacity(args.len());
                for a in args {
                    sql_args.push(self.expr(a, exprs)?);
                }
                SqlExpr::Function {
                    function: *function,
                    args: sql_args,
                }
            }
            TupleExpr::Cast { operand, dtype } => SqlExpr::Cast {
                operand: Box::new(self.expr(operand, exprs)?),
                dtype: *dtype,
            },
            TupleExpr::Like {
                operand,
                pattern,
                escape,
            } => SqlExpr::Like {
                operand: Box::new(self.expr(operand, exprs)?),
                pattern: pattern.clone(),
                escape: *escape,
            },
        })
    }
}

/// Compiles `provider` for the dialect of `translator`.
pub fn compile(provider: &Provider, translator: &dyn SqlTranslator) -> Result<SqlQuery, OrmError> {
    let query = SqlCompiler::new(translator).compile(provider)?;
    debug!(
        "Compiled {} providers for {}",
        provider.node_count(),
        translator.name()
    );
    Ok(query)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dialect::{translator_from_name, DialectKind, Version, translator_for};
    use common::catalog::Catalog;
    use common::testutil::*;
    use common::{ApplyParameterId, Column, DataType};
    use std::sync::Arc;

    fn teachers() -> Provider {
        let model = teacher_model();
        let teacher = model.get_type("Teacher").unwrap();
        Provider::index(teacher, "PK_Teacher", "a0").unwrap()
    }

    fn select_of(query: &SqlQuery) -> &SqlSelect {
        match query {
            SqlQuery::Select(s) => s,
            other => panic!("expected select, got {:?}", other),
        }
    }

    #[test]
    fn test_filter_extends_in_place() {
        init();
        let filter = Provider::filter(
            teachers(),
            TupleExpr::eq(TupleExpr::Column(2), TupleExpr::Literal(string("Female"))),
        );
        let translator = translator_from_name("postgresql").unwrap();
        let query = compile(&filter, translator.as_ref()).unwrap();
        let select = select_of(&query);
        assert!(matches!(select.from, Some(SqlTableRef::Table { .. })));
        assert!(select.where_clause.is_some());
        assert_eq!(select.columns.len(), 3);
        assert_eq!(select.columns[2].alias, "a0_Gender");
    }

    #[test]
    fn test_filter_after_take_wraps() {
        let take = Provider::take(teachers(), Count::Constant(2));
        let filter = Provider::filter(
            take,
            TupleExpr::is_null(TupleExpr::Column(1)),
        );
        let translator = translator_from_name("sqlite").unwrap();
        let query = compile(&filter, translator.as_ref()).unwrap();
        let select = select_of(&query);
        match &select.from {
            Some(SqlTableRef::Derived { query, .. }) => {
                assert_eq!(select_of(query).limit, Some(SqlExpr::int(2)));
            }
            other => panic!("expected derived table, got {:?}", other),
        }
        assert!(select.limit.is_none());
    }

    #[test]
    fn test_full_outer_join_not_supported() {
        let join = Provider::join(teachers(), teachers(), JoinKind::FullOuter, vec![(0, 0)]).unwrap();
        let sqlite = translator_from_name("sqlite").unwrap();
        match compile(&join, sqlite.as_ref()) {
            Err(OrmError::NotSupported { construct, dialect }) => {
                assert_eq!(construct, "FULL OUTER JOIN");
                assert!(dialect.contains("Sqlite"));
            }
            other => panic!("expected not supported, got {:?}", other),
        }
        let pg = translator_from_name("postgresql").unwrap();
        assert!(compile(&join, pg.as_ref()).is_ok());
    }

    #[test]
    fn test_cross_apply_support_by_version() {
        let right = Provider::filter(
            teachers(),
            TupleExpr::eq(
                TupleExpr::Column(0),
                TupleExpr::ApplyParam {
                    parameter: ApplyParameterId(0),
                    index: 0,
                },
            ),
        );
        let apply = Provider::apply(teachers(), right, ApplyParameterId(0), ApplyKind::Cross);
        let pg83 = translator_for(DialectKind::PostgreSql, Version::new(8, 3)).unwrap();
        assert!(matches!(
            compile(&apply, pg83.as_ref()),
            Err(OrmError::NotSupported { .. })
        ));
        let pg94 = translator_for(DialectKind::PostgreSql, Version::new(9, 4)).unwrap();
        let query = compile(&apply, pg94.as_ref()).unwrap();
        match &select_of(&query).from {
            Some(SqlTableRef::Join(join)) => assert_eq!(join.kind, SqlJoinKind::CrossApply),
            other => panic!("expected join, got {:?}", other),
        }
    }

    #[test]
    fn test_existence_apply_becomes_column() {
        let right = Provider::existence(
            Provider::filter(
                teachers(),
                TupleExpr::eq(
                    TupleExpr::Column(2),
                    TupleExpr::ApplyParam {
                        parameter: ApplyParameterId(0),
                        index: 2,
                    },
                ),
            ),
            "c0",
            false,
        );
        let apply = Provider::apply(teachers(), right, ApplyParameterId(0), ApplyKind::Existence);
        let translator = translator_from_name("sqlserver").unwrap();
        let query = compile(&apply, translator.as_ref()).unwrap();
        let select = select_of(&query);
        assert_eq!(select.columns.len(), 4);
        assert!(matches!(select.columns[3].expr, SqlExpr::Exists { .. }));
        assert!(matches!(select.from, Some(SqlTableRef::Table { .. })));
    }

    #[test]
    fn test_average_of_integers_casts() {
        let aggregate = Provider::aggregate(
            teachers(),
            vec![],
            vec![(String::from("c0"), AggregateKind::Avg, Some(0))],
        )
        .unwrap();
        let translator = translator_from_name("oracle").unwrap();
        let query = compile(&aggregate, translator.as_ref()).unwrap();
        match &select_of(&query).columns[0].expr {
            SqlExpr::Aggregate {
                kind: AggregateKind::Avg,
                arg: Some(arg),
            } => assert!(matches!(
                arg.as_ref(),
                SqlExpr::Cast {
                    dtype: DataType::Double,
                    ..
                }
            )),
            other => panic!("expected avg, got {:?}", other),
        }
    }

    #[test]
    fn test_skip_lowering_per_dialect() {
        let sorted = Provider::sort(teachers(), vec![(1, Direction::Ascending)]).unwrap();
        let paged = Provider::take(Provider::skip(sorted, Count::Constant(10)), Count::Constant(5));

        let ss9 = translator_for(DialectKind::SqlServer, Version::new(9, 0)).unwrap();
        let query = compile(&paged, ss9.as_ref()).unwrap();
        let select = select_of(&query);
        assert!(select.limit.is_none() && select.offset.is_none());
        assert_eq!(select.order_by.len(), 1);
        assert_eq!(select.columns.len(), 3);

        let ss11 = translator_for(DialectKind::SqlServer, Version::new(11, 0)).unwrap();
        let query = compile(&paged, ss11.as_ref()).unwrap();
        let select = select_of(&query);
        assert_eq!(select.offset, Some(SqlExpr::int(10)));
        assert_eq!(select.limit, Some(SqlExpr::int(5)));

        let ora9 = translator_for(DialectKind::Oracle, Version::new(9, 0)).unwrap();
        let query = compile(&paged, ora9.as_ref()).unwrap();
        let select = select_of(&query);
        assert!(select.where_clause.is_some());
        assert!(select.limit.is_none());
    }

    #[test]
    fn test_raw_rows_union() {
        let header = Header::new(vec![
            Column::new("r.Id", DataType::Int, false),
            Column::new("r.Name", DataType::String, true),
        ]);
        let rows = vec![
            common::Tuple::new(vec![int(1), string("a")]),
            common::Tuple::new(vec![int(2), common::Field::Null]),
        ];
        let raw = Provider::raw(header.clone(), Arc::new(rows));
        let translator = translator_from_name("postgresql").unwrap();
        let query = compile(&raw, translator.as_ref()).unwrap();
        match &select_of(&query).from {
            Some(SqlTableRef::Derived { query, .. }) => {
                assert!(matches!(query.as_ref(), SqlQuery::Set { op: SetOp::Concat, .. }))
            }
            other => panic!("expected derived, got {:?}", other),
        }
        let empty = Provider::raw(header, Arc::new(vec![]));
        assert!(compile(&empty, translator.as_ref()).is_ok());
    }

    #[test]
    fn test_column_names_unique() {
        let header = Header::new(vec![
            Column::new("a.b_c", DataType::Int, false),
            Column::new("a_b.c", DataType::Int, false),
        ]);
        assert_eq!(column_names(&header), vec!["a_b_c", "a_b_c_1"]);
    }
}

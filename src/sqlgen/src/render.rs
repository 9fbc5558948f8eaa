//! SQL DOM to command text.

use crate::dialect::{ApplySyntax, DialectKind, PagingStyle, SqlTranslator};
use crate::dom::*;
use common::logical_plan::{AggregateKind, UnaryOp};
use common::{DataType, Field, Header, OrmError, ParamKey};

/// Finished command handed to the execution collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlCommand {
    pub text: String,
    /// Parameter keys in placeholder order.
    pub parameters: Vec<ParamKey>,
    /// Types of the result columns, in order.
    pub shape: Vec<DataType>,
}

/// Renders one statement. Placeholders are numbered in text order.
pub struct Renderer<'a> {
    translator: &'a dyn SqlTranslator,
    parameters: Vec<ParamKey>,
}

impl<'a> Renderer<'a> {
    pub fn new(translator: &'a dyn SqlTranslator) -> Self {
        Self {
            translator,
            parameters: Vec::new(),
        }
    }

    /// Renders a query producing rows of `header`.
    pub fn render_query(mut self, query: &SqlQuery, header: &Header) -> Result<SqlCommand, OrmError> {
        let text = self.query(query)?;
        Ok(SqlCommand {
            text,
            parameters: self.parameters,
            shape: header.columns().map(|c| c.dtype).collect(),
        })
    }

    /// Renders a schema statement.
    pub fn render_statement(mut self, statement: &SqlStatement) -> Result<SqlCommand, OrmError> {
        let text = match statement {
            SqlStatement::Query(q) => self.query(q)?,
            SqlStatement::CreateTable(t) => self.create_table(t)?,
            SqlStatement::DropTable { name } => format!("DROP TABLE {}", self.ident(name)),
            SqlStatement::CreateIndex(i) => self.create_index(i),
            SqlStatement::DropIndex { name, table } => self.translator.drop_index(name, table),
        };
        Ok(SqlCommand {
            text,
            parameters: self.parameters,
            shape: vec![],
        })
    }

    fn ident(&self, name: &str) -> String {
        self.translator.quote_identifier(name)
    }

    fn query(&mut self, query: &SqlQuery) -> Result<String, OrmError> {
        match query {
            SqlQuery::Select(s) => self.select(s),
            SqlQuery::Set { op, left, right } => {
                let l = self.query(left)?;
                let r = match right.as_ref() {
                    SqlQuery::Select(s) => self.select(s)?,
                    nested => format!("SELECT * FROM ({}) {}", self.query(nested)?, self.alias("s")),
                };
                Ok(format!("{} {} {}", l, self.translator.set_operator(*op), r))
            }
        }
    }

    fn alias(&self, alias: &str) -> String {
        if self.translator.capabilities().table_alias_as {
            format!("AS {}", self.ident(alias))
        } else {
            self.ident(alias)
        }
    }

    fn select(&mut self, select: &SqlSelect) -> Result<String, OrmError> {
        let translator = self.translator;
        let caps = translator.capabilities();
        let paging = caps.paging;
        let use_top = select.limit.is_some()
            && select.offset.is_none()
            && (paging == PagingStyle::Top
                || (paging == PagingStyle::OffsetFetch && caps.top_for_take));
        if select.offset.is_some() && matches!(paging, PagingStyle::Top | PagingStyle::RowNum) {
            return Err(self.translator.not_supported("OFFSET"));
        }
        if select.limit.is_some() && paging == PagingStyle::RowNum {
            return Err(self.translator.not_supported("LIMIT"));
        }
        if select.columns.is_empty() {
            return Err(OrmError::ValidationError(String::from(
                "Select without columns",
            )));
        }
        let mut res = String::from("SELECT ");
        if select.distinct {
            res.push_str("DISTINCT ");
        }
        if use_top {
            if let Some(limit) = &select.limit {
                res.push_str(&format!("TOP ({}) ", self.value(limit)?));
            }
        }
        let mut columns = Vec::with_capacity(select.columns.len());
        for c in &select.columns {
            columns.push(format!("{} AS {}", self.value(&c.expr)?, self.ident(&c.alias)));
        }
        res.push_str(&columns.join(", "));
        match &select.from {
            Some(from) => {
                res.push_str(" FROM ");
                res.push_str(&self.table_ref(from)?);
            }
            None if caps.requires_from => res.push_str(" FROM DUAL"),
            None => {}
        }
        if let Some(w) = &select.where_clause {
            res.push_str(" WHERE ");
            res.push_str(&self.predicate(w)?);
        }
        if !select.group_by.is_empty() {
            let mut groups = Vec::with_capacity(select.group_by.len());
            for g in &select.group_by {
                groups.push(self.value(g)?);
            }
            res.push_str(" GROUP BY ");
            res.push_str(&groups.join(", "));
        }
        if let Some(h) = &select.having {
            res.push_str(" HAVING ");
            res.push_str(&self.predicate(h)?);
        }
        if !select.order_by.is_empty() {
            let mut order = Vec::with_capacity(select.order_by.len());
            for o in &select.order_by {
                let dir = if o.ascending { "ASC" } else { "DESC" };
                order.push(format!("{} {}", self.value(&o.expr)?, dir));
            }
            res.push_str(" ORDER BY ");
            res.push_str(&order.join(", "));
        }
        if !use_top {
            res.push_str(&self.paging(select)?);
        }
        Ok(res)
    }

    fn paging(&mut self, select: &SqlSelect) -> Result<String, OrmError> {
        let limit = match &select.limit {
            Some(l) => Some(self.value(l)?),
            None => None,
        };
        let offset = match &select.offset {
            Some(o) => Some(self.value(o)?),
            None => None,
        };
        let sqlite = self.translator.kind() == DialectKind::Sqlite;
        Ok(match (self.translator.capabilities().paging, limit, offset) {
            (_, None, None) => String::new(),
            (PagingStyle::LimitOffset, Some(l), None) => format!(" LIMIT {}", l),
            (PagingStyle::LimitOffset, Some(l), Some(o)) => format!(" LIMIT {} OFFSET {}", l, o),
            (PagingStyle::LimitOffset, None, Some(o)) if sqlite => {
                format!(" LIMIT -1 OFFSET {}", o)
            }
            (PagingStyle::LimitOffset, None, Some(o)) => format!(" OFFSET {}", o),
            (PagingStyle::OffsetFetch, l, o) => {
                let mut res = String::new();
                let has_offset = o.is_some();
                if let Some(o) = o {
                    res.push_str(&format!(" OFFSET {} ROWS", o));
                } else if self.translator.kind() == DialectKind::SqlServer {
                    res.push_str(" OFFSET 0 ROWS");
                }
                if let Some(l) = l {
                    if has_offset || self.translator.kind() == DialectKind::SqlServer {
                        res.push_str(&format!(" FETCH NEXT {} ROWS ONLY", l));
                    } else {
                        res.push_str(&format!(" FETCH FIRST {} ROWS ONLY", l));
                    }
                }
                res
            }
            (style, _, _) => {
                return Err(self
                    .translator
                    .not_supported(&format!("{:?} paging clause", style)))
            }
        })
    }

    fn table_ref(&mut self, table: &SqlTableRef) -> Result<String, OrmError> {
        Ok(match table {
            SqlTableRef::Table { name, alias } => format!("{} {}", self.ident(name), self.alias(alias)),
            SqlTableRef::Derived { query, alias } => {
                format!("({}) {}", self.query(query)?, self.alias(alias))
            }
            SqlTableRef::Join(join) => {
                let left = self.table_ref(&join.left)?;
                let right = self.table_ref(&join.right)?;
                let apply = self.translator.capabilities().apply;
                let (keyword, on_true) = match (join.kind, apply) {
                    (SqlJoinKind::Inner, _) => ("INNER JOIN", false),
                    (SqlJoinKind::LeftOuter, _) => ("LEFT OUTER JOIN", false),
                    (SqlJoinKind::FullOuter, _) => ("FULL OUTER JOIN", false),
                    (SqlJoinKind::Cross, _) => ("CROSS JOIN", false),
                    (SqlJoinKind::CrossApply, ApplySyntax::Apply) => ("CROSS APPLY", false),
                    (SqlJoinKind::OuterApply, ApplySyntax::Apply) => ("OUTER APPLY", false),
                    (SqlJoinKind::CrossApply, ApplySyntax::Lateral) => ("CROSS JOIN LATERAL", false),
                    (SqlJoinKind::OuterApply, ApplySyntax::Lateral) => ("LEFT JOIN LATERAL", true),
                    (SqlJoinKind::CrossApply, ApplySyntax::Unsupported) => {
                        return Err(self.translator.not_supported("CROSS APPLY"))
                    }
                    (SqlJoinKind::OuterApply, ApplySyntax::Unsupported) => {
                        return Err(self.translator.not_supported("OUTER APPLY"))
                    }
                };
                let mut res = format!("{} {} {}", left, keyword, right);
                if let Some(on) = &join.on {
                    res.push_str(" ON ");
                    res.push_str(&self.predicate(on)?);
                } else if on_true {
                    res.push_str(" ON ");
                    res.push_str(&self.translator.bool_literal(true));
                }
                res
            }
        })
    }

    fn literal(&self, field: &Field) -> String {
        match field {
            Field::Null => String::from("NULL"),
            Field::BoolField(b) => self.translator.bool_literal(*b),
            Field::StringField(s) => self.translator.quote_string(s),
            Field::DateTimeField(d) => self.translator.datetime_literal(d),
            Field::FloatField(x) => format!("{:?}", x),
            Field::DoubleField(x) => format!("{:?}", x),
            other => other.to_string(),
        }
    }

    /// Renders an expression used as a condition.
    fn predicate(&mut self, expr: &SqlExpr) -> Result<String, OrmError> {
        if expr.is_predicate() {
            return self.condition(expr);
        }
        let value = self.value(expr)?;
        if self.translator.capabilities().bool_values {
            Ok(value)
        } else {
            Ok(format!("({} = {})", value, self.translator.bool_literal(true)))
        }
    }

    /// Renders an expression used as a value.
    fn value(&mut self, expr: &SqlExpr) -> Result<String, OrmError> {
        if expr.is_predicate() {
            let condition = self.condition(expr)?;
            if self.translator.capabilities().bool_values {
                return Ok(condition);
            }
            return Ok(format!(
                "CASE WHEN {} THEN {} ELSE {} END",
                condition,
                self.translator.bool_literal(true),
                self.translator.bool_literal(false)
            ));
        }
        Ok(match expr {
            SqlExpr::Column { table, name } => match table {
                Some(t) => format!("{}.{}", self.ident(t), self.ident(name)),
                None => self.ident(name),
            },
            SqlExpr::Star(table) => match table {
                Some(t) => format!("{}.*", self.ident(t)),
                None => String::from("*"),
            },
            SqlExpr::Literal(f) => self.literal(f),
            SqlExpr::Parameter(p) => {
                let placeholder = self.translator.placeholder(self.parameters.len());
                self.parameters.push(p.clone());
                placeholder
            }
            SqlExpr::Binary { op, left, right } => {
                let l = self.value(left)?;
                let r = self.value(right)?;
                self.translator.binary(*op, &l, &r)
            }
            SqlExpr::Unary { op, operand } => match op {
                UnaryOp::Negate => format!("(-{})", self.value(operand)?),
                _ => return self.condition(expr),
            },
            SqlExpr::Function { function, args } => {
                let mut rendered = Vec::with_capacity(args.len());
                for a in args {
                    rendered.push(self.value(a)?);
                }
                self.translator.function(*function, &rendered)?
            }
            SqlExpr::Aggregate { kind, arg } => {
                let name = match kind {
                    AggregateKind::Count => "COUNT",
                    AggregateKind::Sum => "SUM",
                    AggregateKind::Avg => "AVG",
                    AggregateKind::Min => "MIN",
                    AggregateKind::Max => "MAX",
                };
                match arg {
                    Some(a) => format!("{}({})", name, self.value(a)?),
                    None => format!("{}(*)", name),
                }
            }
            SqlExpr::Cast { operand, dtype } => format!(
                "CAST({} AS {})",
                self.value(operand)?,
                self.translator.cast_type(*dtype)
            ),
            SqlExpr::Case {
                branches,
                otherwise,
            } => {
                let mut res = String::from("CASE");
                for (when, then) in branches {
                    res.push_str(&format!(
                        " WHEN {} THEN {}",
                        self.predicate(when)?,
                        self.value(then)?
                    ));
                }
                if let Some(o) = otherwise {
                    res.push_str(&format!(" ELSE {}", self.value(o)?));
                }
                res.push_str(" END");
                res
            }
            SqlExpr::SubQuery(q) => format!("({})", self.query(q)?),
            SqlExpr::RowNumber { order_by } => {
                let mut order = Vec::with_capacity(order_by.len());
                for o in order_by {
                    let dir = if o.ascending { "ASC" } else { "DESC" };
                    order.push(format!("{} {}", self.value(&o.expr)?, dir));
                }
                format!("ROW_NUMBER() OVER (ORDER BY {})", order.join(", "))
            }
            SqlExpr::RowNum => String::from("ROWNUM"),
            SqlExpr::Exists { .. } | SqlExpr::Like { .. } => return self.condition(expr),
        })
    }

    /// Renders a condition without any value conversion.
    fn condition(&mut self, expr: &SqlExpr) -> Result<String, OrmError> {
        Ok(match expr {
            SqlExpr::Binary { op, left, right } if op.is_logical() => {
                let l = self.predicate(left)?;
                let r = self.predicate(right)?;
                self.translator.binary(*op, &l, &r)
            }
            SqlExpr::Binary { op, left, right } => {
                let l = self.value(left)?;
                let r = self.value(right)?;
                self.translator.binary(*op, &l, &r)
            }
            SqlExpr::Unary { op, operand } => match op {
                UnaryOp::Not => format!("(NOT {})", self.predicate(operand)?),
                UnaryOp::IsNull => format!("({} IS NULL)", self.value(operand)?),
                UnaryOp::IsNotNull => format!("({} IS NOT NULL)", self.value(operand)?),
                UnaryOp::Negate => format!("(-{})", self.value(operand)?),
            },
            SqlExpr::Exists { query, negated } => {
                let q = self.query(query)?;
                if *negated {
                    format!("NOT EXISTS ({})", q)
                } else {
                    format!("EXISTS ({})", q)
                }
            }
            SqlExpr::Like {
                operand,
                pattern,
                escape,
            } => {
                let operand = self.value(operand)?;
                let (pattern, escape) = self.translator.like_pattern(pattern, *escape);
                let pattern = self.translator.quote_string(&pattern);
                match escape {
                    Some(c) => format!(
                        "({} LIKE {} ESCAPE {})",
                        operand,
                        pattern,
                        self.translator.quote_string(&c.to_string())
                    ),
                    None => format!("({} LIKE {})", operand, pattern),
                }
            }
            other => self.value(other)?,
        })
    }

    fn create_table(&mut self, table: &SqlCreateTable) -> Result<String, OrmError> {
        let mut defs = Vec::with_capacity(table.columns.len() + 1);
        let mut key_declared = false;
        for c in &table.columns {
            let dtype = if c.identity {
                key_declared |= self.translator.identity_includes_key();
                self.translator.identity_column(c.dtype)?
            } else {
                self.translator.column_type(c.dtype)
            };
            let null = if c.nullable { "NULL" } else { "NOT NULL" };
            defs.push(format!("{} {} {}", self.ident(&c.name), dtype, null));
        }
        if let Some((name, columns)) = &table.primary_key {
            if !key_declared {
                let cols: Vec<String> = columns.iter().map(|c| self.ident(c)).collect();
                defs.push(format!(
                    "CONSTRAINT {} PRIMARY KEY ({})",
                    self.ident(name),
                    cols.join(", ")
                ));
            }
        }
        Ok(format!(
            "CREATE TABLE {} ({})",
            self.ident(&table.name),
            defs.join(", ")
        ))
    }

    fn create_index(&self, index: &SqlCreateIndex) -> String {
        let cols: Vec<String> = index.columns.iter().map(|c| self.ident(c)).collect();
        let mut res = format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            self.ident(&index.name),
            self.ident(&index.table),
            cols.join(", ")
        );
        if let Some(storage) = index.fill_factor.and_then(|ff| self.translator.index_storage(ff)) {
            res.push(' ');
            res.push_str(&storage);
        }
        res
    }
}

/// Renders a compiled query producing rows of `header`.
pub fn render_query(
    query: &SqlQuery,
    header: &Header,
    translator: &dyn SqlTranslator,
) -> Result<SqlCommand, OrmError> {
    let command = Renderer::new(translator).render_query(query, header)?;
    debug!("{}: {}", translator.name(), command.text);
    Ok(command)
}

/// Renders a schema statement.
pub fn render_statement(
    statement: &SqlStatement,
    translator: &dyn SqlTranslator,
) -> Result<SqlCommand, OrmError> {
    Renderer::new(translator).render_statement(statement)
}

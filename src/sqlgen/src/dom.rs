//! Vendor neutral SQL statement tree.
//!
//! Built by the compiler, lowered once for the dialect's paging style and
//! never changed afterwards. Spelling is left to the dialect translators.

use common::logical_plan::{AggregateKind, BinaryOp, ScalarFunction, SetOp, UnaryOp};
use common::model::TypeInfo;
use common::{DataType, Field, ParamKey};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlExpr {
    Column {
        table: Option<String>,
        name: String,
    },
    /// Every column of `table`, or of the whole FROM clause.
    Star(Option<String>),
    Literal(Field),
    Parameter(ParamKey),
    Binary {
        op: BinaryOp,
        left: Box<SqlExpr>,
        right: Box<SqlExpr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<SqlExpr>,
    },
    Function {
        function: ScalarFunction,
        args: Vec<SqlExpr>,
    },
    Aggregate {
        kind: AggregateKind,
        /// `None` counts rows.
        arg: Option<Box<SqlExpr>>,
    },
    Cast {
        operand: Box<SqlExpr>,
        dtype: DataType,
    },
    Case {
        branches: Vec<(SqlExpr, SqlExpr)>,
        otherwise: Option<Box<SqlExpr>>,
    },
    Exists {
        query: Box<SqlQuery>,
        negated: bool,
    },
    /// Scalar sub-query.
    SubQuery(Box<SqlQuery>),
    RowNumber {
        order_by: Vec<SqlOrder>,
    },
    /// Oracle row counter.
    RowNum,
    Like {
        operand: Box<SqlExpr>,
        pattern: String,
        escape: Option<char>,
    },
}

impl SqlExpr {
    pub fn column(table: &str, name: &str) -> Self {
        SqlExpr::Column {
            table: Some(table.to_string()),
            name: name.to_string(),
        }
    }

    pub fn binary(op: BinaryOp, left: SqlExpr, right: SqlExpr) -> Self {
        SqlExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(left: SqlExpr, right: SqlExpr) -> Self {
        Self::binary(BinaryOp::And, left, right)
    }

    pub fn int(i: i64) -> Self {
        SqlExpr::Literal(Field::LongField(i))
    }

    /// Whether the expression is a condition rather than a value.
    pub fn is_predicate(&self) -> bool {
        match self {
            SqlExpr::Binary { op, .. } => op.is_comparison() || op.is_logical(),
            SqlExpr::Unary { op, .. } => !matches!(op, UnaryOp::Negate),
            SqlExpr::Exists { .. } | SqlExpr::Like { .. } => true,
            _ => false,
        }
    }

    /// Whether the expression contains an aggregate or window function
    /// outside of nested queries.
    pub fn is_aggregating(&self) -> bool {
        match self {
            SqlExpr::Aggregate { .. } | SqlExpr::RowNumber { .. } | SqlExpr::RowNum => true,
            SqlExpr::Binary { left, right, .. } => left.is_aggregating() || right.is_aggregating(),
            SqlExpr::Unary { operand, .. }
            | SqlExpr::Cast { operand, .. }
            | SqlExpr::Like { operand, .. } => operand.is_aggregating(),
            SqlExpr::Function { args, .. } => args.iter().any(SqlExpr::is_aggregating),
            SqlExpr::Case {
                branches,
                otherwise,
            } => {
                branches
                    .iter()
                    .any(|(w, t)| w.is_aggregating() || t.is_aggregating())
                    || otherwise.as_ref().map_or(false, |o| o.is_aggregating())
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlOrder {
    pub expr: SqlExpr,
    pub ascending: bool,
}

/// Output column of a select.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlColumn {
    pub expr: SqlExpr,
    pub alias: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlJoinKind {
    Inner,
    LeftOuter,
    FullOuter,
    Cross,
    /// Lateral join keeping left rows with right rows.
    CrossApply,
    /// Lateral join keeping every left row.
    OuterApply,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlJoin {
    pub kind: SqlJoinKind,
    pub left: SqlTableRef,
    pub right: SqlTableRef,
    pub on: Option<SqlExpr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlTableRef {
    Table { name: String, alias: String },
    Derived { query: Box<SqlQuery>, alias: String },
    Join(Box<SqlJoin>),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SqlSelect {
    pub distinct: bool,
    pub columns: Vec<SqlColumn>,
    pub from: Option<SqlTableRef>,
    pub where_clause: Option<SqlExpr>,
    pub group_by: Vec<SqlExpr>,
    pub having: Option<SqlExpr>,
    pub order_by: Vec<SqlOrder>,
    pub limit: Option<SqlExpr>,
    pub offset: Option<SqlExpr>,
}

impl SqlSelect {
    /// Adds a condition to the WHERE clause.
    pub fn add_where(&mut self, predicate: SqlExpr) {
        self.where_clause = Some(match self.where_clause.take() {
            Some(existing) => SqlExpr::and(existing, predicate),
            None => predicate,
        });
    }

    pub fn is_paged(&self) -> bool {
        self.limit.is_some() || self.offset.is_some()
    }

    pub fn is_grouped(&self) -> bool {
        !self.group_by.is_empty()
            || self.having.is_some()
            || self.columns.iter().any(|c| c.expr.is_aggregating())
    }

    /// A select whose rows are exactly the rows of its FROM clause after WHERE.
    pub fn is_plain(&self) -> bool {
        !self.distinct && !self.is_grouped() && !self.is_paged()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlQuery {
    Select(SqlSelect),
    Set {
        op: SetOp,
        left: Box<SqlQuery>,
        right: Box<SqlQuery>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlColumnDef {
    pub name: String,
    pub dtype: DataType,
    pub nullable: bool,
    pub identity: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlCreateTable {
    pub name: String,
    pub columns: Vec<SqlColumnDef>,
    pub primary_key: Option<(String, Vec<String>)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlCreateIndex {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub fill_factor: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlStatement {
    Query(SqlQuery),
    CreateTable(SqlCreateTable),
    DropTable { name: String },
    CreateIndex(SqlCreateIndex),
    DropIndex { name: String, table: String },
}

impl SqlStatement {
    /// Statements creating the table of `type_info` and its secondary indexes.
    pub fn create_schema(type_info: &TypeInfo) -> Vec<SqlStatement> {
        let single_key = type_info.key.len() == 1;
        let columns = type_info
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| SqlColumnDef {
                name: c.name.clone(),
                dtype: c.dtype,
                nullable: c.nullable,
                identity: type_info.identity && single_key && type_info.key[0] == i,
            })
            .collect();
        let primary_key = type_info.primary_index().map(|idx| {
            (
                idx.name.clone(),
                idx.columns
                    .iter()
                    .map(|i| type_info.columns[*i].name.clone())
                    .collect(),
            )
        });
        let mut res = vec![SqlStatement::CreateTable(SqlCreateTable {
            name: type_info.table.clone(),
            columns,
            primary_key,
        })];
        for index in type_info.indexes.iter().filter(|i| !i.primary) {
            res.push(SqlStatement::CreateIndex(SqlCreateIndex {
                name: index.name.clone(),
                table: type_info.table.clone(),
                columns: index
                    .columns
                    .iter()
                    .map(|i| type_info.columns[*i].name.clone())
                    .collect(),
                unique: index.unique,
                fill_factor: index.fill_factor,
            }));
        }
        res
    }

    /// Statements dropping what `create_schema` creates.
    pub fn drop_schema(type_info: &TypeInfo) -> Vec<SqlStatement> {
        let mut res: Vec<SqlStatement> = type_info
            .indexes
            .iter()
            .filter(|i| !i.primary)
            .map(|i| SqlStatement::DropIndex {
                name: i.name.clone(),
                table: type_info.table.clone(),
            })
            .collect();
        res.push(SqlStatement::DropTable {
            name: type_info.table.clone(),
        });
        res
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use common::catalog::Catalog;
    use common::testutil::*;

    #[test]
    fn test_plain_select() {
        let mut select = SqlSelect::default();
        select.columns.push(SqlColumn {
            expr: SqlExpr::column("a0", "Id"),
            alias: String::from("a0_Id"),
        });
        assert!(select.is_plain());
        select.add_where(SqlExpr::binary(
            BinaryOp::Equal,
            SqlExpr::column("a0", "Id"),
            SqlExpr::int(1),
        ));
        select.add_where(SqlExpr::Literal(Field::BoolField(true)));
        assert!(matches!(
            select.where_clause,
            Some(SqlExpr::Binary {
                op: BinaryOp::And,
                ..
            })
        ));
        select.columns.push(SqlColumn {
            expr: SqlExpr::Aggregate {
                kind: AggregateKind::Count,
                arg: None,
            },
            alias: String::from("c0"),
        });
        assert!(!select.is_plain());
    }

    #[test]
    fn test_create_schema() {
        let model = shop_model();
        let customer = model.get_type("Customer").unwrap();
        let statements = SqlStatement::create_schema(customer);
        assert_eq!(statements.len(), 2);
        match &statements[1] {
            SqlStatement::CreateIndex(idx) => {
                assert_eq!(idx.columns, vec![String::from("Name")]);
                assert_eq!(idx.fill_factor, Some(80));
            }
            other => panic!("expected index, got {:?}", other),
        }
        let order = model.get_type("Order").unwrap();
        match &SqlStatement::create_schema(order)[0] {
            SqlStatement::CreateTable(t) => {
                assert!(t.columns[0].identity);
                assert!(!t.columns[1].identity);
                assert_eq!(t.primary_key.as_ref().unwrap().1, vec![String::from("Id")]);
            }
            other => panic!("expected table, got {:?}", other),
        }
        assert_eq!(SqlStatement::drop_schema(customer).len(), 2);
    }
}

//! Query expressions: the input of translation.
//!
//! An `Expr` is a method-call chain over query roots, in the shape a
//! LINQ-like front end hands over after parsing a query.

use common::logical_plan::{AggregateKind, BinaryOp, ScalarFunction, UnaryOp};
use common::{DataType, Field, Tuple};
use std::fmt;
use std::sync::Arc;

/// Lambda over one or two parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lambda {
    pub params: Vec<String>,
    pub body: Box<Expr>,
}

impl Lambda {
    pub fn new(param: &str, body: Expr) -> Self {
        Self {
            params: vec![param.to_string()],
            body: Box::new(body),
        }
    }

    pub fn new2(first: &str, second: &str, body: Expr) -> Self {
        Self {
            params: vec![first.to_string(), second.to_string()],
            body: Box::new(body),
        }
    }

    /// Name of parameter `i`.
    pub fn param(&self, i: usize) -> Option<&str> {
        self.params.get(i).map(String::as_str)
    }
}

/// In-memory rows used as a query root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalCollection {
    /// Member names and types. A single column collection holds scalars.
    pub columns: Vec<(String, DataType)>,
    pub rows: Arc<Vec<Tuple>>,
}

impl LocalCollection {
    /// Collection of scalar values.
    pub fn scalars(dtype: DataType, values: Vec<Field>) -> Self {
        Self {
            columns: vec![(String::from("Value"), dtype)],
            rows: Arc::new(values.into_iter().map(|v| Tuple::new(vec![v])).collect()),
        }
    }
}

/// Functions callable in lambdas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExprFunction {
    Scalar(ScalarFunction),
    StartsWith,
    EndsWith,
    /// `string.Contains`.
    StringContains,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryMethod {
    Where(Lambda),
    Select(Lambda),
    /// `collection` maps an element to a sequence; `result` combines both.
    SelectMany {
        collection: Lambda,
        result: Option<Lambda>,
    },
    Join {
        inner: Box<Expr>,
        outer_key: Lambda,
        inner_key: Lambda,
        result: Lambda,
    },
    LeftJoin {
        inner: Box<Expr>,
        outer_key: Lambda,
        inner_key: Lambda,
        result: Lambda,
    },
    GroupJoin {
        inner: Box<Expr>,
        outer_key: Lambda,
        inner_key: Lambda,
        result: Lambda,
    },
    GroupBy {
        key: Lambda,
        element: Option<Lambda>,
        result: Option<Lambda>,
    },
    OrderBy {
        key: Lambda,
        descending: bool,
    },
    ThenBy {
        key: Lambda,
        descending: bool,
    },
    Take(Box<Expr>),
    Skip(Box<Expr>),
    Distinct,
    DefaultIfEmpty,
    First {
        predicate: Option<Lambda>,
        or_default: bool,
    },
    Single {
        predicate: Option<Lambda>,
        or_default: bool,
    },
    Any(Option<Lambda>),
    All(Lambda),
    Contains(Box<Expr>),
    Count {
        predicate: Option<Lambda>,
        long: bool,
    },
    /// Sum, Min, Max or Average over the elements or a selector.
    Aggregate {
        kind: AggregateKind,
        selector: Option<Lambda>,
    },
    Union(Box<Expr>),
    Concat(Box<Expr>),
    Except(Box<Expr>),
    Intersect(Box<Expr>),
}

impl QueryMethod {
    /// Whether the method yields a sequence rather than a single value.
    pub fn is_sequence(&self) -> bool {
        !matches!(
            self,
            QueryMethod::First { .. }
                | QueryMethod::Single { .. }
                | QueryMethod::Any(_)
                | QueryMethod::All(_)
                | QueryMethod::Contains(_)
                | QueryMethod::Count { .. }
                | QueryMethod::Aggregate { .. }
        )
    }

    fn name(&self) -> String {
        match self {
            QueryMethod::Where(_) => String::from("Where"),
            QueryMethod::Select(_) => String::from("Select"),
            QueryMethod::SelectMany { .. } => String::from("SelectMany"),
            QueryMethod::Join { .. } => String::from("Join"),
            QueryMethod::LeftJoin { .. } => String::from("LeftJoin"),
            QueryMethod::GroupJoin { .. } => String::from("GroupJoin"),
            QueryMethod::GroupBy { .. } => String::from("GroupBy"),
            QueryMethod::OrderBy { descending, .. } => {
                if *descending {
                    String::from("OrderByDescending")
                } else {
                    String::from("OrderBy")
                }
            }
            QueryMethod::ThenBy { descending, .. } => {
                if *descending {
                    String::from("ThenByDescending")
                } else {
                    String::from("ThenBy")
                }
            }
            QueryMethod::Take(_) => String::from("Take"),
            QueryMethod::Skip(_) => String::from("Skip"),
            QueryMethod::Distinct => String::from("Distinct"),
            QueryMethod::DefaultIfEmpty => String::from("DefaultIfEmpty"),
            QueryMethod::First { or_default, .. } => {
                format!("First{}", if *or_default { "OrDefault" } else { "" })
            }
            QueryMethod::Single { or_default, .. } => {
                format!("Single{}", if *or_default { "OrDefault" } else { "" })
            }
            QueryMethod::Any(_) => String::from("Any"),
            QueryMethod::All(_) => String::from("All"),
            QueryMethod::Contains(_) => String::from("Contains"),
            QueryMethod::Count { long, .. } => {
                if *long {
                    String::from("LongCount")
                } else {
                    String::from("Count")
                }
            }
            QueryMethod::Aggregate { kind, .. } => match kind {
                AggregateKind::Count => String::from("Count"),
                AggregateKind::Sum => String::from("Sum"),
                AggregateKind::Avg => String::from("Average"),
                AggregateKind::Min => String::from("Min"),
                AggregateKind::Max => String::from("Max"),
            },
            QueryMethod::Union(_) => String::from("Union"),
            QueryMethod::Concat(_) => String::from("Concat"),
            QueryMethod::Except(_) => String::from("Except"),
            QueryMethod::Intersect(_) => String::from("Intersect"),
        }
    }
}

/// Query expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Every entity of a type.
    Root(String),
    Local(LocalCollection),
    /// Lambda parameter.
    Param(String),
    Member {
        source: Box<Expr>,
        name: String,
    },
    Constant(Field),
    /// Runtime value bound at execution; the cache key holds only its name.
    Variable {
        name: String,
        dtype: DataType,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
    Call {
        function: ExprFunction,
        args: Vec<Expr>,
    },
    /// Anonymous record.
    New(Vec<(String, Expr)>),
    Method {
        source: Box<Expr>,
        method: QueryMethod,
    },
}

/// Lambda parameter reference.
pub fn param(name: &str) -> Expr {
    Expr::Param(name.to_string())
}

/// Constant.
pub fn lit(field: Field) -> Expr {
    Expr::Constant(field)
}

/// Runtime variable.
pub fn var(name: &str, dtype: DataType) -> Expr {
    Expr::Variable {
        name: name.to_string(),
        dtype,
    }
}

pub fn lambda(param: &str, body: Expr) -> Lambda {
    Lambda::new(param, body)
}

/// Anonymous record from `(name, value)` pairs.
pub fn new_record(members: Vec<(&str, Expr)>) -> Expr {
    Expr::New(
        members
            .into_iter()
            .map(|(n, e)| (n.to_string(), e))
            .collect(),
    )
}

impl Expr {
    /// `Query.All<T>()`.
    pub fn root(type_name: &str) -> Self {
        Expr::Root(type_name.to_string())
    }

    pub fn int(i: i32) -> Self {
        Expr::Constant(Field::IntField(i))
    }

    pub fn string(s: &str) -> Self {
        Expr::Constant(Field::StringField(s.to_string()))
    }

    pub fn null() -> Self {
        Expr::Constant(Field::Null)
    }

    pub fn member(self, name: &str) -> Self {
        Expr::Member {
            source: Box::new(self),
            name: name.to_string(),
        }
    }

    /// Member path such as `Customer.Address.City`.
    pub fn path(self, path: &str) -> Self {
        path.split('.').fold(self, |e, name| e.member(name))
    }

    pub fn binary(self, op: BinaryOp, other: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    pub fn eq(self, other: Expr) -> Self {
        self.binary(BinaryOp::Equal, other)
    }

    pub fn ne(self, other: Expr) -> Self {
        self.binary(BinaryOp::NotEqual, other)
    }

    pub fn lt(self, other: Expr) -> Self {
        self.binary(BinaryOp::Less, other)
    }

    pub fn gt(self, other: Expr) -> Self {
        self.binary(BinaryOp::Greater, other)
    }

    pub fn and(self, other: Expr) -> Self {
        self.binary(BinaryOp::And, other)
    }

    pub fn or(self, other: Expr) -> Self {
        self.binary(BinaryOp::Or, other)
    }

    pub fn not(self) -> Self {
        Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self),
        }
    }

    pub fn call(function: ExprFunction, args: Vec<Expr>) -> Self {
        Expr::Call { function, args }
    }

    pub fn method(self, method: QueryMethod) -> Self {
        Expr::Method {
            source: Box::new(self),
            method,
        }
    }

    pub fn filter(self, predicate: Lambda) -> Self {
        self.method(QueryMethod::Where(predicate))
    }

    pub fn select(self, selector: Lambda) -> Self {
        self.method(QueryMethod::Select(selector))
    }

    pub fn order_by(self, key: Lambda) -> Self {
        self.method(QueryMethod::OrderBy {
            key,
            descending: false,
        })
    }

    pub fn order_by_descending(self, key: Lambda) -> Self {
        self.method(QueryMethod::OrderBy {
            key,
            descending: true,
        })
    }

    pub fn then_by(self, key: Lambda) -> Self {
        self.method(QueryMethod::ThenBy {
            key,
            descending: false,
        })
    }

    pub fn take(self, count: Expr) -> Self {
        self.method(QueryMethod::Take(Box::new(count)))
    }

    pub fn skip(self, count: Expr) -> Self {
        self.method(QueryMethod::Skip(Box::new(count)))
    }

    pub fn distinct(self) -> Self {
        self.method(QueryMethod::Distinct)
    }

    pub fn group_by(self, key: Lambda) -> Self {
        self.method(QueryMethod::GroupBy {
            key,
            element: None,
            result: None,
        })
    }

    pub fn any(self, predicate: Option<Lambda>) -> Self {
        self.method(QueryMethod::Any(predicate))
    }

    pub fn all(self, predicate: Lambda) -> Self {
        self.method(QueryMethod::All(predicate))
    }

    pub fn count(self) -> Self {
        self.method(QueryMethod::Count {
            predicate: None,
            long: false,
        })
    }

    pub fn first(self) -> Self {
        self.method(QueryMethod::First {
            predicate: None,
            or_default: false,
        })
    }

    pub fn single(self) -> Self {
        self.method(QueryMethod::Single {
            predicate: None,
            or_default: false,
        })
    }

    fn aggregate(self, kind: AggregateKind, selector: Option<Lambda>) -> Self {
        self.method(QueryMethod::Aggregate { kind, selector })
    }

    pub fn sum(self, selector: Option<Lambda>) -> Self {
        self.aggregate(AggregateKind::Sum, selector)
    }

    pub fn min(self, selector: Option<Lambda>) -> Self {
        self.aggregate(AggregateKind::Min, selector)
    }

    pub fn max(self, selector: Option<Lambda>) -> Self {
        self.aggregate(AggregateKind::Max, selector)
    }

    pub fn average(self, selector: Option<Lambda>) -> Self {
        self.aggregate(AggregateKind::Avg, selector)
    }

    /// Replaces free references to parameter `from` with `to`.
    pub fn rename_param(&self, from: &str, to: &str) -> Expr {
        let rename_lambda = |l: &Lambda| -> Lambda {
            if l.params.iter().any(|p| p == from) {
                l.clone()
            } else {
                Lambda {
                    params: l.params.clone(),
                    body: Box::new(l.body.rename_param(from, to)),
                }
            }
        };
        let boxed = |e: &Expr| Box::new(e.rename_param(from, to));
        match self {
            Expr::Param(name) if name == from => Expr::Param(to.to_string()),
            Expr::Root(_) | Expr::Local(_) | Expr::Param(_) | Expr::Constant(_) | Expr::Variable { .. } => {
                self.clone()
            }
            Expr::Member { source, name } => Expr::Member {
                source: boxed(source),
                name: name.clone(),
            },
            Expr::Binary { op, left, right } => Expr::Binary {
                op: *op,
                left: boxed(left),
                right: boxed(right),
            },
            Expr::Unary { op, operand } => Expr::Unary {
                op: *op,
                operand: boxed(operand),
            },
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => Expr::Conditional {
                test: boxed(test),
                if_true: boxed(if_true),
                if_false: boxed(if_false),
            },
            Expr::Call { function, args } => Expr::Call {
                function: *function,
                args: args.iter().map(|a| a.rename_param(from, to)).collect(),
            },
            Expr::New(members) => Expr::New(
                members
                    .iter()
                    .map(|(n, e)| (n.clone(), e.rename_param(from, to)))
                    .collect(),
            ),
            Expr::Method { source, method } => {
                let method = match method {
                    QueryMethod::Where(l) => QueryMethod::Where(rename_lambda(l)),
                    QueryMethod::Select(l) => QueryMethod::Select(rename_lambda(l)),
                    QueryMethod::SelectMany { collection, result } => QueryMethod::SelectMany {
                        collection: rename_lambda(collection),
                        result: result.as_ref().map(rename_lambda),
                    },
                    QueryMethod::Join {
                        inner,
                        outer_key,
                        inner_key,
                        result,
                    } => QueryMethod::Join {
                        inner: boxed(inner),
                        outer_key: rename_lambda(outer_key),
                        inner_key: rename_lambda(inner_key),
                        result: rename_lambda(result),
                    },
                    QueryMethod::LeftJoin {
                        inner,
                        outer_key,
                        inner_key,
                        result,
                    } => QueryMethod::LeftJoin {
                        inner: boxed(inner),
                        outer_key: rename_lambda(outer_key),
                        inner_key: rename_lambda(inner_key),
                        result: rename_lambda(result),
                    },
                    QueryMethod::GroupJoin {
                        inner,
                        outer_key,
                        inner_key,
                        result,
                    } => QueryMethod::GroupJoin {
                        inner: boxed(inner),
                        outer_key: rename_lambda(outer_key),
                        inner_key: rename_lambda(inner_key),
                        result: rename_lambda(result),
                    },
                    QueryMethod::GroupBy {
                        key,
                        element,
                        result,
                    } => QueryMethod::GroupBy {
                        key: rename_lambda(key),
                        element: element.as_ref().map(rename_lambda),
                        result: result.as_ref().map(rename_lambda),
                    },
                    QueryMethod::OrderBy { key, descending } => QueryMethod::OrderBy {
                        key: rename_lambda(key),
                        descending: *descending,
                    },
                    QueryMethod::ThenBy { key, descending } => QueryMethod::ThenBy {
                        key: rename_lambda(key),
                        descending: *descending,
                    },
                    QueryMethod::Take(e) => QueryMethod::Take(boxed(e)),
                    QueryMethod::Skip(e) => QueryMethod::Skip(boxed(e)),
                    QueryMethod::Distinct => QueryMethod::Distinct,
                    QueryMethod::DefaultIfEmpty => QueryMethod::DefaultIfEmpty,
                    QueryMethod::First {
                        predicate,
                        or_default,
                    } => QueryMethod::First {
                        predicate: predicate.as_ref().map(rename_lambda),
                        or_default: *or_default,
                    },
                    QueryMethod::Single {
                        predicate,
                        or_default,
                    } => QueryMethod::Single {
                        predicate: predicate.as_ref().map(rename_lambda),
                        or_default: *or_default,
                    },
                    QueryMethod::Any(p) => QueryMethod::Any(p.as_ref().map(rename_lambda)),
                    QueryMethod::All(p) => QueryMethod::All(rename_lambda(p)),
                    QueryMethod::Contains(e) => QueryMethod::Contains(boxed(e)),
                    QueryMethod::Count { predicate, long } => QueryMethod::Count {
                        predicate: predicate.as_ref().map(rename_lambda),
                        long: *long,
                    },
                    QueryMethod::Aggregate { kind, selector } => QueryMethod::Aggregate {
                        kind: *kind,
                        selector: selector.as_ref().map(rename_lambda),
                    },
                    QueryMethod::Union(e) => QueryMethod::Union(boxed(e)),
                    QueryMethod::Concat(e) => QueryMethod::Concat(boxed(e)),
                    QueryMethod::Except(e) => QueryMethod::Except(boxed(e)),
                    QueryMethod::Intersect(e) => QueryMethod::Intersect(boxed(e)),
                };
                Expr::Method {
                    source: boxed(source),
                    method,
                }
            }
        }
    }
}

impl fmt::Display for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.params.len() == 1 {
            write!(f, "{} => {}", self.params[0], self.body)
        } else {
            write!(f, "({}) => {}", self.params.join(", "), self.body)
        }
    }
}

fn fmt_literal(field: &Field, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match field {
        Field::Null => write!(f, "null"),
        Field::StringField(s) => write!(f, "\"{}\"", s),
        Field::DateTimeField(_) => write!(f, "DateTime({})", field),
        other => write!(f, "{}", other),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Root(t) => write!(f, "Query.All<{}>()", t),
            Expr::Local(c) => write!(f, "Local<{}>[{}]", c.columns.len(), c.rows.len()),
            Expr::Param(p) => write!(f, "{}", p),
            Expr::Member { source, name } => write!(f, "{}.{}", source, name),
            Expr::Constant(c) => fmt_literal(c, f),
            Expr::Variable { name, .. } => write!(f, "value({})", name),
            Expr::Binary { op, left, right } => match op {
                BinaryOp::And => write!(f, "({} && {})", left, right),
                BinaryOp::Or => write!(f, "({} || {})", left, right),
                BinaryOp::Equal => write!(f, "({} == {})", left, right),
                BinaryOp::NotEqual => write!(f, "({} != {})", left, right),
                BinaryOp::Concat => write!(f, "({} + {})", left, right),
                op => write!(f, "({} {} {})", left, op, right),
            },
            Expr::Unary { op, operand } => match op {
                UnaryOp::Not => write!(f, "!{}", operand),
                UnaryOp::Negate => write!(f, "-{}", operand),
                UnaryOp::IsNull => write!(f, "({} == null)", operand),
                UnaryOp::IsNotNull => write!(f, "({} != null)", operand),
            },
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => write!(f, "({} ? {} : {})", test, if_true, if_false),
            Expr::Call { function, args } => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                match function {
                    ExprFunction::Scalar(s) => write!(f, "{}({})", s, args.join(", ")),
                    ExprFunction::StartsWith => write!(f, "{}.StartsWith({})", args[0], args[1..].join(", ")),
                    ExprFunction::EndsWith => write!(f, "{}.EndsWith({})", args[0], args[1..].join(", ")),
                    ExprFunction::StringContains => {
                        write!(f, "{}.Contains({})", args[0], args[1..].join(", "))
                    }
                }
            }
            Expr::New(members) => {
                let members: Vec<String> = members
                    .iter()
                    .map(|(n, e)| format!("{} = {}", n, e))
                    .collect();
                write!(f, "new {{ {} }}", members.join(", "))
            }
            Expr::Method { source, method } => {
                write!(f, "{}.{}(", source, method.name())?;
                let args: Vec<String> = match method {
                    QueryMethod::Where(l) | QueryMethod::Select(l) | QueryMethod::All(l) => {
                        vec![l.to_string()]
                    }
                    QueryMethod::SelectMany { collection, result } => {
                        let mut v = vec![collection.to_string()];
                        v.extend(result.iter().map(|r| r.to_string()));
                        v
                    }
                    QueryMethod::Join {
                        inner,
                        outer_key,
                        inner_key,
                        result,
                    }
                    | QueryMethod::LeftJoin {
                        inner,
                        outer_key,
                        inner_key,
                        result,
                    }
                    | QueryMethod::GroupJoin {
                        inner,
                        outer_key,
                        inner_key,
                        result,
                    } => vec![
                        inner.to_string(),
                        outer_key.to_string(),
                        inner_key.to_string(),
                        result.to_string(),
                    ],
                    QueryMethod::GroupBy {
                        key,
                        element,
                        result,
                    } => {
                        let mut v = vec![key.to_string()];
                        v.extend(element.iter().map(|e| e.to_string()));
                        v.extend(result.iter().map(|r| r.to_string()));
                        v
                    }
                    QueryMethod::OrderBy { key, .. } | QueryMethod::ThenBy { key, .. } => {
                        vec![key.to_string()]
                    }
                    QueryMethod::Take(e)
                    | QueryMethod::Skip(e)
                    | QueryMethod::Contains(e)
                    | QueryMethod::Union(e)
                    | QueryMethod::Concat(e)
                    | QueryMethod::Except(e)
                    | QueryMethod::Intersect(e) => vec![e.to_string()],
                    QueryMethod::Distinct | QueryMethod::DefaultIfEmpty => vec![],
                    QueryMethod::First { predicate, .. }
                    | QueryMethod::Single { predicate, .. }
                    | QueryMethod::Any(predicate)
                    | QueryMethod::Count { predicate, .. } => {
                        predicate.iter().map(|p| p.to_string()).collect()
                    }
                    QueryMethod::Aggregate { selector, .. } => {
                        selector.iter().map(|p| p.to_string()).collect()
                    }
                };
                write!(f, "{})", args.join(", "))
            }
        }
    }
}

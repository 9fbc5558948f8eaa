use crate::{ApplyParameterId, DataType, Field, ParamKey};
use std::collections::BTreeSet;
use std::fmt;

/// Old column index to new column index; `None` for columns that were removed.
pub type ColumnMap = Vec<Option<usize>>;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Concat,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    /// Equality that treats two nulls as equal.
    NullSafeEqual,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        use BinaryOp::*;
        matches!(
            self,
            Equal | NotEqual | Less | LessOrEqual | Greater | GreaterOrEqual | NullSafeEqual
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    /// Operator with its operands swapped.
    pub fn flip(self) -> Self {
        use BinaryOp::*;
        match self {
            Less => Greater,
            LessOrEqual => GreaterOrEqual,
            Greater => Less,
            GreaterOrEqual => LessOrEqual,
            op => op,
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use BinaryOp::*;
        let op_str = match self {
            Add => "+",
            Subtract => "-",
            Multiply => "*",
            Divide => "/",
            Modulo => "%",
            Concat => "||",
            Equal => "==",
            NotEqual => "!=",
            Less => "<",
            LessOrEqual => "<=",
            Greater => ">",
            GreaterOrEqual => ">=",
            NullSafeEqual => "<=>",
            And => "&&",
            Or => "||",
        };
        write!(f, "{}", op_str)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Negate,
    IsNull,
    IsNotNull,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatePart {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

/// Scalar functions every dialect has to spell.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarFunction {
    Upper,
    Lower,
    Length,
    Trim,
    TrimStart,
    TrimEnd,
    /// Substring(text, zero based start, length).
    Substring,
    Abs,
    Round,
    Coalesce,
    CurrentDate,
    CurrentTimestamp,
    DatePart(DatePart),
}

impl fmt::Display for ScalarFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarFunction::DatePart(p) => write!(f, "DatePart({:?})", p),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Expression over the fields of a tuple.
///
/// Leaves read tuple columns, outer rows of an apply, literals or runtime parameters.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum TupleExpr {
    Column(usize),
    /// Column `index` of the row currently bound to `parameter`.
    ApplyParam {
        parameter: ApplyParameterId,
        index: usize,
    },
    Literal(Field),
    Parameter(ParamKey),
    Binary {
        op: BinaryOp,
        left: Box<TupleExpr>,
        right: Box<TupleExpr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<TupleExpr>,
    },
    Conditional {
        test: Box<TupleExpr>,
        if_true: Box<TupleExpr>,
        if_false: Box<TupleExpr>,
    },
    Function {
        function: ScalarFunction,
        args: Vec<TupleExpr>,
    },
    Cast {
        operand: Box<TupleExpr>,
        dtype: DataType,
    },
    /// SQL LIKE with `%`/`_` wildcards and an optional escape character.
    Like {
        operand: Box<TupleExpr>,
        pattern: String,
        escape: Option<char>,
    },
}

impl TupleExpr {
    pub fn column(i: usize) -> Self {
        TupleExpr::Column(i)
    }

    pub fn literal(f: Field) -> Self {
        TupleExpr::Literal(f)
    }

    pub fn binary(op: BinaryOp, left: TupleExpr, right: TupleExpr) -> Self {
        TupleExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnaryOp, operand: TupleExpr) -> Self {
        TupleExpr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn eq(left: TupleExpr, right: TupleExpr) -> Self {
        Self::binary(BinaryOp::Equal, left, right)
    }

    pub fn and(left: TupleExpr, right: TupleExpr) -> Self {
        Self::binary(BinaryOp::And, left, right)
    }

    pub fn or(left: TupleExpr, right: TupleExpr) -> Self {
        Self::binary(BinaryOp::Or, left, right)
    }

    pub fn not(operand: TupleExpr) -> Self {
        match operand {
            TupleExpr::Unary {
                op: UnaryOp::Not,
                operand,
            } => *operand,
            other => Self::unary(UnaryOp::Not, other),
        }
    }

    pub fn is_null(operand: TupleExpr) -> Self {
        Self::unary(UnaryOp::IsNull, operand)
    }

    /// Always-true predicate.
    pub fn true_literal() -> Self {
        TupleExpr::Literal(Field::BoolField(true))
    }

    pub fn is_true_literal(&self) -> bool {
        matches!(self, TupleExpr::Literal(Field::BoolField(true)))
    }

    /// Conjunction of all predicates, `None` when there are none.
    pub fn conjunction(predicates: Vec<TupleExpr>) -> Option<TupleExpr> {
        predicates.into_iter().fold(None, |acc, p| match acc {
            None => Some(p),
            Some(a) => Some(TupleExpr::and(a, p)),
        })
    }

    /// Children of this node, left to right.
    pub fn children(&self) -> Vec<&TupleExpr> {
        match self {
            TupleExpr::Column(_)
            | TupleExpr::ApplyParam { .. }
            | TupleExpr::Literal(_)
            | TupleExpr::Parameter(_) => vec![],
            TupleExpr::Binary { left, right, .. } => vec![left, right],
            TupleExpr::Unary { operand, .. } => vec![operand],
            TupleExpr::Conditional {
                test,
                if_true,
                if_false,
            } => vec![test, if_true, if_false],
            TupleExpr::Function { args, .. } => args.iter().collect(),
            TupleExpr::Cast { operand, .. } => vec![operand],
            TupleExpr::Like { operand, .. } => vec![operand],
        }
    }

    /// Calls `f` on every leaf.
    pub fn visit_leaves<F: FnMut(&TupleExpr)>(&self, f: &mut F) {
        let children = self.children();
        if children.is_empty() {
            f(self);
        } else {
            for c in children {
                c.visit_leaves(f);
            }
        }
    }

    /// Rebuilds the expression replacing each leaf with `f(leaf)`; `None` from `f` aborts.
    pub fn try_map_leaves<F>(&self, f: &mut F) -> Option<TupleExpr>
    where
        F: FnMut(&TupleExpr) -> Option<TupleExpr>,
    {
        Some(match self {
            TupleExpr::Column(_)
            | TupleExpr::ApplyParam { .. }
            | TupleExpr::Literal(_)
            | TupleExpr::Parameter(_) => return f(self),
            TupleExpr::Binary { op, left, right } => TupleExpr::Binary {
                op: *op,
                left: Box::new(left.try_map_leaves(f)?),
                right: Box::new(right.try_map_leaves(f)?),
            },
            TupleExpr::Unary { op, operand } => TupleExpr::Unary {
                op: *op,
                operand: Box::new(operand.try_map_leaves(f)?),
            },
            TupleExpr::Conditional {
                test,
                if_true,
                if_false,
            } => TupleExpr::Conditional {
                test: Box::new(test.try_map_leaves(f)?),
                if_true: Box::new(if_true.try_map_leaves(f)?),
                if_false: Box::new(if_false.try_map_leaves(f)?),
            },
            TupleExpr::Function { function, args } => {
                let mut new_args = Vec::with_capacity(args.len());
                for a in args {
                    new_args.push(a.try_map_leaves(f)?);
                }
                TupleExpr::Function {
                    function: *function,
                    args: new_args,
                }
            }
            TupleExpr::Cast { operand, dtype } => TupleExpr::Cast {
                operand: Box::new(operand.try_map_leaves(f)?),
                dtype: *dtype,
            },
            TupleExpr::Like {
                operand,
                pattern,
                escape,
            } => TupleExpr::Like {
                operand: Box::new(operand.try_map_leaves(f)?),
                pattern: pattern.clone(),
                escape: *escape,
            },
        })
    }

    /// Total version of `try_map_leaves`.
    pub fn map_leaves<F>(&self, mut f: F) -> TupleExpr
    where
        F: FnMut(&TupleExpr) -> TupleExpr,
    {
        match self.try_map_leaves(&mut |leaf| Some(f(leaf))) {
            Some(e) => e,
            None => unreachable!("leaf mapping never aborts"),
        }
    }

    /// Column indexes read by the expression.
    pub fn columns(&self) -> BTreeSet<usize> {
        let mut res = BTreeSet::new();
        self.visit_leaves(&mut |leaf| {
            if let TupleExpr::Column(i) = leaf {
                res.insert(*i);
            }
        });
        res
    }

    /// Apply parameters read by the expression.
    pub fn apply_parameters(&self) -> BTreeSet<ApplyParameterId> {
        let mut res = BTreeSet::new();
        self.visit_leaves(&mut |leaf| {
            if let TupleExpr::ApplyParam { parameter, .. } = leaf {
                res.insert(*parameter);
            }
        });
        res
    }

    /// Outer row columns read through `parameter`.
    pub fn apply_parameter_indexes(&self, parameter: ApplyParameterId) -> BTreeSet<usize> {
        let mut res = BTreeSet::new();
        self.visit_leaves(&mut |leaf| {
            if let TupleExpr::ApplyParam { parameter: p, index } = leaf {
                if *p == parameter {
                    res.insert(*index);
                }
            }
        });
        res
    }

    pub fn references_parameter(&self, parameter: ApplyParameterId) -> bool {
        !self.apply_parameter_indexes(parameter).is_empty()
    }

    /// Query parameters read by the expression.
    pub fn parameters(&self) -> Vec<ParamKey> {
        let mut res = Vec::new();
        self.visit_leaves(&mut |leaf| {
            if let TupleExpr::Parameter(p) = leaf {
                res.push(p.clone());
            }
        });
        res
    }

    /// Shifts every column index right by `offset`.
    pub fn shift(&self, offset: usize) -> TupleExpr {
        self.map_leaves(|leaf| match leaf {
            TupleExpr::Column(i) => TupleExpr::Column(i + offset),
            other => other.clone(),
        })
    }

    /// Moves columns through `map`; `None` if a read column was removed.
    pub fn remap(&self, map: &[Option<usize>]) -> Option<TupleExpr> {
        self.try_map_leaves(&mut |leaf| match leaf {
            TupleExpr::Column(i) => map.get(*i).copied().flatten().map(TupleExpr::Column),
            other => Some(other.clone()),
        })
    }

    /// Moves the outer columns read through `parameter` through `map`.
    pub fn remap_apply_parameter(
        &self,
        parameter: ApplyParameterId,
        map: &[Option<usize>],
    ) -> Option<TupleExpr> {
        self.try_map_leaves(&mut |leaf| match leaf {
            TupleExpr::ApplyParam { parameter: p, index } if *p == parameter => map
                .get(*index)
                .copied()
                .flatten()
                .map(|index| TupleExpr::ApplyParam { parameter, index }),
            other => Some(other.clone()),
        })
    }

    /// Rewrites columns as outer reads through `parameter`.
    pub fn to_outer(&self, parameter: ApplyParameterId) -> TupleExpr {
        self.map_leaves(|leaf| match leaf {
            TupleExpr::Column(index) => TupleExpr::ApplyParam {
                parameter,
                index: *index,
            },
            other => other.clone(),
        })
    }

    /// Rewrites outer reads through `parameter` as plain column reads, so the
    /// expression can run over `left ++ right` once the apply became a join.
    pub fn bind_apply_parameter(&self, parameter: ApplyParameterId) -> TupleExpr {
        self.map_leaves(|leaf| match leaf {
            TupleExpr::ApplyParam { parameter: p, index } if *p == parameter => {
                TupleExpr::Column(*index)
            }
            other => other.clone(),
        })
    }

    /// Rewrites outer reads through `parameter` as query parameters bound per outer row.
    pub fn apply_parameter_to_query_parameter(&self, parameter: ApplyParameterId) -> TupleExpr {
        self.map_leaves(|leaf| match leaf {
            TupleExpr::ApplyParam { parameter: p, index } if *p == parameter => {
                TupleExpr::Parameter(ParamKey::Outer {
                    parameter,
                    index: *index,
                })
            }
            other => other.clone(),
        })
    }
}

impl fmt::Display for TupleExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TupleExpr::Column(i) => write!(f, "t[{}]", i),
            TupleExpr::ApplyParam { parameter, index } => write!(f, "{}[{}]", parameter, index),
            TupleExpr::Literal(Field::StringField(s)) => write!(f, "'{}'", s),
            TupleExpr::Literal(x) => write!(f, "{}", x),
            TupleExpr::Parameter(p) => write!(f, "{}", p),
            TupleExpr::Binary { op, left, right } => write!(f, "({} {} {})", left, op, right),
            TupleExpr::Unary { op, operand } => match op {
                UnaryOp::Not => write!(f, "!{}", operand),
                UnaryOp::Negate => write!(f, "-{}", operand),
                UnaryOp::IsNull => write!(f, "({} is null)", operand),
                UnaryOp::IsNotNull => write!(f, "({} is not null)", operand),
            },
            TupleExpr::Conditional {
                test,
                if_true,
                if_false,
            } => write!(f, "({} ? {} : {})", test, if_true, if_false),
            TupleExpr::Function { function, args } => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", function, args.join(", "))
            }
            TupleExpr::Cast { operand, dtype } => write!(f, "({}){}", dtype, operand),
            TupleExpr::Like {
                operand, pattern, ..
            } => write!(f, "({} like '{}')", operand, pattern),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> TupleExpr {
        TupleExpr::and(
            TupleExpr::eq(TupleExpr::Column(1), TupleExpr::literal(Field::IntField(3))),
            TupleExpr::binary(
                BinaryOp::Greater,
                TupleExpr::Column(4),
                TupleExpr::ApplyParam {
                    parameter: ApplyParameterId(0),
                    index: 2,
                },
            ),
        )
    }

    #[test]
    fn test_columns_and_parameters() {
        let e = sample();
        assert_eq!(e.columns().into_iter().collect::<Vec<_>>(), vec![1, 4]);
        assert!(e.references_parameter(ApplyParameterId(0)));
        assert!(!e.references_parameter(ApplyParameterId(1)));
        assert_eq!(
            e.apply_parameter_indexes(ApplyParameterId(0))
                .into_iter()
                .collect::<Vec<_>>(),
            vec![2]
        );
    }

    #[test]
    fn test_remap() {
        let e = sample();
        let map = vec![None, Some(0), None, None, Some(1)];
        assert_eq!(e.remap(&map).unwrap().columns().len(), 2);
        let lossy = vec![None, Some(0), None, None, None];
        assert!(e.remap(&lossy).is_none());
    }

    #[test]
    fn test_bind_apply_parameter() {
        let e = sample().shift(10).bind_apply_parameter(ApplyParameterId(0));
        assert!(e.apply_parameters().is_empty());
        assert_eq!(e.columns().into_iter().collect::<Vec<_>>(), vec![2, 11, 14]);
    }

    #[test]
    fn test_query_parameter_rewrite() {
        let e = sample().apply_parameter_to_query_parameter(ApplyParameterId(0));
        assert_eq!(
            e.parameters(),
            vec![ParamKey::Outer {
                parameter: ApplyParameterId(0),
                index: 2
            }]
        );
    }

    #[test]
    fn test_not_cancels() {
        let e = TupleExpr::not(TupleExpr::not(TupleExpr::Column(0)));
        assert_eq!(e, TupleExpr::Column(0));
        assert_eq!(sample().to_string(), "((t[1] == 3) && (t[4] > ap0[2]))");
    }
}

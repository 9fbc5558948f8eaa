//! Evaluation of tuple expressions with SQL null semantics.

use chrono::{Datelike, Local, Timelike};
use common::execution::ParameterValues;
use common::logical_plan::{BinaryOp, DatePart, ScalarFunction, TupleExpr, UnaryOp};
use common::{ApplyParameterId, DataType, Field, OrmError, Tuple};
use rust_decimal::{Decimal, RoundingStrategy};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Values visible to an expression besides its own tuple.
pub struct Env<'a> {
    pub parameters: &'a ParameterValues,
    /// Current left row of every enclosing apply.
    pub outer: &'a HashMap<ApplyParameterId, Tuple>,
}

fn overflow() -> OrmError {
    OrmError::InvalidOperation(String::from("Arithmetic overflow"))
}

fn division_by_zero() -> OrmError {
    OrmError::InvalidOperation(String::from("Division by zero"))
}

/// Three-valued truth of a field.
pub fn truth(field: &Field) -> Result<Option<bool>, OrmError> {
    match field {
        Field::Null => Ok(None),
        Field::BoolField(b) => Ok(Some(*b)),
        other => Err(OrmError::InvalidOperation(format!(
            "{} is not a condition",
            other
        ))),
    }
}

fn from_truth(t: Option<bool>) -> Field {
    match t {
        Some(b) => Field::BoolField(b),
        None => Field::Null,
    }
}

/// Evaluates `expr` over `tuple`.
///
/// # Arguments
///
/// * `expr` - Expression to evaluate.
/// * `tuple` - Current row.
/// * `env` - Parameters and outer rows.
pub fn eval(expr: &TupleExpr, tuple: &Tuple, env: &Env) -> Result<Field, OrmError> {
    match expr {
        TupleExpr::Column(i) => tuple.get_field(*i).cloned().ok_or_else(|| {
            OrmError::ValidationError(format!("Column {} out of range for {}", i, tuple))
        }),
        TupleExpr::ApplyParam { parameter, index } => env
            .outer
            .get(parameter)
            .and_then(|row| row.get_field(*index))
            .cloned()
            .ok_or_else(|| {
                OrmError::ValidationError(format!("Unbound apply parameter {}[{}]", parameter, index))
            }),
        TupleExpr::Literal(f) => Ok(f.clone()),
        TupleExpr::Parameter(key) => env
            .parameters
            .get(key)
            .cloned()
            .ok_or_else(|| OrmError::ValidationError(format!("Parameter {} is not bound", key))),
        TupleExpr::Binary { op, left, right } => match op {
            BinaryOp::And => {
                let l = truth(&eval(left, tuple, env)?)?;
                if l == Some(false) {
                    return Ok(Field::BoolField(false));
                }
                let r = truth(&eval(right, tuple, env)?)?;
                Ok(match (l, r) {
                    (_, Some(false)) => Field::BoolField(false),
                    (Some(true), Some(true)) => Field::BoolField(true),
                    _ => Field::Null,
                })
            }
            BinaryOp::Or => {
                let l = truth(&eval(left, tuple, env)?)?;
                if l == Some(true) {
                    return Ok(Field::BoolField(true));
                }
                let r = truth(&eval(right, tuple, env)?)?;
                Ok(match (l, r) {
                    (_, Some(true)) => Field::BoolField(true),
                    (Some(false), Some(false)) => Field::BoolField(false),
                    _ => Field::Null,
                })
            }
            _ => binary(*op, &eval(left, tuple, env)?, &eval(right, tuple, env)?),
        },
        TupleExpr::Unary { op, operand } => {
            let v = eval(operand, tuple, env)?;
            match op {
                UnaryOp::Not => Ok(from_truth(truth(&v)?.map(|b| !b))),
                UnaryOp::IsNull => Ok(Field::BoolField(v.is_null())),
                UnaryOp::IsNotNull => Ok(Field::BoolField(!v.is_null())),
                UnaryOp::Negate => negate(&v),
            }
        }
        TupleExpr::Conditional {
            test,
            if_true,
            if_false,
        } => {
            if truth(&eval(test, tuple, env)?)? == Some(true) {
                eval(if_true, tuple, env)
            } else {
                eval(if_false, tuple, env)
            }
        }
        TupleExpr::Function { function, args } => {
            let mut values = Vec::with_capacity(args.len());
            for a in args {
                values.push(eval(a, tuple, env)?);
            }
            call(*function, &values)
        }
        TupleExpr::Cast { operand, dtype } => eval(operand, tuple, env)?.cast(*dtype),
        TupleExpr::Like {
            operand,
            pattern,
            escape,
        } => match eval(operand, tuple, env)? {
            Field::Null => Ok(Field::Null),
            Field::StringField(s) => Ok(Field::BoolField(like_match(&s, pattern, *escape))),
            other => Err(OrmError::InvalidOperation(format!("LIKE over {}", other))),
        },
    }
}

/// Whether `expr` holds for `tuple`; null counts as false.
pub fn eval_predicate(expr: &TupleExpr, tuple: &Tuple, env: &Env) -> Result<bool, OrmError> {
    Ok(truth(&eval(expr, tuple, env)?)? == Some(true))
}

fn binary(op: BinaryOp, l: &Field, r: &Field) -> Result<Field, OrmError> {
    if op == BinaryOp::NullSafeEqual {
        return Ok(Field::BoolField(match (l.is_null(), r.is_null()) {
            (true, true) => true,
            (false, false) => compare(l, r)? == Ordering::Equal,
            _ => false,
        }));
    }
    if l.is_null() || r.is_null() {
        return Ok(Field::Null);
    }
    if op.is_comparison() {
        let ord = compare(l, r)?;
        let res = match op {
            BinaryOp::Equal => ord == Ordering::Equal,
            BinaryOp::NotEqual => ord != Ordering::Equal,
            BinaryOp::Less => ord == Ordering::Less,
            BinaryOp::LessOrEqual => ord != Ordering::Greater,
            BinaryOp::Greater => ord == Ordering::Greater,
            _ => ord != Ordering::Less,
        };
        return Ok(Field::BoolField(res));
    }
    if op == BinaryOp::Concat {
        return Ok(Field::StringField(format!("{}{}", l, r)));
    }
    arithmetic(op, l, r)
}

fn compare(l: &Field, r: &Field) -> Result<Ordering, OrmError> {
    l.sql_cmp(r)
        .ok_or_else(|| OrmError::InvalidOperation(format!("Cannot compare {} and {}", l, r)))
}

fn arithmetic(op: BinaryOp, l: &Field, r: &Field) -> Result<Field, OrmError> {
    let err = || OrmError::InvalidOperation(format!("Cannot apply {} to {} and {}", op, l, r));
    let (lt, rt) = (l.dtype().ok_or_else(err)?, r.dtype().ok_or_else(err)?);
    let dtype = lt
        .promote(rt)
        .filter(|t| t.is_numeric())
        .ok_or_else(err)?;
    match dtype {
        DataType::Int => {
            let (a, b) = (
                l.as_i64().ok_or_else(err)? as i32,
                r.as_i64().ok_or_else(err)? as i32,
            );
            if b == 0 && matches!(op, BinaryOp::Divide | BinaryOp::Modulo) {
                return Err(division_by_zero());
            }
            let res = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Subtract => a.checked_sub(b),
                BinaryOp::Multiply => a.checked_mul(b),
                BinaryOp::Divide => a.checked_div(b),
                BinaryOp::Modulo => a.checked_rem(b),
                _ => return Err(err()),
            };
            res.map(Field::IntField).ok_or_else(overflow)
        }
        DataType::Long => {
            let (a, b) = (l.as_i64().ok_or_else(err)?, r.as_i64().ok_or_else(err)?);
            if b == 0 && matches!(op, BinaryOp::Divide | BinaryOp::Modulo) {
                return Err(division_by_zero());
            }
            let res = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Subtract => a.checked_sub(b),
                BinaryOp::Multiply => a.checked_mul(b),
                BinaryOp::Divide => a.checked_div(b),
                BinaryOp::Modulo => a.checked_rem(b),
                _ => return Err(err()),
            };
            res.map(Field::LongField).ok_or_else(overflow)
        }
        DataType::Decimal => {
            let (a, b) = (
                l.as_decimal().ok_or_else(err)?,
                r.as_decimal().ok_or_else(err)?,
            );
            if b.is_zero() && matches!(op, BinaryOp::Divide | BinaryOp::Modulo) {
                return Err(division_by_zero());
            }
            let res = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Subtract => a.checked_sub(b),
                BinaryOp::Multiply => a.checked_mul(b),
                BinaryOp::Divide => a.checked_div(b),
                BinaryOp::Modulo => a.checked_rem(b),
                _ => return Err(err()),
            };
            res.map(Field::DecimalField).ok_or_else(overflow)
        }
        _ => {
            let (a, b) = (l.as_f64().ok_or_else(err)?, r.as_f64().ok_or_else(err)?);
            let res = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Subtract => a - b,
                BinaryOp::Multiply => a * b,
                BinaryOp::Divide => a / b,
                BinaryOp::Modulo => a % b,
                _ => return Err(err()),
            };
            Ok(if dtype == DataType::Float {
                Field::FloatField(res as f32)
            } else {
                Field::DoubleField(res)
            })
        }
    }
}

fn negate(v: &Field) -> Result<Field, OrmError> {
    Ok(match v {
        Field::Null => Field::Null,
        Field::IntField(i) => Field::IntField(i.checked_neg().ok_or_else(overflow)?),
        Field::LongField(i) => Field::LongField(i.checked_neg().ok_or_else(overflow)?),
        Field::FloatField(x) => Field::FloatField(-x),
        Field::DoubleField(x) => Field::DoubleField(-x),
        Field::DecimalField(d) => Field::DecimalField(-*d),
        other => {
            return Err(OrmError::InvalidOperation(format!(
                "Cannot negate {}",
                other
            )))
        }
    })
}

fn string_arg<'a>(function: ScalarFunction, args: &'a [Field], i: usize) -> Result<Option<&'a str>, OrmError> {
    match args.get(i) {
        Some(Field::Null) => Ok(None),
        Some(Field::StringField(s)) => Ok(Some(s)),
        _ => Err(OrmError::InvalidOperation(format!(
            "{} expects text as argument {}",
            function, i
        ))),
    }
}

fn int_arg(function: ScalarFunction, args: &[Field], i: usize) -> Result<Option<i64>, OrmError> {
    match args.get(i) {
        Some(Field::Null) => Ok(None),
        Some(f) => f.as_i64().map(Some).ok_or_else(|| {
            OrmError::InvalidOperation(format!("{} expects an integer as argument {}", function, i))
        }),
        None => Err(OrmError::InvalidOperation(format!(
            "{} is missing argument {}",
            function, i
        ))),
    }
}

fn call(function: ScalarFunction, args: &[Field]) -> Result<Field, OrmError> {
    let text = |f: fn(&str) -> String| -> Result<Field, OrmError> {
        Ok(match string_arg(function, args, 0)? {
            Some(s) => Field::StringField(f(s)),
            None => Field::Null,
        })
    };
    match function {
        ScalarFunction::Upper => text(|s| s.to_uppercase()),
        ScalarFunction::Lower => text(|s| s.to_lowercase()),
        ScalarFunction::Trim => text(|s| s.trim().to_string()),
        ScalarFunction::TrimStart => text(|s| s.trim_start().to_string()),
        ScalarFunction::TrimEnd => text(|s| s.trim_end().to_string()),
        ScalarFunction::Length => Ok(match string_arg(function, args, 0)? {
            Some(s) => Field::IntField(s.chars().count() as i32),
            None => Field::Null,
        }),
        ScalarFunction::Substring => {
            let s = string_arg(function, args, 0)?;
            let start = int_arg(function, args, 1)?;
            let length = int_arg(function, args, 2)?;
            Ok(match (s, start, length) {
                (Some(s), Some(start), Some(length)) => Field::StringField(
                    s.chars()
                        .skip(start.max(0) as usize)
                        .take(length.max(0) as usize)
                        .collect(),
                ),
                _ => Field::Null,
            })
        }
        ScalarFunction::Abs => match args.get(0) {
            Some(Field::IntField(i)) => Ok(Field::IntField(i.checked_abs().ok_or_else(overflow)?)),
            Some(Field::LongField(i)) => Ok(Field::LongField(i.checked_abs().ok_or_else(overflow)?)),
            Some(Field::FloatField(x)) => Ok(Field::FloatField(x.abs())),
            Some(Field::DoubleField(x)) => Ok(Field::DoubleField(x.abs())),
            Some(Field::DecimalField(d)) => Ok(Field::DecimalField(d.abs())),
            Some(Field::Null) => Ok(Field::Null),
            other => Err(OrmError::InvalidOperation(format!("Abs of {:?}", other))),
        },
        ScalarFunction::Round => match args.get(0) {
            Some(Field::FloatField(x)) => Ok(Field::FloatField(x.round())),
            Some(Field::DoubleField(x)) => Ok(Field::DoubleField(x.round())),
            Some(Field::DecimalField(d)) => Ok(Field::DecimalField(
                d.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero),
            )),
            Some(f @ Field::IntField(_)) | Some(f @ Field::LongField(_)) => Ok(f.clone()),
            Some(Field::Null) => Ok(Field::Null),
            other => Err(OrmError::InvalidOperation(format!("Round of {:?}", other))),
        },
        ScalarFunction::Coalesce => Ok(args
            .iter()
            .find(|f| !f.is_null())
            .cloned()
            .unwrap_or(Field::Null)),
        ScalarFunction::CurrentDate => {
            let today = Local::now().naive_local().date();
            Ok(today
                .and_hms_opt(0, 0, 0)
                .map(Field::DateTimeField)
                .unwrap_or(Field::Null))
        }
        ScalarFunction::CurrentTimestamp => Ok(Field::DateTimeField(Local::now().naive_local())),
        ScalarFunction::DatePart(part) => match args.get(0) {
            Some(Field::DateTimeField(d)) => Ok(Field::IntField(match part {
                DatePart::Year => d.year(),
                DatePart::Month => d.month() as i32,
                DatePart::Day => d.day() as i32,
                DatePart::Hour => d.hour() as i32,
                DatePart::Minute => d.minute() as i32,
                DatePart::Second => d.second() as i32,
            })),
            Some(Field::Null) => Ok(Field::Null),
            other => Err(OrmError::InvalidOperation(format!(
                "{} of {:?}",
                function, other
            ))),
        },
    }
}

#[derive(Debug, PartialEq)]
enum LikeToken {
    Any,
    One,
    Char(char),
}

fn like_tokens(pattern: &str, escape: Option<char>) -> Vec<LikeToken> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if Some(c) == escape {
            if let Some(next) = chars.next() {
                tokens.push(LikeToken::Char(next));
            }
            continue;
        }
        tokens.push(match c {
            '%' => LikeToken::Any,
            '_' => LikeToken::One,
            c => LikeToken::Char(c),
        });
    }
    tokens
}

/// SQL LIKE over characters, case sensitive.
pub fn like_match(value: &str, pattern: &str, escape: Option<char>) -> bool {
    let value: Vec<char> = value.chars().collect();
    let pattern = like_tokens(pattern, escape);
    let mut value_pos = 0usize;
    let mut pattern_pos = 0usize;
    let mut star_pattern_pos: Option<usize> = None;
    let mut star_value_pos = 0usize;

    while value_pos < value.len() {
        if pattern_pos < pattern.len() {
            match pattern[pattern_pos] {
                LikeToken::Any => {
                    star_pattern_pos = Some(pattern_pos);
                    pattern_pos += 1;
                    star_value_pos = value_pos;
                    continue;
                }
                LikeToken::One => {
                    pattern_pos += 1;
                    value_pos += 1;
                    continue;
                }
                LikeToken::Char(c) if c == value[value_pos] => {
                    pattern_pos += 1;
                    value_pos += 1;
                    continue;
                }
                LikeToken::Char(_) => {}
            }
        }
        match star_pattern_pos {
            Some(star_pos) => {
                pattern_pos = star_pos + 1;
                star_value_pos += 1;
                value_pos = star_value_pos;
            }
            None => return false,
        }
    }
    while pattern_pos < pattern.len() && pattern[pattern_pos] == LikeToken::Any {
        pattern_pos += 1;
    }
    pattern_pos == pattern.len()
}

/// Decimal average of `sum` over `count` values.
pub fn decimal_average(sum: Decimal, count: usize) -> Result<Decimal, OrmError> {
    sum.checked_div(Decimal::from(count as u64))
        .ok_or_else(overflow)
}

#[cfg(test)]
mod test {
    use super::*;
    use common::testutil::*;
    use common::ParamKey;

    fn env_eval(expr: &TupleExpr, tuple: &Tuple) -> Result<Field, OrmError> {
        let parameters = ParameterValues::new();
        let outer = HashMap::new();
        eval(
            expr,
            tuple,
            &Env {
                parameters: &parameters,
                outer: &outer,
            },
        )
    }

    #[test]
    fn test_three_valued_logic() {
        let row = Tuple::new(vec![Field::Null, Field::BoolField(false), Field::BoolField(true)]);
        let null = TupleExpr::Column(0);
        let f = TupleExpr::Column(1);
        let t = TupleExpr::Column(2);
        assert_eq!(
            env_eval(&TupleExpr::and(null.clone(), f.clone()), &row).unwrap(),
            Field::BoolField(false)
        );
        assert_eq!(
            env_eval(&TupleExpr::and(null.clone(), t.clone()), &row).unwrap(),
            Field::Null
        );
        assert_eq!(
            env_eval(&TupleExpr::or(null.clone(), t), &row).unwrap(),
            Field::BoolField(true)
        );
        assert_eq!(env_eval(&TupleExpr::not(null.clone()), &row).unwrap(), Field::Null);
        assert_eq!(
            env_eval(&TupleExpr::eq(null.clone(), null.clone()), &row).unwrap(),
            Field::Null
        );
        let null_safe = TupleExpr::binary(BinaryOp::NullSafeEqual, null.clone(), null);
        assert_eq!(env_eval(&null_safe, &row).unwrap(), Field::BoolField(true));
    }

    #[test]
    fn test_checked_arithmetic() {
        let row = Tuple::new(vec![int(i32::MAX), int(1), int(0)]);
        let add = TupleExpr::binary(BinaryOp::Add, TupleExpr::Column(0), TupleExpr::Column(1));
        assert!(matches!(
            env_eval(&add, &row),
            Err(OrmError::InvalidOperation(_))
        ));
        let div = TupleExpr::binary(BinaryOp::Divide, TupleExpr::Column(1), TupleExpr::Column(2));
        assert!(env_eval(&div, &row).is_err());
        let widened = TupleExpr::binary(
            BinaryOp::Add,
            TupleExpr::Column(0),
            TupleExpr::Literal(Field::LongField(1)),
        );
        assert_eq!(
            env_eval(&widened, &row).unwrap(),
            Field::LongField(i32::MAX as i64 + 1)
        );
    }

    #[test]
    fn test_like() {
        assert!(like_match("Female", "Fem%", None));
        assert!(like_match("Female", "%male", None));
        assert!(like_match("Female", "F_m_l_", None));
        assert!(!like_match("Male", "Fem%", None));
        assert!(like_match("100%", "100!%", Some('!')));
        assert!(!like_match("1000", "100!%", Some('!')));
        assert!(like_match("", "%", None));
    }

    #[test]
    fn test_functions_and_parameters() {
        let row = Tuple::new(vec![string("  abc "), Field::Null]);
        let trim = TupleExpr::Function {
            function: ScalarFunction::Trim,
            args: vec![TupleExpr::Column(0)],
        };
        assert_eq!(env_eval(&trim, &row).unwrap(), string("abc"));
        let sub = TupleExpr::Function {
            function: ScalarFunction::Substring,
            args: vec![
                trim,
                TupleExpr::Literal(int(1)),
                TupleExpr::Literal(int(5)),
            ],
        };
        assert_eq!(env_eval(&sub, &row).unwrap(), string("bc"));
        let coalesce = TupleExpr::Function {
            function: ScalarFunction::Coalesce,
            args: vec![TupleExpr::Column(1), TupleExpr::Literal(int(3))],
        };
        assert_eq!(env_eval(&coalesce, &row).unwrap(), int(3));
        let param = TupleExpr::Parameter(ParamKey::Named(String::from("missing")));
        assert!(env_eval(&param, &row).is_err());
    }
}

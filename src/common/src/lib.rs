#[macro_use]
extern crate serde;
extern crate log;

use chrono::NaiveDateTime;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::convert::TryFrom;
use std::error::Error;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io;
use std::str::FromStr;
use std::sync::Arc;

pub mod catalog;
pub mod execution;
pub mod header;
pub mod ids;
pub mod logical_plan;
pub mod model;
pub mod testutil;

pub use header::{Column, Header};
pub use ids::{ApplyParameterId, ParamKey};

/// Format used for date time literals and text conversion.
pub const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Custom error type.
#[derive(Debug, Clone)]
pub enum OrmError {
    /// IO Errors.
    IOError(String),
    /// A query expression could not be translated into providers.
    TranslationError { message: String, expression: String },
    /// A provider construct has no rendering in the target dialect.
    NotSupported { construct: String, dialect: String },
    /// The apply corrector found a predicate configuration it cannot convert.
    CorrectionFault(String),
    /// Invalid operation while shaping results, e.g. an empty sequence.
    InvalidOperation(String),
    /// Validation errors.
    ValidationError(String),
    /// Execution errors raised by the command executor.
    ExecutionError {
        context: String,
        source: Option<Arc<dyn Error + Send + Sync>>,
    },
    /// The operation was cancelled by its token.
    Cancelled,
}

impl OrmError {
    /// Translation error for the given sub-expression.
    ///
    /// # Arguments
    ///
    /// * `message` - What went wrong.
    /// * `expression` - Text of the offending sub-expression.
    pub fn translation(message: impl Into<String>, expression: impl fmt::Display) -> Self {
        OrmError::TranslationError {
            message: message.into(),
            expression: expression.to_string(),
        }
    }

    /// Compilation error naming the construct and the dialect.
    pub fn not_supported(construct: impl Into<String>, dialect: impl Into<String>) -> Self {
        OrmError::NotSupported {
            construct: construct.into(),
            dialect: dialect.into(),
        }
    }

    /// Wraps a collaborator error, keeping it reachable through `source()`.
    pub fn execution<E>(context: impl Into<String>, error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        OrmError::ExecutionError {
            context: context.into(),
            source: Some(Arc::new(error)),
        }
    }

    /// Adds context to translation and execution errors, leaving the cause untouched.
    ///
    /// # Arguments
    ///
    /// * `context` - Description of the enclosing operation (e.g. which sub-query).
    pub fn with_context(self, context: &str) -> Self {
        match self {
            OrmError::TranslationError { message, expression } => OrmError::TranslationError {
                message: format!("{}: {}", context, message),
                expression,
            },
            OrmError::ExecutionError { context: inner, source } => OrmError::ExecutionError {
                context: format!("{}: {}", context, inner),
                source,
            },
            other => other,
        }
    }
}

impl fmt::Display for OrmError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                OrmError::TranslationError { message, expression } =>
                    format!("Translation Error: {} in '{}'", message, expression),
                OrmError::NotSupported { construct, dialect } =>
                    format!("Not Supported: {} is not supported by {}", construct, dialect),
                OrmError::CorrectionFault(s) => format!("Correction Fault: {}", s),
                OrmError::InvalidOperation(s) => format!("Invalid Operation: {}", s),
                OrmError::ValidationError(s) => format!("Validation Error: {}", s),
                OrmError::ExecutionError { context, source } => match source {
                    Some(e) => format!("Execution Error: {}: {}", context, e),
                    None => format!("Execution Error: {}", context),
                },
                OrmError::Cancelled => String::from("Operation Cancelled"),
                OrmError::IOError(s) => s.to_string(),
            }
        )
    }
}

// Implement std::convert::From for OrmError; from io::Error
impl From<io::Error> for OrmError {
    fn from(error: io::Error) -> Self {
        OrmError::IOError(error.to_string())
    }
}

impl From<serde_json::Error> for OrmError {
    fn from(error: serde_json::Error) -> Self {
        OrmError::ValidationError(format!("Malformed json: {}", error))
    }
}

impl Error for OrmError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            OrmError::ExecutionError {
                source: Some(e), ..
            } => Some(e.as_ref() as &(dyn Error + 'static)),
            _ => None,
        }
    }
}

/// Enumerate the supported dtypes.
#[derive(PartialEq, Eq, Hash, Serialize, Deserialize, Clone, Copy, Debug)]
pub enum DataType {
    Bool,
    Int,
    Long,
    Float,
    Double,
    Decimal,
    String,
    DateTime,
}

impl DataType {
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            DataType::Int | DataType::Long | DataType::Float | DataType::Double | DataType::Decimal
        )
    }

    pub fn is_integral(self) -> bool {
        matches!(self, DataType::Int | DataType::Long)
    }

    /// Result type of an arithmetic operation over two operands, if any.
    ///
    /// Integers widen to long, decimals absorb integers, floating types absorb everything else.
    pub fn promote(self, other: DataType) -> Option<DataType> {
        use DataType::*;
        if self == other {
            return Some(self);
        }
        match (self, other) {
            (Int, Long) | (Long, Int) => Some(Long),
            (Decimal, Int) | (Decimal, Long) | (Int, Decimal) | (Long, Decimal) => Some(Decimal),
            (Double, x) | (x, Double) if x.is_numeric() => Some(Double),
            (Float, Decimal) | (Decimal, Float) => Some(Double),
            (Float, x) | (x, Float) if x.is_numeric() => Some(Float),
            _ => None,
        }
    }

    /// Type produced by averaging values of this type.
    pub fn average_type(self) -> Option<DataType> {
        match self {
            DataType::Int | DataType::Long | DataType::Double => Some(DataType::Double),
            DataType::Float => Some(DataType::Float),
            DataType::Decimal => Some(DataType::Decimal),
            _ => None,
        }
    }

    /// Additive identity of a numeric type.
    pub fn zero(self) -> Option<Field> {
        match self {
            DataType::Int => Some(Field::IntField(0)),
            DataType::Long => Some(Field::LongField(0)),
            DataType::Float => Some(Field::FloatField(0.0)),
            DataType::Double => Some(Field::DoubleField(0.0)),
            DataType::Decimal => Some(Field::DecimalField(Decimal::ZERO)),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// For each of the dtypes, make sure that there is a corresponding field type.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Field {
    Null,
    BoolField(bool),
    IntField(i32),
    LongField(i64),
    FloatField(f32),
    DoubleField(f64),
    DecimalField(Decimal),
    StringField(String),
    DateTimeField(NaiveDateTime),
}

impl Field {
    fn rank(&self) -> u8 {
        match self {
            Field::Null => 0,
            Field::BoolField(_) => 1,
            Field::IntField(_) => 2,
            Field::LongField(_) => 3,
            Field::FloatField(_) => 4,
            Field::DoubleField(_) => 5,
            Field::DecimalField(_) => 6,
            Field::StringField(_) => 7,
            Field::DateTimeField(_) => 8,
        }
    }

    /// Returns the dtype of the field, `None` for null.
    pub fn dtype(&self) -> Option<DataType> {
        match self {
            Field::Null => None,
            Field::BoolField(_) => Some(DataType::Bool),
            Field::IntField(_) => Some(DataType::Int),
            Field::LongField(_) => Some(DataType::Long),
            Field::FloatField(_) => Some(DataType::Float),
            Field::DoubleField(_) => Some(DataType::Double),
            Field::DecimalField(_) => Some(DataType::Decimal),
            Field::StringField(_) => Some(DataType::String),
            Field::DateTimeField(_) => Some(DataType::DateTime),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Field::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Field::BoolField(b) => Some(*b),
            Field::IntField(i) => Some(*i != 0),
            Field::LongField(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Field::IntField(i) => Some(*i as i64),
            Field::LongField(i) => Some(*i),
            Field::DecimalField(d) if d.fract().is_zero() => d.to_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Field::IntField(i) => Some(*i as f64),
            Field::LongField(i) => Some(*i as f64),
            Field::FloatField(x) => Some(*x as f64),
            Field::DoubleField(x) => Some(*x),
            Field::DecimalField(d) => d.to_f64(),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Field::IntField(i) => Some(Decimal::from(*i)),
            Field::LongField(i) => Some(Decimal::from(*i)),
            Field::FloatField(x) => Decimal::from_f64_retain(*x as f64),
            Field::DoubleField(x) => Decimal::from_f64_retain(*x),
            Field::DecimalField(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Field::StringField(s) => Some(s),
            _ => None,
        }
    }

    /// Converts the field to the given dtype. Null converts to null.
    ///
    /// # Arguments
    ///
    /// * `dtype` - Target dtype.
    pub fn cast(&self, dtype: DataType) -> Result<Field, OrmError> {
        if self.is_null() || self.dtype() == Some(dtype) {
            return Ok(self.clone());
        }
        let err = || {
            OrmError::InvalidOperation(format!("Cannot convert {} to {}", self, dtype))
        };
        Ok(match dtype {
            DataType::Bool => Field::BoolField(self.as_bool().ok_or_else(err)?),
            DataType::Int => {
                let v = self.as_i64().ok_or_else(err)?;
                Field::IntField(i32::try_from(v).map_err(|_| err())?)
            }
            DataType::Long => Field::LongField(self.as_i64().ok_or_else(err)?),
            DataType::Float => Field::FloatField(self.as_f64().ok_or_else(err)? as f32),
            DataType::Double => Field::DoubleField(self.as_f64().ok_or_else(err)?),
            DataType::Decimal => Field::DecimalField(self.as_decimal().ok_or_else(err)?),
            DataType::String => Field::StringField(self.to_string()),
            DataType::DateTime => match self {
                Field::StringField(s) => Field::parse(DataType::DateTime, s)?,
                _ => return Err(err()),
            },
        })
    }

    /// Parses text into a field of the given dtype. Empty text is null.
    ///
    /// # Arguments
    ///
    /// * `dtype` - Dtype of the resulting field.
    /// * `text` - Text to parse.
    pub fn parse(dtype: DataType, text: &str) -> Result<Field, OrmError> {
        let text = text.trim();
        if text.is_empty() || text.eq_ignore_ascii_case("null") {
            return Ok(Field::Null);
        }
        let err = |_| OrmError::ValidationError(format!("Cannot parse '{}' as {}", text, dtype));
        Ok(match dtype {
            DataType::Bool => Field::BoolField(text.parse::<bool>().map_err(|e| err(e.to_string()))?),
            DataType::Int => Field::IntField(text.parse::<i32>().map_err(|e| err(e.to_string()))?),
            DataType::Long => Field::LongField(text.parse::<i64>().map_err(|e| err(e.to_string()))?),
            DataType::Float => Field::FloatField(text.parse::<f32>().map_err(|e| err(e.to_string()))?),
            DataType::Double => {
                Field::DoubleField(text.parse::<f64>().map_err(|e| err(e.to_string()))?)
            }
            DataType::Decimal => {
                Field::DecimalField(Decimal::from_str(text).map_err(|e| err(e.to_string()))?)
            }
            DataType::String => Field::StringField(text.to_string()),
            DataType::DateTime => Field::DateTimeField(
                NaiveDateTime::parse_from_str(text, DATE_TIME_FORMAT)
                    .map_err(|e| err(e.to_string()))?,
            ),
        })
    }

    /// Compares two fields the way SQL does: `None` when either side is null
    /// or the values are not comparable. Numeric types compare across widths.
    pub fn sql_cmp(&self, other: &Field) -> Option<Ordering> {
        use Field::*;
        match (self, other) {
            (Null, _) | (_, Null) => None,
            (BoolField(a), BoolField(b)) => Some(a.cmp(b)),
            (StringField(a), StringField(b)) => Some(a.cmp(b)),
            (DateTimeField(a), DateTimeField(b)) => Some(a.cmp(b)),
            (a, b) => {
                let (ta, tb) = (a.dtype()?, b.dtype()?);
                match ta.promote(tb)? {
                    DataType::Int | DataType::Long => Some(a.as_i64()?.cmp(&b.as_i64()?)),
                    DataType::Decimal => Some(a.as_decimal()?.cmp(&b.as_decimal()?)),
                    _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
                }
            }
        }
    }
}

impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Field {}

impl PartialOrd for Field {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Total order used for sorting and hashing: null first, then by variant, floats by total order.
impl Ord for Field {
    fn cmp(&self, other: &Self) -> Ordering {
        use Field::*;
        match (self, other) {
            (BoolField(a), BoolField(b)) => a.cmp(b),
            (IntField(a), IntField(b)) => a.cmp(b),
            (LongField(a), LongField(b)) => a.cmp(b),
            (FloatField(a), FloatField(b)) => a.total_cmp(b),
            (DoubleField(a), DoubleField(b)) => a.total_cmp(b),
            (DecimalField(a), DecimalField(b)) => a.cmp(b),
            (StringField(a), StringField(b)) => a.cmp(b),
            (DateTimeField(a), DateTimeField(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl Hash for Field {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Field::Null => {}
            Field::BoolField(b) => b.hash(state),
            Field::IntField(i) => i.hash(state),
            Field::LongField(i) => i.hash(state),
            Field::FloatField(x) => x.to_bits().hash(state),
            Field::DoubleField(x) => x.to_bits().hash(state),
            Field::DecimalField(d) => d.hash(state),
            Field::StringField(s) => s.hash(state),
            Field::DateTimeField(d) => d.hash(state),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Null => write!(f, "null"),
            Field::BoolField(x) => write!(f, "{}", x),
            Field::IntField(x) => write!(f, "{}", x),
            Field::LongField(x) => write!(f, "{}", x),
            Field::FloatField(x) => write!(f, "{}", x),
            Field::DoubleField(x) => write!(f, "{}", x),
            Field::DecimalField(x) => write!(f, "{}", x),
            Field::StringField(x) => write!(f, "{}", x),
            Field::DateTimeField(x) => write!(f, "{}", x.format(DATE_TIME_FORMAT)),
        }
    }
}

/// Tuple type.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone, Hash, PartialOrd, Ord)]
pub struct Tuple {
    /// Tuple data.
    pub field_vals: Vec<Field>,
}

impl Tuple {
    /// Create a new tuple with the given data.
    ///
    /// # Arguments
    ///
    /// * `field_vals` - Field values of the tuple.
    pub fn new(field_vals: Vec<Field>) -> Self {
        Self { field_vals }
    }

    /// Get the field at index.
    ///
    /// # Arguments
    ///
    /// * `i` - Index of the field.
    pub fn get_field(&self, i: usize) -> Option<&Field> {
        self.field_vals.get(i)
    }

    /// Returns an iterator over the field values.
    pub fn field_vals(&self) -> impl Iterator<Item = &Field> {
        self.field_vals.iter()
    }

    /// Return the length of the tuple.
    pub fn size(&self) -> usize {
        self.field_vals.len()
    }

    /// Append another tuple with self.
    ///
    /// # Arguments
    ///
    /// * `other` - Other tuple to append.
    pub fn merge(&self, other: &Self) -> Self {
        let mut fields = self.field_vals.clone();
        fields.extend(other.field_vals.iter().cloned());
        Self::new(fields)
    }

    /// Tuple holding the fields at the given indexes, in that order.
    ///
    /// # Arguments
    ///
    /// * `indexes` - Indexes of the fields to keep.
    pub fn project(&self, indexes: &[usize]) -> Result<Self, OrmError> {
        let mut fields = Vec::with_capacity(indexes.len());
        for i in indexes {
            let field = self.field_vals.get(*i).ok_or_else(|| {
                OrmError::ValidationError(format!(
                    "Field index {} out of range for tuple of size {}",
                    i,
                    self.size()
                ))
            })?;
            fields.push(field.clone());
        }
        Ok(Self::new(fields))
    }

    /// Tuple of `width` nulls.
    pub fn nulls(width: usize) -> Self {
        Self::new(vec![Field::Null; width])
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut res = String::new();
        for field in &self.field_vals {
            res.push_str(&field.to_string());
            res.push('\t');
        }
        write!(f, "{}", res)
    }
}

pub use oracle::OracleTranslator;
pub use postgresql::PostgreSqlTranslator;
pub use sqlite::SqliteTranslator;
pub use sqlserver::SqlServerTranslator;
mod oracle;
mod postgresql;
mod sqlite;
mod sqlserver;

use chrono::NaiveDateTime;
use common::logical_plan::{BinaryOp, DatePart, ScalarFunction, SetOp};
use common::{DataType, OrmError};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DialectKind {
    SqlServer,
    PostgreSql,
    Oracle,
    Sqlite,
}

/// Major.minor server version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// How take and skip are spelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingStyle {
    /// `TOP (n)`; skipping is emulated with `ROW_NUMBER()`.
    Top,
    /// `LIMIT n OFFSET m`.
    LimitOffset,
    /// `OFFSET m ROWS FETCH NEXT n ROWS ONLY`.
    OffsetFetch,
    /// Emulated with `ROWNUM`.
    RowNum,
}

/// How a lateral join is spelled, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplySyntax {
    Unsupported,
    /// `CROSS APPLY` / `OUTER APPLY`.
    Apply,
    /// `CROSS JOIN LATERAL` / `LEFT JOIN LATERAL ... ON TRUE`.
    Lateral,
}

/// What a dialect version can express.
#[derive(Debug, Clone)]
pub struct DialectCapabilities {
    pub paging: PagingStyle,
    /// Whether `TOP` can be used for a take without skip.
    pub top_for_take: bool,
    /// Whether `OFFSET` requires an `ORDER BY`.
    pub offset_requires_order: bool,
    pub apply: ApplySyntax,
    pub full_outer_join: bool,
    /// Whether conditions can be used as values, e.g. `SELECT a = b`.
    pub bool_values: bool,
    /// Whether every select needs a FROM clause.
    pub requires_from: bool,
    pub identity_columns: bool,
    /// Whether index creation accepts a fill factor.
    pub fill_factor: bool,
    /// Whether a derived table alias is introduced with `AS`.
    pub table_alias_as: bool,
}

/// Spelling rules of one dialect version.
///
/// The compiler decides the structure of a statement; a translator only
/// decides how each piece of it is written.
pub trait SqlTranslator: Send + Sync {
    fn kind(&self) -> DialectKind;

    fn version(&self) -> Version;

    fn capabilities(&self) -> &DialectCapabilities;

    /// Human readable name, used in errors.
    fn name(&self) -> String {
        format!("{:?} {}", self.kind(), self.version())
    }

    fn not_supported(&self, construct: &str) -> OrmError {
        OrmError::not_supported(construct, self.name())
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn quote_string(&self, s: &str) -> String {
        format!("'{}'", s.replace('\'', "''"))
    }

    fn bool_literal(&self, b: bool) -> String {
        match (self.capabilities().bool_values, b) {
            (true, true) => String::from("TRUE"),
            (true, false) => String::from("FALSE"),
            (false, true) => String::from("1"),
            (false, false) => String::from("0"),
        }
    }

    /// Characters besides `%` and `_` that LIKE treats as wildcards.
    fn like_wildcards(&self) -> &'static [char] {
        &[]
    }

    /// LIKE pattern and escape character for this dialect.
    ///
    /// `pattern` uses `%` and `_` as its only wildcards and `escape` marks
    /// literal ones. Other dialect wildcards are escaped so that they match
    /// themselves.
    fn like_pattern(&self, pattern: &str, escape: Option<char>) -> (String, Option<char>) {
        escape_like_wildcards(pattern, escape, self.like_wildcards())
    }

    fn datetime_literal(&self, dt: &NaiveDateTime) -> String {
        format!(
            "TIMESTAMP '{}'",
            dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()
        )
    }

    /// Placeholder of the parameter at `position`, counting from zero.
    fn placeholder(&self, position: usize) -> String;

    /// Infix operator or function spelling of a binary operation over rendered operands.
    fn binary(&self, op: BinaryOp, left: &str, right: &str) -> String {
        default_binary(self, op, left, right)
    }

    /// Call of a scalar function over rendered arguments.
    fn function(&self, function: ScalarFunction, args: &[String]) -> Result<String, OrmError> {
        default_function(self, function, args)
    }

    fn date_part(&self, part: DatePart, operand: &str) -> String {
        format!("EXTRACT({} FROM {})", date_part_name(part), operand)
    }

    /// Type name used in casts.
    fn cast_type(&self, dtype: DataType) -> String;

    /// Type name used in column definitions.
    fn column_type(&self, dtype: DataType) -> String {
        self.cast_type(dtype)
    }

    /// Type and clauses of a column whose values are generated by the database.
    fn identity_column(&self, dtype: DataType) -> Result<String, OrmError>;

    /// Whether the identity column definition already declares the primary key.
    fn identity_includes_key(&self) -> bool {
        false
    }

    /// Storage parameters of an index with the given fill factor.
    fn index_storage(&self, fill_factor: u8) -> Option<String> {
        if self.capabilities().fill_factor {
            Some(format!("WITH (FILLFACTOR = {})", fill_factor))
        } else {
            None
        }
    }

    fn drop_index(&self, name: &str, _table: &str) -> String {
        format!("DROP INDEX {}", self.quote_identifier(name))
    }

    fn set_operator(&self, op: SetOp) -> &'static str {
        match op {
            SetOp::Union => "UNION",
            SetOp::Concat => "UNION ALL",
            SetOp::Except => "EXCEPT",
            SetOp::Intersect => "INTERSECT",
        }
    }
}

/// Standard SQL spelling of binary operations, shared by the translators.
pub(crate) fn default_binary<T: SqlTranslator + ?Sized>(
    _translator: &T,
    op: BinaryOp,
    left: &str,
    right: &str,
) -> String {
    let op_str = match op {
        BinaryOp::Add => "+",
        BinaryOp::Subtract => "-",
        BinaryOp::Multiply => "*",
        BinaryOp::Divide => "/",
        BinaryOp::Modulo => "%",
        BinaryOp::Concat => "||",
        BinaryOp::Equal => "=",
        BinaryOp::NotEqual => "<>",
        BinaryOp::Less => "<",
        BinaryOp::LessOrEqual => "<=",
        BinaryOp::Greater => ">",
        BinaryOp::GreaterOrEqual => ">=",
        BinaryOp::NullSafeEqual => {
            return format!(
                "(({l} = {r}) OR ({l} IS NULL AND {r} IS NULL))",
                l = left,
                r = right
            )
        }
        BinaryOp::And => "AND",
        BinaryOp::Or => "OR",
    };
    format!("({} {} {})", left, op_str, right)
}

/// Escapes every character of `wildcards` in `pattern`.
///
/// Text already escaped with `escape` is kept. Without an escape character a
/// backslash is introduced, and literal backslashes are escaped as well.
pub(crate) fn escape_like_wildcards(
    pattern: &str,
    escape: Option<char>,
    wildcards: &[char],
) -> (String, Option<char>) {
    if !pattern.contains(|c: char| wildcards.contains(&c)) {
        return (pattern.to_string(), escape);
    }
    let esc = escape.unwrap_or('\\');
    let mut res = String::with_capacity(pattern.len() + 4);
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if escape == Some(c) {
            res.push(c);
            if let Some(next) = chars.next() {
                res.push(next);
            }
            continue;
        }
        if wildcards.contains(&c) || (escape.is_none() && c == esc) {
            res.push(esc);
        }
        res.push(c);
    }
    (res, Some(esc))
}

/// Standard SQL spelling of scalar functions, shared by the translators.
pub(crate) fn default_function<T: SqlTranslator + ?Sized>(
    translator: &T,
    function: ScalarFunction,
    args: &[String],
) -> Result<String, OrmError> {
    let arg = |i: usize| {
        args.get(i)
            .cloned()
            .ok_or_else(|| OrmError::translation("Missing function argument", function))
    };
    Ok(match function {
        ScalarFunction::Upper => format!("UPPER({})", arg(0)?),
        ScalarFunction::Lower => format!("LOWER({})", arg(0)?),
        ScalarFunction::Length => format!("LENGTH({})", arg(0)?),
        ScalarFunction::Trim => format!("TRIM({})", arg(0)?),
        ScalarFunction::TrimStart => format!("LTRIM({})", arg(0)?),
        ScalarFunction::TrimEnd => format!("RTRIM({})", arg(0)?),
        ScalarFunction::Substring => {
            format!("SUBSTR({}, ({}) + 1, {})", arg(0)?, arg(1)?, arg(2)?)
        }
        ScalarFunction::Abs => format!("ABS({})", arg(0)?),
        ScalarFunction::Round => format!("ROUND({}, 0)", arg(0)?),
        ScalarFunction::Coalesce => format!("COALESCE({})", args.join(", ")),
        ScalarFunction::CurrentDate => String::from("CURRENT_DATE"),
        ScalarFunction::CurrentTimestamp => String::from("CURRENT_TIMESTAMP"),
        ScalarFunction::DatePart(part) => translator.date_part(part, &arg(0)?),
    })
}

pub(crate) fn date_part_name(part: DatePart) -> &'static str {
    match part {
        DatePart::Year => "YEAR",
        DatePart::Month => "MONTH",
        DatePart::Day => "DAY",
        DatePart::Hour => "HOUR",
        DatePart::Minute => "MINUTE",
        DatePart::Second => "SECOND",
    }
}

/// The supported dialect versions.
pub const SUPPORTED: [(DialectKind, Version); 8] = [
    (DialectKind::SqlServer, Version::new(9, 0)),
    (DialectKind::SqlServer, Version::new(10, 0)),
    (DialectKind::SqlServer, Version::new(11, 0)),
    (DialectKind::PostgreSql, Version::new(8, 3)),
    (DialectKind::PostgreSql, Version::new(9, 4)),
    (DialectKind::Oracle, Version::new(9, 0)),
    (DialectKind::Oracle, Version::new(12, 0)),
    (DialectKind::Sqlite, Version::new(3, 0)),
];

/// Translator for a dialect version.
///
/// The newest supported version not above `version` is used.
///
/// # Arguments
///
/// * `kind` - Dialect.
/// * `version` - Server version.
pub fn translator_for(
    kind: DialectKind,
    version: Version,
) -> Result<Arc<dyn SqlTranslator>, OrmError> {
    let chosen = SUPPORTED
        .iter()
        .filter(|(k, v)| *k == kind && *v <= version)
        .map(|(_, v)| *v)
        .max()
        .ok_or_else(|| OrmError::not_supported(format!("{:?} {}", kind, version), "registry"))?;
    debug!("Using {:?} {} translator for {}", kind, chosen, version);
    Ok(match kind {
        DialectKind::SqlServer => Arc::new(SqlServerTranslator::new(chosen)),
        DialectKind::PostgreSql => Arc::new(PostgreSqlTranslator::new(chosen)),
        DialectKind::Oracle => Arc::new(OracleTranslator::new(chosen)),
        DialectKind::Sqlite => Arc::new(SqliteTranslator::new(chosen)),
    })
}

/// Translator from a name such as `postgresql-9.4`, `sqlserver-10` or `sqlite`.
pub fn translator_from_name(name: &str) -> Result<Arc<dyn SqlTranslator>, OrmError> {
    let lower = name.to_lowercase();
    let (kind_str, version_str) = match lower.find('-') {
        Some(i) => (&lower[..i], Some(&lower[i + 1..])),
        None => (lower.as_str(), None),
    };
    let kind = match kind_str {
        "sqlserver" | "mssql" => DialectKind::SqlServer,
        "postgresql" | "postgres" | "pg" => DialectKind::PostgreSql,
        "oracle" => DialectKind::Oracle,
        "sqlite" => DialectKind::Sqlite,
        _ => return Err(OrmError::not_supported(name, "registry")),
    };
    let version = match version_str {
        None => Version::new(u32::MAX, 0),
        Some(v) => {
            let mut parts = v.split('.');
            let parse = |s: Option<&str>| -> Result<u32, OrmError> {
                match s {
                    None => Ok(0),
                    Some(s) => s.parse::<u32>().map_err(|_| {
                        OrmError::ValidationError(format!("Invalid dialect version {}", v))
                    }),
                }
            };
            let major = parse(parts.next())?;
            let minor = parse(parts.next())?;
            Version::new(major, minor)
        }
    };
    translator_for(kind, version)
}

use super::*;

/// SQLite 3.
pub struct SqliteTranslator {
    version: Version,
    capabilities: DialectCapabilities,
}

impl SqliteTranslator {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            capabilities: DialectCapabilities {
                paging: PagingStyle::LimitOffset,
                top_for_take: false,
                offset_requires_order: false,
                apply: ApplySyntax::Unsupported,
                full_outer_join: false,
                bool_values: true,
                requires_from: false,
                identity_columns: true,
                fill_factor: false,
                table_alias_as: true,
            },
        }
    }
}

impl SqlTranslator for SqliteTranslator {
    fn kind(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    fn version(&self) -> Version {
        self.version
    }

    fn capabilities(&self) -> &DialectCapabilities {
        &self.capabilities
    }

    fn bool_literal(&self, b: bool) -> String {
        String::from(if b { "1" } else { "0" })
    }

    fn datetime_literal(&self, dt: &NaiveDateTime) -> String {
        format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S%.3f"))
    }

    fn placeholder(&self, _position: usize) -> String {
        String::from("?")
    }

    fn binary(&self, op: BinaryOp, left: &str, right: &str) -> String {
        match op {
            BinaryOp::NullSafeEqual => format!("({} IS {})", left, right),
            _ => default_binary(self, op, left, right),
        }
    }

    fn function(&self, function: ScalarFunction, args: &[String]) -> Result<String, OrmError> {
        match function {
            ScalarFunction::CurrentDate => Ok(String::from("date('now')")),
            ScalarFunction::CurrentTimestamp => Ok(String::from("datetime('now')")),
            _ => default_function(self, function, args),
        }
    }

    fn date_part(&self, part: DatePart, operand: &str) -> String {
        let format = match part {
            DatePart::Year => "%Y",
            DatePart::Month => "%m",
            DatePart::Day => "%d",
            DatePart::Hour => "%H",
            DatePart::Minute => "%M",
            DatePart::Second => "%S",
        };
        format!("CAST(strftime('{}', {}) AS INTEGER)", format, operand)
    }

    fn cast_type(&self, dtype: DataType) -> String {
        String::from(match dtype {
            DataType::Bool | DataType::Int | DataType::Long => "INTEGER",
            DataType::Float | DataType::Double => "REAL",
            DataType::Decimal => "NUMERIC",
            DataType::String | DataType::DateTime => "TEXT",
        })
    }

    fn identity_column(&self, dtype: DataType) -> Result<String, OrmError> {
        if dtype.is_integral() {
            Ok(String::from("INTEGER PRIMARY KEY AUTOINCREMENT"))
        } else {
            Err(self.not_supported(&format!("{} identity column", dtype)))
        }
    }

    fn identity_includes_key(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sqlite_spelling() {
        let t = SqliteTranslator::new(Version::new(3, 0));
        assert!(!t.capabilities().full_outer_join);
        assert_eq!(t.placeholder(7), "?");
        assert_eq!(t.binary(BinaryOp::NullSafeEqual, "a", "b"), "(a IS b)");
        assert_eq!(t.index_storage(80), None);
        assert_eq!(
            t.date_part(DatePart::Year, "x"),
            "CAST(strftime('%Y', x) AS INTEGER)"
        );
    }
}

use super::*;

/// PostgreSQL 8.3 and 9.4.
pub struct PostgreSqlTranslator {
    version: Version,
    capabilities: DialectCapabilities,
}

impl PostgreSqlTranslator {
    pub fn new(version: Version) -> Self {
        let lateral = version >= Version::new(9, 3);
        Self {
            version,
            capabilities: DialectCapabilities {
                paging: PagingStyle::LimitOffset,
                top_for_take: false,
                offset_requires_order: false,
                apply: if lateral {
                    ApplySyntax::Lateral
                } else {
                    ApplySyntax::Unsupported
                },
                full_outer_join: true,
                bool_values: true,
                requires_from: false,
                identity_columns: true,
                fill_factor: true,
                table_alias_as: true,
            },
        }
    }

    /// Before 9.1 backslashes in plain literals are escapes.
    fn standard_strings(&self) -> bool {
        self.version >= Version::new(9, 1)
    }
}

impl SqlTranslator for PostgreSqlTranslator {
    fn kind(&self) -> DialectKind {
        DialectKind::PostgreSql
    }

    fn version(&self) -> Version {
        self.version
    }

    fn capabilities(&self) -> &DialectCapabilities {
        &self.capabilities
    }

    fn quote_string(&self, s: &str) -> String {
        let escaped = s.replace('\'', "''");
        if !self.standard_strings() && s.contains('\\') {
            format!("E'{}'", escaped.replace('\\', "\\\\"))
        } else {
            format!("'{}'", escaped)
        }
    }

    fn placeholder(&self, position: usize) -> String {
        format!("${}", position + 1)
    }

    fn binary(&self, op: BinaryOp, left: &str, right: &str) -> String {
        match op {
            BinaryOp::NullSafeEqual => format!("({} IS NOT DISTINCT FROM {})", left, right),
            _ => default_binary(self, op, left, right),
        }
    }

    fn function(&self, function: ScalarFunction, args: &[String]) -> Result<String, OrmError> {
        match (function, args.get(0)) {
            (ScalarFunction::Length, Some(a)) => Ok(format!("char_length({})", a)),
            (ScalarFunction::CurrentTimestamp, _) => Ok(String::from("LOCALTIMESTAMP")),
            _ => default_function(self, function, args),
        }
    }

    fn date_part(&self, part: DatePart, operand: &str) -> String {
        format!(
            "CAST(EXTRACT({} FROM {}) AS integer)",
            date_part_name(part),
            operand
        )
    }

    fn cast_type(&self, dtype: DataType) -> String {
        String::from(match dtype {
            DataType::Bool => "boolean",
            DataType::Int => "integer",
            DataType::Long => "bigint",
            DataType::Float => "real",
            DataType::Double => "double precision",
            DataType::Decimal => "numeric(28, 10)",
            DataType::String => "varchar",
            DataType::DateTime => "timestamp",
        })
    }

    fn identity_column(&self, dtype: DataType) -> Result<String, OrmError> {
        match dtype {
            DataType::Int => Ok(String::from("serial")),
            DataType::Long => Ok(String::from("bigserial")),
            other => Err(self.not_supported(&format!("{} identity column", other))),
        }
    }
}

use super::*;

/// Oracle 9i and 12c.
pub struct OracleTranslator {
    version: Version,
    capabilities: DialectCapabilities,
}

impl OracleTranslator {
    pub fn new(version: Version) -> Self {
        let modern = version >= Version::new(12, 0);
        Self {
            version,
            capabilities: DialectCapabilities {
                paging: if modern {
                    PagingStyle::OffsetFetch
                } else {
                    PagingStyle::RowNum
                },
                top_for_take: false,
                offset_requires_order: false,
                apply: if modern {
                    ApplySyntax::Apply
                } else {
                    ApplySyntax::Unsupported
                },
                full_outer_join: true,
                bool_values: false,
                requires_from: true,
                identity_columns: modern,
                fill_factor: true,
                table_alias_as: false,
            },
        }
    }
}

impl SqlTranslator for OracleTranslator {
    fn kind(&self) -> DialectKind {
        DialectKind::Oracle
    }

    fn version(&self) -> Version {
        self.version
    }

    fn capabilities(&self) -> &DialectCapabilities {
        &self.capabilities
    }

    fn datetime_literal(&self, dt: &NaiveDateTime) -> String {
        format!(
            "TO_TIMESTAMP('{}', 'YYYY-MM-DD HH24:MI:SS.FF')",
            dt.format("%Y-%m-%d %H:%M:%S%.6f")
        )
    }

    fn placeholder(&self, position: usize) -> String {
        format!(":p{}", position)
    }

    fn binary(&self, op: BinaryOp, left: &str, right: &str) -> String {
        match op {
            BinaryOp::Modulo => format!("MOD({}, {})", left, right),
            _ => default_binary(self, op, left, right),
        }
    }

    fn function(&self, function: ScalarFunction, args: &[String]) -> Result<String, OrmError> {
        match function {
            ScalarFunction::CurrentDate => Ok(String::from("TRUNC(SYSDATE)")),
            ScalarFunction::CurrentTimestamp => Ok(String::from("LOCALTIMESTAMP")),
            _ => default_function(self, function, args),
        }
    }

    fn cast_type(&self, dtype: DataType) -> String {
        String::from(match dtype {
            DataType::Bool => "NUMBER(1)",
            DataType::Int => "NUMBER(10)",
            DataType::Long => "NUMBER(20)",
            DataType::Float => "BINARY_FLOAT",
            DataType::Double => "BINARY_DOUBLE",
            DataType::Decimal => "NUMBER(28, 10)",
            DataType::String => "NVARCHAR2(2000)",
            DataType::DateTime => "TIMESTAMP",
        })
    }

    fn identity_column(&self, dtype: DataType) -> Result<String, OrmError> {
        if !self.capabilities.identity_columns {
            return Err(self.not_supported("identity column"));
        }
        if !dtype.is_integral() {
            return Err(self.not_supported(&format!("{} identity column", dtype)));
        }
        Ok(format!(
            "{} GENERATED BY DEFAULT AS IDENTITY",
            self.column_type(dtype)
        ))
    }

    /// Oracle reserves free space per block instead of filling it.
    fn index_storage(&self, fill_factor: u8) -> Option<String> {
        Some(format!("PCTFREE {}", 100 - fill_factor.min(100)))
    }

    fn set_operator(&self, op: SetOp) -> &'static str {
        match op {
            SetOp::Except => "MINUS",
            SetOp::Union => "UNION",
            SetOp::Concat => "UNION ALL",
            SetOp::Intersect => "INTERSECT",
        }
    }
}

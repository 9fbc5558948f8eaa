use super::*;

/// Microsoft SQL Server 2005 (9.0), 2008 (10.0) and 2012 (11.0).
pub struct SqlServerTranslator {
    version: Version,
    capabilities: DialectCapabilities,
}

impl SqlServerTranslator {
    pub fn new(version: Version) -> Self {
        let offset_fetch = version >= Version::new(11, 0);
        Self {
            version,
            capabilities: DialectCapabilities {
                paging: if offset_fetch {
                    PagingStyle::OffsetFetch
                } else {
                    PagingStyle::Top
                },
                top_for_take: true,
                offset_requires_order: true,
                apply: ApplySyntax::Apply,
                full_outer_join: true,
                bool_values: false,
                requires_from: false,
                identity_columns: true,
                fill_factor: true,
                table_alias_as: true,
            },
        }
    }

    /// datetime2 and date arrived with 2008.
    fn has_datetime2(&self) -> bool {
        self.version >= Version::new(10, 0)
    }
}

impl SqlTranslator for SqlServerTranslator {
    fn kind(&self) -> DialectKind {
        DialectKind::SqlServer
    }

    fn version(&self) -> Version {
        self.version
    }

    fn capabilities(&self) -> &DialectCapabilities {
        &self.capabilities
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("[{}]", name.replace(']', "]]"))
    }

    fn quote_string(&self, s: &str) -> String {
        format!("N'{}'", s.replace('\'', "''"))
    }

    /// `[` opens a character class.
    fn like_wildcards(&self) -> &'static [char] {
        &['[']
    }

    fn datetime_literal(&self, dt: &NaiveDateTime) -> String {
        format!(
            "CAST('{}' AS {})",
            dt.format("%Y-%m-%dT%H:%M:%S%.3f"),
            self.cast_type(DataType::DateTime)
        )
    }

    fn placeholder(&self, position: usize) -> String {
        format!("@p{}", position)
    }

    fn binary(&self, op: BinaryOp, left: &str, right: &str) -> String {
        match op {
            BinaryOp::Concat => format!("({} + {})", left, right),
            _ => default_binary(self, op, left, right),
        }
    }

    fn function(&self, function: ScalarFunction, args: &[String]) -> Result<String, OrmError> {
        let first = || {
            args.get(0)
                .cloned()
                .ok_or_else(|| OrmError::translation("Missing function argument", function))
        };
        Ok(match function {
            ScalarFunction::Length => format!("LEN({})", first()?),
            ScalarFunction::Trim => format!("LTRIM(RTRIM({}))", first()?),
            ScalarFunction::Substring => match args {
                [s, start, len] => format!("SUBSTRING({}, ({}) + 1, {})", s, start, len),
                _ => return Err(OrmError::translation("Wrong argument count", function)),
            },
            ScalarFunction::CurrentDate if self.has_datetime2() => {
                String::from("CAST(GETDATE() AS date)")
            }
            ScalarFunction::CurrentDate => String::from("DATEADD(dd, DATEDIFF(dd, 0, GETDATE()), 0)"),
            ScalarFunction::CurrentTimestamp => String::from("GETDATE()"),
            _ => default_function(self, function, args)?,
        })
    }

    fn date_part(&self, part: DatePart, operand: &str) -> String {
        format!("DATEPART({}, {})", date_part_name(part).to_lowercase(), operand)
    }

    fn cast_type(&self, dtype: DataType) -> String {
        String::from(match dtype {
            DataType::Bool => "bit",
            DataType::Int => "int",
            DataType::Long => "bigint",
            DataType::Float => "real",
            DataType::Double => "float",
            DataType::Decimal => "decimal(28, 10)",
            DataType::String => "nvarchar(max)",
            DataType::DateTime if self.has_datetime2() => "datetime2",
            DataType::DateTime => "datetime",
        })
    }

    fn identity_column(&self, dtype: DataType) -> Result<String, OrmError> {
        if dtype.is_integral() {
            Ok(format!("{} IDENTITY(1, 1)", self.column_type(dtype)))
        } else {
            Err(self.not_supported(&format!("{} identity column", dtype)))
        }
    }

    fn drop_index(&self, name: &str, table: &str) -> String {
        format!(
            "DROP INDEX {} ON {}",
            self.quote_identifier(name),
            self.quote_identifier(table)
        )
    }
}

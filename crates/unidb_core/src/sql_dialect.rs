use serde::{Deserialize, Serialize};

/// Placeholder style for parameterized queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `$1`, `$2`, … (PostgreSQL).
    DollarNumber,
    /// `?` (MySQL, SQLite).
    QuestionMark,
    /// `@p1`, `@p2`, … (MSSQL).
    AtNumber,
}

/// SQL dialect targeted by the translator and builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    Postgres,
    Mysql,
    Mssql,
    Sqlite,
}

impl SqlDialect {
    pub fn placeholder_style(self) -> PlaceholderStyle {
        match self {
            Self::Postgres => PlaceholderStyle::DollarNumber,
            Self::Mysql | Self::Sqlite => PlaceholderStyle::QuestionMark,
            Self::Mssql => PlaceholderStyle::AtNumber,
        }
    }

    /// Render the placeholder for 1-based parameter position `n`.
    pub fn placeholder(self, n: usize) -> String {
        match self.placeholder_style() {
            PlaceholderStyle::DollarNumber => format!("${}", n),
            PlaceholderStyle::QuestionMark => "?".to_string(),
            PlaceholderStyle::AtNumber => format!("@p{}", n),
        }
    }

    /// Quote an identifier (table/column name).
    ///
    /// Identifiers are always double-quoted with internal double quotes
    /// escaped; MySQL connections are expected to run with ANSI_QUOTES.
    pub fn quote_identifier(self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Expression yielding the length of a JSON array stored in `column`.
    ///
    /// `column` must already be quoted.
    pub fn json_array_length(self, column: &str) -> String {
        match self {
            Self::Postgres | Self::Sqlite => format!("json_array_length({})", column),
            Self::Mysql => format!("JSON_LENGTH({})", column),
            Self::Mssql => format!("(SELECT COUNT(*) FROM OPENJSON({}))", column),
        }
    }

    /// Whether the dialect has a native regular-expression operator.
    ///
    /// MSSQL and SQLite fall back to `LIKE` with wildcard rewriting.
    pub fn supports_regex(self) -> bool {
        matches!(self, Self::Postgres | Self::Mysql)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
            Self::Mssql => "mssql",
            Self::Sqlite => "sqlite",
        }
    }
}

impl std::fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_per_dialect() {
        assert_eq!(SqlDialect::Postgres.placeholder(3), "$3");
        assert_eq!(SqlDialect::Mysql.placeholder(3), "?");
        assert_eq!(SqlDialect::Sqlite.placeholder(1), "?");
        assert_eq!(SqlDialect::Mssql.placeholder(2), "@p2");
    }

    #[test]
    fn quoting_escapes_embedded_quotes() {
        assert_eq!(SqlDialect::Postgres.quote_identifier("users"), "\"users\"");
        assert_eq!(
            SqlDialect::Mssql.quote_identifier("odd\"name"),
            "\"odd\"\"name\""
        );
    }

    #[test]
    fn json_array_length_per_dialect() {
        assert_eq!(
            SqlDialect::Postgres.json_array_length("\"tags\""),
            "json_array_length(\"tags\")"
        );
        assert_eq!(
            SqlDialect::Mysql.json_array_length("\"tags\""),
            "JSON_LENGTH(\"tags\")"
        );
        assert_eq!(
            SqlDialect::Mssql.json_array_length("\"tags\""),
            "(SELECT COUNT(*) FROM OPENJSON(\"tags\"))"
        );
    }
}

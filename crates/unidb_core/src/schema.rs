use serde_json::{Value, json};

use crate::options::SortOrder;
use crate::sql_dialect::SqlDialect;

/// Logical field type with modifiers, declared per collection.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    String {
        max_len: Option<u32>,
        /// Enumerated values; `Some` makes the field an enum.
        allowed: Option<Vec<String>>,
    },
    Number {
        integer: bool,
    },
    Boolean,
    Date,
    Array(Box<FieldKind>),
    Object(Vec<FieldSpec>),
}

impl FieldKind {
    pub fn string() -> Self {
        Self::String {
            max_len: None,
            allowed: None,
        }
    }

    pub fn string_max(max_len: u32) -> Self {
        Self::String {
            max_len: Some(max_len),
            allowed: None,
        }
    }

    pub fn enumeration(values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::String {
            max_len: None,
            allowed: Some(values.into_iter().map(Into::into).collect()),
        }
    }

    pub fn integer() -> Self {
        Self::Number { integer: true }
    }

    pub fn real() -> Self {
        Self::Number { integer: false }
    }

    pub fn array_of(inner: FieldKind) -> Self {
        Self::Array(Box::new(inner))
    }

    pub fn object_of(fields: Vec<FieldSpec>) -> Self {
        Self::Object(fields)
    }

    /// Human-readable type name used in `describe` and validation output.
    pub fn type_name(&self) -> String {
        match self {
            Self::String { allowed: Some(_), .. } => "enum".to_string(),
            Self::String { .. } => "string".to_string(),
            Self::Number { integer: true } => "integer".to_string(),
            Self::Number { integer: false } => "number".to_string(),
            Self::Boolean => "boolean".to_string(),
            Self::Date => "date".to_string(),
            Self::Array(inner) => format!("array<{}>", inner.type_name()),
            Self::Object(_) => "object".to_string(),
        }
    }
}

/// A declared field: name, logical type, required flag.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Declared typing for one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSchema {
    pub fields: Vec<FieldSpec>,
}

/// One row of dry-run validation output.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
    pub expected: String,
    pub received: String,
}

impl CollectionSchema {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    /// Top-level field whitelist.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// A working starting-point filter composed from the first two fields:
    /// equality for string/enum, `$gte: 0` for numbers, `true` for booleans.
    pub fn example_filter(&self) -> Value {
        let mut filter = serde_json::Map::new();
        for spec in self.fields.iter() {
            if filter.len() == 2 {
                break;
            }
            match &spec.kind {
                FieldKind::String { allowed: Some(values), .. } => {
                    let example = values.first().cloned().unwrap_or_default();
                    filter.insert(spec.name.clone(), Value::String(example));
                }
                FieldKind::String { .. } => {
                    filter.insert(spec.name.clone(), Value::String("example".to_string()));
                }
                FieldKind::Number { .. } => {
                    filter.insert(spec.name.clone(), json!({"$gte": 0}));
                }
                FieldKind::Boolean => {
                    filter.insert(spec.name.clone(), Value::Bool(true));
                }
                FieldKind::Date | FieldKind::Array(_) | FieldKind::Object(_) => {}
            }
        }
        Value::Object(filter)
    }

    /// `CREATE TABLE IF NOT EXISTS` DDL for a relational backend.
    pub fn ddl(&self, table: &str, dialect: SqlDialect) -> String {
        let columns = self
            .fields
            .iter()
            .map(|spec| {
                let mut column = format!(
                    "{} {}",
                    dialect.quote_identifier(&spec.name),
                    sql_type(&spec.kind, dialect)
                );
                if spec.required {
                    column.push_str(" NOT NULL");
                }
                column
            })
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            dialect.quote_identifier(table),
            columns
        )
    }

    /// Search-engine index mappings derived from the declared fields.
    pub fn search_mappings(&self) -> Value {
        json!({"properties": properties(&self.fields)})
    }

    /// Dry-run a document against the declared schema.
    pub fn validate_document(&self, doc: &serde_json::Map<String, Value>) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        validate_fields(&self.fields, doc, "", &mut issues);
        issues
    }
}

fn validate_fields(
    fields: &[FieldSpec],
    doc: &serde_json::Map<String, Value>,
    prefix: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    for spec in fields {
        let path = if prefix.is_empty() {
            spec.name.clone()
        } else {
            format!("{}.{}", prefix, spec.name)
        };
        match doc.get(&spec.name) {
            None => {
                if spec.required {
                    issues.push(ValidationIssue {
                        field: path,
                        message: "required field is missing".to_string(),
                        expected: spec.kind.type_name(),
                        received: "nothing".to_string(),
                    });
                }
            }
            Some(value) => validate_value(&spec.kind, value, &path, issues),
        }
    }

    for key in doc.keys() {
        if !fields.iter().any(|f| &f.name == key) {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", prefix, key)
            };
            issues.push(ValidationIssue {
                field: path,
                message: "field is not declared in the schema".to_string(),
                expected: "a declared field".to_string(),
                received: received_name(doc.get(key).unwrap()),
            });
        }
    }
}

fn validate_value(kind: &FieldKind, value: &Value, path: &str, issues: &mut Vec<ValidationIssue>) {
    match kind {
        FieldKind::String { max_len, allowed } => match value.as_str() {
            Some(s) => {
                if let Some(max) = max_len {
                    if s.chars().count() > *max as usize {
                        issues.push(ValidationIssue {
                            field: path.to_string(),
                            message: format!("string exceeds the maximum length of {}", max),
                            expected: format!("at most {} characters", max),
                            received: format!("{} characters", s.chars().count()),
                        });
                    }
                }
                if let Some(values) = allowed {
                    if !values.iter().any(|v| v == s) {
                        issues.push(ValidationIssue {
                            field: path.to_string(),
                            message: "value is not one of the enumerated options".to_string(),
                            expected: format!("one of: {}", values.join(", ")),
                            received: s.to_string(),
                        });
                    }
                }
            }
            None => issues.push(type_issue(path, "string", value)),
        },
        FieldKind::Number { integer } => match value.as_f64() {
            Some(_) if !integer => {}
            Some(_) => {
                if value.as_i64().is_none() && value.as_u64().is_none() {
                    issues.push(type_issue(path, "integer", value));
                }
            }
            None => issues.push(type_issue(path, "number", value)),
        },
        FieldKind::Boolean => {
            if !value.is_boolean() {
                issues.push(type_issue(path, "boolean", value));
            }
        }
        FieldKind::Date => match value.as_str() {
            Some(s) if chrono::DateTime::parse_from_rfc3339(s).is_ok() => {}
            _ => issues.push(type_issue(path, "RFC 3339 date string", value)),
        },
        FieldKind::Array(inner) => match value.as_array() {
            Some(items) => {
                for (i, item) in items.iter().enumerate() {
                    validate_value(inner, item, &format!("{}[{}]", path, i), issues);
                }
            }
            None => issues.push(type_issue(path, "array", value)),
        },
        FieldKind::Object(fields) => match value.as_object() {
            Some(nested) => validate_fields(fields, nested, path, issues),
            None => issues.push(type_issue(path, "object", value)),
        },
    }
}

fn type_issue(path: &str, expected: &str, value: &Value) -> ValidationIssue {
    ValidationIssue {
        field: path.to_string(),
        message: format!("expected {}", expected),
        expected: expected.to_string(),
        received: received_name(value),
    }
}

fn received_name(value: &Value) -> String {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
    .to_string()
}

fn sql_type(kind: &FieldKind, dialect: SqlDialect) -> String {
    match kind {
        FieldKind::String { max_len: Some(n), .. } => match dialect {
            SqlDialect::Mssql => format!("NVARCHAR({})", n),
            _ => format!("VARCHAR({})", n),
        },
        FieldKind::String { .. } => match dialect {
            SqlDialect::Mssql => "NVARCHAR(MAX)".to_string(),
            _ => "TEXT".to_string(),
        },
        FieldKind::Number { integer: true } => "BIGINT".to_string(),
        FieldKind::Number { integer: false } => match dialect {
            SqlDialect::Postgres => "DOUBLE PRECISION".to_string(),
            SqlDialect::Mysql => "DOUBLE".to_string(),
            SqlDialect::Mssql => "FLOAT".to_string(),
            SqlDialect::Sqlite => "REAL".to_string(),
        },
        FieldKind::Boolean => match dialect {
            SqlDialect::Mssql => "BIT".to_string(),
            SqlDialect::Sqlite => "INTEGER".to_string(),
            _ => "BOOLEAN".to_string(),
        },
        FieldKind::Date => match dialect {
            SqlDialect::Postgres => "TIMESTAMPTZ".to_string(),
            SqlDialect::Mysql => "DATETIME".to_string(),
            SqlDialect::Mssql => "DATETIME2".to_string(),
            SqlDialect::Sqlite => "TEXT".to_string(),
        },
        FieldKind::Array(_) | FieldKind::Object(_) => match dialect {
            SqlDialect::Postgres => "JSONB".to_string(),
            SqlDialect::Mysql => "JSON".to_string(),
            SqlDialect::Mssql => "NVARCHAR(MAX)".to_string(),
            SqlDialect::Sqlite => "TEXT".to_string(),
        },
    }
}

fn properties(fields: &[FieldSpec]) -> Value {
    let mut props = serde_json::Map::new();
    for spec in fields {
        props.insert(spec.name.clone(), mapping(&spec.kind));
    }
    Value::Object(props)
}

fn mapping(kind: &FieldKind) -> Value {
    match kind {
        FieldKind::String { allowed: Some(_), .. } => json!({"type": "keyword"}),
        FieldKind::String { .. } => json!({
            "type": "text",
            "fields": {"keyword": {"type": "keyword", "ignore_above": 256}},
        }),
        FieldKind::Number { integer: true } => json!({"type": "long"}),
        FieldKind::Number { integer: false } => json!({"type": "double"}),
        FieldKind::Boolean => json!({"type": "boolean"}),
        FieldKind::Date => json!({"type": "date"}),
        // Arrays are implicit in the search engine's mapping model.
        FieldKind::Array(inner) => mapping(inner),
        FieldKind::Object(fields) => json!({"properties": properties(fields)}),
    }
}

/// Declared secondary index for a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub name: String,
    pub fields: Vec<(String, SortOrder)>,
    pub unique: bool,
}

impl IndexSpec {
    pub fn new(name: impl Into<String>, fields: Vec<(String, SortOrder)>) -> Self {
        Self {
            name: name.into(),
            fields,
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// `CREATE INDEX` DDL for a relational backend.
    ///
    /// MySQL and MSSQL have no `IF NOT EXISTS` form; re-creation errors are
    /// normalized by the error mapper.
    pub fn ddl(&self, table: &str, dialect: SqlDialect) -> String {
        let unique = if self.unique { "UNIQUE " } else { "" };
        let if_not_exists = match dialect {
            SqlDialect::Postgres | SqlDialect::Sqlite => "IF NOT EXISTS ",
            SqlDialect::Mysql | SqlDialect::Mssql => "",
        };
        let columns = self
            .fields
            .iter()
            .map(|(field, order)| {
                format!("{} {}", dialect.quote_identifier(field), order.sql_keyword())
            })
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "CREATE {}INDEX {}{} ON {} ({})",
            unique,
            if_not_exists,
            dialect.quote_identifier(&self.name),
            dialect.quote_identifier(table),
            columns
        )
    }

    /// Document-store index key specification.
    pub fn to_key_document(&self) -> Value {
        let mut keys = serde_json::Map::new();
        for (field, order) in &self.fields {
            let direction = match order {
                SortOrder::Ascending => 1,
                SortOrder::Descending => -1,
            };
            keys.insert(field.clone(), Value::from(direction));
        }
        Value::Object(keys)
    }
}

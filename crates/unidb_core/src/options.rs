use serde_json::Value;

use crate::error::DbError;

/// Sort direction; parses from `±1` or `"asc"`/`"desc"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn parse(value: &Value) -> Result<Self, DbError> {
        match value {
            Value::Number(n) if n.as_i64() == Some(1) => Ok(Self::Ascending),
            Value::Number(n) if n.as_i64() == Some(-1) => Ok(Self::Descending),
            Value::String(s) if s.eq_ignore_ascii_case("asc") => Ok(Self::Ascending),
            Value::String(s) if s.eq_ignore_ascii_case("desc") => Ok(Self::Descending),
            other => Err(DbError::query_error(
                format!("Invalid sort direction {}.", other),
                "Use 1 or \"asc\" for ascending, -1 or \"desc\" for descending.",
            )),
        }
    }

    pub fn sql_keyword(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }

    pub fn search_keyword(self) -> &'static str {
        match self {
            Self::Ascending => "asc",
            Self::Descending => "desc",
        }
    }
}

/// Projection: inclusion-only or exclusion-only, never mixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    entries: Vec<(String, bool)>,
}

impl Projection {
    pub fn parse(value: &Value) -> Result<Self, DbError> {
        let obj = value.as_object().ok_or_else(|| {
            DbError::query_error(
                "Projection must be a JSON object.",
                "Write {\"name\": 1, \"email\": 1} to include or {\"secret\": 0} to exclude.",
            )
        })?;

        let mut entries = Vec::with_capacity(obj.len());
        for (field, flag) in obj {
            let include = match flag {
                Value::Number(n) if n.as_i64() == Some(1) => true,
                Value::Number(n) if n.as_i64() == Some(0) => false,
                Value::Bool(b) => *b,
                other => {
                    return Err(DbError::query_error(
                        format!("Invalid projection flag {} for '{}'.", other, field),
                        "Use 1/true to include a field or 0/false to exclude it.",
                    ));
                }
            };
            entries.push((field.clone(), include));
        }

        let projection = Self { entries };
        if !projection.is_empty()
            && projection.included_fields().is_none()
            && projection.excluded_fields().is_none()
        {
            return Err(DbError::query_error(
                "Projection mixes inclusion and exclusion.",
                "Use only 1s to include fields or only 0s to exclude them, never both.",
            ));
        }
        Ok(projection)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The included field list iff the projection is inclusion-only.
    pub fn included_fields(&self) -> Option<Vec<&str>> {
        if self.entries.is_empty() || self.entries.iter().any(|(_, include)| !include) {
            return None;
        }
        Some(self.entries.iter().map(|(f, _)| f.as_str()).collect())
    }

    /// The excluded field list iff the projection is purely exclusion.
    pub fn excluded_fields(&self) -> Option<Vec<&str>> {
        if self.entries.is_empty() || self.entries.iter().any(|(_, include)| *include) {
            return None;
        }
        Some(self.entries.iter().map(|(f, _)| f.as_str()).collect())
    }

    /// Strip excluded fields from a fetched document.
    ///
    /// No-op for inclusion projections, which are pushed down to the backend.
    pub fn strip_exclusions(&self, doc: &mut serde_json::Map<String, Value>) {
        if let Some(excluded) = self.excluded_fields() {
            for field in excluded {
                doc.remove(field);
            }
        }
    }

    /// The raw JSON form, for backends that apply projections natively.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(f, include)| (f.clone(), Value::from(i32::from(*include))))
                .collect(),
        )
    }
}

/// Query options: sort, pagination, projection.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub sort: Vec<(String, SortOrder)>,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
    pub projection: Option<Projection>,
}

impl QueryOptions {
    /// Parse from a JSON object with optional `sort`, `limit`, `skip`,
    /// `projection` keys. Unknown keys are rejected.
    pub fn parse(value: &Value) -> Result<Self, DbError> {
        let obj = value.as_object().ok_or_else(|| {
            DbError::query_error(
                "Options must be a JSON object.",
                "Write {\"sort\": {\"age\": -1}, \"limit\": 10, \"skip\": 0}.",
            )
        })?;

        let mut options = Self::default();
        for (key, val) in obj {
            match key.as_str() {
                "sort" => {
                    let sort_obj = val.as_object().ok_or_else(|| {
                        DbError::query_error(
                            "The sort option must be an object.",
                            "Write {\"sort\": {\"created_at\": -1}}.",
                        )
                    })?;
                    for (field, dir) in sort_obj {
                        options.sort.push((field.clone(), SortOrder::parse(dir)?));
                    }
                }
                "limit" => {
                    let limit = val.as_u64().filter(|n| *n > 0).ok_or_else(|| {
                        DbError::query_error(
                            "The limit option must be a positive integer.",
                            "Write {\"limit\": 100}.",
                        )
                    })?;
                    options.limit = Some(limit);
                }
                "skip" => {
                    let skip = val.as_u64().ok_or_else(|| {
                        DbError::query_error(
                            "The skip option must be a non-negative integer.",
                            "Write {\"skip\": 20}.",
                        )
                    })?;
                    options.skip = Some(skip);
                }
                "projection" => options.projection = Some(Projection::parse(val)?),
                other => {
                    return Err(DbError::query_error(
                        format!("Unknown query option '{}'.", other),
                        "Supported options: sort, limit, skip, projection.",
                    ));
                }
            }
        }
        Ok(options)
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }
}

/// Confirmation tokens for destructive plural operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmToken {
    DeleteAll,
    UpdateAll,
}

impl ConfirmToken {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "DELETE_ALL" => Some(Self::DeleteAll),
            "UPDATE_ALL" => Some(Self::UpdateAll),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeleteAll => "DELETE_ALL",
            Self::UpdateAll => "UPDATE_ALL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sort_order_accepts_both_spellings() {
        assert_eq!(SortOrder::parse(&json!(1)).unwrap(), SortOrder::Ascending);
        assert_eq!(SortOrder::parse(&json!(-1)).unwrap(), SortOrder::Descending);
        assert_eq!(
            SortOrder::parse(&json!("asc")).unwrap(),
            SortOrder::Ascending
        );
        assert_eq!(
            SortOrder::parse(&json!("DESC")).unwrap(),
            SortOrder::Descending
        );
        assert!(SortOrder::parse(&json!(2)).is_err());
    }

    #[test]
    fn options_parse_and_validate() {
        let options = QueryOptions::parse(&json!({
            "sort": {"age": -1, "name": "asc"},
            "limit": 10,
            "skip": 20,
        }))
        .unwrap();

        assert_eq!(options.sort.len(), 2);
        assert_eq!(options.limit, Some(10));
        assert_eq!(options.skip, Some(20));

        assert!(QueryOptions::parse(&json!({"limit": 0})).is_err());
        assert!(QueryOptions::parse(&json!({"skip": -1})).is_err());
        assert!(QueryOptions::parse(&json!({"explain": true})).is_err());
    }

    #[test]
    fn mixed_projection_is_rejected() {
        assert!(Projection::parse(&json!({"a": 1, "b": 0})).is_err());
    }

    #[test]
    fn inclusion_projection_yields_columns() {
        let p = Projection::parse(&json!({"name": 1, "email": 1})).unwrap();
        assert_eq!(p.included_fields().unwrap(), vec!["name", "email"]);
        assert!(p.excluded_fields().is_none());
    }

    #[test]
    fn exclusion_projection_strips_fields() {
        let p = Projection::parse(&json!({"secret": 0})).unwrap();
        assert_eq!(p.excluded_fields().unwrap(), vec!["secret"]);

        let mut doc = serde_json::Map::new();
        doc.insert("name".to_string(), json!("Ada"));
        doc.insert("secret".to_string(), json!("hunter2"));
        p.strip_exclusions(&mut doc);
        assert!(doc.contains_key("name"));
        assert!(!doc.contains_key("secret"));
    }

    #[test]
    fn confirm_tokens_are_a_closed_set() {
        assert_eq!(
            ConfirmToken::parse("DELETE_ALL"),
            Some(ConfirmToken::DeleteAll)
        );
        assert_eq!(
            ConfirmToken::parse("UPDATE_ALL"),
            Some(ConfirmToken::UpdateAll)
        );
        assert_eq!(ConfirmToken::parse("YES"), None);
    }
}

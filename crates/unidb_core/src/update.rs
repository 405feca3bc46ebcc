use serde_json::Value;

use crate::error::DbError;

/// Update operators accepted at the top level of an update document.
pub const SUPPORTED_UPDATE_OPERATORS: &[&str] = &["$set", "$inc", "$unset", "$push", "$pull"];

/// Parsed update document.
///
/// Each operator keeps its entries in caller order; the raw JSON form is
/// kept for the document-store adapter, which speaks this algebra natively.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    raw: Value,
    pub set: Vec<(String, Value)>,
    pub inc: Vec<(String, serde_json::Number)>,
    pub unset: Vec<String>,
    pub push: Vec<(String, Value)>,
    pub pull: Vec<(String, Value)>,
}

impl Update {
    /// Parse a JSON update document. An update with zero operators is invalid.
    pub fn parse(value: &Value) -> Result<Self, DbError> {
        let obj = value.as_object().ok_or_else(|| {
            DbError::query_error(
                "Update must be a JSON object.",
                "Pass an object such as {\"$set\": {\"name\": \"new\"}}.",
            )
        })?;

        let mut update = Self {
            raw: value.clone(),
            set: Vec::new(),
            inc: Vec::new(),
            unset: Vec::new(),
            push: Vec::new(),
            pull: Vec::new(),
        };

        for (key, val) in obj {
            match key.as_str() {
                "$set" => update.set = entries(key, val)?,
                "$inc" => {
                    for (field, amount) in entries(key, val)? {
                        let amount = match amount {
                            Value::Number(n) => n,
                            _ => {
                                return Err(DbError::query_error(
                                    format!("The $inc amount for '{}' must be a number.", field),
                                    format!("Write {{\"$inc\": {{\"{}\": 1}}}}.", field),
                                ));
                            }
                        };
                        update.inc.push((field, amount));
                    }
                }
                "$unset" => {
                    update.unset = entries(key, val)?.into_iter().map(|(f, _)| f).collect();
                }
                "$push" => update.push = entries(key, val)?,
                "$pull" => update.pull = entries(key, val)?,
                other if other.starts_with('$') => {
                    return Err(DbError::unknown_operator(
                        format!("Unknown update operator '{}'.", other),
                        format!(
                            "Supported update operators: {}.",
                            SUPPORTED_UPDATE_OPERATORS.join(", ")
                        ),
                    ));
                }
                other => {
                    return Err(DbError::query_error(
                        format!("Plain key '{}' is not allowed at update top level.", other),
                        format!("Wrap field assignments in $set: {{\"$set\": {{\"{}\": ...}}}}.", other),
                    ));
                }
            }
        }

        if update.is_noop() {
            return Err(DbError::query_error(
                "Update document has no operators.",
                "Provide at least one of $set, $inc, $unset, $push, $pull.",
            ));
        }

        Ok(update)
    }

    /// The raw JSON form, as supplied by the caller.
    pub fn as_json(&self) -> &Value {
        &self.raw
    }

    fn is_noop(&self) -> bool {
        self.set.is_empty()
            && self.inc.is_empty()
            && self.unset.is_empty()
            && self.push.is_empty()
            && self.pull.is_empty()
    }

    /// Whether the update only uses operators expressible as SQL SET clauses.
    pub fn is_sql_compatible(&self) -> bool {
        self.push.is_empty() && self.pull.is_empty()
    }

    /// Rebuild the raw JSON form from the parsed entries.
    ///
    /// Used after timestamp injection, which edits the parsed form.
    pub fn rebuild_raw(&mut self) {
        let mut obj = serde_json::Map::new();
        if !self.set.is_empty() {
            obj.insert(
                "$set".to_string(),
                Value::Object(self.set.iter().cloned().collect()),
            );
        }
        if !self.inc.is_empty() {
            obj.insert(
                "$inc".to_string(),
                Value::Object(
                    self.inc
                        .iter()
                        .map(|(f, n)| (f.clone(), Value::Number(n.clone())))
                        .collect(),
                ),
            );
        }
        if !self.unset.is_empty() {
            obj.insert(
                "$unset".to_string(),
                Value::Object(
                    self.unset
                        .iter()
                        .map(|f| (f.clone(), Value::Bool(true)))
                        .collect(),
                ),
            );
        }
        if !self.push.is_empty() {
            obj.insert(
                "$push".to_string(),
                Value::Object(self.push.iter().cloned().collect()),
            );
        }
        if !self.pull.is_empty() {
            obj.insert(
                "$pull".to_string(),
                Value::Object(self.pull.iter().cloned().collect()),
            );
        }
        self.raw = Value::Object(obj);
    }

}

fn entries(operator: &str, value: &Value) -> Result<Vec<(String, Value)>, DbError> {
    let obj = value.as_object().ok_or_else(|| {
        DbError::query_error(
            format!("The {} operator requires an object of field/value pairs.", operator),
            format!("Write {{\"{}\": {{\"field\": ...}}}}.", operator),
        )
    })?;
    Ok(obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;
    use serde_json::json;

    #[test]
    fn parses_all_operators() {
        let update = Update::parse(&json!({
            "$set": {"name": "Ada"},
            "$inc": {"logins": 1},
            "$unset": {"legacy": true},
            "$push": {"tags": "new"},
            "$pull": {"tags": "old"},
        }))
        .unwrap();

        assert_eq!(update.set, vec![("name".to_string(), json!("Ada"))]);
        assert_eq!(
            update.inc,
            vec![("logins".to_string(), serde_json::Number::from(1))]
        );
        assert_eq!(update.unset, vec!["legacy".to_string()]);
        assert_eq!(update.push.len(), 1);
        assert_eq!(update.pull.len(), 1);
    }

    #[test]
    fn empty_update_is_invalid() {
        let err = Update::parse(&json!({})).unwrap_err();
        assert_eq!(err.code, ErrorCode::QueryError);
        assert!(err.fix.contains("$set"));
    }

    #[test]
    fn plain_key_suggests_set() {
        let err = Update::parse(&json!({"name": "Ada"})).unwrap_err();
        assert_eq!(err.code, ErrorCode::QueryError);
        assert!(err.fix.contains("$set"));
    }

    #[test]
    fn unknown_operator_lists_supported() {
        let err = Update::parse(&json!({"$rename": {"a": "b"}})).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownOperator);
        assert!(err.fix.contains("$pull"));
    }

    #[test]
    fn inc_requires_numbers() {
        let err = Update::parse(&json!({"$inc": {"count": "one"}})).unwrap_err();
        assert_eq!(err.code, ErrorCode::QueryError);
        assert!(err.message.contains("count"));
    }

    #[test]
    fn rebuild_raw_round_trips() {
        let mut update = Update::parse(&json!({"$inc": {"n": 2}})).unwrap();
        update.set.push(("touched".to_string(), json!("yes")));
        update.rebuild_raw();

        let raw = update.as_json().as_object().unwrap();
        assert!(raw.contains_key("$set"));
        assert!(raw.contains_key("$inc"));
    }
}

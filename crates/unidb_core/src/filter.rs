use serde_json::Value;

use crate::error::DbError;

/// Operators accepted inside an operator bag, in documentation order.
pub const SUPPORTED_OPERATORS: &[&str] = &[
    "$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$in", "$nin", "$exists", "$regex", "$not",
    "$size",
];

/// Logical keys accepted at filter position.
pub const LOGICAL_OPERATORS: &[&str] = &["$and", "$or", "$nor"];

/// Parsed filter: an ordered conjunction of clauses.
///
/// A filter with zero clauses matches everything. The raw JSON form is kept
/// so document-store adapters can pass it through untranslated.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    raw: Value,
    pub clauses: Vec<Clause>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// A field bound to an equality value, a missing-check, or an operator bag.
    Field { field: String, cond: FieldCond },
    /// `$and` / `$or` / `$nor` over an ordered sequence of sub-filters.
    Logical { op: LogicalOp, branches: Vec<Filter> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nor,
}

impl LogicalOp {
    pub fn key(self) -> &'static str {
        match self {
            Self::And => "$and",
            Self::Or => "$or",
            Self::Nor => "$nor",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldCond {
    /// Direct equality to a JSON value.
    Eq(Value),
    /// JSON `null` at a field means "field is missing".
    Missing,
    /// Operator bag; entries combine conjunctively.
    Ops(Vec<Operator>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Regex(String),
    Not(Vec<Operator>),
    Size(i64),
}

impl Filter {
    /// The filter that matches everything.
    pub fn empty() -> Self {
        Self {
            raw: Value::Object(serde_json::Map::new()),
            clauses: Vec::new(),
        }
    }

    /// Parse a JSON object into the filter algebra.
    pub fn parse(value: &Value) -> Result<Self, DbError> {
        let obj = value.as_object().ok_or_else(|| {
            DbError::query_error(
                "Filter must be a JSON object.",
                "Pass an object such as {\"status\": \"active\"} or {} to match everything.",
            )
        })?;

        let mut clauses = Vec::with_capacity(obj.len());
        for (key, val) in obj {
            if let Some(op) = parse_logical_key(key) {
                let branches = val.as_array().ok_or_else(|| {
                    DbError::query_error(
                        format!("The {} operator requires an array of sub-filters.", key),
                        format!(
                            "Write {{\"{}\": [{{...}}, {{...}}]}} with one object per branch.",
                            key
                        ),
                    )
                })?;
                let parsed = branches
                    .iter()
                    .map(Filter::parse)
                    .collect::<Result<Vec<_>, _>>()?;
                clauses.push(Clause::Logical {
                    op,
                    branches: parsed,
                });
            } else if key.starts_with('$') {
                return Err(DbError::unknown_operator(
                    format!("Unknown top-level operator '{}'.", key),
                    format!(
                        "Top-level operators are {}; comparison operators must be nested under \
                         a field, e.g. {{\"age\": {{\"$gte\": 18}}}}.",
                        LOGICAL_OPERATORS.join(", ")
                    ),
                ));
            } else {
                clauses.push(Clause::Field {
                    field: key.clone(),
                    cond: parse_field_cond(key, val)?,
                });
            }
        }

        Ok(Self {
            raw: value.clone(),
            clauses,
        })
    }

    /// A filter is empty iff it has zero keys.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// The raw JSON form, as supplied by the caller.
    pub fn as_json(&self) -> &Value {
        &self.raw
    }

    /// Every field name referenced by the filter, recursing through logical
    /// branches. Used by the sanitizer's whitelist check.
    pub fn field_names(&self) -> Vec<&str> {
        let mut out = Vec::new();
        collect_field_names(self, &mut out);
        out
    }

    /// Top-level equality-style pairs: non-`$` keys bound to scalar values.
    ///
    /// These seed the INSERT half of a relational upsert.
    pub fn equality_pairs(&self) -> Vec<(&str, &Value)> {
        self.clauses
            .iter()
            .filter_map(|clause| match clause {
                Clause::Field {
                    field,
                    cond: FieldCond::Eq(value),
                } if is_scalar(value) => Some((field.as_str(), value)),
                _ => None,
            })
            .collect()
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(
        value,
        Value::String(_) | Value::Number(_) | Value::Bool(_)
    )
}

fn collect_field_names<'a>(filter: &'a Filter, out: &mut Vec<&'a str>) {
    for clause in &filter.clauses {
        match clause {
            Clause::Field { field, .. } => out.push(field.as_str()),
            Clause::Logical { branches, .. } => {
                for branch in branches {
                    collect_field_names(branch, out);
                }
            }
        }
    }
}

fn parse_logical_key(key: &str) -> Option<LogicalOp> {
    match key {
        "$and" => Some(LogicalOp::And),
        "$or" => Some(LogicalOp::Or),
        "$nor" => Some(LogicalOp::Nor),
        _ => None,
    }
}

fn parse_field_cond(field: &str, value: &Value) -> Result<FieldCond, DbError> {
    match value {
        Value::Null => Ok(FieldCond::Missing),
        Value::Object(map) if map.keys().any(|k| k.starts_with('$')) => {
            Ok(FieldCond::Ops(parse_operator_bag(field, map)?))
        }
        other => Ok(FieldCond::Eq(other.clone())),
    }
}

fn parse_operator_bag(
    field: &str,
    map: &serde_json::Map<String, Value>,
) -> Result<Vec<Operator>, DbError> {
    let mut ops = Vec::with_capacity(map.len());
    for (key, value) in map {
        ops.push(parse_operator(field, key, value)?);
    }
    Ok(ops)
}

fn parse_operator(field: &str, key: &str, value: &Value) -> Result<Operator, DbError> {
    match key {
        "$eq" => Ok(Operator::Eq(value.clone())),
        "$ne" => Ok(Operator::Ne(value.clone())),
        "$gt" => Ok(Operator::Gt(value.clone())),
        "$gte" => Ok(Operator::Gte(value.clone())),
        "$lt" => Ok(Operator::Lt(value.clone())),
        "$lte" => Ok(Operator::Lte(value.clone())),
        "$in" | "$nin" => {
            let items = value.as_array().ok_or_else(|| {
                DbError::query_error(
                    format!("The {} operator on '{}' requires an array.", key, field),
                    format!("Write {{\"{}\": {{\"{}\": [\"a\", \"b\"]}}}}.", field, key),
                )
            })?;
            if key == "$in" {
                Ok(Operator::In(items.clone()))
            } else {
                Ok(Operator::Nin(items.clone()))
            }
        }
        "$exists" => {
            let flag = value.as_bool().ok_or_else(|| {
                DbError::query_error(
                    format!("The $exists operator on '{}' requires a boolean.", field),
                    format!("Write {{\"{}\": {{\"$exists\": true}}}}.", field),
                )
            })?;
            Ok(Operator::Exists(flag))
        }
        "$regex" => {
            let pattern = value.as_str().ok_or_else(|| {
                DbError::query_error(
                    format!("The $regex operator on '{}' requires a string pattern.", field),
                    format!("Write {{\"{}\": {{\"$regex\": \"^prefix\"}}}}.", field),
                )
            })?;
            Ok(Operator::Regex(pattern.to_string()))
        }
        "$options" => Err(DbError::query_error(
            format!("The $options modifier on '{}' is not supported.", field),
            "Drop the $options modifier; normalize the stored field (e.g. lowercase it) if \
             case-insensitive matching is needed.",
        )),
        "$not" => {
            let nested = value.as_object().ok_or_else(|| {
                DbError::query_error(
                    format!("The $not operator on '{}' requires a nested operator object.", field),
                    format!("Write {{\"{}\": {{\"$not\": {{\"$gte\": 10}}}}}}.", field),
                )
            })?;
            if nested.keys().any(|k| parse_logical_key(k).is_some()) {
                return Err(DbError::query_error(
                    format!("Logical operators are not allowed inside $not on '{}'.", field),
                    "Use $and/$or/$nor at filter position instead of inside an operator bag.",
                ));
            }
            Ok(Operator::Not(parse_operator_bag(field, nested)?))
        }
        "$size" => {
            let size = value.as_i64().filter(|n| *n >= 0).ok_or_else(|| {
                DbError::query_error(
                    format!("The $size operator on '{}' requires a non-negative integer.", field),
                    format!("Write {{\"{}\": {{\"$size\": 3}}}}.", field),
                )
            })?;
            Ok(Operator::Size(size))
        }
        other if parse_logical_key(other).is_some() => Err(DbError::query_error(
            format!("Logical operator '{}' is not allowed inside an operator bag on '{}'.", other, field),
            "Use $and/$or/$nor at filter position, each branch a full filter object.",
        )),
        other if other.starts_with('$') => Err(DbError::unknown_operator(
            format!("Unknown operator '{}' on field '{}'.", other, field),
            format!("Supported operators: {}.", SUPPORTED_OPERATORS.join(", ")),
        )),
        other => Err(DbError::query_error(
            format!(
                "Plain key '{}' cannot be mixed into the operator bag on '{}'.",
                other, field
            ),
            "Move the plain key to filter position as its own field condition.",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;
    use serde_json::json;

    #[test]
    fn empty_filter_matches_everything() {
        let filter = Filter::parse(&json!({})).unwrap();
        assert!(filter.is_empty());
        assert!(filter.clauses.is_empty());
    }

    #[test]
    fn equality_and_operator_bags() {
        let filter = Filter::parse(&json!({
            "role": "admin",
            "age": {"$gte": 18, "$lt": 65},
            "deleted_at": null,
        }))
        .unwrap();

        assert_eq!(filter.clauses.len(), 3);
        assert!(matches!(
            &filter.clauses[0],
            Clause::Field { field, cond: FieldCond::Eq(v) } if field == "role" && v == "admin"
        ));
        match &filter.clauses[1] {
            Clause::Field {
                cond: FieldCond::Ops(ops),
                ..
            } => {
                assert_eq!(ops.len(), 2);
                assert!(matches!(ops[0], Operator::Gte(_)));
                assert!(matches!(ops[1], Operator::Lt(_)));
            }
            other => panic!("expected operator bag, got {:?}", other),
        }
        assert!(matches!(
            &filter.clauses[2],
            Clause::Field { cond: FieldCond::Missing, .. }
        ));
    }

    #[test]
    fn logical_operators_parse_in_order() {
        let filter = Filter::parse(&json!({
            "$or": [{"role": "admin"}, {"role": "mod"}],
        }))
        .unwrap();

        match &filter.clauses[0] {
            Clause::Logical { op, branches } => {
                assert_eq!(*op, LogicalOp::Or);
                assert_eq!(branches.len(), 2);
            }
            other => panic!("expected logical clause, got {:?}", other),
        }
    }

    #[test]
    fn stray_top_level_operator_is_rejected_with_hint() {
        let err = Filter::parse(&json!({"$gte": 18})).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownOperator);
        assert!(err.fix.contains("nested under a field"));
    }

    #[test]
    fn unknown_bag_operator_lists_supported_set() {
        let err = Filter::parse(&json!({"age": {"$between": [1, 2]}})).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownOperator);
        assert!(err.fix.contains("$gte"));
        assert!(err.fix.contains("$size"));
    }

    #[test]
    fn logical_key_inside_bag_is_rejected() {
        let err = Filter::parse(&json!({"age": {"$or": []}})).unwrap_err();
        assert_eq!(err.code, ErrorCode::QueryError);
        assert!(err.fix.contains("filter position"));
    }

    #[test]
    fn regex_options_modifier_is_rejected() {
        let err = Filter::parse(&json!({"name": {"$regex": "^a", "$options": "i"}})).unwrap_err();
        assert_eq!(err.code, ErrorCode::QueryError);
        assert!(err.message.contains("$options"));
    }

    #[test]
    fn object_without_dollar_keys_is_equality() {
        let filter = Filter::parse(&json!({"address": {"city": "Lima"}})).unwrap();
        assert!(matches!(
            &filter.clauses[0],
            Clause::Field { cond: FieldCond::Eq(_), .. }
        ));
    }

    #[test]
    fn field_names_recurse_through_logical_branches() {
        let filter = Filter::parse(&json!({
            "status": "open",
            "$or": [{"owner": "a"}, {"assignee": {"$exists": true}}],
        }))
        .unwrap();

        assert_eq!(filter.field_names(), vec!["status", "owner", "assignee"]);
    }

    #[test]
    fn equality_pairs_skip_operator_bags_and_non_scalars() {
        let filter = Filter::parse(&json!({
            "email": "a@b.c",
            "age": {"$gte": 18},
            "tags": ["x"],
            "active": true,
        }))
        .unwrap();

        let pairs = filter.equality_pairs();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0, "email");
        assert_eq!(pairs[1].0, "active");
    }
}

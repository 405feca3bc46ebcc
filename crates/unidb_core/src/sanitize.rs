use std::sync::Arc;

use serde_json::Value;

use crate::Document;
use crate::error::DbError;
use crate::filter::{Clause, FieldCond, Filter, Operator};
use crate::schema_registry::SchemaRegistry;

/// Search-engine metadata fields that may never appear in a caller filter.
pub const RESERVED_SEARCH_FIELDS: &[&str] = &[
    "_id", "_index", "_score", "_source", "_type", "_routing", "_ignored", "_doc",
];

const MAX_REGEX_LEN: usize = 1000;

/// Relational field-name whitelist.
///
/// When the collection has a registered schema, every non-`$` key in the
/// filter (recursing through logical branches) must appear in the schema's
/// field set. Collections without a schema are not checked.
pub fn check_field_whitelist(filter: &Filter, collection: &str) -> Result<(), DbError> {
    let Some(schema) = SchemaRegistry::get(collection) else {
        return Ok(());
    };
    let allowed = schema.field_names();

    for field in filter.field_names() {
        if !allowed.contains(&field) {
            return Err(DbError::query_error(
                format!(
                    "Field '{}' is not part of the '{}' schema.",
                    field, collection
                ),
                format!("Valid fields: {}.", allowed.join(", ")),
            )
            .with_collection(collection));
        }
    }
    Ok(())
}

/// Reject filters that touch the search engine's reserved metadata fields.
pub fn check_reserved_fields(filter: &Filter) -> Result<(), DbError> {
    for field in filter.field_names() {
        if field.starts_with('_') || RESERVED_SEARCH_FIELDS.contains(&field) {
            return Err(DbError::query_error(
                format!("Field '{}' is reserved by the search engine.", field),
                "Rename the field in your documents; names starting with an underscore are \
                 reserved for engine metadata.",
            ));
        }
    }
    Ok(())
}

/// Validate a search index name.
///
/// Wildcards, commas, and spaces would address multiple indexes; leading
/// `.` or `-` collide with system index conventions.
pub fn check_index_name(name: &str) -> Result<(), DbError> {
    let invalid_char = name.chars().find(|c| matches!(c, '*' | ',' | ' '));
    if let Some(c) = invalid_char {
        return Err(DbError::query_error(
            format!("Index name '{}' contains the invalid character '{}'.", name, c),
            "Use a single concrete index name without wildcards, commas, or spaces.",
        ));
    }
    if name.starts_with('.') || name.starts_with('-') {
        return Err(DbError::query_error(
            format!("Index name '{}' starts with a reserved character.", name),
            "Index names must not begin with '.' or '-'.",
        ));
    }
    if name.is_empty() {
        return Err(DbError::query_error(
            "Index name is empty.",
            "Provide a concrete index name.",
        ));
    }
    Ok(())
}

/// Gate every `$regex` pattern in the filter through the complexity checks.
pub fn check_filter_regexes(filter: &Filter) -> Result<(), DbError> {
    for clause in &filter.clauses {
        match clause {
            Clause::Field { cond, .. } => check_cond_regexes(cond)?,
            Clause::Logical { branches, .. } => {
                for branch in branches {
                    check_filter_regexes(branch)?;
                }
            }
        }
    }
    Ok(())
}

fn check_cond_regexes(cond: &FieldCond) -> Result<(), DbError> {
    if let FieldCond::Ops(ops) = cond {
        check_ops_regexes(ops)?;
    }
    Ok(())
}

fn check_ops_regexes(ops: &[Operator]) -> Result<(), DbError> {
    for op in ops {
        match op {
            Operator::Regex(pattern) => check_regex_complexity(pattern)?,
            Operator::Not(inner) => check_ops_regexes(inner)?,
            _ => {}
        }
    }
    Ok(())
}

/// Cheap static checks that block obvious catastrophic-backtracking shapes:
/// a quantified group whose body ends in a quantifier (`(a+)+`, `(a*)*`,
/// `(a{2,})+`), and any pattern longer than 1000 characters.
pub fn check_regex_complexity(pattern: &str) -> Result<(), DbError> {
    if pattern.len() > MAX_REGEX_LEN {
        return Err(DbError::query_error(
            format!(
                "Regex pattern is {} characters long; the limit is {}.",
                pattern.len(),
                MAX_REGEX_LEN
            ),
            "Shorten the pattern or replace it with an anchored prefix match.",
        ));
    }

    let chars: Vec<char> = pattern.chars().collect();
    for (i, c) in chars.iter().enumerate() {
        if *c != ')' || i == 0 || i + 1 >= chars.len() {
            continue;
        }
        let before = chars[i - 1];
        let after = chars[i + 1];
        if matches!(before, '+' | '*' | '}') && matches!(after, '+' | '*' | '{') {
            return Err(DbError::query_error(
                "Regex pattern contains a nested quantifier.".to_string(),
                "Rewrite shapes like (a+)+ as a+ to avoid catastrophic backtracking.",
            ));
        }
    }
    Ok(())
}

/// Which fields a sanitize rule applies to.
#[derive(Clone)]
pub enum FieldSelector {
    /// Every field (`*` or omitted).
    All,
    One(String),
    Many(Vec<String>),
}

impl FieldSelector {
    fn matches(&self, field: &str) -> bool {
        match self {
            Self::All => true,
            Self::One(name) => name == field,
            Self::Many(names) => names.iter().any(|n| n == field),
        }
    }
}

pub type TransformFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Caller-supplied value transform, applied in rule order.
#[derive(Clone)]
pub struct SanitizeRule {
    pub fields: FieldSelector,
    pub transform: TransformFn,
}

impl SanitizeRule {
    pub fn for_all(transform: TransformFn) -> Self {
        Self {
            fields: FieldSelector::All,
            transform,
        }
    }

    pub fn for_field(field: impl Into<String>, transform: TransformFn) -> Self {
        Self {
            fields: FieldSelector::One(field.into()),
            transform,
        }
    }

    pub fn for_fields(
        fields: impl IntoIterator<Item = impl Into<String>>,
        transform: TransformFn,
    ) -> Self {
        Self {
            fields: FieldSelector::Many(fields.into_iter().map(Into::into).collect()),
            transform,
        }
    }
}

impl std::fmt::Debug for SanitizeRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields = match &self.fields {
            FieldSelector::All => "*".to_string(),
            FieldSelector::One(name) => name.clone(),
            FieldSelector::Many(names) => names.join(", "),
        };
        f.debug_struct("SanitizeRule").field("fields", &fields).finish()
    }
}

/// Apply sanitize rules to a fresh copy of the document.
///
/// The input is never mutated; an empty rule set short-circuits to a plain
/// copy.
pub fn apply_sanitize_rules(doc: &Document, rules: &[SanitizeRule]) -> Document {
    if rules.is_empty() {
        return doc.clone();
    }

    let mut out = doc.clone();
    for rule in rules {
        for (field, value) in out.iter_mut() {
            if rule.fields.matches(field) {
                *value = (rule.transform)(value);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;
    use crate::schema::{CollectionSchema, FieldKind, FieldSpec};
    use serde_json::json;

    fn filter(value: serde_json::Value) -> Filter {
        Filter::parse(&value).unwrap()
    }

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn whitelist_passes_without_schema() {
        check_field_whitelist(&filter(json!({"anything": 1})), "sanitize_no_schema").unwrap();
    }

    #[test]
    fn whitelist_rejects_unknown_fields_with_valid_list() {
        SchemaRegistry::register(
            "sanitize_whitelist_users",
            CollectionSchema::new(vec![
                FieldSpec::new("name", FieldKind::string()),
                FieldSpec::new("age", FieldKind::integer()),
            ]),
        );

        let err = check_field_whitelist(
            &filter(json!({"$or": [{"name": "a"}, {"password": "x"}]})),
            "sanitize_whitelist_users",
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::QueryError);
        assert!(err.fix.contains("name, age"));

        check_field_whitelist(
            &filter(json!({"name": "a", "age": {"$gte": 1}})),
            "sanitize_whitelist_users",
        )
        .unwrap();
    }

    #[test]
    fn reserved_search_fields_are_blocked() {
        assert!(check_reserved_fields(&filter(json!({"_id": "x"}))).is_err());
        assert!(check_reserved_fields(&filter(json!({"_custom": 1}))).is_err());
        assert!(check_reserved_fields(&filter(json!({"name": "x"}))).is_ok());
    }

    #[test]
    fn index_name_validation() {
        assert!(check_index_name("users").is_ok());
        assert!(check_index_name("logs-2024").is_ok());
        assert!(check_index_name("logs-*").is_err());
        assert!(check_index_name("a,b").is_err());
        assert!(check_index_name("with space").is_err());
        assert!(check_index_name(".hidden").is_err());
        assert!(check_index_name("-leading").is_err());
        assert!(check_index_name("").is_err());
    }

    #[test]
    fn nested_quantifiers_are_rejected() {
        assert!(check_regex_complexity("(a+)+").is_err());
        assert!(check_regex_complexity("(a*)*").is_err());
        assert!(check_regex_complexity("(a{2,})+").is_err());
        assert!(check_regex_complexity("^user-[0-9]+$").is_ok());
        assert!(check_regex_complexity("(abc)+").is_ok());
    }

    #[test]
    fn accepted_patterns_still_compile() {
        for pattern in ["^user-[0-9]+$", "(abc)+", "a.c", "foo|bar"] {
            check_regex_complexity(pattern).unwrap();
            regex::Regex::new(pattern).expect("accepted pattern must compile");
        }
    }

    #[test]
    fn over_long_patterns_are_rejected() {
        let long = "a".repeat(1001);
        assert!(check_regex_complexity(&long).is_err());
        let fine = "a".repeat(1000);
        assert!(check_regex_complexity(&fine).is_ok());
    }

    #[test]
    fn filter_regexes_are_gated_recursively() {
        let bad = filter(json!({"$or": [{"name": {"$regex": "(a+)+"}}]}));
        assert!(check_filter_regexes(&bad).is_err());

        let nested = filter(json!({"name": {"$not": {"$regex": "(b*)*"}}}));
        assert!(check_filter_regexes(&nested).is_err());
    }

    #[test]
    fn rules_never_mutate_the_input() {
        let input = doc(json!({"email": " Ada@Example.COM ", "age": 36}));
        let snapshot = input.clone();

        let rules = vec![SanitizeRule::for_field(
            "email",
            Arc::new(|v: &Value| {
                Value::String(v.as_str().unwrap_or_default().trim().to_lowercase())
            }),
        )];

        let out = apply_sanitize_rules(&input, &rules);
        assert_eq!(out.get("email"), Some(&json!("ada@example.com")));
        assert_eq!(input, snapshot);
    }

    #[test]
    fn rules_apply_in_order_and_star_matches_all() {
        let input = doc(json!({"a": "x", "b": "y"}));
        let rules = vec![
            SanitizeRule::for_all(Arc::new(|v: &Value| {
                Value::String(format!("{}1", v.as_str().unwrap_or_default()))
            })),
            SanitizeRule::for_field(
                "a",
                Arc::new(|v: &Value| {
                    Value::String(format!("{}2", v.as_str().unwrap_or_default()))
                }),
            ),
        ];

        let out = apply_sanitize_rules(&input, &rules);
        assert_eq!(out.get("a"), Some(&json!("x12")));
        assert_eq!(out.get("b"), Some(&json!("y1")));
    }

    #[test]
    fn empty_rule_set_returns_equal_copy() {
        let input = doc(json!({"a": 1}));
        let out = apply_sanitize_rules(&input, &[]);
        assert_eq!(out, input);
    }
}

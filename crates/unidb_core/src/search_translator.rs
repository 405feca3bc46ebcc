use serde_json::{Map, Value, json};

use crate::error::DbError;
use crate::filter::{Clause, FieldCond, Filter, LogicalOp, Operator};
use crate::options::{Projection, SortOrder};
use crate::update::Update;

/// Compile a filter into the search engine's query DSL.
///
/// An empty filter yields `match_all`; a single clause is returned
/// unwrapped, multiple top-level clauses collapse to `bool.must`.
pub fn translate_filter(filter: &Filter) -> Result<Value, DbError> {
    if filter.is_empty() {
        return Ok(json!({"match_all": {}}));
    }

    let mut clauses = Vec::new();
    for clause in &filter.clauses {
        clauses.extend(translate_clause(clause)?);
    }
    Ok(wrap_must(clauses))
}

fn wrap_must(mut clauses: Vec<Value>) -> Value {
    if clauses.len() == 1 {
        clauses.remove(0)
    } else {
        json!({"bool": {"must": clauses}})
    }
}

fn translate_clause(clause: &Clause) -> Result<Vec<Value>, DbError> {
    match clause {
        Clause::Field { field, cond } => translate_field(field, cond),
        Clause::Logical { op, branches } => {
            let translated = branches
                .iter()
                .map(translate_filter)
                .collect::<Result<Vec<_>, _>>()?;
            let node = match op {
                LogicalOp::And => json!({"bool": {"must": translated}}),
                LogicalOp::Or => {
                    json!({"bool": {"should": translated, "minimum_should_match": 1}})
                }
                LogicalOp::Nor => json!({"bool": {"must_not": translated}}),
            };
            Ok(vec![node])
        }
    }
}

fn translate_field(field: &str, cond: &FieldCond) -> Result<Vec<Value>, DbError> {
    match cond {
        FieldCond::Eq(value) => Ok(vec![json!({"term": {field: value}})]),
        FieldCond::Missing => Ok(vec![must_not(json!({"exists": {"field": field}}))]),
        FieldCond::Ops(ops) => translate_bag(field, ops),
    }
}

/// Translate an operator bag; range operators on one field collapse into a
/// single `range` object.
fn translate_bag(field: &str, ops: &[Operator]) -> Result<Vec<Value>, DbError> {
    let mut range = Map::new();
    let mut clauses = Vec::new();

    for op in ops {
        match op {
            Operator::Gt(v) => {
                range.insert("gt".to_string(), v.clone());
            }
            Operator::Gte(v) => {
                range.insert("gte".to_string(), v.clone());
            }
            Operator::Lt(v) => {
                range.insert("lt".to_string(), v.clone());
            }
            Operator::Lte(v) => {
                range.insert("lte".to_string(), v.clone());
            }
            other => clauses.push(translate_operator(field, other)?),
        }
    }

    if !range.is_empty() {
        clauses.push(json!({"range": {field: range}}));
    }
    Ok(clauses)
}

fn translate_operator(field: &str, op: &Operator) -> Result<Value, DbError> {
    match op {
        Operator::Eq(Value::Null) => Ok(must_not(json!({"exists": {"field": field}}))),
        Operator::Eq(value) => Ok(json!({"term": {field: value}})),
        Operator::Ne(Value::Null) => Ok(json!({"exists": {"field": field}})),
        Operator::Ne(value) => Ok(must_not(json!({"term": {field: value}}))),
        Operator::In(items) => Ok(json!({"terms": {field: items}})),
        Operator::Nin(items) => Ok(must_not(json!({"terms": {field: items}}))),
        Operator::Exists(true) => Ok(json!({"exists": {"field": field}})),
        Operator::Exists(false) => Ok(must_not(json!({"exists": {"field": field}}))),
        Operator::Regex(pattern) => Ok(json!({"regexp": {field: pattern}})),
        Operator::Not(inner) => {
            let nested = translate_bag(field, inner)?;
            Ok(json!({"bool": {"must_not": nested}}))
        }
        Operator::Size(size) => Ok(json!({
            "script": {
                "script": {
                    "source": "doc[params.field].size() == params.size",
                    "params": {"field": field, "size": size},
                }
            }
        })),
        // Range operators are collapsed by translate_bag before we get here.
        Operator::Gt(_) | Operator::Gte(_) | Operator::Lt(_) | Operator::Lte(_) => {
            Err(DbError::internal("Range operator escaped collapsing."))
        }
    }
}

fn must_not(clause: Value) -> Value {
    json!({"bool": {"must_not": [clause]}})
}

/// Translate sort options into the DSL's ordered sort sequence.
pub fn translate_sort(sort: &[(String, SortOrder)]) -> Vec<Value> {
    sort.iter()
        .map(|(field, order)| {
            let mut entry = Map::new();
            entry.insert(field.clone(), json!({"order": order.search_keyword()}));
            Value::Object(entry)
        })
        .collect()
}

/// Translate a projection into a `_source` filter object.
pub fn translate_projection(projection: &Projection) -> Option<Value> {
    if let Some(included) = projection.included_fields() {
        return Some(json!({"includes": included}));
    }
    projection
        .excluded_fields()
        .map(|excluded| json!({"excludes": excluded}))
}

/// A mutation script for update-by-query: statement source plus named params.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationScript {
    pub source: String,
    pub params: Map<String, Value>,
}

impl MutationScript {
    /// The DSL `script` object.
    pub fn to_json(&self) -> Value {
        json!({"source": self.source, "params": self.params, "lang": "painless"})
    }
}

/// Compile an update into a mutation script.
///
/// Each operator emits a statement against the document root with an
/// operator-prefixed parameter name; statements are joined with `"; "`.
pub fn translate_update(update: &Update) -> Result<MutationScript, DbError> {
    let mut statements = Vec::new();
    let mut params = Map::new();

    for (field, value) in &update.set {
        let name = param_name("set", field);
        statements.push(format!("ctx._source.{} = params.{}", field, name));
        params.insert(name, value.clone());
    }
    for (field, amount) in &update.inc {
        let name = param_name("inc", field);
        statements.push(format!("ctx._source.{} += params.{}", field, name));
        params.insert(name, Value::Number(amount.clone()));
    }
    for field in &update.unset {
        statements.push(format!("ctx._source.remove('{}')", field));
    }
    for (field, value) in &update.push {
        let name = param_name("push", field);
        statements.push(format!(
            "if (ctx._source.{f} == null) {{ ctx._source.{f} = [] }} ctx._source.{f}.add(params.{p})",
            f = field,
            p = name
        ));
        params.insert(name, value.clone());
    }
    for (field, value) in &update.pull {
        let name = param_name("pull", field);
        statements.push(format!(
            "if (ctx._source.{f} != null) {{ ctx._source.{f}.removeIf(v -> v == params.{p}) }}",
            f = field,
            p = name
        ));
        params.insert(name, value.clone());
    }

    if statements.is_empty() {
        return Err(DbError::query_error(
            "Update produced no mutation statements.",
            "Provide at least one of $set, $inc, $unset, $push, $pull.",
        ));
    }

    Ok(MutationScript {
        source: statements.join("; "),
        params,
    })
}

fn param_name(prefix: &str, field: &str) -> String {
    let sanitized: String = field
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{}_{}", prefix, sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filter(value: serde_json::Value) -> Filter {
        Filter::parse(&value).unwrap()
    }

    #[test]
    fn empty_filter_is_match_all() {
        assert_eq!(
            translate_filter(&Filter::empty()).unwrap(),
            json!({"match_all": {}})
        );
    }

    #[test]
    fn single_equality_is_an_unwrapped_term() {
        assert_eq!(
            translate_filter(&filter(json!({"role": "admin"}))).unwrap(),
            json!({"term": {"role": "admin"}})
        );
    }

    #[test]
    fn multiple_fields_collapse_to_bool_must() {
        assert_eq!(
            translate_filter(&filter(json!({"role": "admin", "active": true}))).unwrap(),
            json!({"bool": {"must": [
                {"term": {"role": "admin"}},
                {"term": {"active": true}},
            ]}})
        );
    }

    #[test]
    fn or_uses_should_with_minimum_match() {
        assert_eq!(
            translate_filter(&filter(json!({"$or": [{"role": "admin"}, {"role": "mod"}]})))
                .unwrap(),
            json!({"bool": {
                "should": [
                    {"term": {"role": "admin"}},
                    {"term": {"role": "mod"}},
                ],
                "minimum_should_match": 1,
            }})
        );
    }

    #[test]
    fn nor_uses_must_not() {
        assert_eq!(
            translate_filter(&filter(json!({"$nor": [{"banned": true}]}))).unwrap(),
            json!({"bool": {"must_not": [{"term": {"banned": true}}]}})
        );
    }

    #[test]
    fn range_operators_collapse_into_one_range() {
        assert_eq!(
            translate_filter(&filter(json!({"age": {"$gte": 18, "$lt": 65}}))).unwrap(),
            json!({"range": {"age": {"gte": 18, "lt": 65}}})
        );
    }

    #[test]
    fn ne_and_nin_use_must_not() {
        assert_eq!(
            translate_filter(&filter(json!({"role": {"$ne": "bot"}}))).unwrap(),
            json!({"bool": {"must_not": [{"term": {"role": "bot"}}]}})
        );
        assert_eq!(
            translate_filter(&filter(json!({"role": {"$nin": ["bot", "spam"]}}))).unwrap(),
            json!({"bool": {"must_not": [{"terms": {"role": ["bot", "spam"]}}]}})
        );
    }

    #[test]
    fn exists_and_null_leaf() {
        assert_eq!(
            translate_filter(&filter(json!({"email": {"$exists": true}}))).unwrap(),
            json!({"exists": {"field": "email"}})
        );
        assert_eq!(
            translate_filter(&filter(json!({"email": null}))).unwrap(),
            json!({"bool": {"must_not": [{"exists": {"field": "email"}}]}})
        );
    }

    #[test]
    fn regex_and_size() {
        assert_eq!(
            translate_filter(&filter(json!({"name": {"$regex": "ada.*"}}))).unwrap(),
            json!({"regexp": {"name": "ada.*"}})
        );
        assert_eq!(
            translate_filter(&filter(json!({"tags": {"$size": 2}}))).unwrap(),
            json!({"script": {"script": {
                "source": "doc[params.field].size() == params.size",
                "params": {"field": "tags", "size": 2},
            }}})
        );
    }

    #[test]
    fn not_wraps_nested_emission() {
        assert_eq!(
            translate_filter(&filter(json!({"age": {"$not": {"$gte": 65}}}))).unwrap(),
            json!({"bool": {"must_not": [{"range": {"age": {"gte": 65}}}]}})
        );
    }

    #[test]
    fn sort_emits_ordered_sequence() {
        let sort = vec![
            ("age".to_string(), SortOrder::Descending),
            ("name".to_string(), SortOrder::Ascending),
        ];
        assert_eq!(
            translate_sort(&sort),
            vec![
                json!({"age": {"order": "desc"}}),
                json!({"name": {"order": "asc"}}),
            ]
        );
    }

    #[test]
    fn projection_to_source_filter() {
        let include = Projection::parse(&json!({"name": 1})).unwrap();
        assert_eq!(
            translate_projection(&include).unwrap(),
            json!({"includes": ["name"]})
        );

        let exclude = Projection::parse(&json!({"secret": 0})).unwrap();
        assert_eq!(
            translate_projection(&exclude).unwrap(),
            json!({"excludes": ["secret"]})
        );
    }

    #[test]
    fn update_script_joins_statements_with_prefixed_params() {
        let update = Update::parse(&json!({
            "$set": {"name": "Ada"},
            "$inc": {"count": 2},
            "$unset": {"legacy": true},
        }))
        .unwrap();

        let script = translate_update(&update).unwrap();
        assert_eq!(
            script.source,
            "ctx._source.name = params.set_name; \
             ctx._source.count += params.inc_count; \
             ctx._source.remove('legacy')"
        );
        assert_eq!(script.params.get("set_name"), Some(&json!("Ada")));
        assert_eq!(script.params.get("inc_count"), Some(&json!(2)));
    }

    #[test]
    fn push_creates_list_lazily_and_pull_removes_if() {
        let update = Update::parse(&json!({
            "$push": {"tags": "new"},
            "$pull": {"tags": "old"},
        }))
        .unwrap();

        let script = translate_update(&update).unwrap();
        assert!(script.source.contains("if (ctx._source.tags == null) { ctx._source.tags = [] }"));
        assert!(script.source.contains("ctx._source.tags.add(params.push_tags)"));
        assert!(script.source.contains("removeIf(v -> v == params.pull_tags)"));
        assert_eq!(script.params.get("push_tags"), Some(&json!("new")));
        assert_eq!(script.params.get("pull_tags"), Some(&json!("old")));
    }
}

use serde_json::Value;

use crate::error::DbError;
use crate::filter::{Clause, FieldCond, Filter, LogicalOp, Operator};
use crate::sql_dialect::SqlDialect;
use crate::update::Update;

/// A translated WHERE condition: clause text plus ordered parameter values.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlCondition {
    pub clause: String,
    pub params: Vec<Value>,
}

impl SqlCondition {
    /// Whether the condition matches everything (`1=1`, no parameters).
    pub fn is_trivial(&self) -> bool {
        self.clause == "1=1" && self.params.is_empty()
    }
}

/// Translated SET assignments for an UPDATE statement.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlAssignments {
    pub clause: String,
    pub params: Vec<Value>,
}

/// Compile a filter into a parameterized WHERE condition.
///
/// Placeholder numbering is dense starting at `offset + 1`; the translation
/// is position-oblivious modulo the offset. An empty filter yields `1=1`.
pub fn translate_filter(
    filter: &Filter,
    dialect: SqlDialect,
    offset: usize,
) -> Result<SqlCondition, DbError> {
    if filter.is_empty() {
        return Ok(SqlCondition {
            clause: "1=1".to_string(),
            params: Vec::new(),
        });
    }

    let mut ctx = TranslateCtx {
        dialect,
        offset,
        params: Vec::new(),
    };
    let clause = ctx.conjunction(filter)?;
    Ok(SqlCondition {
        clause,
        params: ctx.params,
    })
}

/// Compile an update into SET assignments.
///
/// Parameter numbering starts at `offset + 1`; WHERE translation for the same
/// statement continues after the assignment parameters.
pub fn translate_update(
    update: &Update,
    dialect: SqlDialect,
    offset: usize,
) -> Result<SqlAssignments, DbError> {
    if !update.is_sql_compatible() {
        return Err(DbError::unsupported_operation(
            "The $push and $pull operators are not supported on relational backends.",
            "Model the array as its own table, or use the document or search backend for \
             array mutations.",
        ));
    }

    let mut ctx = TranslateCtx {
        dialect,
        offset,
        params: Vec::new(),
    };
    let mut assignments = Vec::new();

    for (field, value) in &update.set {
        let column = dialect.quote_identifier(field);
        let placeholder = ctx.push_param(value.clone());
        assignments.push(format!("{} = {}", column, placeholder));
    }
    for (field, amount) in &update.inc {
        let column = dialect.quote_identifier(field);
        let placeholder = ctx.push_param(Value::Number(amount.clone()));
        assignments.push(format!("{} = {} + {}", column, column, placeholder));
    }
    for field in &update.unset {
        assignments.push(format!("{} = NULL", dialect.quote_identifier(field)));
    }

    if assignments.is_empty() {
        return Err(DbError::query_error(
            "Update produced no SET clauses.",
            "Provide at least one of $set, $inc, $unset.",
        ));
    }

    Ok(SqlAssignments {
        clause: assignments.join(", "),
        params: ctx.params,
    })
}

struct TranslateCtx {
    dialect: SqlDialect,
    offset: usize,
    params: Vec<Value>,
}

impl TranslateCtx {
    fn push_param(&mut self, value: Value) -> String {
        self.params.push(value);
        self.dialect.placeholder(self.offset + self.params.len())
    }

    fn conjunction(&mut self, filter: &Filter) -> Result<String, DbError> {
        let parts = filter
            .clauses
            .iter()
            .map(|clause| self.clause(clause))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(parts.join(" AND "))
    }

    fn clause(&mut self, clause: &Clause) -> Result<String, DbError> {
        match clause {
            Clause::Field { field, cond } => self.field_cond(field, cond),
            Clause::Logical { op, branches } => self.logical(*op, branches),
        }
    }

    fn logical(&mut self, op: LogicalOp, branches: &[Filter]) -> Result<String, DbError> {
        let subs = branches
            .iter()
            .map(|branch| {
                if branch.is_empty() {
                    Ok("(1=1)".to_string())
                } else {
                    Ok(format!("({})", self.conjunction(branch)?))
                }
            })
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(match op {
            LogicalOp::And => format!("({})", subs.join(" AND ")),
            LogicalOp::Or => format!("({})", subs.join(" OR ")),
            LogicalOp::Nor => format!("NOT ({})", subs.join(" OR ")),
        })
    }

    fn field_cond(&mut self, field: &str, cond: &FieldCond) -> Result<String, DbError> {
        let column = self.dialect.quote_identifier(field);
        match cond {
            FieldCond::Eq(value) => {
                let placeholder = self.push_param(value.clone());
                Ok(format!("{} = {}", column, placeholder))
            }
            FieldCond::Missing => Ok(format!("{} IS NULL", column)),
            FieldCond::Ops(ops) => {
                let parts = ops
                    .iter()
                    .map(|op| self.operator(&column, op))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(parts.join(" AND "))
            }
        }
    }

    fn operator(&mut self, column: &str, op: &Operator) -> Result<String, DbError> {
        match op {
            Operator::Eq(Value::Null) => Ok(format!("{} IS NULL", column)),
            Operator::Eq(value) => {
                let p = self.push_param(value.clone());
                Ok(format!("{} = {}", column, p))
            }
            Operator::Ne(Value::Null) => Ok(format!("{} IS NOT NULL", column)),
            Operator::Ne(value) => {
                let p = self.push_param(value.clone());
                Ok(format!("{} <> {}", column, p))
            }
            Operator::Gt(value) => {
                let p = self.push_param(value.clone());
                Ok(format!("{} > {}", column, p))
            }
            Operator::Gte(value) => {
                let p = self.push_param(value.clone());
                Ok(format!("{} >= {}", column, p))
            }
            Operator::Lt(value) => {
                let p = self.push_param(value.clone());
                Ok(format!("{} < {}", column, p))
            }
            Operator::Lte(value) => {
                let p = self.push_param(value.clone());
                Ok(format!("{} <= {}", column, p))
            }
            Operator::In(items) => {
                if items.is_empty() {
                    return Ok("1=0".to_string());
                }
                let placeholders = items
                    .iter()
                    .map(|item| self.push_param(item.clone()))
                    .collect::<Vec<_>>();
                Ok(format!("{} IN ({})", column, placeholders.join(", ")))
            }
            Operator::Nin(items) => {
                if items.is_empty() {
                    return Ok("1=1".to_string());
                }
                let placeholders = items
                    .iter()
                    .map(|item| self.push_param(item.clone()))
                    .collect::<Vec<_>>();
                Ok(format!("{} NOT IN ({})", column, placeholders.join(", ")))
            }
            Operator::Exists(true) => Ok(format!("{} IS NOT NULL", column)),
            Operator::Exists(false) => Ok(format!("{} IS NULL", column)),
            Operator::Regex(pattern) => self.regex(column, pattern),
            Operator::Not(inner) => {
                let parts = inner
                    .iter()
                    .map(|op| self.operator(column, op))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(format!("NOT ({})", parts.join(" AND ")))
            }
            Operator::Size(size) => {
                let expr = self.dialect.json_array_length(column);
                let p = self.push_param(Value::from(*size));
                Ok(format!("{} = {}", expr, p))
            }
        }
    }

    fn regex(&mut self, column: &str, pattern: &str) -> Result<String, DbError> {
        match self.dialect {
            SqlDialect::Postgres => {
                let p = self.push_param(Value::String(pattern.to_string()));
                Ok(format!("{} ~ {}", column, p))
            }
            SqlDialect::Mysql => {
                let p = self.push_param(Value::String(pattern.to_string()));
                Ok(format!("{} REGEXP {}", column, p))
            }
            SqlDialect::Mssql | SqlDialect::Sqlite => {
                let like = regex_to_like(pattern);
                let p = self.push_param(Value::String(like));
                Ok(format!("{} LIKE {} ESCAPE '\\'", column, p))
            }
        }
    }
}

/// Rewrite a simple regex into a LIKE pattern for dialects without a native
/// regex operator: `^`/`$` anchors are stripped, `.*` becomes `%`, `.`
/// becomes `_`, and literal `%`/`_` are escaped.
fn regex_to_like(pattern: &str) -> String {
    let mut body = pattern;
    let anchored_start = body.starts_with('^');
    if anchored_start {
        body = &body[1..];
    }
    let anchored_end = body.ends_with('$') && !body.ends_with("\\$");
    if anchored_end {
        body = &body[..body.len() - 1];
    }

    let mut rewritten = String::with_capacity(body.len() + 2);
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '%' => rewritten.push_str("\\%"),
            '_' => rewritten.push_str("\\_"),
            '.' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    rewritten.push('%');
                } else {
                    rewritten.push('_');
                }
            }
            other => rewritten.push(other),
        }
    }

    let mut like = String::with_capacity(rewritten.len() + 2);
    if !anchored_start {
        like.push('%');
    }
    like.push_str(&rewritten);
    if !anchored_end {
        like.push('%');
    }
    like
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;
    use serde_json::json;

    fn filter(value: serde_json::Value) -> Filter {
        Filter::parse(&value).unwrap()
    }

    #[test]
    fn empty_filter_is_always_true() {
        let cond = translate_filter(&Filter::empty(), SqlDialect::Postgres, 0).unwrap();
        assert_eq!(cond.clause, "1=1");
        assert!(cond.params.is_empty());
        assert!(cond.is_trivial());
    }

    #[test]
    fn range_and_equality_emit_dense_placeholders() {
        let cond = translate_filter(
            &filter(json!({"age": {"$gte": 18, "$lt": 65}, "role": "admin"})),
            SqlDialect::Postgres,
            0,
        )
        .unwrap();

        assert_eq!(
            cond.clause,
            "\"age\" >= $1 AND \"age\" < $2 AND \"role\" = $3"
        );
        assert_eq!(cond.params, vec![json!(18), json!(65), json!("admin")]);
    }

    #[test]
    fn translation_is_position_oblivious() {
        let f = filter(json!({"age": {"$gte": 18}, "role": "admin"}));
        let base = translate_filter(&f, SqlDialect::Postgres, 0).unwrap();
        let shifted = translate_filter(&f, SqlDialect::Postgres, 4).unwrap();

        assert_eq!(base.clause, "\"age\" >= $1 AND \"role\" = $2");
        assert_eq!(shifted.clause, "\"age\" >= $5 AND \"role\" = $6");
        assert_eq!(base.params, shifted.params);
    }

    #[test]
    fn placeholder_count_matches_params_in_every_dialect() {
        let f = filter(json!({
            "age": {"$gte": 18, "$lt": 65},
            "role": {"$in": ["a", "b", "c"]},
            "name": {"$regex": "^A"},
        }));

        for dialect in [
            SqlDialect::Postgres,
            SqlDialect::Mysql,
            SqlDialect::Mssql,
            SqlDialect::Sqlite,
        ] {
            let cond = translate_filter(&f, dialect, 0).unwrap();
            let count = match dialect {
                SqlDialect::Postgres => cond.clause.matches('$').count(),
                SqlDialect::Mysql | SqlDialect::Sqlite => cond.clause.matches('?').count(),
                SqlDialect::Mssql => cond.clause.matches("@p").count(),
            };
            assert_eq!(count, cond.params.len(), "dialect {dialect}");
        }
    }

    #[test]
    fn logical_operators_parenthesize_branches() {
        let cond = translate_filter(
            &filter(json!({"$or": [{"role": "admin"}, {"role": "mod"}]})),
            SqlDialect::Postgres,
            0,
        )
        .unwrap();
        assert_eq!(cond.clause, "((\"role\" = $1) OR (\"role\" = $2))");

        let cond = translate_filter(
            &filter(json!({"$nor": [{"banned": true}, {"deleted": true}]})),
            SqlDialect::Postgres,
            0,
        )
        .unwrap();
        assert_eq!(cond.clause, "NOT ((\"banned\" = $1) OR (\"deleted\" = $2))");

        let cond = translate_filter(
            &filter(json!({"$and": [{"a": 1}, {"b": 2}]})),
            SqlDialect::Mysql,
            0,
        )
        .unwrap();
        assert_eq!(cond.clause, "((\"a\" = ?) AND (\"b\" = ?))");
    }

    #[test]
    fn null_handling() {
        let cond = translate_filter(
            &filter(json!({"deleted_at": null})),
            SqlDialect::Postgres,
            0,
        )
        .unwrap();
        assert_eq!(cond.clause, "\"deleted_at\" IS NULL");

        let cond = translate_filter(
            &filter(json!({"deleted_at": {"$ne": null}})),
            SqlDialect::Postgres,
            0,
        )
        .unwrap();
        assert_eq!(cond.clause, "\"deleted_at\" IS NOT NULL");

        let cond = translate_filter(
            &filter(json!({"deleted_at": {"$eq": null}})),
            SqlDialect::Postgres,
            0,
        )
        .unwrap();
        assert_eq!(cond.clause, "\"deleted_at\" IS NULL");
    }

    #[test]
    fn empty_in_is_false_and_empty_nin_is_true() {
        let cond = translate_filter(&filter(json!({"id": {"$in": []}})), SqlDialect::Mysql, 0)
            .unwrap();
        assert_eq!(cond.clause, "1=0");
        assert!(cond.params.is_empty());

        let cond = translate_filter(&filter(json!({"id": {"$nin": []}})), SqlDialect::Mysql, 0)
            .unwrap();
        assert_eq!(cond.clause, "1=1");
        assert!(cond.params.is_empty());
    }

    #[test]
    fn exists_maps_to_null_checks() {
        let cond = translate_filter(
            &filter(json!({"email": {"$exists": true}, "phone": {"$exists": false}})),
            SqlDialect::Sqlite,
            0,
        )
        .unwrap();
        assert_eq!(cond.clause, "\"email\" IS NOT NULL AND \"phone\" IS NULL");
    }

    #[test]
    fn regex_per_dialect() {
        let f = filter(json!({"name": {"$regex": "^Ada.*"}}));

        let pg = translate_filter(&f, SqlDialect::Postgres, 0).unwrap();
        assert_eq!(pg.clause, "\"name\" ~ $1");
        assert_eq!(pg.params, vec![json!("^Ada.*")]);

        let mysql = translate_filter(&f, SqlDialect::Mysql, 0).unwrap();
        assert_eq!(mysql.clause, "\"name\" REGEXP ?");

        let sqlite = translate_filter(&f, SqlDialect::Sqlite, 0).unwrap();
        assert_eq!(sqlite.clause, "\"name\" LIKE ? ESCAPE '\\'");
        assert_eq!(sqlite.params, vec![json!("Ada%")]);
    }

    #[test]
    fn like_rewriting_rules() {
        assert_eq!(regex_to_like("^abc$"), "abc");
        assert_eq!(regex_to_like("abc"), "%abc%");
        assert_eq!(regex_to_like("^a.c"), "a_c%");
        assert_eq!(regex_to_like("^100%.*"), "100\\%%%");
        assert_eq!(regex_to_like("a_b"), "%a\\_b%");
    }

    #[test]
    fn not_wraps_nested_bag() {
        let cond = translate_filter(
            &filter(json!({"age": {"$not": {"$gte": 18, "$lt": 65}}})),
            SqlDialect::Postgres,
            0,
        )
        .unwrap();
        assert_eq!(cond.clause, "NOT (\"age\" >= $1 AND \"age\" < $2)");
    }

    #[test]
    fn size_uses_dialect_array_length() {
        let cond = translate_filter(&filter(json!({"tags": {"$size": 3}})), SqlDialect::Postgres, 0)
            .unwrap();
        assert_eq!(cond.clause, "json_array_length(\"tags\") = $1");
        assert_eq!(cond.params, vec![json!(3)]);

        let cond = translate_filter(&filter(json!({"tags": {"$size": 3}})), SqlDialect::Mssql, 0)
            .unwrap();
        assert_eq!(
            cond.clause,
            "(SELECT COUNT(*) FROM OPENJSON(\"tags\")) = @p1"
        );
    }

    #[test]
    fn identifier_quotes_are_escaped() {
        let cond = translate_filter(&filter(json!({"odd\"name": 1})), SqlDialect::Postgres, 0)
            .unwrap();
        assert_eq!(cond.clause, "\"odd\"\"name\" = $1");
    }

    #[test]
    fn update_set_inc_unset() {
        let update = Update::parse(&json!({
            "$set": {"name": "Ada"},
            "$inc": {"logins": 1},
            "$unset": {"legacy": true},
        }))
        .unwrap();

        let assignments = translate_update(&update, SqlDialect::Postgres, 0).unwrap();
        assert_eq!(
            assignments.clause,
            "\"name\" = $1, \"logins\" = \"logins\" + $2, \"legacy\" = NULL"
        );
        assert_eq!(assignments.params, vec![json!("Ada"), json!(1)]);
    }

    #[test]
    fn update_push_is_rejected_for_sql() {
        let update = Update::parse(&json!({"$push": {"tags": "x"}})).unwrap();
        let err = translate_update(&update, SqlDialect::Postgres, 0).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedOperation);
    }

    #[test]
    fn update_params_respect_offset() {
        let update = Update::parse(&json!({"$set": {"a": 1, "b": 2}})).unwrap();
        let assignments = translate_update(&update, SqlDialect::Mssql, 3).unwrap();
        assert_eq!(assignments.clause, "\"a\" = @p4, \"b\" = @p5");
    }
}

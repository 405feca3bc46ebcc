use serde_json::Value;

use crate::Document;
use crate::error::DbError;
use crate::filter::Filter;
use crate::options::QueryOptions;
use crate::sql_dialect::SqlDialect;
use crate::sql_translator::{translate_filter, translate_update};
use crate::update::Update;

/// A complete statement ready for the executor: SQL text plus ordered params.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Assemble a SELECT with projection, WHERE, ORDER BY, and pagination.
pub fn build_select(
    table: &str,
    filter: &Filter,
    options: &QueryOptions,
    dialect: SqlDialect,
) -> Result<BuiltStatement, DbError> {
    let cond = translate_filter(filter, dialect, 0)?;
    let columns = projected_columns(options, dialect);
    let quoted_table = dialect.quote_identifier(table);

    let limit = options.limit;
    let skip = options.skip.filter(|n| *n > 0);

    let mut sql = String::new();
    sql.push_str("SELECT ");
    if dialect == SqlDialect::Mssql && skip.is_none() {
        if let Some(n) = limit {
            sql.push_str(&format!("TOP({}) ", n));
        }
    }
    sql.push_str(&columns);
    sql.push_str(" FROM ");
    sql.push_str(&quoted_table);

    if !cond.is_trivial() {
        sql.push_str(" WHERE ");
        sql.push_str(&cond.clause);
    }

    if !options.sort.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&order_by(options, dialect));
    }

    match dialect {
        SqlDialect::Mssql => {
            if let Some(n) = skip {
                // OFFSET/FETCH requires an ORDER BY clause.
                if options.sort.is_empty() {
                    sql.push_str(" ORDER BY (SELECT NULL)");
                }
                sql.push_str(&format!(" OFFSET {} ROWS", n));
                if let Some(m) = limit {
                    sql.push_str(&format!(" FETCH NEXT {} ROWS ONLY", m));
                }
            }
        }
        SqlDialect::Postgres => {
            if let Some(n) = limit {
                sql.push_str(&format!(" LIMIT {}", n));
            }
            if let Some(m) = skip {
                sql.push_str(&format!(" OFFSET {}", m));
            }
        }
        SqlDialect::Mysql => match (limit, skip) {
            (Some(n), Some(m)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", n, m)),
            (Some(n), None) => sql.push_str(&format!(" LIMIT {}", n)),
            // MySQL cannot OFFSET without LIMIT; the documented idiom is an
            // effectively unbounded limit.
            (None, Some(m)) => sql.push_str(&format!(" LIMIT 18446744073709551615 OFFSET {}", m)),
            (None, None) => {}
        },
        SqlDialect::Sqlite => match (limit, skip) {
            (Some(n), Some(m)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", n, m)),
            (Some(n), None) => sql.push_str(&format!(" LIMIT {}", n)),
            (None, Some(m)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", m)),
            (None, None) => {}
        },
    }

    Ok(BuiltStatement {
        sql,
        params: cond.params,
    })
}

/// Assemble `SELECT COUNT(*) AS count`.
pub fn build_count(
    table: &str,
    filter: &Filter,
    dialect: SqlDialect,
) -> Result<BuiltStatement, DbError> {
    let cond = translate_filter(filter, dialect, 0)?;
    let mut sql = format!(
        "SELECT COUNT(*) AS count FROM {}",
        dialect.quote_identifier(table)
    );
    if !cond.is_trivial() {
        sql.push_str(" WHERE ");
        sql.push_str(&cond.clause);
    }
    Ok(BuiltStatement {
        sql,
        params: cond.params,
    })
}

/// Assemble a single-row INSERT from a document.
pub fn build_insert(
    table: &str,
    doc: &Document,
    dialect: SqlDialect,
) -> Result<BuiltStatement, DbError> {
    build_insert_many(table, std::slice::from_ref(doc), dialect)
}

/// Assemble a multi-row INSERT.
///
/// All rows share the column list of the first row; parameter indices are
/// globally increasing across value tuples.
pub fn build_insert_many(
    table: &str,
    docs: &[Document],
    dialect: SqlDialect,
) -> Result<BuiltStatement, DbError> {
    let first = docs.first().ok_or_else(|| {
        DbError::query_error(
            "Insert requires at least one document.",
            "Pass a non-empty array of documents.",
        )
    })?;
    if first.is_empty() {
        return Err(DbError::query_error(
            "Insert document has no fields.",
            "Provide at least one field/value pair.",
        ));
    }

    let columns: Vec<&str> = first.keys().map(String::as_str).collect();
    let column_list = columns
        .iter()
        .map(|c| dialect.quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ");

    let mut params = Vec::with_capacity(columns.len() * docs.len());
    let mut tuples = Vec::with_capacity(docs.len());
    for doc in docs {
        let mut placeholders = Vec::with_capacity(columns.len());
        for column in &columns {
            params.push(doc.get(*column).cloned().unwrap_or(Value::Null));
            placeholders.push(dialect.placeholder(params.len()));
        }
        tuples.push(format!("({})", placeholders.join(", ")));
    }

    Ok(BuiltStatement {
        sql: format!(
            "INSERT INTO {} ({}) VALUES {}",
            dialect.quote_identifier(table),
            column_list,
            tuples.join(", ")
        ),
        params,
    })
}

/// Assemble an UPDATE; `single_row` applies the dialect's one-row targeting.
///
/// A trivial WHERE (`1=1`) is emitted without a WHERE clause and without the
/// single-row rewrite: the guardrail layer has already required explicit
/// caller consent for unbounded updates, so a trivial filter here means "all
/// rows" on purpose. Disabling guardrails out-of-band removes that net.
pub fn build_update(
    table: &str,
    update: &Update,
    filter: &Filter,
    dialect: SqlDialect,
    single_row: bool,
) -> Result<BuiltStatement, DbError> {
    let assignments = translate_update(update, dialect, 0)?;
    let cond = translate_filter(filter, dialect, assignments.params.len())?;
    let quoted_table = dialect.quote_identifier(table);

    let mut params = assignments.params;
    let trivial = cond.is_trivial();

    let sql = if trivial {
        format!("UPDATE {} SET {}", quoted_table, assignments.clause)
    } else if !single_row {
        params.extend(cond.params);
        format!(
            "UPDATE {} SET {} WHERE {}",
            quoted_table, assignments.clause, cond.clause
        )
    } else {
        params.extend(cond.params);
        match dialect {
            SqlDialect::Postgres => format!(
                "UPDATE {t} SET {set} WHERE ctid = (SELECT ctid FROM {t} WHERE {cond} LIMIT 1)",
                t = quoted_table,
                set = assignments.clause,
                cond = cond.clause
            ),
            SqlDialect::Sqlite => format!(
                "UPDATE {t} SET {set} WHERE rowid = (SELECT rowid FROM {t} WHERE {cond} LIMIT 1)",
                t = quoted_table,
                set = assignments.clause,
                cond = cond.clause
            ),
            SqlDialect::Mysql => format!(
                "UPDATE {} SET {} WHERE {} LIMIT 1",
                quoted_table, assignments.clause, cond.clause
            ),
            SqlDialect::Mssql => format!(
                "UPDATE TOP(1) {} SET {} WHERE {}",
                quoted_table, assignments.clause, cond.clause
            ),
        }
    };

    Ok(BuiltStatement { sql, params })
}

/// Assemble a DELETE; `single_row` applies the dialect's one-row targeting.
///
/// The trivial-WHERE coupling documented on [`build_update`] applies here too.
pub fn build_delete(
    table: &str,
    filter: &Filter,
    dialect: SqlDialect,
    single_row: bool,
) -> Result<BuiltStatement, DbError> {
    let cond = translate_filter(filter, dialect, 0)?;
    let quoted_table = dialect.quote_identifier(table);
    let trivial = cond.is_trivial();

    let sql = if trivial {
        format!("DELETE FROM {}", quoted_table)
    } else if !single_row {
        format!("DELETE FROM {} WHERE {}", quoted_table, cond.clause)
    } else {
        match dialect {
            SqlDialect::Postgres => format!(
                "DELETE FROM {t} WHERE ctid = (SELECT ctid FROM {t} WHERE {cond} LIMIT 1)",
                t = quoted_table,
                cond = cond.clause
            ),
            SqlDialect::Sqlite => format!(
                "DELETE FROM {t} WHERE rowid = (SELECT rowid FROM {t} WHERE {cond} LIMIT 1)",
                t = quoted_table,
                cond = cond.clause
            ),
            SqlDialect::Mysql => {
                format!("DELETE FROM {} WHERE {} LIMIT 1", quoted_table, cond.clause)
            }
            SqlDialect::Mssql => {
                format!("DELETE TOP(1) FROM {} WHERE {}", quoted_table, cond.clause)
            }
        }
    };

    Ok(BuiltStatement {
        sql,
        params: cond.params,
    })
}

fn projected_columns(options: &QueryOptions, dialect: SqlDialect) -> String {
    match options
        .projection
        .as_ref()
        .and_then(|p| p.included_fields())
    {
        Some(fields) => fields
            .iter()
            .map(|f| dialect.quote_identifier(f))
            .collect::<Vec<_>>()
            .join(", "),
        // Exclusion projections select * and strip post-fetch.
        None => "*".to_string(),
    }
}

fn order_by(options: &QueryOptions, dialect: SqlDialect) -> String {
    options
        .sort
        .iter()
        .map(|(field, order)| {
            format!("{} {}", dialect.quote_identifier(field), order.sql_keyword())
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filter(value: serde_json::Value) -> Filter {
        Filter::parse(&value).unwrap()
    }

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn plain_select_star() {
        let stmt = build_select(
            "users",
            &Filter::empty(),
            &QueryOptions::default(),
            SqlDialect::Postgres,
        )
        .unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM \"users\"");
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn select_with_filter_sort_and_pagination() {
        let options = QueryOptions::parse(&json!({
            "sort": {"age": -1},
            "limit": 10,
            "skip": 20,
        }))
        .unwrap();
        let stmt = build_select(
            "users",
            &filter(json!({"active": true})),
            &options,
            SqlDialect::Postgres,
        )
        .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT * FROM \"users\" WHERE \"active\" = $1 ORDER BY \"age\" DESC LIMIT 10 OFFSET 20"
        );
        assert_eq!(stmt.params, vec![json!(true)]);
    }

    #[test]
    fn inclusion_projection_lists_columns() {
        let options = QueryOptions::parse(&json!({"projection": {"name": 1, "email": 1}})).unwrap();
        let stmt =
            build_select("users", &Filter::empty(), &options, SqlDialect::Sqlite).unwrap();
        assert_eq!(stmt.sql, "SELECT \"name\", \"email\" FROM \"users\"");
    }

    #[test]
    fn exclusion_projection_selects_star() {
        let options = QueryOptions::parse(&json!({"projection": {"secret": 0}})).unwrap();
        let stmt =
            build_select("users", &Filter::empty(), &options, SqlDialect::Sqlite).unwrap();
        assert_eq!(stmt.sql, "SELECT * FROM \"users\"");
    }

    #[test]
    fn mssql_top_when_limit_without_skip() {
        let options = QueryOptions::default().with_limit(10);
        let stmt = build_select("users", &Filter::empty(), &options, SqlDialect::Mssql).unwrap();
        assert_eq!(stmt.sql, "SELECT TOP(10) * FROM \"users\"");
    }

    #[test]
    fn mssql_offset_fetch_when_skip_and_limit() {
        let options = QueryOptions::default().with_limit(10).with_skip(20);
        let stmt = build_select("users", &Filter::empty(), &options, SqlDialect::Mssql).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT * FROM \"users\" ORDER BY (SELECT NULL) OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY"
        );
    }

    #[test]
    fn mssql_offset_only_when_skip_without_limit() {
        let options = QueryOptions::default().with_skip(20);
        let stmt = build_select("users", &Filter::empty(), &options, SqlDialect::Mssql).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT * FROM \"users\" ORDER BY (SELECT NULL) OFFSET 20 ROWS"
        );
    }

    #[test]
    fn mssql_keeps_caller_sort_with_offset() {
        let options = QueryOptions::parse(&json!({"sort": {"id": 1}, "skip": 5, "limit": 5}))
            .unwrap();
        let stmt = build_select("users", &Filter::empty(), &options, SqlDialect::Mssql).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT * FROM \"users\" ORDER BY \"id\" ASC OFFSET 5 ROWS FETCH NEXT 5 ROWS ONLY"
        );
    }

    #[test]
    fn mssql_zero_skip_counts_as_absent() {
        let options = QueryOptions::default().with_limit(7).with_skip(0);
        let stmt = build_select("users", &Filter::empty(), &options, SqlDialect::Mssql).unwrap();
        assert_eq!(stmt.sql, "SELECT TOP(7) * FROM \"users\"");
    }

    #[test]
    fn count_statement() {
        let stmt = build_count("users", &filter(json!({"active": true})), SqlDialect::Mysql)
            .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT COUNT(*) AS count FROM \"users\" WHERE \"active\" = ?"
        );
    }

    #[test]
    fn insert_lists_columns_and_placeholders() {
        let stmt = build_insert(
            "users",
            &doc(json!({"name": "Ada", "age": 36})),
            SqlDialect::Postgres,
        )
        .unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"users\" (\"name\", \"age\") VALUES ($1, $2)"
        );
        assert_eq!(stmt.params, vec![json!("Ada"), json!(36)]);
    }

    #[test]
    fn batch_insert_shares_columns_with_global_indices() {
        let docs = vec![
            doc(json!({"name": "Ada", "age": 36})),
            doc(json!({"name": "Grace", "age": 45})),
        ];
        let stmt = build_insert_many("users", &docs, SqlDialect::Postgres).unwrap();
        assert_eq!(
            stmt.sql,
            "INSERT INTO \"users\" (\"name\", \"age\") VALUES ($1, $2), ($3, $4)"
        );
        assert_eq!(
            stmt.params,
            vec![json!("Ada"), json!(36), json!("Grace"), json!(45)]
        );
    }

    #[test]
    fn batch_insert_fills_missing_columns_with_null() {
        let docs = vec![doc(json!({"name": "Ada", "age": 36})), doc(json!({"name": "Linus"}))];
        let stmt = build_insert_many("users", &docs, SqlDialect::Sqlite).unwrap();
        assert_eq!(stmt.params[3], Value::Null);
    }

    #[test]
    fn update_params_start_after_set_values() {
        let update = Update::parse(&json!({"$set": {"name": "Ada"}})).unwrap();
        let stmt = build_update(
            "users",
            &update,
            &filter(json!({"id": 7})),
            SqlDialect::Postgres,
            false,
        )
        .unwrap();
        assert_eq!(
            stmt.sql,
            "UPDATE \"users\" SET \"name\" = $1 WHERE \"id\" = $2"
        );
        assert_eq!(stmt.params, vec![json!("Ada"), json!(7)]);
    }

    #[test]
    fn single_row_update_per_dialect() {
        let update = Update::parse(&json!({"$set": {"seen": true}})).unwrap();
        let f = filter(json!({"id": 7}));

        let pg = build_update("users", &update, &f, SqlDialect::Postgres, true).unwrap();
        assert_eq!(
            pg.sql,
            "UPDATE \"users\" SET \"seen\" = $1 WHERE ctid = \
             (SELECT ctid FROM \"users\" WHERE \"id\" = $2 LIMIT 1)"
        );

        let mysql = build_update("users", &update, &f, SqlDialect::Mysql, true).unwrap();
        assert_eq!(
            mysql.sql,
            "UPDATE \"users\" SET \"seen\" = ? WHERE \"id\" = ? LIMIT 1"
        );

        let sqlite = build_update("users", &update, &f, SqlDialect::Sqlite, true).unwrap();
        assert_eq!(
            sqlite.sql,
            "UPDATE \"users\" SET \"seen\" = ? WHERE rowid = \
             (SELECT rowid FROM \"users\" WHERE \"id\" = ? LIMIT 1)"
        );

        let mssql = build_update("users", &update, &f, SqlDialect::Mssql, true).unwrap();
        assert_eq!(
            mssql.sql,
            "UPDATE TOP(1) \"users\" SET \"seen\" = @p1 WHERE \"id\" = @p2"
        );
    }

    #[test]
    fn trivial_filter_skips_single_row_targeting() {
        let update = Update::parse(&json!({"$set": {"seen": true}})).unwrap();
        let stmt = build_update(
            "users",
            &update,
            &Filter::empty(),
            SqlDialect::Postgres,
            true,
        )
        .unwrap();
        assert_eq!(stmt.sql, "UPDATE \"users\" SET \"seen\" = $1");

        let stmt = build_update(
            "users",
            &update,
            &Filter::empty(),
            SqlDialect::Mssql,
            true,
        )
        .unwrap();
        assert_eq!(stmt.sql, "UPDATE \"users\" SET \"seen\" = @p1");
    }

    #[test]
    fn single_row_delete_per_dialect() {
        let f = filter(json!({"id": 7}));

        let pg = build_delete("users", &f, SqlDialect::Postgres, true).unwrap();
        assert_eq!(
            pg.sql,
            "DELETE FROM \"users\" WHERE ctid = \
             (SELECT ctid FROM \"users\" WHERE \"id\" = $1 LIMIT 1)"
        );

        let mysql = build_delete("users", &f, SqlDialect::Mysql, true).unwrap();
        assert_eq!(mysql.sql, "DELETE FROM \"users\" WHERE \"id\" = ? LIMIT 1");

        let mssql = build_delete("users", &f, SqlDialect::Mssql, true).unwrap();
        assert_eq!(mssql.sql, "DELETE TOP(1) FROM \"users\" WHERE \"id\" = @p1");
    }

    #[test]
    fn delete_many_with_empty_filter_has_no_where() {
        let stmt = build_delete("users", &Filter::empty(), SqlDialect::Postgres, false).unwrap();
        assert_eq!(stmt.sql, "DELETE FROM \"users\"");
    }

    #[test]
    fn trivial_filter_skips_single_row_delete_targeting() {
        for dialect in [
            SqlDialect::Postgres,
            SqlDialect::Mysql,
            SqlDialect::Mssql,
            SqlDialect::Sqlite,
        ] {
            let stmt = build_delete("users", &Filter::empty(), dialect, true).unwrap();
            assert_eq!(stmt.sql, "DELETE FROM \"users\"", "dialect {dialect}");
        }
    }
}

use crate::backend::BackendKind;
use crate::error::{DbError, ErrorCode};

/// Mapping rule for relational driver errors: vendor codes (SQLSTATE or
/// numeric) and lowercase message substrings that identify one normalized
/// code. Maintained as data so new driver spellings are one-line additions.
struct SqlErrorRule {
    codes: &'static [&'static str],
    substrings: &'static [&'static str],
    code: ErrorCode,
}

const SQL_ERROR_RULES: &[SqlErrorRule] = &[
    SqlErrorRule {
        codes: &["23505", "1062", "2627", "2601", "23000"],
        substrings: &["duplicate key", "unique constraint", "duplicate entry"],
        code: ErrorCode::DuplicateKey,
    },
    SqlErrorRule {
        codes: &["42P01", "1146", "208"],
        substrings: &["no such table", "relation does not exist", "doesn't exist"],
        code: ErrorCode::CollectionNotFound,
    },
    SqlErrorRule {
        codes: &["28P01", "28000", "1045", "18456"],
        substrings: &["password authentication failed", "access denied", "login failed"],
        code: ErrorCode::AuthenticationFailed,
    },
    SqlErrorRule {
        codes: &["57014", "1205"],
        substrings: &["statement timeout", "timed out", "lock wait timeout"],
        code: ErrorCode::Timeout,
    },
    SqlErrorRule {
        codes: &["53300", "1040"],
        substrings: &["too many connections", "remaining connection slots"],
        code: ErrorCode::PoolExhausted,
    },
    SqlErrorRule {
        codes: &["08003", "08006", "08S01", "2006", "2013"],
        substrings: &[
            "connection reset",
            "server has gone away",
            "terminating connection",
            "broken pipe",
        ],
        code: ErrorCode::ConnectionLost,
    },
    SqlErrorRule {
        codes: &["08001", "08004"],
        substrings: &["connection refused", "could not connect"],
        code: ErrorCode::ConnectionFailed,
    },
    SqlErrorRule {
        codes: &["23502", "23503", "23514", "22001"],
        substrings: &["not-null constraint", "foreign key constraint", "check constraint"],
        code: ErrorCode::ValidationError,
    },
];

/// Normalize a relational driver error from its vendor code and message.
pub fn map_sql_error(
    vendor_code: Option<&str>,
    message: &str,
    collection: Option<&str>,
) -> DbError {
    let lowered = message.to_lowercase();
    let code = SQL_ERROR_RULES
        .iter()
        .find(|rule| {
            vendor_code.is_some_and(|c| rule.codes.contains(&c))
                || rule.substrings.iter().any(|s| lowered.contains(s))
        })
        .map(|rule| rule.code)
        .unwrap_or(ErrorCode::QueryError);

    normalized(code, message, collection)
}

/// Normalize a document-store server error from its numeric code and message.
pub fn map_document_error(
    server_code: Option<i64>,
    message: &str,
    collection: Option<&str>,
) -> DbError {
    let lowered = message.to_lowercase();
    let code = match server_code {
        Some(11000) | Some(11001) => ErrorCode::DuplicateKey,
        Some(26) => ErrorCode::CollectionNotFound,
        Some(13) | Some(18) => ErrorCode::AuthenticationFailed,
        Some(50) => ErrorCode::Timeout,
        Some(6) | Some(89) => ErrorCode::ConnectionFailed,
        Some(91) => ErrorCode::ConnectionLost,
        _ if lowered.contains("duplicate key") => ErrorCode::DuplicateKey,
        _ if lowered.contains("ns not found") => ErrorCode::CollectionNotFound,
        _ if lowered.contains("authentication failed") || lowered.contains("unauthorized") => {
            ErrorCode::AuthenticationFailed
        }
        _ if lowered.contains("exceeded time limit") => ErrorCode::Timeout,
        _ if lowered.contains("connection refused") => ErrorCode::ConnectionFailed,
        _ => ErrorCode::QueryError,
    };

    normalized(code, message, collection).with_backend(BackendKind::Mongodb)
}

/// Normalize a search-engine error from its HTTP status and error type token.
pub fn map_search_error(
    status: Option<u16>,
    error_type: &str,
    message: &str,
    collection: Option<&str>,
) -> DbError {
    let lowered = message.to_lowercase();
    let code = match (status, error_type) {
        (_, "index_not_found_exception") => ErrorCode::CollectionNotFound,
        (Some(404), _) => ErrorCode::CollectionNotFound,
        (_, "security_exception") | (Some(401), _) | (Some(403), _) => {
            ErrorCode::AuthenticationFailed
        }
        (_, "timeout_exception") | (Some(408), _) | (Some(504), _) => ErrorCode::Timeout,
        (_, "circuit_breaking_exception") | (_, "es_rejected_execution_exception")
        | (Some(429), _) => ErrorCode::PoolExhausted,
        (_, "mapper_parsing_exception") | (_, "strict_dynamic_mapping_exception") => {
            ErrorCode::SchemaMismatch
        }
        (_, "parsing_exception") | (_, "query_shard_exception") => ErrorCode::QueryError,
        _ if lowered.contains("connection refused") => ErrorCode::ConnectionFailed,
        _ => ErrorCode::QueryError,
    };

    normalized(code, message, collection).with_backend(BackendKind::Elastic)
}

/// Build the normalized error with a fix string tuned to the code.
fn normalized(code: ErrorCode, message: &str, collection: Option<&str>) -> DbError {
    let sentence = single_sentence(message);
    let fix = fix_for(code, collection);
    let mut err = DbError::new(code, sentence, fix);
    if let Some(name) = collection {
        err = err.with_collection(name);
    }
    err
}

fn single_sentence(message: &str) -> String {
    let trimmed = message.trim();
    let head = trimmed.split('\n').next().unwrap_or(trimmed);
    if head.ends_with('.') {
        head.to_string()
    } else {
        format!("{}.", head)
    }
}

fn fix_for(code: ErrorCode, collection: Option<&str>) -> String {
    match code {
        ErrorCode::DuplicateKey => {
            "Use update_one to modify the existing record, or check existence with query_one \
             first."
                .to_string()
        }
        ErrorCode::CollectionNotFound => match collection {
            Some(name) => format!(
                "Call ensure_collections for '{}', or register its schema at startup.",
                name
            ),
            None => "Call ensure_collections, or register the collection schema at startup."
                .to_string(),
        },
        ErrorCode::AuthenticationFailed => {
            "Check the username and password in the connection URI.".to_string()
        }
        ErrorCode::Timeout => {
            "Narrow the filter or raise the driver's statement timeout.".to_string()
        }
        ErrorCode::PoolExhausted => {
            "Raise the pool option to 'high' or reduce concurrent operations.".to_string()
        }
        ErrorCode::ConnectionLost => {
            "The reconnect controller retries automatically; verify the server is reachable."
                .to_string()
        }
        ErrorCode::ConnectionFailed => {
            "Verify the host and port, and that the server is accepting connections.".to_string()
        }
        ErrorCode::ValidationError => {
            "Run validate with the document to see the failing fields.".to_string()
        }
        ErrorCode::SchemaMismatch => {
            "Align the registered schema with the backend mapping, then retry.".to_string()
        }
        _ => "Inspect the emitted statement with explain before retrying.".to_string(),
    }
}

/// Suggestions for method names from other client libraries.
const METHOD_SUGGESTIONS: &[(&str, &str)] = &[
    ("find", "query_many"),
    ("findOne", "query_one"),
    ("findMany", "query_many"),
    ("aggregate", "query_many"),
    ("bulkWrite", "batch"),
    ("countDocuments", "count"),
    ("estimatedDocumentCount", "count"),
    ("insert", "insert_one"),
    ("save", "insert_one"),
    ("remove", "delete_many"),
    ("replaceOne", "update_one"),
    ("findOneAndUpdate", "update_one"),
    ("findOneAndDelete", "delete_one"),
];

/// Self-correcting helper: map a foreign method name to the API equivalent.
pub fn suggest_operation(method: &str) -> Option<DbError> {
    METHOD_SUGGESTIONS
        .iter()
        .find(|(foreign, _)| *foreign == method)
        .map(|(foreign, ours)| {
            DbError::unsupported_operation(
                format!("The method '{}' is not part of this API.", foreign),
                format!("Use {} instead.", ours),
            )
        })
}

/// Self-correcting helper: unknown collection with a nearest-name suggestion
/// at Levenshtein distance ≤ 3 against the registered set.
pub fn suggest_collection(requested: &str, registered: &[String]) -> DbError {
    let nearest = registered
        .iter()
        .map(|name| (name, levenshtein(requested, name)))
        .filter(|(_, distance)| *distance <= 3)
        .min_by_key(|(_, distance)| *distance)
        .map(|(name, _)| name.clone());

    let fix = match nearest {
        Some(name) => format!("Did you mean '{}'?", name),
        None => match registered.is_empty() {
            true => "Register the collection schema at startup, then call ensure_collections."
                .to_string(),
            false => format!("Registered collections: {}.", registered.join(", ")),
        },
    };

    DbError::new(
        ErrorCode::CollectionNotFound,
        format!("Collection '{}' is not registered.", requested),
        fix,
    )
    .with_collection(requested)
}

/// Classic two-row Levenshtein distance; inputs are short collection names.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_key_by_sqlstate() {
        let err = map_sql_error(Some("23505"), "unique violation", Some("users"));
        assert_eq!(err.code, ErrorCode::DuplicateKey);
        assert!(!err.retryable);
        assert!(err.fix.contains("update_one"));
        assert_eq!(err.collection.as_deref(), Some("users"));
    }

    #[test]
    fn duplicate_key_by_message_substring() {
        let err = map_sql_error(None, "Duplicate entry 'x' for key 'users.email'", None);
        assert_eq!(err.code, ErrorCode::DuplicateKey);
    }

    #[test]
    fn missing_table_points_at_ensure_collections() {
        let err = map_sql_error(Some("42P01"), "relation \"users\" does not exist", Some("users"));
        assert_eq!(err.code, ErrorCode::CollectionNotFound);
        assert!(err.fix.contains("ensure_collections"));
    }

    #[test]
    fn connection_codes_are_retryable() {
        let lost = map_sql_error(Some("08006"), "connection reset by peer", None);
        assert_eq!(lost.code, ErrorCode::ConnectionLost);
        assert!(lost.retryable);

        let timeout = map_sql_error(Some("57014"), "canceling due to statement timeout", None);
        assert_eq!(timeout.code, ErrorCode::Timeout);
        assert!(timeout.retryable);
    }

    #[test]
    fn unknown_sql_error_falls_back_to_query_error() {
        let err = map_sql_error(Some("99999"), "strange failure", None);
        assert_eq!(err.code, ErrorCode::QueryError);
        assert!(err.fix.contains("explain"));
    }

    #[test]
    fn document_error_codes() {
        assert_eq!(
            map_document_error(Some(11000), "E11000 duplicate key error", None).code,
            ErrorCode::DuplicateKey
        );
        assert_eq!(
            map_document_error(Some(26), "ns not found", Some("users")).code,
            ErrorCode::CollectionNotFound
        );
        assert_eq!(
            map_document_error(None, "connection refused", None).code,
            ErrorCode::ConnectionFailed
        );
    }

    #[test]
    fn search_error_types() {
        assert_eq!(
            map_search_error(Some(404), "index_not_found_exception", "no such index", Some("users"))
                .code,
            ErrorCode::CollectionNotFound
        );
        assert_eq!(
            map_search_error(Some(429), "es_rejected_execution_exception", "queue full", None).code,
            ErrorCode::PoolExhausted
        );
        assert_eq!(
            map_search_error(Some(400), "parsing_exception", "unknown query", None).code,
            ErrorCode::QueryError
        );
        assert_eq!(
            map_search_error(Some(400), "mapper_parsing_exception", "failed to parse field", None)
                .code,
            ErrorCode::SchemaMismatch
        );
    }

    #[test]
    fn method_suggestions() {
        let err = suggest_operation("findOne").expect("known foreign method");
        assert_eq!(err.code, ErrorCode::UnsupportedOperation);
        assert!(err.fix.contains("query_one"));

        assert!(suggest_operation("bulkWrite").unwrap().fix.contains("batch"));
        assert!(suggest_operation("queryOne").is_none());
    }

    #[test]
    fn collection_suggestion_within_distance_three() {
        let registered = vec!["users".to_string(), "orders".to_string()];
        let err = suggest_collection("user", &registered);
        assert_eq!(err.code, ErrorCode::CollectionNotFound);
        assert!(err.fix.contains("'users'"));

        let err = suggest_collection("completely_different", &registered);
        assert!(err.fix.contains("Registered collections"));
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("users", "users"), 0);
        assert_eq!(levenshtein("user", "users"), 1);
        assert_eq!(levenshtein("usres", "users"), 2);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
    }
}

//! Core of the unified database access layer: the filter/update algebra and
//! its translators, the SQL builder, the request-pipeline building blocks
//! (sanitizer, guardrails, timestamp injection, events, reconnect), and the
//! adapter and executor contracts the backend crates implement.

mod adapter;
mod backend;
mod config;
mod error;
mod error_map;
mod events;
mod executor;
mod filter;
mod guardrails;
mod logger;
mod options;
mod receipt;
mod reconnect;
mod sanitize;
mod schema;
mod schema_registry;
mod search_translator;
mod sql_builder;
mod sql_dialect;
mod sql_translator;
mod timestamps;
mod update;

pub use adapter::{
    BatchStep, CollectionFacts, ConnectionState, ConnectionStatus, DatabaseAdapter,
    ExplainOutput, JoinKind, LookupSpec, ReconnectStatus, TransactionScope,
    run_batch_sequential,
};
pub use backend::{BackendFamily, BackendKind, redact_uri};
pub use config::{ConnectConfig, ElasticOptions, LoggingMode, PoolSize};
pub use error::{DbError, ErrorCode};
pub use error_map::{
    map_document_error, map_search_error, map_sql_error, suggest_collection, suggest_operation,
};
pub use events::{Event, EventBus, EventHandler, EventKind};
pub use executor::{
    BulkOp, BulkOutcome, DocFindOptions, DocumentExecutor, MutationOutcome, PoolStats,
    SearchExecutor, SqlExecutor, SqlOutcome, TransactionToken,
};
pub use filter::{
    Clause, FieldCond, Filter, LOGICAL_OPERATORS, LogicalOp, Operator, SUPPORTED_OPERATORS,
};
pub use guardrails::check_guardrails;
pub use logger::OperationLogger;
pub use options::{ConfirmToken, Projection, QueryOptions, SortOrder};
pub use receipt::{OperationKind, WriteReceipt};
pub use reconnect::{ReconnectController, ReconnectPolicy, base_delay_ms};
pub use sanitize::{
    FieldSelector, RESERVED_SEARCH_FIELDS, SanitizeRule, TransformFn, apply_sanitize_rules,
    check_field_whitelist, check_filter_regexes, check_index_name, check_regex_complexity,
    check_reserved_fields,
};
pub use schema::{
    CollectionSchema, FieldKind, FieldSpec, IndexSpec, ValidationIssue,
};
pub use schema_registry::{IndexRegistry, SchemaRegistry};
pub use search_translator::{
    MutationScript, translate_filter as translate_to_search,
    translate_projection as translate_search_projection, translate_sort as translate_search_sort,
    translate_update as translate_search_update,
};
pub use sql_builder::{
    BuiltStatement, build_count, build_delete, build_insert, build_insert_many, build_select,
    build_update,
};
pub use sql_dialect::{PlaceholderStyle, SqlDialect};
pub use sql_translator::{
    SqlAssignments, SqlCondition, translate_filter as translate_to_sql,
    translate_update as translate_update_to_sql,
};
pub use timestamps::{TimestampConfig, inject_insert_timestamps, inject_update_timestamps};
pub use update::{SUPPORTED_UPDATE_OPERATORS, Update};

pub use chrono;
pub use serde_json;

/// A document: a JSON object with caller-supplied key order preserved.
pub type Document = serde_json::Map<String, serde_json::Value>;

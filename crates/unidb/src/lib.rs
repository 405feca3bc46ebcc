//! Unified database access layer: one document-style query API over a
//! document store, four relational dialects, and a search engine.
//!
//! [`Database::connect`] detects the backend from the connection URI, wires
//! the matching adapter over the caller-supplied executor, and threads every
//! operation through the pipeline: sanitize → guardrail → schema-validate →
//! timestamp-inject → adapter → receipt → event.

mod database;
mod discovery;
mod transaction;

pub use database::{Database, ExecutorHandle, parse_operation_name};
pub use discovery::{CollectionDescription, FieldDescription, IndexDescription};
pub use transaction::Transaction;

pub use unidb_core::{
    BackendFamily, BackendKind, CollectionSchema, ConfirmToken, ConnectConfig, ConnectionState,
    ConnectionStatus, DbError, Document, ErrorCode, Event, EventBus, EventKind, ExplainOutput,
    FieldKind, FieldSpec, Filter, IndexRegistry, IndexSpec, LoggingMode, LookupSpec,
    OperationKind, PoolSize, QueryOptions, ReconnectPolicy, SanitizeRule, SchemaRegistry,
    SortOrder, TimestampConfig, Update, ValidationIssue, WriteReceipt,
};

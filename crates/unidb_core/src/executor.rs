use std::any::Any;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::Document;
use crate::error::DbError;

/// Connection-pool figures reported by an executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PoolStats {
    pub active: u32,
    pub idle: u32,
    pub waiting: u32,
    pub max: u32,
}

/// Opaque token correlating operations with an open transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionToken(Uuid);

impl TransactionToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl Default for TransactionToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one SQL statement execution.
#[derive(Debug, Clone, Default)]
pub struct SqlOutcome {
    /// Result rows as JSON documents keyed by column name.
    pub rows: Vec<Document>,
    /// Rows affected by a write statement.
    pub affected: u64,
}

impl SqlOutcome {
    pub fn rows(rows: Vec<Document>) -> Self {
        Self { rows, affected: 0 }
    }

    pub fn affected(affected: u64) -> Self {
        Self {
            rows: Vec::new(),
            affected,
        }
    }
}

/// Result of a native mutation (document update or mutate-by-query).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationOutcome {
    pub matched: u64,
    pub modified: u64,
    pub upserted: u64,
}

/// Native find options passed to a document executor.
#[derive(Debug, Clone, Default)]
pub struct DocFindOptions {
    pub sort: Option<Value>,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
    pub projection: Option<Value>,
}

/// One entry of a search-engine bulk request.
#[derive(Debug, Clone)]
pub enum BulkOp {
    Index { doc: Document },
    Delete { id: String },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BulkOutcome {
    pub indexed: u64,
    pub deleted: u64,
}

/// Minimal execution contract over a relational driver pool.
///
/// The embedding application implements this with its driver of choice;
/// the relational adapter is the only consumer. Implementations normalize
/// driver errors with the mappers in [`crate::error_map`].
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    fn driver_name(&self) -> &str;

    async fn connect(&self) -> Result<(), DbError>;

    async fn close(&self) -> Result<(), DbError>;

    /// Lightweight liveness probe, typically `SELECT 1`.
    async fn ping(&self) -> Result<(), DbError>;

    /// Execute one parameterized statement, inside the given transaction
    /// when a token is supplied.
    async fn execute(
        &self,
        sql: &str,
        params: &[Value],
        tx: Option<&TransactionToken>,
    ) -> Result<SqlOutcome, DbError>;

    async fn begin(&self) -> Result<TransactionToken, DbError>;

    async fn commit(&self, tx: &TransactionToken) -> Result<(), DbError>;

    async fn rollback(&self, tx: &TransactionToken) -> Result<(), DbError>;

    fn pool_stats(&self) -> PoolStats;

    /// Raw driver-handle escape.
    fn as_any(&self) -> &dyn Any;
}

/// Minimal execution contract over a document-store driver.
///
/// Filters and updates arrive in the document algebra's raw JSON form; the
/// store speaks it natively.
#[async_trait]
pub trait DocumentExecutor: Send + Sync {
    fn driver_name(&self) -> &str;

    async fn connect(&self) -> Result<(), DbError>;

    async fn close(&self) -> Result<(), DbError>;

    async fn ping(&self) -> Result<(), DbError>;

    async fn find(
        &self,
        collection: &str,
        filter: &Value,
        options: &DocFindOptions,
        tx: Option<&TransactionToken>,
    ) -> Result<Vec<Document>, DbError>;

    async fn count(
        &self,
        collection: &str,
        filter: &Value,
        tx: Option<&TransactionToken>,
    ) -> Result<u64, DbError>;

    async fn insert(
        &self,
        collection: &str,
        documents: &[Document],
        tx: Option<&TransactionToken>,
    ) -> Result<u64, DbError>;

    async fn update(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
        many: bool,
        upsert: bool,
        tx: Option<&TransactionToken>,
    ) -> Result<MutationOutcome, DbError>;

    async fn delete(
        &self,
        collection: &str,
        filter: &Value,
        many: bool,
        tx: Option<&TransactionToken>,
    ) -> Result<u64, DbError>;

    async fn create_collection(&self, collection: &str) -> Result<(), DbError>;

    async fn create_index(
        &self,
        collection: &str,
        name: &str,
        keys: &Value,
        unique: bool,
    ) -> Result<(), DbError>;

    /// Open a session-backed transaction.
    async fn begin(&self) -> Result<TransactionToken, DbError>;

    async fn commit(&self, tx: &TransactionToken) -> Result<(), DbError>;

    async fn rollback(&self, tx: &TransactionToken) -> Result<(), DbError>;

    fn pool_stats(&self) -> PoolStats;

    fn as_any(&self) -> &dyn Any;
}

/// Minimal execution contract over a search-engine client.
#[async_trait]
pub trait SearchExecutor: Send + Sync {
    fn driver_name(&self) -> &str;

    async fn connect(&self) -> Result<(), DbError>;

    async fn close(&self) -> Result<(), DbError>;

    async fn ping(&self) -> Result<(), DbError>;

    /// Run a query DSL search and return document sources.
    async fn search(
        &self,
        index: &str,
        query: &Value,
        sort: &[Value],
        from: Option<u64>,
        size: Option<u64>,
        source: Option<&Value>,
    ) -> Result<Vec<Document>, DbError>;

    async fn count(&self, index: &str, query: &Value) -> Result<u64, DbError>;

    /// Bulk-index documents; returns the number indexed.
    async fn index_docs(&self, index: &str, documents: &[Document]) -> Result<u64, DbError>;

    async fn update_by_query(
        &self,
        index: &str,
        query: &Value,
        script: &Value,
        max_docs: Option<u64>,
    ) -> Result<MutationOutcome, DbError>;

    async fn delete_by_query(
        &self,
        index: &str,
        query: &Value,
        max_docs: Option<u64>,
    ) -> Result<u64, DbError>;

    async fn bulk(&self, index: &str, ops: &[BulkOp]) -> Result<BulkOutcome, DbError>;

    async fn ensure_index(&self, index: &str, mappings: &Value) -> Result<(), DbError>;

    fn pool_stats(&self) -> PoolStats;

    fn as_any(&self) -> &dyn Any;
}

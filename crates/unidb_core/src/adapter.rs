use std::any::Any;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::Document;
use crate::backend::BackendKind;
use crate::error::DbError;
use crate::executor::PoolStats;
use crate::filter::Filter;
use crate::options::QueryOptions;
use crate::receipt::{OperationKind, WriteReceipt};
use crate::schema::IndexSpec;
use crate::update::Update;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Reconnecting,
    Closed,
}

/// Reconnect figures included in the status output.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReconnectStatus {
    pub enabled: bool,
    pub attempts: u32,
    pub last_disconnect: Option<DateTime<Utc>>,
}

/// Uniform connection status across backends.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub backend: BackendKind,
    pub driver: String,
    /// Redacted URI; credentials are masked.
    pub uri: String,
    pub database: Option<String>,
    pub uptime_ms: u64,
    pub pool: PoolStats,
    pub reconnect: ReconnectStatus,
}

/// Join behavior when the local field is null.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Attach an empty sequence and return the row.
    Left,
    /// Treat the row as not found.
    Inner,
}

/// Cross-collection lookup specification.
#[derive(Debug, Clone)]
pub struct LookupSpec {
    pub from: String,
    pub local_field: String,
    pub foreign_field: String,
    pub alias: String,
    pub join: JoinKind,
    /// Attach only the first related row in place of the sequence.
    pub unwind: bool,
}

impl LookupSpec {
    pub fn new(
        from: impl Into<String>,
        local_field: impl Into<String>,
        foreign_field: impl Into<String>,
        alias: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            local_field: local_field.into(),
            foreign_field: foreign_field.into(),
            alias: alias.into(),
            join: JoinKind::Left,
            unwind: false,
        }
    }

    pub fn inner(mut self) -> Self {
        self.join = JoinKind::Inner;
        self
    }

    pub fn unwind(mut self) -> Self {
        self.unwind = true;
        self
    }

    /// Parse the wire form:
    /// `{from, local_field, foreign_field, as, join?, unwind?}`.
    pub fn parse(value: &Value) -> Result<Self, DbError> {
        let obj = value.as_object().ok_or_else(|| lookup_shape_error())?;
        let get = |key: &str| -> Result<String, DbError> {
            obj.get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(lookup_shape_error)
        };

        let mut spec = Self::new(
            get("from")?,
            get("local_field")?,
            get("foreign_field")?,
            get("as")?,
        );
        match obj.get("join").and_then(Value::as_str) {
            None | Some("left") => {}
            Some("inner") => spec.join = JoinKind::Inner,
            Some(other) => {
                return Err(DbError::query_error(
                    format!("Unknown join kind '{}'.", other),
                    "Use \"left\" or \"inner\".",
                ));
            }
        }
        if obj.get("unwind").and_then(Value::as_bool).unwrap_or(false) {
            spec.unwind = true;
        }
        Ok(spec)
    }
}

fn lookup_shape_error() -> DbError {
    DbError::query_error(
        "Lookup requires from, local_field, foreign_field, and as.",
        "Write {\"from\": \"orders\", \"local_field\": \"id\", \"foreign_field\": \
         \"user_id\", \"as\": \"orders\"}.",
    )
}

/// One step of a batch submission.
#[derive(Debug, Clone)]
pub enum BatchStep {
    InsertOne {
        collection: String,
        document: Document,
    },
    InsertMany {
        collection: String,
        documents: Vec<Document>,
    },
    UpdateOne {
        collection: String,
        filter: Filter,
        update: Update,
    },
    UpdateMany {
        collection: String,
        filter: Filter,
        update: Update,
    },
    DeleteOne {
        collection: String,
        filter: Filter,
    },
    DeleteMany {
        collection: String,
        filter: Filter,
    },
}

impl BatchStep {
    pub fn collection(&self) -> &str {
        match self {
            Self::InsertOne { collection, .. }
            | Self::InsertMany { collection, .. }
            | Self::UpdateOne { collection, .. }
            | Self::UpdateMany { collection, .. }
            | Self::DeleteOne { collection, .. }
            | Self::DeleteMany { collection, .. } => collection,
        }
    }

    pub fn operation(&self) -> OperationKind {
        match self {
            Self::InsertOne { .. } => OperationKind::InsertOne,
            Self::InsertMany { .. } => OperationKind::InsertMany,
            Self::UpdateOne { .. } => OperationKind::UpdateOne,
            Self::UpdateMany { .. } => OperationKind::UpdateMany,
            Self::DeleteOne { .. } => OperationKind::DeleteOne,
            Self::DeleteMany { .. } => OperationKind::DeleteMany,
        }
    }
}

/// Index list and document count returned by `describe_collection`.
#[derive(Debug, Clone, Default)]
pub struct CollectionFacts {
    pub indexes: Vec<IndexSpec>,
    pub document_count: u64,
}

/// The native query that would execute, without executing it.
#[derive(Debug, Clone, PartialEq)]
pub enum ExplainOutput {
    Sql { statement: String, params: Vec<Value> },
    DocumentCommand(Value),
    SearchQuery(Value),
}

impl ExplainOutput {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Sql { statement, params } => serde_json::json!({
                "backend_family": "relational",
                "statement": statement,
                "params": params,
            }),
            Self::DocumentCommand(command) => serde_json::json!({
                "backend_family": "document",
                "command": command,
            }),
            Self::SearchQuery(query) => serde_json::json!({
                "backend_family": "search",
                "query": query,
            }),
        }
    }
}

/// Uniform per-backend operation contract.
///
/// The router holds exactly one adapter; a transactional scope yields a
/// second instance of the same contract sharing the driver handle under a
/// transaction token. All methods are safe to call concurrently.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    fn backend(&self) -> BackendKind;

    async fn connect(&self) -> Result<(), DbError>;

    async fn close(&self) -> Result<(), DbError>;

    async fn ping(&self) -> Result<(), DbError>;

    fn status(&self) -> ConnectionStatus;

    async fn query_one(
        &self,
        collection: &str,
        filter: &Filter,
        options: &QueryOptions,
    ) -> Result<Option<Document>, DbError>;

    async fn query_many(
        &self,
        collection: &str,
        filter: &Filter,
        options: &QueryOptions,
    ) -> Result<Vec<Document>, DbError>;

    async fn query_with_lookup(
        &self,
        collection: &str,
        filter: &Filter,
        lookup: &LookupSpec,
        options: &QueryOptions,
    ) -> Result<Option<Document>, DbError>;

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, DbError>;

    async fn insert_one(
        &self,
        collection: &str,
        document: Document,
    ) -> Result<WriteReceipt, DbError>;

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<WriteReceipt, DbError>;

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> Result<WriteReceipt, DbError>;

    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> Result<WriteReceipt, DbError>;

    async fn delete_one(&self, collection: &str, filter: &Filter)
    -> Result<WriteReceipt, DbError>;

    async fn delete_many(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<WriteReceipt, DbError>;

    /// Open a transactional scope. Absent for the search backend.
    async fn begin_scope(&self) -> Result<Box<dyn TransactionScope>, DbError> {
        Err(DbError::unsupported_operation(
            "Transactions are not supported by this backend.",
            "Run the operations individually, or use batch for ordered execution.",
        )
        .with_backend(self.backend()))
    }

    /// Execute batch steps in order, accumulating counts into one receipt.
    ///
    /// The default runs steps sequentially through this contract; adapters
    /// override it to use transactions or a bulk endpoint.
    async fn run_batch(&self, steps: &[BatchStep]) -> Result<WriteReceipt, DbError> {
        run_batch_sequential(self, steps).await
    }

    async fn ensure_collections(&self, collections: &[String]) -> Result<(), DbError> {
        let _ = collections;
        Err(DbError::unsupported_operation(
            "ensure_collections is not supported by this backend.",
            "Create the collections with your migration tooling.",
        )
        .with_backend(self.backend()))
    }

    async fn ensure_indexes(&self, collection: &str) -> Result<(), DbError> {
        let _ = collection;
        Err(DbError::unsupported_operation(
            "ensure_indexes is not supported by this backend.",
            "Create the indexes with your migration tooling.",
        )
        .with_backend(self.backend()))
    }

    async fn describe_collection(&self, collection: &str) -> Result<CollectionFacts, DbError>;

    async fn document_count(&self, collection: &str) -> Result<u64, DbError>;

    /// Emit the native query text or object without executing it.
    fn explain(
        &self,
        operation: OperationKind,
        collection: &str,
        filter: &Filter,
        update: Option<&Update>,
        options: &QueryOptions,
    ) -> Result<ExplainOutput, DbError>;

    /// Raw driver-handle escape.
    fn raw(&self) -> &dyn Any;
}

/// A child adapter scoped to one open transaction.
#[async_trait]
pub trait TransactionScope: DatabaseAdapter + std::fmt::Debug {
    async fn commit(self: Box<Self>) -> Result<(), DbError>;

    async fn rollback(self: Box<Self>) -> Result<(), DbError>;
}

/// Run batch steps one by one through the adapter contract.
pub async fn run_batch_sequential<A>(
    adapter: &A,
    steps: &[BatchStep],
) -> Result<WriteReceipt, DbError>
where
    A: DatabaseAdapter + ?Sized,
{
    let mut receipt = WriteReceipt::new(OperationKind::Batch, "batch", adapter.backend());
    for step in steps {
        let step_receipt = match step {
            BatchStep::InsertOne {
                collection,
                document,
            } => adapter.insert_one(collection, document.clone()).await?,
            BatchStep::InsertMany {
                collection,
                documents,
            } => adapter.insert_many(collection, documents.clone()).await?,
            BatchStep::UpdateOne {
                collection,
                filter,
                update,
            } => adapter.update_one(collection, filter, update, false).await?,
            BatchStep::UpdateMany {
                collection,
                filter,
                update,
            } => adapter.update_many(collection, filter, update).await?,
            BatchStep::DeleteOne { collection, filter } => {
                adapter.delete_one(collection, filter).await?
            }
            BatchStep::DeleteMany { collection, filter } => {
                adapter.delete_many(collection, filter).await?
            }
        };
        receipt.absorb(&step_receipt);
    }
    Ok(receipt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_parse_accepts_the_wire_shape() {
        let spec = LookupSpec::parse(&json!({
            "from": "orders",
            "local_field": "id",
            "foreign_field": "user_id",
            "as": "orders",
            "join": "inner",
            "unwind": true,
        }))
        .unwrap();

        assert_eq!(spec.from, "orders");
        assert_eq!(spec.join, JoinKind::Inner);
        assert!(spec.unwind);
    }

    #[test]
    fn lookup_parse_defaults_to_left_join() {
        let spec = LookupSpec::parse(&json!({
            "from": "orders",
            "local_field": "id",
            "foreign_field": "user_id",
            "as": "orders",
        }))
        .unwrap();
        assert_eq!(spec.join, JoinKind::Left);
        assert!(!spec.unwind);
    }

    #[test]
    fn lookup_parse_rejects_missing_keys_and_bad_join() {
        assert!(LookupSpec::parse(&json!({"from": "orders"})).is_err());
        assert!(
            LookupSpec::parse(&json!({
                "from": "o", "local_field": "a", "foreign_field": "b", "as": "c",
                "join": "outer",
            }))
            .is_err()
        );
    }

    #[test]
    fn explain_output_to_json_tags_the_family() {
        let sql = ExplainOutput::Sql {
            statement: "SELECT 1".to_string(),
            params: vec![],
        };
        assert_eq!(sql.to_json()["backend_family"], "relational");

        let search = ExplainOutput::SearchQuery(json!({"match_all": {}}));
        assert_eq!(search.to_json()["backend_family"], "search");
    }
}

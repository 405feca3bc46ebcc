use std::any::Any;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use unidb_core::{
    BackendKind, BatchStep, BuiltStatement, CollectionFacts, ConnectionState, ConnectionStatus,
    DatabaseAdapter, DbError, Document, ExplainOutput, Filter, IndexRegistry, JoinKind,
    LookupSpec, OperationKind, QueryOptions, ReconnectPolicy, ReconnectStatus, SchemaRegistry,
    SqlDialect, SqlExecutor, SqlOutcome, TransactionScope, TransactionToken, Update,
    WriteReceipt, build_count, build_delete, build_insert, build_insert_many, build_select,
    build_update, redact_uri, run_batch_sequential, suggest_collection,
};

/// Adapter over a relational executor for one of the four SQL dialects.
pub struct RelationalAdapter {
    backend: BackendKind,
    dialect: SqlDialect,
    executor: Arc<dyn SqlExecutor>,
    uri: String,
    database: Option<String>,
    reconnect_policy: ReconnectPolicy,
    state: RwLock<ConnectionState>,
    connected_at: Mutex<Option<Instant>>,
    tx: Option<TransactionToken>,
}

impl RelationalAdapter {
    pub fn new(
        executor: Arc<dyn SqlExecutor>,
        backend: BackendKind,
        uri: &str,
        database: Option<String>,
    ) -> Result<Self, DbError> {
        let dialect = backend.dialect().ok_or_else(|| {
            DbError::connection_failed(
                format!("Backend '{}' is not a relational dialect.", backend),
                "Construct the document or search adapter for this URI instead.",
            )
        })?;

        Ok(Self {
            backend,
            dialect,
            executor,
            uri: redact_uri(uri),
            database,
            reconnect_policy: ReconnectPolicy::default(),
            state: RwLock::new(ConnectionState::Disconnected),
            connected_at: Mutex::new(None),
            tx: None,
        })
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect_policy = policy;
        self
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// A child adapter sharing the executor under a transaction token.
    fn scoped(&self, tx: TransactionToken) -> Self {
        Self {
            backend: self.backend,
            dialect: self.dialect,
            executor: Arc::clone(&self.executor),
            uri: self.uri.clone(),
            database: self.database.clone(),
            reconnect_policy: self.reconnect_policy.clone(),
            state: RwLock::new(ConnectionState::Connected),
            connected_at: Mutex::new(Some(Instant::now())),
            tx: Some(tx),
        }
    }

    async fn run(&self, stmt: &BuiltStatement) -> Result<SqlOutcome, DbError> {
        self.executor
            .execute(&stmt.sql, &stmt.params, self.tx.as_ref())
            .await
            .map_err(|err| err.with_backend(self.backend))
    }

    async fn fetch(
        &self,
        collection: &str,
        filter: &Filter,
        options: &QueryOptions,
    ) -> Result<Vec<Document>, DbError> {
        let stmt = build_select(collection, filter, options, self.dialect)?;
        let outcome = self.run(&stmt).await?;

        let mut rows = outcome.rows;
        if let Some(projection) = &options.projection {
            for row in &mut rows {
                projection.strip_exclusions(row);
            }
        }
        Ok(rows)
    }

    /// Build the INSERT half of an upsert: the filter's equality-style
    /// fields unioned with the `$set` map (the `$set` value wins on
    /// collision).
    fn upsert_document(filter: &Filter, update: &Update) -> Document {
        let mut doc = Document::new();
        for (field, value) in filter.equality_pairs() {
            doc.insert(field.to_string(), value.clone());
        }
        for (field, value) in &update.set {
            doc.insert(field.clone(), value.clone());
        }
        doc
    }
}

fn extract_count(outcome: &SqlOutcome) -> u64 {
    outcome
        .rows
        .first()
        .and_then(|row| row.get("count"))
        .and_then(|value| {
            value
                .as_u64()
                .or_else(|| value.as_i64().map(|n| n.max(0) as u64))
                .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        })
        .unwrap_or(0)
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[async_trait]
impl DatabaseAdapter for RelationalAdapter {
    fn backend(&self) -> BackendKind {
        self.backend
    }

    async fn connect(&self) -> Result<(), DbError> {
        self.executor
            .connect()
            .await
            .map_err(|err| err.with_backend(self.backend))?;
        *self.state.write().expect("adapter state poisoned") = ConnectionState::Connected;
        *self.connected_at.lock().expect("adapter state poisoned") = Some(Instant::now());
        Ok(())
    }

    async fn close(&self) -> Result<(), DbError> {
        self.executor.close().await?;
        *self.state.write().expect("adapter state poisoned") = ConnectionState::Closed;
        Ok(())
    }

    async fn ping(&self) -> Result<(), DbError> {
        self.executor.ping().await
    }

    fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: *self.state.read().expect("adapter state poisoned"),
            backend: self.backend,
            driver: self.executor.driver_name().to_string(),
            uri: self.uri.clone(),
            database: self.database.clone(),
            uptime_ms: self
                .connected_at
                .lock()
                .expect("adapter state poisoned")
                .map(elapsed_ms)
                .unwrap_or(0),
            pool: self.executor.pool_stats(),
            reconnect: ReconnectStatus {
                enabled: self.reconnect_policy.enabled,
                attempts: 0,
                last_disconnect: None,
            },
        }
    }

    async fn query_one(
        &self,
        collection: &str,
        filter: &Filter,
        options: &QueryOptions,
    ) -> Result<Option<Document>, DbError> {
        let mut options = options.clone();
        options.limit = Some(1);
        let mut rows = self.fetch(collection, filter, &options).await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.remove(0))
        })
    }

    async fn query_many(
        &self,
        collection: &str,
        filter: &Filter,
        options: &QueryOptions,
    ) -> Result<Vec<Document>, DbError> {
        self.fetch(collection, filter, options).await
    }

    async fn query_with_lookup(
        &self,
        collection: &str,
        filter: &Filter,
        lookup: &LookupSpec,
        options: &QueryOptions,
    ) -> Result<Option<Document>, DbError> {
        let Some(mut row) = self.query_one(collection, filter, options).await? else {
            return Ok(None);
        };

        let local_value = row.get(&lookup.local_field).cloned().unwrap_or(Value::Null);
        if local_value.is_null() {
            return match lookup.join {
                JoinKind::Inner => Ok(None),
                JoinKind::Left => {
                    let attached = if lookup.unwind {
                        Value::Null
                    } else {
                        Value::Array(Vec::new())
                    };
                    row.insert(lookup.alias.clone(), attached);
                    Ok(Some(row))
                }
            };
        }

        let mut foreign_keys = Document::new();
        foreign_keys.insert(lookup.foreign_field.clone(), local_value);
        let foreign_filter = Filter::parse(&Value::Object(foreign_keys))?;
        let related = self
            .fetch(&lookup.from, &foreign_filter, &QueryOptions::default())
            .await?;

        let attached = if lookup.unwind {
            related
                .into_iter()
                .next()
                .map(Value::Object)
                .unwrap_or(Value::Null)
        } else {
            Value::Array(related.into_iter().map(Value::Object).collect())
        };
        row.insert(lookup.alias.clone(), attached);
        Ok(Some(row))
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, DbError> {
        let stmt = build_count(collection, filter, self.dialect)?;
        let outcome = self.run(&stmt).await?;
        Ok(extract_count(&outcome))
    }

    async fn insert_one(
        &self,
        collection: &str,
        document: Document,
    ) -> Result<WriteReceipt, DbError> {
        let started = Instant::now();
        let stmt = build_insert(collection, &document, self.dialect)?;
        let outcome = self.run(&stmt).await?;

        Ok(
            WriteReceipt::new(OperationKind::InsertOne, collection, self.backend)
                .with_inserted(outcome.affected)
                .with_duration_ms(elapsed_ms(started)),
        )
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<WriteReceipt, DbError> {
        let started = Instant::now();
        let stmt = build_insert_many(collection, &documents, self.dialect)?;
        let outcome = self.run(&stmt).await?;

        Ok(
            WriteReceipt::new(OperationKind::InsertMany, collection, self.backend)
                .with_inserted(outcome.affected)
                .with_duration_ms(elapsed_ms(started)),
        )
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> Result<WriteReceipt, DbError> {
        let started = Instant::now();
        let stmt = build_update(collection, update, filter, self.dialect, true)?;
        let outcome = self.run(&stmt).await?;

        if outcome.affected == 0 && upsert {
            let doc = Self::upsert_document(filter, update);
            let insert = build_insert(collection, &doc, self.dialect)?;
            let inserted = self.run(&insert).await?;
            return Ok(
                WriteReceipt::new(OperationKind::UpdateOne, collection, self.backend)
                    .with_inserted(inserted.affected.max(1))
                    .with_duration_ms(elapsed_ms(started)),
            );
        }

        Ok(
            WriteReceipt::new(OperationKind::UpdateOne, collection, self.backend)
                .with_matched(outcome.affected)
                .with_modified(outcome.affected)
                .with_duration_ms(elapsed_ms(started)),
        )
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> Result<WriteReceipt, DbError> {
        let started = Instant::now();
        let stmt = build_update(collection, update, filter, self.dialect, false)?;
        let outcome = self.run(&stmt).await?;

        Ok(
            WriteReceipt::new(OperationKind::UpdateMany, collection, self.backend)
                .with_matched(outcome.affected)
                .with_modified(outcome.affected)
                .with_duration_ms(elapsed_ms(started)),
        )
    }

    async fn delete_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<WriteReceipt, DbError> {
        let started = Instant::now();
        let stmt = build_delete(collection, filter, self.dialect, true)?;
        let outcome = self.run(&stmt).await?;

        Ok(
            WriteReceipt::new(OperationKind::DeleteOne, collection, self.backend)
                .with_deleted(outcome.affected)
                .with_duration_ms(elapsed_ms(started)),
        )
    }

    async fn delete_many(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<WriteReceipt, DbError> {
        let started = Instant::now();
        let stmt = build_delete(collection, filter, self.dialect, false)?;
        let outcome = self.run(&stmt).await?;

        Ok(
            WriteReceipt::new(OperationKind::DeleteMany, collection, self.backend)
                .with_deleted(outcome.affected)
                .with_duration_ms(elapsed_ms(started)),
        )
    }

    async fn begin_scope(&self) -> Result<Box<dyn TransactionScope>, DbError> {
        let token = self.executor.begin().await?;
        Ok(Box::new(RelationalScope {
            token: token.clone(),
            adapter: self.scoped(token),
        }))
    }

    /// Batches run inside one transaction; any step failure rolls back.
    async fn run_batch(&self, steps: &[BatchStep]) -> Result<WriteReceipt, DbError> {
        let token = self.executor.begin().await?;
        let scoped = self.scoped(token.clone());

        match run_batch_sequential(&scoped, steps).await {
            Ok(receipt) => {
                self.executor.commit(&token).await?;
                Ok(receipt)
            }
            Err(err) => {
                if let Err(rollback_err) = self.executor.rollback(&token).await {
                    log::warn!("batch rollback failed: {}", rollback_err);
                }
                Err(err)
            }
        }
    }

    async fn ensure_collections(&self, collections: &[String]) -> Result<(), DbError> {
        for collection in collections {
            let Some(schema) = SchemaRegistry::get(collection) else {
                return Err(
                    suggest_collection(collection, &SchemaRegistry::collections())
                        .with_backend(self.backend),
                );
            };
            let ddl = schema.ddl(collection, self.dialect);
            self.executor.execute(&ddl, &[], self.tx.as_ref()).await?;
        }
        Ok(())
    }

    async fn ensure_indexes(&self, collection: &str) -> Result<(), DbError> {
        for index in IndexRegistry::get(collection) {
            let ddl = index.ddl(collection, self.dialect);
            self.executor.execute(&ddl, &[], self.tx.as_ref()).await?;
        }
        Ok(())
    }

    async fn describe_collection(&self, collection: &str) -> Result<CollectionFacts, DbError> {
        Ok(CollectionFacts {
            indexes: IndexRegistry::get(collection),
            document_count: self.count(collection, &Filter::empty()).await?,
        })
    }

    async fn document_count(&self, collection: &str) -> Result<u64, DbError> {
        self.count(collection, &Filter::empty()).await
    }

    fn explain(
        &self,
        operation: OperationKind,
        collection: &str,
        filter: &Filter,
        update: Option<&Update>,
        options: &QueryOptions,
    ) -> Result<ExplainOutput, DbError> {
        let stmt = match operation {
            OperationKind::QueryOne => {
                let mut options = options.clone();
                options.limit = Some(1);
                build_select(collection, filter, &options, self.dialect)?
            }
            OperationKind::QueryMany | OperationKind::QueryWithLookup => {
                build_select(collection, filter, options, self.dialect)?
            }
            OperationKind::Count => build_count(collection, filter, self.dialect)?,
            OperationKind::UpdateOne | OperationKind::UpdateMany => {
                let update = update.ok_or_else(|| {
                    DbError::query_error(
                        "Explaining an update requires the update document.",
                        "Pass the update alongside the filter.",
                    )
                })?;
                let single = operation == OperationKind::UpdateOne;
                build_update(collection, update, filter, self.dialect, single)?
            }
            OperationKind::DeleteOne => build_delete(collection, filter, self.dialect, true)?,
            OperationKind::DeleteMany => build_delete(collection, filter, self.dialect, false)?,
            OperationKind::InsertOne | OperationKind::InsertMany | OperationKind::Batch => {
                return Err(DbError::unsupported_operation(
                    format!("explain does not cover {}.", operation),
                    "Explain supports the query, count, update, and delete operations.",
                ));
            }
        };

        Ok(ExplainOutput::Sql {
            statement: stmt.sql,
            params: stmt.params,
        })
    }

    fn raw(&self) -> &dyn Any {
        self.executor.as_any()
    }
}

/// Transactional scope over the shared executor handle.
pub struct RelationalScope {
    token: TransactionToken,
    adapter: RelationalAdapter,
}

impl std::fmt::Debug for RelationalScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationalScope")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DatabaseAdapter for RelationalScope {
    fn backend(&self) -> BackendKind {
        self.adapter.backend()
    }

    async fn connect(&self) -> Result<(), DbError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), DbError> {
        Ok(())
    }

    async fn ping(&self) -> Result<(), DbError> {
        self.adapter.ping().await
    }

    fn status(&self) -> ConnectionStatus {
        self.adapter.status()
    }

    async fn query_one(
        &self,
        collection: &str,
        filter: &Filter,
        options: &QueryOptions,
    ) -> Result<Option<Document>, DbError> {
        self.adapter.query_one(collection, filter, options).await
    }

    async fn query_many(
        &self,
        collection: &str,
        filter: &Filter,
        options: &QueryOptions,
    ) -> Result<Vec<Document>, DbError> {
        self.adapter.query_many(collection, filter, options).await
    }

    async fn query_with_lookup(
        &self,
        collection: &str,
        filter: &Filter,
        lookup: &LookupSpec,
        options: &QueryOptions,
    ) -> Result<Option<Document>, DbError> {
        self.adapter
            .query_with_lookup(collection, filter, lookup, options)
            .await
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, DbError> {
        self.adapter.count(collection, filter).await
    }

    async fn insert_one(
        &self,
        collection: &str,
        document: Document,
    ) -> Result<WriteReceipt, DbError> {
        self.adapter.insert_one(collection, document).await
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<WriteReceipt, DbError> {
        self.adapter.insert_many(collection, documents).await
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> Result<WriteReceipt, DbError> {
        self.adapter
            .update_one(collection, filter, update, upsert)
            .await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> Result<WriteReceipt, DbError> {
        self.adapter.update_many(collection, filter, update).await
    }

    async fn delete_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<WriteReceipt, DbError> {
        self.adapter.delete_one(collection, filter).await
    }

    async fn delete_many(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<WriteReceipt, DbError> {
        self.adapter.delete_many(collection, filter).await
    }

    async fn describe_collection(&self, collection: &str) -> Result<CollectionFacts, DbError> {
        self.adapter.describe_collection(collection).await
    }

    async fn document_count(&self, collection: &str) -> Result<u64, DbError> {
        self.adapter.document_count(collection).await
    }

    fn explain(
        &self,
        operation: OperationKind,
        collection: &str,
        filter: &Filter,
        update: Option<&Update>,
        options: &QueryOptions,
    ) -> Result<ExplainOutput, DbError> {
        self.adapter
            .explain(operation, collection, filter, update, options)
    }

    fn raw(&self) -> &dyn Any {
        self.adapter.raw()
    }
}

#[async_trait]
impl TransactionScope for RelationalScope {
    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        self.adapter.executor.commit(&self.token).await
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        self.adapter.executor.rollback(&self.token).await
    }
}

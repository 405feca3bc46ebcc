use std::any::Any;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Value, json};

use unidb_core::{
    BackendKind, BatchStep, CollectionFacts, ConnectionState, ConnectionStatus, DatabaseAdapter,
    DbError, DocFindOptions, Document, DocumentExecutor, ErrorCode, ExplainOutput, Filter,
    IndexRegistry, JoinKind, LookupSpec, OperationKind, QueryOptions, ReconnectPolicy,
    ReconnectStatus, SortOrder, TransactionScope, TransactionToken, Update, WriteReceipt,
    redact_uri, run_batch_sequential,
};

/// Adapter over a document-store executor.
pub struct DocumentAdapter {
    executor: Arc<dyn DocumentExecutor>,
    uri: String,
    database: Option<String>,
    reconnect_policy: ReconnectPolicy,
    state: RwLock<ConnectionState>,
    connected_at: Mutex<Option<Instant>>,
    tx: Option<TransactionToken>,
}

impl DocumentAdapter {
    pub fn new(
        executor: Arc<dyn DocumentExecutor>,
        uri: &str,
        database: Option<String>,
    ) -> Self {
        Self {
            executor,
            uri: redact_uri(uri),
            database,
            reconnect_policy: ReconnectPolicy::default(),
            state: RwLock::new(ConnectionState::Disconnected),
            connected_at: Mutex::new(None),
            tx: None,
        }
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect_policy = policy;
        self
    }

    fn scoped(&self, tx: TransactionToken) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            uri: self.uri.clone(),
            database: self.database.clone(),
            reconnect_policy: self.reconnect_policy.clone(),
            state: RwLock::new(ConnectionState::Connected),
            connected_at: Mutex::new(Some(Instant::now())),
            tx: Some(tx),
        }
    }

    fn find_options(options: &QueryOptions) -> DocFindOptions {
        DocFindOptions {
            sort: sort_document(&options.sort),
            limit: options.limit,
            skip: options.skip,
            projection: options.projection.as_ref().map(|p| p.to_json()),
        }
    }
}

fn sort_document(sort: &[(String, SortOrder)]) -> Option<Value> {
    if sort.is_empty() {
        return None;
    }
    let mut doc = Document::new();
    for (field, order) in sort {
        let direction = match order {
            SortOrder::Ascending => 1,
            SortOrder::Descending => -1,
        };
        doc.insert(field.clone(), Value::from(direction));
    }
    Some(Value::Object(doc))
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[async_trait]
impl DatabaseAdapter for DocumentAdapter {
    fn backend(&self) -> BackendKind {
        BackendKind::Mongodb
    }

    async fn connect(&self) -> Result<(), DbError> {
        self.executor
            .connect()
            .await
            .map_err(|err| err.with_backend(BackendKind::Mongodb))?;
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
            backend: BackendKind::Mongodb,
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
        let mut find_options = Self::find_options(options);
        find_options.limit = Some(1);
        let mut docs = self
            .executor
            .find(collection, filter.as_json(), &find_options, self.tx.as_ref())
            .await?;
        Ok(if docs.is_empty() {
            None
        } else {
            Some(docs.remove(0))
        })
    }

    async fn query_many(
        &self,
        collection: &str,
        filter: &Filter,
        options: &QueryOptions,
    ) -> Result<Vec<Document>, DbError> {
        self.executor
            .find(
                collection,
                filter.as_json(),
                &Self::find_options(options),
                self.tx.as_ref(),
            )
            .await
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

        let mut foreign_filter = Document::new();
        foreign_filter.insert(lookup.foreign_field.clone(), local_value);
        let related = self
            .executor
            .find(
                &lookup.from,
                &Value::Object(foreign_filter),
                &DocFindOptions::default(),
                self.tx.as_ref(),
            )
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
        self.executor
            .count(collection, filter.as_json(), self.tx.as_ref())
            .await
    }

    async fn insert_one(
        &self,
        collection: &str,
        document: Document,
    ) -> Result<WriteReceipt, DbError> {
        let started = Instant::now();
        let inserted = self
            .executor
            .insert(collection, std::slice::from_ref(&document), self.tx.as_ref())
            .await?;

        Ok(
            WriteReceipt::new(OperationKind::InsertOne, collection, BackendKind::Mongodb)
                .with_inserted(inserted)
                .with_duration_ms(elapsed_ms(started)),
        )
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<WriteReceipt, DbError> {
        let started = Instant::now();
        let inserted = self
            .executor
            .insert(collection, &documents, self.tx.as_ref())
            .await?;

        Ok(
            WriteReceipt::new(OperationKind::InsertMany, collection, BackendKind::Mongodb)
                .with_inserted(inserted)
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
        let outcome = self
            .executor
            .update(
                collection,
                filter.as_json(),
                update.as_json(),
                false,
                upsert,
                self.tx.as_ref(),
            )
            .await?;

        Ok(
            WriteReceipt::new(OperationKind::UpdateOne, collection, BackendKind::Mongodb)
                .with_matched(outcome.matched)
                .with_modified(outcome.modified)
                .with_inserted(outcome.upserted)
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
        let outcome = self
            .executor
            .update(
                collection,
                filter.as_json(),
                update.as_json(),
                true,
                false,
                self.tx.as_ref(),
            )
            .await?;

        Ok(
            WriteReceipt::new(OperationKind::UpdateMany, collection, BackendKind::Mongodb)
                .with_matched(outcome.matched)
                .with_modified(outcome.modified)
                .with_duration_ms(elapsed_ms(started)),
        )
    }

    async fn delete_one(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<WriteReceipt, DbError> {
        let started = Instant::now();
        let deleted = self
            .executor
            .delete(collection, filter.as_json(), false, self.tx.as_ref())
            .await?;

        Ok(
            WriteReceipt::new(OperationKind::DeleteOne, collection, BackendKind::Mongodb)
                .with_deleted(deleted)
                .with_duration_ms(elapsed_ms(started)),
        )
    }

    async fn delete_many(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<WriteReceipt, DbError> {
        let started = Instant::now();
        let deleted = self
            .executor
            .delete(collection, filter.as_json(), true, self.tx.as_ref())
            .await?;

        Ok(
            WriteReceipt::new(OperationKind::DeleteMany, collection, BackendKind::Mongodb)
                .with_deleted(deleted)
                .with_duration_ms(elapsed_ms(started)),
        )
    }

    async fn begin_scope(&self) -> Result<Box<dyn TransactionScope>, DbError> {
        let token = self.executor.begin().await?;
        Ok(Box::new(DocumentScope {
            token: token.clone(),
            adapter: self.scoped(token),
        }))
    }

    /// Batches run under one session when the store supports transactions,
    /// falling back to sequential execution when it does not.
    async fn run_batch(&self, steps: &[BatchStep]) -> Result<WriteReceipt, DbError> {
        let token = match self.executor.begin().await {
            Ok(token) => token,
            Err(err) if err.code == ErrorCode::UnsupportedOperation => {
                return run_batch_sequential(self, steps).await;
            }
            Err(err) => return Err(err),
        };

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
            self.executor.create_collection(collection).await?;
        }
        Ok(())
    }

    async fn ensure_indexes(&self, collection: &str) -> Result<(), DbError> {
        for index in IndexRegistry::get(collection) {
            self.executor
                .create_index(collection, &index.name, &index.to_key_document(), index.unique)
                .await?;
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
        let command = match operation {
            OperationKind::QueryOne
            | OperationKind::QueryMany
            | OperationKind::QueryWithLookup => {
                let limit = if operation == OperationKind::QueryOne {
                    Some(1)
                } else {
                    options.limit
                };
                json!({
                    "find": collection,
                    "filter": filter.as_json(),
                    "sort": sort_document(&options.sort),
                    "limit": limit,
                    "skip": options.skip,
                    "projection": options.projection.as_ref().map(|p| p.to_json()),
                })
            }
            OperationKind::Count => json!({
                "count": collection,
                "query": filter.as_json(),
            }),
            OperationKind::UpdateOne | OperationKind::UpdateMany => {
                let update = update.ok_or_else(|| {
                    DbError::query_error(
                        "Explaining an update requires the update document.",
                        "Pass the update alongside the filter.",
                    )
                })?;
                json!({
                    "update": collection,
                    "updates": [{
                        "q": filter.as_json(),
                        "u": update.as_json(),
                        "multi": operation == OperationKind::UpdateMany,
                    }],
                })
            }
            OperationKind::DeleteOne | OperationKind::DeleteMany => json!({
                "delete": collection,
                "deletes": [{
                    "q": filter.as_json(),
                    "limit": if operation == OperationKind::DeleteOne { 1 } else { 0 },
                }],
            }),
            OperationKind::InsertOne | OperationKind::InsertMany | OperationKind::Batch => {
                return Err(DbError::unsupported_operation(
                    format!("explain does not cover {}.", operation),
                    "Explain supports the query, count, update, and delete operations.",
                ));
            }
        };

        Ok(ExplainOutput::DocumentCommand(command))
    }

    fn raw(&self) -> &dyn Any {
        self.executor.as_any()
    }
}

/// Transactional scope over the shared document-store session.
pub struct DocumentScope {
    token: TransactionToken,
    adapter: DocumentAdapter,
}

impl std::fmt::Debug for DocumentScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentScope")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DatabaseAdapter for DocumentScope {
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
impl TransactionScope for DocumentScope {
    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        self.adapter.executor.commit(&self.token).await
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        self.adapter.executor.rollback(&self.token).await
    }
}

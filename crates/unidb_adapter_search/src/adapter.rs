use std::any::Any;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Value, json};

use unidb_core::{
    BackendKind, BatchStep, BulkOp, CollectionFacts, ConnectionState, ConnectionStatus,
    DatabaseAdapter, DbError, Document, ExplainOutput, Filter, IndexRegistry, JoinKind,
    LookupSpec, OperationKind, QueryOptions, ReconnectPolicy, ReconnectStatus, SchemaRegistry,
    SearchExecutor, Update, WriteReceipt, redact_uri, run_batch_sequential,
    translate_search_projection, translate_search_sort, translate_search_update,
    translate_to_search,
};

/// Adapter over a search-engine executor.
pub struct SearchAdapter {
    executor: Arc<dyn SearchExecutor>,
    uri: String,
    reconnect_policy: ReconnectPolicy,
    state: RwLock<ConnectionState>,
    connected_at: Mutex<Option<Instant>>,
}

impl SearchAdapter {
    pub fn new(executor: Arc<dyn SearchExecutor>, uri: &str) -> Self {
        Self {
            executor,
            uri: redact_uri(uri),
            reconnect_policy: ReconnectPolicy::default(),
            state: RwLock::new(ConnectionState::Disconnected),
            connected_at: Mutex::new(None),
        }
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect_policy = policy;
        self
    }

    async fn search(
        &self,
        index: &str,
        filter: &Filter,
        options: &QueryOptions,
        size_override: Option<u64>,
    ) -> Result<Vec<Document>, DbError> {
        let query = translate_to_search(filter)?;
        let sort = translate_search_sort(&options.sort);
        let source = options
            .projection
            .as_ref()
            .and_then(translate_search_projection);

        self.executor
            .search(
                index,
                &query,
                &sort,
                options.skip,
                size_override.or(options.limit),
                source.as_ref(),
            )
            .await
            .map_err(|err| err.with_backend(BackendKind::Elastic))
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[async_trait]
impl DatabaseAdapter for SearchAdapter {
    fn backend(&self) -> BackendKind {
        BackendKind::Elastic
    }

    async fn connect(&self) -> Result<(), DbError> {
        self.executor
            .connect()
            .await
            .map_err(|err| err.with_backend(BackendKind::Elastic))?;
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
            backend: BackendKind::Elastic,
            driver: self.executor.driver_name().to_string(),
            uri: self.uri.clone(),
            database: None,
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
        let mut docs = self.search(collection, filter, options, Some(1)).await?;
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
        self.search(collection, filter, options, None).await
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
            .search(
                &lookup.from,
                &foreign_filter,
                &QueryOptions::default(),
                None,
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
        let query = translate_to_search(filter)?;
        self.executor.count(collection, &query).await
    }

    async fn insert_one(
        &self,
        collection: &str,
        document: Document,
    ) -> Result<WriteReceipt, DbError> {
        let started = Instant::now();
        let inserted = self
            .executor
            .index_docs(collection, std::slice::from_ref(&document))
            .await?;

        Ok(
            WriteReceipt::new(OperationKind::InsertOne, collection, BackendKind::Elastic)
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
        let inserted = self.executor.index_docs(collection, &documents).await?;

        Ok(
            WriteReceipt::new(OperationKind::InsertMany, collection, BackendKind::Elastic)
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
        if upsert {
            return Err(DbError::unsupported_operation(
                "Upsert is not supported on the search backend.",
                "Use insert_one for new documents; update-by-query cannot create them.",
            )
            .with_backend(BackendKind::Elastic));
        }

        let started = Instant::now();
        let query = translate_to_search(filter)?;
        let script = translate_search_update(update)?;
        let outcome = self
            .executor
            .update_by_query(collection, &query, &script.to_json(), Some(1))
            .await?;

        Ok(
            WriteReceipt::new(OperationKind::UpdateOne, collection, BackendKind::Elastic)
                .with_matched(outcome.matched)
                .with_modified(outcome.modified)
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
        let query = translate_to_search(filter)?;
        let script = translate_search_update(update)?;
        let outcome = self
            .executor
            .update_by_query(collection, &query, &script.to_json(), None)
            .await?;

        Ok(
            WriteReceipt::new(OperationKind::UpdateMany, collection, BackendKind::Elastic)
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
        let query = translate_to_search(filter)?;
        let deleted = self
            .executor
            .delete_by_query(collection, &query, Some(1))
            .await?;

        Ok(
            WriteReceipt::new(OperationKind::DeleteOne, collection, BackendKind::Elastic)
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
        let query = translate_to_search(filter)?;
        let deleted = self.executor.delete_by_query(collection, &query, None).await?;

        Ok(
            WriteReceipt::new(OperationKind::DeleteMany, collection, BackendKind::Elastic)
                .with_deleted(deleted)
                .with_duration_ms(elapsed_ms(started)),
        )
    }

    /// Insert-only batches against one index go through the bulk endpoint;
    /// anything else runs sequentially.
    async fn run_batch(&self, steps: &[BatchStep]) -> Result<WriteReceipt, DbError> {
        let bulk_index = bulk_compatible_index(steps);
        let Some(index) = bulk_index else {
            return run_batch_sequential(self, steps).await;
        };

        let started = Instant::now();
        let mut ops = Vec::new();
        for step in steps {
            match step {
                BatchStep::InsertOne { document, .. } => ops.push(BulkOp::Index {
                    doc: document.clone(),
                }),
                BatchStep::InsertMany { documents, .. } => {
                    ops.extend(documents.iter().cloned().map(|doc| BulkOp::Index { doc }));
                }
                _ => unreachable!("bulk_compatible_index admits inserts only"),
            }
        }

        let outcome = self.executor.bulk(index, &ops).await?;
        Ok(
            WriteReceipt::new(OperationKind::Batch, "batch", BackendKind::Elastic)
                .with_inserted(outcome.indexed)
                .with_deleted(outcome.deleted)
                .with_duration_ms(elapsed_ms(started)),
        )
    }

    async fn ensure_collections(&self, collections: &[String]) -> Result<(), DbError> {
        for collection in collections {
            let mappings = SchemaRegistry::get(collection)
                .map(|schema| schema.search_mappings())
                .unwrap_or_else(|| json!({"properties": {}}));
            self.executor.ensure_index(collection, &mappings).await?;
        }
        Ok(())
    }

    /// Secondary indexes have no counterpart here; fields are indexed by the
    /// engine's mappings, which ensure_collections installs.
    async fn ensure_indexes(&self, collection: &str) -> Result<(), DbError> {
        let _ = collection;
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
        _collection: &str,
        filter: &Filter,
        update: Option<&Update>,
        options: &QueryOptions,
    ) -> Result<ExplainOutput, DbError> {
        let query = translate_to_search(filter)?;
        let dsl = match operation {
            OperationKind::QueryOne
            | OperationKind::QueryMany
            | OperationKind::QueryWithLookup => {
                let mut body = Document::new();
                body.insert("query".to_string(), query);
                let sort = translate_search_sort(&options.sort);
                if !sort.is_empty() {
                    body.insert("sort".to_string(), Value::Array(sort));
                }
                if let Some(skip) = options.skip {
                    body.insert("from".to_string(), Value::from(skip));
                }
                let size = if operation == OperationKind::QueryOne {
                    Some(1)
                } else {
                    options.limit
                };
                if let Some(size) = size {
                    body.insert("size".to_string(), Value::from(size));
                }
                if let Some(source) = options
                    .projection
                    .as_ref()
                    .and_then(translate_search_projection)
                {
                    body.insert("_source".to_string(), source);
                }
                Value::Object(body)
            }
            OperationKind::Count => json!({"query": query}),
            OperationKind::UpdateOne | OperationKind::UpdateMany => {
                let update = update.ok_or_else(|| {
                    DbError::query_error(
                        "Explaining an update requires the update document.",
                        "Pass the update alongside the filter.",
                    )
                })?;
                let script = translate_search_update(update)?;
                let mut body = Document::new();
                body.insert("query".to_string(), query);
                body.insert("script".to_string(), script.to_json());
                if operation == OperationKind::UpdateOne {
                    body.insert("max_docs".to_string(), Value::from(1));
                }
                Value::Object(body)
            }
            OperationKind::DeleteOne => json!({"query": query, "max_docs": 1}),
            OperationKind::DeleteMany => json!({"query": query}),
            OperationKind::InsertOne | OperationKind::InsertMany | OperationKind::Batch => {
                return Err(DbError::unsupported_operation(
                    format!("explain does not cover {}.", operation),
                    "Explain supports the query, count, update, and delete operations.",
                ));
            }
        };

        Ok(ExplainOutput::SearchQuery(dsl))
    }

    fn raw(&self) -> &dyn Any {
        self.executor.as_any()
    }
}

/// The single target index when every step is an insert; `None` otherwise.
fn bulk_compatible_index(steps: &[BatchStep]) -> Option<&str> {
    let mut index: Option<&str> = None;
    for step in steps {
        match step {
            BatchStep::InsertOne { collection, .. } | BatchStep::InsertMany { collection, .. } => {
                match index {
                    None => index = Some(collection),
                    Some(seen) if seen == collection => {}
                    Some(_) => return None,
                }
            }
            _ => return None,
        }
    }
    index
}

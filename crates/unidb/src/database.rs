use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;

use unidb_adapter_document::DocumentAdapter;
use unidb_adapter_relational::RelationalAdapter;
use unidb_adapter_search::SearchAdapter;
use unidb_core::{
    BackendFamily, BackendKind, BatchStep, ConfirmToken, ConnectConfig, ConnectionStatus,
    DatabaseAdapter, DbError, Document, DocumentExecutor, ErrorCode, Event, EventBus,
    EventHandler, EventKind, ExplainOutput, Filter, IndexSpec, LookupSpec, OperationKind,
    OperationLogger, QueryOptions, ReconnectController, SchemaRegistry, SearchExecutor,
    SqlExecutor, Update, WriteReceipt, apply_sanitize_rules, check_field_whitelist,
    check_filter_regexes, check_guardrails, check_index_name, check_reserved_fields,
    inject_insert_timestamps, inject_update_timestamps, suggest_operation,
};

/// The caller-supplied driver behind the minimal execution contract.
///
/// The handle family must match the backend detected from the URI.
pub enum ExecutorHandle {
    Sql(Arc<dyn SqlExecutor>),
    Document(Arc<dyn DocumentExecutor>),
    Search(Arc<dyn SearchExecutor>),
}

impl ExecutorHandle {
    fn family(&self) -> BackendFamily {
        match self {
            Self::Sql(_) => BackendFamily::Relational,
            Self::Document(_) => BackendFamily::Document,
            Self::Search(_) => BackendFamily::Search,
        }
    }
}

/// Router and façade: owns one adapter, the event bus, the operation logger,
/// and the reconnect controller, and drives the per-operation pipeline.
pub struct Database {
    config: ConnectConfig,
    backend: BackendKind,
    adapter: Arc<dyn DatabaseAdapter>,
    bus: Arc<EventBus>,
    logger: OperationLogger,
    reconnect: Arc<ReconnectController>,
    started_at: Instant,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Detect the backend from the URI, build the matching adapter over the
    /// supplied executor, connect, and wire logging and reconnect.
    pub async fn connect(
        config: ConnectConfig,
        executor: ExecutorHandle,
    ) -> Result<Self, DbError> {
        let backend = BackendKind::from_uri(&config.uri)?;

        if backend.family() != executor.family() {
            return Err(DbError::connection_failed(
                format!(
                    "The URI resolves to the {} backend but the supplied executor is for a \
                     different family.",
                    backend
                ),
                "Pass the executor matching the URI: Sql for relational schemes, Document for \
                 mongodb://, Search for http(s)://.",
            ));
        }

        let adapter: Arc<dyn DatabaseAdapter> = match executor {
            ExecutorHandle::Sql(executor) => Arc::new(
                RelationalAdapter::new(executor, backend, &config.uri, config.db_name.clone())?
                    .with_reconnect_policy(config.reconnect.clone()),
            ),
            ExecutorHandle::Document(executor) => Arc::new(
                DocumentAdapter::new(executor, &config.uri, config.db_name.clone())
                    .with_reconnect_policy(config.reconnect.clone()),
            ),
            ExecutorHandle::Search(executor) => Arc::new(
                SearchAdapter::new(executor, &config.uri)
                    .with_reconnect_policy(config.reconnect.clone()),
            ),
        };

        adapter.connect().await?;

        let bus = Arc::new(EventBus::new());
        let logger = OperationLogger::new(
            Arc::clone(&bus),
            config.slow_query_ms,
            config.logging.is_verbose(),
        );
        let reconnect = Arc::new(ReconnectController::new(
            config.reconnect.clone(),
            backend,
            Arc::clone(&bus),
        ));

        bus.publish(&Event::Connected {
            backend,
            uri: adapter.status().uri,
        });
        if let Some(label) = &config.label {
            log::info!("connected '{}' ({})", label, backend);
        }

        Ok(Self {
            config,
            backend,
            adapter,
            bus,
            logger,
            reconnect,
            started_at: Instant::now(),
        })
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn config(&self) -> &ConnectConfig {
        &self.config
    }

    /// Subscribe to bus events; `kind = None` receives everything.
    pub fn on(&self, kind: Option<EventKind>, handler: EventHandler) -> uuid::Uuid {
        self.bus.subscribe(kind, handler)
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    /// Connection status with live reconnect figures.
    pub fn status(&self) -> ConnectionStatus {
        let mut status = self.adapter.status();
        status.reconnect.enabled = self.reconnect.policy().enabled;
        status.reconnect.attempts = self.reconnect.attempts();
        status.reconnect.last_disconnect = self.reconnect.last_disconnect();
        status
    }

    pub async fn ping(&self) -> Result<(), DbError> {
        self.adapter.ping().await
    }

    /// Publish a `pool-status` event with the driver pool's current figures.
    pub fn emit_pool_status(&self) {
        let pool = self.adapter.status().pool;
        self.bus.publish(&Event::PoolStatus {
            active: pool.active,
            idle: pool.idle,
            waiting: pool.waiting,
            max: pool.max,
        });
    }

    /// Register a collection schema in the process-wide registry.
    pub fn register_schema(
        &self,
        collection: impl Into<String>,
        schema: unidb_core::CollectionSchema,
    ) {
        SchemaRegistry::register(collection, schema);
    }

    /// Register a secondary index in the process-wide registry.
    pub fn register_index(&self, collection: impl Into<String>, index: IndexSpec) {
        unidb_core::IndexRegistry::register(collection, index);
    }

    // ========================================================================
    // Query operations
    // ========================================================================

    pub async fn query_one(
        &self,
        collection: &str,
        filter: &Value,
        options: Option<&Value>,
    ) -> Result<Option<Document>, DbError> {
        self.op_query_one(self.adapter.as_ref(), collection, filter, options)
            .await
    }

    pub async fn query_many(
        &self,
        collection: &str,
        filter: &Value,
        options: Option<&Value>,
    ) -> Result<Vec<Document>, DbError> {
        self.op_query_many(self.adapter.as_ref(), collection, filter, options)
            .await
    }

    pub async fn query_with_lookup(
        &self,
        collection: &str,
        filter: &Value,
        lookup: &Value,
        options: Option<&Value>,
    ) -> Result<Option<Document>, DbError> {
        let op = OperationKind::QueryWithLookup;
        let started = Instant::now();
        let result = async {
            let filter = self.prepare_filter(collection, filter)?;
            let lookup = LookupSpec::parse(lookup)?;
            self.adapter
                .query_with_lookup(collection, &filter, &lookup, &self.parse_options(options)?)
                .await
        }
        .await
        .map_err(|err| self.fail(err, op, collection))?;

        self.logger
            .observe_read(op, collection, elapsed_ms(started));
        Ok(result)
    }

    pub async fn count(&self, collection: &str, filter: &Value) -> Result<u64, DbError> {
        self.op_count(self.adapter.as_ref(), collection, filter)
            .await
    }

    // ========================================================================
    // Write operations
    // ========================================================================

    pub async fn insert_one(
        &self,
        collection: &str,
        document: &Value,
    ) -> Result<WriteReceipt, DbError> {
        self.op_insert_one(self.adapter.as_ref(), collection, document)
            .await
    }

    pub async fn insert_many(
        &self,
        collection: &str,
        documents: &Value,
    ) -> Result<WriteReceipt, DbError> {
        self.op_insert_many(self.adapter.as_ref(), collection, documents)
            .await
    }

    pub async fn update_one(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
        upsert: bool,
    ) -> Result<WriteReceipt, DbError> {
        self.op_update_one(self.adapter.as_ref(), collection, filter, update, upsert)
            .await
    }

    pub async fn update_many(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
        confirm: Option<&str>,
    ) -> Result<WriteReceipt, DbError> {
        self.op_update_many(self.adapter.as_ref(), collection, filter, update, confirm)
            .await
    }

    pub async fn delete_one(
        &self,
        collection: &str,
        filter: &Value,
    ) -> Result<WriteReceipt, DbError> {
        self.op_delete_one(self.adapter.as_ref(), collection, filter)
            .await
    }

    pub async fn delete_many(
        &self,
        collection: &str,
        filter: &Value,
        confirm: Option<&str>,
    ) -> Result<WriteReceipt, DbError> {
        self.op_delete_many(self.adapter.as_ref(), collection, filter, confirm)
            .await
    }

    /// Execute an ordered sequence of operation records as one batch.
    ///
    /// Each step threads the same pipeline stages as its standalone
    /// counterpart; accounting in the returned receipt is the sum of the
    /// per-step counts.
    pub async fn batch(&self, steps: &Value) -> Result<WriteReceipt, DbError> {
        let op = OperationKind::Batch;
        let started = Instant::now();

        let result = async {
            let steps = self.parse_batch_steps(steps)?;
            self.adapter.run_batch(&steps).await
        }
        .await;

        match result {
            Ok(mut receipt) => {
                receipt.duration_ms = elapsed_ms(started);
                self.logger.observe(&receipt);
                Ok(receipt)
            }
            Err(err) => Err(self.fail(err, op, "batch")),
        }
    }

    // ========================================================================
    // Transactions and lifecycle
    // ========================================================================

    /// Open a transactional scope explicitly. Prefer [`Database::with_transaction`].
    pub async fn begin_transaction(&self) -> Result<crate::Transaction<'_>, DbError> {
        let scope = self.adapter.begin_scope().await?;
        Ok(crate::Transaction::new(self, scope))
    }

    /// Run `f` inside a transactional scope: commit on success, roll back on
    /// error. Operations on the scope execute sequentially and atomically
    /// relative to one another.
    pub async fn with_transaction<T, F>(&self, f: F) -> Result<T, DbError>
    where
        F: for<'t> FnOnce(
            &'t crate::Transaction<'t>,
        )
            -> futures::future::BoxFuture<'t, Result<T, DbError>>,
    {
        let txn = self.begin_transaction().await?;
        match f(&txn).await {
            Ok(value) => {
                txn.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    log::warn!("transaction rollback failed: {}", rollback_err);
                }
                Err(err)
            }
        }
    }

    pub async fn ensure_collections(&self, collections: &[&str]) -> Result<(), DbError> {
        let owned: Vec<String> = collections.iter().map(|c| c.to_string()).collect();
        self.adapter.ensure_collections(&owned).await
    }

    pub async fn ensure_indexes(&self, collection: &str) -> Result<(), DbError> {
        self.adapter.ensure_indexes(collection).await
    }

    /// Raw driver-handle escape.
    pub fn raw(&self) -> &dyn Any {
        self.adapter.raw()
    }

    /// Close the connection and stop the reconnect controller.
    pub async fn close(&self) -> Result<(), DbError> {
        self.reconnect.stop();
        self.adapter.close().await
    }

    /// Close, stop reconnecting, and publish the `shutdown` event.
    pub async fn graceful_shutdown(&self, exit_code: i32) -> Result<(), DbError> {
        self.reconnect.stop();
        let result = self.adapter.close().await;
        self.bus.publish(&Event::Shutdown {
            exit_code,
            uptime_ms: elapsed_ms(self.started_at),
        });
        result
    }

    // ========================================================================
    // Pipeline internals (shared with transactional scopes)
    // ========================================================================

    pub(crate) async fn op_query_one(
        &self,
        adapter: &dyn DatabaseAdapter,
        collection: &str,
        filter: &Value,
        options: Option<&Value>,
    ) -> Result<Option<Document>, DbError> {
        let op = OperationKind::QueryOne;
        let started = Instant::now();
        let result = async {
            let filter = self.prepare_filter(collection, filter)?;
            adapter
                .query_one(collection, &filter, &self.parse_options(options)?)
                .await
        }
        .await
        .map_err(|err| self.fail(err, op, collection))?;

        self.logger
            .observe_read(op, collection, elapsed_ms(started));
        Ok(result)
    }

    pub(crate) async fn op_query_many(
        &self,
        adapter: &dyn DatabaseAdapter,
        collection: &str,
        filter: &Value,
        options: Option<&Value>,
    ) -> Result<Vec<Document>, DbError> {
        let op = OperationKind::QueryMany;
        let started = Instant::now();
        let result = async {
            let filter = self.prepare_filter(collection, filter)?;
            let options = self.parse_options(options)?;
            self.guard(op, collection, &filter, None, options.limit)?;
            adapter.query_many(collection, &filter, &options).await
        }
        .await
        .map_err(|err| self.fail(err, op, collection))?;

        self.logger
            .observe_read(op, collection, elapsed_ms(started));
        Ok(result)
    }

    pub(crate) async fn op_count(
        &self,
        adapter: &dyn DatabaseAdapter,
        collection: &str,
        filter: &Value,
    ) -> Result<u64, DbError> {
        let op = OperationKind::Count;
        let started = Instant::now();
        let result = async {
            let filter = self.prepare_filter(collection, filter)?;
            adapter.count(collection, &filter).await
        }
        .await
        .map_err(|err| self.fail(err, op, collection))?;

        self.logger
            .observe_read(op, collection, elapsed_ms(started));
        Ok(result)
    }

    pub(crate) async fn op_insert_one(
        &self,
        adapter: &dyn DatabaseAdapter,
        collection: &str,
        document: &Value,
    ) -> Result<WriteReceipt, DbError> {
        let op = OperationKind::InsertOne;
        let result = async {
            let doc = self.prepare_insert_document(collection, document)?;
            adapter.insert_one(collection, doc).await
        }
        .await
        .map_err(|err| self.fail(err, op, collection))?;

        self.logger.observe(&result);
        Ok(result)
    }

    pub(crate) async fn op_insert_many(
        &self,
        adapter: &dyn DatabaseAdapter,
        collection: &str,
        documents: &Value,
    ) -> Result<WriteReceipt, DbError> {
        let op = OperationKind::InsertMany;
        let result = async {
            let raw = documents.as_array().ok_or_else(|| {
                DbError::query_error(
                    "insert_many requires an array of documents.",
                    "Pass [{...}, {...}] with at least one document.",
                )
            })?;

            // Validate the whole batch before any driver call so a failure
            // aborts with nothing partially inserted.
            let mut prepared = Vec::with_capacity(raw.len());
            for document in raw {
                prepared.push(self.prepare_insert_document(collection, document)?);
            }
            adapter.insert_many(collection, prepared).await
        }
        .await
        .map_err(|err| self.fail(err, op, collection))?;

        self.logger.observe(&result);
        Ok(result)
    }

    pub(crate) async fn op_update_one(
        &self,
        adapter: &dyn DatabaseAdapter,
        collection: &str,
        filter: &Value,
        update: &Value,
        upsert: bool,
    ) -> Result<WriteReceipt, DbError> {
        let op = OperationKind::UpdateOne;
        let result = async {
            let filter = self.prepare_filter(collection, filter)?;
            let update = self.prepare_update(update)?;
            adapter.update_one(collection, &filter, &update, upsert).await
        }
        .await
        .map_err(|err| self.fail(err, op, collection))?;

        self.logger.observe(&result);
        Ok(result)
    }

    pub(crate) async fn op_update_many(
        &self,
        adapter: &dyn DatabaseAdapter,
        collection: &str,
        filter: &Value,
        update: &Value,
        confirm: Option<&str>,
    ) -> Result<WriteReceipt, DbError> {
        let op = OperationKind::UpdateMany;
        let result = async {
            let filter = self.prepare_filter(collection, filter)?;
            let confirm = self.parse_confirm(confirm)?;
            self.guard(op, collection, &filter, confirm, None)?;
            let update = self.prepare_update(update)?;
            adapter.update_many(collection, &filter, &update).await
        }
        .await
        .map_err(|err| self.fail(err, op, collection))?;

        self.logger.observe(&result);
        Ok(result)
    }

    pub(crate) async fn op_delete_one(
        &self,
        adapter: &dyn DatabaseAdapter,
        collection: &str,
        filter: &Value,
    ) -> Result<WriteReceipt, DbError> {
        let op = OperationKind::DeleteOne;
        let result = async {
            let filter = self.prepare_filter(collection, filter)?;
            self.guard(op, collection, &filter, None, None)?;
            adapter.delete_one(collection, &filter).await
        }
        .await
        .map_err(|err| self.fail(err, op, collection))?;

        self.logger.observe(&result);
        Ok(result)
    }

    pub(crate) async fn op_delete_many(
        &self,
        adapter: &dyn DatabaseAdapter,
        collection: &str,
        filter: &Value,
        confirm: Option<&str>,
    ) -> Result<WriteReceipt, DbError> {
        let op = OperationKind::DeleteMany;
        let result = async {
            let filter = self.prepare_filter(collection, filter)?;
            let confirm = self.parse_confirm(confirm)?;
            self.guard(op, collection, &filter, confirm, None)?;
            adapter.delete_many(collection, &filter).await
        }
        .await
        .map_err(|err| self.fail(err, op, collection))?;

        self.logger.observe(&result);
        Ok(result)
    }

    /// Parse and sanitize a caller filter for this backend.
    pub(crate) fn prepare_filter(
        &self,
        collection: &str,
        filter: &Value,
    ) -> Result<Filter, DbError> {
        let filter = Filter::parse(filter)?;
        if !self.config.sanitize {
            return Ok(filter);
        }

        check_filter_regexes(&filter)?;
        match self.backend.family() {
            BackendFamily::Relational => check_field_whitelist(&filter, collection)?,
            BackendFamily::Search => {
                check_index_name(collection)?;
                check_reserved_fields(&filter)?;
            }
            BackendFamily::Document => {}
        }
        Ok(filter)
    }

    fn prepare_update(&self, update: &Value) -> Result<Update, DbError> {
        let mut update = Update::parse(update)?;
        if self.config.sanitize && !self.config.sanitize_rules.is_empty() && !update.set.is_empty()
        {
            let set_map: Document = update.set.iter().cloned().collect();
            let transformed = apply_sanitize_rules(&set_map, &self.config.sanitize_rules);
            update.set = transformed.into_iter().collect();
            update.rebuild_raw();
        }
        Ok(inject_update_timestamps(
            &update,
            &self.config.timestamps,
            Utc::now(),
        ))
    }

    fn prepare_insert_document(
        &self,
        collection: &str,
        document: &Value,
    ) -> Result<Document, DbError> {
        let doc = document.as_object().ok_or_else(|| {
            DbError::query_error(
                "Document must be a JSON object.",
                "Pass an object such as {\"name\": \"Ada\"}.",
            )
        })?;

        let doc = if self.config.sanitize {
            apply_sanitize_rules(doc, &self.config.sanitize_rules)
        } else {
            doc.clone()
        };

        if self.config.schema_validation {
            if let Some(schema) = SchemaRegistry::get(collection) {
                let issues = schema.validate_document(&doc);
                if !issues.is_empty() {
                    let summary = issues
                        .iter()
                        .map(|i| format!("{}: {}", i.field, i.message))
                        .collect::<Vec<_>>()
                        .join("; ");
                    return Err(DbError::validation_error(
                        format!(
                            "Document failed schema validation for '{}' ({}).",
                            collection, summary
                        ),
                        "Run validate with this document to see the failing fields.",
                    ));
                }
            }
        }

        Ok(inject_insert_timestamps(
            &doc,
            &self.config.timestamps,
            Utc::now(),
        ))
    }

    fn parse_options(&self, options: Option<&Value>) -> Result<QueryOptions, DbError> {
        match options {
            Some(value) => QueryOptions::parse(value),
            None => Ok(QueryOptions::default()),
        }
    }

    fn parse_confirm(&self, confirm: Option<&str>) -> Result<Option<ConfirmToken>, DbError> {
        match confirm {
            None => Ok(None),
            Some(token) => ConfirmToken::parse(token).map(Some).ok_or_else(|| {
                DbError::query_error(
                    format!("Unknown confirm token '{}'.", token),
                    "Valid tokens: DELETE_ALL, UPDATE_ALL.",
                )
            }),
        }
    }

    fn guard(
        &self,
        operation: OperationKind,
        collection: &str,
        filter: &Filter,
        confirm: Option<ConfirmToken>,
        limit: Option<u64>,
    ) -> Result<(), DbError> {
        check_guardrails(
            self.config.guardrails,
            operation,
            collection,
            filter,
            confirm,
            limit,
            Some(&self.bus),
        )
    }

    fn parse_batch_steps(&self, steps: &Value) -> Result<Vec<BatchStep>, DbError> {
        let raw = steps.as_array().ok_or_else(|| {
            DbError::query_error(
                "batch requires an array of operation records.",
                "Pass [{\"operation\": \"insert_one\", \"collection\": \"users\", \
                 \"document\": {...}}, ...].",
            )
        })?;

        let mut parsed = Vec::with_capacity(raw.len());
        for step in raw {
            let obj = step.as_object().ok_or_else(|| {
                DbError::query_error(
                    "Each batch step must be a JSON object.",
                    "Give every step an operation, a collection, and its payload.",
                )
            })?;
            let operation = obj
                .get("operation")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    DbError::query_error(
                        "Batch step is missing the operation field.",
                        "Set operation to one of insert_one, insert_many, update_one, \
                         update_many, delete_one, delete_many.",
                    )
                })?;
            let collection = obj
                .get("collection")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    DbError::query_error(
                        "Batch step is missing the collection field.",
                        "Name the target collection in every step.",
                    )
                })?
                .to_string();

            let payload = |key: &str| -> Result<&Value, DbError> {
                obj.get(key).ok_or_else(|| {
                    DbError::query_error(
                        format!("Batch step '{}' is missing '{}'.", operation, key),
                        format!("Add the '{}' field to the step.", key),
                    )
                })
            };

            let step = match parse_operation_name(operation)? {
                OperationKind::InsertOne => BatchStep::InsertOne {
                    document: self.prepare_insert_document(&collection, payload("document")?)?,
                    collection,
                },
                OperationKind::InsertMany => {
                    let raw_docs = payload("documents")?.as_array().ok_or_else(|| {
                        DbError::query_error(
                            "insert_many step requires a documents array.",
                            "Pass documents as [{...}, {...}].",
                        )
                    })?;
                    let mut documents = Vec::with_capacity(raw_docs.len());
                    for document in raw_docs {
                        documents.push(self.prepare_insert_document(&collection, document)?);
                    }
                    BatchStep::InsertMany {
                        collection,
                        documents,
                    }
                }
                OperationKind::UpdateOne => {
                    let filter = self.prepare_filter(&collection, payload("filter")?)?;
                    let update = self.prepare_update(payload("update")?)?;
                    BatchStep::UpdateOne {
                        collection,
                        filter,
                        update,
                    }
                }
                OperationKind::UpdateMany => {
                    let filter = self.prepare_filter(&collection, payload("filter")?)?;
                    self.guard(OperationKind::UpdateMany, &collection, &filter, None, None)?;
                    let update = self.prepare_update(payload("update")?)?;
                    BatchStep::UpdateMany {
                        collection,
                        filter,
                        update,
                    }
                }
                OperationKind::DeleteOne => {
                    let filter = self.prepare_filter(&collection, payload("filter")?)?;
                    self.guard(OperationKind::DeleteOne, &collection, &filter, None, None)?;
                    BatchStep::DeleteOne { collection, filter }
                }
                OperationKind::DeleteMany => {
                    let filter = self.prepare_filter(&collection, payload("filter")?)?;
                    self.guard(OperationKind::DeleteMany, &collection, &filter, None, None)?;
                    BatchStep::DeleteMany { collection, filter }
                }
                other => {
                    return Err(DbError::query_error(
                        format!("Operation '{}' is not valid inside a batch.", other),
                        "Batch steps must be writes: insert, update, or delete operations.",
                    ));
                }
            };
            parsed.push(step);
        }
        Ok(parsed)
    }

    pub(crate) async fn adapter_facts(
        &self,
        collection: &str,
    ) -> Result<unidb_core::CollectionFacts, DbError> {
        self.adapter.describe_collection(collection).await
    }

    pub(crate) fn adapter_explain(
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

    /// Attach context, publish the error event, and kick the reconnect
    /// controller for connection-level failures.
    pub(crate) fn fail(
        &self,
        mut err: DbError,
        operation: OperationKind,
        collection: &str,
    ) -> DbError {
        if err.collection.is_none() {
            err.collection = Some(collection.to_string());
        }
        if err.operation.is_none() {
            err.operation = Some(operation.as_str().to_string());
        }
        if err.backend.is_none() {
            err.backend = Some(self.backend);
        }

        // The guardrail path has already published its own event.
        if err.code != ErrorCode::GuardrailBlocked {
            self.logger.observe_error(&err);
        }

        if matches!(
            err.code,
            ErrorCode::ConnectionLost | ErrorCode::ConnectionFailed
        ) {
            self.trigger_reconnect(err.message.clone());
        }
        err
    }

    fn trigger_reconnect(&self, reason: String) {
        if !self.reconnect.policy().enabled {
            return;
        }
        let controller = Arc::clone(&self.reconnect);
        let adapter = Arc::clone(&self.adapter);
        tokio::spawn(async move {
            let connect = {
                let adapter = Arc::clone(&adapter);
                move || {
                    let adapter = Arc::clone(&adapter);
                    async move { adapter.connect().await }
                }
            };
            if let Err(err) = controller.run(&reason, connect).await {
                log::error!("reconnect gave up: {}", err);
            }
        });
    }
}

/// Map an operation name from the wire to its kind.
///
/// Foreign method names from other client libraries get a redirecting
/// `UNSUPPORTED_OPERATION` error naming the API equivalent.
pub fn parse_operation_name(name: &str) -> Result<OperationKind, DbError> {
    let kind = match name {
        "query_one" => OperationKind::QueryOne,
        "query_many" => OperationKind::QueryMany,
        "query_with_lookup" => OperationKind::QueryWithLookup,
        "count" => OperationKind::Count,
        "insert_one" => OperationKind::InsertOne,
        "insert_many" => OperationKind::InsertMany,
        "update_one" => OperationKind::UpdateOne,
        "update_many" => OperationKind::UpdateMany,
        "delete_one" => OperationKind::DeleteOne,
        "delete_many" => OperationKind::DeleteMany,
        "batch" => OperationKind::Batch,
        other => {
            if let Some(err) = suggest_operation(other) {
                return Err(err);
            }
            return Err(DbError::unsupported_operation(
                format!("Unknown operation '{}'.", other),
                "Valid operations: query_one, query_many, query_with_lookup, count, \
                 insert_one, insert_many, update_one, update_many, delete_one, delete_many, \
                 batch.",
            ));
        }
    };
    Ok(kind)
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

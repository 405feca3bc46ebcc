use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use unidb_core::{
    DbError, DocFindOptions, Document, DocumentExecutor, MutationOutcome, PoolStats,
    TransactionToken,
};

/// One call as seen by the fake document executor.
#[derive(Debug, Clone)]
pub enum RecordedDocumentCall {
    Find {
        collection: String,
        filter: Value,
        sort: Option<Value>,
        limit: Option<u64>,
        skip: Option<u64>,
        projection: Option<Value>,
        in_transaction: bool,
    },
    Count {
        collection: String,
        filter: Value,
    },
    Insert {
        collection: String,
        documents: Vec<Document>,
        in_transaction: bool,
    },
    Update {
        collection: String,
        filter: Value,
        update: Value,
        many: bool,
        upsert: bool,
        in_transaction: bool,
    },
    Delete {
        collection: String,
        filter: Value,
        many: bool,
        in_transaction: bool,
    },
    CreateCollection {
        collection: String,
    },
    CreateIndex {
        collection: String,
        name: String,
        keys: Value,
        unique: bool,
    },
}

#[derive(Default)]
struct State {
    find_results: Mutex<HashMap<String, Vec<Document>>>,
    update_outcome: Mutex<Option<MutationOutcome>>,
    delete_result: Mutex<Option<u64>>,
    count_result: Mutex<Option<u64>>,
    calls: Mutex<Vec<RecordedDocumentCall>>,
    begun: AtomicUsize,
    committed: AtomicUsize,
    rolled_back: AtomicUsize,
}

/// Scripted document-store executor: find results are keyed by collection.
#[derive(Clone, Default)]
pub struct FakeDocumentExecutor {
    state: Arc<State>,
}

impl FakeDocumentExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_find_results(self, collection: impl Into<String>, docs: Vec<Document>) -> Self {
        self.state
            .find_results
            .lock()
            .unwrap()
            .insert(collection.into(), docs);
        self
    }

    pub fn with_update_outcome(self, outcome: MutationOutcome) -> Self {
        *self.state.update_outcome.lock().unwrap() = Some(outcome);
        self
    }

    pub fn with_delete_result(self, deleted: u64) -> Self {
        *self.state.delete_result.lock().unwrap() = Some(deleted);
        self
    }

    pub fn with_count_result(self, count: u64) -> Self {
        *self.state.count_result.lock().unwrap() = Some(count);
        self
    }

    pub fn calls(&self) -> Vec<RecordedDocumentCall> {
        self.state.calls.lock().unwrap().clone()
    }

    pub fn transactions(&self) -> (usize, usize, usize) {
        (
            self.state.begun.load(Ordering::SeqCst),
            self.state.committed.load(Ordering::SeqCst),
            self.state.rolled_back.load(Ordering::SeqCst),
        )
    }
}

#[async_trait]
impl DocumentExecutor for FakeDocumentExecutor {
    fn driver_name(&self) -> &str {
        "fake-document"
    }

    async fn connect(&self) -> Result<(), DbError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), DbError> {
        Ok(())
    }

    async fn ping(&self) -> Result<(), DbError> {
        Ok(())
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Value,
        options: &DocFindOptions,
        tx: Option<&TransactionToken>,
    ) -> Result<Vec<Document>, DbError> {
        self.state
            .calls
            .lock()
            .unwrap()
            .push(RecordedDocumentCall::Find {
                collection: collection.to_string(),
                filter: filter.clone(),
                sort: options.sort.clone(),
                limit: options.limit,
                skip: options.skip,
                projection: options.projection.clone(),
                in_transaction: tx.is_some(),
            });

        let mut docs = self
            .state
            .find_results
            .lock()
            .unwrap()
            .get(collection)
            .cloned()
            .unwrap_or_default();
        if let Some(limit) = options.limit {
            docs.truncate(limit as usize);
        }
        Ok(docs)
    }

    async fn count(
        &self,
        collection: &str,
        filter: &Value,
        _tx: Option<&TransactionToken>,
    ) -> Result<u64, DbError> {
        self.state
            .calls
            .lock()
            .unwrap()
            .push(RecordedDocumentCall::Count {
                collection: collection.to_string(),
                filter: filter.clone(),
            });
        Ok(self.state.count_result.lock().unwrap().unwrap_or(0))
    }

    async fn insert(
        &self,
        collection: &str,
        documents: &[Document],
        tx: Option<&TransactionToken>,
    ) -> Result<u64, DbError> {
        self.state
            .calls
            .lock()
            .unwrap()
            .push(RecordedDocumentCall::Insert {
                collection: collection.to_string(),
                documents: documents.to_vec(),
                in_transaction: tx.is_some(),
            });
        Ok(documents.len() as u64)
    }

    async fn update(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
        many: bool,
        upsert: bool,
        tx: Option<&TransactionToken>,
    ) -> Result<MutationOutcome, DbError> {
        self.state
            .calls
            .lock()
            .unwrap()
            .push(RecordedDocumentCall::Update {
                collection: collection.to_string(),
                filter: filter.clone(),
                update: update.clone(),
                many,
                upsert,
                in_transaction: tx.is_some(),
            });
        Ok(self
            .state
            .update_outcome
            .lock()
            .unwrap()
            .unwrap_or(MutationOutcome {
                matched: 1,
                modified: 1,
                upserted: 0,
            }))
    }

    async fn delete(
        &self,
        collection: &str,
        filter: &Value,
        many: bool,
        tx: Option<&TransactionToken>,
    ) -> Result<u64, DbError> {
        self.state
            .calls
            .lock()
            .unwrap()
            .push(RecordedDocumentCall::Delete {
                collection: collection.to_string(),
                filter: filter.clone(),
                many,
                in_transaction: tx.is_some(),
            });
        Ok(self.state.delete_result.lock().unwrap().unwrap_or(1))
    }

    async fn create_collection(&self, collection: &str) -> Result<(), DbError> {
        self.state
            .calls
            .lock()
            .unwrap()
            .push(RecordedDocumentCall::CreateCollection {
                collection: collection.to_string(),
            });
        Ok(())
    }

    async fn create_index(
        &self,
        collection: &str,
        name: &str,
        keys: &Value,
        unique: bool,
    ) -> Result<(), DbError> {
        self.state
            .calls
            .lock()
            .unwrap()
            .push(RecordedDocumentCall::CreateIndex {
                collection: collection.to_string(),
                name: name.to_string(),
                keys: keys.clone(),
                unique,
            });
        Ok(())
    }

    async fn begin(&self) -> Result<TransactionToken, DbError> {
        self.state.begun.fetch_add(1, Ordering::SeqCst);
        Ok(TransactionToken::new())
    }

    async fn commit(&self, _tx: &TransactionToken) -> Result<(), DbError> {
        self.state.committed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self, _tx: &TransactionToken) -> Result<(), DbError> {
        self.state.rolled_back.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn pool_stats(&self) -> PoolStats {
        PoolStats {
            active: 1,
            idle: 4,
            waiting: 0,
            max: 5,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use unidb_core::{
    BulkOp, BulkOutcome, DbError, Document, MutationOutcome, PoolStats, SearchExecutor,
};

/// One call as seen by the fake search executor.
#[derive(Debug, Clone)]
pub enum RecordedSearchCall {
    Search {
        index: String,
        query: Value,
        sort: Vec<Value>,
        from: Option<u64>,
        size: Option<u64>,
        source: Option<Value>,
    },
    Count {
        index: String,
        query: Value,
    },
    IndexDocs {
        index: String,
        documents: Vec<Document>,
    },
    UpdateByQuery {
        index: String,
        query: Value,
        script: Value,
        max_docs: Option<u64>,
    },
    DeleteByQuery {
        index: String,
        query: Value,
        max_docs: Option<u64>,
    },
    Bulk {
        index: String,
        ops: usize,
    },
    EnsureIndex {
        index: String,
        mappings: Value,
    },
}

#[derive(Default)]
struct State {
    search_results: Mutex<HashMap<String, Vec<Document>>>,
    update_outcome: Mutex<Option<MutationOutcome>>,
    delete_result: Mutex<Option<u64>>,
    count_result: Mutex<Option<u64>>,
    calls: Mutex<Vec<RecordedSearchCall>>,
}

/// Scripted search-engine executor: search results are keyed by index.
#[derive(Clone, Default)]
pub struct FakeSearchExecutor {
    state: Arc<State>,
}

impl FakeSearchExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search_results(self, index: impl Into<String>, docs: Vec<Document>) -> Self {
        self.state
            .search_results
            .lock()
            .unwrap()
            .insert(index.into(), docs);
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

    pub fn calls(&self) -> Vec<RecordedSearchCall> {
        self.state.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchExecutor for FakeSearchExecutor {
    fn driver_name(&self) -> &str {
        "fake-search"
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

    async fn search(
        &self,
        index: &str,
        query: &Value,
        sort: &[Value],
        from: Option<u64>,
        size: Option<u64>,
        source: Option<&Value>,
    ) -> Result<Vec<Document>, DbError> {
        self.state
            .calls
            .lock()
            .unwrap()
            .push(RecordedSearchCall::Search {
                index: index.to_string(),
                query: query.clone(),
                sort: sort.to_vec(),
                from,
                size,
                source: source.cloned(),
            });

        let mut docs = self
            .state
            .search_results
            .lock()
            .unwrap()
            .get(index)
            .cloned()
            .unwrap_or_default();
        if let Some(size) = size {
            docs.truncate(size as usize);
        }
        Ok(docs)
    }

    async fn count(&self, index: &str, query: &Value) -> Result<u64, DbError> {
        self.state
            .calls
            .lock()
            .unwrap()
            .push(RecordedSearchCall::Count {
                index: index.to_string(),
                query: query.clone(),
            });
        Ok(self.state.count_result.lock().unwrap().unwrap_or(0))
    }

    async fn index_docs(&self, index: &str, documents: &[Document]) -> Result<u64, DbError> {
        self.state
            .calls
            .lock()
            .unwrap()
            .push(RecordedSearchCall::IndexDocs {
                index: index.to_string(),
                documents: documents.to_vec(),
            });
        Ok(documents.len() as u64)
    }

    async fn update_by_query(
        &self,
        index: &str,
        query: &Value,
        script: &Value,
        max_docs: Option<u64>,
    ) -> Result<MutationOutcome, DbError> {
        self.state
            .calls
            .lock()
            .unwrap()
            .push(RecordedSearchCall::UpdateByQuery {
                index: index.to_string(),
                query: query.clone(),
                script: script.clone(),
                max_docs,
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

    async fn delete_by_query(
        &self,
        index: &str,
        query: &Value,
        max_docs: Option<u64>,
    ) -> Result<u64, DbError> {
        self.state
            .calls
            .lock()
            .unwrap()
            .push(RecordedSearchCall::DeleteByQuery {
                index: index.to_string(),
                query: query.clone(),
                max_docs,
            });
        Ok(self.state.delete_result.lock().unwrap().unwrap_or(1))
    }

    async fn bulk(&self, index: &str, ops: &[BulkOp]) -> Result<BulkOutcome, DbError> {
        self.state.calls.lock().unwrap().push(RecordedSearchCall::Bulk {
            index: index.to_string(),
            ops: ops.len(),
        });
        let mut outcome = BulkOutcome::default();
        for op in ops {
            match op {
                BulkOp::Index { .. } => outcome.indexed += 1,
                BulkOp::Delete { .. } => outcome.deleted += 1,
            }
        }
        Ok(outcome)
    }

    async fn ensure_index(&self, index: &str, mappings: &Value) -> Result<(), DbError> {
        self.state
            .calls
            .lock()
            .unwrap()
            .push(RecordedSearchCall::EnsureIndex {
                index: index.to_string(),
                mappings: mappings.clone(),
            });
        Ok(())
    }

    fn pool_stats(&self) -> PoolStats {
        PoolStats {
            active: 1,
            idle: 1,
            waiting: 0,
            max: 2,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

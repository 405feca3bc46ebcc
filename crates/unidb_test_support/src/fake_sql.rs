use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use unidb_core::{
    DbError, Document, ErrorCode, PoolStats, SqlExecutor, SqlOutcome, TransactionToken,
};

/// One executed statement as seen by the fake.
#[derive(Debug, Clone)]
pub struct RecordedStatement {
    pub sql: String,
    pub params: Vec<Value>,
    pub in_transaction: bool,
}

#[derive(Clone)]
enum Scripted {
    Rows(Vec<Document>),
    Affected(u64),
    Error(ErrorCode, String),
}

#[derive(Default)]
struct State {
    scripted: Mutex<HashMap<String, Scripted>>,
    default_outcome: Mutex<Option<Scripted>>,
    executed: Mutex<Vec<RecordedStatement>>,
    begun: AtomicUsize,
    committed: AtomicUsize,
    rolled_back: AtomicUsize,
    connects: AtomicUsize,
    closes: AtomicUsize,
    connect_error: Mutex<Option<String>>,
}

/// Scripted SQL executor: statements are matched by exact SQL text.
#[derive(Clone, Default)]
pub struct FakeSqlExecutor {
    state: Arc<State>,
}

impl FakeSqlExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(self, sql: impl Into<String>, rows: Vec<Document>) -> Self {
        self.state
            .scripted
            .lock()
            .unwrap()
            .insert(sql.into(), Scripted::Rows(rows));
        self
    }

    pub fn with_affected(self, sql: impl Into<String>, affected: u64) -> Self {
        self.state
            .scripted
            .lock()
            .unwrap()
            .insert(sql.into(), Scripted::Affected(affected));
        self
    }

    pub fn with_error(self, sql: impl Into<String>, code: ErrorCode, message: &str) -> Self {
        self.state
            .scripted
            .lock()
            .unwrap()
            .insert(sql.into(), Scripted::Error(code, message.to_string()));
        self
    }

    pub fn with_default_affected(self, affected: u64) -> Self {
        *self.state.default_outcome.lock().unwrap() = Some(Scripted::Affected(affected));
        self
    }

    pub fn with_connect_error(self, message: impl Into<String>) -> Self {
        *self.state.connect_error.lock().unwrap() = Some(message.into());
        self
    }

    /// Statements executed so far, in order.
    pub fn executed(&self) -> Vec<RecordedStatement> {
        self.state.executed.lock().unwrap().clone()
    }

    pub fn transactions(&self) -> (usize, usize, usize) {
        (
            self.state.begun.load(Ordering::SeqCst),
            self.state.committed.load(Ordering::SeqCst),
            self.state.rolled_back.load(Ordering::SeqCst),
        )
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SqlExecutor for FakeSqlExecutor {
    fn driver_name(&self) -> &str {
        "fake-sql"
    }

    async fn connect(&self) -> Result<(), DbError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.state.connect_error.lock().unwrap().clone() {
            return Err(DbError::connection_failed(message, "Check the fake setup."));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), DbError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&self) -> Result<(), DbError> {
        Ok(())
    }

    async fn execute(
        &self,
        sql: &str,
        params: &[Value],
        tx: Option<&TransactionToken>,
    ) -> Result<SqlOutcome, DbError> {
        self.state.executed.lock().unwrap().push(RecordedStatement {
            sql: sql.to_string(),
            params: params.to_vec(),
            in_transaction: tx.is_some(),
        });

        let scripted = self
            .state
            .scripted
            .lock()
            .unwrap()
            .get(sql)
            .cloned()
            .or_else(|| self.state.default_outcome.lock().unwrap().clone());

        match scripted {
            Some(Scripted::Rows(rows)) => Ok(SqlOutcome::rows(rows)),
            Some(Scripted::Affected(affected)) => Ok(SqlOutcome::affected(affected)),
            Some(Scripted::Error(code, message)) => {
                Err(DbError::new(code, message, "Scripted failure."))
            }
            None => Ok(SqlOutcome::default()),
        }
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
            idle: 9,
            waiting: 0,
            max: 10,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

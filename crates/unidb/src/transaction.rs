use serde_json::Value;

use unidb_core::{DatabaseAdapter, DbError, Document, TransactionScope, WriteReceipt};

use crate::Database;

/// A transactional scope: the same operation surface as [`Database`], bound
/// to a child adapter that shares the driver handle under one transaction
/// token. Operations on a scope execute sequentially and atomically relative
/// to one another.
pub struct Transaction<'a> {
    db: &'a Database,
    scope: Box<dyn TransactionScope>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(db: &'a Database, scope: Box<dyn TransactionScope>) -> Self {
        Self { db, scope }
    }

    fn adapter(&self) -> &dyn DatabaseAdapter {
        &*self.scope
    }

    pub async fn query_one(
        &self,
        collection: &str,
        filter: &Value,
        options: Option<&Value>,
    ) -> Result<Option<Document>, DbError> {
        self.db
            .op_query_one(self.adapter(), collection, filter, options)
            .await
    }

    pub async fn query_many(
        &self,
        collection: &str,
        filter: &Value,
        options: Option<&Value>,
    ) -> Result<Vec<Document>, DbError> {
        self.db
            .op_query_many(self.adapter(), collection, filter, options)
            .await
    }

    pub async fn count(&self, collection: &str, filter: &Value) -> Result<u64, DbError> {
        self.db.op_count(self.adapter(), collection, filter).await
    }

    pub async fn insert_one(
        &self,
        collection: &str,
        document: &Value,
    ) -> Result<WriteReceipt, DbError> {
        self.db
            .op_insert_one(self.adapter(), collection, document)
            .await
    }

    pub async fn insert_many(
        &self,
        collection: &str,
        documents: &Value,
    ) -> Result<WriteReceipt, DbError> {
        self.db
            .op_insert_many(self.adapter(), collection, documents)
            .await
    }

    pub async fn update_one(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
        upsert: bool,
    ) -> Result<WriteReceipt, DbError> {
        self.db
            .op_update_one(self.adapter(), collection, filter, update, upsert)
            .await
    }

    pub async fn update_many(
        &self,
        collection: &str,
        filter: &Value,
        update: &Value,
        confirm: Option<&str>,
    ) -> Result<WriteReceipt, DbError> {
        self.db
            .op_update_many(self.adapter(), collection, filter, update, confirm)
            .await
    }

    pub async fn delete_one(
        &self,
        collection: &str,
        filter: &Value,
    ) -> Result<WriteReceipt, DbError> {
        self.db
            .op_delete_one(self.adapter(), collection, filter)
            .await
    }

    pub async fn delete_many(
        &self,
        collection: &str,
        filter: &Value,
        confirm: Option<&str>,
    ) -> Result<WriteReceipt, DbError> {
        self.db
            .op_delete_many(self.adapter(), collection, filter, confirm)
            .await
    }

    /// Commit the scope's transaction.
    pub async fn commit(self) -> Result<(), DbError> {
        self.scope.commit().await
    }

    /// Roll the scope's transaction back.
    pub async fn rollback(self) -> Result<(), DbError> {
        self.scope.rollback().await
    }
}

use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;

/// Operation kinds exposed by the façade and recorded in receipts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    QueryOne,
    QueryMany,
    QueryWithLookup,
    Count,
    InsertOne,
    InsertMany,
    UpdateOne,
    UpdateMany,
    DeleteOne,
    DeleteMany,
    Batch,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::QueryOne => "query_one",
            Self::QueryMany => "query_many",
            Self::QueryWithLookup => "query_with_lookup",
            Self::Count => "count",
            Self::InsertOne => "insert_one",
            Self::InsertMany => "insert_many",
            Self::UpdateOne => "update_one",
            Self::UpdateMany => "update_many",
            Self::DeleteOne => "delete_one",
            Self::DeleteMany => "delete_many",
            Self::Batch => "batch",
        }
    }

    /// Whether the operation mutates data.
    pub fn is_write(self) -> bool {
        !matches!(
            self,
            Self::QueryOne | Self::QueryMany | Self::QueryWithLookup | Self::Count
        )
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform structured result of every write.
///
/// Counts default to zero and `success` to true; adapters fill in what the
/// backend reported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteReceipt {
    pub operation: OperationKind,
    pub collection: String,
    pub success: bool,
    pub matched: u64,
    pub modified: u64,
    pub inserted: u64,
    pub deleted: u64,
    pub duration_ms: u64,
    pub backend: BackendKind,
}

impl WriteReceipt {
    pub fn new(operation: OperationKind, collection: impl Into<String>, backend: BackendKind) -> Self {
        Self {
            operation,
            collection: collection.into(),
            success: true,
            matched: 0,
            modified: 0,
            inserted: 0,
            deleted: 0,
            duration_ms: 0,
            backend,
        }
    }

    pub fn with_matched(mut self, matched: u64) -> Self {
        self.matched = matched;
        self
    }

    pub fn with_modified(mut self, modified: u64) -> Self {
        self.modified = modified;
        self
    }

    pub fn with_inserted(mut self, inserted: u64) -> Self {
        self.inserted = inserted;
        self
    }

    pub fn with_deleted(mut self, deleted: u64) -> Self {
        self.deleted = deleted;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Fold another receipt's counts into this one (batch accounting).
    pub fn absorb(&mut self, other: &WriteReceipt) {
        self.matched += other.matched;
        self.modified += other.modified;
        self.inserted += other.inserted;
        self.deleted += other.deleted;
        self.success &= other.success;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_zero_and_success() {
        let receipt = WriteReceipt::new(OperationKind::InsertOne, "users", BackendKind::Sqlite);
        assert!(receipt.success);
        assert_eq!(receipt.matched, 0);
        assert_eq!(receipt.inserted, 0);
        assert_eq!(receipt.duration_ms, 0);
    }

    #[test]
    fn absorb_sums_counts() {
        let mut batch = WriteReceipt::new(OperationKind::Batch, "batch", BackendKind::Postgres);
        batch.absorb(
            &WriteReceipt::new(OperationKind::InsertMany, "users", BackendKind::Postgres)
                .with_inserted(3),
        );
        batch.absorb(
            &WriteReceipt::new(OperationKind::DeleteMany, "users", BackendKind::Postgres)
                .with_deleted(2),
        );

        assert_eq!(batch.inserted, 3);
        assert_eq!(batch.deleted, 2);
        assert!(batch.success);
    }

    #[test]
    fn operation_names_match_the_tool_surface() {
        assert_eq!(OperationKind::QueryOne.as_str(), "query_one");
        assert_eq!(OperationKind::Batch.as_str(), "batch");
        assert!(OperationKind::UpdateMany.is_write());
        assert!(!OperationKind::Count.is_write());
    }
}

use std::sync::Arc;

use crate::error::DbError;
use crate::events::{Event, EventBus};
use crate::receipt::WriteReceipt;

/// Watches every receipt: publishes `operation`, and `slow-query` when the
/// duration reaches the configured threshold. Mirrors to the `log` facade.
pub struct OperationLogger {
    bus: Arc<EventBus>,
    slow_query_ms: u64,
    verbose: bool,
}

impl OperationLogger {
    pub fn new(bus: Arc<EventBus>, slow_query_ms: u64, verbose: bool) -> Self {
        Self {
            bus,
            slow_query_ms,
            verbose,
        }
    }

    pub fn slow_query_ms(&self) -> u64 {
        self.slow_query_ms
    }

    /// Observe a finished operation's receipt.
    pub fn observe(&self, receipt: &WriteReceipt) {
        if self.verbose {
            log::debug!(
                "{} on '{}' ({}): matched={} modified={} inserted={} deleted={} in {}ms",
                receipt.operation,
                receipt.collection,
                receipt.backend,
                receipt.matched,
                receipt.modified,
                receipt.inserted,
                receipt.deleted,
                receipt.duration_ms
            );
        }

        self.bus.publish(&Event::Operation {
            receipt: receipt.clone(),
        });

        if receipt.duration_ms >= self.slow_query_ms {
            log::warn!(
                "slow query: {} on '{}' took {}ms (threshold {}ms)",
                receipt.operation,
                receipt.collection,
                receipt.duration_ms,
                self.slow_query_ms
            );
            self.bus.publish(&Event::SlowQuery {
                collection: receipt.collection.clone(),
                operation: receipt.operation,
                duration_ms: receipt.duration_ms,
                threshold_ms: self.slow_query_ms,
            });
        }
    }

    /// Observe a finished read; reads produce no receipt but still publish
    /// `slow-query` when they cross the threshold.
    pub fn observe_read(
        &self,
        operation: crate::receipt::OperationKind,
        collection: &str,
        duration_ms: u64,
    ) {
        if self.verbose {
            log::debug!("{} on '{}' in {}ms", operation, collection, duration_ms);
        }
        if duration_ms >= self.slow_query_ms {
            log::warn!(
                "slow query: {} on '{}' took {}ms (threshold {}ms)",
                operation,
                collection,
                duration_ms,
                self.slow_query_ms
            );
            self.bus.publish(&Event::SlowQuery {
                collection: collection.to_string(),
                operation,
                duration_ms,
                threshold_ms: self.slow_query_ms,
            });
        }
    }

    /// Publish an error event for a failed operation.
    pub fn observe_error(&self, err: &DbError) {
        log::error!("{} ({})", err, err.code);
        self.bus.publish(&Event::Error {
            code: err.code,
            message: err.message.clone(),
            collection: err.collection.clone(),
            operation: err.operation.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendKind;
    use crate::events::EventKind;
    use crate::receipt::OperationKind;
    use std::sync::Mutex;

    fn receipt(duration_ms: u64) -> WriteReceipt {
        WriteReceipt::new(OperationKind::UpdateMany, "users", BackendKind::Postgres)
            .with_duration_ms(duration_ms)
    }

    #[test]
    fn every_receipt_publishes_an_operation_event() {
        let bus = Arc::new(EventBus::new());
        let kinds = Arc::new(Mutex::new(Vec::new()));
        let sink = kinds.clone();
        bus.subscribe(None, Arc::new(move |e| sink.lock().unwrap().push(e.kind())));

        let logger = OperationLogger::new(bus, 1000, false);
        logger.observe(&receipt(10));

        assert_eq!(*kinds.lock().unwrap(), vec![EventKind::Operation]);
    }

    #[test]
    fn slow_queries_publish_both_events() {
        let bus = Arc::new(EventBus::new());
        let kinds = Arc::new(Mutex::new(Vec::new()));
        let sink = kinds.clone();
        bus.subscribe(None, Arc::new(move |e| sink.lock().unwrap().push(e.kind())));

        let logger = OperationLogger::new(bus, 1000, false);
        logger.observe(&receipt(1000));

        assert_eq!(
            *kinds.lock().unwrap(),
            vec![EventKind::Operation, EventKind::SlowQuery]
        );
    }

    #[test]
    fn errors_publish_error_events_with_context() {
        let bus = Arc::new(EventBus::new());
        let captured = Arc::new(Mutex::new(None));
        let sink = captured.clone();
        bus.subscribe(
            Some(EventKind::Error),
            Arc::new(move |e| {
                if let Event::Error { code, collection, .. } = e {
                    *sink.lock().unwrap() = Some((*code, collection.clone()));
                }
            }),
        );

        let logger = OperationLogger::new(bus, 1000, false);
        logger.observe_error(
            &DbError::query_error("Bad filter.", "Fix it.").with_collection("users"),
        );

        let captured = captured.lock().unwrap();
        let (code, collection) = captured.as_ref().expect("error event seen");
        assert_eq!(*code, crate::ErrorCode::QueryError);
        assert_eq!(collection.as_deref(), Some("users"));
    }
}

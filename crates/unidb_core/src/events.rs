use std::sync::{Arc, RwLock};

use uuid::Uuid;

use crate::backend::BackendKind;
use crate::error::ErrorCode;
use crate::receipt::{OperationKind, WriteReceipt};

/// Event kinds published on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Reconnecting,
    Reconnected,
    Error,
    Operation,
    SlowQuery,
    PoolStatus,
    GuardrailBlocked,
    Shutdown,
}

/// Typed lifecycle and per-operation events. Each kind carries a fixed
/// payload shape.
#[derive(Debug, Clone)]
pub enum Event {
    Connected {
        backend: BackendKind,
        /// Redacted URI; credentials never appear in events.
        uri: String,
    },
    Disconnected {
        backend: BackendKind,
        reason: String,
    },
    Reconnecting {
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
    },
    Reconnected {
        downtime_ms: u64,
        attempts: u32,
    },
    Error {
        code: ErrorCode,
        message: String,
        collection: Option<String>,
        operation: Option<String>,
    },
    Operation {
        receipt: WriteReceipt,
    },
    SlowQuery {
        collection: String,
        operation: OperationKind,
        duration_ms: u64,
        threshold_ms: u64,
    },
    PoolStatus {
        active: u32,
        idle: u32,
        waiting: u32,
        max: u32,
    },
    GuardrailBlocked {
        collection: String,
        operation: OperationKind,
        reason: String,
    },
    Shutdown {
        exit_code: i32,
        uptime_ms: u64,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected { .. } => EventKind::Connected,
            Self::Disconnected { .. } => EventKind::Disconnected,
            Self::Reconnecting { .. } => EventKind::Reconnecting,
            Self::Reconnected { .. } => EventKind::Reconnected,
            Self::Error { .. } => EventKind::Error,
            Self::Operation { .. } => EventKind::Operation,
            Self::SlowQuery { .. } => EventKind::SlowQuery,
            Self::PoolStatus { .. } => EventKind::PoolStatus,
            Self::GuardrailBlocked { .. } => EventKind::GuardrailBlocked,
            Self::Shutdown { .. } => EventKind::Shutdown,
        }
    }
}

pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

struct Subscriber {
    id: Uuid,
    kind: Option<EventKind>,
    handler: EventHandler,
}

/// Synchronous multi-subscriber event bus.
///
/// Dispatch is best-effort and FIFO within one emitter; handlers must not
/// block. Subscribers filtered by kind receive only matching events.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one event kind, or to every event with `kind = None`.
    /// Returns an id usable with [`EventBus::unsubscribe`].
    pub fn subscribe(&self, kind: Option<EventKind>, handler: EventHandler) -> Uuid {
        let id = Uuid::new_v4();
        self.subscribers
            .write()
            .expect("event bus poisoned")
            .push(Subscriber { id, kind, handler });
        id
    }

    pub fn unsubscribe(&self, id: Uuid) {
        self.subscribers
            .write()
            .expect("event bus poisoned")
            .retain(|s| s.id != id);
    }

    pub fn publish(&self, event: &Event) {
        let subscribers = self.subscribers.read().expect("event bus poisoned");
        for subscriber in subscribers.iter() {
            if subscriber.kind.is_none() || subscriber.kind == Some(event.kind()) {
                (subscriber.handler)(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn publishes_to_matching_subscribers_in_fifo_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = seen.clone();
        bus.subscribe(
            None,
            Arc::new(move |event| first.lock().unwrap().push(format!("all:{:?}", event.kind()))),
        );
        let second = seen.clone();
        bus.subscribe(
            Some(EventKind::Shutdown),
            Arc::new(move |_| second.lock().unwrap().push("shutdown".to_string())),
        );

        bus.publish(&Event::PoolStatus {
            active: 1,
            idle: 2,
            waiting: 0,
            max: 10,
        });
        bus.publish(&Event::Shutdown {
            exit_code: 0,
            uptime_ms: 5,
        });

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                "all:PoolStatus".to_string(),
                "all:Shutdown".to_string(),
                "shutdown".to_string(),
            ]
        );
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(Mutex::new(0usize));

        let counter = count.clone();
        let id = bus.subscribe(None, Arc::new(move |_| *counter.lock().unwrap() += 1));

        bus.publish(&Event::Shutdown {
            exit_code: 0,
            uptime_ms: 0,
        });
        bus.unsubscribe(id);
        bus.publish(&Event::Shutdown {
            exit_code: 0,
            uptime_ms: 0,
        });

        assert_eq!(*count.lock().unwrap(), 1);
    }
}

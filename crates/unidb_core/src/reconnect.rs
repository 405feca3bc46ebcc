use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;
use crate::error::{DbError, ErrorCode};
use crate::events::{Event, EventBus};

/// Reconnect policy with exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    #[serde(alias = "maxAttempts")]
    pub max_attempts: u32,
    #[serde(alias = "initialDelayMs")]
    pub initial_delay_ms: u64,
    #[serde(alias = "maxDelayMs")]
    pub max_delay_ms: u64,
    #[serde(alias = "backoffMultiplier")]
    pub backoff_multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 10,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Backoff delay before 1-based `attempt`, without jitter:
/// `min(initial × multiplier^(attempt−1), max)`.
pub fn base_delay_ms(policy: &ReconnectPolicy, attempt: u32) -> u64 {
    let factor = policy.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
    let delay = policy.initial_delay_ms as f64 * factor;
    (delay as u64).min(policy.max_delay_ms)
}

/// Apply ±25% uniform jitter.
fn jittered_ms(delay_ms: u64) -> u64 {
    let factor = rand::rng().random_range(0.75..=1.25);
    (delay_ms as f64 * factor) as u64
}

/// Per-adapter reconnect controller.
///
/// Drives the backoff loop on disconnect and publishes the lifecycle events;
/// the connect function is supplied by the adapter.
pub struct ReconnectController {
    policy: ReconnectPolicy,
    backend: BackendKind,
    bus: Arc<EventBus>,
    attempts: AtomicU32,
    last_disconnect: Mutex<Option<DateTime<Utc>>>,
    stopped: AtomicBool,
}

impl ReconnectController {
    pub fn new(policy: ReconnectPolicy, backend: BackendKind, bus: Arc<EventBus>) -> Self {
        Self {
            policy,
            backend,
            bus,
            attempts: AtomicU32::new(0),
            last_disconnect: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Attempts made in the current (or last) reconnect cycle.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn last_disconnect(&self) -> Option<DateTime<Utc>> {
        *self.last_disconnect.lock().expect("reconnect state poisoned")
    }

    /// Stop the controller; an in-flight loop exits before its next attempt.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Run the reconnect loop after a disconnect.
    ///
    /// Emits `disconnected` immediately, then `reconnecting` before each
    /// attempt. On success emits `reconnected` with the total downtime and
    /// resets the attempt counter. After `max_attempts` failures emits an
    /// `error` event with `CONNECTION_LOST` and returns the error.
    pub async fn run<F, Fut>(&self, reason: &str, connect: F) -> Result<(), DbError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(), DbError>>,
    {
        self.bus.publish(&Event::Disconnected {
            backend: self.backend,
            reason: reason.to_string(),
        });
        *self.last_disconnect.lock().expect("reconnect state poisoned") = Some(Utc::now());

        if !self.policy.enabled {
            return Err(self.exhausted(reason));
        }

        let down_since = Instant::now();
        self.attempts.store(0, Ordering::SeqCst);

        for attempt in 1..=self.policy.max_attempts {
            if self.stopped.load(Ordering::SeqCst) {
                return Err(DbError::connection_lost(
                    "Reconnect stopped during shutdown.",
                    "Reopen the connection with a fresh connect call.",
                )
                .with_backend(self.backend));
            }

            self.attempts.store(attempt, Ordering::SeqCst);
            let delay_ms = jittered_ms(base_delay_ms(&self.policy, attempt));

            self.bus.publish(&Event::Reconnecting {
                attempt,
                max_attempts: self.policy.max_attempts,
                delay_ms,
            });
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;

            match connect().await {
                Ok(()) => {
                    self.bus.publish(&Event::Reconnected {
                        downtime_ms: down_since.elapsed().as_millis() as u64,
                        attempts: attempt,
                    });
                    self.attempts.store(0, Ordering::SeqCst);
                    return Ok(());
                }
                Err(err) => {
                    log::warn!(
                        "reconnect attempt {}/{} failed: {}",
                        attempt,
                        self.policy.max_attempts,
                        err
                    );
                }
            }
        }

        let err = self.exhausted(reason);
        self.bus.publish(&Event::Error {
            code: ErrorCode::ConnectionLost,
            message: err.message.clone(),
            collection: None,
            operation: None,
        });
        Err(err)
    }

    fn exhausted(&self, reason: &str) -> DbError {
        DbError::connection_lost(
            format!("Connection lost: {}.", reason),
            "Verify the server is reachable, then reconnect.",
        )
        .with_backend(self.backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicUsize;

    fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            enabled: true,
            max_attempts,
            initial_delay_ms: 10,
            max_delay_ms: 40,
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn base_delay_doubles_and_caps() {
        let policy = ReconnectPolicy::default();
        assert_eq!(base_delay_ms(&policy, 1), 1000);
        assert_eq!(base_delay_ms(&policy, 2), 2000);
        assert_eq!(base_delay_ms(&policy, 5), 16000);
        assert_eq!(base_delay_ms(&policy, 6), 30000);
        assert_eq!(base_delay_ms(&policy, 10), 30000);
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        for _ in 0..100 {
            let delayed = jittered_ms(1000);
            assert!((750..=1250).contains(&delayed), "jitter out of range: {delayed}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_transient_failures() {
        let bus = Arc::new(EventBus::new());
        let kinds = Arc::new(StdMutex::new(Vec::new()));
        let sink = kinds.clone();
        bus.subscribe(None, std::sync::Arc::new(move |e| sink.lock().unwrap().push(e.kind())));

        let controller = ReconnectController::new(fast_policy(5), BackendKind::Postgres, bus);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        controller
            .run("socket closed", move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(DbError::connection_failed("still down", "wait"))
                    } else {
                        Ok(())
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(controller.attempts(), 0, "attempts reset on success");

        let kinds = kinds.lock().unwrap();
        assert_eq!(kinds[0], EventKind::Disconnected);
        assert_eq!(
            kinds.iter().filter(|k| **k == EventKind::Reconnecting).count(),
            3
        );
        assert_eq!(*kinds.last().unwrap(), EventKind::Reconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts_with_connection_lost() {
        let bus = Arc::new(EventBus::new());
        let kinds = Arc::new(StdMutex::new(Vec::new()));
        let sink = kinds.clone();
        bus.subscribe(None, std::sync::Arc::new(move |e| sink.lock().unwrap().push(e.kind())));

        let controller = ReconnectController::new(fast_policy(3), BackendKind::Mysql, bus);
        let err = controller
            .run("socket closed", || async {
                Err(DbError::connection_failed("still down", "wait"))
            })
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::ConnectionLost);
        let kinds = kinds.lock().unwrap();
        assert_eq!(
            kinds.iter().filter(|k| **k == EventKind::Reconnecting).count(),
            3
        );
        assert_eq!(*kinds.last().unwrap(), EventKind::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_policy_fails_immediately() {
        let bus = Arc::new(EventBus::new());
        let controller =
            ReconnectController::new(ReconnectPolicy::disabled(), BackendKind::Sqlite, bus);
        let err = controller
            .run("file locked", || async { Ok(()) })
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ConnectionLost);
    }
}

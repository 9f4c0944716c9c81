//! # Timed multicast of one event to all subscribed handlers.
//!
//! [`EventDispatcher::raise`] looks up the handlers registered for the event's
//! kind, runs each on its own spawned task, and waits for all of them under
//! one shared deadline.
//!
//! ## Per-event state machine
//! ```text
//! Idle ──► Dispatching(N pending) ──┬──► AllCompleted ──► Done
//!                                   └──► TimedOut ─────► Done
//! ```
//!
//! ## Rules
//! - Zero handlers: returns an empty list and spawns nothing.
//! - Each handler is invoked at most once per event and never retried.
//! - Errors and panics are recorded per handler; siblings are unaffected.
//! - On timeout every still-pending handler gets exactly one `TimedOut` record,
//!   the error list is frozen, and the stragglers are aborted on a separate task.
//!   Late completions cannot touch the returned list.
//! - A kind without a registry slot is a fatal consistency error.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::error::{DispatchError, InvocationError, InvocationFailure};
use crate::events::{CollectionEvent, EventKind};
use crate::queue::panic_message;

use super::handler::{EventHandler, HandlerIdentity};
use super::registry::CollectorEvents;

/// Fans events out to collector handlers with a shared timeout.
#[derive(Debug)]
pub struct EventDispatcher {
    timeout: Duration,
    work_items: AtomicU64,
}

impl EventDispatcher {
    /// Creates a dispatcher with the given fan-out timeout (at least 1ms).
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout: timeout.max(Duration::from_millis(1)),
            work_items: AtomicU64::new(0),
        }
    }

    /// Creates a dispatcher from [`Config::event_timeout`].
    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.event_timeout_clamped())
    }

    /// Shared fan-out timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of handler work items spawned so far.
    pub fn work_items_spawned(&self) -> u64 {
        self.work_items.load(Ordering::Relaxed)
    }

    /// Invokes every handler registered for `event`'s kind and waits for them.
    ///
    /// Returns the per-handler failures (errors, panics and timeouts). Only a
    /// missing registry slot makes this return `Err`.
    pub async fn raise(
        &self,
        events: &CollectorEvents,
        event: &CollectionEvent,
    ) -> Result<Vec<InvocationError>, DispatchError> {
        let kind = event.kind();
        let Some(handlers) = events.handlers(kind) else {
            error!(fatal = true, event = %kind, "no handler slot registered for event kind");
            return Err(DispatchError::UnregisteredEvent { kind });
        };
        if handlers.is_empty() {
            return Ok(Vec::new());
        }

        let event = Arc::new(event.clone());
        let log = Arc::new(ErrorLog::new(handlers.len()));
        let mut tasks: Vec<JoinHandle<()>> = Vec::with_capacity(handlers.len());

        for (index, handler) in handlers.iter().enumerate() {
            self.work_items.fetch_add(1, Ordering::Relaxed);
            tasks.push(tokio::spawn(invoke(
                index,
                Arc::clone(handler),
                Arc::clone(&event),
                Arc::clone(&log),
            )));
        }

        let finished = tokio::time::timeout(self.timeout, join_all(tasks.iter_mut())).await;
        if finished.is_ok() {
            return Ok(log.finish());
        }

        let identities: Vec<HandlerIdentity> = handlers.iter().map(|h| h.identity()).collect();
        let errors = log.freeze_with_timeouts(
            &identities,
            kind,
            event.payload_type_name(),
            self.timeout,
        );
        for err in errors.iter().filter(|e| e.is_timeout()) {
            warn!(
                handler = %err.handler,
                event = %kind,
                payload = event.payload_type_name(),
                timeout = ?self.timeout,
                "collector handler timed out"
            );
        }
        tokio::spawn(abort_stragglers(tasks, kind));
        Ok(errors)
    }
}

/// One handler work item: runs the handler and records its outcome.
async fn invoke(
    index: usize,
    handler: Arc<dyn EventHandler>,
    event: Arc<CollectionEvent>,
    log: Arc<ErrorLog>,
) {
    let outcome = AssertUnwindSafe(handler.handle(&event)).catch_unwind().await;
    let failure = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(InvocationFailure::Failed {
            message: err.root_cause().to_string(),
        }),
        Err(panic) => Some(InvocationFailure::Panicked {
            message: panic_message(panic.as_ref()),
        }),
    };
    let record = failure.map(|failure| InvocationError {
        handler: handler.identity(),
        event: event.kind(),
        payload: event.payload_type_name().into(),
        failure,
    });
    if let Some(err) = &record {
        debug!(label = err.as_label(), "{err}");
    }
    log.complete(index, record);
}

async fn abort_stragglers(tasks: Vec<JoinHandle<()>>, kind: EventKind) {
    for task in tasks {
        if task.is_finished() {
            continue;
        }
        task.abort();
        match task.await {
            Err(err) if err.is_panic() => {
                warn!(event = %kind, error = %err, "aborting timed out handler failed");
            }
            _ => {}
        }
    }
}

/// Accumulated failures of one fan-out.
///
/// Becomes read-only once frozen; completions after that are ignored.
struct ErrorLog {
    state: Mutex<LogState>,
}

struct LogState {
    errors: Vec<InvocationError>,
    done: Vec<bool>,
    frozen: bool,
}

impl ErrorLog {
    fn new(handlers: usize) -> Self {
        Self {
            state: Mutex::new(LogState {
                errors: Vec::new(),
                done: vec![false; handlers],
                frozen: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn complete(&self, index: usize, err: Option<InvocationError>) {
        let mut state = self.lock();
        if state.frozen {
            return;
        }
        if let Some(done) = state.done.get_mut(index) {
            *done = true;
        }
        if let Some(err) = err {
            state.errors.push(err);
        }
    }

    fn finish(&self) -> Vec<InvocationError> {
        let mut state = self.lock();
        state.frozen = true;
        std::mem::take(&mut state.errors)
    }

    fn freeze_with_timeouts(
        &self,
        identities: &[HandlerIdentity],
        event: EventKind,
        payload: &str,
        timeout: Duration,
    ) -> Vec<InvocationError> {
        let mut state = self.lock();
        state.frozen = true;
        let pending: Vec<usize> = state
            .done
            .iter()
            .enumerate()
            .filter_map(|(i, done)| (!done).then_some(i))
            .collect();
        for i in pending {
            if let Some(handler) = identities.get(i) {
                state.errors.push(InvocationError {
                    handler: handler.clone(),
                    event,
                    payload: payload.into(),
                    failure: InvocationFailure::TimedOut { timeout },
                });
            }
        }
        std::mem::take(&mut state.errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::HandlerFn;
    use crate::events::{DataCollectionContext, SessionId};
    use std::sync::atomic::AtomicUsize;

    struct Crashy;

    #[async_trait::async_trait]
    impl EventHandler for Crashy {
        async fn handle(&self, _event: &CollectionEvent) -> anyhow::Result<()> {
            panic!("collector bug")
        }

        fn identity(&self) -> HandlerIdentity {
            HandlerIdentity::new("Crashy", "on_data_request")
        }
    }

    fn ctx() -> DataCollectionContext {
        DataCollectionContext::session(SessionId::new())
    }

    #[tokio::test]
    async fn zero_handlers_spawn_no_work() {
        let dispatcher = EventDispatcher::new(Duration::from_secs(1));
        let events = CollectorEvents::new();
        let errors = dispatcher
            .raise(&events, &CollectionEvent::session_start(ctx()))
            .await
            .unwrap();
        assert!(errors.is_empty());
        assert_eq!(dispatcher.work_items_spawned(), 0);
    }

    #[tokio::test]
    async fn missing_slot_is_a_consistency_error() {
        let dispatcher = EventDispatcher::new(Duration::from_secs(1));
        let events = CollectorEvents::without_slot(EventKind::SessionPause);
        let ev = CollectionEvent::new(ctx(), crate::events::EventPayload::SessionPause);

        let err = dispatcher.raise(&events, &ev).await.unwrap_err();
        assert_eq!(
            err,
            DispatchError::UnregisteredEvent {
                kind: EventKind::SessionPause
            }
        );
    }

    #[tokio::test]
    async fn failing_handler_is_isolated_from_siblings() {
        let dispatcher = EventDispatcher::new(Duration::from_secs(5));
        let events = CollectorEvents::new();
        let ran = Arc::new(AtomicUsize::new(0));

        for name in ["first", "third"] {
            let ran = Arc::clone(&ran);
            let h = HandlerFn::arc(HandlerIdentity::new("Ok", name), move |_ev: CollectionEvent| {
                let ran = Arc::clone(&ran);
                async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });
            if name == "third" {
                events.subscribe(
                    EventKind::SessionEnd,
                    HandlerFn::arc(HandlerIdentity::new("Broken", "on_session_end"), |_ev: CollectionEvent| async {
                        Err(anyhow::anyhow!("inner cause").context("wrapper"))
                    }),
                );
            }
            events.subscribe(EventKind::SessionEnd, h);
        }

        let errors = dispatcher
            .raise(&events, &CollectionEvent::session_end(ctx()))
            .await
            .unwrap();

        assert_eq!(ran.load(Ordering::SeqCst), 2);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].handler, HandlerIdentity::new("Broken", "on_session_end"));
        assert_eq!(
            errors[0].failure,
            InvocationFailure::Failed {
                message: "inner cause".into()
            }
        );
        assert_eq!(dispatcher.work_items_spawned(), 3);
    }

    #[tokio::test]
    async fn panicking_handler_is_recorded() {
        let dispatcher = EventDispatcher::new(Duration::from_secs(5));
        let events = CollectorEvents::new();
        events.subscribe(EventKind::DataRequest, Arc::new(Crashy));
        let ev = CollectionEvent::new(
            ctx(),
            crate::events::EventPayload::DataRequest {
                request_id: uuid::Uuid::new_v4(),
            },
        );

        let errors = dispatcher.raise(&events, &ev).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].as_label(), "handler_panicked");
        assert_eq!(
            errors[0].failure,
            InvocationFailure::Panicked {
                message: "collector bug".into()
            }
        );
    }

    #[tokio::test]
    async fn slow_handlers_each_get_one_timeout_record() {
        let dispatcher = EventDispatcher::new(Duration::from_millis(50));
        let events = CollectorEvents::new();
        for name in ["slow_a", "slow_b"] {
            events.subscribe(
                EventKind::SessionStart,
                HandlerFn::arc(HandlerIdentity::new("Slow", name), |_ev: CollectionEvent| async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(())
                }),
            );
        }
        events.subscribe(
            EventKind::SessionStart,
            HandlerFn::arc(HandlerIdentity::new("Fails", "fast"), |_ev: CollectionEvent| async {
                anyhow::bail!("nope")
            }),
        );

        let started = tokio::time::Instant::now();
        let errors = dispatcher
            .raise(&events, &CollectionEvent::session_start(ctx()))
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(errors.len(), 3);
        assert_eq!(errors.iter().filter(|e| e.is_timeout()).count(), 2);
        let mut timed_out: Vec<&str> = errors
            .iter()
            .filter(|e| e.is_timeout())
            .map(|e| e.handler.method.as_ref())
            .collect();
        timed_out.sort_unstable();
        assert_eq!(timed_out, ["slow_a", "slow_b"]);
    }

    #[tokio::test]
    async fn timed_out_custom_notification_keeps_its_type_name() {
        let dispatcher = EventDispatcher::new(Duration::from_millis(50));
        let events = CollectorEvents::new();
        events.subscribe(
            EventKind::CustomNotification,
            HandlerFn::arc(HandlerIdentity::new("Coverage", "on_custom"), |_ev: CollectionEvent| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            }),
        );

        let ev = CollectionEvent::custom(ctx(), "FlushCoverage", serde_json::Value::Null);
        let errors = dispatcher.raise(&events, &ev).await.unwrap();

        assert_eq!(errors.len(), 1);
        assert!(errors[0].is_timeout());
        assert_eq!(errors[0].payload.as_ref(), "FlushCoverage");
        assert!(errors[0].as_message().contains("FlushCoverage"));
    }

    #[tokio::test]
    async fn timed_out_handler_is_aborted_before_its_side_effect() {
        let dispatcher = EventDispatcher::new(Duration::from_millis(50));
        let events = CollectorEvents::new();
        let late_writes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&late_writes);
        events.subscribe(
            EventKind::SessionEnd,
            HandlerFn::arc(HandlerIdentity::new("Slow", "on_session_end"), move |_ev: CollectionEvent| {
                let counter = Arc::clone(&counter);
                async move {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );

        let errors = dispatcher
            .raise(&events, &CollectionEvent::session_end(ctx()))
            .await
            .unwrap();
        assert_eq!(errors.len(), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(late_writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn frozen_log_ignores_late_completions() {
        let log = ErrorLog::new(2);
        let ids = [HandlerIdentity::new("A", "m"), HandlerIdentity::new("B", "m")];
        log.complete(0, None);

        let errors = log.freeze_with_timeouts(
            &ids,
            EventKind::TestCaseEnd,
            "test_case_end",
            Duration::from_millis(5),
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].handler, ids[1]);

        log.complete(
            1,
            Some(InvocationError {
                handler: ids[1].clone(),
                event: EventKind::TestCaseEnd,
                payload: "test_case_end".into(),
                failure: InvocationFailure::Failed {
                    message: "late".into(),
                },
            }),
        );
        assert!(log.finish().is_empty());
    }
}

//! # Collector host manager.
//!
//! [`CollectorHostManager`] loads the configured collectors, turns runner
//! lifecycle notifications into [`CollectionEvent`]s, fans each one out to
//! every collector's registry through the [`EventDispatcher`], and collects
//! attachments at test case and session end.
//!
//! ## Architecture
//! ```text
//! runner ──► initialize_data_collectors(settings) ──► loader.load ──► collector.initialize
//!        ──► session_started / test_case_* / session_ended / raise_event
//!                 │ snapshot collectors (read lock)
//!                 ├─► dispatcher.raise(collector #1 events, ev)
//!                 ├─► dispatcher.raise(collector #2 events, ev)
//!                 └─► attachments.collect_attachments(ctx)   (end events)
//! ```
//!
//! ## Rules
//! - Configuration and load failures are warnings; the collector is skipped.
//! - Handler failures and timeouts are reported to the sink per collector and never abort the run.
//! - A cancelled session skips the session end fan-out and returns no attachments.
//! - [`dispose`](CollectorHostManager::dispose) unsubscribes and disposes every collector once.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::attachments::{AttachmentManager, AttachmentSet};
use crate::config::Config;
use crate::dispatch::{CollectorEvents, EventDispatcher};
use crate::error::{HostError, InvocationError};
use crate::events::{
    CollectionEvent, DataCollectionContext, TestCaseInfo, TestOutcome,
};
use crate::queue::panic_message;
use crate::sink::{CollectorIdentity, CollectorMessage, MessageLevel, MessageSink};

use super::collector::{
    CollectorInit, CollectorLoader, CollectorLogger, DataCollectionSink, DataCollector,
};
use super::settings::RunSettings;

struct LoadedCollector {
    identity: CollectorIdentity,
    collector: Arc<dyn DataCollector>,
    events: Arc<CollectorEvents>,
}

/// Hosts data collectors for one test run.
pub struct CollectorHostManager {
    loader: Arc<dyn CollectorLoader>,
    sink: Arc<dyn MessageSink>,
    dispatcher: EventDispatcher,
    attachments: Arc<AttachmentManager>,
    collectors: RwLock<Vec<Arc<LoadedCollector>>>,
    results_directory: RwLock<Option<PathBuf>>,
    disposed: AtomicBool,
}

impl CollectorHostManager {
    /// Creates a host with no collectors loaded.
    ///
    /// Must be called inside a tokio runtime (the transfer worker is spawned here).
    pub fn new(cfg: &Config, loader: Arc<dyn CollectorLoader>, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            loader,
            dispatcher: EventDispatcher::from_config(cfg),
            attachments: Arc::new(AttachmentManager::with_sink(cfg, Arc::clone(&sink))),
            sink,
            collectors: RwLock::new(Vec::new()),
            results_directory: RwLock::new(None),
            disposed: AtomicBool::new(false),
        }
    }

    /// Attachment manager shared with the collectors' sinks.
    pub fn attachments(&self) -> &Arc<AttachmentManager> {
        &self.attachments
    }

    /// Dispatcher used for every fan-out.
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Identities of the loaded collectors, in load order.
    pub fn loaded_collectors(&self) -> Vec<CollectorIdentity> {
        self.snapshot().iter().map(|c| c.identity.clone()).collect()
    }

    fn snapshot(&self) -> Vec<Arc<LoadedCollector>> {
        self.collectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn warn_session(&self, err: &HostError) {
        warn!(label = err.as_label(), "{err}");
        self.sink
            .send_message(CollectorMessage::new(MessageLevel::Warning, err.as_message()));
    }

    /// Loads and initializes every enabled collector in `settings`.
    ///
    /// Returns the environment variables to inject into the test host. When
    /// two collectors request the same variable the first value wins; a
    /// different second value produces a warning.
    pub async fn initialize_data_collectors(&self, settings: &RunSettings) -> Vec<(String, String)> {
        *self
            .results_directory
            .write()
            .unwrap_or_else(PoisonError::into_inner) = settings.results_directory.clone();

        let (enabled, duplicates) = settings.enabled_collectors();
        for err in &duplicates {
            self.warn_session(err);
        }

        for entry in enabled {
            let identity = entry.identity();
            let collector = match self.loader.load(&entry) {
                Ok(collector) => collector,
                Err(err) => {
                    self.warn_session(&HostError::LoadFailed {
                        name: entry.friendly_name.clone(),
                        reason: format!("{err:#}"),
                    });
                    continue;
                }
            };

            let events = Arc::new(CollectorEvents::new());
            let init = CollectorInit {
                identity: identity.clone(),
                configuration: entry.configuration.clone(),
                events: Arc::clone(&events),
                sink: DataCollectionSink::new(Arc::clone(&self.attachments), identity.clone()),
                logger: CollectorLogger::new(Arc::clone(&self.sink), identity.clone()),
                results_directory: settings.results_directory.clone(),
            };

            let outcome = AssertUnwindSafe(collector.initialize(init)).catch_unwind().await;
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err.root_cause().to_string()),
                Err(panic) => Some(panic_message(panic.as_ref())),
            };
            if let Some(reason) = failure {
                events.clear();
                self.warn_session(&HostError::InitializeFailed {
                    name: entry.friendly_name.clone(),
                    reason,
                });
                continue;
            }

            info!(collector = %identity, "data collector loaded");
            self.collectors
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Arc::new(LoadedCollector {
                    identity,
                    collector,
                    events,
                }));
        }

        self.environment_variables()
    }

    fn environment_variables(&self) -> Vec<(String, String)> {
        let mut merged: Vec<(String, String)> = Vec::new();
        let mut owners: HashMap<String, (usize, CollectorIdentity)> = HashMap::new();

        for loaded in self.snapshot() {
            let requested = match std::panic::catch_unwind(AssertUnwindSafe(|| {
                loaded.collector.environment_variables()
            })) {
                Ok(vars) => vars,
                Err(panic) => {
                    warn!(collector = %loaded.identity, panic = %panic_message(panic.as_ref()), "environment_variables panicked");
                    continue;
                }
            };

            for (name, value) in requested {
                match owners.get(&name) {
                    None => {
                        owners.insert(name.clone(), (merged.len(), loaded.identity.clone()));
                        merged.push((name, value));
                    }
                    Some((index, owner)) => {
                        if merged[*index].1 != value {
                            let text = format!(
                                "environment variable {name} requested by {} conflicts with {}; keeping {}",
                                loaded.identity.friendly_name, owner.friendly_name, merged[*index].1
                            );
                            warn!("{text}");
                            self.sink.send_message(
                                CollectorMessage::new(MessageLevel::Warning, text)
                                    .with_collector(loaded.identity.clone()),
                            );
                        }
                    }
                }
            }
        }
        merged
    }

    /// Fans `event` out to every loaded collector.
    ///
    /// Failures are reported to the sink against the owning collector and returned.
    pub async fn raise_event(&self, event: &CollectionEvent) -> Vec<InvocationError> {
        let mut all = Vec::new();
        for loaded in self.snapshot() {
            match self.dispatcher.raise(&loaded.events, event).await {
                Ok(errors) => {
                    for err in &errors {
                        self.sink.send_message(
                            CollectorMessage::new(MessageLevel::Warning, err.as_message())
                                .with_collector(loaded.identity.clone())
                                .with_test_case(event.context.test_case_id),
                        );
                    }
                    all.extend(errors);
                }
                Err(err) => {
                    self.sink.send_message(
                        CollectorMessage::new(MessageLevel::Error, err.to_string())
                            .with_collector(loaded.identity.clone()),
                    );
                }
            }
        }
        all
    }

    /// Starts the session: prepares the output directory and raises session start.
    ///
    /// Returns `true` if any collector listens to test case events.
    pub async fn session_started(&self, context: DataCollectionContext) -> bool {
        let hint = self
            .results_directory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Err(err) = self
            .attachments
            .initialize(context.session_id, hint.as_deref(), Arc::clone(&self.sink))
            .await
        {
            warn!(label = err.as_label(), "{err}");
            self.sink
                .send_message(CollectorMessage::new(MessageLevel::Error, err.as_message()));
        }

        self.raise_event(&CollectionEvent::session_start(context)).await;
        self.snapshot()
            .iter()
            .any(|c| c.events.has_test_case_listeners())
    }

    /// Raises test case start.
    pub async fn test_case_started(&self, context: DataCollectionContext, test: TestCaseInfo) {
        self.raise_event(&CollectionEvent::test_case_start(context, test))
            .await;
    }

    /// Raises test case end and returns the attachments sent for that test case.
    pub async fn test_case_ended(
        &self,
        context: DataCollectionContext,
        test: TestCaseInfo,
        outcome: TestOutcome,
    ) -> Vec<AttachmentSet> {
        self.raise_event(&CollectionEvent::test_case_end(context, test, outcome))
            .await;
        self.attachments.collect_attachments(&context).await
    }

    /// Raises a custom notification.
    pub async fn raise_custom(
        &self,
        context: DataCollectionContext,
        notification_type: &str,
        body: serde_json::Value,
    ) -> Vec<InvocationError> {
        self.raise_event(&CollectionEvent::custom(context, notification_type, body))
            .await
    }

    /// Ends the session and returns the session-level attachments.
    ///
    /// A cancelled session raises nothing and returns no attachments.
    pub async fn session_ended(
        &self,
        context: DataCollectionContext,
        cancelled: bool,
    ) -> Vec<AttachmentSet> {
        if cancelled {
            info!(session = %context.session_id, "session cancelled; skipping session end");
            return Vec::new();
        }
        self.raise_event(&CollectionEvent::session_end(context)).await;
        self.attachments
            .collect_attachments(&DataCollectionContext::session(context.session_id))
            .await
    }

    /// Unsubscribes and disposes every collector, then releases pending transfers.
    ///
    /// Safe to call more than once.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let loaded = std::mem::take(
            &mut *self
                .collectors
                .write()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for c in loaded {
            c.events.clear();
            if let Err(panic) = AssertUnwindSafe(c.collector.dispose()).catch_unwind().await {
                warn!(collector = %c.identity, panic = %panic_message(panic.as_ref()), "collector dispose panicked");
            }
            debug!(collector = %c.identity, "data collector disposed");
        }
        self.attachments.dispose();
    }
}

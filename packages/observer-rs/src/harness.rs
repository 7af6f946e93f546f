//! The observation harness: one isolated instance per test run.
//!
//! A `Harness` owns its replay log, seen set and poll task. Nothing is
//! process-global, so parallel test suites can each run their own instance
//! against their own queue.
//!
//! # Lifecycle
//!
//! ```text
//! Harness::builder(queue).build()
//!     │
//!     ▼ start()          spawns the poll task (idempotent)
//! running ──────────────► wait_for_message() / subscribe() / stats()
//!     │
//!     ▼ stop() or drop   cancels the token, abandons the in-flight long poll
//! stopped
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ObserverConfig, PollerConfig};
use crate::dedup::Deduplicator;
use crate::envelope::{ObservedMessage, SourceType};
use crate::error::ObserverError;
use crate::poller::{IngestOutcome, Ingestor, PollerStats, QueuePoller, StatsSnapshot};
use crate::queue::{MessageQueue, RawMessage};
use crate::replay::{ReplayLog, Subscription, DEFAULT_CAPACITY};
use crate::wait::{self, MessageMatcher, DEFAULT_WAIT_TIMEOUT};

/// Builder for [`Harness`].
pub struct HarnessBuilder {
    queue: Arc<dyn MessageQueue>,
    poller: PollerConfig,
    replay_capacity: usize,
}

impl HarnessBuilder {
    pub fn new(queue: Arc<dyn MessageQueue>) -> Self {
        Self {
            queue,
            poller: PollerConfig::default(),
            replay_capacity: DEFAULT_CAPACITY,
        }
    }

    pub fn poller_config(mut self, config: PollerConfig) -> Self {
        self.poller = config;
        self
    }

    pub fn replay_capacity(mut self, capacity: usize) -> Self {
        self.replay_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<Harness, ObserverError> {
        self.poller.validate()?;
        if self.replay_capacity == 0 {
            return Err(ObserverError::Config(
                "replay_capacity must be at least 1".to_string(),
            ));
        }

        Ok(Harness {
            queue: self.queue,
            log: ReplayLog::with_capacity(self.replay_capacity),
            dedup: Arc::new(Deduplicator::new()),
            stats: Arc::new(PollerStats::default()),
            config: self.poller,
            running: Mutex::new(None),
        })
    }
}

struct RunningPoller {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

/// Message observation harness over one queue.
pub struct Harness {
    queue: Arc<dyn MessageQueue>,
    log: ReplayLog,
    dedup: Arc<Deduplicator>,
    stats: Arc<PollerStats>,
    config: PollerConfig,
    running: Mutex<Option<RunningPoller>>,
}

impl Harness {
    pub fn builder(queue: Arc<dyn MessageQueue>) -> HarnessBuilder {
        HarnessBuilder::new(queue)
    }

    /// Build from environment-derived configuration.
    pub fn from_config(
        queue: Arc<dyn MessageQueue>,
        config: &ObserverConfig,
    ) -> Result<Self, ObserverError> {
        HarnessBuilder::new(queue)
            .poller_config(config.poller.clone())
            .replay_capacity(config.replay_capacity)
            .build()
    }

    /// Start polling.
    ///
    /// Returns `Ok(false)` when the poller is already running.
    pub fn start(&self) -> Result<bool, ObserverError> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(poller) = running.as_ref() {
            if !poller.handle.is_finished() {
                debug!("queue poller already running");
                return Ok(false);
            }
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ObserverError::NoRuntime)?;
        let shutdown = CancellationToken::new();
        let poller = QueuePoller::new(self.queue.clone(), self.ingestor(), self.config.clone());
        let handle = runtime.spawn(poller.run(shutdown.clone()));

        *running = Some(RunningPoller { shutdown, handle });
        Ok(true)
    }

    /// Stop polling and wait for the poll task to exit.
    ///
    /// Returns false if the poller was not running. History and the seen
    /// set are kept, so a later `start()` resumes with them.
    pub async fn stop(&self) -> bool {
        let poller = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        let Some(poller) = poller else {
            return false;
        };

        poller.shutdown.cancel();
        if let Err(e) = poller.handle.await {
            warn!(error = %e, "queue poller task ended abnormally");
        }
        info!(stats = ?self.stats(), "harness stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|poller| !poller.handle.is_finished())
    }

    /// Wait for a message equal on source type, source id and payload.
    ///
    /// Matches messages that arrived before the call as well as after it.
    pub async fn wait_for_message(
        &self,
        source_type: SourceType,
        source_id: impl Into<String>,
        payload: impl Into<String>,
        timeout: Duration,
    ) -> Result<Arc<ObservedMessage>, ObserverError> {
        let matcher = MessageMatcher::new(source_type, source_id, payload);
        wait::wait_for_message(&self.log, matcher, timeout).await
    }

    /// [`Harness::wait_for_message`] with [`DEFAULT_WAIT_TIMEOUT`].
    pub async fn wait_for_message_default(
        &self,
        source_type: SourceType,
        source_id: impl Into<String>,
        payload: impl Into<String>,
    ) -> Result<Arc<ObservedMessage>, ObserverError> {
        self.wait_for_message(source_type, source_id, payload, DEFAULT_WAIT_TIMEOUT)
            .await
    }

    /// Wait for the first message satisfying `predicate`.
    pub async fn wait_for<F>(
        &self,
        description: impl Into<String>,
        timeout: Duration,
        predicate: F,
    ) -> Result<Arc<ObservedMessage>, ObserverError>
    where
        F: Fn(&ObservedMessage) -> bool,
    {
        wait::wait_for(&self.log, description, timeout, predicate).await
    }

    /// Follow every retained and future message.
    pub fn subscribe(&self) -> Subscription {
        self.log.subscribe()
    }

    /// Run one raw message through classify, dedup and append without the queue.
    pub fn ingest(&self, raw: &RawMessage) -> IngestOutcome {
        self.ingestor().ingest(raw)
    }

    pub fn replay_log(&self) -> &ReplayLog {
        &self.log
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of distinct message ids processed so far.
    pub fn seen_count(&self) -> usize {
        self.dedup.len()
    }

    fn ingestor(&self) -> Ingestor {
        Ingestor::new(self.log.clone(), self.dedup.clone(), self.stats.clone())
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let running = self.running.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(poller) = running.take() {
            poller.shutdown.cancel();
        }
    }
}

impl std::fmt::Debug for Harness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harness")
            .field("log", &self.log)
            .field("running", &self.is_running())
            .finish()
    }
}

//! Queue poller feeding the replay log.
//!
//! The `QueuePoller` is a long-running task that:
//! - Long-polls the queue via `MessageQueue`
//! - Classifies each body into an `Envelope`
//! - Drops redeliveries via the `Deduplicator`
//! - Appends new observations to the `ReplayLog`
//! - Retries failed receives forever with exponential backoff
//!
//! # Architecture
//!
//! ```text
//! QueuePoller
//!     │
//!     ├─► receive (long poll, cancellable)
//!     ├─► classify (Unknown → dropped)
//!     ├─► dedup   (seen → dropped)
//!     ├─► ReplayLog.append ──► delivers to every Subscription
//!     └─► delete  (only when delete_received is set)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PollerConfig;
use crate::dedup::Deduplicator;
use crate::envelope::classify;
use crate::queue::{MessageQueue, RawMessage};
use crate::replay::ReplayLog;

/// What happened to one raw message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Appended,
    Duplicate,
    Unrecognized,
}

/// Counters for the poll loop.
#[derive(Debug, Default)]
pub struct PollerStats {
    receive_cycles: AtomicU64,
    receive_failures: AtomicU64,
    received: AtomicU64,
    appended: AtomicU64,
    duplicates: AtomicU64,
    unrecognized: AtomicU64,
}

/// Point-in-time copy of [`PollerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub receive_cycles: u64,
    pub receive_failures: u64,
    pub received: u64,
    pub appended: u64,
    pub duplicates: u64,
    pub unrecognized: u64,
}

impl PollerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            receive_cycles: self.receive_cycles.load(Ordering::Relaxed),
            receive_failures: self.receive_failures.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            appended: self.appended.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            unrecognized: self.unrecognized.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Classify → dedup → append, shared by the poll loop and direct ingestion.
#[derive(Clone)]
pub struct Ingestor {
    log: ReplayLog,
    dedup: Arc<Deduplicator>,
    stats: Arc<PollerStats>,
}

impl Ingestor {
    pub fn new(log: ReplayLog, dedup: Arc<Deduplicator>, stats: Arc<PollerStats>) -> Self {
        Self { log, dedup, stats }
    }

    pub fn ingest(&self, raw: &RawMessage) -> IngestOutcome {
        PollerStats::bump(&self.stats.received);

        let observed = match classify(&raw.body).into_observed() {
            Ok(observed) => observed,
            Err(reason) => {
                PollerStats::bump(&self.stats.unrecognized);
                debug!(message_id = %raw.id, reason = %reason, "dropping unrecognized envelope");
                return IngestOutcome::Unrecognized;
            }
        };

        if !self.dedup.is_new(&raw.id) {
            PollerStats::bump(&self.stats.duplicates);
            debug!(message_id = %raw.id, "dropping redelivered message");
            return IngestOutcome::Duplicate;
        }

        debug!(
            message_id = %raw.id,
            source_type = %observed.source_type,
            source_id = %observed.source_id,
            "observed message"
        );
        self.log.append(observed);
        PollerStats::bump(&self.stats.appended);
        IngestOutcome::Appended
    }
}

/// Exponential backoff between failed receives.
#[derive(Debug, Clone)]
struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            current: min,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.min;
    }
}

/// Long-poll loop over a [`MessageQueue`].
pub struct QueuePoller {
    queue: Arc<dyn MessageQueue>,
    ingestor: Ingestor,
    config: PollerConfig,
}

impl QueuePoller {
    pub fn new(queue: Arc<dyn MessageQueue>, ingestor: Ingestor, config: PollerConfig) -> Self {
        Self {
            queue,
            ingestor,
            config,
        }
    }

    /// Poll until `shutdown` is cancelled.
    ///
    /// Receive failures never end the loop. A pending long poll or backoff
    /// sleep is abandoned as soon as the token fires.
    pub async fn run(self, shutdown: CancellationToken) {
        let request = self.config.receive_request();
        let mut backoff = Backoff::new(self.config.min_backoff, self.config.max_backoff);

        info!(
            max_messages = request.max_messages,
            wait_time_secs = request.wait_time.as_secs(),
            "queue poller starting"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.queue.receive(request) => result,
            };
            PollerStats::bump(&self.ingestor.stats.receive_cycles);

            let messages = match received {
                Ok(messages) => {
                    backoff.reset();
                    messages
                }
                Err(e) => {
                    PollerStats::bump(&self.ingestor.stats.receive_failures);
                    let delay = backoff.next_delay();
                    warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "queue receive failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
            };

            if !messages.is_empty() {
                debug!(count = messages.len(), "received messages");
            }

            for message in &messages {
                self.ingestor.ingest(message);
                if self.config.delete_received {
                    if let Err(e) = self.queue.delete(message).await {
                        warn!(message_id = %message.id, error = %e, "failed to delete message");
                    }
                }
            }

            // A queue that is always ready would otherwise starve waiters on
            // a current-thread runtime.
            tokio::task::yield_now().await;
        }

        info!("queue poller stopped");
    }
}

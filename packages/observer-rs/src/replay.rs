//! Bounded replay log for observed messages.
//!
//! # Guarantees
//!
//! - **Replay from the start**: every subscriber reads the whole retained
//!   history first, then every future append, in insertion order
//! - **Pure broadcast**: reading never drains the log; subscribers are
//!   independent of each other
//! - **Synchronous delivery**: `append` hands the message to every live
//!   subscription before it returns, so eviction never takes a message away
//!   from a subscription that already existed when it was appended
//! - **Bounded history**: beyond `capacity` the oldest entry is evicted. Only
//!   subscriptions created after the eviction miss it
//!
//! Each subscription owns an unbounded mailbox. A subscription that stops
//! reading keeps its backlog until it is dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures::stream::{self, Stream};
use tokio::sync::mpsc;
use tracing::debug;

use crate::envelope::ObservedMessage;

/// Default number of retained messages.
pub const DEFAULT_CAPACITY: usize = 100;

type Mailbox = mpsc::UnboundedSender<Arc<ObservedMessage>>;

/// Append-only, bounded, replayable history of observed messages.
///
/// Cloning is cheap and shares the same history.
///
/// # Example
///
/// ```ignore
/// let log = ReplayLog::new();
/// log.append(ObservedMessage::broadcast("topic-A", "hello"));
///
/// // Subscribing after the append still sees it
/// let mut sub = log.subscribe();
/// assert_eq!(sub.next().await.payload, "hello");
/// ```
#[derive(Clone)]
pub struct ReplayLog {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<LogState>,
    capacity: usize,
}

struct LogState {
    entries: VecDeque<Arc<ObservedMessage>>,
    total_appended: u64,
    subscribers: Vec<Mailbox>,
}

impl ReplayLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a log retaining at most `capacity` messages (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(LogState {
                    entries: VecDeque::with_capacity(capacity),
                    total_appended: 0,
                    subscribers: Vec::new(),
                }),
                capacity,
            }),
        }
    }

    /// Append a message and deliver it to every live subscriber.
    ///
    /// Retired subscriptions are pruned here.
    pub fn append(&self, message: ObservedMessage) -> Arc<ObservedMessage> {
        let message = Arc::new(message);
        let mut state = self.lock();

        if state.entries.len() == self.inner.capacity {
            state.entries.pop_front();
            debug!(
                total_appended = state.total_appended,
                "replay log full, evicted oldest entry"
            );
        }
        state.entries.push_back(message.clone());
        state.total_appended += 1;
        state
            .subscribers
            .retain(|mailbox| mailbox.send(message.clone()).is_ok());

        message
    }

    /// Subscribe from the oldest retained entry.
    pub fn subscribe(&self) -> Subscription {
        let (mailbox, receiver) = mpsc::unbounded_channel();
        let mut state = self.lock();
        for message in &state.entries {
            // The receiver is still in hand, so this cannot fail.
            let _ = mailbox.send(message.clone());
        }
        state.subscribers.push(mailbox);
        drop(state);

        Subscription {
            _log: self.clone(),
            receiver,
        }
    }

    /// Copy of the retained history, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<ObservedMessage>> {
        self.lock().entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of appends over the lifetime of the log, evicted ones included.
    pub fn total_appended(&self) -> u64 {
        self.lock().total_appended
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.lock();
        state.subscribers.retain(|mailbox| !mailbox.is_closed());
        state.subscribers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ReplayLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReplayLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayLog")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// A read position into a [`ReplayLog`].
///
/// Dropping the subscription retires it.
pub struct Subscription {
    // Keeps the mailbox sender alive so `next` never sees a closed channel.
    _log: ReplayLog,
    receiver: mpsc::UnboundedReceiver<Arc<ObservedMessage>>,
}

impl Subscription {
    /// Next unread message if one has already been delivered.
    pub fn try_next(&mut self) -> Option<Arc<ObservedMessage>> {
        self.receiver.try_recv().ok()
    }

    /// Next unread message, waiting for an append if none is pending.
    pub async fn next(&mut self) -> Arc<ObservedMessage> {
        match self.receiver.recv().await {
            Some(message) => message,
            None => futures::future::pending().await,
        }
    }

    /// Convert into an endless stream of messages.
    pub fn into_stream(self) -> impl Stream<Item = Arc<ObservedMessage>> {
        stream::unfold(self, |mut sub| async move {
            let message = sub.next().await;
            Some((message, sub))
        })
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn msg(payload: &str) -> ObservedMessage {
        ObservedMessage::broadcast("topic-A", payload)
    }

    #[tokio::test]
    async fn test_append_and_receive() {
        let log = ReplayLog::new();
        let mut sub = log.subscribe();

        log.append(msg("one"));

        assert_eq!(sub.next().await.payload, "one");
        assert!(sub.try_next().is_none());
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_history() {
        let log = ReplayLog::new();
        log.append(msg("one"));
        log.append(msg("two"));

        let mut sub = log.subscribe();
        log.append(msg("three"));

        assert_eq!(sub.next().await.payload, "one");
        assert_eq!(sub.next().await.payload, "two");
        assert_eq!(sub.next().await.payload, "three");
    }

    #[tokio::test]
    async fn test_multiple_subscribers_are_independent() {
        let log = ReplayLog::new();
        let mut sub1 = log.subscribe();
        let mut sub2 = log.subscribe();

        log.append(msg("one"));
        log.append(msg("two"));

        assert_eq!(sub1.next().await.payload, "one");
        assert_eq!(sub1.next().await.payload, "two");

        // sub1 reading did not drain anything for sub2
        assert_eq!(sub2.next().await.payload, "one");
        assert_eq!(sub2.next().await.payload, "two");
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn test_next_wakes_on_append_from_another_task() {
        let log = ReplayLog::new();
        let mut sub = log.subscribe();

        let writer = log.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.append(msg("late"));
        });

        let received = tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .expect("append should wake the subscriber");
        assert_eq!(received.payload, "late");
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let log = ReplayLog::with_capacity(3);
        for i in 0..5 {
            log.append(msg(&i.to_string()));
        }

        let payloads: Vec<_> = log.snapshot().iter().map(|m| m.payload.clone()).collect();
        assert_eq!(payloads, vec!["2", "3", "4"]);
        assert_eq!(log.total_appended(), 5);
        assert_eq!(log.capacity(), 3);
    }

    #[test]
    fn test_live_subscriber_keeps_evicted_entries() {
        let log = ReplayLog::with_capacity(2);
        let mut sub = log.subscribe();

        log.append(msg("target"));
        log.append(msg("x"));
        log.append(msg("y"));

        // "target" is gone from the log but was already delivered
        let payloads: Vec<_> = log.snapshot().iter().map(|m| m.payload.clone()).collect();
        assert_eq!(payloads, vec!["x", "y"]);
        assert_eq!(sub.try_next().unwrap().payload, "target");
        assert_eq!(sub.try_next().unwrap().payload, "x");
        assert_eq!(sub.try_next().unwrap().payload, "y");
        assert!(sub.try_next().is_none());
    }

    #[test]
    fn test_late_subscriber_misses_evicted_entries() {
        let log = ReplayLog::with_capacity(2);
        for payload in ["a", "b", "c"] {
            log.append(msg(payload));
        }

        let mut sub = log.subscribe();
        assert_eq!(sub.try_next().unwrap().payload, "b");
        assert_eq!(sub.try_next().unwrap().payload, "c");
        assert!(sub.try_next().is_none());
    }

    #[test]
    fn test_append_prunes_retired_subscriptions() {
        let log = ReplayLog::new();
        let sub = log.subscribe();
        drop(sub);

        log.append(msg("one"));
        assert_eq!(log.lock().subscribers.len(), 0);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let log = ReplayLog::with_capacity(0);
        log.append(msg("only"));
        assert_eq!(log.capacity(), 1);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_subscriber_count() {
        let log = ReplayLog::new();
        assert_eq!(log.subscriber_count(), 0);

        let sub = log.subscribe();
        assert_eq!(log.subscriber_count(), 1);

        drop(sub);
        assert_eq!(log.subscriber_count(), 0);
    }

    #[test]
    fn test_debug_impl() {
        let log = ReplayLog::new();
        let debug_str = format!("{:?}", log);
        assert!(debug_str.contains("ReplayLog"));
        assert!(debug_str.contains("capacity"));
    }
}

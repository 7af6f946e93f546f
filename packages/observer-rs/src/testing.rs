//! Testing utilities for the observer harness.
//!
//! # Feature Flag
//!
//! This module is only available with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! observer = { path = "../observer-rs", features = ["testing"] }
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use observer::testing::{broadcast_body, InMemoryQueue};
//! use observer::{Harness, SourceType};
//!
//! let queue = Arc::new(InMemoryQueue::new());
//! let harness = Harness::builder(queue.clone()).build()?;
//! harness.start()?;
//!
//! queue.push("m-1", broadcast_body("topic-A", r#"{"orderId":"X1"}"#));
//!
//! harness
//!     .wait_for_message(SourceType::Broadcast, "topic-A", r#"{"orderId":"X1"}"#, timeout)
//!     .await?;
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;

use crate::queue::{MessageQueue, RawMessage, ReceiveRequest};

/// Body of a broadcast-topic delivery as the queue sees it.
pub fn broadcast_body(topic_arn: &str, message: &str) -> String {
    json!({
        "Type": "Notification",
        "MessageId": "00000000-0000-0000-0000-000000000000",
        "TopicArn": topic_arn,
        "Message": message,
        "Timestamp": "2026-01-01T00:00:00.000Z",
    })
    .to_string()
}

/// Body of an event-bus delivery after the input transformation.
pub fn routed_event_body(event_bus_name: &str, event: &serde_json::Value) -> String {
    json!({
        "eventBusName": event_bus_name,
        "event": event,
    })
    .to_string()
}

/// In-process queue with long-poll semantics and failure injection.
///
/// `receive` returns immediately when messages are queued, otherwise waits
/// up to the request's `wait_time` for a push.
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    messages: Mutex<VecDeque<RawMessage>>,
    pushed: Notify,
    failures_remaining: AtomicUsize,
    receive_calls: AtomicUsize,
    deleted: Mutex<Vec<RawMessage>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a message with a receipt handle derived from its id.
    pub fn push(&self, id: &str, body: impl Into<String>) {
        self.push_raw(RawMessage {
            id: id.to_string(),
            body: body.into(),
            receipt_handle: Some(format!("receipt-{id}")),
        });
    }

    pub fn push_raw(&self, message: RawMessage) {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(message);
        self.pushed.notify_one();
    }

    /// Make the next `count` receive calls fail.
    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn receive_calls(&self) -> usize {
        self.receive_calls.load(Ordering::SeqCst)
    }

    pub fn pending(&self) -> usize {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn deleted(&self) -> Vec<RawMessage> {
        self.deleted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn take_batch(&self, max: usize) -> Vec<RawMessage> {
        let mut messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        let count = max.min(messages.len());
        messages.drain(..count).collect()
    }

    fn take_failure(&self) -> bool {
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn receive(&self, request: ReceiveRequest) -> Result<Vec<RawMessage>> {
        self.receive_calls.fetch_add(1, Ordering::SeqCst);

        if self.take_failure() {
            return Err(anyhow!("injected receive failure"));
        }

        let max = request.max_messages.max(1) as usize;
        let batch = self.take_batch(max);
        if !batch.is_empty() {
            return Ok(batch);
        }

        // Long poll: wait for a push or give up after wait_time.
        let _ = tokio::time::timeout(request.wait_time, self.pushed.notified()).await;
        Ok(self.take_batch(max))
    }

    async fn delete(&self, message: &RawMessage) -> Result<()> {
        self.deleted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.clone());
        Ok(())
    }
}

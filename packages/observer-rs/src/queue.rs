//! Queue abstraction for production and testing.
//!
//! The poller only needs a long-poll receive and an optional acknowledgement.
//! `SqsQueue` talks to Amazon SQS; `InMemoryQueue` (behind the `testing`
//! feature) lets tests push raw bodies and inject receive failures.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use aws_sdk_sqs::error::DisplayErrorContext;
use tracing::warn;

use crate::config::MAX_WAIT_TIME;

/// A message as returned by the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Broker-assigned id, used for dedup.
    pub id: String,
    pub body: String,
    /// Token for acknowledging (deleting) the message.
    pub receipt_handle: Option<String>,
}

impl RawMessage {
    pub fn new(id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            receipt_handle: None,
        }
    }
}

/// Parameters for one long-poll receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveRequest {
    pub max_messages: i32,
    pub wait_time: Duration,
}

/// Trait for the durable queue the harness observes.
///
/// Errors are transient from the poller's point of view: they are logged
/// and the receive is retried.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Long-poll for up to `request.max_messages` messages.
    async fn receive(&self, request: ReceiveRequest) -> Result<Vec<RawMessage>>;

    /// Acknowledge a processed message.
    async fn delete(&self, message: &RawMessage) -> Result<()> {
        let _ = message;
        Ok(())
    }
}

/// Amazon SQS backed queue.
#[derive(Debug, Clone)]
pub struct SqsQueue {
    client: aws_sdk_sqs::Client,
    queue_url: String,
}

impl SqsQueue {
    pub fn new(client: aws_sdk_sqs::Client, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
        }
    }

    /// Build a client from the default AWS credential chain and region.
    pub async fn from_default_config(queue_url: impl Into<String>) -> Self {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(aws_sdk_sqs::Client::new(&aws_config), queue_url)
    }

}

/// Whole seconds for `WaitTimeSeconds`, rounded up so a sub-second wait
/// stays a long poll instead of becoming a short poll.
fn wait_time_seconds(wait_time: Duration) -> i32 {
    let secs = wait_time.as_secs() + u64::from(wait_time.subsec_nanos() > 0);
    secs.clamp(1, MAX_WAIT_TIME.as_secs()) as i32
}

#[async_trait]
impl MessageQueue for SqsQueue {
    async fn receive(&self, request: ReceiveRequest) -> Result<Vec<RawMessage>> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(request.max_messages)
            .wait_time_seconds(wait_time_seconds(request.wait_time))
            .send()
            .await
            .map_err(|e| anyhow!("receive_message failed: {}", DisplayErrorContext(&e)))?;

        let mut messages = Vec::with_capacity(output.messages().len());
        for message in output.messages() {
            let (Some(id), Some(body)) = (message.message_id(), message.body()) else {
                warn!(queue_url = %self.queue_url, "skipping queue message without id or body");
                continue;
            };
            messages.push(RawMessage {
                id: id.to_string(),
                body: body.to_string(),
                receipt_handle: message.receipt_handle().map(str::to_string),
            });
        }
        Ok(messages)
    }

    async fn delete(&self, message: &RawMessage) -> Result<()> {
        let Some(receipt_handle) = message.receipt_handle.as_deref() else {
            return Ok(());
        };
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| anyhow!("delete_message failed: {}", DisplayErrorContext(&e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_time_seconds_rounds_up() {
        assert_eq!(wait_time_seconds(Duration::ZERO), 1);
        assert_eq!(wait_time_seconds(Duration::from_millis(500)), 1);
        assert_eq!(wait_time_seconds(Duration::from_millis(1500)), 2);
        assert_eq!(wait_time_seconds(Duration::from_secs(20)), 20);
        assert_eq!(wait_time_seconds(Duration::from_secs(60)), 20);
    }
}

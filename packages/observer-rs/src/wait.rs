//! Waiting for observed messages.
//!
//! A wait subscribes to the replay log, scans the retained history from the
//! start, and then follows new appends until a message matches or the
//! timeout fires. It never drains the log, so any number of waits can run at
//! once without affecting each other.
//!
//! # Important Semantics
//!
//! A wait does NOT guarantee a message exists. Messages arrive in whatever
//! order the queue returns them, so matching is by content only, never by
//! position.
//!
//! Each wait resolves exactly once:
//!
//! ```text
//! Pending ──match──► Matched   (Ok)
//!    │
//!    └────timeout──► TimedOut  (Err)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use observer::wait::{wait_for_message, MessageMatcher};
//!
//! let message = wait_for_message(
//!     harness.replay_log(),
//!     MessageMatcher::broadcast(topic_arn, r#"{"orderId":"X1"}"#),
//!     Duration::from_secs(10),
//! )
//! .await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::debug;

use crate::envelope::{ObservedMessage, SourceType};
use crate::error::ObserverError;
use crate::replay::ReplayLog;

/// Default timeout for waits that don't specify one.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Exact match on source type, source id and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageMatcher {
    pub source_type: SourceType,
    pub source_id: String,
    pub payload: String,
}

impl MessageMatcher {
    pub fn new(
        source_type: SourceType,
        source_id: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            source_type,
            source_id: source_id.into(),
            payload: payload.into(),
        }
    }

    pub fn broadcast(source_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::new(SourceType::Broadcast, source_id, payload)
    }

    pub fn routed_event(source_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::new(SourceType::RoutedEvent, source_id, payload)
    }

    pub fn matches(&self, message: &ObservedMessage) -> bool {
        message.source_type == self.source_type
            && message.source_id == self.source_id
            && message.payload == self.payload
    }
}

/// Wait for the first message equal to `matcher` on all three fields.
pub async fn wait_for_message(
    log: &ReplayLog,
    matcher: MessageMatcher,
    wait_timeout: Duration,
) -> Result<Arc<ObservedMessage>, ObserverError> {
    let found = first_match(log, wait_timeout, |m| matcher.matches(m)).await;
    match found {
        Some(message) => Ok(message),
        None => Err(ObserverError::Timeout {
            source_type: matcher.source_type,
            source_id: matcher.source_id,
            payload: matcher.payload,
            timeout: wait_timeout,
        }),
    }
}

/// Wait for the first message satisfying `predicate`.
///
/// `description` only shows up in the timeout error.
pub async fn wait_for<F>(
    log: &ReplayLog,
    description: impl Into<String>,
    wait_timeout: Duration,
    predicate: F,
) -> Result<Arc<ObservedMessage>, ObserverError>
where
    F: Fn(&ObservedMessage) -> bool,
{
    let found = first_match(log, wait_timeout, predicate).await;
    match found {
        Some(message) => Ok(message),
        None => Err(ObserverError::TimeoutFor {
            description: description.into(),
            timeout: wait_timeout,
        }),
    }
}

async fn first_match<F>(
    log: &ReplayLog,
    wait_timeout: Duration,
    predicate: F,
) -> Option<Arc<ObservedMessage>>
where
    F: Fn(&ObservedMessage) -> bool,
{
    // The subscription is dropped (retired) whichever way this resolves.
    let mut subscription = log.subscribe();

    let result = timeout(wait_timeout, async {
        loop {
            let message = subscription.next().await;
            if predicate(message.as_ref()) {
                return message;
            }
        }
    })
    .await;

    match result {
        Ok(message) => {
            debug!(
                source_type = %message.source_type,
                source_id = %message.source_id,
                "wait matched"
            );
            Some(message)
        }
        Err(_) => {
            debug!(timeout_ms = wait_timeout.as_millis() as u64, "wait timed out");
            None
        }
    }
}

//! Structured error types for the observer harness.
//!
//! `ObserverError` is the only error type that crosses the harness boundary.
//! Everything else (malformed envelopes, failed receive calls, failed deletes)
//! is absorbed inside the poll loop, logged, and retried or skipped.
//!
//! # The Error Boundary Rule
//!
//! > **Only a wait timeout reaches test code.**
//!
//! - `anyhow` is internal transport for queue adapters
//! - `MalformedEnvelope` is logged and dropped
//! - `ObserverError::Timeout` is the assertion failure tests see
//!
//! # Example
//!
//! ```ignore
//! use observer::{ObserverError, SourceType};
//!
//! match harness
//!     .wait_for_message(SourceType::Broadcast, topic, payload, Duration::from_secs(10))
//!     .await
//! {
//!     Ok(message) => println!("observed {}", message.payload),
//!     Err(ObserverError::Timeout { source_id, .. }) => panic!("nothing from {}", source_id),
//!     Err(e) => panic!("harness error: {}", e),
//! }
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::envelope::SourceType;

/// Errors surfaced by the harness to its callers.
#[derive(Debug, Error)]
pub enum ObserverError {
    /// No message matching `(source_type, source_id, payload)` was observed in time.
    #[error(
        "timed out after {timeout:?} waiting for {source_type} message from {source_id}: {payload}"
    )]
    Timeout {
        source_type: SourceType,
        source_id: String,
        payload: String,
        timeout: Duration,
    },

    /// No message satisfying a custom predicate was observed in time.
    #[error("timed out after {timeout:?} waiting for {description}")]
    TimeoutFor {
        description: String,
        timeout: Duration,
    },

    /// `start()` was called outside of a Tokio runtime.
    #[error("the poller must be started from within a Tokio runtime")]
    NoRuntime,

    /// Configuration was rejected.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ObserverError {
    /// Returns true if this error is one of the timeout variants.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ObserverError::Timeout { .. } | ObserverError::TimeoutFor { .. }
        )
    }
}

/// Why a raw queue body could not be classified.
///
/// Internal and non-fatal: the message is dropped and polling continues.
#[derive(Debug, Error)]
pub enum MalformedEnvelope {
    /// Body is not valid JSON.
    #[error("body is not valid JSON: {0}")]
    NotJson(#[from] serde_json::Error),

    /// Body is JSON but not an object.
    #[error("body is not a JSON object")]
    NotAnObject,

    /// Neither a topic identifier nor an event bus identifier is present.
    #[error("body carries neither a topic nor an event bus identifier")]
    UnknownSource,

    /// The source identifier was found but the inner payload was not.
    #[error("{source_type} envelope from {source_id} has no usable payload")]
    MissingPayload {
        source_type: SourceType,
        source_id: String,
    },
}

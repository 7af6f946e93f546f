//! # Observer
//!
//! A test-time harness for asserting that an action produced the side-effect
//! messages it should have, on at-least-once, eventually consistent pub/sub
//! and event-routing infrastructure the test process does not control.
//!
//! ## Architecture
//!
//! ```text
//! Broadcast topic ──┐
//!                   ├──► durable queue
//! Event bus ────────┘        │
//!                            ▼ long poll
//!                      QueuePoller
//!                            │
//!                            ├─► classify()      Unknown → dropped
//!                            ├─► Deduplicator    redelivery → dropped
//!                            ▼
//!                       ReplayLog ──────────────┐
//!                            │                  │
//!                            ▼ subscribe()      ▼ subscribe()
//!                   wait_for_message(A)   wait_for_message(B)
//! ```
//!
//! ## Key Invariants
//!
//! 1. **At most one observation per message id** - redeliveries are dropped
//! 2. **Observations are immutable** - removed only by capacity eviction
//! 3. **Waits replay history** - a wait registered after the message arrived
//!    still sees it
//! 4. **Waits are independent** - the log is broadcast, never drained
//! 5. **Polling never gives up** - failed receives are retried with backoff
//!
//! ## Guarantees
//!
//! - **Content matching only**: arrival order is whatever the queue returns
//! - **In-memory only**: nothing is persisted
//! - **Bounded replay**: entries beyond the replay capacity are evicted
//!
//! ## Example
//!
//! ```ignore
//! use observer::{Harness, ObserverConfig, SourceType, SqsQueue};
//!
//! let config = ObserverConfig::from_env()?;
//! let queue = SqsQueue::from_default_config(&config.queue_url).await;
//! let harness = Harness::from_config(Arc::new(queue), &config)?;
//! harness.start()?;
//!
//! place_order("X1").await?;
//!
//! harness
//!     .wait_for_message(
//!         SourceType::Broadcast,
//!         restaurant_topic_arn,
//!         r#"{"orderId":"X1","restaurantName":"Fangtasia"}"#,
//!         Duration::from_secs(10),
//!     )
//!     .await?;
//!
//! harness.stop().await;
//! ```

mod config;
mod dedup;
mod envelope;
mod error;
mod harness;
mod poller;
mod queue;
mod replay;

// Wait primitives over a bare replay log
pub mod wait;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use crate::config::{ObserverConfig, PollerConfig, MAX_BATCH_SIZE, MAX_WAIT_TIME};
pub use crate::dedup::Deduplicator;
pub use crate::envelope::{classify, Envelope, ObservedMessage, SourceType};
pub use crate::error::{MalformedEnvelope, ObserverError};
pub use crate::harness::{Harness, HarnessBuilder};
pub use crate::poller::{IngestOutcome, Ingestor, PollerStats, QueuePoller, StatsSnapshot};
pub use crate::queue::{MessageQueue, RawMessage, ReceiveRequest, SqsQueue};
pub use crate::replay::{ReplayLog, Subscription, DEFAULT_CAPACITY};
pub use crate::wait::{MessageMatcher, DEFAULT_WAIT_TIMEOUT};

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;

//! Shared setup for harness integration tests.

use std::sync::Arc;
use std::time::Duration;

use observer::testing::InMemoryQueue;
use observer::{Harness, PollerConfig};

/// A harness over an in-memory queue.
pub struct TestHarness {
    pub queue: Arc<InMemoryQueue>,
    pub harness: Harness,
}

impl TestHarness {
    pub fn start() -> Self {
        Self::start_with(poller_config())
    }

    pub fn start_with(config: PollerConfig) -> Self {
        let t = Self::stopped(config);
        t.harness.start().expect("test harness should start");
        t
    }

    /// Built but not started, so the queue can be primed first.
    pub fn stopped(config: PollerConfig) -> Self {
        // Run tests with: RUST_LOG=debug cargo test -- --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let queue = Arc::new(InMemoryQueue::new());
        let harness = Harness::builder(queue.clone())
            .poller_config(config)
            .build()
            .expect("test harness config should be valid");

        Self { queue, harness }
    }
}

/// Short long-poll and backoff so tests don't sit idle.
pub fn poller_config() -> PollerConfig {
    PollerConfig {
        wait_time: Duration::from_millis(100),
        min_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(40),
        ..Default::default()
    }
}

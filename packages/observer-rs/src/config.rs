use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

use crate::error::ObserverError;
use crate::queue::ReceiveRequest;
use crate::replay::DEFAULT_CAPACITY;

/// Longest long-poll wait the queue accepts.
pub const MAX_WAIT_TIME: Duration = Duration::from_secs(20);

/// Largest receive batch the queue accepts.
pub const MAX_BATCH_SIZE: i32 = 10;

/// Configuration for the queue poller.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Maximum messages per receive (1..=10)
    pub max_messages: i32,
    /// Server-side long-poll wait (non-zero, at most 20s). SQS rounds
    /// sub-second waits up to one second.
    pub wait_time: Duration,
    /// First backoff after a failed receive
    pub min_backoff: Duration,
    /// Backoff ceiling
    pub max_backoff: Duration,
    /// Delete messages from the queue once ingested
    pub delete_received: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            max_messages: MAX_BATCH_SIZE,
            wait_time: MAX_WAIT_TIME,
            min_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            delete_received: false,
        }
    }
}

impl PollerConfig {
    pub fn validate(&self) -> Result<(), ObserverError> {
        if !(1..=MAX_BATCH_SIZE).contains(&self.max_messages) {
            return Err(ObserverError::Config(format!(
                "max_messages must be between 1 and {}, got {}",
                MAX_BATCH_SIZE, self.max_messages
            )));
        }
        if self.wait_time.is_zero() || self.wait_time > MAX_WAIT_TIME {
            return Err(ObserverError::Config(format!(
                "wait_time must be within (0, {:?}], got {:?}",
                MAX_WAIT_TIME, self.wait_time
            )));
        }
        if self.min_backoff.is_zero() || self.min_backoff > self.max_backoff {
            return Err(ObserverError::Config(format!(
                "backoff must satisfy 0 < min_backoff <= max_backoff, got {:?}..{:?}",
                self.min_backoff, self.max_backoff
            )));
        }
        Ok(())
    }

    pub fn receive_request(&self) -> ReceiveRequest {
        ReceiveRequest {
            max_messages: self.max_messages,
            wait_time: self.wait_time,
        }
    }
}

/// Harness configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ObserverConfig {
    pub queue_url: String,
    pub replay_capacity: usize,
    pub poller: PollerConfig,
}

impl ObserverConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let defaults = PollerConfig::default();
        let poller = PollerConfig {
            max_messages: parse_var("OBSERVER_MAX_MESSAGES", defaults.max_messages)?,
            wait_time: Duration::from_secs(parse_var(
                "OBSERVER_WAIT_TIME_SECS",
                defaults.wait_time.as_secs(),
            )?),
            min_backoff: Duration::from_millis(parse_var(
                "OBSERVER_MIN_BACKOFF_MS",
                defaults.min_backoff.as_millis() as u64,
            )?),
            max_backoff: Duration::from_millis(parse_var(
                "OBSERVER_MAX_BACKOFF_MS",
                defaults.max_backoff.as_millis() as u64,
            )?),
            delete_received: parse_var("OBSERVER_DELETE_RECEIVED", defaults.delete_received)?,
        };
        poller.validate()?;

        Ok(Self {
            queue_url: env::var("OBSERVER_QUEUE_URL")
                .context("OBSERVER_QUEUE_URL must be set")?,
            replay_capacity: parse_var("OBSERVER_REPLAY_CAPACITY", DEFAULT_CAPACITY)?,
            poller,
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid {}", name, std::any::type_name::<T>())),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = PollerConfig::default();
        assert_eq!(config.max_messages, 10);
        assert_eq!(config.wait_time, Duration::from_secs(20));
        assert!(!config.delete_received);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_oversized_batch() {
        let config = PollerConfig {
            max_messages: 11,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ObserverError::Config(_))));
    }

    #[test]
    fn test_rejects_long_wait() {
        let config = PollerConfig {
            wait_time: Duration::from_secs(21),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_wait() {
        let config = PollerConfig {
            wait_time: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ObserverError::Config(_))));

        let config = PollerConfig {
            wait_time: Duration::from_millis(500),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_inverted_backoff() {
        let config = PollerConfig {
            min_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_receive_request_mirrors_config() {
        let config = PollerConfig {
            max_messages: 3,
            wait_time: Duration::from_secs(1),
            ..Default::default()
        };
        let request = config.receive_request();
        assert_eq!(request.max_messages, 3);
        assert_eq!(request.wait_time, Duration::from_secs(1));
    }
}

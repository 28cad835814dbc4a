//! Consumer configuration.

use conveyor_core::consumer::{ShutdownMode, SubscriptionError};
use std::time::Duration;

/// Configuration shared by every subscription of a
/// [`KafkaMessageConsumer`](crate::KafkaMessageConsumer).
///
/// Built with [`KafkaConsumerConfig::builder`]. The consumer-group id is not
/// configured here: each subscription uses its `subscriber_id` as the group
/// id, so the group coordinator gives every partition to exactly one member
/// of that subscriber's deployment.
#[derive(Clone, Debug)]
pub struct KafkaConsumerConfig {
    /// Comma-separated broker addresses (e.g. "localhost:9092").
    pub bootstrap_servers: String,
    /// Where a new consumer group starts reading. Default: "earliest".
    pub auto_offset_reset: String,
    /// Broker session timeout. Default: 10 seconds.
    pub session_timeout: Duration,
    /// Bound on a single fetch wait, so shutdown is observed within one
    /// interval. Default: 100 milliseconds.
    pub poll_interval: Duration,
    /// How often safe offsets are committed. Default: 1 second.
    pub commit_interval: Duration,
    /// How `Stop` treats the in-flight handler. Default: wait for it.
    pub shutdown_mode: ShutdownMode,
}

impl KafkaConsumerConfig {
    /// Start building a configuration.
    #[must_use]
    pub fn builder() -> KafkaConsumerConfigBuilder {
        KafkaConsumerConfigBuilder::default()
    }
}

/// Builder for [`KafkaConsumerConfig`].
///
/// # Example
///
/// ```
/// use conveyor_kafka::KafkaConsumerConfig;
/// use conveyor_core::ShutdownMode;
/// use std::time::Duration;
///
/// let config = KafkaConsumerConfig::builder()
///     .bootstrap_servers("localhost:9092")
///     .auto_offset_reset("earliest")
///     .session_timeout(Duration::from_secs(10))
///     .shutdown_mode(ShutdownMode::CancelCurrent)
///     .build()
///     .unwrap();
/// assert_eq!(config.bootstrap_servers, "localhost:9092");
/// ```
#[derive(Default)]
pub struct KafkaConsumerConfigBuilder {
    bootstrap_servers: Option<String>,
    auto_offset_reset: Option<String>,
    session_timeout: Option<Duration>,
    poll_interval: Option<Duration>,
    commit_interval: Option<Duration>,
    shutdown_mode: Option<ShutdownMode>,
}

impl KafkaConsumerConfigBuilder {
    /// Set the broker addresses (required).
    #[must_use]
    pub fn bootstrap_servers(mut self, servers: impl Into<String>) -> Self {
        self.bootstrap_servers = Some(servers.into());
        self
    }

    /// Set where new consumer groups start reading: "earliest" or "latest".
    ///
    /// Default: "earliest"
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Set the broker session timeout.
    ///
    /// Default: 10 seconds
    #[must_use]
    pub const fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    /// Set the fetch poll bound.
    ///
    /// Default: 100 milliseconds
    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Set the offset commit cadence.
    ///
    /// Default: 1 second
    #[must_use]
    pub const fn commit_interval(mut self, interval: Duration) -> Self {
        self.commit_interval = Some(interval);
        self
    }

    /// Set the shutdown mode.
    ///
    /// Default: [`ShutdownMode::WaitForCompletion`]
    #[must_use]
    pub const fn shutdown_mode(mut self, mode: ShutdownMode) -> Self {
        self.shutdown_mode = Some(mode);
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::ConnectionFailed`] if no bootstrap
    /// servers were set.
    pub fn build(self) -> Result<KafkaConsumerConfig, SubscriptionError> {
        let bootstrap_servers = self.bootstrap_servers.ok_or_else(|| {
            SubscriptionError::ConnectionFailed("Bootstrap servers not configured".to_string())
        })?;

        Ok(KafkaConsumerConfig {
            bootstrap_servers,
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "earliest".to_string()),
            session_timeout: self.session_timeout.unwrap_or(Duration::from_secs(10)),
            poll_interval: self.poll_interval.unwrap_or(Duration::from_millis(100)),
            commit_interval: self.commit_interval.unwrap_or(Duration::from_secs(1)),
            shutdown_mode: self.shutdown_mode.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn builder_applies_defaults() {
        let config = KafkaConsumerConfig::builder()
            .bootstrap_servers("localhost:9092")
            .build()
            .unwrap();

        assert_eq!(config.auto_offset_reset, "earliest");
        assert_eq!(config.session_timeout, Duration::from_secs(10));
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.commit_interval, Duration::from_secs(1));
        assert_eq!(config.shutdown_mode, ShutdownMode::WaitForCompletion);
    }

    #[test]
    fn missing_bootstrap_servers_is_an_error() {
        let outcome = KafkaConsumerConfig::builder().build();
        assert!(matches!(
            outcome,
            Err(SubscriptionError::ConnectionFailed(_))
        ));
    }
}

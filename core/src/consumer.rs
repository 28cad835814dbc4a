//! Consumer-side traits: subscriptions and lifecycle.
//!
//! A [`MessageConsumer`] binds `(subscriber_id, channel set, handler)`
//! triples to long-lived broker subscriptions. The broker-backed
//! implementation lives in `conveyor-kafka`; tests use lightweight doubles.
//!
//! # Delivery contract
//!
//! - Within one partition (and therefore one `PARTITION_ID`), handlers see
//!   messages strictly in broker offset order.
//! - Across partitions no ordering is implied.
//! - Delivery is at-least-once; the duplicate-detection decorator makes
//!   handling effectively exactly-once per subscriber.
//!
//! # Dyn compatibility
//!
//! The traits use explicit `Pin<Box<dyn Future>>` returns instead of
//! `async fn` so consumers and subscriptions can live behind `Arc<dyn ...>`.

use crate::decorator::MessageHandler;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// How `Stop` treats the handler that is executing when shutdown begins.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Let the in-flight handler finish; its message is fully processed and
    /// its offset committed. Queued-but-unstarted messages are abandoned.
    #[default]
    WaitForCompletion,

    /// Signal cancellation to the in-flight handler; a cooperating handler
    /// aborts, the offset is not committed, and the message is redelivered
    /// on the next start. Queued-but-unstarted messages are abandoned.
    CancelCurrent,
}

/// Errors from subscribing to channels.
#[derive(Error, Debug, Clone)]
pub enum SubscriptionError {
    /// The subscriber id was empty.
    #[error("Subscriber id cannot be empty")]
    EmptySubscriberId,

    /// The channel set was empty.
    #[error("Channel set cannot be empty")]
    EmptyChannels,

    /// Could not reach or configure the broker.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The broker rejected the subscription.
    #[error("Subscription failed for channels {channels:?}: {reason}")]
    SubscriptionFailed {
        /// The channels that failed to subscribe.
        channels: Vec<String>,
        /// The reason for failure.
        reason: String,
    },

    /// The consumer is already closed.
    #[error("Consumer is closed")]
    Closed,
}

/// A live binding of a subscriber to its channels.
///
/// Dropping the handle does not stop delivery; call
/// [`Subscription::unsubscribe`] or close the owning consumer.
pub trait Subscription: Send + Sync {
    /// The subscriber id this subscription was created with.
    fn subscriber_id(&self) -> &str;

    /// Stop the fetch loop, stop every swimlane per the configured
    /// [`ShutdownMode`], commit final safe offsets, and release the broker
    /// session. Idempotent; a no-op after the consumer is closed.
    fn unsubscribe(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Entry point for consuming messages.
pub trait MessageConsumer: Send + Sync {
    /// Subscribe a handler to a set of channels under the given subscriber
    /// id (used as the broker consumer-group id).
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError`] when the subscriber id or channel set
    /// is invalid, the consumer is closed, or the broker rejects the
    /// subscription.
    fn subscribe(
        &self,
        subscriber_id: &str,
        channels: &[&str],
        handler: MessageHandler,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn Subscription>, SubscriptionError>> + Send + '_>>;

    /// Close every subscription owned by this consumer. Idempotent.
    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_mode_defaults_to_wait_for_completion() {
        assert_eq!(ShutdownMode::default(), ShutdownMode::WaitForCompletion);
    }

    #[test]
    fn subscription_error_display_names_the_channels() {
        let err = SubscriptionError::SubscriptionFailed {
            channels: vec!["orders".to_string()],
            reason: "broker unavailable".to_string(),
        };
        let display = err.to_string();
        assert!(display.contains("orders"));
        assert!(display.contains("broker unavailable"));
    }
}

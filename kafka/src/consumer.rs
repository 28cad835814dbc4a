//! The broker-backed [`MessageConsumer`] implementation.

use crate::config::KafkaConsumerConfig;
use crate::subscription::KafkaSubscription;
use crate::swimlane::SwimlaneConsumer;
use conveyor_core::consumer::{MessageConsumer, Subscription, SubscriptionError};
use conveyor_core::decorator::{
    DecoratorChain, DeliveryContext, MessageHandler, MessageHandlerDecorator,
};
use conveyor_core::message::Message;
use rdkafka::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

/// Kafka-backed message consumer: owns the subscription set and builds the
/// delivery chain each subscription runs.
///
/// Decorators are configured once on the consumer and shared by every
/// subscription it creates, wrapped around each subscription's terminal
/// handler in the configured (outermost-first) order. The standard wiring
/// is receive-interceptors → duplicate detection → handle-interceptors →
/// typed dispatch.
///
/// # Example
///
/// ```ignore
/// use conveyor_core::decorator::{HandleInterceptorsDecorator, ReceiveInterceptorsDecorator};
/// use conveyor_kafka::{KafkaConsumerConfig, KafkaMessageConsumer};
/// use conveyor_postgres::DuplicateDetectingDecorator;
/// use std::sync::Arc;
///
/// let config = KafkaConsumerConfig::builder()
///     .bootstrap_servers("localhost:9092")
///     .build()?;
///
/// let consumer = KafkaMessageConsumer::new(config)
///     .with_decorator(Arc::new(ReceiveInterceptorsDecorator::new(interceptors.clone())))
///     .with_decorator(Arc::new(DuplicateDetectingDecorator::new(pool)))
///     .with_decorator(Arc::new(HandleInterceptorsDecorator::new(interceptors)));
///
/// let subscription = consumer
///     .subscribe("order-service", &["Orders"], dispatcher.into_message_handler())
///     .await?;
/// ```
pub struct KafkaMessageConsumer {
    config: KafkaConsumerConfig,
    decorators: Vec<Arc<dyn MessageHandlerDecorator>>,
    subscriptions: Mutex<Vec<Arc<KafkaSubscription>>>,
    closed: AtomicBool,
}

impl KafkaMessageConsumer {
    /// Create a consumer with no decorators.
    #[must_use]
    pub fn new(config: KafkaConsumerConfig) -> Self {
        Self {
            config,
            decorators: Vec::new(),
            subscriptions: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Add the next delivery decorator (outermost first).
    #[must_use]
    pub fn with_decorator(mut self, decorator: Arc<dyn MessageHandlerDecorator>) -> Self {
        self.decorators.push(decorator);
        self
    }

    fn create_broker_session(
        &self,
        subscriber_id: &str,
        channels: &[&str],
    ) -> Result<StreamConsumer, SubscriptionError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.config.bootstrap_servers)
            .set("group.id", subscriber_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.config.auto_offset_reset)
            .set(
                "session.timeout.ms",
                self.config.session_timeout.as_millis().to_string(),
            )
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| {
                SubscriptionError::ConnectionFailed(format!("Failed to create consumer: {e}"))
            })?;

        consumer
            .subscribe(channels)
            .map_err(|e| SubscriptionError::SubscriptionFailed {
                channels: channels.iter().map(ToString::to_string).collect(),
                reason: e.to_string(),
            })?;

        Ok(consumer)
    }

    /// Build the per-subscription delivery closure the swimlanes invoke.
    fn build_lane_consumer(&self, subscriber_id: &str, handler: MessageHandler) -> SwimlaneConsumer {
        let mut builder = DecoratorChain::builder(handler);
        for decorator in &self.decorators {
            builder = builder.around(Arc::clone(decorator));
        }
        let chain = builder.build();

        let subscriber_id = subscriber_id.to_string();
        Arc::new(
            move |message: Message, cancellation: watch::Receiver<bool>| {
                let channel = message.destination().unwrap_or_default().to_string();
                let ctx =
                    DeliveryContext::new(subscriber_id.clone(), channel, message, cancellation);
                chain.dispatch(ctx)
            },
        )
    }
}

impl MessageConsumer for KafkaMessageConsumer {
    fn subscribe(
        &self,
        subscriber_id: &str,
        channels: &[&str],
        handler: MessageHandler,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn Subscription>, SubscriptionError>> + Send + '_>>
    {
        let subscriber_id = subscriber_id.to_string();
        let channels: Vec<String> = channels.iter().map(ToString::to_string).collect();

        Box::pin(async move {
            if subscriber_id.is_empty() {
                return Err(SubscriptionError::EmptySubscriberId);
            }
            if channels.is_empty() {
                return Err(SubscriptionError::EmptyChannels);
            }
            if self.closed.load(Ordering::SeqCst) {
                return Err(SubscriptionError::Closed);
            }

            let channel_refs: Vec<&str> = channels.iter().map(String::as_str).collect();
            let broker_session = self.create_broker_session(&subscriber_id, &channel_refs)?;
            let lane_consumer = self.build_lane_consumer(&subscriber_id, handler);

            let subscription = Arc::new(KafkaSubscription::new(
                subscriber_id.clone(),
                channels.clone(),
            ));
            subscription.start(broker_session, lane_consumer, self.config.clone())?;

            tracing::info!(
                subscriber_id = %subscriber_id,
                channels = ?channels,
                "Subscribed"
            );

            self.subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Arc::clone(&subscription));

            Ok(subscription as Arc<dyn Subscription>)
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::SeqCst) {
                return;
            }

            let subscriptions: Vec<Arc<KafkaSubscription>> = {
                let mut guard = self
                    .subscriptions
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                std::mem::take(&mut *guard)
            };

            tracing::info!(count = subscriptions.len(), "Closing message consumer");
            for subscription in subscriptions {
                subscription.unsubscribe().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::decorator::MessageHandler;

    fn test_consumer() -> KafkaMessageConsumer {
        #[allow(clippy::unwrap_used)]
        let config = KafkaConsumerConfig::builder()
            .bootstrap_servers("localhost:9092")
            .build()
            .unwrap();
        KafkaMessageConsumer::new(config)
    }

    fn noop_handler() -> MessageHandler {
        MessageHandler::new(|_message, _scope| Box::pin(async { Ok(()) }))
    }

    #[tokio::test]
    async fn empty_subscriber_id_is_rejected() {
        let consumer = test_consumer();
        let outcome = consumer.subscribe("", &["orders"], noop_handler()).await;
        assert!(matches!(outcome, Err(SubscriptionError::EmptySubscriberId)));
    }

    #[tokio::test]
    async fn empty_channel_set_is_rejected() {
        let consumer = test_consumer();
        let outcome = consumer.subscribe("sub-1", &[], noop_handler()).await;
        assert!(matches!(outcome, Err(SubscriptionError::EmptyChannels)));
    }

    #[tokio::test]
    async fn subscribe_after_close_is_rejected() {
        let consumer = test_consumer();
        consumer.close().await;
        let outcome = consumer.subscribe("sub-1", &["orders"], noop_handler()).await;
        assert!(matches!(outcome, Err(SubscriptionError::Closed)));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let consumer = test_consumer();
        consumer.close().await;
        consumer.close().await;
    }
}

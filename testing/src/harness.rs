//! In-process relay harness.
//!
//! Production deployments rely on an external CDC relay and a broker
//! between the outbox and the consumers. For tests, the harness stands in
//! for both: it drains unpublished outbox rows in id order, marks them
//! published, partitions them by `PARTITION_ID` the way the broker record
//! key would, and pushes them through the same swimlane + decorator
//! pipeline the Kafka consumer uses. Everything downstream of the broker —
//! duplicate detection, transaction scoping, interceptor hooks, typed
//! dispatch, shutdown semantics — is exercised for real against a live
//! Postgres.

use conveyor_core::decorator::{
    DecoratorChain, DeliveryContext, HandleInterceptorsDecorator, MessageHandler,
    ReceiveInterceptorsDecorator,
};
use conveyor_core::consumer::ShutdownMode;
use conveyor_core::ids::TimeOrderedIdGenerator;
use conveyor_core::interceptor::InterceptorStack;
use conveyor_core::message::Message;
use conveyor_events::{DomainEvent, DomainEventPublisher};
use conveyor_kafka::swimlane::{CompletionCallback, SwimlaneConsumer, SwimlaneMap};
use conveyor_postgres::{DuplicateDetectingDecorator, MessagingAdmin, OutboxProducer};
use sqlx::PgPool;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// The outcome log of dispatched deliveries: `(message_id, succeeded)`.
/// Abandoned deliveries never appear here — exactly like offsets that are
/// never committed.
pub type CompletionLog = Arc<Mutex<Vec<(String, bool)>>>;

/// An in-process publisher + relay + consumer pipeline for one subscriber.
pub struct OutboxRelayHarness {
    pool: PgPool,
    admin: MessagingAdmin,
    publisher: DomainEventPublisher,
    channels: HashSet<String>,
    swimlanes: SwimlaneMap,
    lane_consumer: SwimlaneConsumer,
    partitions: u64,
    round_robin: Mutex<u64>,
    completions: CompletionLog,
}

impl OutboxRelayHarness {
    /// Wire a harness for one subscriber.
    ///
    /// `interceptors` feeds both the producer side (`pre_send`/`post_send`)
    /// and the consumer side of the chain, so the six counters of a
    /// [`CountingInterceptor`](crate::CountingInterceptor) observe the full
    /// round trip. The chain is the standard wiring: receive interceptors →
    /// duplicate detection → handle interceptors → `handler`.
    #[must_use]
    pub fn new(
        pool: PgPool,
        subscriber_id: &str,
        channels: &[&str],
        interceptors: InterceptorStack,
        handler: MessageHandler,
    ) -> Self {
        let producer = Arc::new(OutboxProducer::new(
            Arc::new(TimeOrderedIdGenerator::new()),
            interceptors.clone(),
        ));
        let publisher = DomainEventPublisher::new(producer);

        let chain = DecoratorChain::builder(handler)
            .around(Arc::new(ReceiveInterceptorsDecorator::new(
                interceptors.clone(),
            )))
            .around(Arc::new(DuplicateDetectingDecorator::new(pool.clone())))
            .around(Arc::new(HandleInterceptorsDecorator::new(interceptors)))
            .build();

        let ctx_subscriber = subscriber_id.to_string();
        let lane_consumer: SwimlaneConsumer = Arc::new(move |message: Message, cancellation| {
            let channel = message.destination().unwrap_or_default().to_string();
            let ctx = DeliveryContext::new(ctx_subscriber.clone(), channel, message, cancellation);
            chain.dispatch(ctx)
        });

        Self {
            pool: pool.clone(),
            admin: MessagingAdmin::new(pool),
            publisher,
            channels: channels.iter().map(ToString::to_string).collect(),
            swimlanes: SwimlaneMap::new(subscriber_id),
            lane_consumer,
            partitions: 1,
            round_robin: Mutex::new(0),
            completions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Set the simulated topic partition count (default 1).
    #[must_use]
    pub fn with_partitions(mut self, partitions: u64) -> Self {
        self.partitions = partitions.max(1);
        self
    }

    /// Table access for assertions.
    #[must_use]
    pub fn admin(&self) -> &MessagingAdmin {
        &self.admin
    }

    /// Publish events the way a business caller would: in their own
    /// committed transaction.
    ///
    /// # Errors
    ///
    /// Propagates transaction and publish failures.
    pub async fn publish<E: DomainEvent>(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
        events: &[E],
    ) -> anyhow::Result<Vec<String>> {
        let mut tx = self.pool.begin().await?;
        let ids = self
            .publisher
            .publish(&mut tx, aggregate_type, aggregate_id, events)
            .await?;
        tx.commit().await?;
        Ok(ids)
    }

    /// Drain unpublished outbox rows in id order, mark them published, and
    /// dispatch the ones on subscribed channels. Returns how many were
    /// dispatched.
    ///
    /// # Errors
    ///
    /// Propagates database and wire-decode failures.
    pub async fn relay(&self) -> anyhow::Result<usize> {
        let rows = self.admin.unpublished(1000).await?;
        let mut dispatched = 0;

        for row in rows {
            self.admin.mark_published(&row.id).await?;

            if !self.channels.contains(&row.destination) {
                continue;
            }

            let headers: BTreeMap<String, String> = serde_json::from_str(&row.headers)?;
            let message = Message {
                id: row.id,
                headers,
                payload: row.payload,
            };
            // Round-trip through the wire schema, as the broker would.
            let message = Message::from_json(&message.to_json()?)?;

            let partition = self.partition_for(message.partition_id());
            let message_id = message.id.clone();
            let completions = Arc::clone(&self.completions);
            let completion: CompletionCallback = Box::new(move |outcome| {
                completions
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((message_id, outcome.is_ok()));
            });

            let lane = self.swimlanes.lane(partition);
            if lane.dispatch(message, Arc::clone(&self.lane_consumer), completion) {
                dispatched += 1;
            }
        }

        tracing::debug!(dispatched, "Relayed outbox rows");
        Ok(dispatched)
    }

    /// Wait until every swimlane worker has gone quiescent (all started
    /// deliveries finished, or a lane halted on failure).
    pub async fn settle(&self) {
        for _ in 0..1000 {
            if self.swimlanes.all_idle() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Stop every swimlane per `mode`, exactly as consumer shutdown does.
    pub async fn close(&self, mode: ShutdownMode) {
        self.swimlanes.stop_all(mode).await;
    }

    /// Snapshot of delivery outcomes, in completion order.
    #[must_use]
    pub fn completions(&self) -> Vec<(String, bool)> {
        self.completions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn partition_for(&self, partition_key: Option<&str>) -> i32 {
        match partition_key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % self.partitions) as i32
            }
            None => {
                let mut counter = self
                    .round_robin
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                *counter = (*counter + 1) % self.partitions;
                *counter as i32
            }
        }
    }
}

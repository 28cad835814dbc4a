//! Subscription lifecycle: the fetch loop and shutdown coordination.
//!
//! Each subscription owns one broker session consuming its channel set
//! under consumer-group = `subscriber_id`, one fetch task, one swimlane
//! map, and one offset tracker. The fetch task polls with a bounded
//! timeout so shutdown is observed within one interval, routes records to
//! swimlanes by partition, and periodically commits safe offsets.
//!
//! # Shutdown
//!
//! `unsubscribe` signals the fetch task, which stops fetching, stops every
//! swimlane per the configured [`ShutdownMode`] (waiting for or cancelling
//! the in-flight handler, abandoning queued ones), commits final safe
//! offsets synchronously, and drops the broker session. No in-flight
//! handler is left running when `unsubscribe` returns, and no un-started
//! message has its offset committed.

use crate::backoff::FetchBackoff;
use crate::config::KafkaConsumerConfig;
use crate::offsets::OffsetTracker;
use crate::swimlane::{CompletionCallback, SwimlaneConsumer, SwimlaneMap};
use conveyor_core::consumer::Subscription;
use conveyor_core::message::Message;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message as KafkaMessage;
use rdkafka::{Offset, TopicPartitionList};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Lifecycle of a subscription's broker consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumerState {
    /// Constructed, fetch task not yet spawned.
    Created,
    /// Fetch task spawned, not yet polling.
    Started,
    /// Polling the broker.
    Running,
    /// Shutdown in progress: draining swimlanes, committing final offsets.
    Stopping,
    /// Fully stopped; the broker session is closed.
    Stopped,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A live Kafka subscription.
///
/// Created by [`KafkaMessageConsumer::subscribe`](crate::KafkaMessageConsumer::subscribe);
/// stopped by [`Subscription::unsubscribe`] or by closing the owning
/// consumer. Stopping twice is a no-op.
pub struct KafkaSubscription {
    subscriber_id: String,
    channels: Vec<String>,
    state: Arc<Mutex<ConsumerState>>,
    shutdown: watch::Sender<bool>,
    fetch_task: Mutex<Option<JoinHandle<()>>>,
}

impl KafkaSubscription {
    pub(crate) fn new(subscriber_id: String, channels: Vec<String>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            subscriber_id,
            channels,
            state: Arc::new(Mutex::new(ConsumerState::Created)),
            shutdown,
            fetch_task: Mutex::new(None),
        }
    }

    /// The channels this subscription consumes.
    #[must_use]
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConsumerState {
        *lock(&self.state)
    }

    /// Spawn the fetch loop. Starting a subscription twice is a
    /// programming error and is rejected.
    pub(crate) fn start(
        &self,
        consumer: StreamConsumer,
        lane_consumer: SwimlaneConsumer,
        config: KafkaConsumerConfig,
    ) -> Result<(), conveyor_core::consumer::SubscriptionError> {
        {
            let mut state = lock(&self.state);
            if *state != ConsumerState::Created {
                return Err(
                    conveyor_core::consumer::SubscriptionError::SubscriptionFailed {
                        channels: self.channels.clone(),
                        reason: format!("subscription already started (state: {state:?})"),
                    },
                );
            }
            *state = ConsumerState::Started;
        }

        let loop_ctx = FetchLoop {
            subscriber_id: self.subscriber_id.clone(),
            swimlanes: Arc::new(SwimlaneMap::new(self.subscriber_id.clone())),
            lane_consumer,
            tracker: Arc::new(Mutex::new(OffsetTracker::new())),
            failed_partitions: Arc::new(Mutex::new(HashSet::new())),
            state: Arc::clone(&self.state),
            config,
        };

        let shutdown_rx = self.shutdown.subscribe();
        let handle = tokio::spawn(loop_ctx.run(consumer, shutdown_rx));
        *lock(&self.fetch_task) = Some(handle);

        Ok(())
    }

    async fn shutdown_and_wait(&self) {
        let _ = self.shutdown.send(true);
        let task = lock(&self.fetch_task).take();
        if let Some(handle) = task {
            if let Err(join_err) = handle.await {
                if join_err.is_panic() {
                    tracing::error!(
                        subscriber_id = %self.subscriber_id,
                        "Fetch task panicked during shutdown"
                    );
                }
            }
        }
    }
}

impl Subscription for KafkaSubscription {
    fn subscriber_id(&self) -> &str {
        &self.subscriber_id
    }

    fn unsubscribe(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            tracing::info!(
                subscriber_id = %self.subscriber_id,
                channels = ?self.channels,
                "Unsubscribing"
            );
            self.shutdown_and_wait().await;
        })
    }
}

/// Everything the fetch task owns for one subscription.
struct FetchLoop {
    subscriber_id: String,
    swimlanes: Arc<SwimlaneMap>,
    lane_consumer: SwimlaneConsumer,
    tracker: Arc<Mutex<OffsetTracker>>,
    failed_partitions: Arc<Mutex<HashSet<(String, i32)>>>,
    state: Arc<Mutex<ConsumerState>>,
    config: KafkaConsumerConfig,
}

impl FetchLoop {
    async fn run(self, consumer: StreamConsumer, mut shutdown: watch::Receiver<bool>) {
        *lock(&self.state) = ConsumerState::Running;
        tracing::info!(subscriber_id = %self.subscriber_id, "Fetch loop running");

        let mut backoff = FetchBackoff::default();
        let mut next_commit = Instant::now() + self.config.commit_interval;

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // The subscription handle is gone; treat as shutdown.
                        break;
                    }
                }
                fetched = tokio::time::timeout(self.config.poll_interval, consumer.recv()) => {
                    match fetched {
                        Err(_elapsed) => {
                            // Poll bound reached; loop to observe shutdown.
                        }
                        Ok(Err(e)) => {
                            let delay = backoff.next_delay();
                            tracing::error!(
                                subscriber_id = %self.subscriber_id,
                                error = %e,
                                backoff_ms = delay.as_millis() as u64,
                                "Fetch failed; backing off"
                            );
                            tokio::select! {
                                _ = shutdown.changed() => {}
                                () = tokio::time::sleep(delay) => {}
                            }
                        }
                        Ok(Ok(record)) => {
                            backoff.reset();
                            self.route_record(
                                record.topic(),
                                record.partition(),
                                record.offset(),
                                record.payload(),
                            );
                        }
                    }
                }
            }

            if Instant::now() >= next_commit {
                self.commit_safe_offsets(&consumer, CommitMode::Async);
                next_commit = Instant::now() + self.config.commit_interval;
            }
        }

        *lock(&self.state) = ConsumerState::Stopping;
        tracing::info!(
            subscriber_id = %self.subscriber_id,
            mode = ?self.config.shutdown_mode,
            "Stopping subscription"
        );

        self.swimlanes.stop_all(self.config.shutdown_mode).await;
        self.commit_safe_offsets(&consumer, CommitMode::Sync);
        drop(consumer);

        *lock(&self.state) = ConsumerState::Stopped;
        tracing::info!(subscriber_id = %self.subscriber_id, "Subscription stopped");
    }

    /// Decode one fetched record and hand it to its partition's swimlane.
    fn route_record(&self, topic: &str, partition: i32, offset: i64, payload: Option<&[u8]>) {
        metrics::counter!("conveyor_messages_received_total").increment(1);

        if lock(&self.failed_partitions).contains(&(topic.to_string(), partition)) {
            // A handler failed on this partition: forward progress is
            // halted until restart or rebalance redelivers from the
            // stalled offset.
            tracing::warn!(
                subscriber_id = %self.subscriber_id,
                topic,
                partition,
                offset,
                "Partition halted by earlier handler failure; record not dispatched"
            );
            return;
        }

        let decoded = payload
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
            .map(Message::from_json);

        let message = match decoded {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                self.acknowledge_poison(topic, partition, offset, &e.to_string());
                return;
            }
            None => {
                self.acknowledge_poison(topic, partition, offset, "missing or non-UTF-8 payload");
                return;
            }
        };

        lock(&self.tracker).note_unprocessed(topic, partition, offset);

        let completion = self.completion_callback(topic.to_string(), partition, offset);
        let lane = self.swimlanes.lane(partition);
        if !lane.dispatch(message, Arc::clone(&self.lane_consumer), completion) {
            // The lane is stopping; the record never started, so its offset
            // must not block ones that already completed.
            lock(&self.tracker).note_abandoned(topic, partition, offset);
        }
    }

    /// A record that cannot become a `Message` is acknowledged without a
    /// handler: redelivering it could never succeed.
    fn acknowledge_poison(&self, topic: &str, partition: i32, offset: i64, reason: &str) {
        tracing::warn!(
            subscriber_id = %self.subscriber_id,
            topic,
            partition,
            offset,
            reason,
            "Poison record acknowledged without dispatch"
        );
        metrics::counter!("conveyor_poison_records_total").increment(1);
        let mut tracker = lock(&self.tracker);
        tracker.note_unprocessed(topic, partition, offset);
        tracker.note_processed(topic, partition, offset);
    }

    fn completion_callback(
        &self,
        topic: String,
        partition: i32,
        offset: i64,
    ) -> CompletionCallback {
        let tracker = Arc::clone(&self.tracker);
        let failed_partitions = Arc::clone(&self.failed_partitions);
        let subscriber_id = self.subscriber_id.clone();

        Box::new(move |outcome| match outcome {
            Ok(()) => {
                metrics::counter!("conveyor_messages_handled_total").increment(1);
                lock(&tracker).note_processed(&topic, partition, offset);
            }
            Err(e) => {
                metrics::counter!("conveyor_handler_failures_total").increment(1);
                tracing::error!(
                    subscriber_id = %subscriber_id,
                    topic = %topic,
                    partition,
                    offset,
                    error = %e,
                    "Handler failed; halting partition"
                );
                lock(&failed_partitions).insert((topic.clone(), partition));
            }
        })
    }

    fn commit_safe_offsets(&self, consumer: &StreamConsumer, mode: CommitMode) {
        let safe = lock(&self.tracker).offsets_to_commit();
        if safe.is_empty() {
            return;
        }

        let mut tpl = TopicPartitionList::new();
        for ((topic, partition), offset) in &safe {
            // The committed position is the next offset to consume.
            if let Err(e) = tpl.add_partition_offset(topic, *partition, Offset::Offset(offset + 1))
            {
                tracing::warn!(
                    subscriber_id = %self.subscriber_id,
                    topic = %topic,
                    partition,
                    error = %e,
                    "Failed to stage offset for commit"
                );
            }
        }

        if let Err(e) = consumer.commit(&tpl, mode) {
            tracing::warn!(
                subscriber_id = %self.subscriber_id,
                error = %e,
                "Offset commit failed (offsets may be recommitted)"
            );
        } else {
            tracing::debug!(
                subscriber_id = %self.subscriber_id,
                partitions = safe.len(),
                "Committed safe offsets"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_subscription_starts_in_created_state() {
        let subscription =
            KafkaSubscription::new("sub-1".to_string(), vec!["orders".to_string()]);
        assert_eq!(subscription.state(), ConsumerState::Created);
        assert_eq!(subscription.subscriber_id(), "sub-1");
        assert_eq!(subscription.channels(), ["orders".to_string()]);
    }

    #[tokio::test]
    async fn unsubscribe_without_a_started_loop_is_a_no_op() {
        let subscription =
            KafkaSubscription::new("sub-1".to_string(), vec!["orders".to_string()]);
        subscription.unsubscribe().await;
        subscription.unsubscribe().await;
        assert_eq!(subscription.state(), ConsumerState::Created);
    }
}

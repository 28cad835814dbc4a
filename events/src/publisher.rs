//! Domain-event publisher.
//!
//! Wraps the outbox producer with aggregate routing: the aggregate type is
//! the destination topic, the aggregate id is the partition key, and the
//! event's wire name travels in the `EVENT_TYPE` header for consumer-side
//! type dispatch.

use crate::DomainEvent;
use conveyor_core::message::{Message, headers};
use conveyor_postgres::{OutboxError, OutboxProducer};
use sqlx::{Postgres, Transaction};
use std::sync::Arc;
use thiserror::Error;

/// Errors from publishing domain events.
#[derive(Error, Debug)]
pub enum EventError {
    /// The event body could not be serialized to JSON.
    #[error("Failed to serialize event {event_type}: {reason}")]
    Serialization {
        /// The wire name of the event that failed.
        event_type: String,
        /// The serializer's diagnostic.
        reason: String,
    },

    /// The outbox rejected the enqueue; the caller's transaction rolls back.
    #[error(transparent)]
    Outbox(#[from] OutboxError),
}

/// Publishes typed events through the outbox in the caller's transaction.
///
/// Events for the same `aggregate_id` carry the same `PARTITION_ID` and
/// therefore land in the same broker partition, preserving their order for
/// every subscriber.
pub struct DomainEventPublisher {
    producer: Arc<OutboxProducer>,
}

impl DomainEventPublisher {
    /// Create a publisher over the given outbox producer.
    #[must_use]
    pub fn new(producer: Arc<OutboxProducer>) -> Self {
        Self { producer }
    }

    /// Publish `events` for one aggregate instance, in order, inside the
    /// caller's transaction. Returns the assigned message ids.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if an event body cannot be
    /// encoded (nothing is persisted for it or any later event) and
    /// [`EventError::Outbox`] if the outbox insert fails — either way the
    /// caller's transaction rolls back and no event was published.
    pub async fn publish<E: DomainEvent>(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        aggregate_type: &str,
        aggregate_id: &str,
        events: &[E],
    ) -> Result<Vec<String>, EventError> {
        let mut ids = Vec::with_capacity(events.len());

        for event in events {
            let payload =
                serde_json::to_string(event).map_err(|e| EventError::Serialization {
                    event_type: event.event_type().to_string(),
                    reason: e.to_string(),
                })?;

            let message = Message::builder(payload)
                .header(headers::PARTITION_ID, aggregate_id)
                .header(headers::EVENT_AGGREGATE_TYPE, aggregate_type)
                .header(headers::EVENT_AGGREGATE_ID, aggregate_id)
                .header(headers::EVENT_TYPE, event.event_type())
                .build();

            let id = self.producer.send(tx, aggregate_type, message).await?;

            tracing::debug!(
                message_id = %id,
                aggregate_type = %aggregate_type,
                aggregate_id = %aggregate_id,
                event_type = %event.event_type(),
                "Domain event published to outbox"
            );

            ids.push(id);
        }

        Ok(ids)
    }
}

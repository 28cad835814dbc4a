//! Transactional outbox producer.
//!
//! `Send(destination, message)` becomes a row in the `message` table,
//! written through the caller's ambient transaction. Nothing talks to the
//! broker here: the CDC relay (a separate deployment) moves committed rows
//! onward, which is what makes the producer side exactly-once — either the
//! business transaction commits and the row exists, or it rolls back and
//! no message was ever sent.

use crate::DEFAULT_SCHEMA;
use chrono::Utc;
use conveyor_core::ids::IdGenerator;
use conveyor_core::interceptor::{InterceptorError, InterceptorStack};
use conveyor_core::message::{Message, headers};
use sqlx::{Postgres, Transaction};
use std::sync::Arc;
use thiserror::Error;

/// Errors from outbox operations.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// `send` was called with an empty destination.
    #[error("Destination cannot be empty")]
    EmptyDestination,

    /// A `pre_send` interceptor rejected the message.
    #[error(transparent)]
    Interceptor(#[from] InterceptorError),

    /// The header map could not be serialized for storage.
    #[error("Failed to serialize headers: {0}")]
    Serialization(String),

    /// The insert (or another statement) failed; the caller's transaction
    /// will roll back.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Writes messages into the outbox table within the caller's transaction.
///
/// The producer is stateless apart from its configuration and safe to share
/// across tasks. Retrying is deliberately absent: a failed insert fails the
/// caller's transaction, and redelivery of committed rows is the CDC
/// relay's concern.
pub struct OutboxProducer {
    schema: String,
    id_generator: Arc<dyn IdGenerator>,
    interceptors: InterceptorStack,
}

impl OutboxProducer {
    /// Create a producer against the default schema.
    #[must_use]
    pub fn new(id_generator: Arc<dyn IdGenerator>, interceptors: InterceptorStack) -> Self {
        Self {
            schema: DEFAULT_SCHEMA.to_string(),
            id_generator,
            interceptors,
        }
    }

    /// Override the schema holding the `message` table.
    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Enqueue `message` for `destination` inside the caller's transaction.
    ///
    /// Stamps the reserved `ID`, `DESTINATION`, and `DATE` headers, runs the
    /// `pre_send` interceptor hooks (which may mutate headers), inserts the
    /// row with `published = 0`, runs `post_send`, and returns the assigned
    /// id. Ids are creation-ordered, so rows drain in send order.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::EmptyDestination`] before any side effect,
    /// [`OutboxError::Interceptor`] if a `pre_send` hook rejects the
    /// message, and [`OutboxError::Serialization`] /
    /// [`OutboxError::Database`] if persisting fails — in which case the
    /// caller's transaction rolls back and nothing was sent.
    pub async fn send(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        destination: &str,
        message: Message,
    ) -> Result<String, OutboxError> {
        if destination.is_empty() {
            return Err(OutboxError::EmptyDestination);
        }

        let mut message = message;
        let id = self.id_generator.generate();
        message.id.clone_from(&id);
        message.set_header(headers::ID, &id);
        message.set_header(headers::DESTINATION, destination);
        message.set_header(headers::DATE, Utc::now().to_rfc3339());

        self.interceptors.pre_send(&mut message)?;

        let header_map = serde_json::to_string(&message.headers)
            .map_err(|e| OutboxError::Serialization(e.to_string()))?;

        sqlx::query(&format!(
            "INSERT INTO {}.message (id, destination, headers, payload) VALUES ($1, $2, $3, $4)",
            self.schema
        ))
        .bind(&message.id)
        .bind(destination)
        .bind(&header_map)
        .bind(&message.payload)
        .execute(&mut **tx)
        .await?;

        tracing::debug!(
            message_id = %message.id,
            destination = %destination,
            "Message written to outbox"
        );

        self.interceptors.post_send(&message);

        Ok(id)
    }
}


//! Database-backed inbox: duplicate detection and transaction scoping.
//!
//! The broker delivers at-least-once; this decorator narrows handling to
//! effectively-once per subscriber. Insertion into `received_messages` is
//! the gate: the primary key `(message_id, consumer_id)` admits each
//! message once per subscriber, and because the insert shares a transaction
//! with the handler's business writes, a handler failure rolls the marker
//! back and the redelivered message gets a fresh attempt.

use crate::DEFAULT_SCHEMA;
use crate::tx::DeliveryTransaction;
use conveyor_core::decorator::{
    ChainCursor, DeliveryContext, HandlerError, HandlerFuture, MessageHandlerDecorator,
};
use sqlx::PgPool;
use std::sync::Arc;

/// Decorator that gates deliveries through the `received_messages` table.
///
/// Per delivery:
///
/// 1. begin a transaction from the pool
/// 2. `INSERT ... ON CONFLICT DO NOTHING` the `(message_id, consumer_id)`
///    pair; zero rows affected means duplicate → commit and short-circuit
///    (the handler never runs, the offset advances)
/// 3. otherwise expose the transaction to the rest of the chain as
///    [`DeliveryTransaction`] and invoke it
/// 4. commit on success; roll back on error (the marker disappears, so the
///    message can be retried on redelivery) and propagate the error
pub struct DuplicateDetectingDecorator {
    pool: PgPool,
    schema: String,
}

impl DuplicateDetectingDecorator {
    /// Create the decorator against the default schema.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema: DEFAULT_SCHEMA.to_string(),
        }
    }

    /// Override the schema holding the `received_messages` table.
    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }
}

impl MessageHandlerDecorator for DuplicateDetectingDecorator {
    fn handle(&self, ctx: DeliveryContext, next: ChainCursor) -> HandlerFuture {
        let pool = self.pool.clone();
        let schema = self.schema.clone();
        Box::pin(async move {
            let message_id = ctx.message.id.clone();
            let subscriber_id = ctx.subscriber_id.clone();

            let mut tx = pool
                .begin()
                .await
                .map_err(|e| HandlerError::Database(e.to_string()))?;

            let inserted = sqlx::query(&format!(
                "INSERT INTO {schema}.received_messages (message_id, consumer_id) \
                 VALUES ($1, $2) ON CONFLICT DO NOTHING"
            ))
            .bind(&message_id)
            .bind(&subscriber_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| HandlerError::Database(e.to_string()))?;

            if inserted.rows_affected() == 0 {
                tracing::debug!(
                    message_id = %message_id,
                    subscriber_id = %subscriber_id,
                    "Duplicate message skipped"
                );
                tx.commit()
                    .await
                    .map_err(|e| HandlerError::Database(e.to_string()))?;
                return Ok(());
            }

            let delivery_tx = DeliveryTransaction::new(tx);
            ctx.scope.insert(Arc::new(delivery_tx.clone()));

            match next.invoke(ctx).await {
                Ok(()) => {
                    if let Some(tx) = delivery_tx.take().await {
                        tx.commit()
                            .await
                            .map_err(|e| HandlerError::Database(e.to_string()))?;
                    }
                    Ok(())
                }
                Err(e) => {
                    if let Some(tx) = delivery_tx.take().await {
                        if let Err(rollback_err) = tx.rollback().await {
                            tracing::warn!(
                                message_id = %message_id,
                                error = %rollback_err,
                                "Failed to roll back delivery transaction"
                            );
                        }
                    }
                    tracing::debug!(
                        message_id = %message_id,
                        subscriber_id = %subscriber_id,
                        error = %e,
                        "Delivery failed; inbox marker rolled back"
                    );
                    Err(e)
                }
            }
        })
    }
}

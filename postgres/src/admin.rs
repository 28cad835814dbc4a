//! Operational helpers for the messaging tables.
//!
//! Purge and count operations used by admin tooling and test assertions,
//! plus the row-level reads a relay (or the test harness standing in for
//! one) needs to drain committed outbox rows.

use crate::DEFAULT_SCHEMA;
use crate::outbox::OutboxError;
use sqlx::{PgPool, Row};

/// One row of the `message` table.
#[derive(Clone, Debug)]
pub struct OutboxRecord {
    /// The envelope id (primary key).
    pub id: String,
    /// Destination channel.
    pub destination: String,
    /// Serialized header map (JSON object, string→string).
    pub headers: String,
    /// Opaque payload.
    pub payload: String,
    /// 0 until the relay has moved the row to the broker.
    pub published: i16,
}

/// Administrative access to the `message` and `received_messages` tables.
#[derive(Clone)]
pub struct MessagingAdmin {
    pool: PgPool,
    schema: String,
}

impl MessagingAdmin {
    /// Create against the default schema.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema: DEFAULT_SCHEMA.to_string(),
        }
    }

    /// Override the schema.
    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Delete every outbox row.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Database`] if the delete fails.
    pub async fn purge_messages(&self) -> Result<u64, OutboxError> {
        let result = sqlx::query(&format!("DELETE FROM {}.message", self.schema))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete every inbox row.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Database`] if the delete fails.
    pub async fn purge_received_messages(&self) -> Result<u64, OutboxError> {
        let result = sqlx::query(&format!("DELETE FROM {}.received_messages", self.schema))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Total outbox rows.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Database`] if the query fails.
    pub async fn message_count(&self) -> Result<i64, OutboxError> {
        let row: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}.message", self.schema))
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    /// Outbox rows the relay has not yet published.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Database`] if the query fails.
    pub async fn unpublished_count(&self) -> Result<i64, OutboxError> {
        let row: (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM {}.message WHERE published = 0",
            self.schema
        ))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    /// Total inbox rows.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Database`] if the query fails.
    pub async fn received_count(&self) -> Result<i64, OutboxError> {
        let row: (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM {}.received_messages",
            self.schema
        ))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    /// Unpublished outbox rows in id (creation) order.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Database`] if the query fails.
    pub async fn unpublished(&self, limit: i64) -> Result<Vec<OutboxRecord>, OutboxError> {
        let rows = sqlx::query(&format!(
            "SELECT id, destination, headers, payload, published \
             FROM {}.message WHERE published = 0 ORDER BY id ASC LIMIT $1",
            self.schema
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(OutboxRecord {
                    id: row.try_get("id")?,
                    destination: row.try_get("destination")?,
                    headers: row.try_get("headers")?,
                    payload: row.try_get("payload")?,
                    published: row.try_get("published")?,
                })
            })
            .collect()
    }

    /// Mark an outbox row as published (relay bookkeeping).
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Database`] if the update fails.
    pub async fn mark_published(&self, id: &str) -> Result<(), OutboxError> {
        sqlx::query(&format!(
            "UPDATE {}.message SET published = 1 WHERE id = $1",
            self.schema
        ))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

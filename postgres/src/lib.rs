//! `PostgreSQL` outbox and inbox for the Conveyor messaging framework.
//!
//! This crate provides the database half of the delivery guarantee:
//!
//! - [`OutboxProducer`]: writes outbound messages into the `message` table
//!   inside the caller's transaction, so a business write and its events
//!   commit or roll back together. An external CDC relay drains committed
//!   rows into the broker.
//! - [`DuplicateDetectingDecorator`]: the consumer-side inbox. Insertion of
//!   `(message_id, consumer_id)` into `received_messages` is the atomic gate
//!   that grants a handler the right to run; a conflict means duplicate and
//!   the handler is skipped.
//! - [`DeliveryTransaction`]: the delivery-scoped transaction the decorator
//!   shares with handlers, so business writes land atomically with the
//!   inbox marker.
//! - [`MessagingAdmin`]: operational purge and count helpers for both
//!   tables.
//!
//! # Schema
//!
//! Tables live in a configurable schema (default
//! [`DEFAULT_SCHEMA`] = `eventuate`); `migrations/` carries the DDL.
//!
//! # Example
//!
//! ```ignore
//! use conveyor_core::{InterceptorStack, Message, TimeOrderedIdGenerator};
//! use conveyor_postgres::OutboxProducer;
//! use std::sync::Arc;
//!
//! # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
//! let producer = OutboxProducer::new(
//!     Arc::new(TimeOrderedIdGenerator::new()),
//!     InterceptorStack::new(),
//! );
//!
//! let mut tx = pool.begin().await?;
//! sqlx::query("UPDATE accounts SET balance = balance - 10 WHERE id = $1")
//!     .bind("acct-1")
//!     .execute(&mut *tx)
//!     .await?;
//! producer.send(&mut tx, "AccountEvents", Message::new(r#"{"debited":10}"#)).await?;
//! tx.commit().await?; // business write and outbox row commit atomically
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod admin;
pub mod inbox;
pub mod outbox;
pub mod tx;

pub use admin::{MessagingAdmin, OutboxRecord};
pub use inbox::DuplicateDetectingDecorator;
pub use outbox::{OutboxError, OutboxProducer};
pub use tx::DeliveryTransaction;

/// Default schema holding the `message` and `received_messages` tables.
pub const DEFAULT_SCHEMA: &str = "eventuate";

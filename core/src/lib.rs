//! Core traits and types for the Conveyor transactional messaging framework.
//!
//! Conveyor moves domain events between services with
//! exactly-once-from-producer, effectively-once-to-consumer semantics:
//! producers write outbound messages into a relational outbox inside the
//! same transaction as their business writes, an external CDC relay drains
//! committed rows into a Kafka-compatible broker, and subscribers consume
//! with database-backed deduplication and per-partition ordered dispatch.
//!
//! This crate holds the pieces with no I/O of their own:
//!
//! - [`message`]: the envelope (`id` + headers + payload) and the canonical
//!   reserved header names
//! - [`ids`]: creation-ordered message id generation
//! - [`interceptor`]: the six-hook cross-cutting pipeline
//! - [`scope`]: the per-delivery service lookup context
//! - [`decorator`]: the handler decorator chain every delivery runs through
//! - [`consumer`]: the subscription traits the broker crate implements
//!
//! The infrastructure adapters live in sibling crates: `conveyor-postgres`
//! (outbox + inbox), `conveyor-events` (typed domain events), and
//! `conveyor-kafka` (broker consumer lifecycle).
//!
//! # Data flow
//!
//! ```text
//! send:    caller ──▶ DomainEventPublisher ──▶ OutboxProducer ──▶ message table
//!                                        (caller's DB transaction)
//!          message table ──▶ [external CDC relay] ──▶ broker topic
//!
//! receive: broker topic ──▶ fetch loop ──▶ swimlane (by partition)
//!                        ──▶ decorator chain ──▶ typed handler
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod consumer;
pub mod decorator;
pub mod ids;
pub mod interceptor;
pub mod message;
pub mod scope;

pub use consumer::{MessageConsumer, ShutdownMode, Subscription, SubscriptionError};
pub use decorator::{
    CancellationWatch, ChainCursor, DecoratorChain, DeliveryContext, HandleInterceptorsDecorator,
    HandlerError, HandlerFuture, MessageHandler, MessageHandlerDecorator,
    ReceiveInterceptorsDecorator,
};
pub use ids::{IdGenerator, TimeOrderedIdGenerator};
pub use interceptor::{InterceptorError, InterceptorStack, MessageInterceptor};
pub use message::{Message, MessageBuilder, MessageError};
pub use scope::ServiceScope;

//! Kafka-compatible broker consumer lifecycle for Conveyor.
//!
//! This crate implements the receive side of the framework against any
//! Kafka-protocol broker (Apache Kafka, Redpanda, MSK, ...):
//!
//! - [`KafkaMessageConsumer`]: the
//!   [`MessageConsumer`](conveyor_core::MessageConsumer) implementation —
//!   one broker session and fetch task per subscription, consumer-group =
//!   subscriber id, manual offset commits
//! - [`SwimlaneDispatcher`] / [`SwimlaneMap`]: per-partition single-writer
//!   lanes that preserve offset order within a partition while partitions
//!   run concurrently
//! - [`OffsetTracker`]: per-partition safe-to-commit watermarks, so a
//!   failed or in-flight record is never committed past
//! - [`KafkaConsumerConfig`]: poll/commit cadence, offset reset, session
//!   timeout, and the shutdown mode
//!
//! # Delivery semantics
//!
//! At-least-once from the broker. Offsets are committed only for records
//! whose handler completed successfully with no earlier record of the same
//! partition still in flight. A handler failure halts its partition: the
//! swimlane goes quiescent, no further records are dispatched to it, and
//! the stalled offset causes redelivery on the next start or rebalance.
//! Pair with the inbox decorator from `conveyor-postgres` for
//! effectively-once handling.
//!
//! # Shutdown
//!
//! `unsubscribe`/`close` stop the fetch loop, then every swimlane: in
//! [`ShutdownMode::WaitForCompletion`](conveyor_core::ShutdownMode) the
//! in-flight handler finishes and its offset is committed; in
//! `CancelCurrent` a cooperating handler observes the cancellation watch
//! and aborts, leaving its offset uncommitted for redelivery. Queued but
//! unstarted messages are abandoned in both modes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod backoff;
pub mod config;
pub mod consumer;
pub mod offsets;
pub mod subscription;
pub mod swimlane;

pub use config::{KafkaConsumerConfig, KafkaConsumerConfigBuilder};
pub use consumer::KafkaMessageConsumer;
pub use offsets::OffsetTracker;
pub use subscription::{ConsumerState, KafkaSubscription};
pub use swimlane::{CompletionCallback, SwimlaneConsumer, SwimlaneDispatcher, SwimlaneMap};

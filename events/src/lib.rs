//! Typed domain events over the Conveyor messaging core.
//!
//! This crate is the layer most application code talks to:
//!
//! - [`DomainEvent`]: the trait aggregate event types implement
//! - [`DomainEventPublisher`]: stamps event routing headers and writes each
//!   event through the outbox in the caller's transaction
//! - [`DomainEventDispatcher`]: the terminal consumer of the delivery
//!   chain — decodes payloads into their concrete types and fans out to the
//!   handlers registered for `(aggregate_type, event_type)`
//!
//! # Aggregates and routing
//!
//! An aggregate type maps to a topic; an aggregate id maps to a partition
//! key. Publishing stamps `PARTITION_ID = aggregate_id`, so all events of
//! one aggregate instance land in one partition and are handled in order.
//!
//! # Event naming
//!
//! [`DomainEvent::event_type`] returns the wire name of the event: either a
//! declared alias (stable across refactors) or the fully-qualified Rust
//! type name. Handlers are registered under the same name.
//!
//! # Example
//!
//! ```
//! use conveyor_events::DomainEvent;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! enum OrderEvent {
//!     Placed { order_id: String, total_cents: i64 },
//!     Cancelled { order_id: String },
//! }
//!
//! impl DomainEvent for OrderEvent {
//!     fn event_type(&self) -> &str {
//!         match self {
//!             OrderEvent::Placed { .. } => "OrderPlaced",
//!             OrderEvent::Cancelled { .. } => "OrderCancelled",
//!         }
//!     }
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dispatcher;
pub mod publisher;

pub use dispatcher::{
    DomainEventDispatcher, DomainEventEnvelope, DomainEventHandlers, DomainEventHandlersBuilder,
};
pub use publisher::{DomainEventPublisher, EventError};

use serde::Serialize;

/// A fact that happened to an aggregate, publishable through the outbox.
///
/// Implementations are usually one enum per aggregate, with one variant per
/// event. [`event_type`](DomainEvent::event_type) returns the wire name:
/// declare an alias for stability, or fall back to
/// `std::any::type_name::<Self>()` for the fully-qualified type name.
pub trait DomainEvent: Serialize + Send + Sync {
    /// The wire name of this event.
    fn event_type(&self) -> &str;
}

//! Test doubles and an in-process relay harness for Conveyor.
//!
//! This crate provides what the framework's own tests (and applications
//! testing against the framework) need:
//!
//! - [`CountingInterceptor`]: counts all six interceptor hooks
//! - [`SequentialIdGenerator`]: deterministic, still creation-ordered ids
//! - [`OutboxRelayHarness`]: publisher → outbox → (simulated relay +
//!   broker) → swimlanes → decorator chain → handlers, in one process,
//!   against a real Postgres
//!
//! The harness deliberately reuses the production swimlane and decorator
//! code; only the broker transport is simulated. Tests instantiate one
//! harness per fixture — there is no process-global state to tear down.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod harness;
pub mod ids;
pub mod interceptors;

pub use harness::{CompletionLog, OutboxRelayHarness};
pub use ids::SequentialIdGenerator;
pub use interceptors::{CountingInterceptor, InterceptorCounts};

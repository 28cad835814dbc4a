//! Message envelope and canonical headers.
//!
//! A [`Message`] is the immutable unit of transport in Conveyor: an `id`,
//! a string→string header map, and an opaque UTF-8 payload (typically JSON).
//! The same envelope is written to the outbox table, carried through the
//! broker, and handed to subscribers.
//!
//! # Wire schema
//!
//! The broker record value is a UTF-8 JSON object with exactly this shape:
//!
//! ```json
//! {"id": "...", "headers": {"DESTINATION": "...", "...": "..."}, "payload": "..."}
//! ```
//!
//! Serialization is lossless: `Message::from_json(&msg.to_json()?)` yields an
//! equal envelope for every well-formed message.
//!
//! # Reserved headers
//!
//! The [`headers`] module lists the canonical header names. `ID` and
//! `DESTINATION` are always present on the wire; the producer stamps them at
//! send time.
//!
//! # Example
//!
//! ```
//! use conveyor_core::message::{Message, headers};
//!
//! let message = Message::builder(r#"{"amount": 12}"#)
//!     .header(headers::PARTITION_ID, "order-42")
//!     .build();
//!
//! assert_eq!(message.header(headers::PARTITION_ID), Some("order-42"));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Canonical names of the reserved message headers.
pub mod headers {
    /// The globally unique, creation-ordered message id.
    pub const ID: &str = "ID";

    /// The destination channel (broker topic) of the message.
    pub const DESTINATION: &str = "DESTINATION";

    /// RFC 3339 timestamp stamped by the producer at send time.
    pub const DATE: &str = "DATE";

    /// Optional partition routing key; messages sharing a key share a
    /// broker partition and therefore a delivery order.
    pub const PARTITION_ID: &str = "PARTITION_ID";

    /// The event type name (declared alias or fully-qualified type name).
    pub const EVENT_TYPE: &str = "EVENT_TYPE";

    /// The aggregate type the event belongs to (also the topic name).
    pub const EVENT_AGGREGATE_TYPE: &str = "EVENT_AGGREGATE_TYPE";

    /// The id of the aggregate instance that emitted the event.
    pub const EVENT_AGGREGATE_ID: &str = "EVENT_AGGREGATE_ID";
}

/// Errors from envelope operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// A reserved or caller-required header was absent.
    #[error("Missing required header: {0}")]
    MissingHeader(String),

    /// The envelope could not be serialized to the wire schema.
    #[error("Failed to serialize message: {0}")]
    Serialization(String),

    /// The bytes on the wire were not a well-formed envelope.
    #[error("Failed to deserialize message: {0}")]
    Deserialization(String),
}

/// An immutable message envelope: id, headers, and payload.
///
/// Header keys are unique; insertion order is irrelevant (a [`BTreeMap`]
/// keeps equality and serialization deterministic). The `id` is assigned by
/// the producer and equals the `ID` header on every wire message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Globally unique message id, lexicographically sortable in creation order.
    pub id: String,

    /// Header map, string to string.
    pub headers: BTreeMap<String, String>,

    /// Opaque UTF-8 payload, typically JSON.
    pub payload: String,
}

impl Message {
    /// Create a message with the given payload, no id, and no headers.
    ///
    /// The id and the reserved `ID`/`DESTINATION`/`DATE` headers are stamped
    /// by the producer at send time; messages built here are pre-send
    /// envelopes.
    #[must_use]
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            headers: BTreeMap::new(),
            payload: payload.into(),
        }
    }

    /// Start building a message with the given payload.
    #[must_use]
    pub fn builder(payload: impl Into<String>) -> MessageBuilder {
        MessageBuilder {
            message: Self::new(payload),
        }
    }

    /// Look up a header value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Look up a header that must be present.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::MissingHeader`] naming the absent header.
    pub fn required_header(&self, name: &str) -> Result<&str, MessageError> {
        self.header(name)
            .ok_or_else(|| MessageError::MissingHeader(name.to_string()))
    }

    /// Set a header, replacing any previous value.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    /// The destination channel of the message.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::MissingHeader`] if the message has not been
    /// through a producer (the `DESTINATION` header is stamped at send time).
    pub fn destination(&self) -> Result<&str, MessageError> {
        self.required_header(headers::DESTINATION)
    }

    /// The partition routing key, if one was set.
    #[must_use]
    pub fn partition_id(&self) -> Option<&str> {
        self.header(headers::PARTITION_ID)
    }

    /// The event type name, if this message carries a domain event.
    #[must_use]
    pub fn event_type(&self) -> Option<&str> {
        self.header(headers::EVENT_TYPE)
    }

    /// Serialize to the wire schema.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Serialization`] if encoding fails.
    pub fn to_json(&self) -> Result<String, MessageError> {
        serde_json::to_string(self).map_err(|e| MessageError::Serialization(e.to_string()))
    }

    /// Deserialize from the wire schema and validate the wire invariant:
    /// a non-empty `id` and a `DESTINATION` header.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Deserialization`] for malformed JSON and
    /// [`MessageError::MissingHeader`] when the invariant does not hold.
    pub fn from_json(json: &str) -> Result<Self, MessageError> {
        let message: Self =
            serde_json::from_str(json).map_err(|e| MessageError::Deserialization(e.to_string()))?;

        if message.id.is_empty() {
            return Err(MessageError::MissingHeader(headers::ID.to_string()));
        }
        message.required_header(headers::DESTINATION)?;

        Ok(message)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message {{ id: {}, headers: {}, payload: {} bytes }}",
            self.id,
            self.headers.len(),
            self.payload.len()
        )
    }
}

/// Builder for [`Message`].
///
/// # Example
///
/// ```
/// use conveyor_core::message::{Message, headers};
///
/// let message = Message::builder("{}")
///     .header(headers::EVENT_TYPE, "OrderPlaced")
///     .build();
/// ```
#[derive(Clone, Debug)]
pub struct MessageBuilder {
    message: Message,
}

impl MessageBuilder {
    /// Add a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.message.set_header(name, value);
        self
    }

    /// Add every header from an existing map.
    #[must_use]
    pub fn headers<I, K, V>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in entries {
            self.message.set_header(name, value);
        }
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> Message {
        self.message
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code unwraps for clear failure locations
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn wire_message(id: &str, destination: &str, payload: &str) -> Message {
        let mut message = Message::new(payload);
        message.id = id.to_string();
        message.set_header(headers::ID, id);
        message.set_header(headers::DESTINATION, destination);
        message
    }

    #[test]
    fn builder_sets_headers_and_payload() {
        let message = Message::builder("payload")
            .header(headers::PARTITION_ID, "agg-1")
            .header(headers::EVENT_TYPE, "OrderPlaced")
            .build();

        assert_eq!(message.payload, "payload");
        assert_eq!(message.partition_id(), Some("agg-1"));
        assert_eq!(message.event_type(), Some("OrderPlaced"));
        assert!(message.id.is_empty());
    }

    #[test]
    fn required_header_names_the_missing_header() {
        let message = Message::new("{}");

        let err = message.required_header(headers::DESTINATION).unwrap_err();
        assert_eq!(
            err,
            MessageError::MissingHeader(headers::DESTINATION.to_string())
        );
    }

    #[test]
    fn set_header_replaces_previous_value() {
        let mut message = Message::new("{}");
        message.set_header("k", "v1");
        message.set_header("k", "v2");

        assert_eq!(message.header("k"), Some("v2"));
        assert_eq!(message.headers.len(), 1);
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: test will fail if serialization fails
    fn wire_round_trip_preserves_envelope() {
        let message = wire_message("01ab", "TestTopic", r#"{"x":1}"#);

        let json = message.to_json().expect("serialization should succeed");
        let decoded = Message::from_json(&json).expect("deserialization should succeed");

        assert_eq!(decoded, message);
    }

    #[test]
    fn from_json_rejects_missing_destination() {
        let json = r#"{"id":"01ab","headers":{},"payload":"{}"}"#;

        let err = Message::from_json(json).unwrap_err();
        assert_eq!(
            err,
            MessageError::MissingHeader(headers::DESTINATION.to_string())
        );
    }

    #[test]
    fn from_json_rejects_empty_id() {
        let json = r#"{"id":"","headers":{"DESTINATION":"t"},"payload":""}"#;

        let err = Message::from_json(json).unwrap_err();
        assert_eq!(err, MessageError::MissingHeader(headers::ID.to_string()));
    }

    #[test]
    fn from_json_rejects_malformed_json() {
        let err = Message::from_json("not json").unwrap_err();
        assert!(matches!(err, MessageError::Deserialization(_)));
    }

    #[test]
    fn display_summarizes_without_dumping_payload() {
        let message = wire_message("01ab", "TestTopic", "a long payload body");

        let display = format!("{message}");
        assert!(display.contains("01ab"));
        assert!(display.contains("19 bytes"));
    }

    proptest! {
        #[test]
        fn round_trip_holds_for_arbitrary_envelopes(
            id in "[a-f0-9]{8,32}",
            destination in "[A-Za-z][A-Za-z0-9]{0,24}",
            extra_headers in proptest::collection::btree_map("[A-Z_]{1,12}", ".{0,32}", 0..6),
            payload in ".{0,256}",
        ) {
            let mut message = wire_message(&id, &destination, &payload);
            for (name, value) in extra_headers {
                // Reserved names may collide with the wire invariant headers;
                // overwriting DESTINATION with an arbitrary value is still a
                // well-formed envelope, so no filtering is needed.
                message.set_header(name, value);
            }
            message.set_header(headers::DESTINATION, &destination);

            let json = message.to_json().unwrap();
            let decoded = Message::from_json(&json).unwrap();
            prop_assert_eq!(decoded, message);
        }
    }
}

//! Type dispatch: the terminal consumer of the delivery chain.
//!
//! Handlers are registered in a table keyed by
//! `(aggregate_type, event_type)`. Registration captures a decoding closure
//! for the concrete event type, so dispatch decodes the payload without any
//! runtime reflection and hands each matching handler a typed
//! [`DomainEventEnvelope`]. A message whose event type has no registered
//! handler is acknowledged silently — subscribing to a topic does not
//! obligate a consumer to care about every event on it.

use conveyor_core::decorator::{HandlerError, HandlerFuture, MessageHandler};
use conveyor_core::message::{Message, headers};
use conveyor_core::scope::ServiceScope;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// A decoded event, delivered to a typed handler.
#[derive(Clone, Debug)]
pub struct DomainEventEnvelope<E> {
    /// The raw message as it arrived.
    pub message: Message,
    /// The aggregate type (equals the topic the message arrived on).
    pub aggregate_type: String,
    /// The id of the aggregate instance that emitted the event.
    pub aggregate_id: String,
    /// The decoded event.
    pub event: E,
}

type ErasedHandler =
    Arc<dyn Fn(Message, String, String, Arc<ServiceScope>) -> HandlerFuture + Send + Sync>;

/// The handler table: `(aggregate_type, event_type)` to the handlers that
/// want it.
#[derive(Clone, Default)]
pub struct DomainEventHandlers {
    handlers: HashMap<(String, String), Vec<ErasedHandler>>,
}

impl DomainEventHandlers {
    /// Start registering handlers for one aggregate type.
    #[must_use]
    pub fn for_aggregate_type(aggregate_type: impl Into<String>) -> DomainEventHandlersBuilder {
        DomainEventHandlersBuilder {
            aggregate_type: aggregate_type.into(),
            handlers: Self::default(),
        }
    }

    /// The distinct aggregate types with registrations — the channels a
    /// subscriber of these handlers consumes.
    #[must_use]
    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self
            .handlers
            .keys()
            .map(|(aggregate_type, _)| aggregate_type.clone())
            .collect();
        channels.sort();
        channels.dedup();
        channels
    }

    fn lookup(&self, aggregate_type: &str, event_type: &str) -> Option<&[ErasedHandler]> {
        self.handlers
            .get(&(aggregate_type.to_string(), event_type.to_string()))
            .map(Vec::as_slice)
    }
}

/// Builder for [`DomainEventHandlers`].
pub struct DomainEventHandlersBuilder {
    aggregate_type: String,
    handlers: DomainEventHandlers,
}

impl DomainEventHandlersBuilder {
    /// Register a typed handler for `event_type` on the current aggregate
    /// type. The decoding closure for `E` is captured here, once.
    #[must_use]
    pub fn on_event<E, F, Fut>(mut self, event_type: impl Into<String>, handler: F) -> Self
    where
        E: DeserializeOwned + Send + Sync + 'static,
        F: Fn(DomainEventEnvelope<E>, Arc<ServiceScope>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let event_type = event_type.into();
        let handler = Arc::new(handler);
        let erased: ErasedHandler = Arc::new(move |message, aggregate_type, aggregate_id, scope| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let event: E = serde_json::from_str(&message.payload)
                    .map_err(|e| HandlerError::Decode(e.to_string()))?;
                (*handler)(
                    DomainEventEnvelope {
                        message,
                        aggregate_type,
                        aggregate_id,
                        event,
                    },
                    scope,
                )
                .await
            })
        });

        self.handlers
            .handlers
            .entry((self.aggregate_type.clone(), event_type))
            .or_default()
            .push(erased);
        self
    }

    /// Switch to registering handlers for another aggregate type.
    #[must_use]
    pub fn and_for_aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = aggregate_type.into();
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> DomainEventHandlers {
        self.handlers
    }
}

/// Routes delivered messages to their typed handlers.
pub struct DomainEventDispatcher {
    handlers: DomainEventHandlers,
}

impl DomainEventDispatcher {
    /// Create a dispatcher over a handler table.
    #[must_use]
    pub fn new(handlers: DomainEventHandlers) -> Self {
        Self { handlers }
    }

    /// The channels this dispatcher's handlers consume.
    #[must_use]
    pub fn channels(&self) -> Vec<String> {
        self.handlers.channels()
    }

    /// Wrap the dispatcher as the terminal [`MessageHandler`] of a chain.
    #[must_use]
    pub fn into_message_handler(self) -> MessageHandler {
        let dispatcher = Arc::new(self);
        MessageHandler::new(move |message, scope| {
            let dispatcher = Arc::clone(&dispatcher);
            Box::pin(async move { dispatcher.dispatch(message, scope).await })
        })
    }

    /// Dispatch one message to every handler registered for its
    /// `(aggregate_type, event_type)`.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Decode`] if the payload does not decode into
    /// the registered type, or the first handler error. No registered
    /// handler is not an error.
    pub async fn dispatch(
        &self,
        message: Message,
        scope: Arc<ServiceScope>,
    ) -> Result<(), HandlerError> {
        let aggregate_type = message
            .destination()
            .map_err(|e| HandlerError::Handler(e.to_string()))?
            .to_string();

        let Some(event_type) = message.event_type().map(str::to_string) else {
            tracing::debug!(message_id = %message.id, "Message carries no event type; skipping");
            return Ok(());
        };

        let Some(matching) = self.handlers.lookup(&aggregate_type, &event_type) else {
            tracing::debug!(
                message_id = %message.id,
                aggregate_type = %aggregate_type,
                event_type = %event_type,
                "No handler registered; acknowledging silently"
            );
            return Ok(());
        };

        let aggregate_id = message
            .header(headers::EVENT_AGGREGATE_ID)
            .unwrap_or_default()
            .to_string();

        for handler in matching {
            (**handler)(
                message.clone(),
                aggregate_type.clone(),
                aggregate_id.clone(),
                Arc::clone(&scope),
            )
            .await?;
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex;

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
    struct OrderPlaced {
        order_id: String,
        total_cents: i64,
    }

    fn order_message(id: &str, event_type: &str, payload: &str) -> Message {
        let mut message = Message::new(payload);
        message.id = id.to_string();
        message.set_header(headers::ID, id);
        message.set_header(headers::DESTINATION, "Orders");
        message.set_header(headers::EVENT_TYPE, event_type);
        message.set_header(headers::EVENT_AGGREGATE_TYPE, "Orders");
        message.set_header(headers::EVENT_AGGREGATE_ID, "order-42");
        message
    }

    #[tokio::test]
    async fn dispatch_decodes_and_routes_to_the_registered_handler() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);

        let handlers = DomainEventHandlers::for_aggregate_type("Orders")
            .on_event::<OrderPlaced, _, _>("OrderPlaced", move |envelope, _scope| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().unwrap().push(envelope);
                    Ok(())
                }
            })
            .build();
        let dispatcher = DomainEventDispatcher::new(handlers);

        let payload = r#"{"order_id":"order-42","total_cents":1250}"#;
        dispatcher
            .dispatch(
                order_message("m1", "OrderPlaced", payload),
                Arc::new(ServiceScope::new()),
            )
            .await
            .unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].aggregate_type, "Orders");
        assert_eq!(received[0].aggregate_id, "order-42");
        assert_eq!(
            received[0].event,
            OrderPlaced {
                order_id: "order-42".to_string(),
                total_cents: 1250,
            }
        );
    }

    #[tokio::test]
    async fn unknown_event_type_is_acknowledged_silently() {
        let handlers = DomainEventHandlers::for_aggregate_type("Orders")
            .on_event::<OrderPlaced, _, _>("OrderPlaced", |_envelope, _scope| async { Ok(()) })
            .build();
        let dispatcher = DomainEventDispatcher::new(handlers);

        let outcome = dispatcher
            .dispatch(
                order_message("m1", "SomethingElse", "{}"),
                Arc::new(ServiceScope::new()),
            )
            .await;

        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn undecodable_payload_is_a_handler_error() {
        let handlers = DomainEventHandlers::for_aggregate_type("Orders")
            .on_event::<OrderPlaced, _, _>("OrderPlaced", |_envelope, _scope| async { Ok(()) })
            .build();
        let dispatcher = DomainEventDispatcher::new(handlers);

        let outcome = dispatcher
            .dispatch(
                order_message("m1", "OrderPlaced", "not json"),
                Arc::new(ServiceScope::new()),
            )
            .await;

        assert!(matches!(outcome, Err(HandlerError::Decode(_))));
    }

    #[tokio::test]
    async fn every_matching_handler_runs() {
        let count = Arc::new(Mutex::new(0));
        let first = Arc::clone(&count);
        let second = Arc::clone(&count);

        let handlers = DomainEventHandlers::for_aggregate_type("Orders")
            .on_event::<OrderPlaced, _, _>("OrderPlaced", move |_envelope, _scope| {
                let count = Arc::clone(&first);
                async move {
                    *count.lock().unwrap() += 1;
                    Ok(())
                }
            })
            .on_event::<OrderPlaced, _, _>("OrderPlaced", move |_envelope, _scope| {
                let count = Arc::clone(&second);
                async move {
                    *count.lock().unwrap() += 1;
                    Ok(())
                }
            })
            .build();
        let dispatcher = DomainEventDispatcher::new(handlers);

        let payload = r#"{"order_id":"order-42","total_cents":1}"#;
        dispatcher
            .dispatch(
                order_message("m1", "OrderPlaced", payload),
                Arc::new(ServiceScope::new()),
            )
            .await
            .unwrap();

        assert_eq!(*count.lock().unwrap(), 2);
    }

    #[test]
    fn channels_lists_each_aggregate_type_once() {
        let handlers = DomainEventHandlers::for_aggregate_type("Orders")
            .on_event::<OrderPlaced, _, _>("OrderPlaced", |_envelope, _scope| async { Ok(()) })
            .on_event::<OrderPlaced, _, _>("OrderCancelled", |_envelope, _scope| async { Ok(()) })
            .and_for_aggregate_type("Payments")
            .on_event::<OrderPlaced, _, _>("PaymentTaken", |_envelope, _scope| async { Ok(()) })
            .build();

        assert_eq!(handlers.channels(), vec!["Orders", "Payments"]);
    }

    #[test]
    fn event_type_alias_and_type_name() {
        use crate::DomainEvent;

        #[derive(Serialize)]
        struct Aliased;
        impl DomainEvent for Aliased {
            fn event_type(&self) -> &str {
                "EventTypeName"
            }
        }

        #[derive(Serialize)]
        struct Unaliased;
        impl DomainEvent for Unaliased {
            fn event_type(&self) -> &str {
                std::any::type_name::<Self>()
            }
        }

        assert_eq!(Aliased.event_type(), "EventTypeName");
        assert!(Unaliased.event_type().ends_with("Unaliased"));
        assert!(Unaliased.event_type().contains("::"));
    }
}

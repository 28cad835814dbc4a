//! Message interceptor pipeline.
//!
//! Interceptors observe (and on the send side, mutate) every message as it
//! crosses the framework boundary. Six optional hooks cover the lifecycle:
//!
//! | Hook | Side | When |
//! |---|---|---|
//! | `pre_send` | producer | before the outbox insert; may mutate headers |
//! | `post_send` | producer | after the outbox insert |
//! | `pre_receive` | consumer | before any consumer-side processing |
//! | `post_receive` | consumer | after the delivery attempt finishes |
//! | `pre_handle` | consumer | after duplicate detection, before the handler |
//! | `post_handle` | consumer | after the handler returns |
//!
//! "Pre" hooks run in registration order and abort the operation on error;
//! "post" hooks run in reverse registration order and their errors are logged
//! without altering the outcome.
//!
//! # Example
//!
//! ```
//! use conveyor_core::interceptor::{InterceptorError, InterceptorStack, MessageInterceptor};
//! use conveyor_core::message::Message;
//! use std::sync::Arc;
//!
//! struct TraceHeaderInterceptor;
//!
//! impl MessageInterceptor for TraceHeaderInterceptor {
//!     fn pre_send(&self, message: &mut Message) -> Result<(), InterceptorError> {
//!         message.set_header("TRACE_ID", "abc123");
//!         Ok(())
//!     }
//! }
//!
//! let mut stack = InterceptorStack::new();
//! stack.register(Arc::new(TraceHeaderInterceptor));
//!
//! let mut message = Message::new("{}");
//! stack.pre_send(&mut message).unwrap();
//! assert_eq!(message.header("TRACE_ID"), Some("abc123"));
//! ```

use crate::message::Message;
use std::sync::Arc;
use thiserror::Error;

/// Error raised by a "pre" hook to abort the surrounding operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Interceptor rejected message in {hook}: {reason}")]
pub struct InterceptorError {
    /// Which hook raised the error.
    pub hook: &'static str,
    /// Why the message was rejected.
    pub reason: String,
}

impl InterceptorError {
    /// Create a new interceptor error.
    #[must_use]
    pub fn new(hook: &'static str, reason: impl Into<String>) -> Self {
        Self {
            hook,
            reason: reason.into(),
        }
    }
}

/// A cross-cutting observer of the message lifecycle.
///
/// Every hook has a no-op default, so implementations override only the
/// hooks they care about. Hooks are synchronous: they exist for header
/// stamping, tracing, and counting — I/O belongs in handler decorators.
pub trait MessageInterceptor: Send + Sync {
    /// Called before the outbox insert. May mutate headers.
    ///
    /// # Errors
    ///
    /// An error aborts the send; nothing is persisted.
    fn pre_send(&self, message: &mut Message) -> Result<(), InterceptorError> {
        let _ = message;
        Ok(())
    }

    /// Called after the outbox insert succeeds.
    ///
    /// # Errors
    ///
    /// Errors are logged by the pipeline and do not undo the send.
    fn post_send(&self, message: &Message) -> Result<(), InterceptorError> {
        let _ = message;
        Ok(())
    }

    /// Called when a message is taken up for delivery, before anything else.
    ///
    /// # Errors
    ///
    /// An error aborts the delivery; the handler does not run and the
    /// message's offset is not advanced.
    fn pre_receive(&self, message: &Message) -> Result<(), InterceptorError> {
        let _ = message;
        Ok(())
    }

    /// Called after the delivery attempt finishes, successful or not.
    ///
    /// # Errors
    ///
    /// Errors are logged by the pipeline and do not alter the outcome.
    fn post_receive(&self, message: &Message) -> Result<(), InterceptorError> {
        let _ = message;
        Ok(())
    }

    /// Called after duplicate detection admits the message, before the
    /// handler runs.
    ///
    /// # Errors
    ///
    /// An error aborts the delivery; the duplicate marker is rolled back.
    fn pre_handle(&self, message: &Message) -> Result<(), InterceptorError> {
        let _ = message;
        Ok(())
    }

    /// Called after the handler returns, successful or not.
    ///
    /// # Errors
    ///
    /// Errors are logged by the pipeline and do not alter the outcome.
    fn post_handle(&self, message: &Message) -> Result<(), InterceptorError> {
        let _ = message;
        Ok(())
    }
}

/// An ordered collection of interceptors shared by producers and consumers.
#[derive(Clone, Default)]
pub struct InterceptorStack {
    interceptors: Vec<Arc<dyn MessageInterceptor>>,
}

impl InterceptorStack {
    /// Create an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a stack from an existing list, preserving registration order.
    #[must_use]
    pub fn with(interceptors: Vec<Arc<dyn MessageInterceptor>>) -> Self {
        Self { interceptors }
    }

    /// Append an interceptor. Registration order determines hook order.
    pub fn register(&mut self, interceptor: Arc<dyn MessageInterceptor>) {
        self.interceptors.push(interceptor);
    }

    /// Whether any interceptors are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Run `pre_send` in registration order.
    ///
    /// # Errors
    ///
    /// Propagates the first hook error; later interceptors do not run.
    pub fn pre_send(&self, message: &mut Message) -> Result<(), InterceptorError> {
        for interceptor in &self.interceptors {
            interceptor.pre_send(message)?;
        }
        Ok(())
    }

    /// Run `post_send` in reverse registration order, logging errors.
    pub fn post_send(&self, message: &Message) {
        for interceptor in self.interceptors.iter().rev() {
            if let Err(e) = interceptor.post_send(message) {
                tracing::warn!(message_id = %message.id, error = %e, "post_send interceptor failed");
            }
        }
    }

    /// Run `pre_receive` in registration order.
    ///
    /// # Errors
    ///
    /// Propagates the first hook error; later interceptors do not run.
    pub fn pre_receive(&self, message: &Message) -> Result<(), InterceptorError> {
        for interceptor in &self.interceptors {
            interceptor.pre_receive(message)?;
        }
        Ok(())
    }

    /// Run `post_receive` in reverse registration order, logging errors.
    pub fn post_receive(&self, message: &Message) {
        for interceptor in self.interceptors.iter().rev() {
            if let Err(e) = interceptor.post_receive(message) {
                tracing::warn!(message_id = %message.id, error = %e, "post_receive interceptor failed");
            }
        }
    }

    /// Run `pre_handle` in registration order.
    ///
    /// # Errors
    ///
    /// Propagates the first hook error; later interceptors do not run.
    pub fn pre_handle(&self, message: &Message) -> Result<(), InterceptorError> {
        for interceptor in &self.interceptors {
            interceptor.pre_handle(message)?;
        }
        Ok(())
    }

    /// Run `post_handle` in reverse registration order, logging errors.
    pub fn post_handle(&self, message: &Message) {
        for interceptor in self.interceptors.iter().rev() {
            if let Err(e) = interceptor.post_handle(message) {
                tracing::warn!(message_id = %message.id, error = %e, "post_handle interceptor failed");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recording {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_pre_handle: bool,
    }

    impl MessageInterceptor for Recording {
        fn pre_send(&self, _message: &mut Message) -> Result<(), InterceptorError> {
            self.log.lock().unwrap().push(format!("{}:pre_send", self.name));
            Ok(())
        }

        fn post_send(&self, _message: &Message) -> Result<(), InterceptorError> {
            self.log.lock().unwrap().push(format!("{}:post_send", self.name));
            Ok(())
        }

        fn pre_handle(&self, _message: &Message) -> Result<(), InterceptorError> {
            self.log.lock().unwrap().push(format!("{}:pre_handle", self.name));
            if self.fail_pre_handle {
                return Err(InterceptorError::new("pre_handle", "rejected"));
            }
            Ok(())
        }

        fn post_handle(&self, _message: &Message) -> Result<(), InterceptorError> {
            self.log.lock().unwrap().push(format!("{}:post_handle", self.name));
            Err(InterceptorError::new("post_handle", "ignored"))
        }
    }

    fn stack_of(names: &[&'static str], log: &Arc<Mutex<Vec<String>>>) -> InterceptorStack {
        let mut stack = InterceptorStack::new();
        for &name in names {
            stack.register(Arc::new(Recording {
                name,
                log: Arc::clone(log),
                fail_pre_handle: false,
            }));
        }
        stack
    }

    #[test]
    fn pre_hooks_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stack = stack_of(&["a", "b"], &log);

        let mut message = Message::new("{}");
        stack.pre_send(&mut message).unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["a:pre_send", "b:pre_send"]);
    }

    #[test]
    fn post_hooks_run_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stack = stack_of(&["a", "b"], &log);

        stack.post_send(&Message::new("{}"));

        assert_eq!(*log.lock().unwrap(), vec!["b:post_send", "a:post_send"]);
    }

    #[test]
    fn pre_hook_error_stops_later_interceptors() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = InterceptorStack::new();
        stack.register(Arc::new(Recording {
            name: "a",
            log: Arc::clone(&log),
            fail_pre_handle: true,
        }));
        stack.register(Arc::new(Recording {
            name: "b",
            log: Arc::clone(&log),
            fail_pre_handle: false,
        }));

        let err = stack.pre_handle(&Message::new("{}")).unwrap_err();
        assert_eq!(err.hook, "pre_handle");
        assert_eq!(*log.lock().unwrap(), vec!["a:pre_handle"]);
    }

    #[test]
    fn post_hook_errors_do_not_propagate() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stack = stack_of(&["a"], &log);

        // post_handle always errors in the recording interceptor; the stack
        // logs and carries on.
        stack.post_handle(&Message::new("{}"));
        assert_eq!(*log.lock().unwrap(), vec!["a:post_handle"]);
    }
}

//! Handler decorator chain.
//!
//! Every delivery runs through an ordered pipeline of cross-cutting concerns
//! (interceptor hooks, duplicate detection, transaction scoping) ending in a
//! terminal consumer (typically the domain-event dispatcher). The chain is
//! built once per subscription and reused for every message: dispatch walks
//! an index over a shared decorator list instead of building nested closures
//! per message.
//!
//! # Chain order
//!
//! Outermost first:
//!
//! 1. receive interceptor hooks (`pre_receive` / `post_receive`)
//! 2. duplicate detection + transaction scope (provided by `conveyor-postgres`)
//! 3. handle interceptor hooks (`pre_handle` / `post_handle`)
//! 4. terminal consumer (typed event dispatch)
//!
//! Each decorator sees a delivery exactly once and must invoke the
//! continuation at most once.
//!
//! # Example
//!
//! ```
//! use conveyor_core::decorator::{DecoratorChain, DeliveryContext, MessageHandler};
//! use conveyor_core::message::Message;
//! use tokio::sync::watch;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let handler = MessageHandler::new(|message, _scope| {
//!     Box::pin(async move {
//!         println!("handled {}", message.id);
//!         Ok(())
//!     })
//! });
//!
//! let chain = DecoratorChain::builder(handler).build();
//! let (_cancel_tx, cancel_rx) = watch::channel(false);
//! let ctx = DeliveryContext::new("subscriber-1", "orders", Message::new("{}"), cancel_rx);
//! chain.dispatch(ctx).await.unwrap();
//! # }
//! ```

use crate::interceptor::{InterceptorError, InterceptorStack};
use crate::message::Message;
use crate::scope::ServiceScope;
use futures::future::BoxFuture;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

/// Errors surfaced by a delivery attempt.
///
/// These never reach the framework user directly; the consumer observes them
/// through the completion callback and stalls the partition.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The delivery was cancelled by shutdown before the handler completed.
    #[error("Delivery cancelled before completion")]
    Cancelled,

    /// A "pre" interceptor hook rejected the message.
    #[error(transparent)]
    Interceptor(#[from] InterceptorError),

    /// The event payload could not be decoded into its declared type.
    #[error("Failed to decode event payload: {0}")]
    Decode(String),

    /// A database operation failed during delivery.
    #[error("Database failure during delivery: {0}")]
    Database(String),

    /// The user handler failed.
    #[error("Handler failed: {0}")]
    Handler(String),
}

/// The future type produced by handlers and decorators.
pub type HandlerFuture = BoxFuture<'static, Result<(), HandlerError>>;

/// The terminal consumer of a chain: an async function of the decoded
/// message and the per-delivery service scope.
#[derive(Clone)]
pub struct MessageHandler {
    inner: Arc<dyn Fn(Message, Arc<ServiceScope>) -> HandlerFuture + Send + Sync>,
}

impl MessageHandler {
    /// Wrap an async closure as a handler.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(Message, Arc<ServiceScope>) -> HandlerFuture + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(handler),
        }
    }

    /// Invoke the handler.
    #[must_use]
    pub fn call(&self, message: Message, scope: Arc<ServiceScope>) -> HandlerFuture {
        (*self.inner)(message, scope)
    }
}

impl std::fmt::Debug for MessageHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MessageHandler")
    }
}

/// Everything a decorator needs to process one delivery.
#[derive(Clone, Debug)]
pub struct DeliveryContext {
    /// The subscriber this delivery belongs to (consumer-group id).
    pub subscriber_id: String,

    /// The channel the message arrived on.
    pub channel: String,

    /// The message being delivered.
    pub message: Message,

    /// Per-delivery capability lookup, shared down the chain.
    pub scope: Arc<ServiceScope>,

    cancellation: watch::Receiver<bool>,
}

impl DeliveryContext {
    /// Create a context for one delivery.
    ///
    /// The scope starts out holding a [`CancellationWatch`], so handlers
    /// that only see `(message, scope)` can still observe shutdown.
    #[must_use]
    pub fn new(
        subscriber_id: impl Into<String>,
        channel: impl Into<String>,
        message: Message,
        cancellation: watch::Receiver<bool>,
    ) -> Self {
        let scope = Arc::new(ServiceScope::new());
        scope.insert(Arc::new(CancellationWatch::new(cancellation.clone())));
        Self {
            subscriber_id: subscriber_id.into(),
            channel: channel.into(),
            message,
            scope,
            cancellation,
        }
    }

    /// Whether shutdown has requested cancellation of in-flight work.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.cancellation.borrow()
    }

    /// Completes when cancellation is signalled.
    ///
    /// Cooperating long-running handlers select on this against their own
    /// work. If the shutdown signal can no longer arrive (the sender is
    /// gone without cancelling) this future never completes.
    pub async fn cancelled(&self) {
        let mut cancellation = self.cancellation.clone();
        if cancellation.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// The shutdown signal, exposed to handlers through the service scope.
///
/// Long-running handlers select their work against
/// [`cancelled`](CancellationWatch::cancelled) and abort when it completes;
/// the delivery is then reported as cancelled, its offset stays
/// uncommitted, and the message is redelivered on the next start.
///
/// ```ignore
/// let cancellation = scope
///     .get::<CancellationWatch>()
///     .ok_or_else(|| HandlerError::Handler("no cancellation watch".into()))?;
/// tokio::select! {
///     () = cancellation.cancelled() => return Err(HandlerError::Cancelled),
///     outcome = do_work() => outcome,
/// }
/// ```
#[derive(Clone, Debug)]
pub struct CancellationWatch {
    receiver: watch::Receiver<bool>,
}

impl CancellationWatch {
    /// Wrap a shutdown watch receiver.
    #[must_use]
    pub fn new(receiver: watch::Receiver<bool>) -> Self {
        Self { receiver }
    }

    /// Whether cancellation has been signalled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Completes when cancellation is signalled; never completes if the
    /// signal can no longer arrive.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// One layer of the delivery pipeline.
pub trait MessageHandlerDecorator: Send + Sync {
    /// Process the delivery, invoking `next` at most once to continue the
    /// chain. Not invoking `next` short-circuits the delivery (the layers
    /// below never see the message).
    fn handle(&self, ctx: DeliveryContext, next: ChainCursor) -> HandlerFuture;
}

/// An immutable delivery pipeline: decorators in outermost-first order plus
/// a terminal handler. Built once per subscription via [`DecoratorChain::builder`].
pub struct DecoratorChain {
    decorators: Vec<Arc<dyn MessageHandlerDecorator>>,
    terminal: MessageHandler,
}

impl DecoratorChain {
    /// Start building a chain around the given terminal handler.
    #[must_use]
    pub fn builder(terminal: MessageHandler) -> DecoratorChainBuilder {
        DecoratorChainBuilder {
            decorators: Vec::new(),
            terminal,
        }
    }

    /// Run one delivery through the whole chain.
    #[must_use]
    pub fn dispatch(self: &Arc<Self>, ctx: DeliveryContext) -> HandlerFuture {
        ChainCursor {
            chain: Arc::clone(self),
            index: 0,
        }
        .invoke(ctx)
    }
}

/// Builder for [`DecoratorChain`]. Decorators are added outermost first.
pub struct DecoratorChainBuilder {
    decorators: Vec<Arc<dyn MessageHandlerDecorator>>,
    terminal: MessageHandler,
}

impl DecoratorChainBuilder {
    /// Add the next layer (closer to the handler than all layers added
    /// before it).
    #[must_use]
    pub fn around(mut self, decorator: Arc<dyn MessageHandlerDecorator>) -> Self {
        self.decorators.push(decorator);
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> Arc<DecoratorChain> {
        Arc::new(DecoratorChain {
            decorators: self.decorators,
            terminal: self.terminal,
        })
    }
}

/// A position in a chain: the shared decorator list plus the index of the
/// next layer to run. Cheap to clone; passing `(message, index)` instead of
/// building closures keeps dispatch allocation-flat.
#[derive(Clone)]
pub struct ChainCursor {
    chain: Arc<DecoratorChain>,
    index: usize,
}

impl ChainCursor {
    /// Run the layer at this cursor position (or the terminal handler when
    /// all decorators have run).
    #[must_use]
    pub fn invoke(self, ctx: DeliveryContext) -> HandlerFuture {
        Box::pin(async move {
            if let Some(decorator) = self.chain.decorators.get(self.index) {
                let decorator = Arc::clone(decorator);
                let next = Self {
                    chain: self.chain,
                    index: self.index + 1,
                };
                decorator.handle(ctx, next).await
            } else {
                let scope = Arc::clone(&ctx.scope);
                self.chain.terminal.call(ctx.message, scope).await
            }
        })
    }
}

/// Outermost decorator: `pre_receive` before the rest of the chain,
/// `post_receive` after the attempt finishes (successful or not).
pub struct ReceiveInterceptorsDecorator {
    interceptors: InterceptorStack,
}

impl ReceiveInterceptorsDecorator {
    /// Wrap the given interceptor stack.
    #[must_use]
    pub fn new(interceptors: InterceptorStack) -> Self {
        Self { interceptors }
    }
}

impl MessageHandlerDecorator for ReceiveInterceptorsDecorator {
    fn handle(&self, ctx: DeliveryContext, next: ChainCursor) -> HandlerFuture {
        let interceptors = self.interceptors.clone();
        Box::pin(async move {
            let message = ctx.message.clone();
            interceptors.pre_receive(&message)?;
            let outcome = next.invoke(ctx).await;
            interceptors.post_receive(&message);
            outcome
        })
    }
}

/// Innermost interceptor decorator: `pre_handle` after duplicate detection
/// admits the message, `post_handle` after the handler returns.
pub struct HandleInterceptorsDecorator {
    interceptors: InterceptorStack,
}

impl HandleInterceptorsDecorator {
    /// Wrap the given interceptor stack.
    #[must_use]
    pub fn new(interceptors: InterceptorStack) -> Self {
        Self { interceptors }
    }
}

impl MessageHandlerDecorator for HandleInterceptorsDecorator {
    fn handle(&self, ctx: DeliveryContext, next: ChainCursor) -> HandlerFuture {
        let interceptors = self.interceptors.clone();
        Box::pin(async move {
            let message = ctx.message.clone();
            interceptors.pre_handle(&message)?;
            let outcome = next.invoke(ctx).await;
            interceptors.post_handle(&message);
            outcome
        })
    }
}

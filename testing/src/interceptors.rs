//! Interceptor test doubles.

use conveyor_core::interceptor::{InterceptorError, MessageInterceptor};
use conveyor_core::message::Message;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Snapshot of how many times each hook has fired.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InterceptorCounts {
    /// `pre_send` invocations.
    pub pre_send: usize,
    /// `post_send` invocations.
    pub post_send: usize,
    /// `pre_receive` invocations.
    pub pre_receive: usize,
    /// `post_receive` invocations.
    pub post_receive: usize,
    /// `pre_handle` invocations.
    pub pre_handle: usize,
    /// `post_handle` invocations.
    pub post_handle: usize,
}

impl InterceptorCounts {
    /// Shorthand constructor in hook order: `(pre_send, post_send,
    /// pre_receive, post_receive, pre_handle, post_handle)`.
    #[must_use]
    pub const fn of(
        pre_send: usize,
        post_send: usize,
        pre_receive: usize,
        post_receive: usize,
        pre_handle: usize,
        post_handle: usize,
    ) -> Self {
        Self {
            pre_send,
            post_send,
            pre_receive,
            post_receive,
            pre_handle,
            post_handle,
        }
    }
}

/// Counts every hook invocation; the assertion workhorse of the
/// end-to-end scenarios.
#[derive(Debug, Default)]
pub struct CountingInterceptor {
    pre_send: AtomicUsize,
    post_send: AtomicUsize,
    pre_receive: AtomicUsize,
    post_receive: AtomicUsize,
    pre_handle: AtomicUsize,
    post_handle: AtomicUsize,
}

impl CountingInterceptor {
    /// Create with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the counters.
    #[must_use]
    pub fn counts(&self) -> InterceptorCounts {
        InterceptorCounts {
            pre_send: self.pre_send.load(Ordering::SeqCst),
            post_send: self.post_send.load(Ordering::SeqCst),
            pre_receive: self.pre_receive.load(Ordering::SeqCst),
            post_receive: self.post_receive.load(Ordering::SeqCst),
            pre_handle: self.pre_handle.load(Ordering::SeqCst),
            post_handle: self.post_handle.load(Ordering::SeqCst),
        }
    }
}

impl MessageInterceptor for CountingInterceptor {
    fn pre_send(&self, _message: &mut Message) -> Result<(), InterceptorError> {
        self.pre_send.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn post_send(&self, _message: &Message) -> Result<(), InterceptorError> {
        self.post_send.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn pre_receive(&self, _message: &Message) -> Result<(), InterceptorError> {
        self.pre_receive.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn post_receive(&self, _message: &Message) -> Result<(), InterceptorError> {
        self.post_receive.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn pre_handle(&self, _message: &Message) -> Result<(), InterceptorError> {
        self.pre_handle.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn post_handle(&self, _message: &Message) -> Result<(), InterceptorError> {
        self.post_handle.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_track_each_hook_independently() {
        let interceptor = CountingInterceptor::new();
        let mut message = Message::new("{}");

        interceptor.pre_send(&mut message).ok();
        interceptor.post_send(&message).ok();
        interceptor.pre_receive(&message).ok();

        assert_eq!(interceptor.counts(), InterceptorCounts::of(1, 1, 1, 0, 0, 0));
    }
}

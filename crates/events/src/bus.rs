//! Change publishing/subscription abstraction (mechanics only).
//!
//! A backing store publishes one [`ChangeEnvelope`](crate::ChangeEnvelope) per
//! committed row mutation; listeners receive them through a [`Subscription`].
//!
//! ## Delivery
//!
//! - **Broadcast**: every matching subscriber gets its own copy.
//! - **Best-effort**: a subscriber that goes away is dropped on the next publish.
//! - **Ordering**: messages from one publisher arrive in publish order; there is
//!   no ordering between concurrent publishers.
//! - **No persistence**: the table itself is the source of truth. A listener
//!   that was not subscribed when a change happened never sees it.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

/// Receiving end of one change channel.
///
/// ```ignore
/// let subscription = bus.subscribe("books:bookbuddy");
/// loop {
///     match subscription.recv_timeout(Duration::from_millis(100)) {
///         Ok(change) => deliver(change),
///         Err(RecvTimeoutError::Timeout) => continue, // check for cancellation
///         Err(RecvTimeoutError::Disconnected) => break,
///     }
/// }
/// ```
///
/// Meant for a single consuming thread. Dropping it runs the `on_close`
/// hook, which is how a transport releases whatever feeds the channel.
pub struct Subscription<M> {
    channel: String,
    receiver: Receiver<M>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl<M> Subscription<M> {
    pub fn new(channel: impl Into<String>, receiver: Receiver<M>) -> Self {
        Self {
            channel: channel.into(),
            receiver,
            on_close: None,
        }
    }

    /// Run `hook` once when the subscription is dropped.
    pub fn on_close(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(hook));
        self
    }

    /// Label the subscription was opened under (diagnostics only).
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything queued right now, without blocking.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

impl<M> Drop for Subscription<M> {
    fn drop(&mut self) {
        if let Some(hook) = self.on_close.take() {
            hook();
        }
    }
}

impl<M> core::fmt::Debug for Subscription<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("on_close", &self.on_close.is_some())
            .finish_non_exhaustive()
    }
}

/// Transport-agnostic change bus.
///
/// Publishing never waits for subscribers to consume.
pub trait ChangeBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    /// Publish `message`; returns how many subscribers it was handed to.
    fn publish(&self, message: M) -> Result<usize, Self::Error>;

    /// Receive every message published from now on.
    fn subscribe(&self, channel: &str) -> Subscription<M>;
}

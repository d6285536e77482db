//! In-memory pub/sub bus for tests/dev and the in-memory backing store.

use std::sync::{Mutex, mpsc};

use thiserror::Error;
use tracing::debug;

use crate::bus::{ChangeBus, Subscription};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InMemoryBusError {
    /// Publish failed due to internal lock poisoning.
    #[error("subscriber registry lock poisoned")]
    Poisoned,
}

type Accepts<M> = Box<dyn Fn(&M) -> bool + Send + Sync>;

struct Subscriber<M> {
    tx: mpsc::Sender<M>,
    accepts: Option<Accepts<M>>,
}

/// In-memory pub/sub bus.
///
/// Subscribers may register a predicate; messages it rejects are never sent
/// to them, which is how the in-memory store applies server-side filters.
pub struct InMemoryEventBus<M> {
    subscribers: Mutex<Vec<Subscriber<M>>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to messages accepted by `accepts`.
    pub fn subscribe_filtered<F>(&self, channel: &str, accepts: F) -> Subscription<M>
    where
        F: Fn(&M) -> bool + Send + Sync + 'static,
    {
        self.register(channel, Some(Box::new(accepts)))
    }

    /// Number of registered subscribers (dead ones are pruned on publish).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn register(&self, channel: &str, accepts: Option<Accepts<M>>) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();

        // A poisoned registry still hands out a subscription; it just never
        // receives anything.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(Subscriber { tx, accepts });
        }

        Subscription::new(channel, rx)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<M> core::fmt::Debug for InMemoryEventBus<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryEventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl<M> ChangeBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<usize, Self::Error> {
        let mut subs = self
            .subscribers
            .lock()
            .map_err(|_| InMemoryBusError::Poisoned)?;

        let before = subs.len();
        let mut delivered = 0;
        subs.retain(|sub| match &sub.accepts {
            Some(accepts) if !accepts(&message) => true,
            _ => {
                let alive = sub.tx.send(message.clone()).is_ok();
                delivered += usize::from(alive);
                alive
            }
        });

        let pruned = before - subs.len();
        if pruned > 0 {
            debug!(pruned, remaining = subs.len(), "dropped closed subscribers");
        }
        Ok(delivered)
    }

    fn subscribe(&self, channel: &str) -> Subscription<M> {
        self.register(channel, None)
    }
}
